use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use super::{build_request, execute, UpstreamResponse};
use crate::error::GatewayError;
use crate::metrics::FANOUT_TOTAL;
use crate::pipeline::ProxyContext;
use crate::routing::ResolvedTarget;

/// Send the request to every candidate at once and return the first
/// complete response.
///
/// The right to answer is claimed with a single compare-and-swap, so at
/// most one response ever leaves this function. Losing attempts are aborted
/// as soon as a winner is known or the deadline passes. If every candidate
/// fails, the caller still gets `UpstreamTimeout` only once `deadline` has
/// elapsed.
pub async fn race(
    client: &reqwest::Client,
    ctx: &ProxyContext,
    candidates: Vec<ResolvedTarget>,
    deadline: Duration,
) -> Result<UpstreamResponse, GatewayError> {
    if candidates.is_empty() {
        return Err(GatewayError::RouteNotFound(ctx.path.clone()));
    }

    let deadline_at = tokio::time::Instant::now() + deadline;
    let claimed = Arc::new(AtomicBool::new(false));
    let mut attempts = JoinSet::new();

    for target in candidates {
        let url = target.outbound_url(ctx.query.as_deref());
        let request = build_request(client, ctx, &url, None);
        let claimed = Arc::clone(&claimed);

        attempts.spawn(async move {
            tracing::info!(url = %url, "fan-out attempt");
            match execute(request, &url).await {
                Ok(response) => claimed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                    .then_some((url, response)),
                Err(e) => {
                    tracing::warn!(error = %e, "fan-out attempt failed");
                    None
                }
            }
        });
    }

    let outcome = tokio::time::timeout_at(deadline_at, async {
        while let Some(joined) = attempts.join_next().await {
            if let Ok(Some(winner)) = joined {
                return Some(winner);
            }
        }
        None
    })
    .await;

    attempts.abort_all();

    match outcome {
        Ok(Some((url, response))) => {
            FANOUT_TOTAL.with_label_values(&["won"]).inc();
            tracing::info!(url = %url, status = %response.status, "fan-out winner");
            Ok(response)
        }
        Ok(None) => {
            FANOUT_TOTAL.with_label_values(&["all_failed"]).inc();
            tokio::time::sleep_until(deadline_at).await;
            Err(GatewayError::UpstreamTimeout(format!(
                "all fan-out candidates failed for {}",
                ctx.path
            )))
        }
        Err(_) => {
            FANOUT_TOTAL.with_label_values(&["timeout"]).inc();
            Err(GatewayError::UpstreamTimeout(format!(
                "no fan-out candidate answered within {deadline:?} for {}",
                ctx.path
            )))
        }
    }
}
