use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};

use crate::metrics::REQUESTS_TOTAL;
use crate::pipeline::ProxyContext;
use crate::state::AppState;

/// Catch-all entry point. Every non-OPTIONS request runs through the
/// pipeline; its error or the relayed backend response is returned.
pub async fn proxy_entry(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        return HttpResponse::Ok().finish();
    }

    let response = match ProxyContext::from_request(&req, body) {
        Ok(ctx) => match state.pipeline.run(ctx).await {
            Ok(upstream) => upstream.into_http_response(),
            Err(e) => e.error_response(),
        },
        Err(e) => e.error_response(),
    };

    REQUESTS_TOTAL
        .with_label_values(&[state.pipeline.route_label(req.path()), response.status().as_str()])
        .inc();
    response
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.default_service(web::to(proxy_entry));
}
