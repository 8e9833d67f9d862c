//! Path-prefix routing: tenant-scoped services first, then the static
//! service table.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::GatewayError;
use crate::tenant::Tenant;

pub const UNROUTED_LABEL: &str = "unrouted";

/// Services hosted per tenant, each on its own port of `tenant.host`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantService {
    Bmrm,
    Biz,
    Tally,
}

impl TenantService {
    /// Evaluation order of the tenant-scoped rules.
    pub const ALL: [TenantService; 3] = [TenantService::Bmrm, TenantService::Biz, TenantService::Tally];

    pub fn prefix(self) -> &'static str {
        match self {
            TenantService::Bmrm => "/api/bmrm",
            TenantService::Biz => "/api/biz",
            TenantService::Tally => "/api/tally",
        }
    }

    pub fn port(self, tenant: &Tenant) -> u32 {
        match self {
            TenantService::Bmrm => tenant.bmrm_port,
            TenantService::Biz => tenant.biz_port,
            TenantService::Tally => tenant.tally_port,
        }
    }
}

/// Backend base URL plus the request path with the routing prefix removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub base_url: String,
    pub trimmed_path: String,
}

impl ResolvedTarget {
    /// URL to send the request to. Tenant hosts are often bare addresses,
    /// those get `http://`.
    pub fn outbound_url(&self, query: Option<&str>) -> String {
        let mut url = if self.base_url.contains("://") {
            format!("{}{}", self.base_url, self.trimmed_path)
        } else {
            format!("http://{}{}", self.base_url, self.trimmed_path)
        };
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        url
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base_url, self.trimmed_path)
    }
}

/// Read-only routing table built from the `services` config map.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// Sorted longest prefix first
    static_routes: Vec<(String, String)>,
}

impl RoutingTable {
    pub fn new(services: &BTreeMap<String, String>) -> Self {
        let mut static_routes: Vec<(String, String)> = services
            .iter()
            .map(|(prefix, base)| (prefix.clone(), base.clone()))
            .collect();
        static_routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { static_routes }
    }

    /// Resolve the single backend for `path`.
    ///
    /// Tenant fields are only read after a tenant-scoped prefix matched; a
    /// tenant-scoped path without a tenant does not fall through to the
    /// static table.
    pub fn resolve(&self, tenant: Option<&Tenant>, path: &str) -> Result<ResolvedTarget, GatewayError> {
        for service in TenantService::ALL {
            let Some(trimmed) = path.strip_prefix(service.prefix()) else {
                continue;
            };
            let tenant = tenant.ok_or_else(|| {
                GatewayError::RouteNotFound(format!("{path} (no tenant context)"))
            })?;
            let port = service.port(tenant);
            if port == 0 {
                return Err(GatewayError::RouteNotFound(format!(
                    "{path} (tenant {} has no {:?} port)",
                    tenant.id, service
                )));
            }
            return Ok(ResolvedTarget {
                base_url: format!("{}:{}", tenant.host, port),
                trimmed_path: trimmed.to_string(),
            });
        }

        self.static_routes
            .iter()
            .find_map(|(prefix, base)| {
                path.strip_prefix(prefix.as_str()).map(|trimmed| ResolvedTarget {
                    base_url: base.clone(),
                    trimmed_path: trimmed.to_string(),
                })
            })
            .ok_or_else(|| GatewayError::RouteNotFound(path.to_string()))
    }

    /// Metric label for `path`: the tenant-scoped or static prefix it falls
    /// under, or `"unrouted"`. Always one of a fixed set of values.
    pub fn route_label(&self, path: &str) -> &str {
        if let Some(service) = TenantService::ALL
            .into_iter()
            .find(|s| path.starts_with(s.prefix()))
        {
            return service.prefix();
        }
        self.static_routes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(prefix, _)| prefix.as_str())
            .unwrap_or(UNROUTED_LABEL)
    }

    /// Every static service whose prefix occurs anywhere in `path`, for the
    /// fan-out forwarder. A prefix found mid-path leaves the path untouched.
    pub fn fanout_candidates(&self, path: &str) -> Vec<ResolvedTarget> {
        self.static_routes
            .iter()
            .filter(|(prefix, _)| path.contains(prefix.as_str()))
            .map(|(prefix, base)| ResolvedTarget {
                base_url: base.clone(),
                trimmed_path: path.strip_prefix(prefix.as_str()).unwrap_or(path).to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> Tenant {
        Tenant {
            id: 1,
            company_guid: "c1".into(),
            company_name: "Acme".into(),
            host: "10.0.0.5".into(),
            bmrm_port: 9001,
            biz_port: 9002,
            tally_port: 9003,
            created_at: None,
            updated_at: None,
        }
    }

    fn table() -> RoutingTable {
        let mut services = BTreeMap::new();
        services.insert("/api/portal".to_string(), "http://portal.internal".to_string());
        RoutingTable::new(&services)
    }

    #[test]
    fn test_tenant_scoped_routes() {
        let table = table();
        let tenant = tenant();

        let target = table.resolve(Some(&tenant), "/api/bmrm/orders").unwrap();
        assert_eq!(target.to_string(), "10.0.0.5:9001/orders");
        assert_eq!(target.trimmed_path, "/orders");

        let target = table.resolve(Some(&tenant), "/api/biz/invoices/3").unwrap();
        assert_eq!(target.base_url, "10.0.0.5:9002");

        let target = table.resolve(Some(&tenant), "/api/tally/sync").unwrap();
        assert_eq!(target.base_url, "10.0.0.5:9003");
        assert_eq!(target.trimmed_path, "/sync");
    }

    #[test]
    fn test_portal_route_ignores_tenant() {
        let table = table();
        let with = table.resolve(Some(&tenant()), "/api/portal/health").unwrap();
        let without = table.resolve(None, "/api/portal/health").unwrap();
        assert_eq!(with, without);
        assert_eq!(with.to_string(), "http://portal.internal/health");
    }

    #[test]
    fn test_tenant_route_without_tenant_is_not_found() {
        let err = table().resolve(None, "/api/bmrm/orders").unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound(_)));
    }

    #[test]
    fn test_tenant_route_never_falls_back_to_static_table() {
        let mut services = BTreeMap::new();
        services.insert("/api/bmrm".to_string(), "http://shared-bmrm.internal".to_string());
        let table = RoutingTable::new(&services);
        assert!(table.resolve(None, "/api/bmrm/orders").is_err());
    }

    #[test]
    fn test_unassigned_port_is_not_found() {
        let mut tenant = tenant();
        tenant.tally_port = 0;
        assert!(table().resolve(Some(&tenant), "/api/tally/sync").is_err());
    }

    #[test]
    fn test_unknown_prefix_is_not_found() {
        let err = table().resolve(Some(&tenant()), "/api/unknown/x").unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound(_)));
    }

    #[test]
    fn test_prefix_removed_verbatim() {
        let table = table();
        assert_eq!(table.resolve(None, "/api/portal").unwrap().trimmed_path, "");
        assert_eq!(
            table.resolve(Some(&tenant()), "/api/bmrmx").unwrap().trimmed_path,
            "x"
        );
    }

    #[test]
    fn test_longest_static_prefix_wins() {
        let mut services = BTreeMap::new();
        services.insert("/api/portal".to_string(), "http://portal.internal".to_string());
        services.insert("/api/portal/v2".to_string(), "http://portal-v2.internal".to_string());
        let table = RoutingTable::new(&services);

        let target = table.resolve(None, "/api/portal/v2/users").unwrap();
        assert_eq!(target.to_string(), "http://portal-v2.internal/users");

        let target = table.resolve(None, "/api/portal/users").unwrap();
        assert_eq!(target.to_string(), "http://portal.internal/users");
    }

    #[test]
    fn test_outbound_url() {
        let target = ResolvedTarget {
            base_url: "10.0.0.5:9001".into(),
            trimmed_path: "/orders".into(),
        };
        assert_eq!(target.outbound_url(None), "http://10.0.0.5:9001/orders");
        assert_eq!(
            target.outbound_url(Some("page=2")),
            "http://10.0.0.5:9001/orders?page=2"
        );
        assert_eq!(target.outbound_url(Some("")), "http://10.0.0.5:9001/orders");

        let target = ResolvedTarget {
            base_url: "https://tenant.example.com:8443".into(),
            trimmed_path: "/a".into(),
        };
        assert_eq!(target.outbound_url(None), "https://tenant.example.com:8443/a");
    }

    #[test]
    fn test_route_label_is_bounded() {
        let table = table();
        assert_eq!(table.route_label("/api/bmrm/orders"), "/api/bmrm");
        assert_eq!(table.route_label("/api/portal/health"), "/api/portal");
        assert_eq!(table.route_label("/junk1/x1"), UNROUTED_LABEL);
        assert_eq!(table.route_label("/api/unknown/x"), UNROUTED_LABEL);
        assert_eq!(table.route_label(""), UNROUTED_LABEL);
    }

    #[test]
    fn test_fanout_candidates_use_substring_match() {
        let mut services = BTreeMap::new();
        services.insert("/api/portal".to_string(), "http://a.internal".to_string());
        services.insert("/portal".to_string(), "http://b.internal".to_string());
        services.insert("/api/other".to_string(), "http://c.internal".to_string());
        let table = RoutingTable::new(&services);

        let mut urls: Vec<String> = table
            .fanout_candidates("/api/portal/users")
            .iter()
            .map(ToString::to_string)
            .collect();
        urls.sort();
        assert_eq!(
            urls,
            vec![
                "http://a.internal/users".to_string(),
                "http://b.internal/api/portal/users".to_string(),
            ]
        );
        assert!(table.fanout_candidates("/nothing").is_empty());
    }
}
