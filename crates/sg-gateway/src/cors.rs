//! CORS policy applied to every gateway response.

use actix_cors::Cors;
use actix_web::http::header::{self, HeaderName};

/// Any origin, the methods the backends serve, and the tenant credential
/// headers.
pub fn build_cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .send_wildcard()
        .allowed_methods(vec!["POST", "GET", "OPTIONS", "PUT", "DELETE"])
        .allowed_headers(vec![
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("priority"),
            HeaderName::from_static("companyid"),
            HeaderName::from_static("token"),
        ])
        .max_age(3600)
}
