//! Multi-tenant API gateway.
//!
//! Every request runs through a [`pipeline::Pipeline`]: optional envelope
//! decryption, token validation against the tenant service, path-prefix
//! routing, and finally forwarding to one backend or a fan-out race across
//! several.

pub mod cipher;
pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod proxy;
pub mod routes;
pub mod routing;
pub mod state;
pub mod tenant;

pub use error::GatewayError;
