//! Test-only crate. See `tests/gateway_invariants.rs`.
