//! Integration tests for the session core.
//!
//! - `harness.rs`       - mock provider, transport, navigator, and wiring
//! - `single_flight.rs` - concurrent refresh de-duplication
//! - `reconciliation.rs`- source precedence: active session, storage, forced refresh
//! - `classification.rs`- terminal vs transient refresh failures
//! - `interceptor.rs`   - 401 refresh-and-retry and bootstrap exemption
//! - `lifecycle.rs`     - startup, provider events, logout, token pre-check

mod lifecycle;
mod reconciliation;
