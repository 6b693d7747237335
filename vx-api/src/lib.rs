//! Vector API - HTTP client for the Matrix home-server pusher endpoints.
//!
//! One [`ApiClient`] talks to one home server on behalf of one session. The
//! [`PusherApi`] trait is the seam the registration coordinator drives, so
//! tests can swap in scripted sessions.

pub mod client;
pub mod endpoints;
pub mod response;

// Re-export key types
pub use client::{ApiClient, RetryConfig};
pub use endpoints::pushers::{push_tag, HttpPusher, Pusher, PusherApi, PusherData};
pub use response::MatrixError;
