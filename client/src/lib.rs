//! Client library for the ONE MEDI hosted backend
//!
//! `RestBackend` implements the `RemoteBackend` contract over the REST API
//! and opens change feeds over a long-lived NDJSON stream that reconnects on
//! its own.

pub mod error;
pub mod feed;
pub mod rest;

pub use error::TransportError;
pub use feed::FeedListener;
pub use rest::RestBackend;
