/// ONE MEDI data-access layer
///
/// This is the root crate that provides workspace-level documentation.
/// Actual implementation is in the subcrates:
/// - `onemedi-core`: rows, query descriptors, change events, the backend trait and an in-memory backend
/// - `onemedi-client`: REST and change-feed client for the hosted backend
/// - `onemedi-state`: query, mutation, optimistic and live-table handles plus the cart service
/// - `onemedi-devserver`: local development backend speaking the same wire contract

/// Returns the version of the package.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
