//! # ONE MEDI Data Core
//!
//! Core data structures for the ONE MEDI storefront data layer: rows and
//! typed records, query descriptors, change events, the `RemoteBackend`
//! contract and table-bound clients. Transport lives in `onemedi-client`;
//! reactive state lives in `onemedi-state`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod identity;
pub mod memory;
pub mod models;
pub mod query;
pub mod table;
pub mod utils;

/// Re-export common types for ease of use
pub use backend::{RemoteBackend, SharedBackend, Subscription, SubscriptionHandle};
pub use config::CoreConfig;
pub use error::{CoreError, RemoteError, RemoteResult, Result};
pub use identity::{FixedIdentity, IdentityProvider, Session, SessionData};
pub use memory::MemoryBackend;
pub use models::{Change, ChangeEvent, Record, Row, RowId, TableRecord};
pub use query::{Direction, Filter, GeoFilter, QueryDescriptor};
pub use table::{TableClient, TypedTable};

/// Version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
