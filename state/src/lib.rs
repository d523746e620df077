//! # ONE MEDI State
//!
//! Stateful handles over the data layer, one per interaction pattern:
//!
//! - [`QueryHandle`]: a read descriptor with rows, loading and error state
//! - [`Mutator`]: create, update and remove with callbacks and notices
//! - [`Optimistic`]: apply locally, call remote, roll back on failure
//! - [`LiveTable`]: an initial fetch kept in step with the change feed
//!
//! The handles are independent and compose at the call site. Each takes the
//! backend as a constructor argument.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cart;
pub mod live;
pub mod mutation;
pub mod notify;
pub mod optimistic;
pub mod query;
pub mod roles;

pub use cart::{CartService, CartSummary};
pub use live::{merge_event, LiveState, LiveStatus, LiveTable};
pub use mutation::{MutationOutcome, Mutator};
pub use notify::{ChannelNotifier, LogNotifier, Notice, NoticeLevel, Notifier, SharedNotifier};
pub use optimistic::Optimistic;
pub use query::{QueryHandle, QueryOptions, QueryState};
pub use roles::RoleGuard;
