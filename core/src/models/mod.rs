//! Data models for the ONE MEDI tables
//!
//! `Row` is the untyped shape shared by every table. The typed records here
//! are the tables the data layer itself reasons about; screens that only
//! display data can stay on `Row`.

mod cart;
mod catalog;
mod event;
mod order;
mod role;
mod row;

pub use cart::{line_total, quantity_update, CartLine, ItemType, NewCartItem};
pub use catalog::Medicine;
pub use event::{Change, ChangeEvent};
pub use order::{Order, OrderStatus};
pub use role::{UserRole, ADMIN_ROLE};
pub use row::{require_non_empty, to_fields, Record, Row, RowId, TableRecord, ID_FIELD};

/// Table names used by the data layer
pub mod tables {
    /// Cart lines
    pub const CART_ITEMS: &str = "cart_items";

    /// Orders
    pub const ORDERS: &str = "orders";

    /// Medicines catalog
    pub const MEDICINES: &str = "medicines";

    /// Role assignments
    pub const USER_ROLES: &str = "user_roles";
}
