//! Orders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::row::{require_non_empty, Record, RowId, TableRecord};
use crate::error::{RemoteError, RemoteResult};

/// Fulfilment status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed, awaiting payment or confirmation
    Pending,
    /// Confirmed by the vendor
    Confirmed,
    /// Being packed or scheduled
    Processing,
    /// Handed to delivery
    Shipped,
    /// Delivered or service completed
    Delivered,
    /// Cancelled by the user or the vendor
    Cancelled,
}

impl OrderStatus {
    /// Whether the order can no longer change
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// A placed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Row identifier
    pub id: RowId,

    /// Ordering user
    pub user_id: String,

    /// Status
    pub status: OrderStatus,

    /// Amount charged
    pub total_amount: f64,

    /// Delivery city
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    /// Delivery postal code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pincode: Option<String>,

    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for Order {
    fn id(&self) -> &RowId {
        &self.id
    }

    fn validate(&self) -> RemoteResult<()> {
        require_non_empty("user_id", &self.user_id)?;
        if self.total_amount < 0.0 {
            return Err(RemoteError::Validation(
                "total_amount must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl TableRecord for Order {
    const TABLE: &'static str = "orders";
}
