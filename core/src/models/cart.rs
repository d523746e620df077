//! Cart lines
//!
//! A cart line belongs to exactly one signed-in user. Its `total_price` is
//! derived data: whenever the quantity changes the total is recomputed from
//! `quantity * unit_price` rather than carried over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::row::{require_non_empty, Record, RowId, TableRecord};
use crate::error::{RemoteError, RemoteResult};

/// Category of a purchasable item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Medicine or pharmacy product
    Medicine,
    /// Lab test
    LabTest,
    /// Diagnostic scan
    Scan,
    /// Doctor consultation
    Consultation,
    /// Home-care service
    HomeCare,
    /// Insurance plan
    Insurance,
    /// Blood bank request
    BloodBank,
    /// Ambulance dispatch
    Ambulance,
}

impl ItemType {
    /// Wire name of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Medicine => "medicine",
            ItemType::LabTest => "lab_test",
            ItemType::Scan => "scan",
            ItemType::Consultation => "consultation",
            ItemType::HomeCare => "home_care",
            ItemType::Insurance => "insurance",
            ItemType::BloodBank => "blood_bank",
            ItemType::Ambulance => "ambulance",
        }
    }
}

/// Line total for a quantity and unit price, rounded to paise
pub fn line_total(quantity: u32, unit_price: f64) -> f64 {
    (f64::from(quantity) * unit_price * 100.0).round() / 100.0
}

/// One line of a user's cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    /// Row identifier
    pub id: RowId,

    /// Owning user
    pub user_id: String,

    /// Item category
    pub item_type: ItemType,

    /// Item identifier within its category table
    pub item_id: String,

    /// Fulfilling vendor (pharmacy, lab, hospital)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,

    /// Quantity, at least one
    pub quantity: u32,

    /// Price of one unit
    pub unit_price: f64,

    /// `quantity * unit_price`
    pub total_price: f64,

    /// Whether a prescription must be uploaded before checkout
    #[serde(default)]
    pub requires_prescription: bool,

    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CartLine {
    /// Whether this line is for the given item from the given vendor
    pub fn is_same_item(&self, item_type: ItemType, item_id: &str, vendor_id: Option<&str>) -> bool {
        self.item_type == item_type
            && self.item_id == item_id
            && self.vendor_id.as_deref() == vendor_id
    }

    /// Expected total for the current quantity
    pub fn expected_total(&self) -> f64 {
        line_total(self.quantity, self.unit_price)
    }
}

impl Record for CartLine {
    fn id(&self) -> &RowId {
        &self.id
    }

    fn validate(&self) -> RemoteResult<()> {
        require_non_empty("user_id", &self.user_id)?;
        require_non_empty("item_id", &self.item_id)?;
        if self.quantity < 1 {
            return Err(RemoteError::Validation("quantity must be at least 1".to_string()));
        }
        if self.unit_price < 0.0 {
            return Err(RemoteError::Validation("unit_price must not be negative".to_string()));
        }
        if (self.total_price - self.expected_total()).abs() > 0.005 {
            return Err(RemoteError::Validation(format!(
                "total_price {} does not match {} x {}",
                self.total_price, self.quantity, self.unit_price
            )));
        }
        Ok(())
    }
}

impl TableRecord for CartLine {
    const TABLE: &'static str = "cart_items";
}

/// Request to put an item in the cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCartItem {
    /// Item category
    pub item_type: ItemType,

    /// Item identifier
    pub item_id: String,

    /// Fulfilling vendor
    #[serde(default)]
    pub vendor_id: Option<String>,

    /// Quantity to add
    pub quantity: u32,

    /// Price of one unit
    pub unit_price: f64,

    /// Whether a prescription is needed
    #[serde(default)]
    pub requires_prescription: bool,
}

impl NewCartItem {
    /// A single unit of a medicine
    pub fn medicine(item_id: impl Into<String>, unit_price: f64) -> Self {
        NewCartItem {
            item_type: ItemType::Medicine,
            item_id: item_id.into(),
            vendor_id: None,
            quantity: 1,
            unit_price,
            requires_prescription: false,
        }
    }

    /// Set the quantity
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    /// Set the vendor
    pub fn with_vendor(mut self, vendor_id: impl Into<String>) -> Self {
        self.vendor_id = Some(vendor_id.into());
        self
    }

    /// Mark as prescription-only
    pub fn prescription_required(mut self) -> Self {
        self.requires_prescription = true;
        self
    }

    /// Check the request before it goes to the backend
    pub fn validate(&self) -> RemoteResult<()> {
        require_non_empty("item_id", &self.item_id)?;
        if self.quantity < 1 {
            return Err(RemoteError::Validation("quantity must be at least 1".to_string()));
        }
        if self.unit_price < 0.0 {
            return Err(RemoteError::Validation("unit_price must not be negative".to_string()));
        }
        Ok(())
    }

    /// Insert payload for the owning user
    pub fn into_fields(self, user_id: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("user_id".to_string(), Value::from(user_id));
        fields.insert("item_type".to_string(), Value::from(self.item_type.as_str()));
        fields.insert("item_id".to_string(), Value::from(self.item_id));
        if let Some(vendor_id) = self.vendor_id {
            fields.insert("vendor_id".to_string(), Value::from(vendor_id));
        }
        fields.insert("quantity".to_string(), Value::from(self.quantity));
        fields.insert("unit_price".to_string(), Value::from(self.unit_price));
        fields.insert(
            "total_price".to_string(),
            Value::from(line_total(self.quantity, self.unit_price)),
        );
        fields.insert(
            "requires_prescription".to_string(),
            Value::from(self.requires_prescription),
        );
        fields
    }
}

/// Partial update changing the quantity of a line, total included
pub fn quantity_update(quantity: u32, unit_price: f64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("quantity".to_string(), Value::from(quantity));
    fields.insert(
        "total_price".to_string(),
        Value::from(line_total(quantity, unit_price)),
    );
    fields
}
