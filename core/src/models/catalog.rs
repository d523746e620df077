//! Catalog entries

use serde::{Deserialize, Serialize};

use super::row::{require_non_empty, Record, RowId, TableRecord};
use crate::error::{RemoteError, RemoteResult};

/// A medicine listed in the pharmacy catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medicine {
    /// Row identifier
    pub id: RowId,

    /// Display name
    pub name: String,

    /// Manufacturer or brand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    /// Therapeutic category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// List price
    pub price: f64,

    /// Discount in percent, 0-100
    #[serde(default)]
    pub discount_percent: f64,

    /// Prescription-only
    #[serde(default)]
    pub requires_prescription: bool,

    /// Available to order
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
}

fn default_in_stock() -> bool {
    true
}

impl Medicine {
    /// Price after discount, rounded to paise
    pub fn effective_price(&self) -> f64 {
        let discounted = self.price * (100.0 - self.discount_percent) / 100.0;
        (discounted * 100.0).round() / 100.0
    }
}

impl Record for Medicine {
    fn id(&self) -> &RowId {
        &self.id
    }

    fn validate(&self) -> RemoteResult<()> {
        require_non_empty("name", &self.name)?;
        if self.price < 0.0 {
            return Err(RemoteError::Validation("price must not be negative".to_string()));
        }
        if !(0.0..=100.0).contains(&self.discount_percent) {
            return Err(RemoteError::Validation(
                "discount_percent must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }
}

impl TableRecord for Medicine {
    const TABLE: &'static str = "medicines";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;
    use serde_json::json;

    #[test]
    fn test_effective_price() {
        let row: Row = serde_json::from_value(json!({
            "id": "med-1",
            "name": "Dolo 650",
            "price": 30.0,
            "discount_percent": 15
        }))
        .unwrap();

        let medicine: Medicine = row.decode().unwrap();
        assert!(medicine.in_stock);
        assert_eq!(medicine.effective_price(), 25.5);
    }

    #[test]
    fn test_invalid_discount() {
        let row: Row = serde_json::from_value(json!({
            "id": "med-1",
            "name": "Dolo 650",
            "price": 30.0,
            "discount_percent": 120
        }))
        .unwrap();

        assert!(row.decode::<Medicine>().is_err());
    }
}
