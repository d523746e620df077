//! Cart service
//!
//! Cart lines are scoped to the signed-in user. Adding an item that is
//! already in the cart (same type, item and vendor) increases the existing
//! line; every quantity change rewrites `total_price` alongside it.

use std::sync::Arc;

use log::{debug, info};
use onemedi_core::models::{quantity_update, CartLine, NewCartItem};
use onemedi_core::{
    Direction, IdentityProvider, QueryDescriptor, RemoteError, RemoteResult, RowId, SharedBackend, TableClient,
    TableRecord, TypedTable,
};

/// Totals over a cart
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartSummary {
    /// Number of lines
    pub line_count: usize,
    /// Sum of quantities
    pub item_count: u32,
    /// Sum of line totals, rounded to paise
    pub subtotal: f64,
    /// Whether any line needs a prescription
    pub requires_prescription: bool,
}

impl CartSummary {
    /// Summarise a set of lines
    pub fn from_lines(lines: &[CartLine]) -> Self {
        let subtotal: f64 = lines.iter().map(|line| line.total_price).sum();
        CartSummary {
            line_count: lines.len(),
            item_count: lines.iter().map(|line| line.quantity).sum(),
            subtotal: (subtotal * 100.0).round() / 100.0,
            requires_prescription: lines.iter().any(|line| line.requires_prescription),
        }
    }
}

/// Cart operations for the signed-in user
#[derive(Clone)]
pub struct CartService {
    carts: TypedTable<CartLine>,
    identity: Arc<dyn IdentityProvider>,
}

impl CartService {
    /// Cart service over `backend`
    pub fn new(backend: SharedBackend, identity: Arc<dyn IdentityProvider>) -> Self {
        CartService {
            carts: TableClient::typed::<CartLine>(backend),
            identity,
        }
    }

    fn user_lines(&self, user_id: &str) -> QueryDescriptor {
        self.carts
            .query()
            .filter_eq("user_id", user_id)
            .order_by("created_at", Direction::Asc)
    }

    /// Descriptor selecting the signed-in user's cart, for query and live handles
    pub fn descriptor(&self) -> RemoteResult<QueryDescriptor> {
        let user_id = self.identity.require_user()?;
        Ok(self.user_lines(&user_id))
    }

    /// Lines in the signed-in user's cart
    pub async fn lines(&self) -> RemoteResult<Vec<CartLine>> {
        let user_id = self.identity.require_user()?;
        self.carts.get_all(&self.user_lines(&user_id)).await
    }

    /// Put an item in the cart, merging with an existing line for the same item
    pub async fn add_item(&self, item: NewCartItem) -> RemoteResult<CartLine> {
        let user_id = self.identity.require_user()?;
        item.validate()?;

        let query = self
            .user_lines(&user_id)
            .filter_eq("item_type", item.item_type.as_str())
            .filter_eq("item_id", item.item_id.as_str());
        let existing = self
            .carts
            .get_all(&query)
            .await?
            .into_iter()
            .find(|line| line.is_same_item(item.item_type, &item.item_id, item.vendor_id.as_deref()));

        match existing {
            Some(line) => {
                let quantity = line
                    .quantity
                    .checked_add(item.quantity)
                    .ok_or_else(|| RemoteError::Validation("quantity too large".to_string()))?;
                debug!("Merging {} into cart line {} (quantity {})", item.item_id, line.id, quantity);
                self.carts
                    .update(&line.id, quantity_update(quantity, line.unit_price))
                    .await
            }
            None => {
                let line = self.carts.create(item.into_fields(&user_id)).await?;
                info!("Added {} to the cart of {}", line.item_id, user_id);
                Ok(line)
            }
        }
    }

    /// Set a line's quantity; zero removes the line and yields `None`
    pub async fn update_quantity(&self, id: &RowId, quantity: u32) -> RemoteResult<Option<CartLine>> {
        let line = self.owned_line(id).await?;
        if quantity == 0 {
            self.carts.delete(id).await?;
            return Ok(None);
        }
        let line = self
            .carts
            .update(id, quantity_update(quantity, line.unit_price))
            .await?;
        Ok(Some(line))
    }

    /// Remove a line
    pub async fn remove(&self, id: &RowId) -> RemoteResult<()> {
        self.owned_line(id).await?;
        self.carts.delete(id).await
    }

    /// Remove every line; returns how many were removed
    pub async fn clear(&self) -> RemoteResult<usize> {
        let lines = self.lines().await?;
        for line in &lines {
            self.carts.delete(&line.id).await?;
        }
        info!("Cleared {} cart lines", lines.len());
        Ok(lines.len())
    }

    /// Totals over the signed-in user's cart
    pub async fn summary(&self) -> RemoteResult<CartSummary> {
        Ok(CartSummary::from_lines(&self.lines().await?))
    }

    // Lines of other users are reported as missing.
    async fn owned_line(&self, id: &RowId) -> RemoteResult<CartLine> {
        let user_id = self.identity.require_user()?;
        match self.carts.get(id).await? {
            Some(line) if line.user_id == user_id => Ok(line),
            _ => Err(RemoteError::not_found(CartLine::TABLE, id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onemedi_core::identity::FixedIdentity;
    use onemedi_core::models::ItemType;
    use onemedi_core::MemoryBackend;
    use rstest::rstest;

    fn cart(backend: &Arc<MemoryBackend>, user: &str) -> CartService {
        CartService::new(backend.clone(), Arc::new(FixedIdentity::user(user)))
    }

    fn assert_totals(lines: &[CartLine]) {
        for line in lines {
            assert_eq!(line.total_price, line.expected_total(), "line {}", line.id);
        }
    }

    #[tokio::test]
    async fn test_adding_same_item_merges_lines() {
        let backend = Arc::new(MemoryBackend::new());
        let cart = cart(&backend, "u-1");

        let first = cart.add_item(NewCartItem::medicine("med-1", 45.0)).await.unwrap();
        assert_eq!(first.quantity, 1);
        assert_eq!(first.total_price, 45.0);

        let merged = cart
            .add_item(NewCartItem::medicine("med-1", 45.0).with_quantity(2))
            .await
            .unwrap();
        assert_eq!(merged.id, first.id);
        assert_eq!(merged.quantity, 3);
        assert_eq!(merged.total_price, 135.0);

        let lines = cart.lines().await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_totals(&lines);
    }

    #[tokio::test]
    async fn test_vendor_and_type_keep_lines_apart() {
        let backend = Arc::new(MemoryBackend::new());
        let cart = cart(&backend, "u-1");

        cart.add_item(NewCartItem::medicine("med-1", 45.0)).await.unwrap();
        cart.add_item(NewCartItem::medicine("med-1", 47.0).with_vendor("pharmacy-2"))
            .await
            .unwrap();
        let mut lab = NewCartItem::medicine("med-1", 300.0);
        lab.item_type = ItemType::LabTest;
        cart.add_item(lab).await.unwrap();

        assert_eq!(cart.lines().await.unwrap().len(), 3);
    }

    #[rstest]
    #[case(5, 45.0, 225.0)]
    #[case(2, 19.99, 39.98)]
    #[case(10, 0.0, 0.0)]
    #[tokio::test]
    async fn test_quantity_change_recomputes_total(#[case] quantity: u32, #[case] price: f64, #[case] total: f64) {
        let backend = Arc::new(MemoryBackend::new());
        let cart = cart(&backend, "u-1");
        let line = cart.add_item(NewCartItem::medicine("med-1", price)).await.unwrap();

        let updated = cart.update_quantity(&line.id, quantity).await.unwrap().unwrap();
        assert_eq!(updated.quantity, quantity);
        assert_eq!(updated.total_price, total);
        assert_totals(&cart.lines().await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_quantity_removes_line() {
        let backend = Arc::new(MemoryBackend::new());
        let cart = cart(&backend, "u-1");
        let line = cart.add_item(NewCartItem::medicine("med-1", 45.0)).await.unwrap();

        assert!(cart.update_quantity(&line.id, 0).await.unwrap().is_none());
        assert!(cart.lines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_carts_are_scoped_to_the_user() {
        let backend = Arc::new(MemoryBackend::new());
        let alice = cart(&backend, "u-1");
        let bob = cart(&backend, "u-2");

        let line = alice.add_item(NewCartItem::medicine("med-1", 45.0)).await.unwrap();
        bob.add_item(NewCartItem::medicine("med-1", 45.0)).await.unwrap();

        assert_eq!(alice.lines().await.unwrap().len(), 1);
        assert!(matches!(
            bob.update_quantity(&line.id, 4).await,
            Err(RemoteError::NotFound { .. })
        ));
        assert!(matches!(bob.remove(&line.id).await, Err(RemoteError::NotFound { .. })));
        assert_eq!(alice.lines().await.unwrap()[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_numeric_looking_user_ids_keep_separate_carts() {
        let backend = Arc::new(MemoryBackend::new());
        let padded = cart(&backend, "01");
        let plain = cart(&backend, "1");

        padded.add_item(NewCartItem::medicine("med-1", 45.0)).await.unwrap();
        plain.add_item(NewCartItem::medicine("med-2", 20.0)).await.unwrap();

        assert_eq!(plain.lines().await.unwrap().len(), 1);
        assert_eq!(plain.clear().await.unwrap(), 1);
        let remaining = padded.lines().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].item_id, "med-1");
    }

    #[tokio::test]
    async fn test_merge_past_the_quantity_limit_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let cart = cart(&backend, "u-1");
        let line = cart
            .add_item(NewCartItem::medicine("med-1", 1.0).with_quantity(u32::MAX))
            .await
            .unwrap();

        let err = cart.add_item(NewCartItem::medicine("med-1", 1.0)).await.unwrap_err();
        assert_eq!(err, RemoteError::Validation("quantity too large".to_string()));
        assert_eq!(cart.lines().await.unwrap()[0].quantity, line.quantity);
    }

    #[tokio::test]
    async fn test_signed_out_user_cannot_use_cart() {
        let backend = Arc::new(MemoryBackend::new());
        let cart = CartService::new(backend.clone(), Arc::new(FixedIdentity::anonymous()));

        assert_eq!(cart.lines().await.unwrap_err(), RemoteError::Unauthenticated);
        assert_eq!(
            cart.add_item(NewCartItem::medicine("med-1", 45.0)).await.unwrap_err(),
            RemoteError::Unauthenticated
        );
        assert!(backend.rows("cart_items").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_item_is_rejected_before_the_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let cart = cart(&backend, "u-1");
        let err = cart
            .add_item(NewCartItem::medicine("med-1", 45.0).with_quantity(0))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Validation(_)));
        assert!(backend.rows("cart_items").is_empty());
    }

    #[tokio::test]
    async fn test_summary_and_clear() {
        let backend = Arc::new(MemoryBackend::new());
        let cart = cart(&backend, "u-1");
        cart.add_item(NewCartItem::medicine("med-1", 45.0).with_quantity(2)).await.unwrap();
        cart.add_item(NewCartItem::medicine("med-2", 120.5).prescription_required())
            .await
            .unwrap();

        let summary = cart.summary().await.unwrap();
        assert_eq!(
            summary,
            CartSummary {
                line_count: 2,
                item_count: 3,
                subtotal: 210.5,
                requires_prescription: true,
            }
        );

        assert_eq!(cart.clear().await.unwrap(), 2);
        assert_eq!(cart.summary().await.unwrap(), CartSummary::default());
    }
}
