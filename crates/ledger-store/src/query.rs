use chrono::{DateTime, Utc};

use crate::{LocationId, MovementKind, ProductId};

/// Filter for listing ledger records. Empty filters match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StockQuery {
    pub product_id: Option<ProductId>,
    pub location_id: Option<LocationId>,
}

impl StockQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn product_id(mut self, id: ProductId) -> Self {
        self.product_id = Some(id);
        self
    }

    pub fn location_id(mut self, id: LocationId) -> Self {
        self.location_id = Some(id);
        self
    }

    /// Returns true if a record with this identity passes the filter.
    pub fn matches(&self, product_id: ProductId, location_id: LocationId) -> bool {
        self.product_id.is_none_or(|id| id == product_id)
            && self.location_id.is_none_or(|id| id == location_id)
    }
}

/// Builder for movement journal queries.
///
/// Results are returned newest first.
#[derive(Debug, Clone, Default)]
pub struct MovementQuery {
    pub product_id: Option<ProductId>,

    /// Matches entries whose source or destination is this location.
    pub location_id: Option<LocationId>,

    pub kind: Option<MovementKind>,

    /// Entries created at or after this instant.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Entries created at or before this instant.
    pub to_timestamp: Option<DateTime<Utc>>,

    pub limit: Option<usize>,

    pub offset: Option<usize>,
}

impl MovementQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    pub fn product_id(mut self, id: ProductId) -> Self {
        self.product_id = Some(id);
        self
    }

    pub fn location_id(mut self, id: LocationId) -> Self {
        self.location_id = Some(id);
        self
    }

    pub fn kind(mut self, kind: MovementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stock_query_matches_everything() {
        let query = StockQuery::new();
        assert!(query.matches(ProductId::new(), LocationId::new()));
    }

    #[test]
    fn stock_query_filters_on_both_ids() {
        let product = ProductId::new();
        let location = LocationId::new();
        let query = StockQuery::new().product_id(product).location_id(location);

        assert!(query.matches(product, location));
        assert!(!query.matches(product, LocationId::new()));
        assert!(!query.matches(ProductId::new(), location));
    }

    #[test]
    fn movement_query_builder_chain() {
        let product = ProductId::new();
        let location = LocationId::new();
        let query = MovementQuery::for_product(product)
            .location_id(location)
            .kind(MovementKind::Transfer)
            .limit(50)
            .offset(10);

        assert_eq!(query.product_id, Some(product));
        assert_eq!(query.location_id, Some(location));
        assert_eq!(query.kind, Some(MovementKind::Transfer));
        assert_eq!(query.limit, Some(50));
        assert_eq!(query.offset, Some(10));
    }
}
