//! Read-only product and location metadata.
//!
//! The engine only needs a product's reorder level and, for queries, a few
//! display attributes. Catalog management lives elsewhere.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{LocationId, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from a metadata lookup.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Product attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub category: Option<String>,
    pub uom: Option<String>,
    /// Quantity at or below which a low-stock alert fires.
    #[serde(default)]
    pub reorder_level: i64,
}

impl ProductInfo {
    pub fn new(id: ProductId, name: impl Into<String>, sku: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            sku: sku.into(),
            category: None,
            uom: None,
            reorder_level: 0,
        }
    }

    pub fn reorder_level(mut self, level: i64) -> Self {
        self.reorder_level = level;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn uom(mut self, uom: impl Into<String>) -> Self {
        self.uom = Some(uom.into());
        self
    }
}

/// Location attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInfo {
    pub id: LocationId,
    pub code: String,
    pub name: String,
    pub warehouse_id: Option<String>,
}

impl LocationInfo {
    pub fn new(id: LocationId, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            name: name.into(),
            warehouse_id: None,
        }
    }

    pub fn warehouse_id(mut self, warehouse_id: impl Into<String>) -> Self {
        self.warehouse_id = Some(warehouse_id.into());
        self
    }
}

/// Startup contents of an [`InMemoryDirectory`].
///
/// ```json
/// { "products": [{ "id": "…", "name": "Widget", "sku": "W-1", "reorderLevel": 5 }],
///   "locations": [{ "id": "…", "code": "A1", "name": "Aisle 1" }] }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DirectorySeed {
    pub products: Vec<ProductInfo>,
    pub locations: Vec<LocationInfo>,
}

#[async_trait]
pub trait ProductDirectory: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<ProductInfo>, DirectoryError>;

    /// Reorder level of a product; 0 when the product is unknown.
    async fn lookup_reorder_level(&self, id: ProductId) -> Result<i64, DirectoryError> {
        Ok(self.product(id).await?.map_or(0, |p| p.reorder_level))
    }
}

#[async_trait]
pub trait LocationDirectory: Send + Sync {
    async fn location(&self, id: LocationId) -> Result<Option<LocationInfo>, DirectoryError>;
}

/// In-memory directory of products and locations.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    products: Arc<RwLock<HashMap<ProductId, ProductInfo>>>,
    locations: Arc<RwLock<HashMap<LocationId, LocationInfo>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        let products = seed.products.into_iter().map(|p| (p.id, p)).collect();
        let locations = seed.locations.into_iter().map(|l| (l.id, l)).collect();
        Self {
            products: Arc::new(RwLock::new(products)),
            locations: Arc::new(RwLock::new(locations)),
            unavailable: Arc::default(),
        }
    }

    pub async fn insert_product(&self, product: ProductInfo) {
        self.products.write().await.insert(product.id, product);
    }

    pub async fn insert_location(&self, location: LocationInfo) {
        self.locations.write().await.insert(location.id, location);
    }

    /// Makes every lookup fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("directory offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductDirectory for InMemoryDirectory {
    async fn product(&self, id: ProductId) -> Result<Option<ProductInfo>, DirectoryError> {
        self.check()?;
        Ok(self.products.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl LocationDirectory for InMemoryDirectory {
    async fn location(&self, id: LocationId) -> Result<Option<LocationInfo>, DirectoryError> {
        self.check()?;
        Ok(self.locations.read().await.get(&id).cloned())
    }
}
