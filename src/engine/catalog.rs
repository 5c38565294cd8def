use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::codec::{self, Product};
use crate::engine::images::ImageProbe;
use crate::engine::page::Page;
use crate::engine::persistence::Persistence;
use crate::engine::validate::{validate_product, validate_products_csv, UploadSummary};
use crate::{Error, Result};

/// Immutable view of the catalog as of the last load or mutation.
#[derive(Debug, Default)]
struct CatalogSnapshot {
    /// File order.
    products: Vec<Product>,
    index: HashMap<String, usize>,
    categories: BTreeSet<String>,
}

impl CatalogSnapshot {
    fn build(rows: Vec<Product>) -> Self {
        let mut products = Vec::with_capacity(rows.len());
        let mut index = HashMap::with_capacity(rows.len());
        let mut categories = BTreeSet::new();
        for product in rows {
            if index.contains_key(&product.sku) {
                warn!("Ignoring repeated SKU {} in catalog file", product.sku);
                continue;
            }
            if !product.category.is_empty() {
                categories.insert(product.category.clone());
            }
            index.insert(product.sku.clone(), products.len());
            products.push(product);
        }
        Self {
            products,
            index,
            categories,
        }
    }

    fn get(&self, sku: &str) -> Option<&Product> {
        self.index.get(sku).map(|&i| &self.products[i])
    }
}

/// Filters applied by [`Catalog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductFilter {
    /// Exact category name.
    pub category: Option<String>,
    /// Case-insensitive substring of title, description, SKU or color.
    pub text: Option<String>,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    /// Also list products whose `is_active` flag is off.
    pub include_inactive: bool,
}

impl ProductFilter {
    fn matches(&self, product: &Product, needle: Option<&str>) -> bool {
        if !self.include_inactive && !product.is_active {
            return false;
        }
        if let Some(category) = self.category.as_deref().filter(|c| !c.is_empty()) {
            if product.category != category {
                return false;
            }
        }
        if let Some(needle) = needle {
            let hit = [&product.title, &product.description, &product.sku, &product.color]
                .iter()
                .any(|field| field.to_lowercase().contains(needle));
            if !hit {
                return false;
            }
        }
        if self.price_min.is_some_and(|min| product.price < min) {
            return false;
        }
        if self.price_max.is_some_and(|max| product.price > max) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub products: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub total: usize,
    pub active: usize,
}

/// The product catalog: an in-memory snapshot of one CSV file.
///
/// Readers clone the current `Arc<CatalogSnapshot>` and never wait on
/// writers. Every mutation holds `write_lock`, builds the next snapshot,
/// persists it with an atomic replace and only then publishes it, so a
/// failed write leaves both the file and the cache as they were.
pub struct Catalog {
    store: Persistence,
    images: ImageProbe,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    write_lock: Mutex<()>,
}

impl Catalog {
    /// Opens the catalog and performs the first load. An unreadable file is
    /// logged and yields an empty catalog; it never fails startup.
    pub fn open(store: Persistence, images: ImageProbe) -> Self {
        let catalog = Self {
            store,
            images,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
            write_lock: Mutex::new(()),
        };
        if let Err(e) = catalog.load() {
            warn!("Could not load catalog from {:?}: {}", catalog.path(), e);
        }
        catalog
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Rebuilds the cache from the file. A missing file is an empty catalog.
    /// On error the previous snapshot stays in place.
    pub fn load(&self) -> Result<LoadReport> {
        let _guard = self.write_lock.lock();
        let report = match self.store.read()? {
            Some(bytes) => {
                let decoded = codec::decode::<Product>(&bytes)?;
                let snapshot = CatalogSnapshot::build(decoded.records);
                let report = LoadReport {
                    products: snapshot.products.len(),
                    skipped: decoded.skipped,
                };
                self.publish(snapshot);
                report
            }
            None => {
                self.publish(CatalogSnapshot::default());
                LoadReport {
                    products: 0,
                    skipped: 0,
                }
            }
        };
        info!(
            "Loaded {} products from {:?} ({} rows skipped)",
            report.products,
            self.path(),
            report.skipped
        );
        Ok(report)
    }

    /// Forces a full reload. Needed after the file was replaced out-of-band.
    pub fn invalidate(&self) -> Result<LoadReport> {
        info!("Catalog cache invalidated");
        self.load()
    }

    fn current(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().clone()
    }

    fn publish(&self, snapshot: CatalogSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    fn with_images(&self, mut product: Product) -> Product {
        product.images = self.images.find(&product.sku);
        product
    }

    pub fn get_by_sku(&self, sku: &str) -> Option<Product> {
        let snapshot = self.current();
        snapshot.get(sku.trim()).cloned().map(|p| self.with_images(p))
    }

    pub fn query(&self, filter: &ProductFilter, page: usize, page_size: usize) -> Page<Product> {
        let snapshot = self.current();
        let needle = filter
            .text
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());
        let matches: Vec<&Product> = snapshot
            .products
            .iter()
            .filter(|p| filter.matches(p, needle.as_deref()))
            .collect();
        Page::paginate(matches, page, page_size).map(|p| self.with_images(p.clone()))
    }

    /// Distinct non-empty category names, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.current().categories.iter().cloned().collect()
    }

    /// The first `limit` active products in file order.
    pub fn featured(&self, limit: usize) -> Vec<Product> {
        self.current()
            .products
            .iter()
            .filter(|p| p.is_active)
            .take(limit)
            .cloned()
            .map(|p| self.with_images(p))
            .collect()
    }

    pub fn counts(&self) -> CatalogCounts {
        let snapshot = self.current();
        CatalogCounts {
            total: snapshot.products.len(),
            active: snapshot.products.iter().filter(|p| p.is_active).count(),
        }
    }

    fn commit(&self, products: Vec<Product>) -> Result<()> {
        self.store.replace(&codec::encode(&products)?)?;
        self.publish(CatalogSnapshot::build(products));
        Ok(())
    }

    /// Adds one product. The SKU must not exist yet.
    pub fn create(&self, mut product: Product) -> Result<Product> {
        product.trim_text();
        validate_product(&product)?;
        product.images.clear();

        let _guard = self.write_lock.lock();
        let snapshot = self.current();
        if snapshot.get(&product.sku).is_some() {
            return Err(Error::invalid(format!("sku: '{}' already exists", product.sku)));
        }
        let mut products = snapshot.products.clone();
        products.push(product.clone());
        self.commit(products)?;

        info!("Product {} created", product.sku);
        Ok(self.with_images(product))
    }

    /// Replaces every attribute of an existing product. The SKU cannot change.
    pub fn update(&self, sku: &str, mut product: Product) -> Result<Product> {
        let sku = sku.trim();
        if product.sku != sku {
            return Err(Error::invalid("sku: cannot be changed"));
        }
        product.trim_text();
        validate_product(&product)?;
        product.images.clear();

        let _guard = self.write_lock.lock();
        let snapshot = self.current();
        let position = *snapshot
            .index
            .get(sku)
            .ok_or_else(|| Error::ProductNotFound(sku.to_string()))?;
        let mut products = snapshot.products.clone();
        products[position] = product.clone();
        self.commit(products)?;

        info!("Product {} updated", sku);
        Ok(self.with_images(product))
    }

    /// Removes one product and returns it. The file is backed up first.
    pub fn delete(&self, sku: &str) -> Result<Product> {
        let sku = sku.trim();
        let _guard = self.write_lock.lock();
        let snapshot = self.current();
        let position = *snapshot
            .index
            .get(sku)
            .ok_or_else(|| Error::ProductNotFound(sku.to_string()))?;
        let mut products = snapshot.products.clone();
        let removed = products.remove(position);

        self.store.backup("delete");
        self.commit(products)?;

        info!("Product {} deleted", sku);
        Ok(removed)
    }

    /// Replaces the whole catalog with an uploaded file.
    ///
    /// The upload is validated in full first; on any violation nothing is
    /// written and the cache is untouched. Otherwise the current file is
    /// backed up, the upload is written byte for byte and the cache rebuilt
    /// from it.
    pub fn replace_all(&self, content: &[u8]) -> Result<UploadSummary> {
        let summary = validate_products_csv(content)?;
        let decoded = codec::decode::<Product>(content)?;

        let _guard = self.write_lock.lock();
        self.store.backup("upload");
        self.store.replace(content)?;
        self.publish(CatalogSnapshot::build(decoded.records));

        info!("Catalog replaced by upload with {} products", summary.products);
        Ok(summary)
    }

    /// Copies the catalog file to the backup directory.
    pub fn backup(&self, label: &str) -> Option<PathBuf> {
        let _guard = self.write_lock.lock();
        self.store.backup(label)
    }
}
