use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use serde::Serialize;

use crate::config::StoreConfig;
use crate::engine::codec::{LineItem, OrderStatus};
use crate::engine::{
    CartLine, Catalog, CatalogCounts, CustomerDetails, FieldCipher, ImageProbe, Ledger,
    Persistence, Plaintext, Vault,
};
use crate::{Result, Violations};

/// Summary numbers for the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShopStatus {
    pub products: CatalogCounts,
    pub orders: usize,
    pub new_orders: usize,
    pub encrypted: bool,
}

/// The catalog and the order ledger of one shop, opened together from a
/// [`StoreConfig`]. Cheap to clone; clones share the same stores.
#[derive(Clone)]
pub struct Shop {
    pub catalog: Arc<Catalog>,
    pub ledger: Arc<Ledger>,
}

impl Shop {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let cipher: Arc<dyn FieldCipher> = match &config.encryption {
            Some(enc) => Arc::new(Vault::from_secret(&enc.master_secret, &enc.salt)),
            None => Arc::new(Plaintext),
        };

        let catalog = Catalog::open(
            Persistence::new(&config.products_path).with_backup_dir(&config.backup_dir),
            ImageProbe::new(&config.image_dir),
        );
        let ledger = Ledger::open(
            Persistence::new(&config.orders_path)
                .with_backup_dir(&config.backup_dir)
                .private(),
            cipher,
        )?
        .with_retention_floor(config.retention_min_days);

        info!(
            "Shop opened: catalog {:?}, ledger {:?} (encryption {})",
            catalog.path(),
            ledger.path(),
            if ledger.encrypts() { "on" } else { "off" }
        );
        Ok(Self {
            catalog: Arc::new(catalog),
            ledger: Arc::new(ledger),
        })
    }

    /// Places an order for `items`, pricing each line from the catalog as it
    /// is right now. Unknown or inactive products reject the whole order.
    pub fn checkout(&self, customer: &CustomerDetails, items: &[LineItem]) -> Result<u64> {
        let mut violations = Violations::new();
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            match self.catalog.get_by_sku(&item.sku) {
                Some(product) if product.is_active => lines.push(CartLine {
                    sku: product.sku,
                    quantity: item.quantity,
                    unit_price: product.price,
                }),
                _ => violations.push(format!("items: product '{}' is not available", item.sku)),
            }
        }
        violations.into_result()?;
        self.ledger.create_order(customer, &lines)
    }

    /// Copies both files to the backup directory and returns the copies made.
    pub fn backup(&self, label: &str) -> Vec<PathBuf> {
        let mut copies = Vec::new();
        copies.extend(self.catalog.backup(label));
        copies.extend(self.ledger.backup(label));
        copies
    }

    pub fn status(&self) -> Result<ShopStatus> {
        Ok(ShopStatus {
            products: self.catalog.counts(),
            orders: self.ledger.count()?,
            new_orders: self.ledger.count_with_status(OrderStatus::New)?,
            encrypted: self.ledger.encrypts(),
        })
    }
}
