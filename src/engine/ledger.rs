use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Local, NaiveDateTime};
use csv::ReaderBuilder;
use log::{info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::codec::{
    self, parse_items, Columns, Decoded, LineItem, OrderRecord, OrderStatus, RawRow, CREATED_AT_FORMAT,
};
use crate::engine::mask::{mask_name, mask_phone};
use crate::engine::page::Page;
use crate::engine::persistence::Persistence;
use crate::engine::validate::validate_checkout;
use crate::engine::vault::{FieldCipher, DECRYPTION_FAILED};
use crate::{Error, Result};

/// Id given to the first order of an empty ledger.
pub const FIRST_ORDER_ID: u64 = 100_001;

/// Retention floor applied when none is configured.
pub const DEFAULT_RETENTION_MIN_DAYS: u32 = 30;

/// Customer details captured at checkout. Everything except `city` is
/// encrypted at rest.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub phone: String,
    pub city: String,
    pub address: String,
    #[serde(default)]
    pub comment: String,
}

impl fmt::Debug for CustomerDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomerDetails")
            .field("name", &"[REDACTED]")
            .field("phone", &"[REDACTED]")
            .field("city", &self.city)
            .field("address", &"[REDACTED]")
            .field("comment", &"[REDACTED]")
            .finish()
    }
}

/// One cart line at checkout, priced at the moment of purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl CartLine {
    /// `None` when the product does not fit in a `Decimal`.
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

fn order_total(lines: &[CartLine]) -> Result<Decimal> {
    lines
        .iter()
        .try_fold(Decimal::ZERO, |sum, line| line.line_total().and_then(|t| sum.checked_add(t)))
        .ok_or_else(|| Error::invalid("items: total out of range"))
}

/// Customer details as shown to an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CustomerView {
    /// Fully decrypted ("reveal" action).
    Revealed {
        name: String,
        phone: String,
        address: String,
        comment: String,
    },
    /// Decrypted, then masked for the default listing.
    Masked { name: String, phone: String },
}

/// An order prepared for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    pub order_id: u64,
    pub created_at: String,
    pub city: String,
    pub items: Vec<LineItem>,
    pub total: Decimal,
    pub status: OrderStatus,
    pub customer: CustomerView,
}

/// What [`Ledger::migrate_plaintext`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// There is no ledger file yet.
    Missing,
    /// The ledger already uses the encrypted column layout.
    AlreadyCurrent,
    Migrated { orders: usize, backup: Option<PathBuf> },
}

/// The order ledger: one CSV file, appended to at checkout and rewritten
/// whole for status changes and retention cleanup.
///
/// All mutations hold `write_lock` for their full duration, file I/O
/// included. Reads go straight to the file without the lock; the atomic
/// rename guarantees they never see a torn rewrite.
pub struct Ledger {
    store: Persistence,
    cipher: Arc<dyn FieldCipher>,
    write_lock: Mutex<()>,
    retention_min_days: u32,
}

impl Ledger {
    /// Opens the ledger, creating the file with its header if needed.
    pub fn open(store: Persistence, cipher: Arc<dyn FieldCipher>) -> Result<Self> {
        let ledger = Self {
            store,
            cipher,
            write_lock: Mutex::new(()),
            retention_min_days: DEFAULT_RETENTION_MIN_DAYS,
        };
        ledger.ensure_header()?;
        Ok(ledger)
    }

    /// Sets the minimum age, in days, that [`cleanup_older_than`](Self::cleanup_older_than) accepts.
    pub fn with_retention_floor(mut self, days: u32) -> Self {
        self.retention_min_days = days;
        self
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn encrypts(&self) -> bool {
        self.cipher.is_encrypting()
    }

    fn ensure_header(&self) -> Result<()> {
        let header = codec::encode_header::<OrderRecord>()?;
        match self.store.read()? {
            None => self.store.ensure_exists(&header),
            Some(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => self.store.replace(&header),
            Some(_) => Ok(()),
        }
    }

    fn read_decoded(&self) -> Result<Decoded<OrderRecord>> {
        match self.store.read()? {
            Some(bytes) => codec::decode::<OrderRecord>(&bytes),
            None => Ok(Decoded {
                columns: Columns::default(),
                records: Vec::new(),
                skipped: 0,
            }),
        }
    }

    fn read_all(&self) -> Result<Vec<OrderRecord>> {
        Ok(self.read_decoded()?.records)
    }

    /// Writes `records` as the whole ledger. Rows that could not be parsed
    /// are not carried over, so the file is backed up before they are lost.
    fn rewrite(&self, records: &[OrderRecord], dropped: usize) -> Result<()> {
        if dropped > 0 {
            warn!(
                "Rewriting {:?} drops {} unreadable rows; keeping a backup",
                self.path(),
                dropped
            );
            self.store.backup("unreadable");
        }
        self.store.replace(&codec::encode(records)?)
    }

    /// Next free order id: one past the largest id on disk, or
    /// [`FIRST_ORDER_ID`] when the ledger is empty or unreadable. Derived from
    /// the file every time, so ids survive restarts and are never reused.
    pub fn next_order_id(&self) -> u64 {
        match self.read_all() {
            Ok(records) => records
                .iter()
                .map(|r| r.order_id)
                .max()
                .map_or(FIRST_ORDER_ID, |max| max.max(FIRST_ORDER_ID - 1) + 1),
            Err(e) => {
                warn!("Could not scan ledger {:?} for order ids: {}", self.path(), e);
                FIRST_ORDER_ID
            }
        }
    }

    /// Records a new order and returns its id.
    ///
    /// The total is the sum of the line totals as priced now; it is never
    /// recomputed later.
    pub fn create_order(&self, customer: &CustomerDetails, lines: &[CartLine]) -> Result<u64> {
        self.create_order_at(customer, lines, Local::now().naive_local())
    }

    fn create_order_at(
        &self,
        customer: &CustomerDetails,
        lines: &[CartLine],
        created_at: NaiveDateTime,
    ) -> Result<u64> {
        validate_checkout(customer, lines)?;
        let total = order_total(lines)?;

        let _guard = self.write_lock.lock();
        self.ensure_header()?;

        let order_id = self.next_order_id();
        let record = OrderRecord {
            order_id,
            created_at: created_at.format(CREATED_AT_FORMAT).to_string(),
            name_enc: self.cipher.encrypt(customer.name.trim())?,
            phone_enc: self.cipher.encrypt(customer.phone.trim())?,
            city: customer.city.trim().to_string(),
            address_enc: self.cipher.encrypt(customer.address.trim())?,
            items: lines
                .iter()
                .map(|l| LineItem {
                    sku: l.sku.trim().to_string(),
                    quantity: l.quantity,
                })
                .collect(),
            total,
            comment_enc: self.cipher.encrypt(customer.comment.trim())?,
            status: OrderStatus::New,
        };

        self.store.append(&codec::encode_row(&record)?)?;
        info!("Order {} created ({} items)", order_id, record.items.len());
        Ok(order_id)
    }

    /// Sets the status of one order by rewriting the whole ledger.
    pub fn update_status(&self, order_id: u64, status: OrderStatus) -> Result<()> {
        let _guard = self.write_lock.lock();

        let Decoded {
            mut records,
            skipped,
            ..
        } = self.read_decoded()?;
        let record = records
            .iter_mut()
            .find(|r| r.order_id == order_id)
            .ok_or(Error::OrderNotFound(order_id))?;
        let previous = record.status;
        record.status = status;

        self.rewrite(&records, skipped)?;
        info!("Order {} status {} -> {}", order_id, previous, status);
        Ok(())
    }

    /// Orders newest first, optionally restricted to one status.
    pub fn get_paginated(
        &self,
        status: Option<OrderStatus>,
        page: usize,
        page_size: usize,
    ) -> Result<Page<OrderRecord>> {
        let mut records = self.read_all()?;
        if let Some(status) = status {
            records.retain(|r| r.status == status);
        }
        records.sort_by(|a, b| b.order_id.cmp(&a.order_id));
        Ok(Page::paginate(records, page, page_size))
    }

    /// Like [`get_paginated`](Self::get_paginated), with each order prepared
    /// for display.
    pub fn list_for_admin(
        &self,
        status: Option<OrderStatus>,
        page: usize,
        page_size: usize,
        decrypt: bool,
    ) -> Result<Page<OrderView>> {
        Ok(self
            .get_paginated(status, page, page_size)?
            .map(|r| self.present(&r, decrypt)))
    }

    pub fn get(&self, order_id: u64) -> Result<OrderRecord> {
        self.read_all()?
            .into_iter()
            .find(|r| r.order_id == order_id)
            .ok_or(Error::OrderNotFound(order_id))
    }

    /// One order with its customer details either decrypted (`decrypt`) or
    /// masked.
    pub fn get_for_admin(&self, order_id: u64, decrypt: bool) -> Result<OrderView> {
        Ok(self.present(&self.get(order_id)?, decrypt))
    }

    /// Builds the display form of a stored order. A field that fails to
    /// decrypt shows the decryption-failed marker; the other fields and the
    /// other orders are unaffected.
    pub fn present(&self, record: &OrderRecord, decrypt: bool) -> OrderView {
        let name = self.cipher.decrypt(&record.name_enc);
        let phone = self.cipher.decrypt(&record.phone_enc);
        let customer = if decrypt {
            CustomerView::Revealed {
                name,
                phone,
                address: self.cipher.decrypt(&record.address_enc),
                comment: self.cipher.decrypt(&record.comment_enc),
            }
        } else {
            CustomerView::Masked {
                name: mask_unless_failed(&name, mask_name),
                phone: mask_unless_failed(&phone, mask_phone),
            }
        };

        OrderView {
            order_id: record.order_id,
            created_at: record.created_at.clone(),
            city: record.city.clone(),
            items: record.items.clone(),
            total: record.total,
            status: record.status,
            customer,
        }
    }

    /// Deletes orders created more than `days` ago and returns how many were
    /// removed. Orders whose timestamp cannot be read are kept.
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize> {
        self.cleanup_at(days, Local::now().naive_local())
    }

    fn cleanup_at(&self, days: u32, now: NaiveDateTime) -> Result<usize> {
        if days < self.retention_min_days {
            return Err(Error::invalid(format!(
                "retention period must be at least {} days",
                self.retention_min_days
            )));
        }
        let cutoff = now - Duration::days(i64::from(days));

        let _guard = self.write_lock.lock();
        let Decoded { records, skipped, .. } = self.read_decoded()?;
        let before = records.len();
        let kept: Vec<OrderRecord> = records
            .into_iter()
            .filter(|r| r.created_at_time().map_or(true, |t| t >= cutoff))
            .collect();
        let deleted = before - kept.len();
        if deleted == 0 {
            return Ok(0);
        }

        self.store.backup("cleanup");
        self.rewrite(&kept, skipped)?;
        info!("Removed {} orders older than {} days", deleted, days);
        Ok(deleted)
    }

    /// Copies the ledger file to the backup directory.
    pub fn backup(&self, label: &str) -> Option<PathBuf> {
        let _guard = self.write_lock.lock();
        self.store.backup(label)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.read_all()?.len())
    }

    pub fn count_with_status(&self, status: OrderStatus) -> Result<usize> {
        Ok(self.read_all()?.iter().filter(|r| r.status == status).count())
    }

    /// Converts a legacy ledger that stored customer details in clear
    /// (`name`, `phone`, `address`, `comment` columns) to the encrypted
    /// layout. The old file is backed up first and replaced atomically.
    pub fn migrate_plaintext(&self) -> Result<MigrationOutcome> {
        let _guard = self.write_lock.lock();

        let Some(bytes) = self.store.read()? else {
            return Ok(MigrationOutcome::Missing);
        };
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(bytes.as_slice());
        let columns = Columns::from_headers(reader.headers()?);
        if columns.contains("name_enc") || !columns.contains("name") {
            return Ok(MigrationOutcome::AlreadyCurrent);
        }

        let mut records = Vec::new();
        for (i, result) in reader.records().enumerate() {
            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping unreadable legacy order at line {}: {}", i + 2, e);
                    continue;
                }
            };
            let row = RawRow::new(&columns, &record);
            let Ok(order_id) = row.get("order_id").parse::<u64>() else {
                warn!("Skipping legacy order without id at line {}", i + 2);
                continue;
            };
            records.push(OrderRecord {
                order_id,
                created_at: row.get("created_at").to_string(),
                name_enc: self.cipher.encrypt(row.get("name"))?,
                phone_enc: self.cipher.encrypt(row.get("phone"))?,
                city: row.get("city").to_string(),
                address_enc: self.cipher.encrypt(row.get("address"))?,
                items: parse_items(row.get("items")),
                total: row.get("total").parse().unwrap_or(Decimal::ZERO),
                comment_enc: self.cipher.encrypt(row.get("comment"))?,
                status: row.get("status").parse().unwrap_or_default(),
            });
        }

        let backup = self.store.backup("before_encryption");
        self.store.replace(&codec::encode(&records)?)?;
        info!("Migrated {} orders to the encrypted layout", records.len());
        Ok(MigrationOutcome::Migrated {
            orders: records.len(),
            backup,
        })
    }
}

fn mask_unless_failed(value: &str, mask: fn(&str) -> String) -> String {
    if value == DECRYPTION_FAILED {
        value.to_string()
    } else {
        mask(value)
    }
}
