use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Column order of the products file. Admin-uploaded files are expected to
/// carry exactly these columns.
pub const PRODUCT_HEADER: &[&str] = &[
    "sku",
    "title",
    "price",
    "old_price",
    "category",
    "volume_ml",
    "color",
    "stock",
    "is_active",
    "description",
];

/// Column order of the orders ledger.
pub const ORDER_HEADER: &[&str] = &[
    "order_id",
    "created_at",
    "name_enc",
    "phone_enc",
    "city",
    "address_enc",
    "items",
    "total",
    "comment_enc",
    "status",
];

/// Timestamp layout of `created_at`.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A typed record that maps to one CSV row.
///
/// `serialize_row` must emit fields in exactly the order of `HEADER`;
/// `parse_row` looks fields up by header name and returns `None` when the row
/// lacks its identity and has to be skipped.
pub trait CsvRecord: Sized {
    const HEADER: &'static [&'static str];

    fn parse_row(row: &RawRow<'_>) -> Option<Self>;

    fn serialize_row(&self) -> Vec<String>;
}

/// Header-name to position lookup for one file.
#[derive(Debug, Clone, Default)]
pub struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    pub fn from_headers(headers: &StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim_start_matches('\u{feff}').trim().to_string(), i))
            .collect();
        Self { index }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

/// One raw CSV row viewed through its file's [`Columns`].
pub struct RawRow<'a> {
    columns: &'a Columns,
    record: &'a StringRecord,
}

impl<'a> RawRow<'a> {
    pub fn new(columns: &'a Columns, record: &'a StringRecord) -> Self {
        Self { columns, record }
    }

    /// Trimmed value of the named column, or `""` when the column or the cell
    /// is missing.
    pub fn get(&self, name: &str) -> &'a str {
        self.columns
            .index
            .get(name)
            .and_then(|&i| self.record.get(i))
            .map(str::trim)
            .unwrap_or("")
    }
}

/// Outcome of decoding a whole file.
#[derive(Debug)]
pub struct Decoded<R> {
    pub columns: Columns,
    pub records: Vec<R>,
    pub skipped: usize,
}

/// Parses every row of `bytes`. Rows the CSV reader rejects and rows without
/// an identity are logged and skipped; they never abort the rest of the load.
pub fn decode<R: CsvRecord>(bytes: &[u8]) -> Result<Decoded<R>> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(bytes);
    let columns = Columns::from_headers(reader.headers()?);

    let mut records = Vec::new();
    let mut skipped = 0;
    for (i, result) in reader.records().enumerate() {
        let line = i + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping unreadable row at line {}: {}", line, e);
                skipped += 1;
                continue;
            }
        };
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        match R::parse_row(&RawRow::new(&columns, &record)) {
            Some(r) => records.push(r),
            None => {
                warn!("Skipping row at line {}: missing {}", line, R::HEADER[0]);
                skipped += 1;
            }
        }
    }

    Ok(Decoded { columns, records, skipped })
}

/// Serializes the header followed by every record.
pub fn encode<R: CsvRecord>(records: &[R]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(R::HEADER)?;
    for record in records {
        writer.write_record(record.serialize_row())?;
    }
    writer.into_inner().map_err(|e| Error::Internal(e.to_string()))
}

/// Serializes a single record as one line, without a header.
pub fn encode_row<R: CsvRecord>(record: &R) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(record.serialize_row())?;
    writer.into_inner().map_err(|e| Error::Internal(e.to_string()))
}

/// Encodes just the header line of `R`.
pub fn encode_header<R: CsvRecord>() -> Result<Vec<u8>> {
    encode::<R>(&[])
}

/// Accepts `1`, `true` and `yes` in any case; everything else is false.
pub fn parse_flag(raw: &str) -> bool {
    let raw = raw.trim();
    ["1", "true", "yes"].iter().any(|t| raw.eq_ignore_ascii_case(t))
}

fn parse_money(raw: &str) -> Decimal {
    parse_optional_money(raw).unwrap_or(Decimal::ZERO)
}

fn parse_optional_money(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim())
        .ok()
        .filter(|d| !d.is_sign_negative())
}

fn parse_count(raw: &str) -> u32 {
    parse_optional_count(raw).unwrap_or(0)
}

fn parse_optional_count(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

fn optional_to_field<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub title: String,
    pub price: Decimal,
    pub old_price: Option<Decimal>,
    pub category: String,
    pub volume_ml: Option<u32>,
    pub color: String,
    /// Informational only; listings never check availability against it.
    pub stock: u32,
    pub is_active: bool,
    pub description: String,
    /// Filled at read time from the image directory, never stored.
    #[serde(default, skip_deserializing)]
    pub images: Vec<String>,
}

impl Product {
    /// Trims the free-text fields the same way parsing trims cells, so a
    /// product reads back from the file exactly as it was written.
    pub fn trim_text(&mut self) {
        for field in [
            &mut self.title,
            &mut self.category,
            &mut self.color,
            &mut self.description,
        ] {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
    }
}

impl CsvRecord for Product {
    const HEADER: &'static [&'static str] = PRODUCT_HEADER;

    fn parse_row(row: &RawRow<'_>) -> Option<Self> {
        let sku = row.get("sku");
        if sku.is_empty() {
            return None;
        }
        Some(Product {
            sku: sku.to_string(),
            title: row.get("title").to_string(),
            price: parse_money(row.get("price")),
            old_price: parse_optional_money(row.get("old_price")),
            category: row.get("category").to_string(),
            volume_ml: parse_optional_count(row.get("volume_ml")),
            color: row.get("color").to_string(),
            stock: parse_count(row.get("stock")),
            is_active: parse_flag(row.get("is_active")),
            description: row.get("description").to_string(),
            images: Vec::new(),
        })
    }

    fn serialize_row(&self) -> Vec<String> {
        vec![
            self.sku.clone(),
            self.title.clone(),
            self.price.to_string(),
            optional_to_field(&self.old_price),
            self.category.clone(),
            optional_to_field(&self.volume_ml),
            self.color.clone(),
            self.stock.to_string(),
            if self.is_active { "1" } else { "0" }.to_string(),
            self.description.clone(),
        ]
    }
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    New,
    InProgress,
    Shipped,
    Done,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::New,
        OrderStatus::InProgress,
        OrderStatus::Shipped,
        OrderStatus::Done,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Done => "done",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::invalid(format!("unknown order status '{}'", s)))
    }
}

/// One `SKU:qty` pair of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
}

/// Parses the `|`-delimited `SKU:qty` list. Pairs without a SKU are dropped;
/// an unreadable quantity becomes 0.
pub fn parse_items(raw: &str) -> Vec<LineItem> {
    raw.split('|')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (sku, qty) = pair.rsplit_once(':').unwrap_or((pair, ""));
            let sku = sku.trim();
            if sku.is_empty() {
                return None;
            }
            Some(LineItem {
                sku: sku.to_string(),
                quantity: parse_count(qty),
            })
        })
        .collect()
}

pub fn format_items(items: &[LineItem]) -> String {
    items
        .iter()
        .map(|item| format!("{}:{}", item.sku, item.quantity))
        .collect::<Vec<_>>()
        .join("|")
}

/// An order exactly as it is stored in the ledger: customer details are
/// cipher tokens (or plaintext when encryption is disabled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: u64,
    /// Kept verbatim so that rows with an unreadable timestamp survive rewrites.
    pub created_at: String,
    pub name_enc: String,
    pub phone_enc: String,
    pub city: String,
    pub address_enc: String,
    pub items: Vec<LineItem>,
    /// Snapshot taken at checkout; never recomputed.
    pub total: Decimal,
    pub comment_enc: String,
    pub status: OrderStatus,
}

impl OrderRecord {
    pub fn created_at_time(&self) -> Option<NaiveDateTime> {
        parse_created_at(&self.created_at)
    }
}

pub fn parse_created_at(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

impl CsvRecord for OrderRecord {
    const HEADER: &'static [&'static str] = ORDER_HEADER;

    fn parse_row(row: &RawRow<'_>) -> Option<Self> {
        let order_id = row.get("order_id").parse().ok()?;
        let raw_status = row.get("status");
        let status = if raw_status.is_empty() {
            OrderStatus::New
        } else {
            raw_status.parse().unwrap_or_else(|_| {
                warn!("Order {} has unknown status '{}', reading it as new", order_id, raw_status);
                OrderStatus::New
            })
        };
        Some(OrderRecord {
            order_id,
            created_at: row.get("created_at").to_string(),
            name_enc: row.get("name_enc").to_string(),
            phone_enc: row.get("phone_enc").to_string(),
            city: row.get("city").to_string(),
            address_enc: row.get("address_enc").to_string(),
            items: parse_items(row.get("items")),
            total: parse_money(row.get("total")),
            comment_enc: row.get("comment_enc").to_string(),
            status,
        })
    }

    fn serialize_row(&self) -> Vec<String> {
        vec![
            self.order_id.to_string(),
            self.created_at.clone(),
            self.name_enc.clone(),
            self.phone_enc.clone(),
            self.city.clone(),
            self.address_enc.clone(),
            format_items(&self.items),
            self.total.to_string(),
            self.comment_enc.clone(),
            self.status.to_string(),
        ]
    }
}
