use std::collections::HashSet;
use std::str::FromStr;

use csv::ReaderBuilder;
use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::codec::{parse_flag, Columns, Product, RawRow, PRODUCT_HEADER};
use crate::engine::ledger::{CartLine, CustomerDetails};
use crate::{Error, Result, Violations};

const IS_ACTIVE_TOKENS: &[&str] = &["0", "1", "", "true", "false", "True", "False"];

/// Product fields as submitted by an admin form, before any type coercion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductForm {
    pub sku: String,
    pub title: String,
    pub price: String,
    pub old_price: String,
    pub category: String,
    pub volume_ml: String,
    pub color: String,
    pub stock: String,
    pub is_active: String,
    pub description: String,
}

impl ProductForm {
    /// Converts the form into a [`Product`], reporting every invalid field at
    /// once.
    pub fn into_product(self) -> Result<Product> {
        let mut violations = Violations::new();

        let sku = self.sku.trim().to_string();
        if sku.is_empty() {
            violations.push("sku: required");
        }
        let title = self.title.trim().to_string();
        if title.is_empty() {
            violations.push("title: required");
        }

        let price = match Decimal::from_str(self.price.trim()) {
            Ok(p) if p.is_sign_negative() => {
                violations.push("price: must not be negative");
                Decimal::ZERO
            }
            Ok(p) => p,
            Err(_) => {
                violations.push(format!("price: '{}' is not a number", self.price.trim()));
                Decimal::ZERO
            }
        };
        let old_price = optional_money(&self.old_price, "old_price", &mut violations);
        let stock = if self.stock.trim().is_empty() {
            0
        } else {
            count(&self.stock, "stock", &mut violations).unwrap_or(0)
        };
        let volume_ml = if self.volume_ml.trim().is_empty() {
            None
        } else {
            count(&self.volume_ml, "volume_ml", &mut violations)
        };

        violations.into_result()?;
        Ok(Product {
            sku,
            title,
            price,
            old_price,
            category: self.category.trim().to_string(),
            volume_ml,
            color: self.color.trim().to_string(),
            stock,
            is_active: parse_flag(&self.is_active) || self.is_active.trim().eq_ignore_ascii_case("on"),
            description: self.description.trim().to_string(),
            images: Vec::new(),
        })
    }
}

impl From<&Product> for ProductForm {
    fn from(product: &Product) -> Self {
        let optional = |v: Option<String>| v.unwrap_or_default();
        Self {
            sku: product.sku.clone(),
            title: product.title.clone(),
            price: product.price.to_string(),
            old_price: optional(product.old_price.map(|p| p.to_string())),
            category: product.category.clone(),
            volume_ml: optional(product.volume_ml.map(|v| v.to_string())),
            color: product.color.clone(),
            stock: product.stock.to_string(),
            is_active: if product.is_active { "1" } else { "0" }.to_string(),
            description: product.description.clone(),
        }
    }
}

fn optional_money(raw: &str, field: &str, violations: &mut Violations) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match Decimal::from_str(raw) {
        Ok(d) if d.is_sign_negative() => {
            violations.push(format!("{}: must not be negative", field));
            None
        }
        Ok(d) => Some(d),
        Err(_) => {
            violations.push(format!("{}: '{}' is not a number", field, raw));
            None
        }
    }
}

fn count(raw: &str, field: &str, violations: &mut Violations) -> Option<u32> {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(n) if n < 0 => {
            violations.push(format!("{}: must not be negative", field));
            None
        }
        Ok(n) => match u32::try_from(n) {
            Ok(n) => Some(n),
            Err(_) => {
                violations.push(format!("{}: {} is too large", field, n));
                None
            }
        },
        Err(_) => {
            violations.push(format!("{}: '{}' is not a whole number", field, raw));
            None
        }
    }
}

/// Checks a typed product before it is written.
pub fn validate_product(product: &Product) -> Result<()> {
    let mut violations = Violations::new();
    if product.sku.trim().is_empty() {
        violations.push("sku: required");
    } else if product.sku.trim() != product.sku || product.sku.contains(['\n', '\r']) {
        violations.push("sku: must not contain surrounding whitespace or line breaks");
    }
    if product.title.trim().is_empty() {
        violations.push("title: required");
    }
    if product.price.is_sign_negative() {
        violations.push("price: must not be negative");
    }
    if product.old_price.is_some_and(|p| p.is_sign_negative()) {
        violations.push("old_price: must not be negative");
    }
    violations.into_result()
}

/// Result of a successful dry-run over an uploaded products file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub products: usize,
    pub warnings: Vec<String>,
}

/// Validates a complete products file without writing anything.
///
/// Every problem is collected with its 1-based line number (the header is
/// line 1). The upload is accepted only when there are none.
pub fn validate_products_csv(content: &[u8]) -> Result<UploadSummary> {
    let mut violations = Violations::new();
    let mut warnings = Vec::new();

    let mut reader = ReaderBuilder::new().flexible(true).from_reader(content);
    let columns = match reader.headers() {
        Ok(h) if h.iter().any(|f| !f.trim().is_empty()) => Columns::from_headers(h),
        Ok(_) => return Err(Error::invalid("file is empty or has no header")),
        Err(e) => return Err(Error::invalid(format!("file could not be parsed: {}", e))),
    };

    let missing: Vec<&str> = PRODUCT_HEADER
        .iter()
        .copied()
        .filter(|c| !columns.contains(c))
        .collect();
    if !missing.is_empty() {
        violations.push(format!("missing required columns: {}", missing.join(", ")));
    }
    if columns.contains("images") {
        let warning = "column 'images' is ignored; images are found by SKU".to_string();
        warn!("{}", warning);
        warnings.push(warning);
    }

    let mut skus = HashSet::new();
    for (i, result) in reader.records().enumerate() {
        let line = i + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                violations.push(format!("line {}: unreadable row: {}", line, e));
                continue;
            }
        };
        let row = RawRow::new(&columns, &record);

        let sku = row.get("sku");
        if sku.is_empty() {
            violations.push(format!("line {}: SKU must not be empty", line));
        } else if !skus.insert(sku.to_string()) {
            violations.push(format!("line {}: duplicate SKU '{}'", line, sku));
        }

        if row.get("title").is_empty() {
            violations.push(format!("line {}: title must not be empty", line));
        }

        let price = row.get("price");
        if price.is_empty() {
            violations.push(format!("line {}: price is required", line));
        } else {
            check_money(price, "price", line, &mut violations);
        }
        let old_price = row.get("old_price");
        if !old_price.is_empty() {
            check_money(old_price, "old price", line, &mut violations);
        }

        let stock = row.get("stock");
        if !stock.is_empty() {
            match stock.parse::<i64>() {
                Ok(n) if n < 0 => violations.push(format!("line {}: stock must not be negative", line)),
                Ok(n) if u32::try_from(n).is_err() => {
                    violations.push(format!("line {}: stock {} is too large", line, n))
                }
                Ok(_) => {}
                Err(_) => violations.push(format!("line {}: invalid stock '{}'", line, stock)),
            }
        }

        if !IS_ACTIVE_TOKENS.contains(&row.get("is_active")) {
            violations.push(format!("line {}: is_active must be 0, 1, true or false", line));
        }
    }

    if skus.is_empty() {
        violations.push("file contains no valid products");
    }

    violations.into_result()?;
    Ok(UploadSummary {
        products: skus.len(),
        warnings,
    })
}

fn check_money(raw: &str, field: &str, line: usize, violations: &mut Violations) {
    match Decimal::from_str(raw) {
        Ok(d) if d.is_sign_negative() => {
            violations.push(format!("line {}: {} must not be negative", line, field))
        }
        Ok(_) => {}
        Err(_) => violations.push(format!("line {}: invalid {} '{}'", line, field, raw)),
    }
}

fn is_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    !digits.is_empty()
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'))
}

/// Checks the customer details and cart lines of a checkout.
pub fn validate_checkout(customer: &CustomerDetails, lines: &[CartLine]) -> Result<()> {
    let mut violations = Violations::new();

    let name = customer.name.trim();
    match name.chars().count() {
        0 => violations.push("name: required"),
        1 => violations.push("name: at least 2 characters"),
        n if n > 60 => violations.push("name: at most 60 characters"),
        _ => {}
    }

    let phone = customer.phone.trim();
    if phone.is_empty() {
        violations.push("phone: required");
    } else if !is_phone(phone) {
        violations.push("phone: invalid format");
    }

    let city = customer.city.trim();
    if city.is_empty() {
        violations.push("city: required");
    } else if city.chars().count() > 100 {
        violations.push("city: at most 100 characters");
    }

    let address = customer.address.trim();
    if address.is_empty() {
        violations.push("address: required");
    } else if address.chars().count() > 200 {
        violations.push("address: at most 200 characters");
    }

    if customer.comment.trim().chars().count() > 500 {
        violations.push("comment: at most 500 characters");
    }

    if lines.is_empty() {
        violations.push("items: the order has no items");
    }
    for line in lines {
        if line.sku.trim().is_empty() {
            violations.push("items: line without SKU");
        } else if line.sku.contains(['|', ':']) {
            violations.push(format!("items: SKU '{}' contains a reserved character", line.sku));
        }
        if line.quantity == 0 {
            violations.push(format!("items: quantity of '{}' must be at least 1", line.sku));
        }
        if line.unit_price.is_sign_negative() {
            violations.push(format!("items: price of '{}' must not be negative", line.sku));
        }
    }

    violations.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    const HEADER: &str = "sku,title,price,old_price,category,volume_ml,color,stock,is_active,description\n";

    fn violations(err: Error) -> Vec<String> {
        match err {
            Error::Validation(v) => v.messages().to_vec(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_form_into_product() {
        let form = ProductForm {
            sku: " PIA-7 ".to_string(),
            title: "Bowl".to_string(),
            price: "990.50".to_string(),
            old_price: "".to_string(),
            volume_ml: "150".to_string(),
            is_active: "on".to_string(),
            ..Default::default()
        };
        let product = form.into_product().unwrap();
        assert_eq!(product.sku, "PIA-7");
        assert_eq!(product.price, Decimal::new(99050, 2));
        assert_eq!(product.old_price, None);
        assert_eq!(product.volume_ml, Some(150));
        assert_eq!(product.stock, 0);
        assert!(product.is_active);
    }

    #[test]
    fn test_form_from_product_converts_back() {
        let product = ProductForm {
            sku: "CUP-2".to_string(),
            title: "Cup".to_string(),
            price: "400.00".to_string(),
            old_price: "450".to_string(),
            stock: "7".to_string(),
            is_active: "0".to_string(),
            ..Default::default()
        }
        .into_product()
        .unwrap();

        let mut form = ProductForm::from(&product);
        assert_eq!(form.volume_ml, "");
        assert_eq!(form.is_active, "0");
        assert_eq!(form.clone().into_product().unwrap(), product);

        form.price = "380".to_string();
        assert_eq!(form.into_product().unwrap().price, Decimal::from(380));
    }

    #[test]
    fn test_form_collects_every_error() {
        let form = ProductForm {
            price: "cheap".to_string(),
            old_price: "-1".to_string(),
            stock: "-4".to_string(),
            volume_ml: "big".to_string(),
            ..Default::default()
        };
        let messages = violations(form.into_product().unwrap_err());
        assert_eq!(messages.len(), 6, "{messages:?}");
    }

    #[test]
    fn test_validate_product() {
        let mut product = ProductForm {
            sku: "A1".to_string(),
            title: "Cup".to_string(),
            price: "10".to_string(),
            ..Default::default()
        }
        .into_product()
        .unwrap();
        assert!(validate_product(&product).is_ok());

        product.price = Decimal::from(-5);
        product.title.clear();
        assert_eq!(violations(validate_product(&product).unwrap_err()).len(), 2);
    }

    #[test]
    fn test_valid_upload() {
        let csv = format!("{HEADER}A1,Cup,100,,cups,200,white,3,1,Nice\nA2,Bowl,250.5,300,bowls,,blue,,0,\n");
        let summary = validate_products_csv(csv.as_bytes()).unwrap();
        assert_eq!(summary.products, 2);
        assert!(summary.warnings.is_empty());
    }

    #[test]
    fn test_upload_reports_duplicate_with_line_number() {
        let csv = format!(
            "{HEADER}A1,Cup,100,,,,,,1,\nA2,Cup,100,,,,,,1,\nA3,Cup,100,,,,,,1,\nA1,Again,100,,,,,,1,\n"
        );
        let messages = violations(validate_products_csv(csv.as_bytes()).unwrap_err());
        assert_eq!(messages, vec!["line 5: duplicate SKU 'A1'".to_string()]);
    }

    #[test]
    fn test_upload_row_checks() {
        let csv = format!("{HEADER},,abc,-1,,,,x,maybe,\n");
        let messages = violations(validate_products_csv(csv.as_bytes()).unwrap_err());
        assert!(messages.contains(&"line 2: SKU must not be empty".to_string()));
        assert!(messages.contains(&"line 2: title must not be empty".to_string()));
        assert!(messages.contains(&"line 2: invalid price 'abc'".to_string()));
        assert!(messages.contains(&"line 2: old price must not be negative".to_string()));
        assert!(messages.contains(&"line 2: invalid stock 'x'".to_string()));
        assert!(messages.contains(&"line 2: is_active must be 0, 1, true or false".to_string()));
        assert!(messages.contains(&"file contains no valid products".to_string()));
    }

    #[test]
    fn test_upload_structure_checks() {
        let err = validate_products_csv(b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let messages = violations(validate_products_csv(b"sku,title\nA1,Cup\n").unwrap_err());
        assert!(messages[0].starts_with("missing required columns: price, old_price"));
    }

    #[test]
    fn test_upload_ignores_images_column_with_warning() {
        let csv = "sku,title,price,old_price,category,volume_ml,color,images,stock,is_active,description\nA1,Cup,1,,,,,a.jpg,,1,\n";
        let summary = validate_products_csv(csv.as_bytes()).unwrap();
        assert_eq!(summary.warnings.len(), 1);
    }

    fn customer() -> CustomerDetails {
        CustomerDetails {
            name: "Anna".to_string(),
            phone: "+7 (912) 345-67-89".to_string(),
            city: "Kazan".to_string(),
            address: "Lenina 5".to_string(),
            comment: String::new(),
        }
    }

    fn line() -> CartLine {
        CartLine {
            sku: "A1".to_string(),
            quantity: 1,
            unit_price: Decimal::from(100),
        }
    }

    #[test]
    fn test_checkout_accepts_valid_order() {
        assert!(validate_checkout(&customer(), &[line()]).is_ok());
    }

    #[test]
    fn test_checkout_rejects_bad_input() {
        let mut c = customer();
        c.name = "A".to_string();
        c.phone = "call me".to_string();
        c.city.clear();
        c.comment = "x".repeat(501);
        let mut l = line();
        l.quantity = 0;
        let messages = violations(validate_checkout(&c, &[l]).unwrap_err());
        assert_eq!(messages.len(), 5, "{messages:?}");

        let messages = violations(validate_checkout(&customer(), &[]).unwrap_err());
        assert_eq!(messages, vec!["items: the order has no items".to_string()]);
    }
}
