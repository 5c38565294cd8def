use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::engine::codec::{LineItem, OrderStatus};
use crate::engine::{CustomerDetails, ProductFilter, ProductForm};
use crate::{Error, Result, Shop};

const MAX_CONNECTIONS: usize = 100;
const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_FEATURED: usize = 8;

/// Body of a `CHECKOUT` command.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub customer: CustomerDetails,
    pub items: Vec<LineItem>,
}

#[derive(Serialize)]
struct OrderRef {
    order_id: u64,
}

#[derive(Serialize)]
struct CleanupDone {
    deleted: usize,
}

/// A parsed protocol line.
#[derive(Debug)]
enum Command {
    Ping,
    Quit,
    Product(String),
    Products {
        page: usize,
        page_size: usize,
        filter: ProductFilter,
    },
    Categories,
    Featured(usize),
    Invalidate,
    AddProduct(ProductForm),
    EditProduct {
        sku: String,
        form: ProductForm,
    },
    DeleteProduct(String),
    Orders {
        page: usize,
        page_size: usize,
        status: Option<OrderStatus>,
        reveal: bool,
    },
    Order {
        order_id: u64,
        reveal: bool,
    },
    Checkout(CheckoutRequest),
    Status {
        order_id: u64,
        status: OrderStatus,
    },
    Cleanup(u32),
    Backup(String),
    Stats,
}

fn number<T: std::str::FromStr>(raw: Option<&str>, what: &str) -> Result<T> {
    let raw = raw.ok_or_else(|| Error::invalid(format!("missing {}", what)))?;
    raw.parse()
        .map_err(|_| Error::invalid(format!("{} must be a number, got '{}'", what, raw)))
}

fn page_args(parts: &[&str]) -> Result<(usize, usize)> {
    let page = match parts.first() {
        Some(p) => number(Some(*p), "page")?,
        None => 1,
    };
    let page_size = match parts.get(1) {
        Some(p) => number(Some(*p), "page size")?,
        None => DEFAULT_PAGE_SIZE,
    };
    Ok((page, page_size))
}

fn is_reveal(word: Option<&&str>) -> bool {
    word.is_some_and(|w| w.eq_ignore_ascii_case("REVEAL"))
}

/// Splits off the JSON payload that follows the command word.
fn payload(line: &str) -> &str {
    line.split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim())
        .unwrap_or("")
}

fn product_form(json: &str) -> Result<ProductForm> {
    serde_json::from_str(json).map_err(|e| Error::invalid(format!("invalid product: {}", e)))
}

fn sku_arg(args: &[&str]) -> Result<String> {
    args.first()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::invalid("missing sku"))
}

fn parse_command(line: &str) -> Result<Command> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(word) = parts.first() else {
        return Err(Error::invalid("empty command"));
    };
    let args = &parts[1..];

    let command = match word.to_uppercase().as_str() {
        "PING" => Command::Ping,
        "QUIT" => Command::Quit,
        "PRODUCT" => Command::Product(sku_arg(args)?),
        "PRODUCTS" => {
            let (page, page_size) = page_args(args)?;
            let filter = match args.get(2) {
                Some(_) => {
                    let json = args[2..].join(" ");
                    serde_json::from_str(&json)
                        .map_err(|e| Error::invalid(format!("invalid filter: {}", e)))?
                }
                None => ProductFilter::default(),
            };
            Command::Products {
                page,
                page_size,
                filter,
            }
        }
        "CATEGORIES" => Command::Categories,
        "FEATURED" => Command::Featured(match args.first() {
            Some(n) => number(Some(*n), "limit")?,
            None => DEFAULT_FEATURED,
        }),
        "INVALIDATE" => Command::Invalidate,
        "ADD" => Command::AddProduct(product_form(payload(line))?),
        "EDIT" => {
            let (sku, json) = payload(line)
                .split_once(char::is_whitespace)
                .ok_or_else(|| Error::invalid("usage: EDIT <sku> <product json>"))?;
            let mut form = product_form(json.trim())?;
            if form.sku.trim().is_empty() {
                form.sku = sku.to_string();
            }
            Command::EditProduct {
                sku: sku.to_string(),
                form,
            }
        }
        "DELETE" => Command::DeleteProduct(sku_arg(args)?),
        "ORDERS" => {
            let (page, page_size) = page_args(args)?;
            let mut status = None;
            let mut reveal = false;
            for word in args.iter().skip(2) {
                if is_reveal(Some(word)) {
                    reveal = true;
                } else if !word.eq_ignore_ascii_case("ALL") {
                    status = Some(word.parse::<OrderStatus>()?);
                }
            }
            Command::Orders {
                page,
                page_size,
                status,
                reveal,
            }
        }
        "ORDER" => Command::Order {
            order_id: number(args.first().copied(), "order id")?,
            reveal: is_reveal(args.get(1)),
        },
        "CHECKOUT" => {
            let request = serde_json::from_str(payload(line))
                .map_err(|e| Error::invalid(format!("invalid checkout: {}", e)))?;
            Command::Checkout(request)
        }
        "STATUS" => Command::Status {
            order_id: number(args.first().copied(), "order id")?,
            status: args
                .get(1)
                .ok_or_else(|| Error::invalid("missing status"))?
                .parse()?,
        },
        "CLEANUP" => Command::Cleanup(number(args.first().copied(), "days")?),
        "BACKUP" => {
            let label = args.first().copied().unwrap_or("manual");
            if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(Error::invalid("backup label may only contain letters, digits, '_' and '-'"));
            }
            Command::Backup(label.to_string())
        }
        "STATS" => Command::Stats,
        other => return Err(Error::invalid(format!("unknown command '{}'", other))),
    };
    Ok(command)
}

/// Runs a store command and renders its result as JSON. Blocking: the
/// stores do synchronous file I/O.
fn execute(shop: &Shop, command: Command) -> Result<String> {
    let json = match command {
        Command::Ping | Command::Quit => serde_json::to_string("PONG")?,
        Command::Product(sku) => {
            let product = shop
                .catalog
                .get_by_sku(&sku)
                .ok_or(Error::ProductNotFound(sku))?;
            serde_json::to_string(&product)?
        }
        Command::Products {
            page,
            page_size,
            filter,
        } => serde_json::to_string(&shop.catalog.query(&filter, page, page_size))?,
        Command::Categories => serde_json::to_string(&shop.catalog.categories())?,
        Command::Featured(limit) => serde_json::to_string(&shop.catalog.featured(limit))?,
        Command::Invalidate => serde_json::to_string(&shop.catalog.invalidate()?)?,
        Command::AddProduct(form) => serde_json::to_string(&shop.catalog.create(form.into_product()?)?)?,
        Command::EditProduct { sku, form } => {
            serde_json::to_string(&shop.catalog.update(&sku, form.into_product()?)?)?
        }
        Command::DeleteProduct(sku) => serde_json::to_string(&shop.catalog.delete(&sku)?)?,
        Command::Orders {
            page,
            page_size,
            status,
            reveal,
        } => serde_json::to_string(&shop.ledger.list_for_admin(status, page, page_size, reveal)?)?,
        Command::Order { order_id, reveal } => {
            serde_json::to_string(&shop.ledger.get_for_admin(order_id, reveal)?)?
        }
        Command::Checkout(request) => {
            let order_id = shop.checkout(&request.customer, &request.items)?;
            serde_json::to_string(&OrderRef { order_id })?
        }
        Command::Status { order_id, status } => {
            shop.ledger.update_status(order_id, status)?;
            serde_json::to_string(&OrderRef { order_id })?
        }
        Command::Cleanup(days) => {
            let deleted = shop.ledger.cleanup_older_than(days)?;
            serde_json::to_string(&CleanupDone { deleted })?
        }
        Command::Backup(label) => serde_json::to_string(&shop.backup(&label))?,
        Command::Stats => serde_json::to_string(&shop.status()?)?,
    };
    Ok(json)
}

fn error_line(e: &Error) -> String {
    format!("ERR {} {}", e.kind().as_str(), e)
}

/// Serves the shop over a line-oriented TCP protocol: one command per line,
/// one `OK <json>` or `ERR <kind> <message>` reply per line.
pub struct Router {
    shop: Arc<Shop>,
    semaphore: Arc<Semaphore>,
}

impl Router {
    pub fn new(shop: Arc<Shop>) -> Self {
        Self {
            shop,
            semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        }
    }

    /// Accepts connections on `127.0.0.1:<port>` until the listener fails.
    /// The protocol can reveal customer details, so it is never bound to a
    /// public interface.
    pub async fn listen(&self, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        info!("Flatshop store listening on 127.0.0.1:{}", port);

        loop {
            let (socket, peer) = listener.accept().await?;
            let shop = self.shop.clone();
            let sem = self.semaphore.clone();

            tokio::spawn(async move {
                let _permit = match sem.try_acquire() {
                    Ok(p) => p,
                    Err(_) => {
                        warn!("Server busy: rejecting connection from {}", peer);
                        let mut socket = socket;
                        let _ = socket.shutdown().await;
                        return;
                    }
                };

                if let Err(e) = handle_connection(socket, shop).await {
                    error!("Connection error from {}: {}", peer, e);
                }
            });
        }
    }
}

pub async fn handle_connection(mut socket: TcpStream, shop: Arc<Shop>) -> Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_command(line.trim()) {
            Ok(Command::Quit) => break,
            Ok(Command::Ping) => "PONG".to_string(),
            Ok(command) => {
                let shop = shop.clone();
                match tokio::task::spawn_blocking(move || execute(&shop, command)).await {
                    Ok(Ok(json)) => format!("OK {}", json),
                    Ok(Err(e)) => error_line(&e),
                    Err(e) => error_line(&Error::Internal(e.to_string())),
                }
            }
            Err(e) => error_line(&e),
        };

        writer.write_all(format!("{}\n", response).as_bytes()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orders_arguments() {
        match parse_command("ORDERS 2 5 shipped REVEAL").unwrap() {
            Command::Orders {
                page,
                page_size,
                status,
                reveal,
            } => {
                assert_eq!((page, page_size), (2, 5));
                assert_eq!(status, Some(OrderStatus::Shipped));
                assert!(reveal);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            parse_command("orders").unwrap(),
            Command::Orders { page: 1, page_size: DEFAULT_PAGE_SIZE, status: None, reveal: false }
        ));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for line in [
            "STATUS 100001 lost",
            "ORDER abc",
            "CLEANUP",
            "FROB",
            "PRODUCTS 1 10 {bad",
            "BACKUP ../../etc",
            "FEATURED many",
            "ADD",
            "ADD {\"sku\":",
            "EDIT PIA-1",
            "DELETE",
        ] {
            let err = parse_command(line).unwrap_err();
            assert_eq!(err.kind().as_str(), "validation", "{line}");
        }
    }

    #[test]
    fn test_parse_product_forms() {
        match parse_command(r#"EDIT PIA-1 {"title": "Piala  Blue", "price": "990"}"#).unwrap() {
            Command::EditProduct { sku, form } => {
                assert_eq!(sku, "PIA-1");
                assert_eq!(form.sku, "PIA-1");
                assert_eq!(form.title, "Piala  Blue");
                assert_eq!(form.price, "990");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            parse_command("FEATURED").unwrap(),
            Command::Featured(DEFAULT_FEATURED)
        ));
    }

    #[test]
    fn test_parse_checkout_payload() {
        let line = r#"CHECKOUT {"customer":{"name":"Ivan","phone":"+7999","city":"Perm","address":"Mira 1"},"items":[{"sku":"A1","quantity":2}]}"#;
        match parse_command(line).unwrap() {
            Command::Checkout(request) => {
                assert_eq!(request.customer.city, "Perm");
                assert_eq!(request.items[0].quantity, 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
