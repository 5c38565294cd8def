use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use flatshop_store::{Shop, StoreConfig};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

const PRODUCTS: &str = "\
sku,title,price,old_price,category,volume_ml,color,stock,is_active,description
PIA-1,Piala Blue,990.50,1200,piala,150,blue,3,1,Hand made
CUP-2,Cup White,400,,cups,250,white,10,1,Everyday cup
BOWL-3,Bowl,1500,,bowls,,green,0,0,Hidden bowl
";

const CHECKOUT: &str = r#"CHECKOUT {"customer":{"name":"Анна Петрова","phone":"+71234567890","city":"Kazan","address":"ул. Ленина, 5","comment":"after 6pm"},"items":[{"sku":"PIA-1","quantity":2},{"sku":"CUP-2","quantity":1}]}"#;

async fn start(config: &StoreConfig) -> SocketAddr {
    let shop = Arc::new(Shop::open(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let s = shop.clone();
            tokio::spawn(async move {
                let _ = flatshop_store::server::router::handle_connection(socket, s).await;
            });
        }
    });
    addr
}

struct Conn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Conn {
    async fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, line: &str) -> String {
        self.writer.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
        let mut response = String::new();
        self.reader.read_line(&mut response).await.unwrap();
        response.trim_end().to_string()
    }

    async fn ok(&mut self, line: &str) -> Value {
        let response = self.send(line).await;
        let json = response
            .strip_prefix("OK ")
            .unwrap_or_else(|| panic!("{line} -> {response}"));
        serde_json::from_str(json).unwrap()
    }
}

fn shop_dir() -> (TempDir, StoreConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::in_dir(dir.path()).with_encryption("integration master secret", "salt");
    fs::write(&config.products_path, PRODUCTS).unwrap();
    (dir, config)
}

#[tokio::test]
async fn test_catalog_protocol() {
    let (_dir, config) = shop_dir();
    let addr = start(&config).await;
    let mut conn = Conn::open(addr).await;

    assert_eq!(conn.send("PING").await, "PONG");

    let product = conn.ok("PRODUCT PIA-1").await;
    assert_eq!(product["title"], "Piala Blue");
    assert_eq!(product["price"], "990.50");
    assert_eq!(product["images"][0], "/static/img/goods/no-image.jpg");

    assert!(conn.send("PRODUCT NOPE").await.starts_with("ERR not_found"));

    let page = conn.ok("PRODUCTS 1 10").await;
    assert_eq!(page["total_items"], 2);
    assert_eq!(page["total_pages"], 1);

    let page = conn.ok(r#"PRODUCTS 1 10 {"text":"white","include_inactive":true}"#).await;
    assert_eq!(page["items"][0]["sku"], "CUP-2");

    let categories = conn.ok("CATEGORIES").await;
    assert_eq!(categories, serde_json::json!(["bowls", "cups", "piala"]));

    // Out-of-band replacement is only visible after INVALIDATE.
    fs::write(
        &config.products_path,
        "sku,title,price,old_price,category,volume_ml,color,stock,is_active,description\nNEW-1,New,5,,misc,,,,1,\n",
    )
    .unwrap();
    assert_eq!(conn.ok("PRODUCTS").await["total_items"], 2);
    let report = conn.ok("INVALIDATE").await;
    assert_eq!(report["products"], 1);
    assert_eq!(conn.ok("PRODUCTS").await["items"][0]["sku"], "NEW-1");

    assert!(conn.send("FROB").await.starts_with("ERR validation"));
}

#[tokio::test]
async fn test_product_admin_protocol() {
    let (_dir, config) = shop_dir();
    let addr = start(&config).await;
    let mut conn = Conn::open(addr).await;

    let featured = conn.ok("FEATURED 1").await;
    assert_eq!(featured.as_array().unwrap().len(), 1);
    assert_eq!(featured[0]["sku"], "PIA-1");

    let added = conn
        .ok(r#"ADD {"sku":"MUG-4","title":" Mug ","price":"250","stock":"5","is_active":"1"}"#)
        .await;
    assert_eq!(added["title"], "Mug");
    assert!(conn
        .send(r#"ADD {"sku":"MUG-4","title":"Again","price":"1"}"#)
        .await
        .starts_with("ERR validation"));
    assert!(conn
        .send(r#"ADD {"sku":"BAD-1","title":"Bad","price":"cheap"}"#)
        .await
        .starts_with("ERR validation"));

    let edited = conn
        .ok(r#"EDIT MUG-4 {"title":"Big mug","price":"300","is_active":"1"}"#)
        .await;
    assert_eq!(edited["price"], "300");
    assert!(conn
        .send(r#"EDIT NOPE-1 {"title":"X","price":"1"}"#)
        .await
        .starts_with("ERR not_found"));

    let raw = fs::read_to_string(&config.products_path).unwrap();
    assert!(raw.contains("MUG-4,Big mug,300,"));

    let removed = conn.ok("DELETE CUP-2").await;
    assert_eq!(removed["sku"], "CUP-2");
    assert!(conn.send("PRODUCT CUP-2").await.starts_with("ERR not_found"));
    assert_eq!(fs::read_dir(&config.backup_dir).unwrap().count(), 1);

    let page = conn.ok("PRODUCTS").await;
    let skus: Vec<&str> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["sku"].as_str().unwrap())
        .collect();
    assert_eq!(skus, vec!["PIA-1", "MUG-4"]);
}

#[tokio::test]
async fn test_order_protocol() {
    let (_dir, config) = shop_dir();
    let addr = start(&config).await;
    let mut conn = Conn::open(addr).await;

    let created = conn.ok(CHECKOUT).await;
    assert_eq!(created["order_id"], 100001);
    let created = conn.ok(CHECKOUT).await;
    assert_eq!(created["order_id"], 100002);

    let raw = fs::read_to_string(&config.orders_path).unwrap();
    assert!(!raw.contains("Анна"));
    assert!(!raw.contains("+71234567890"));
    assert!(raw.contains("PIA-1:2|CUP-2:1"));

    let masked = conn.ok("ORDER 100001").await;
    assert_eq!(masked["total"], "2381.00");
    assert_eq!(masked["customer"]["mode"], "masked");
    assert_eq!(masked["customer"]["phone"], "+7********90");

    let revealed = conn.ok("ORDER 100001 REVEAL").await;
    assert_eq!(revealed["customer"]["name"], "Анна Петрова");
    assert_eq!(revealed["customer"]["comment"], "after 6pm");

    conn.ok("STATUS 100001 shipped").await;
    assert!(conn.send("STATUS 100001 lost").await.starts_with("ERR validation"));
    assert!(conn.send("STATUS 999 done").await.starts_with("ERR not_found"));

    let page = conn.ok("ORDERS 1 10").await;
    assert_eq!(page["items"][0]["order_id"], 100002);
    assert_eq!(page["items"][1]["status"], "shipped");

    let shipped = conn.ok("ORDERS 1 10 shipped").await;
    assert_eq!(shipped["total_items"], 1);

    let stats = conn.ok("STATS").await;
    assert_eq!(stats["orders"], 2);
    assert_eq!(stats["new_orders"], 1);
    assert_eq!(stats["encrypted"], true);

    assert!(conn.send("CLEANUP 7").await.starts_with("ERR validation"));
    assert_eq!(conn.ok("CLEANUP 365").await["deleted"], 0);

    let backups = conn.ok("BACKUP").await;
    assert_eq!(backups.as_array().unwrap().len(), 2);

    let bad = r#"CHECKOUT {"customer":{"name":"A","phone":"x","city":"","address":""},"items":[]}"#;
    assert!(conn.send(bad).await.starts_with("ERR validation"));
    let hidden = r#"CHECKOUT {"customer":{"name":"Ivan","phone":"+7999","city":"Perm","address":"Mira 1"},"items":[{"sku":"BOWL-3","quantity":1}]}"#;
    assert!(conn.send(hidden).await.starts_with("ERR validation"));
}

#[tokio::test]
async fn test_concurrent_checkouts_get_distinct_ids() {
    let (_dir, config) = shop_dir();
    let addr = start(&config).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(tokio::spawn(async move {
            let mut conn = Conn::open(addr).await;
            let mut ids = Vec::new();
            for _ in 0..5 {
                ids.push(conn.ok(CHECKOUT).await["order_id"].as_u64().unwrap());
            }
            ids
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.extend(handle.await.unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, (100001..100041).collect::<Vec<u64>>());

    let mut conn = Conn::open(addr).await;
    assert_eq!(conn.ok("STATS").await["orders"], 40);
}

#[tokio::test]
async fn test_quit_closes_connection() {
    let (_dir, config) = shop_dir();
    let addr = start(&config).await;
    let mut conn = Conn::open(addr).await;

    conn.writer.write_all(b"QUIT\n").await.unwrap();
    let mut response = String::new();
    let n = conn.reader.read_line(&mut response).await.unwrap();
    assert_eq!(n, 0);
}
