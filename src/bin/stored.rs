use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use flatshop_store::server::Router;
use flatshop_store::{Shop, StoreConfig};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serves the flatshop catalog and order ledger over TCP", long_about = None)]
struct Args {
    /// Overrides FLATSHOP_PORT.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = StoreConfig::from_env().context("loading configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let shop = Arc::new(Shop::open(&config).context("opening the shop files")?);
    let status = shop.status()?;

    println!("Starting flatshop store daemon...");
    println!(
        "Loaded {} products ({} active) and {} orders ({} new).",
        status.products.total, status.products.active, status.orders, status.new_orders
    );
    if !status.encrypted {
        println!("WARNING: order encryption is off; customer details are stored in clear text.");
    }

    let router = Router::new(shop);
    tokio::select! {
        res = router.listen(config.port) => {
            if let Err(e) = res {
                eprintln!("TCP server failed: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            println!("\nShutdown signal received. Exiting.");
        }
    }

    Ok(())
}
