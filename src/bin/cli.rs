use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use flatshop_store::engine::ledger::MigrationOutcome;
use flatshop_store::engine::validate::validate_products_csv;
use flatshop_store::engine::{OrderStatus, ProductFilter, ProductForm};
use flatshop_store::{Error, Shop, StoreConfig};
use rust_decimal::Decimal;
use serde::Serialize;

/// Admin tool working directly on the shop files. Paths and keys come from
/// the same environment as the daemon.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Replace the catalog with a products CSV (validated first).
    Upload { file: PathBuf },
    /// Validate a products CSV without writing anything.
    Check { file: PathBuf },
    /// Copy both files to the backup directory.
    Backup {
        #[arg(default_value = "manual")]
        label: String,
    },
    /// Delete orders older than DAYS.
    Cleanup { days: u32 },
    /// Encrypt a legacy plaintext order ledger.
    Migrate,
    /// Add, edit or delete one product.
    Product {
        #[command(subcommand)]
        action: ProductAction,
    },
    /// The first active products in catalog order.
    Featured {
        #[arg(default_value_t = 8)]
        limit: usize,
    },
    Products {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        min_price: Option<Decimal>,
        #[arg(long)]
        max_price: Option<Decimal>,
        #[arg(long)]
        all: bool,
    },
    Orders {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
        #[arg(long)]
        status: Option<OrderStatus>,
        /// Show decrypted customer details instead of masked ones.
        #[arg(long)]
        reveal: bool,
    },
    Order {
        id: u64,
        #[arg(long)]
        reveal: bool,
    },
    SetStatus { id: u64, status: OrderStatus },
    /// Product and order counts.
    Stats,
}

#[derive(Subcommand, Clone)]
enum ProductAction {
    Add {
        sku: String,
        #[command(flatten)]
        fields: ProductFields,
    },
    /// Change the given fields; the rest keep their current values.
    Edit {
        sku: String,
        #[command(flatten)]
        fields: ProductFields,
    },
    /// Remove a product (the catalog is backed up first).
    Delete { sku: String },
}

/// Raw field values, validated the same way as the admin form.
#[derive(Args, Clone, Default)]
struct ProductFields {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    price: Option<String>,
    #[arg(long)]
    old_price: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    volume_ml: Option<String>,
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    stock: Option<String>,
    /// 1/0, true/false or on/off.
    #[arg(long)]
    active: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

impl ProductFields {
    fn apply(self, form: &mut ProductForm) {
        let fields = [
            (self.title, &mut form.title),
            (self.price, &mut form.price),
            (self.old_price, &mut form.old_price),
            (self.category, &mut form.category),
            (self.volume_ml, &mut form.volume_ml),
            (self.color, &mut form.color),
            (self.stock, &mut form.stock),
            (self.active, &mut form.is_active),
            (self.description, &mut form.description),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Commands::Check { file } = &cli.command {
        let content = fs::read(file).with_context(|| format!("reading {:?}", file))?;
        let summary = validate_products_csv(&content)?;
        for warning in &summary.warnings {
            println!("warning: {}", warning);
        }
        println!("OK: {} products", summary.products);
        return Ok(());
    }

    let config = StoreConfig::from_env().context("loading configuration")?;
    let shop = Shop::open(&config)?;

    match cli.command {
        Commands::Check { .. } => {}
        Commands::Upload { file } => {
            let content = fs::read(&file).with_context(|| format!("reading {:?}", file))?;
            let summary = shop.catalog.replace_all(&content)?;
            for warning in &summary.warnings {
                println!("warning: {}", warning);
            }
            println!("Uploaded {} products", summary.products);
        }
        Commands::Backup { label } => {
            for path in shop.backup(&label) {
                println!("{}", path.display());
            }
        }
        Commands::Cleanup { days } => {
            let deleted = shop.ledger.cleanup_older_than(days)?;
            println!("Deleted {} orders older than {} days", deleted, days);
        }
        Commands::Migrate => match shop.ledger.migrate_plaintext()? {
            MigrationOutcome::Missing => println!("No order ledger at {:?}", config.orders_path),
            MigrationOutcome::AlreadyCurrent => println!("Order ledger is already encrypted"),
            MigrationOutcome::Migrated { orders, backup } => {
                println!("Encrypted {} orders", orders);
                if let Some(backup) = backup {
                    println!("Previous ledger saved as {}", backup.display());
                }
            }
        },
        Commands::Product { action } => match action {
            ProductAction::Add { sku, fields } => {
                let mut form = ProductForm {
                    sku,
                    is_active: "1".to_string(),
                    ..Default::default()
                };
                fields.apply(&mut form);
                print_json(&shop.catalog.create(form.into_product()?)?)?;
            }
            ProductAction::Edit { sku, fields } => {
                let current = shop
                    .catalog
                    .get_by_sku(&sku)
                    .ok_or_else(|| Error::ProductNotFound(sku.clone()))?;
                let mut form = ProductForm::from(&current);
                fields.apply(&mut form);
                print_json(&shop.catalog.update(&sku, form.into_product()?)?)?;
            }
            ProductAction::Delete { sku } => {
                let removed = shop.catalog.delete(&sku)?;
                println!("Deleted {} ({})", removed.sku, removed.title);
            }
        },
        Commands::Featured { limit } => print_json(&shop.catalog.featured(limit))?,
        Commands::Products {
            page,
            page_size,
            category,
            search,
            min_price,
            max_price,
            all,
        } => {
            let filter = ProductFilter {
                category,
                text: search,
                price_min: min_price,
                price_max: max_price,
                include_inactive: all,
            };
            print_json(&shop.catalog.query(&filter, page, page_size))?;
        }
        Commands::Orders {
            page,
            page_size,
            status,
            reveal,
        } => print_json(&shop.ledger.list_for_admin(status, page, page_size, reveal)?)?,
        Commands::Order { id, reveal } => print_json(&shop.ledger.get_for_admin(id, reveal)?)?,
        Commands::SetStatus { id, status } => {
            shop.ledger.update_status(id, status)?;
            println!("Order {} is now {}", id, status);
        }
        Commands::Stats => print_json(&shop.status()?)?,
    }

    Ok(())
}
