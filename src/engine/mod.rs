//! Storage engine: the record codec, atomic file persistence, field
//! encryption and the two CSV-backed stores built on them.

pub mod catalog;
pub mod codec;
pub mod images;
pub mod ledger;
pub mod mask;
pub mod page;
pub mod persistence;
pub mod validate;
pub mod vault;

pub use catalog::{Catalog, CatalogCounts, LoadReport, ProductFilter};
pub use codec::{LineItem, OrderRecord, OrderStatus, Product};
pub use images::ImageProbe;
pub use ledger::{CartLine, CustomerDetails, CustomerView, Ledger, MigrationOutcome, OrderView};
pub use page::Page;
pub use persistence::Persistence;
pub use validate::{ProductForm, UploadSummary};
pub use vault::{FieldCipher, Plaintext, Vault};
