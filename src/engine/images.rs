use std::fs;
use std::path::{Path, PathBuf};

/// Public URL prefix of the goods image directory.
pub const IMAGE_URL_PREFIX: &str = "/static/img/goods";
/// Shown when a product has no image of its own.
pub const PLACEHOLDER_IMAGE: &str = "/static/img/goods/no-image.jpg";
/// Highest `_N` suffix probed per SKU.
pub const MAX_IMAGES: usize = 10;

/// Finds product images by naming convention: `<sku>_1.jpg` … `<sku>_10.jpg`,
/// compared case-insensitively against the files in the image directory.
#[derive(Debug, Clone)]
pub struct ImageProbe {
    dir: PathBuf,
}

impl ImageProbe {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Image URLs for `sku` in suffix order, or just the placeholder.
    pub fn find(&self, sku: &str) -> Vec<String> {
        let files = if sku.is_empty() {
            Vec::new()
        } else {
            list_files(&self.dir)
        };

        let sku = sku.to_lowercase();
        let images: Vec<String> = (1..=MAX_IMAGES)
            .filter_map(|i| {
                let target = format!("{}_{}.jpg", sku, i);
                files
                    .iter()
                    .find(|name| name.to_lowercase() == target)
                    .map(|name| format!("{}/{}", IMAGE_URL_PREFIX, name))
            })
            .collect();

        if images.is_empty() {
            vec![PLACEHOLDER_IMAGE.to_string()]
        } else {
            images
        }
    }
}

fn list_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect()
        })
        .unwrap_or_default()
}
