//! Scan-code index derived from the products collection

use std::collections::HashMap;
use std::sync::RwLock;

use log::debug;

use crate::engine::Projection;
use crate::models::Product;

/// Name used for indexed products that have none.
pub const UNNAMED: &str = "Sin nombre";

/// What a scan code resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub upc: String,
    pub nombre: String,
    pub item_number: String,
    pub description: String,
    pub size: String,
    pub costo: f64,
}

impl CatalogEntry {
    fn from_product(product: &Product) -> Self {
        let nombre = if product.nombre.trim().is_empty() {
            UNNAMED.to_string()
        } else {
            product.nombre.clone()
        };
        Self {
            upc: product.upc.trim().to_string(),
            nombre,
            item_number: product.item_number.clone(),
            description: product.description.clone(),
            size: product.size.clone(),
            costo: product.costo,
        }
    }
}

/// Lookup table keyed by scan code.
///
/// Never persisted and never patched: every rebuild recomputes it from the
/// full products array. When two products share a scan code the first one
/// wins.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl CatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_products(products: &[Product]) -> Self {
        let index = Self::new();
        index.rebuild(products);
        index
    }

    /// Exact match on the trimmed code.
    pub fn lookup(&self, code: &str) -> Option<CatalogEntry> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(code)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Projection<Product> for CatalogIndex {
    fn rebuild(&self, items: &[Product]) {
        let mut entries = HashMap::with_capacity(items.len());
        for product in items.iter().filter(|p| !p.upc.trim().is_empty()) {
            let entry = CatalogEntry::from_product(product);
            entries.entry(entry.upc.clone()).or_insert(entry);
        }
        debug!("Catalog index rebuilt with {} scan code(s)", entries.len());
        *self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = entries;
    }
}
