//! Products collection
//!
//! Whole-replace sync. Every change rebuilds the scan-code index.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::catalog::{CatalogEntry, CatalogIndex};
use crate::engine::{Projection, SyncEngine};
use crate::error::{Error, Result};
use crate::import::{merge_rows, ImportReport, ImportRow};
use crate::models::lenient::parse_decimal;
use crate::models::{generate_id, validate_image_url, Product};
use crate::store::{CollectionName, Durability, Storage};

/// Products per page of the public listing.
pub const PAGE_SIZE: usize = 20;

/// Item number shown for products whose item number was cleared.
pub const NO_ITEM_NUMBER: &str = "N/A";

/// Product form input, as typed.
#[derive(Debug, Clone, Default)]
pub struct ProductDraft {
    pub item_number: String,
    pub description: String,
    pub upc: String,
    pub nombre: String,
    pub size: String,
    pub qty: String,
    pub costo: String,
    pub url: String,
}

struct ValidDraft {
    item_number: String,
    description: String,
    upc: String,
    nombre: String,
    size: String,
    qty: i64,
    costo: f64,
    url: String,
}

fn required(value: &str, label: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation(format!("{} is required", label)));
    }
    Ok(value.to_string())
}

impl ProductDraft {
    fn validate(&self) -> Result<ValidDraft> {
        let item_number = required(&self.item_number, "item number")?;
        let upc = required(&self.upc, "scan code")?;
        let nombre = required(&self.nombre, "name")?;
        let size = required(&self.size, "size")?;
        let description = required(&self.description, "description")?;

        let qty = parse_decimal(&required(&self.qty, "quantity")?)
            .ok_or_else(|| Error::validation("quantity must be a number"))?;
        if qty.fract() != 0.0 {
            return Err(Error::validation("quantity must be a whole number"));
        }
        if qty < 0.0 {
            return Err(Error::validation("quantity must be at least 0"));
        }

        let costo = parse_decimal(&required(&self.costo, "cost")?)
            .ok_or_else(|| Error::validation("cost must be a number"))?;
        if costo < 0.0 {
            return Err(Error::validation("cost must be at least 0"));
        }

        let url = self.url.trim().to_string();
        validate_image_url(&url)?;

        Ok(ValidDraft {
            item_number,
            description,
            upc,
            nombre,
            size,
            qty: qty as i64,
            costo,
            url,
        })
    }
}

/// One page of the public listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicPage {
    pub items: Vec<Product>,
    /// 1-based, clamped to the available pages.
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

fn matches_term(product: &Product, term: &str) -> bool {
    term.is_empty()
        || product.nombre.to_lowercase().contains(term)
        || product.upc.to_lowercase().contains(term)
}

/// The products collection and its scan-code index.
pub struct Products {
    engine: SyncEngine<Product>,
    index: Arc<CatalogIndex>,
    new_window: Duration,
}

impl Products {
    pub fn new(storage: Arc<Storage>, new_window: Duration) -> Self {
        let index = Arc::new(CatalogIndex::new());
        let projection: Arc<dyn Projection<Product>> = index.clone();
        Self {
            engine: SyncEngine::new_with_projection(
                CollectionName::Products,
                storage,
                Some(projection),
            ),
            index,
            new_window,
        }
    }

    pub fn engine(&self) -> &SyncEngine<Product> {
        &self.engine
    }

    pub fn index(&self) -> &Arc<CatalogIndex> {
        &self.index
    }

    pub async fn items(&self) -> Vec<Product> {
        self.engine.items().await
    }

    pub async fn get(&self, id: &str) -> Option<Product> {
        self.engine.find(|p| p.id == id).await
    }

    /// Create a product from the form. Nothing changes unless every field
    /// validates.
    pub async fn add_product(&self, draft: &ProductDraft, now_ms: i64) -> Result<(Product, Durability)> {
        let valid = draft.validate()?;
        let product = Product {
            id: generate_id(now_ms),
            item_number: valid.item_number,
            description: valid.description,
            upc: valid.upc,
            nombre: valid.nombre,
            size: valid.size,
            qty: valid.qty,
            costo: valid.costo,
            url: valid.url,
            date_added: now_ms,
            ..Default::default()
        };
        let created = product.clone();
        let ((), durability) = self
            .engine
            .mutate(move |items| {
                items.push(product);
                Ok(())
            })
            .await?;
        info!("Added product {}", created.id);
        Ok((created, durability))
    }

    /// Replace the form fields of an existing product, keeping its
    /// identifier, creation time, supplier and extension fields.
    pub async fn update_product(
        &self,
        id: &str,
        draft: &ProductDraft,
        now_ms: i64,
    ) -> Result<(Product, Durability)> {
        let valid = draft.validate()?;
        self.engine
            .mutate(|items| {
                let product = items
                    .iter_mut()
                    .find(|p| p.id == id)
                    .ok_or_else(|| Error::not_found(format!("product {}", id)))?;
                product.item_number = valid.item_number;
                product.description = valid.description;
                product.upc = valid.upc;
                product.nombre = valid.nombre;
                product.size = valid.size;
                product.qty = valid.qty;
                product.costo = valid.costo;
                product.url = valid.url;
                if product.date_added <= 0 {
                    product.date_added = now_ms;
                }
                Ok(product.clone())
            })
            .await
    }

    pub async fn delete_product(&self, id: &str) -> Result<(Product, Durability)> {
        self.engine
            .mutate(|items| {
                let index = items
                    .iter()
                    .position(|p| p.id == id)
                    .ok_or_else(|| Error::not_found(format!("product {}", id)))?;
                Ok(items.remove(index))
            })
            .await
    }

    /// Delete every listed product in one write. Unknown ids are ignored
    /// unless none of them exist.
    pub async fn delete_products(&self, ids: &[String]) -> Result<(usize, Durability)> {
        if ids.is_empty() {
            return Err(Error::validation("no products selected"));
        }
        self.engine
            .mutate(|items| {
                let before = items.len();
                items.retain(|p| !ids.contains(&p.id));
                match before - items.len() {
                    0 => Err(Error::not_found("none of the selected products exist")),
                    removed => Ok(removed),
                }
            })
            .await
    }

    /// Inline item-number edit. A blank value is stored as "N/A".
    pub async fn set_item_number(&self, id: &str, value: &str) -> Result<(Product, Durability)> {
        let value = match value.trim() {
            "" => NO_ITEM_NUMBER.to_string(),
            v => v.to_string(),
        };
        self.engine
            .mutate(|items| {
                let product = items
                    .iter_mut()
                    .find(|p| p.id == id)
                    .ok_or_else(|| Error::not_found(format!("product {}", id)))?;
                product.item_number = value;
                Ok(product.clone())
            })
            .await
    }

    /// Add or overwrite one extension field.
    pub async fn set_custom_field(
        &self,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<(Product, Durability)> {
        let key = required(key, "field name")?;
        let value = required(value, "field value")?;
        self.engine
            .mutate(|items| {
                let product = items
                    .iter_mut()
                    .find(|p| p.id == id)
                    .ok_or_else(|| Error::not_found(format!("product {}", id)))?;
                product.custom_fields.insert(key, value);
                Ok(product.clone())
            })
            .await
    }

    /// Merge an import batch and persist it once.
    pub async fn import_rows(&self, rows: &[ImportRow], now_ms: i64) -> Result<(ImportReport, Durability)> {
        if rows.is_empty() {
            return Err(Error::validation("the import contains no rows"));
        }
        let (report, durability) = self
            .engine
            .mutate(|items| Ok(merge_rows(items, rows, now_ms)))
            .await?;
        info!(
            "Imported products: {} added, {} updated, {} skipped",
            report.added, report.updated, report.skipped
        );
        Ok((report, durability))
    }

    pub fn lookup_by_code(&self, code: &str) -> Option<CatalogEntry> {
        self.index.lookup(code)
    }

    /// Case-insensitive substring match on name or scan code.
    pub async fn search(&self, term: &str) -> Vec<Product> {
        let term = term.trim().to_lowercase();
        self.engine
            .read(|items| {
                items
                    .iter()
                    .filter(|p| matches_term(p, &term))
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Public listing: matches for `term`, products created within the "new"
    /// window first, then the rest, both in collection order.
    pub async fn public_page(&self, term: &str, page: usize, now_ms: i64) -> PublicPage {
        let matches = self.search(term).await;
        let (mut ordered, older): (Vec<Product>, Vec<Product>) = matches
            .into_iter()
            .partition(|p| p.is_new(now_ms, self.new_window));
        ordered.extend(older);

        let total_items = ordered.len();
        let total_pages = (total_items + PAGE_SIZE - 1) / PAGE_SIZE;
        let page = page.clamp(1, total_pages.max(1));
        let items = ordered
            .into_iter()
            .skip((page - 1) * PAGE_SIZE)
            .take(PAGE_SIZE)
            .collect();

        PublicPage {
            items,
            page,
            total_pages,
            total_items,
        }
    }
}
