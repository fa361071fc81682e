//! Special-offer collection
//!
//! Incremental sync: after the initial read, other clients' adds, removals
//! and edits arrive one record at a time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use log::info;

use crate::engine::{Projection, SyncEngine};
use crate::error::{Error, Result};
use crate::models::lenient::parse_decimal;
use crate::models::{is_valid_upc, validate_image_url, Especial};
use crate::store::{CollectionName, Durability, Storage};

/// Offer form input, as typed.
#[derive(Debug, Clone, Default)]
pub struct EspecialDraft {
    pub nombre: String,
    pub upc: String,
    pub antes: String,
    pub price: String,
    pub image_url: String,
    pub proveedor: String,
    pub notas: String,
}

fn price(raw: &str, label: &str, required: bool) -> Result<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return if required {
            Err(Error::validation(format!("{} is required", label)))
        } else {
            Ok(0.0)
        };
    }
    match parse_decimal(raw) {
        Some(value) if value >= 0.0 => Ok(value),
        Some(_) => Err(Error::validation(format!("{} must be at least 0", label))),
        None => Err(Error::validation(format!("{} must be a number", label))),
    }
}

impl EspecialDraft {
    fn validate(&self) -> Result<Especial> {
        let nombre = self.nombre.trim();
        if nombre.is_empty() {
            return Err(Error::validation("product name is required"));
        }
        let proveedor = self.proveedor.trim();
        if proveedor.is_empty() {
            return Err(Error::validation("supplier is required"));
        }
        let upc = self.upc.trim();
        if !upc.is_empty() && !is_valid_upc(upc) {
            return Err(Error::validation("scan code must be 12 or 13 digits"));
        }
        validate_image_url(&self.image_url)?;

        Ok(Especial {
            id_price: 0,
            nombre: nombre.to_string(),
            upc: upc.to_string(),
            antes: price(&self.antes, "previous price", false)?,
            price: price(&self.price, "price", true)?,
            image_url: self.image_url.trim().to_string(),
            proveedor: proveedor.to_string(),
            notas: self.notas.trim().to_string(),
        })
    }
}

/// Parse an offer identifier coming from user input.
pub fn parse_especial_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| Error::validation(format!("invalid offer id '{}'", raw)))
}

/// Highest offer id ever seen this session.
#[derive(Debug, Default)]
struct IdWatermark(AtomicI64);

impl IdWatermark {
    fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    fn raise(&self, id: i64) {
        self.0.fetch_max(id, Ordering::SeqCst);
    }
}

impl Projection<Especial> for IdWatermark {
    fn rebuild(&self, items: &[Especial]) {
        if let Some(max) = items.iter().map(|e| e.id_price).max() {
            self.raise(max);
        }
    }
}

pub struct Especiales {
    engine: SyncEngine<Especial>,
    watermark: Arc<IdWatermark>,
}

impl Especiales {
    pub fn new(storage: Arc<Storage>) -> Self {
        let watermark = Arc::new(IdWatermark::default());
        let projection: Arc<dyn Projection<Especial>> = watermark.clone();
        Self {
            engine: SyncEngine::new_with_projection(
                CollectionName::Especiales,
                storage,
                Some(projection),
            ),
            watermark,
        }
    }

    pub fn engine(&self) -> &SyncEngine<Especial> {
        &self.engine
    }

    pub async fn items(&self) -> Vec<Especial> {
        self.engine.items().await
    }

    /// Create an offer. Its id is one above the highest id in the collection
    /// or seen earlier this session, so deleted ids are not handed out again.
    pub async fn add_especial(&self, draft: &EspecialDraft) -> Result<(Especial, Durability)> {
        let mut especial = draft.validate()?;
        let watermark = self.watermark.clone();
        let result = self
            .engine
            .mutate(move |items| {
                let current = items.iter().map(|e| e.id_price).max().unwrap_or(0);
                especial.id_price = current.max(watermark.get()) + 1;
                watermark.raise(especial.id_price);
                items.push(especial.clone());
                Ok(especial)
            })
            .await?;
        info!("Added especial {}", result.0.id_price);
        Ok(result)
    }

    pub async fn delete_especial(&self, id: i64) -> Result<(Especial, Durability)> {
        if id <= 0 {
            return Err(Error::validation(format!("invalid offer id {}", id)));
        }
        self.engine
            .mutate(|items| {
                let index = items
                    .iter()
                    .position(|e| e.id_price == id)
                    .ok_or_else(|| Error::not_found(format!("offer {}", id)))?;
                Ok(items.remove(index))
            })
            .await
    }

    /// Case-insensitive substring match on supplier or product name.
    pub async fn search(&self, term: &str) -> Vec<Especial> {
        let term = term.trim().to_lowercase();
        self.engine
            .read(|items| {
                items
                    .iter()
                    .filter(|e| {
                        term.is_empty()
                            || e.proveedor.to_lowercase().contains(&term)
                            || e.nombre.to_lowercase().contains(&term)
                    })
                    .cloned()
                    .collect()
            })
            .await
    }
}
