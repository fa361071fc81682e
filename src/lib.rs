//! Catalogo Sync
//!
//! Offline-resilient synchronized state for a small store: a product
//! catalog, special offers and supplier credits, each kept in memory,
//! persisted to a remote document store with a local fallback, and merged
//! with other clients' changes as they arrive.

pub mod catalog;
pub mod config;
pub mod credits;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod especiales;
pub mod fetch;
pub mod import;
pub mod models;
pub mod notify;
pub mod products;
pub mod store;

use std::sync::Arc;

use log::info;
use tokio::sync::mpsc;

use crate::catalog::CatalogEntry;
use crate::config::SyncOptions;
use crate::credits::Credits;
use crate::debounce::Debouncer;
use crate::engine::LoadSource;
use crate::error::Result;
use crate::especiales::Especiales;
use crate::notify::{OverdueMonitor, OverdueNotice};
use crate::products::Products;
use crate::store::Storage;

/// Where each collection came from on the last [`Inventory::load_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub products: LoadSource,
    pub especiales: LoadSource,
    pub credits: LoadSource,
}

/// The main entry point: the three synchronized collections over one
/// storage policy.
pub struct Inventory {
    products: Arc<Products>,
    especiales: Arc<Especiales>,
    credits: Arc<Credits>,
    /// Options the inventory was built with
    pub options: SyncOptions,
}

impl Inventory {
    /// Create an inventory with an HTTP remote store (when
    /// `options.remote_url` is set) and a file-backed local store.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use catalogo_sync::{config::SyncOptions, Inventory};
    ///
    /// # async fn run() -> catalogo_sync::error::Result<()> {
    /// let options = SyncOptions::default().with_remote_url("https://example.firebaseio.com");
    /// let inventory = Inventory::new(options)?;
    /// inventory.load_all().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(options: SyncOptions) -> Result<Self> {
        let storage = Storage::from_options(&options)?;
        Ok(Self::with_storage(Arc::new(storage), options))
    }

    /// Create an inventory over an already built storage policy.
    pub fn with_storage(storage: Arc<Storage>, options: SyncOptions) -> Self {
        Self {
            products: Arc::new(Products::new(storage.clone(), options.new_product_window)),
            especiales: Arc::new(Especiales::new(storage.clone())),
            credits: Arc::new(Credits::new(storage, options.overdue_after_days)),
            options,
        }
    }

    pub fn products(&self) -> &Arc<Products> {
        &self.products
    }

    pub fn especiales(&self) -> &Arc<Especiales> {
        &self.especiales
    }

    pub fn credits(&self) -> &Arc<Credits> {
        &self.credits
    }

    /// Load all three collections concurrently.
    pub async fn load_all(&self) -> LoadReport {
        let (products, especiales, credits) = tokio::join!(
            self.products.engine().load(),
            self.especiales.engine().load(),
            self.credits.engine().load(),
        );
        let report = LoadReport {
            products,
            especiales,
            credits,
        };
        info!("Inventory loaded: {:?}", report);
        report
    }

    /// Resolve a scan code against the catalog index.
    pub fn lookup_by_code(&self, code: &str) -> Option<CatalogEntry> {
        self.products.lookup_by_code(code)
    }

    /// Debouncer for scan-code input.
    pub fn code_lookup_debouncer(&self) -> Debouncer {
        Debouncer::new(self.options.lookup_debounce)
    }

    /// Debouncer for search input.
    pub fn search_debouncer(&self) -> Debouncer {
        Debouncer::new(self.options.search_debounce)
    }

    /// Start the overdue-credit check on the configured schedule.
    pub fn start_overdue_monitor(&self) -> (OverdueMonitor, mpsc::Receiver<OverdueNotice>) {
        OverdueMonitor::start(
            self.credits.clone(),
            self.options.overdue_first_check,
            self.options.overdue_interval,
        )
    }

    /// Stop following remote changes on every collection.
    pub async fn shutdown(&self) {
        tokio::join!(
            self.products.engine().shutdown(),
            self.especiales.engine().shutdown(),
            self.credits.engine().shutdown(),
        );
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::SyncOptions;
    pub use crate::credits::{AgeFilter, CreditDraft, CreditLineDraft, Urgency};
    pub use crate::engine::{CollectionEvent, LoadSource};
    pub use crate::error::Error;
    pub use crate::especiales::EspecialDraft;
    pub use crate::import::ImportRow;
    pub use crate::models::{Credit, Delivery, Especial, Product};
    pub use crate::products::ProductDraft;
    pub use crate::store::Durability;
    pub use crate::{Inventory, LoadReport};
}
