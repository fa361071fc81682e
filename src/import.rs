//! Bulk product import
//!
//! Rows come from a spreadsheet export: header name to cell value. Each row
//! either merges into an existing product (same item number or same scan
//! code) or becomes a new product appended after the whole batch.

use std::collections::BTreeMap;

use log::debug;

use crate::models::lenient::{parse_decimal, parse_int};
use crate::models::{generate_id, Product};

pub const COL_ITEM_NUMBER: &str = "ITEM NUMBER";
pub const COL_DESCRIPTION: &str = "DESCRIPTION";
pub const COL_UPC: &str = "UPC";
pub const COL_NOMBRE: &str = "NOMBRE";
pub const COL_SIZE: &str = "SIZE";
pub const COL_QTY: &str = "QTY";
pub const COL_COSTO: &str = "COSTO";
pub const COL_URL: &str = "URL";
/// Supplier column; also kept as an extension field.
pub const COL_SUPPLIER: &str = "PALIMEX";

const KNOWN_COLUMNS: [&str; 9] = [
    COL_ITEM_NUMBER,
    COL_DESCRIPTION,
    COL_UPC,
    COL_NOMBRE,
    COL_SIZE,
    COL_QTY,
    COL_COSTO,
    COL_URL,
    COL_SUPPLIER,
];

/// Trim, drop quotes and byte-order marks, upper-case.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\u{feff}'))
        .collect::<String>()
        .trim()
        .to_uppercase()
}

/// One imported row keyed by normalized header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRow {
    cells: BTreeMap<String, String>,
}

impl ImportRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from parallel header and value slices. Extra values
    /// without a header are dropped.
    pub fn from_record<H: AsRef<str>, V: AsRef<str>>(headers: &[H], values: &[V]) -> Self {
        headers
            .iter()
            .zip(values.iter())
            .fold(Self::new(), |row, (h, v)| row.with(h.as_ref(), v.as_ref()))
    }

    pub fn with(mut self, header: &str, value: &str) -> Self {
        self.insert(header, value);
        self
    }

    pub fn insert(&mut self, header: &str, value: &str) {
        let header = normalize_header(header);
        if header.is_empty() {
            return;
        }
        self.cells.insert(header, value.trim().to_string());
    }

    /// Trimmed, non-empty cell.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Every cell is empty.
    pub fn is_blank(&self) -> bool {
        self.cells.values().all(|v| v.is_empty())
    }

    fn text(&self, column: &str) -> String {
        self.get(column).unwrap_or_default().to_string()
    }

    fn extension_fields(&self) -> BTreeMap<String, String> {
        let mut fields: BTreeMap<String, String> = self
            .cells
            .iter()
            .filter(|(k, v)| !KNOWN_COLUMNS.contains(&k.as_str()) && !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(supplier) = self.get(COL_SUPPLIER) {
            fields.insert(COL_SUPPLIER.to_string(), supplier.to_string());
        }
        fields
    }

    /// The product this row describes on its own. Malformed numbers read as
    /// zero.
    pub fn to_product(&self, now_ms: i64) -> Product {
        Product {
            id: generate_id(now_ms),
            item_number: self.text(COL_ITEM_NUMBER),
            description: self.text(COL_DESCRIPTION),
            upc: self.text(COL_UPC),
            nombre: self.text(COL_NOMBRE),
            size: self.text(COL_SIZE),
            qty: self.get(COL_QTY).and_then(parse_int).unwrap_or(0),
            costo: self.get(COL_COSTO).and_then(parse_decimal).unwrap_or(0.0),
            url: self.text(COL_URL),
            proveedor: self.text(COL_SUPPLIER),
            custom_fields: self.extension_fields(),
            date_added: now_ms,
        }
    }
}

/// Counts from one import batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub updated: usize,
    /// Entirely empty rows.
    pub skipped: usize,
}

fn same_product(existing: &Product, incoming: &Product) -> bool {
    (!existing.item_number.is_empty() && existing.item_number == incoming.item_number)
        || (!existing.upc.is_empty() && existing.upc == incoming.upc)
}

fn overwrite(target: &mut String, incoming: &str) {
    if !incoming.is_empty() {
        *target = incoming.to_string();
    }
}

/// Merge `row` into `target`. Non-empty incoming text wins, numbers are
/// replaced only when their column has a value, extension fields merge per
/// key. Identifier and creation time are kept.
fn merge_into(target: &mut Product, incoming: &Product, row: &ImportRow) {
    overwrite(&mut target.item_number, &incoming.item_number);
    overwrite(&mut target.description, &incoming.description);
    overwrite(&mut target.upc, &incoming.upc);
    overwrite(&mut target.nombre, &incoming.nombre);
    overwrite(&mut target.size, &incoming.size);
    overwrite(&mut target.url, &incoming.url);
    overwrite(&mut target.proveedor, &incoming.proveedor);
    if row.get(COL_QTY).is_some() {
        target.qty = incoming.qty;
    }
    if row.get(COL_COSTO).is_some() {
        target.costo = incoming.costo;
    }
    target
        .custom_fields
        .extend(incoming.custom_fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    if target.date_added <= 0 {
        target.date_added = incoming.date_added;
    }
}

/// Merge a batch into `products`.
///
/// Rows are matched against the stored products and against products staged
/// earlier in the same batch, on item number OR scan code.
pub fn merge_rows(products: &mut Vec<Product>, rows: &[ImportRow], now_ms: i64) -> ImportReport {
    let mut report = ImportReport::default();
    let mut staged: Vec<Product> = Vec::new();

    for row in rows {
        if row.is_blank() {
            report.skipped += 1;
            continue;
        }
        let incoming = row.to_product(now_ms);

        let target = match products.iter_mut().find(|p| same_product(p, &incoming)) {
            Some(existing) => Some(existing),
            None => staged.iter_mut().find(|p| same_product(p, &incoming)),
        };
        match target {
            Some(existing) => {
                merge_into(existing, &incoming, row);
                report.updated += 1;
            }
            None => staged.push(incoming),
        }
    }

    report.added = staged.len();
    products.extend(staged);
    debug!(
        "Import merged: {} added, {} updated, {} skipped",
        report.added, report.updated, report.skipped
    );
    report
}
