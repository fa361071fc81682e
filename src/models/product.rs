use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::lenient;
use crate::engine::Record;

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub item_number: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub description: String,
    /// Scan code. Optional; products without one are not indexed.
    #[serde(default, deserialize_with = "lenient::string")]
    pub upc: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub nombre: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub size: String,
    #[serde(default, deserialize_with = "lenient::integer")]
    pub qty: i64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub costo: f64,
    /// Image reference.
    #[serde(default, deserialize_with = "lenient::string")]
    pub url: String,
    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "String::is_empty"
    )]
    pub proveedor: String,
    #[serde(default, deserialize_with = "lenient::string_map")]
    pub custom_fields: BTreeMap<String, String>,
    /// Creation time, milliseconds since the Unix epoch.
    #[serde(default, deserialize_with = "lenient::integer")]
    pub date_added: i64,
}

impl Product {
    /// Created less than `window` before `now_ms`.
    pub fn is_new(&self, now_ms: i64, window: Duration) -> bool {
        if self.date_added <= 0 {
            return false;
        }
        now_ms - self.date_added < window.as_millis() as i64
    }
}

impl Record for Product {
    fn identity(&self) -> Option<String> {
        Some(self.id.clone()).filter(|id| !id.is_empty())
    }

    fn attributes(&self) -> Option<(String, String)> {
        if self.nombre.is_empty() && self.upc.is_empty() {
            None
        } else {
            Some((self.nombre.clone(), self.upc.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_tolerates_foreign_shapes() {
        let product: Product = serde_json::from_value(json!({
            "id": "lq3k2abc",
            "itemNumber": 4411,
            "upc": "000000000001",
            "nombre": "Agua",
            "size": null,
            "qty": "12",
            "costo": "3,50",
            "customFields": { "PALIMEX": "Sur", "Lote": 7, "Vacío": null },
            "dateAdded": 1700000000000u64
        }))
        .unwrap();

        assert_eq!(product.item_number, "4411");
        assert_eq!(product.size, "");
        assert_eq!(product.qty, 12);
        assert_eq!(product.costo, 3.5);
        assert_eq!(product.custom_fields.get("Lote").map(String::as_str), Some("7"));
        assert!(!product.custom_fields.contains_key("Vacío"));
    }

    #[test]
    fn test_malformed_numbers_default_to_zero() {
        let product: Product =
            serde_json::from_value(json!({ "qty": "lots", "costo": {} })).unwrap();
        assert_eq!(product.qty, 0);
        assert_eq!(product.costo, 0.0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let product = Product {
            id: "p1".to_string(),
            item_number: "A1".to_string(),
            date_added: 5,
            ..Default::default()
        };
        let value = serde_json::to_value(&product).unwrap();
        assert_eq!(value["itemNumber"], "A1");
        assert_eq!(value["dateAdded"], 5);
        assert_eq!(value["customFields"], json!({}));
        assert!(value.get("proveedor").is_none());
    }

    #[test]
    fn test_is_new_window() {
        let week = Duration::from_secs(7 * 24 * 3600);
        let now = 1_700_000_000_000;
        let mut product = Product {
            date_added: now - 1000,
            ..Default::default()
        };
        assert!(product.is_new(now, week));
        product.date_added = now - week.as_millis() as i64;
        assert!(!product.is_new(now, week));
        product.date_added = 0;
        assert!(!product.is_new(now, week));
    }
}
