use serde::{Deserialize, Serialize};

use super::lenient;
use crate::engine::Record;

/// A special-price offer.
///
/// Older clients wrote `provider` and `product`; both are read as aliases.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Especial {
    #[serde(default, deserialize_with = "lenient::integer")]
    pub id_price: i64,
    #[serde(default, alias = "product", deserialize_with = "lenient::string")]
    pub nombre: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub upc: String,
    /// Previous price.
    #[serde(default, deserialize_with = "lenient::number")]
    pub antes: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub price: f64,
    #[serde(rename = "imageUrl", default, deserialize_with = "lenient::string")]
    pub image_url: String,
    #[serde(default, alias = "provider", deserialize_with = "lenient::string")]
    pub proveedor: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub notas: String,
}

impl Record for Especial {
    fn identity(&self) -> Option<String> {
        (self.id_price > 0).then(|| self.id_price.to_string())
    }

    fn attributes(&self) -> Option<(String, String)> {
        if self.nombre.is_empty() && self.upc.is_empty() {
            None
        } else {
            Some((self.nombre.clone(), self.upc.clone()))
        }
    }
}
