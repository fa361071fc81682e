use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{lenient, Photo};
use crate::engine::Record;
use crate::error::{Error, Result};

/// Stored date format for registration and delivery dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a stored date. Full timestamps written by older clients are
/// accepted too.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditStatus {
    #[default]
    Pending,
    Delivered,
}

/// One line of goods received on credit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreditLine {
    #[serde(default, deserialize_with = "lenient::number")]
    pub qty: f64,
    #[serde(default, deserialize_with = "lenient::string")]
    pub desc: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub upc: String,
    /// Last four digits of the scan code.
    #[serde(default, deserialize_with = "lenient::string")]
    pub digits: String,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub photo: Option<Photo>,
}

/// Delivery confirmation stamped onto a credit.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub date: NaiveDate,
    pub notes: String,
    pub photo: Option<Photo>,
}

/// Goods received on credit from a supplier.
///
/// Starts `Pending` and moves to `Delivered` exactly once; there is no way
/// back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credit {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub provider: String,
    #[serde(default)]
    pub products: Vec<CreditLine>,
    /// Registration date, `YYYY-MM-DD`.
    #[serde(default, deserialize_with = "lenient::string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub notes: String,
    #[serde(default)]
    status: CreditStatus,
    #[serde(
        default,
        deserialize_with = "lenient::optional_string",
        skip_serializing_if = "Option::is_none"
    )]
    delivery_date: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::optional_string",
        skip_serializing_if = "Option::is_none"
    )]
    delivery_notes: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::optional_string",
        skip_serializing_if = "Option::is_none"
    )]
    delivery_photo: Option<Photo>,
}

impl Credit {
    pub(crate) fn pending(
        id: String,
        provider: String,
        date: NaiveDate,
        notes: String,
        products: Vec<CreditLine>,
    ) -> Self {
        Self {
            id,
            provider,
            products,
            date: date.format(DATE_FORMAT).to_string(),
            notes,
            status: CreditStatus::Pending,
            delivery_date: None,
            delivery_notes: None,
            delivery_photo: None,
        }
    }

    pub fn status(&self) -> CreditStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status == CreditStatus::Pending
    }

    pub fn delivery_date(&self) -> Option<&str> {
        self.delivery_date.as_deref()
    }

    pub fn delivery_notes(&self) -> Option<&str> {
        self.delivery_notes.as_deref()
    }

    pub fn delivery_photo(&self) -> Option<&str> {
        self.delivery_photo.as_deref()
    }

    pub fn registered_on(&self) -> Option<NaiveDate> {
        parse_date(&self.date)
    }

    /// Whole days between registration and `today`.
    pub fn days_elapsed(&self, today: NaiveDate) -> Option<i64> {
        self.registered_on().map(|date| (today - date).num_days())
    }

    /// The only transition: pending to delivered.
    pub(crate) fn mark_delivered(&mut self, delivery: Delivery) -> Result<()> {
        if self.status == CreditStatus::Delivered {
            return Err(Error::invalid_transition(format!(
                "credit {} is already delivered",
                self.id
            )));
        }
        self.status = CreditStatus::Delivered;
        self.delivery_date = Some(delivery.date.format(DATE_FORMAT).to_string());
        self.delivery_notes = Some(delivery.notes).filter(|n| !n.is_empty());
        self.delivery_photo = delivery.photo;
        Ok(())
    }
}

impl Record for Credit {
    fn identity(&self) -> Option<String> {
        Some(self.id.clone()).filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_delivery_is_one_way() {
        let mut credit = Credit::pending(
            "CR-1".to_string(),
            "Sigma".to_string(),
            date("2024-03-01"),
            String::new(),
            Vec::new(),
        );
        assert!(credit.is_pending());

        let delivery = Delivery {
            date: date("2024-03-05"),
            notes: "completo".to_string(),
            photo: None,
        };
        credit.mark_delivered(delivery.clone()).unwrap();
        assert_eq!(credit.status(), CreditStatus::Delivered);
        assert_eq!(credit.delivery_date(), Some("2024-03-05"));

        let err = credit.mark_delivered(delivery).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
        assert_eq!(credit.status(), CreditStatus::Delivered);
    }

    #[test]
    fn test_wire_shape() {
        let credit = Credit::pending(
            "CR-2".to_string(),
            String::new(),
            date("2024-01-31"),
            "nota".to_string(),
            vec![CreditLine {
                qty: 1.5,
                desc: "Queso".to_string(),
                upc: "750100000001".to_string(),
                digits: "0001".to_string(),
                photo: None,
            }],
        );
        let value = serde_json::to_value(&credit).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["date"], "2024-01-31");
        assert_eq!(value["products"][0]["digits"], "0001");
        assert!(value.get("deliveryDate").is_none());

        let back: Credit = serde_json::from_value(value).unwrap();
        assert_eq!(back, credit);
    }

    #[test]
    fn test_days_elapsed_accepts_timestamps() {
        let credit: Credit = serde_json::from_value(json!({
            "id": "CR-3",
            "date": "2024-03-01T18:30:00.000Z",
            "status": "pending"
        }))
        .unwrap();
        assert_eq!(credit.days_elapsed(date("2024-03-09")), Some(8));

        let undated: Credit = serde_json::from_value(json!({ "id": "CR-4" })).unwrap();
        assert_eq!(undated.days_elapsed(date("2024-03-09")), None);
    }
}
