//! Supplier credits: goods received on credit, pending until delivered

use std::sync::Arc;

use chrono::NaiveDate;
use log::info;
use tokio::sync::broadcast;

use crate::catalog::{CatalogEntry, CatalogIndex};
use crate::engine::{CollectionEvent, SyncEngine};
use crate::error::{Error, Result};
use crate::models::lenient::parse_decimal;
use crate::models::{
    is_valid_upc, random_base36, to_base36, validate_photo, Credit, CreditLine, Delivery,
};
use crate::store::{CollectionName, Durability, Storage};

/// `CR-` + creation time in base 36 + nine random upper-case characters.
pub fn generate_credit_id(now_ms: i64) -> String {
    format!(
        "CR-{}{}",
        to_base36(now_ms.max(0) as u64),
        random_base36(9).to_uppercase()
    )
}

/// How long a pending credit has been waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Under a week.
    Ok,
    /// One to two weeks.
    Warning,
    /// Two weeks or more.
    Urgent,
}

impl Urgency {
    pub fn from_days(days: i64) -> Self {
        if days < 7 {
            Urgency::Ok
        } else if days < 14 {
            Urgency::Warning
        } else {
            Urgency::Urgent
        }
    }
}

/// Age filter for the pending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgeFilter {
    #[default]
    All,
    /// Less than 7 days.
    Week1,
    /// 7 to 13 days.
    Week2,
    /// 14 days or more.
    Week3,
}

impl AgeFilter {
    /// Credits without a readable date only pass `All`.
    pub fn matches(&self, days: Option<i64>) -> bool {
        match (self, days) {
            (AgeFilter::All, _) => true,
            (_, None) => false,
            (AgeFilter::Week1, Some(d)) => d < 7,
            (AgeFilter::Week2, Some(d)) => (7..14).contains(&d),
            (AgeFilter::Week3, Some(d)) => d >= 14,
        }
    }
}

/// Result of looking up a typed scan code to fill in a line description.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoFill {
    /// Nothing typed yet.
    Empty,
    /// Not a 12-13 digit code; the description stays manual.
    InvalidCode,
    Matched(CatalogEntry),
    /// Valid code, unknown product; the description stays manual.
    NotFound,
}

/// Suggest a description for a credit line from the catalog. Never blocks
/// submission.
pub fn suggest_description(index: &CatalogIndex, code: &str) -> AutoFill {
    let code = code.trim();
    if code.is_empty() {
        AutoFill::Empty
    } else if !is_valid_upc(code) {
        AutoFill::InvalidCode
    } else {
        match index.lookup(code) {
            Some(entry) => AutoFill::Matched(entry),
            None => AutoFill::NotFound,
        }
    }
}

/// One line of the registration form, as typed.
#[derive(Debug, Clone, Default)]
pub struct CreditLineDraft {
    pub qty: String,
    pub desc: String,
    pub upc: String,
    /// Embedded `data:` image.
    pub photo: Option<String>,
}

/// Registration form input.
#[derive(Debug, Clone)]
pub struct CreditDraft {
    /// Optional.
    pub provider: String,
    pub date: NaiveDate,
    pub notes: String,
    pub lines: Vec<CreditLineDraft>,
}

impl CreditLineDraft {
    fn validate(&self, number: usize) -> Result<CreditLine> {
        let qty = self.qty.trim();
        let desc = self.desc.trim();
        let upc = self.upc.trim();
        if qty.is_empty() || desc.is_empty() || upc.is_empty() {
            return Err(Error::validation(format!(
                "line {}: quantity, description and scan code are required",
                number
            )));
        }
        let qty = parse_decimal(qty)
            .ok_or_else(|| Error::validation(format!("line {}: quantity must be a number", number)))?;
        if !is_valid_upc(upc) {
            return Err(Error::validation(format!(
                "line {}: scan code must be 12 or 13 digits",
                number
            )));
        }
        let photo = match self.photo.as_deref().map(str::trim) {
            Some(photo) if !photo.is_empty() => {
                validate_photo(photo)?;
                Some(photo.to_string())
            }
            _ => None,
        };

        Ok(CreditLine {
            qty,
            desc: desc.to_string(),
            upc: upc.to_string(),
            digits: upc[upc.len() - 4..].to_string(),
            photo,
        })
    }
}

pub struct Credits {
    engine: SyncEngine<Credit>,
    overdue_after_days: i64,
}

impl Credits {
    pub fn new(storage: Arc<Storage>, overdue_after_days: i64) -> Self {
        Self {
            engine: SyncEngine::new(CollectionName::Credits, storage),
            overdue_after_days,
        }
    }

    /// Write access stays in this crate so deliveries only go through
    /// [`Credits::deliver`].
    pub(crate) fn engine(&self) -> &SyncEngine<Credit> {
        &self.engine
    }

    /// Subscribe to change notifications for the credits collection.
    pub fn changes(&self) -> broadcast::Receiver<CollectionEvent> {
        self.engine.changes()
    }

    pub async fn items(&self) -> Vec<Credit> {
        self.engine.items().await
    }

    pub async fn get(&self, id: &str) -> Option<Credit> {
        self.engine.find(|c| c.id == id).await
    }

    /// Register a pending credit. Every line is validated before anything is
    /// touched; a rejected draft changes nothing and writes nothing.
    pub async fn register_credit(&self, draft: &CreditDraft, now_ms: i64) -> Result<(Credit, Durability)> {
        if draft.lines.is_empty() {
            return Err(Error::validation("a credit needs at least one line"));
        }
        let lines = draft
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| line.validate(i + 1))
            .collect::<Result<Vec<_>>>()?;

        let credit = Credit::pending(
            generate_credit_id(now_ms),
            draft.provider.trim().to_string(),
            draft.date,
            draft.notes.trim().to_string(),
            lines,
        );
        let created = credit.clone();
        let ((), durability) = self
            .engine
            .mutate(move |items| {
                items.push(credit);
                Ok(())
            })
            .await?;
        info!("Registered credit {} with {} line(s)", created.id, created.products.len());
        Ok((created, durability))
    }

    /// Mark a pending credit delivered. Delivered credits are final.
    pub async fn deliver(&self, id: &str, delivery: Delivery) -> Result<(Credit, Durability)> {
        if let Some(photo) = delivery.photo.as_deref() {
            validate_photo(photo)?;
        }
        let (credit, durability) = self
            .engine
            .mutate(|items| {
                let credit = items
                    .iter_mut()
                    .find(|c| c.id == id)
                    .ok_or_else(|| Error::not_found(format!("credit {}", id)))?;
                credit.mark_delivered(delivery)?;
                Ok(credit.clone())
            })
            .await?;
        info!("Credit {} delivered", credit.id);
        Ok((credit, durability))
    }

    /// Pending credits matching an age filter and a search term.
    pub async fn pending(&self, filter: AgeFilter, term: &str, today: NaiveDate) -> Vec<Credit> {
        let term = term.trim().to_lowercase();
        self.engine
            .read(|items| {
                items
                    .iter()
                    .filter(|c| c.is_pending())
                    .filter(|c| filter.matches(c.days_elapsed(today)))
                    .filter(|c| term.is_empty() || matches_term(c, &term, true))
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Delivered credits matching a search term.
    pub async fn history(&self, term: &str) -> Vec<Credit> {
        let term = term.trim().to_lowercase();
        self.engine
            .read(|items| {
                items
                    .iter()
                    .filter(|c| !c.is_pending())
                    .filter(|c| term.is_empty() || matches_term(c, &term, false))
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Pending credits older than the overdue threshold.
    pub async fn overdue(&self, today: NaiveDate) -> Vec<Credit> {
        let limit = self.overdue_after_days;
        self.engine
            .read(|items| {
                items
                    .iter()
                    .filter(|c| c.is_pending())
                    .filter(|c| matches!(c.days_elapsed(today), Some(d) if d > limit))
                    .cloned()
                    .collect()
            })
            .await
    }
}

fn matches_term(credit: &Credit, term: &str, include_notes: bool) -> bool {
    credit.provider.to_lowercase().contains(term)
        || credit.products.iter().any(|line| {
            line.desc.to_lowercase().contains(term)
                || line.upc.contains(term)
                || line.digits.contains(term)
        })
        || (include_notes && credit.notes.to_lowercase().contains(term))
}
