//! Merging remote change notifications into an in-memory collection

use std::collections::VecDeque;

use catalogo_sync_realtime::{ChangeEvent, ChildSnapshot};
use log::{trace, warn};
use serde_json::Value;

use super::Record;

/// Outcome of applying one change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The whole collection was replaced.
    Replaced,
    Added,
    Removed,
    Changed,
    /// An add for a record that is already present.
    Duplicate,
    /// Nothing to do: malformed payload or unknown record.
    Ignored,
    /// Held back until the initial load completes.
    Deferred,
}

impl Applied {
    /// Whether the collection changed.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Applied::Replaced | Applied::Added | Applied::Removed | Applied::Changed
        )
    }
}

/// Flatten a stored collection into a dense list.
///
/// The remote may hand back a sparse array as a map keyed by index; numeric
/// keys are ordered by value, anything else follows them. Nulls are dropped.
pub fn normalize_children(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.into_iter().filter(|v| !v.is_null()).collect(),
        Value::Object(map) => {
            let mut entries: Vec<(Option<u64>, String, Value)> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.parse().ok(), k, v))
                .collect();
            entries.sort_by(|a, b| match (a.0, b.0) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.1.cmp(&b.1),
            });
            entries.into_iter().map(|(_, _, v)| v).collect()
        }
        Value::Null => Vec::new(),
        other => {
            warn!("Expected a collection, got {}", other);
            Vec::new()
        }
    }
}

/// Decode every element that is a structured record; skip the rest.
pub fn decode_records<T: Record>(values: Vec<Value>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| {
            if !value.is_object() {
                warn!("Skipping non-object record: {}", value);
                return None;
            }
            match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping undecodable record: {}", e);
                    None
                }
            }
        })
        .collect()
}

pub fn decode_collection<T: Record>(value: Value) -> Vec<T> {
    decode_records(normalize_children(value))
}

fn decode_child<T: Record>(child: ChildSnapshot) -> Option<(T, Option<usize>)> {
    let position = child.position();
    let mut decoded = decode_records::<T>(vec![child.value]);
    decoded.pop().map(|record| (record, position))
}

/// Identity match: equal identifiers when both records have one, otherwise
/// equal (name, scan code) attributes.
pub fn same_record<T: Record>(a: &T, b: &T) -> bool {
    match (a.identity(), b.identity()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a.attributes(), b.attributes()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

pub fn apply_added<T: Record>(items: &mut Vec<T>, record: T) -> Applied {
    if items.iter().any(|existing| same_record(existing, &record)) {
        return Applied::Duplicate;
    }
    items.push(record);
    Applied::Added
}

/// Remove by position when the slot still holds the record, by identity when
/// there is no usable hint. A position past the end means the slot is
/// already gone.
pub fn apply_removed<T: Record>(items: &mut Vec<T>, record: &T, position: Option<usize>) -> Applied {
    if let Some(pos) = position {
        if pos >= items.len() {
            return Applied::Ignored;
        }
        if items[pos] == *record || same_record(&items[pos], record) {
            items.remove(pos);
            return Applied::Removed;
        }
    }
    match items.iter().position(|existing| same_record(existing, record)) {
        Some(index) => {
            items.remove(index);
            Applied::Removed
        }
        None => Applied::Ignored,
    }
}

/// Overwrite the slot at `position` when it still holds the same record,
/// otherwise the matching record wherever it is, otherwise append.
pub fn apply_changed<T: Record>(items: &mut Vec<T>, record: T, position: Option<usize>) -> Applied {
    if let Some(pos) = position.filter(|pos| *pos < items.len()) {
        if same_record(&items[pos], &record) {
            items[pos] = record;
            return Applied::Changed;
        }
    }
    match items.iter().position(|existing| same_record(existing, &record)) {
        Some(index) => {
            items[index] = record;
            Applied::Changed
        }
        None => {
            items.push(record);
            Applied::Added
        }
    }
}

/// Apply one notification with no gating.
pub fn apply_event<T: Record>(items: &mut Vec<T>, event: ChangeEvent) -> Applied {
    let applied = match event {
        ChangeEvent::Value(value) => {
            *items = decode_collection(value);
            Applied::Replaced
        }
        ChangeEvent::ChildAdded(child) => match decode_child(child) {
            Some((record, _)) => apply_added(items, record),
            None => Applied::Ignored,
        },
        ChangeEvent::ChildRemoved(child) => match decode_child::<T>(child) {
            Some((record, position)) => apply_removed(items, &record, position),
            None => Applied::Ignored,
        },
        ChangeEvent::ChildChanged(child) => match decode_child(child) {
            Some((record, position)) => apply_changed(items, record, position),
            None => Applied::Ignored,
        },
    };
    trace!("Applied remote change: {:?}", applied);
    applied
}

/// Documents written by this client whose value notification has not come
/// back yet. Older entries are dropped past this length.
const MAX_PENDING_ECHOES: usize = 64;

/// Null, empty arrays and empty maps all mean "no children".
fn same_document(a: &Value, b: &Value) -> bool {
    fn is_empty(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
    a == b || (is_empty(a) && is_empty(b))
}

/// Initial-load gate.
///
/// While closed, notifications are queued in arrival order. Opening the gate
/// replays them against the freshly loaded collection; replayed adds go
/// through the duplicate guard like any other.
///
/// The gate also remembers whole documents this client wrote. When the
/// matching value notification arrives it is dropped, along with any older
/// pending write, since the live array already holds something at least as
/// new. A value that matches none of them came from another client; it is
/// applied and the pending list is cleared.
#[derive(Debug, Default)]
pub struct Reconciler {
    open: bool,
    deferred: Vec<ChangeEvent>,
    echoes: VecDeque<Value>,
}

impl Reconciler {
    /// A closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn pending_echoes(&self) -> usize {
        self.echoes.len()
    }

    /// Close the gate and forget anything queued, ahead of a reload.
    pub fn close(&mut self) {
        self.open = false;
        self.deferred.clear();
        self.echoes.clear();
    }

    /// Record a whole document about to be written by this client.
    pub fn expect_echo(&mut self, value: Value) {
        if self.echoes.len() == MAX_PENDING_ECHOES {
            self.echoes.pop_front();
        }
        self.echoes.push_back(value);
    }

    /// Drop a document whose write never reached the remote store.
    pub fn forget_echo(&mut self, value: &Value) {
        if let Some(index) = self.echoes.iter().rposition(|pending| pending == value) {
            self.echoes.remove(index);
        }
    }

    pub fn handle<T: Record>(&mut self, items: &mut Vec<T>, event: ChangeEvent) -> Applied {
        if !self.open {
            self.deferred.push(event);
            return Applied::Deferred;
        }
        self.apply(items, event)
    }

    /// Open the gate, replaying whatever arrived while it was closed.
    pub fn open<T: Record>(&mut self, items: &mut Vec<T>) -> Vec<Applied> {
        self.open = true;
        std::mem::take(&mut self.deferred)
            .into_iter()
            .map(|event| self.apply(items, event))
            .collect()
    }

    fn apply<T: Record>(&mut self, items: &mut Vec<T>, event: ChangeEvent) -> Applied {
        if let ChangeEvent::Value(value) = &event {
            if let Some(index) = self.echoes.iter().position(|pending| same_document(pending, value)) {
                self.echoes.drain(..=index);
                trace!("Skipped echo of own write ({} still pending)", self.echoes.len());
                return Applied::Ignored;
            }
            self.echoes.clear();
        }
        apply_event(items, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Offer {
        #[serde(default)]
        id: u64,
        #[serde(default)]
        name: String,
        #[serde(default)]
        upc: String,
        #[serde(default)]
        price: f64,
    }

    impl Record for Offer {
        fn identity(&self) -> Option<String> {
            (self.id > 0).then(|| self.id.to_string())
        }

        fn attributes(&self) -> Option<(String, String)> {
            if self.name.is_empty() && self.upc.is_empty() {
                None
            } else {
                Some((self.name.clone(), self.upc.clone()))
            }
        }
    }

    fn offer(id: u64, name: &str, price: f64) -> Offer {
        Offer {
            id,
            name: name.to_string(),
            upc: "750100000001".to_string(),
            price,
        }
    }

    fn added(key: &str, offer: &Offer) -> ChangeEvent {
        ChangeEvent::ChildAdded(ChildSnapshot::new(key, serde_json::to_value(offer).unwrap()))
    }

    #[test]
    fn test_repeated_add_is_idempotent() {
        let mut items: Vec<Offer> = Vec::new();
        let a = offer(1, "Pozole", 10.0);
        assert_eq!(apply_event(&mut items, added("0", &a)), Applied::Added);
        assert_eq!(apply_event(&mut items, added("0", &a)), Applied::Duplicate);
        assert_eq!(items, vec![a]);
    }

    #[test]
    fn test_restock_with_new_id_is_not_a_duplicate() {
        // Same name and scan code from another supplier is a distinct offer.
        let mut items = vec![offer(1, "Pozole", 10.0)];
        let restock = offer(2, "Pozole", 12.5);
        assert_eq!(apply_added(&mut items, restock), Applied::Added);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_attribute_fallback_without_ids() {
        let mut items = vec![offer(0, "Pozole", 10.0)];
        assert_eq!(
            apply_added(&mut items, offer(0, "Pozole", 11.0)),
            Applied::Duplicate
        );
    }

    #[test]
    fn test_remove_by_position_and_by_identity() {
        let a = offer(1, "A", 1.0);
        let b = offer(2, "B", 2.0);
        let c = offer(3, "C", 3.0);

        let mut items = vec![a.clone(), b.clone(), c.clone()];
        assert_eq!(apply_removed(&mut items, &b, Some(1)), Applied::Removed);
        assert_eq!(items, vec![a.clone(), c.clone()]);

        // Stale hint: slot 0 holds a different record, fall back to identity.
        let mut items = vec![a.clone(), b.clone(), c.clone()];
        assert_eq!(apply_removed(&mut items, &c, Some(0)), Applied::Removed);
        assert_eq!(items, vec![a.clone(), b.clone()]);

        // No hint at all.
        let mut items = vec![a.clone(), b.clone()];
        assert_eq!(apply_removed(&mut items, &a, None), Applied::Removed);
        assert_eq!(items, vec![b]);
    }

    #[test]
    fn test_remove_past_end_is_ignored() {
        let a = offer(1, "A", 1.0);
        let c = offer(3, "C", 3.0);
        let mut items = vec![a.clone(), c.clone()];
        assert_eq!(apply_removed(&mut items, &c, Some(2)), Applied::Ignored);
        assert_eq!(items, vec![a, c]);
    }

    #[test]
    fn test_remote_shift_after_middle_removal_converges() {
        let a = offer(1, "A", 1.0);
        let b = offer(2, "B", 2.0);
        let c = offer(3, "C", 3.0);
        let mut items = vec![a.clone(), b.clone(), c.clone()];

        // The departed record is removed at its old slot first, then the
        // shifted one is reported as changed at its new slot.
        let b_value = serde_json::to_value(&b).unwrap();
        let c_value = serde_json::to_value(&c).unwrap();
        assert_eq!(
            apply_event(
                &mut items,
                ChangeEvent::ChildRemoved(ChildSnapshot::new("1", b_value)),
            ),
            Applied::Removed
        );
        assert_eq!(
            apply_event(
                &mut items,
                ChangeEvent::ChildChanged(ChildSnapshot::new("1", c_value)),
            ),
            Applied::Changed
        );
        assert_eq!(items, vec![a, c]);
    }

    #[test]
    fn test_changed_with_stale_hint_updates_matching_record() {
        let a = offer(1, "A", 1.0);
        let c = offer(3, "C", 3.0);
        let d = offer(4, "D", 4.0);
        let mut items = vec![a.clone(), c.clone(), d];

        // Slot 1 holds id 3 locally; the change is for id 4.
        let repriced = offer(4, "D", 8.5);
        let event = ChangeEvent::ChildChanged(ChildSnapshot::new(
            "1",
            serde_json::to_value(&repriced).unwrap(),
        ));
        assert_eq!(apply_event(&mut items, event), Applied::Changed);
        assert_eq!(items, vec![a, c, repriced]);
    }

    #[test]
    fn test_changed_without_hint_updates_or_appends() {
        let mut items = vec![offer(1, "A", 1.0)];
        assert_eq!(
            apply_changed(&mut items, offer(1, "A", 9.0), None),
            Applied::Changed
        );
        assert_eq!(items[0].price, 9.0);
        assert_eq!(
            apply_changed(&mut items, offer(2, "B", 2.0), Some(7)),
            Applied::Added
        );
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_non_object_payloads_are_ignored() {
        let mut items: Vec<Offer> = Vec::new();
        let event = ChangeEvent::ChildAdded(ChildSnapshot::new("0", Value::Null));
        assert_eq!(apply_event(&mut items, event), Applied::Ignored);
        let event = ChangeEvent::ChildChanged(ChildSnapshot::new("0", json!("text")));
        assert_eq!(apply_event(&mut items, event), Applied::Ignored);
        assert!(items.is_empty());
    }

    #[test]
    fn test_sparse_map_is_normalized_in_index_order() {
        let value = json!({
            "10": { "id": 3 },
            "2": { "id": 2 },
            "0": { "id": 1 },
            "5": null
        });
        let items: Vec<Offer> = decode_collection(value);
        let ids: Vec<u64> = items.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_gate_defers_until_open() {
        let a = offer(1, "A", 1.0);
        let b = offer(2, "B", 2.0);
        let mut gate = Reconciler::new();
        let mut items: Vec<Offer> = Vec::new();

        assert_eq!(gate.handle(&mut items, added("0", &a)), Applied::Deferred);
        assert_eq!(gate.handle(&mut items, added("1", &b)), Applied::Deferred);
        assert!(items.is_empty());
        assert_eq!(gate.deferred_len(), 2);

        // The initial read already contains `a`.
        items.push(a.clone());
        let replayed = gate.open(&mut items);
        assert_eq!(replayed, vec![Applied::Duplicate, Applied::Added]);
        assert_eq!(items, vec![a.clone(), b]);
        assert_eq!(gate.handle(&mut items, added("0", &a)), Applied::Duplicate);
    }

    #[test]
    fn test_own_write_echoes_are_skipped() {
        let first = json!([{ "id": 1, "name": "A" }]);
        let second = json!([{ "id": 1, "name": "A" }, { "id": 2, "name": "B" }]);
        let mut gate = Reconciler::new();
        let mut items: Vec<Offer> = Vec::new();
        gate.open(&mut items);

        items.push(offer(1, "A", 0.0));
        gate.expect_echo(first.clone());
        items.push(offer(2, "B", 0.0));
        gate.expect_echo(second.clone());

        // The older echo lands after the newer write; the array keeps both.
        assert_eq!(gate.handle(&mut items, ChangeEvent::Value(first)), Applied::Ignored);
        assert_eq!(items.len(), 2);
        assert_eq!(gate.pending_echoes(), 1);
        assert_eq!(gate.handle(&mut items, ChangeEvent::Value(second)), Applied::Ignored);
        assert_eq!(gate.pending_echoes(), 0);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_foreign_value_is_applied_and_clears_pending_writes() {
        let mut gate = Reconciler::new();
        let mut items = vec![offer(1, "A", 0.0)];
        gate.open(&mut items);
        gate.expect_echo(json!([{ "id": 1, "name": "A" }]));
        gate.expect_echo(json!([]));
        gate.forget_echo(&json!([]));
        assert_eq!(gate.pending_echoes(), 1);

        let applied = gate.handle(&mut items, ChangeEvent::Value(json!([{ "id": 9 }])));
        assert_eq!(applied, Applied::Replaced);
        assert_eq!(items[0].id, 9);
        assert_eq!(gate.pending_echoes(), 0);
    }

    #[test]
    fn test_empty_write_matches_null_echo() {
        let mut gate = Reconciler::new();
        let mut items: Vec<Offer> = Vec::new();
        gate.open(&mut items);
        gate.expect_echo(json!([]));
        assert_eq!(gate.handle(&mut items, ChangeEvent::Value(Value::Null)), Applied::Ignored);
    }

    #[test]
    fn test_value_event_replaces_everything() {
        let mut items = vec![offer(1, "A", 1.0)];
        let applied = apply_event(
            &mut items,
            ChangeEvent::Value(json!([{ "id": 7, "name": "Z" }])),
        );
        assert_eq!(applied, Applied::Replaced);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, 7);
    }
}
