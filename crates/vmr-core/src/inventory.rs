//! Inventory snapshots pushed by the device.
//!
//! A snapshot always replaces the previous one wholesale. Anything that does
//! not parse as `{"items": [{id, name, price, count}, ...]}` collapses to the
//! empty snapshot through [`InventorySnapshot::parse_or_empty`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::command::Command;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: u64,
    pub name: String,
    /// Minor currency units.
    pub price: u64,
    pub count: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedSnapshot {
    #[error("invalid snapshot payload: {0}")]
    Invalid(String),
    #[error("item id 0 is not allowed")]
    ZeroId,
    #[error("duplicate item id {0}")]
    DuplicateId(u64),
}

#[derive(Deserialize)]
struct SnapshotWire {
    items: Vec<InventoryItem>,
}

#[derive(Serialize)]
struct SnapshotWireRef<'a> {
    items: Vec<&'a InventoryItem>,
}

/// The set of items on the machine, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    items: BTreeMap<u64, InventoryItem>,
}

impl InventorySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from items, enforcing positive unique ids.
    pub fn from_items<I>(items: I) -> Result<Self, MalformedSnapshot>
    where
        I: IntoIterator<Item = InventoryItem>,
    {
        let mut map = BTreeMap::new();
        for item in items {
            if item.id == 0 {
                return Err(MalformedSnapshot::ZeroId);
            }
            let id = item.id;
            if map.insert(id, item).is_some() {
                return Err(MalformedSnapshot::DuplicateId(id));
            }
        }
        Ok(Self { items: map })
    }

    pub fn parse(payload: &[u8]) -> Result<Self, MalformedSnapshot> {
        let wire: SnapshotWire = serde_json::from_slice(payload)
            .map_err(|e| MalformedSnapshot::Invalid(e.to_string()))?;
        Self::from_items(wire.items)
    }

    /// Parse, degrading to the empty snapshot on any error.
    pub fn parse_or_empty(payload: &[u8]) -> Self {
        match Self::parse(payload) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(error = %e, "malformed inventory snapshot, using empty inventory");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SnapshotWireRef {
            items: self.items.values().collect(),
        })
    }

    /// Items in ascending id order.
    pub fn items(&self) -> impl Iterator<Item = &InventoryItem> {
        self.items.values()
    }

    pub fn get(&self, id: u64) -> Option<&InventoryItem> {
        self.items.get(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Apply the local effect a command is expected to have once the device
    /// acts on it. Only used for the operator's provisional view; the next
    /// pushed snapshot overrides it.
    pub fn apply_optimistic(&mut self, command: &Command) {
        match command {
            Command::AddItem {
                id,
                name,
                price,
                count,
            } => {
                if *id == 0 {
                    return;
                }
                self.items
                    .entry(*id)
                    .and_modify(|item| item.count = item.count.saturating_add(*count))
                    .or_insert_with(|| InventoryItem {
                        id: *id,
                        name: name.clone(),
                        price: *price,
                        count: *count,
                    });
            }
            Command::RemoveItem(id) => {
                self.items.remove(id);
            }
            Command::ChangePrice { id, price } => {
                if let Some(item) = self.items.get_mut(id) {
                    item.price = *price;
                }
            }
            Command::Status
            | Command::Reboot
            | Command::Shutdown
            | Command::RequestAdminState
            | Command::EndAdminState => {}
        }
    }
}
