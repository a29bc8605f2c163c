//! Presence ledger entities.
//!
//! `car_state` remembers every listing ever seen: when it first appeared,
//! when it was last sighted and whether it is currently listed upstream.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Active,
    Inactive,
}

impl ItemStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown item status: {0}")]
pub struct UnknownItemStatus(pub String);

impl FromStr for ItemStatus {
    type Err = UnknownItemStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            other => Err(UnknownItemStatus(other.to_string())),
        }
    }
}

/// One row of the presence ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    pub car_id: String,
    pub first_seen_at: NaiveDateTime,
    pub last_seen_at: NaiveDateTime,
    pub status: ItemStatus,
    pub last_change_at: NaiveDateTime,
}

/// Split of one listing page against the ledger.
///
/// `new_ids` keeps page order. `reappeared_ids` holds ids the ledger knows
/// but does not consider ACTIVE. Everything else on the page is unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageClassification {
    pub new_ids: Vec<String>,
    pub reappeared_ids: Vec<String>,
}

impl PageClassification {
    /// `existing` maps ids already in the ledger to their raw status text.
    /// Anything other than exactly `ACTIVE` counts as not active.
    #[must_use]
    pub fn classify(page_ids: &[String], existing: &HashMap<String, String>) -> Self {
        let mut classification = Self::default();
        for id in page_ids {
            match existing.get(id) {
                None => classification.new_ids.push(id.clone()),
                Some(status) if status != ItemStatus::Active.as_str() => {
                    classification.reappeared_ids.push(id.clone());
                }
                Some(_) => {}
            }
        }
        classification
    }

    /// Drops ids for which `keep` returns false from both sets
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.new_ids.retain(|id| keep(id));
        self.reappeared_ids.retain(|id| keep(id));
    }

    /// New ids followed by reappeared ids, the order they are enqueued in
    #[must_use]
    pub fn queue_candidates(&self) -> Vec<String> {
        self.new_ids
            .iter()
            .chain(self.reappeared_ids.iter())
            .cloned()
            .collect()
    }
}
