//! Detail resources fetched per listing and how they are stored.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Marker stored in `payload._meta` when upstream confirmed a resource does not exist
pub const NOT_FOUND_MARKER: &str = "NOT_FOUND";

/// Detail resource kinds, one raw table each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailKind {
    /// Primary vehicle record, required for every listing
    Vehicle,
    /// Performance inspection report
    Inspection,
    /// Ownership / accident history, needs the vehicle number
    Record,
    /// Paid options chosen for the listing
    OptionsChoice,
    /// Seller profile, keyed by seller id rather than listing id
    Seller,
}

impl DetailKind {
    pub const ALL: [Self; 5] = [
        Self::Vehicle,
        Self::Inspection,
        Self::Record,
        Self::OptionsChoice,
        Self::Seller,
    ];

    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle_raw",
            Self::Inspection => "inspection_raw",
            Self::Record => "record_raw",
            Self::OptionsChoice => "options_choice_raw",
            Self::Seller => "user_raw",
        }
    }

    #[must_use]
    pub const fn key_column(self) -> &'static str {
        match self {
            Self::Seller => "user_id",
            _ => "car_id",
        }
    }
}

impl fmt::Display for DetailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vehicle => "vehicle",
            Self::Inspection => "inspection",
            Self::Record => "record",
            Self::OptionsChoice => "options_choice",
            Self::Seller => "seller",
        };
        f.write_str(name)
    }
}

/// One upstream detail call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DetailRequest {
    Vehicle { car_id: String },
    Inspection { car_id: String },
    Record { car_id: String, vehicle_no: String },
    OptionsChoice { car_id: String },
    Seller { user_id: String },
}

impl DetailRequest {
    #[must_use]
    pub const fn kind(&self) -> DetailKind {
        match self {
            Self::Vehicle { .. } => DetailKind::Vehicle,
            Self::Inspection { .. } => DetailKind::Inspection,
            Self::Record { .. } => DetailKind::Record,
            Self::OptionsChoice { .. } => DetailKind::OptionsChoice,
            Self::Seller { .. } => DetailKind::Seller,
        }
    }

    /// Value of the table key column for this request
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Vehicle { car_id }
            | Self::Inspection { car_id }
            | Self::Record { car_id, .. }
            | Self::OptionsChoice { car_id } => car_id,
            Self::Seller { user_id } => user_id,
        }
    }
}

/// A fetched payload waiting to be upserted inside an item transaction
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRecord {
    pub kind: DetailKind,
    pub key: String,
    pub payload: Value,
    /// Only set for [`DetailKind::Record`]
    pub vehicle_no: Option<String>,
}

impl DetailRecord {
    #[must_use]
    pub fn new(request: &DetailRequest, payload: Value) -> Self {
        let vehicle_no = match request {
            DetailRequest::Record { vehicle_no, .. } => Some(vehicle_no.clone()),
            _ => None,
        };
        Self {
            kind: request.kind(),
            key: request.key().to_string(),
            payload,
            vehicle_no,
        }
    }

    /// Terminal "confirmed absent upstream" record
    #[must_use]
    pub fn not_found(request: &DetailRequest) -> Self {
        Self::new(request, not_found_payload())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        is_not_found_payload(&self.payload)
    }
}

#[must_use]
pub fn not_found_payload() -> Value {
    json!({ "_meta": NOT_FOUND_MARKER })
}

#[must_use]
pub fn is_not_found_payload(payload: &Value) -> bool {
    payload.get("_meta").and_then(Value::as_str) == Some(NOT_FOUND_MARKER)
}
