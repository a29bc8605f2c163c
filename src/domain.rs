//! Domain module - Core entities of the crawl state machine
//!
//! Queue entries, the presence ledger, detail resources, field extraction
//! rules and the traits the upstream endpoints are reached through.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod category;
pub mod detail;
pub mod errors;
pub mod extract;
pub mod item_state;
pub mod queue;
pub mod upstream;

pub use category::{Category, ListingQuery};
pub use detail::{DetailKind, DetailRecord, DetailRequest};
pub use errors::FetchError;
pub use item_state::{ItemState, ItemStatus, PageClassification};
pub use queue::{QueueCounts, QueueEntry, QueueStatus};
pub use upstream::{CatalogSource, DetailSource};
