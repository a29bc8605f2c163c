//! Application layer module
//!
//! Run-level use cases that drive the crawl state machine: catalog
//! enumeration, detail fetching and operator maintenance.

pub mod detail_worker;
pub mod enumerator;
pub mod maintenance;
pub mod pacing;

pub use detail_worker::{DetailWorker, ItemError, WorkerContext, WorkerReport};
pub use enumerator::{CatalogEnumerator, CategoryReport, EnumerationContext, EnumerationError, EnumerationReport};
pub use maintenance::{Maintenance, StoreStats};
