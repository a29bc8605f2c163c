//! Encar Tracker - catalog enumeration and detail collection for Encar listings
//!
//! Enumerates the listing catalog per manufacturer, keeps a presence ledger
//! of every listing ever seen, and drains a durable SQLite work queue that
//! fetches the detail records of each listing.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
pub mod test_utils;
