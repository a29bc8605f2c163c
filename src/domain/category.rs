//! Catalog categories and the listing filter expressions built from them.

use serde::{Deserialize, Serialize};

/// A catalog slice enumerated independently (one manufacturer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Short ASCII key used in logs and reports
    pub key: String,
    /// Manufacturer name exactly as the listing filter expects it
    pub manufacturer: String,
}

impl Category {
    pub fn new(key: impl Into<String>, manufacturer: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            manufacturer: manufacturer.into(),
        }
    }
}

/// Listing query for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingQuery {
    pub sort_field: String,
    pub max_mileage: u32,
}

impl Default for ListingQuery {
    fn default() -> Self {
        Self {
            sort_field: "PriceAsc".to_string(),
            max_mileage: 200_000,
        }
    }
}

impl ListingQuery {
    /// Filter expression (`q` parameter): domestic, non-hidden, original listings of one maker
    #[must_use]
    pub fn filter_expression(&self, category: &Category) -> String {
        format!(
            "(And.Hidden.N._.ServiceCopyCar.Original._.(C.CarType.A._.Manufacturer.{}.)_.Mileage.range(0..{}).)",
            category.manufacturer, self.max_mileage
        )
    }

    /// Sort/range expression (`sr` parameter)
    #[must_use]
    pub fn sort_range(&self, offset: u64, limit: u32) -> String {
        format!("|{}|{}|{}", self.sort_field, offset, limit)
    }
}
