//! Field extraction from loosely-shaped upstream JSON.
//!
//! Upstream responses are not consistent about key casing or nesting, so
//! each derived field is described by an ordered list of candidate paths.
//! The first path whose value passes the field's acceptance check wins.

use serde_json::Value;

/// Path of object keys from the document root
pub type JsonPath = &'static [&'static str];

const ITEM_LIST_PATHS: &[JsonPath] = &[
    &["SearchResults"],
    &["searchResults"],
    &["items"],
    &["cars"],
    &["Data", "SearchResults"],
    &["data", "SearchResults"],
    &["data", "items"],
];

const ITEM_ID_PATHS: &[JsonPath] = &[
    &["Id"],
    &["id"],
    &["CarId"],
    &["carId"],
    &["Vehicle", "Id"],
    &["Vehicle", "id"],
];

const TOTAL_COUNT_PATHS: &[JsonPath] = &[
    &["common", "totalCount"],
    &["Common", "TotalCount"],
    &["totalCount"],
    &["TotalCount"],
    &["count"],
    &["Count"],
];

const SELLER_ID_PATHS: &[JsonPath] = &[
    &["contact", "userId"],
    &["contact", "UserId"],
    &["partnership", "dealer", "userId"],
    &["partnership", "dealer", "UserId"],
    &["userId"],
    &["UserId"],
    &["sellerUserId"],
    &["SellerUserId"],
    &["dealerUserId"],
    &["DealerUserId"],
    &["Seller", "userId"],
    &["Seller", "UserId"],
    &["Dealer", "userId"],
    &["Dealer", "UserId"],
    &["seller", "userId"],
    &["dealer", "userId"],
];

const VEHICLE_NO_PATHS: &[JsonPath] = &[
    &["vehicleNo"],
    &["VehicleNo"],
    &["carNo"],
    &["CarNo"],
    &["spec", "vehicleNo"],
    &["Spec", "vehicleNo"],
    &["registration", "carNo"],
    &["Registration", "carNo"],
];

/// Follows `path` through nested objects. Null counts as missing.
#[must_use]
pub fn value_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    (!current.is_null()).then_some(current)
}

/// Tries `paths` in order and returns the first value `accept` maps to `Some`
pub fn first_match<'a, T>(
    root: &'a Value,
    paths: &[JsonPath],
    accept: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    paths
        .iter()
        .filter_map(|path| value_at(root, path))
        .find_map(accept)
}

/// Identifier-like scalar as text. Empty strings are rejected.
#[must_use]
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Like [`scalar_text`] but also rejects zero, which upstream uses for "no seller"
fn non_zero_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => scalar_text(other),
    }
}

/// The array of listing entries on one listing page
#[must_use]
pub fn page_items(page: &Value) -> &[Value] {
    first_match(page, ITEM_LIST_PATHS, |v| v.as_array().map(Vec::as_slice)).unwrap_or(&[])
}

/// Listing id of one page entry
#[must_use]
pub fn item_id(item: &Value) -> Option<String> {
    if !item.is_object() {
        return None;
    }
    first_match(item, ITEM_ID_PATHS, scalar_text)
}

/// Total number of listings reported by a count request
#[must_use]
pub fn total_count(page: &Value) -> Option<u64> {
    first_match(page, TOTAL_COUNT_PATHS, Value::as_u64)
}

/// Seller account id, needed for the seller profile
#[must_use]
pub fn seller_id(vehicle: &Value) -> Option<String> {
    first_match(vehicle, SELLER_ID_PATHS, non_zero_text)
}

/// Registration plate, needed for the ownership/accident record
#[must_use]
pub fn vehicle_no(vehicle: &Value) -> Option<String> {
    first_match(vehicle, VEHICLE_NO_PATHS, scalar_text)
}

/// Unique listing ids of a page in page order, plus how many entries had no usable id
#[must_use]
pub fn page_item_ids(page: &Value) -> (Vec<String>, usize) {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    let mut skipped = 0;
    for item in page_items(page) {
        match item_id(item) {
            Some(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            None => skipped += 1,
        }
    }
    (ids, skipped)
}
