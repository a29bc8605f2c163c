//! Encar upstream endpoints
//!
//! Concrete [`CatalogSource`] and [`DetailSource`] over [`HttpClient`].
//! Listing and detail calls use separate clients because their timeouts
//! and retry ceilings differ.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::domain::category::{Category, ListingQuery};
use crate::domain::detail::DetailRequest;
use crate::domain::errors::FetchError;
use crate::domain::upstream::{CatalogSource, DetailSource};
use crate::infrastructure::config::HttpConfig;
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig};

/// Path and query parameters of one detail call, relative to the detail base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailEndpoint {
    pub path: String,
    pub query: Vec<(&'static str, String)>,
}

impl DetailEndpoint {
    #[must_use]
    pub fn for_request(request: &DetailRequest) -> Self {
        let (path, query) = match request {
            DetailRequest::Vehicle { car_id } => (format!("/vehicle/{car_id}"), Vec::new()),
            DetailRequest::Inspection { car_id } => {
                (format!("/inspection/vehicle/{car_id}"), Vec::new())
            }
            DetailRequest::Record { car_id, vehicle_no } => (
                format!("/record/vehicle/{car_id}/open"),
                vec![("vehicleNo", vehicle_no.clone())],
            ),
            DetailRequest::OptionsChoice { car_id } => {
                (format!("/vehicles/car/{car_id}/options/choice"), Vec::new())
            }
            DetailRequest::Seller { user_id } => (format!("/user/{user_id}"), Vec::new()),
        };
        Self { path, query }
    }
}

pub struct EncarApi {
    listing: HttpClient,
    detail: HttpClient,
    listing_url: String,
    detail_base_url: String,
    query: ListingQuery,
}

impl EncarApi {
    pub fn new(http: &HttpConfig, query: ListingQuery) -> Result<Self> {
        Ok(Self {
            listing: HttpClient::new(HttpClientConfig::listing(http))?,
            detail: HttpClient::new(HttpClientConfig::detail(http))?,
            listing_url: http.listing_base_url.clone(),
            detail_base_url: http.detail_base_url.trim_end_matches('/').to_string(),
            query,
        })
    }

    /// Query parameters of one listing page
    #[must_use]
    pub fn listing_params(&self, category: &Category, offset: u64, limit: u32) -> [(&'static str, String); 3] {
        [
            ("count", "true".to_string()),
            ("q", self.query.filter_expression(category)),
            ("sr", self.query.sort_range(offset, limit)),
        ]
    }
}

#[async_trait]
impl CatalogSource for EncarApi {
    async fn fetch_page(
        &self,
        category: &Category,
        offset: u64,
        limit: u32,
    ) -> Result<Value, FetchError> {
        let params = self.listing_params(category, offset, limit);
        let query: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.listing.get_json(&self.listing_url, &query).await
    }
}

#[async_trait]
impl DetailSource for EncarApi {
    async fn fetch_detail(&self, request: &DetailRequest) -> Result<Value, FetchError> {
        let endpoint = DetailEndpoint::for_request(request);
        let url = format!("{}{}", self.detail_base_url, endpoint.path);
        let query: Vec<(&str, &str)> = endpoint
            .query
            .iter()
            .map(|(k, v)| (*k, v.as_str()))
            .collect();
        self.detail.get_json(&url, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_endpoints() {
        let car_id = "38012345".to_string();
        let cases = [
            (
                DetailRequest::Vehicle {
                    car_id: car_id.clone(),
                },
                "/vehicle/38012345",
            ),
            (
                DetailRequest::Inspection {
                    car_id: car_id.clone(),
                },
                "/inspection/vehicle/38012345",
            ),
            (
                DetailRequest::OptionsChoice {
                    car_id: car_id.clone(),
                },
                "/vehicles/car/38012345/options/choice",
            ),
            (
                DetailRequest::Seller {
                    user_id: "dealer01".into(),
                },
                "/user/dealer01",
            ),
        ];
        for (request, path) in cases {
            let endpoint = DetailEndpoint::for_request(&request);
            assert_eq!(endpoint.path, path);
            assert!(endpoint.query.is_empty());
        }

        let record = DetailEndpoint::for_request(&DetailRequest::Record {
            car_id,
            vehicle_no: "12가3456".into(),
        });
        assert_eq!(record.path, "/record/vehicle/38012345/open");
        assert_eq!(record.query, vec![("vehicleNo", "12가3456".to_string())]);
    }

    #[test]
    fn listing_params_carry_filter_and_range() {
        let api = EncarApi::new(&HttpConfig::default(), ListingQuery::default()).unwrap();
        let params = api.listing_params(&Category::new("kia", "기아"), 500, 500);
        assert_eq!(params[0], ("count", "true".to_string()));
        assert!(params[1].1.contains("Manufacturer.기아."));
        assert_eq!(params[2], ("sr", "|PriceAsc|500|500".to_string()));
    }
}
