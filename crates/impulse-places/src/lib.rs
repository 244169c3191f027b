//! OpenStreetMap Nominatim lookup for shopping-list places.
//!
//! The core only consumes the candidate a caller selects; a failed or
//! empty lookup leaves the list's `place` fields null.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use impulse_core::{Address, Place};

const NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";

/// Errors from the place lookup.
#[derive(Debug, thiserror::Error)]
pub enum PlacesError {
    #[error("lookup request failed: {0}")]
    Request(String),

    #[error("invalid lookup response: {0}")]
    InvalidResponse(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// One geocoder candidate for a free-text place name.
///
/// Nominatim returns `lat`/`lon` as strings; they are parsed only when a
/// candidate is applied to a place.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaceCandidate {
    pub place_id: u64,
    #[serde(default)]
    pub licence: Option<String>,
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub address: Address,
}

impl PlaceCandidate {
    /// Copy this candidate's coordinates, licence and address onto a
    /// place. The title stays whatever the user typed.
    pub fn apply_to(&self, place: &mut Place) {
        place.lat = self.lat.parse().ok();
        place.lon = self.lon.parse().ok();
        place.license = self.licence.clone();
        place.address = self.address.clone();
    }

    /// The sole candidate of a lookup, if there is exactly one. Callers
    /// use this to skip the selection step.
    pub fn only(candidates: &[PlaceCandidate]) -> Option<&PlaceCandidate> {
        match candidates {
            [single] => Some(single),
            _ => None,
        }
    }
}

/// Client for the Nominatim search API.
#[derive(Debug)]
pub struct PlacesClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl PlacesClient {
    pub fn new() -> Result<Self, PlacesError> {
        Self::with_endpoint(NOMINATIM_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self, PlacesError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| PlacesError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("impulse-places/0.1")
            .build()
            .map_err(|e| PlacesError::Request(format!("client: {}", e)))?;
        Ok(Self { client, endpoint })
    }

    /// Look up candidates for a free-text place name.
    pub async fn search(&self, query: &str) -> Result<Vec<PlaceCandidate>, PlacesError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("addressdetails", "1")
            .append_pair("namedetails", "1")
            .append_pair("q", query);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlacesError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PlacesError::Request(format!(
                "{} from {}",
                response.status(),
                response.url()
            )));
        }
        response
            .json::<Vec<PlaceCandidate>>()
            .await
            .map_err(|e| PlacesError::InvalidResponse(e.to_string()))
    }
}
