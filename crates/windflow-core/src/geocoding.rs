//! Reverse geocoding collaborator
//!
//! Lookups are best-effort: every failure is logged and reported as `None`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GeocodingSettings;
use crate::types::Coordinates;
use crate::{Result, WindflowError};

/// Coordinate → place name lookup
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, coords: Coordinates) -> Option<String>;
}

/// Geocoder that never resolves a name
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGeocoder;

#[async_trait]
impl Geocoder for NoopGeocoder {
    async fn reverse_geocode(&self, _coords: Coordinates) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<Address>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    county: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

impl ReverseResponse {
    /// Most specific locality plus region, e.g. "Amarillo, Texas"
    fn label(&self) -> Option<String> {
        if let Some(address) = &self.address {
            let locality = address
                .city
                .as_ref()
                .or(address.town.as_ref())
                .or(address.village.as_ref())
                .or(address.county.as_ref());
            let region = address.state.as_ref().or(address.country.as_ref());

            match (locality, region) {
                (Some(l), Some(r)) => return Some(format!("{}, {}", l, r)),
                (Some(l), None) => return Some(l.clone()),
                (None, Some(r)) => return Some(r.clone()),
                (None, None) => {}
            }
        }

        self.display_name
            .as_ref()
            .and_then(|name| name.split(',').next())
            .map(|first| first.trim().to_string())
            .filter(|first| !first.is_empty())
    }
}

/// Nominatim-compatible HTTP reverse geocoder
#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeocoder {
    pub fn new(settings: &GeocodingSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| WindflowError::Geocoding(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn lookup(&self, coords: Coordinates) -> Result<Option<String>> {
        let url = format!("{}/reverse", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", coords.lat.to_string()),
                ("lon", coords.lon.to_string()),
                ("zoom", "10".to_string()),
            ])
            .send()
            .await
            .map_err(|e| WindflowError::Geocoding(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WindflowError::Geocoding(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let body: ReverseResponse = response
            .json()
            .await
            .map_err(|e| WindflowError::Geocoding(e.to_string()))?;
        Ok(body.label())
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn reverse_geocode(&self, coords: Coordinates) -> Option<String> {
        match self.lookup(coords).await {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!(%coords, error = %e, "Reverse geocoding failed");
                None
            }
        }
    }
}
