// Network side of the pipeline: the signed URL service, the vehicle feed and
// the route geometry document.

use std::future::Future;

use chrono::Utc;
use chrono_tz::Tz;
use geojson::Feature;
use reqwest::Client;
use tracing::debug;

use crate::catalog::parse_feature_collection;
use crate::config::{Config, FeedFormat};
use crate::error::{Result, TransitError};
use crate::feed::decode_vehicles;
use crate::models::{SignedUrlResponse, Vehicle};

pub trait TransitSource: Send + Sync + 'static {
    /// One request to the credential service for a time-limited feed URL.
    fn fetch_signed_url(&self) -> impl Future<Output = Result<String>> + Send;

    fn fetch_vehicles(&self, signed_url: &str) -> impl Future<Output = Result<Vec<Vehicle>>> + Send;

    fn fetch_route_features(&self) -> impl Future<Output = Result<Vec<Feature>>> + Send;
}

pub struct HttpTransitSource {
    client: Client,
    credential_url: String,
    routes_source: String,
    feed_format: FeedFormat,
    timezone: Tz,
}

impl HttpTransitSource {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| TransitError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpTransitSource {
            client,
            credential_url: config.credential_url.clone(),
            routes_source: config.routes_source.clone(),
            feed_format: config.feed_format,
            timezone: config.timezone,
        })
    }

    async fn get_checked(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TransitError::Network(format!("API returned error: {}", response.status())));
        }
        Ok(response)
    }
}

impl TransitSource for HttpTransitSource {
    async fn fetch_signed_url(&self) -> Result<String> {
        let response = self.get_checked(self.client.get(&self.credential_url)).await?;
        let body: SignedUrlResponse = response.json().await?;
        if body.signed_url.is_empty() {
            return Err(TransitError::Parse("Credential service returned an empty signedUrl".to_string()));
        }
        Ok(body.signed_url)
    }

    async fn fetch_vehicles(&self, signed_url: &str) -> Result<Vec<Vehicle>> {
        // Cache buster, the signed URL is otherwise identical between polls
        let request = self
            .client
            .get(signed_url)
            .query(&[("t", Utc::now().timestamp_millis())]);
        let body = self.get_checked(request).await?.bytes().await?;
        debug!("📡 Vehicle feed returned {} bytes", body.len());
        decode_vehicles(self.feed_format, &body, self.timezone)
    }

    async fn fetch_route_features(&self) -> Result<Vec<Feature>> {
        let body = if is_remote(&self.routes_source) {
            self.get_checked(self.client.get(&self.routes_source))
                .await?
                .text()
                .await?
        } else {
            tokio::fs::read_to_string(&self.routes_source).await?
        };
        parse_feature_collection(&body)
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
