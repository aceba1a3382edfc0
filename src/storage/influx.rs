use super::{Storage, StorageError};
use crate::{config::InfluxConfig, encode::encode_to_string, metric::Point};
use log::{debug, info};
use reqwest::{blocking::Client, header::CONTENT_TYPE, Url};
use std::time::Duration;

/// InfluxDB 2 HTTP client. Points are written in line protocol at
/// nanosecond precision.
pub struct InfluxStorage {
    client: Client,
    base_url: String,
    org: String,
    bucket: String,
    token: Option<String>,
}

impl InfluxStorage {
    pub fn new(config: &InfluxConfig) -> Result<Self, StorageError> {
        let base_url = config.url.trim().trim_end_matches('/').to_string();
        if Url::parse(&base_url).is_err() {
            return Err(StorageError::InvalidUrl(config.url.clone()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(StorageError::Client)?;

        info!(
            "using InfluxDB at {} (org {}, bucket {})",
            base_url, config.org, config.bucket
        );

        Ok(Self {
            client,
            base_url,
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }
}

impl Storage for InfluxStorage {
    fn ready(&self) -> Result<(), StorageError> {
        let response = self
            .client
            .get(format!("{}/ready", self.base_url))
            .send()?;

        let status = response.status();
        debug!("InfluxDB status: {}", status);
        if !status.is_success() {
            return Err(StorageError::NotReady(status.as_u16()));
        }
        Ok(())
    }

    fn write(&self, points: &[Point]) -> Result<(), StorageError> {
        let body = encode_to_string(points)?;

        let mut request = self
            .client
            .post(format!("{}/api/v2/write", self.base_url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {token}"));
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(())
    }
}
