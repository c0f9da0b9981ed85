//! HTTP client setup and JSON ticker fetching

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use crate::errors::{AggregatorError, AggregatorResult};

pub fn build_http_client(timeout: Duration) -> AggregatorResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| {
            warn!("⚠️ Failed to initialize HTTP client: {}", e);
            AggregatorError::Network {
                message: "Failed to build HTTP client".to_string(),
                source: Some(e.into()),
                retry_count: 0,
            }
        })
}

pub async fn fetch_json(client: &reqwest::Client, url: &str) -> Result<serde_json::Value> {
    let response = client
        .get(url)
        .send()
        .await
        .context("HTTP request failed")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!("API error: {} - {}", status, body));
    }

    response
        .json()
        .await
        .context("Failed to parse JSON response")
}

/// Read a decimal at a JSON pointer; exchanges send prices as strings or numbers.
pub fn decimal_at(json: &serde_json::Value, pointer: &str) -> Result<Decimal> {
    let value = json
        .pointer(pointer)
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' field in response", pointer))?;

    match value {
        serde_json::Value::String(s) => {
            Decimal::from_str(s).with_context(|| format!("Failed to parse '{}' as decimal", s))
        }
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .with_context(|| format!("Failed to parse {} as decimal", n)),
        other => Err(anyhow::anyhow!("Unexpected value at '{}': {}", pointer, other)),
    }
}
