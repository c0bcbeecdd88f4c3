//! HTTP client for the external drug interaction service.

use crate::{Error, InteractionResult, InteractionSource, Result, Severity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A remote source of drug-drug interactions
pub trait InteractionService: Send + Sync {
    /// Look up interactions among `names`, giving up after `timeout`
    fn fetch_interactions(
        &self,
        names: &[String],
        timeout: Duration,
    ) -> Result<Vec<InteractionResult>>;
}

/// Blocking HTTP client for the interaction service.
///
/// POSTs `{"drugs": [...]}` to `<base_url>/interactions`.
pub struct HttpInteractionClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpInteractionClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| {
                Error::InteractionService(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Request body for /interactions
#[derive(Serialize)]
struct InteractionRequest<'a> {
    drugs: &'a [String],
}

/// Response body from /interactions
#[derive(Deserialize)]
struct InteractionResponse {
    #[serde(default)]
    interactions: Vec<RemoteInteraction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteInteraction {
    drug_a: String,
    drug_b: String,
    severity: String,
    #[serde(default)]
    description: String,
    mechanism: Option<String>,
}

impl RemoteInteraction {
    fn into_result(self) -> Option<InteractionResult> {
        let severity = match self.severity.parse::<Severity>() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    "Dropping {}/{} interaction from service: {}",
                    self.drug_a,
                    self.drug_b,
                    e
                );
                return None;
            }
        };
        Some(InteractionResult {
            drug_a: self.drug_a,
            drug_b: self.drug_b,
            severity,
            description: self.description,
            mechanism: self.mechanism,
            source: InteractionSource::ExternalService,
            pregnancy_warning: None,
        })
    }
}

impl InteractionService for HttpInteractionClient {
    fn fetch_interactions(
        &self,
        names: &[String],
        timeout: Duration,
    ) -> Result<Vec<InteractionResult>> {
        let url = format!("{}/interactions", self.base_url);
        let body = InteractionRequest { drugs: names };

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    Error::InteractionService(format!("Cannot connect to {}", self.base_url))
                } else if e.is_timeout() {
                    Error::InteractionService(format!(
                        "Request timed out after {}ms",
                        timeout.as_millis()
                    ))
                } else {
                    Error::InteractionService(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::InteractionService(format!(
                "Service returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: InteractionResponse = response
            .json()
            .map_err(|e| Error::InteractionService(format!("Invalid response: {}", e)))?;

        Ok(parsed
            .interactions
            .into_iter()
            .filter_map(RemoteInteraction::into_result)
            .collect())
    }
}
