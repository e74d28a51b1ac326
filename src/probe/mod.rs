//! HTTP probe execution and outcome classification.

use crate::db::Monitor;

use std::time::{Duration, Instant};
use thiserror::Error;

/// Probe setup error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Classified result of one probe. Probe failures are outcomes, not
/// errors: timeouts, refused connections and bad status codes all come
/// back as a value with `success = false`.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub success: bool,
    pub status_code: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub message: Option<String>,
}

/// Executes single HTTP checks against monitor URLs.
pub struct ProbeExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProbeExecutor {
    /// Create an executor whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    /// Run one GET against the monitor's URL and classify the outcome.
    pub async fn execute(&self, monitor: &Monitor) -> ProbeOutcome {
        // Small jitter to avoid thundering herd
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let url = normalize_url(&monitor.url);
        let start = Instant::now();

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("probe timed out after {:?}", self.timeout)
                } else {
                    format!("request failed: {}", e)
                };
                return ProbeOutcome {
                    success: false,
                    status_code: None,
                    response_time_ms: None,
                    message: Some(message),
                };
            }
        };

        let code = response.status().as_u16();

        // Read the full body so the round trip covers the complete transfer.
        if let Err(e) = response.bytes().await {
            return ProbeOutcome {
                success: false,
                status_code: Some(code as i64),
                response_time_ms: None,
                message: Some(format!("failed to read response body: {}", e)),
            };
        }

        let elapsed_ms = start.elapsed().as_millis() as i64;

        if (200..400).contains(&code) {
            ProbeOutcome {
                success: true,
                status_code: Some(code as i64),
                response_time_ms: Some(elapsed_ms),
                message: None,
            }
        } else {
            ProbeOutcome {
                success: false,
                status_code: Some(code as i64),
                response_time_ms: Some(elapsed_ms),
                message: Some(format!("unexpected HTTP status {}", code)),
            }
        }
    }
}

fn normalize_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}
