//! Post-deployment health probes
//!
//! Probes classify the deployment; they never fail it. Fresh distributions
//! take minutes to propagate, so edge endpoints failing right after a deploy
//! is expected and reported as `Degraded`.

use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Result of one HTTP probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: Option<u16>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// reqwest-backed probe issuing one GET per endpoint
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("airbrx-deploy/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let started = Instant::now();
        tracing::debug!("GET {}", url);
        let result = self.client.get(url).send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(response) => ProbeOutcome {
                status: Some(response.status().as_u16()),
                error: None,
                elapsed_ms,
            },
            Err(e) => ProbeOutcome {
                status: None,
                error: Some(e.to_string()),
                elapsed_ms,
            },
        }
    }
}

/// One endpoint to check after deploying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub name: String,
    pub url: String,
    pub status: Option<u16>,
    pub healthy: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy,
    Degraded,
    Failed,
}

impl std::fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthVerdict::Healthy => write!(f, "healthy"),
            HealthVerdict::Degraded => write!(f, "degraded"),
            HealthVerdict::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub endpoints: Vec<EndpointHealth>,
    pub verdict: HealthVerdict,
}

impl HealthReport {
    pub fn from_endpoints(endpoints: Vec<EndpointHealth>) -> Self {
        let healthy = endpoints.iter().filter(|e| e.healthy).count();
        let verdict = if !endpoints.is_empty() && healthy == endpoints.len() {
            HealthVerdict::Healthy
        } else if healthy > 0 {
            HealthVerdict::Degraded
        } else {
            HealthVerdict::Failed
        };
        Self { endpoints, verdict }
    }

    pub fn unhealthy(&self) -> impl Iterator<Item = &EndpointHealth> {
        self.endpoints.iter().filter(|e| !e.healthy)
    }
}

/// A 2xx or 3xx answer counts as healthy
fn is_healthy_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Probe every endpoint in order
pub async fn check_endpoints(probe: &dyn HealthProbe, endpoints: &[Endpoint]) -> HealthReport {
    let mut results = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        let outcome = probe.probe(&endpoint.url).await;
        let healthy = outcome.status.is_some_and(is_healthy_status);
        if healthy {
            tracing::info!("{} healthy ({})", endpoint.name, endpoint.url);
        } else {
            tracing::warn!(
                "{} unhealthy ({}): {}",
                endpoint.name,
                endpoint.url,
                outcome
                    .error
                    .clone()
                    .or(outcome.status.map(|s| format!("HTTP {}", s)))
                    .unwrap_or_default()
            );
        }
        results.push(EndpointHealth {
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            status: outcome.status,
            healthy,
            error: outcome.error,
            elapsed_ms: outcome.elapsed_ms,
        });
    }
    HealthReport::from_endpoints(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_all_endpoints_healthy() {
        let server = MockServer::start_async().await;
        let health = server
            .mock_async(|when, then| {
                when.method(GET).path("/health");
                then.status(200).body("ok");
            })
            .await;

        let endpoints = vec![
            Endpoint::new("api", server.url("/health")),
            Endpoint::new("gateway", server.url("/health")),
        ];
        let report = check_endpoints(&HttpProbe::default(), &endpoints).await;

        assert_eq!(report.verdict, HealthVerdict::Healthy);
        assert_eq!(report.endpoints[0].status, Some(200));
        health.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_partial_failure_is_degraded() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/health");
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(503);
            })
            .await;

        let endpoints = vec![
            Endpoint::new("api", server.url("/health")),
            Endpoint::new("app", server.url("/")),
        ];
        let report = check_endpoints(&HttpProbe::default(), &endpoints).await;

        assert_eq!(report.verdict, HealthVerdict::Degraded);
        let unhealthy: Vec<_> = report.unhealthy().map(|e| e.name.as_str()).collect();
        assert_eq!(unhealthy, vec!["app"]);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails() {
        let probe = HttpProbe::new(Duration::from_millis(500));
        // Port 9 (discard) is closed on test hosts
        let endpoints = vec![Endpoint::new("api", "http://127.0.0.1:9/health")];
        let report = check_endpoints(&probe, &endpoints).await;

        assert_eq!(report.verdict, HealthVerdict::Failed);
        assert!(report.endpoints[0].status.is_none());
        assert!(report.endpoints[0].error.is_some());
    }

    #[test]
    fn test_empty_report_is_failed() {
        assert_eq!(
            HealthReport::from_endpoints(Vec::new()).verdict,
            HealthVerdict::Failed
        );
    }
}
