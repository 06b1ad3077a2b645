//! Property-graph database client
//!
//! Speaks the HTTP transactional Cypher endpoint. Every query runs in a
//! short-lived implicit transaction; writes retry transient failures
//! inside a bounded wall-clock budget.

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// One result row: column name to value
pub type Row = HashMap<String, Value>;

/// Counters reported by a write transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
}

/// Narrow interface over the external property-graph database
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Read-only Cypher query returning rows of column maps
    async fn execute_query(&self, cypher: &str, params: Value) -> Result<Vec<Row>>;

    /// Write Cypher statement inside a single transaction
    async fn execute_write(&self, cypher: &str, params: Value) -> Result<WriteSummary>;

    /// Check the store is reachable
    async fn verify_connectivity(&self) -> Result<()>;
}

/// HTTP client for a Neo4j-style transactional Cypher endpoint
pub struct HttpGraphClient {
    client: reqwest::Client,
    config: GraphConfig,
}

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Deserialize)]
struct TxResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
    #[serde(default)]
    stats: Option<TxStats>,
}

#[derive(Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Deserialize, Default)]
struct TxStats {
    #[serde(default)]
    nodes_created: u64,
    #[serde(default)]
    nodes_deleted: u64,
    #[serde(default)]
    relationships_created: u64,
    #[serde(default)]
    relationships_deleted: u64,
    #[serde(default)]
    properties_set: u64,
}

#[derive(Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpGraphClient {
    pub fn new(config: GraphConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| GraphError::Unavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/db/neo4j/tx/commit",
            self.config.url.trim_end_matches('/')
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        if !self.config.username.is_empty() {
            builder = builder.basic_auth(&self.config.username, Some(&self.config.password));
        }
        builder
    }

    async fn run_statement(
        &self,
        cypher: &str,
        params: &Value,
        include_stats: bool,
    ) -> Result<TxResult> {
        let body = serde_json::json!({
            "statements": [{
                "statement": cypher,
                "parameters": params,
                "includeStats": include_stats,
            }]
        });

        let response = self
            .request(&self.commit_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(GraphError::QueryFailed(format!("HTTP {}", status)).into());
        }

        let mut parsed: TxResponse = response
            .json()
            .await
            .map_err(|e| GraphError::QueryFailed(e.to_string()))?;

        if let Some(error) = parsed.errors.first() {
            return Err(
                GraphError::QueryFailed(format!("{}: {}", error.code, error.message)).into(),
            );
        }

        if parsed.results.is_empty() {
            return Ok(TxResult {
                columns: Vec::new(),
                data: Vec::new(),
                stats: None,
            });
        }
        Ok(parsed.results.remove(0))
    }
}

#[async_trait]
impl GraphClient for HttpGraphClient {
    async fn execute_query(&self, cypher: &str, params: Value) -> Result<Vec<Row>> {
        debug!("Graph query: {}", cypher.split_whitespace().take(8).collect::<Vec<_>>().join(" "));

        let result = self.run_statement(cypher, &params, false).await?;

        let rows = result
            .data
            .into_iter()
            .map(|data_row| {
                result
                    .columns
                    .iter()
                    .cloned()
                    .zip(data_row.row)
                    .collect::<Row>()
            })
            .collect();
        Ok(rows)
    }

    async fn execute_write(&self, cypher: &str, params: Value) -> Result<WriteSummary> {
        let budget = Duration::from_secs(self.config.write_retry_budget);
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut last_error = String::new();

        loop {
            match self.run_statement(cypher, &params, true).await {
                Ok(result) => {
                    let stats = result.stats.unwrap_or_default();
                    return Ok(WriteSummary {
                        nodes_created: stats.nodes_created,
                        nodes_deleted: stats.nodes_deleted,
                        relationships_created: stats.relationships_created,
                        relationships_deleted: stats.relationships_deleted,
                        properties_set: stats.properties_set,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    attempt += 1;
                    let delay = Duration::from_millis(200u64 * (1u64 << attempt.min(5)));
                    if !e.is_retryable() || started.elapsed() + delay > budget {
                        if attempt > 1 {
                            return Err(GraphError::RetryBudgetExhausted {
                                attempts: attempt,
                                last_error,
                            }
                            .into());
                        }
                        return Err(e);
                    }
                    warn!(
                        "Graph write attempt {} failed ({}), retrying in {:?}",
                        attempt, last_error, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn verify_connectivity(&self) -> Result<()> {
        self.execute_query("RETURN 1 AS ok", Value::Null).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> GraphConfig {
        GraphConfig {
            url,
            timeout: 2,
            write_retry_budget: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_query_rows_zip_columns() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/commit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{
                    "columns": ["code", "grade"],
                    "data": [{"row": ["KL-1", "C30"]}]
                }],
                "errors": []
            })))
            .mount(&server)
            .await;

        let client = HttpGraphClient::new(config(server.uri())).unwrap();
        let rows = client
            .execute_query("MATCH (c) RETURN c.code AS code, c.grade AS grade", Value::Null)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["code"], "KL-1");
        assert_eq!(rows[0]["grade"], "C30");
    }

    #[tokio::test]
    async fn test_write_returns_counters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/commit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{
                    "columns": [],
                    "data": [],
                    "stats": {"nodes_created": 1, "relationships_created": 1, "properties_set": 4}
                }],
                "errors": []
            })))
            .mount(&server)
            .await;

        let client = HttpGraphClient::new(config(server.uri())).unwrap();
        let summary = client
            .execute_write("CREATE (n:Component {code: $code})", serde_json::json!({"code": "KL-1"}))
            .await
            .unwrap();

        assert_eq!(summary.nodes_created, 1);
        assert_eq!(summary.relationships_created, 1);
    }

    #[tokio::test]
    async fn test_cypher_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/commit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [],
                "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]
            })))
            .mount(&server)
            .await;

        let client = HttpGraphClient::new(config(server.uri())).unwrap();
        let result = client.execute_query("MATCH", Value::Null).await;
        assert!(result.is_err());
    }
}
