//! NCBI E-utilities `esearch` pass-through.
//!
//! Resolves a PubMed query string to a list of PMIDs. No paging or history
//! server support; callers wanting more than `retmax` ids should narrow
//! the query.

use crate::error::{OptionExt, PubmedkitError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// esearch endpoint
const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";

/// NCBI caps a single esearch response at this many ids
const MAX_RETMAX: u32 = 9999;

/// Options for [`query_pmids`]
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Contact address NCBI asks clients to send
    pub email: String,
    /// Maximum ids to return
    pub retmax: u32,
    /// Optional API key for the higher rate limit
    pub api_key: Option<String>,
    /// Base URL override (tests, mirrors)
    pub base_url: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            email: "your_email@example.com".to_string(),
            retmax: MAX_RETMAX,
            api_key: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: Option<EsearchResult>,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(default)]
    count: Option<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

/// Query PubMed and return matching PMIDs.
pub async fn query_pmids(query: &str, options: &SearchOptions) -> Result<Vec<i64>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(format!("pubmedkit/0.1 (mailto:{})", options.email))
        .build()?;

    let url = options.base_url.as_deref().unwrap_or(ESEARCH_URL);
    let retmax = options.retmax.min(MAX_RETMAX).to_string();

    let mut params = vec![
        ("db", "pubmed"),
        ("term", query),
        ("retmode", "json"),
        ("retmax", retmax.as_str()),
        ("email", options.email.as_str()),
    ];
    if let Some(key) = options.api_key.as_deref() {
        params.push(("api_key", key));
    }

    info!(query = query, retmax = %retmax, "Starting PubMed esearch");

    let body = fetch_with_retry(&client, url, &params).await?;
    let ids = parse_response(&body)?;

    info!(query = query, found = ids.len(), "PubMed esearch complete");
    Ok(ids)
}

async fn fetch_with_retry(client: &Client, url: &str, params: &[(&str, &str)]) -> Result<String> {
    let mut retries = 0;
    let max_retries = 3;

    loop {
        let response = client.get(url).query(params).send().await?;
        let status = response.status();

        if status.is_success() {
            return response.text().await.map_err(PubmedkitError::Network);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS && retries < max_retries {
            let backoff = Duration::from_secs(2u64.pow(retries));
            warn!(
                retries = retries,
                backoff_secs = backoff.as_secs(),
                "Rate limited, backing off"
            );
            tokio::time::sleep(backoff).await;
            retries += 1;
            continue;
        }

        return Err(PubmedkitError::Api {
            code: status.as_u16() as i32,
            message: format!("esearch error: {}", status),
        });
    }
}

fn parse_response(body: &str) -> Result<Vec<i64>> {
    let response: EsearchResponse = serde_json::from_str(body)
        .map_err(|e| PubmedkitError::Parse(format!("Failed to parse esearch response: {}", e)))?;
    let result = response.esearchresult.ok_or_parse("esearch response has no esearchresult")?;

    if let Some(message) = result.error {
        return Err(PubmedkitError::Api { code: 200, message });
    }
    debug!(count = ?result.count, "esearch reported total");

    result
        .idlist
        .iter()
        .map(|id| {
            id.parse::<i64>()
                .map_err(|_| PubmedkitError::Parse(format!("non-numeric PMID {:?}", id)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = r#"{"header":{"type":"esearch"},"esearchresult":{"count":"2","retmax":"2","idlist":["38000001","38000002"]}}"#;
        assert_eq!(parse_response(body).unwrap(), vec![38000001, 38000002]);
    }

    #[test]
    fn test_parse_error_response() {
        let body = r#"{"esearchresult":{"ERROR":"Invalid query"}}"#;
        assert!(matches!(parse_response(body), Err(PubmedkitError::Api { .. })));
    }

    #[test]
    fn test_parse_missing_result() {
        assert!(matches!(parse_response("{}"), Err(PubmedkitError::Parse(_))));
        assert!(matches!(parse_response("<html>"), Err(PubmedkitError::Parse(_))));
    }
}
