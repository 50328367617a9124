//! Production `ListBackend` adapter: REST + OData delta queries over
//! `reqwest` (spec §4.5). Retry/backoff policy:
//! - 429 / 5xx: retry honoring `Retry-After` when present, bounded to 3
//!   attempts total, exponential backoff otherwise.
//! - 403: `EngineError::Permission`, not retried.
//! - connection failure: `EngineError::Transport`, retriable by the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::model::{Row, Value};
use crate::ports::{DeltaItem, ListBackend};
use crate::{EngineError, Result};

use super::odata::{extract_token, DeltaPage};
use super::token_cache::TokenCache;

const MAX_ATTEMPTS: u32 = 3;

pub struct HttpListBackend<F> {
    client: Client,
    base_url: String,
    tokens: TokenCache<F>,
}

impl<F, Fut> HttpListBackend<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(String, Duration)>> + Send,
{
    pub fn new(base_url: impl Into<String>, token_fetch: F) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            tokens: TokenCache::new(token_fetch),
        }
    }

    async fn bearer(&self) -> Result<String> {
        self.tokens.get().await
    }

    fn item_url(&self, site: &str, list: &str, item_id: i64) -> String {
        format!(
            "{}/sites/{site}/lists/{list}/items/{item_id}",
            self.base_url
        )
    }

    fn items_url(&self, site: &str, list: &str) -> String {
        format!("{}/sites/{site}/lists/{list}/items", self.base_url)
    }

    fn delta_url(&self, site: &str, list: &str, delta_token: Option<&str>) -> String {
        match delta_token {
            Some(token) => format!(
                "{}/sites/{site}/lists/{list}/items/delta?$deltatoken={token}",
                self.base_url
            ),
            None => format!("{}/sites/{site}/lists/{list}/items/delta", self.base_url),
        }
    }

    async fn send_with_retry(
        &self,
        build: impl Fn(&Client, &str) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let token = self.bearer().await?;
            let request = build(&self.client, &token);
            let outcome = request.send().await;

            let response = match outcome {
                Ok(response) => response,
                Err(err) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, error = %err, "list backend connectivity error, retrying");
                    backoff(attempt).await;
                    continue;
                }
                Err(err) => return Err(EngineError::Transport(err.to_string())),
            };

            match response.status() {
                StatusCode::FORBIDDEN => {
                    return Err(EngineError::Permission(format!(
                        "list backend denied request: {}",
                        response.status()
                    )));
                }
                status if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(EngineError::Throttle(format!(
                            "list backend returned {status} after {attempt} attempts"
                        )));
                    }
                    let wait = retry_after(&response).unwrap_or_else(|| backoff_duration(attempt));
                    debug!(attempt, ?wait, %status, "list backend throttled, retrying");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                status if status.is_success() || status == StatusCode::NOT_FOUND => {
                    return Ok(response)
                }
                status => {
                    return Err(EngineError::Transport(format!(
                        "list backend returned unexpected status {status}"
                    )))
                }
            }
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_millis(200 * 2u64.pow(attempt.saturating_sub(1)))
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(backoff_duration(attempt)).await;
}

fn row_to_json(row: &Row) -> Map<String, Json> {
    let mut map = Map::new();
    for (k, v) in row {
        let json = match v {
            Value::Null => Json::Null,
            Value::Text(s) => Json::String(s.clone()),
            Value::Integer(i) => Json::Number((*i).into()),
            Value::Decimal(d) => Json::String(d.normalize().to_string()),
            Value::Boolean(b) => Json::Bool(*b),
            Value::Timestamp(ts) => Json::String(ts.to_rfc3339()),
            Value::Binary(_) => Json::String(v.canonical_text().unwrap_or_default()),
        };
        map.insert(k.clone(), json);
    }
    map
}

fn json_to_row(fields: Map<String, Json>) -> Row {
    let mut row = Row::new();
    for (k, v) in fields {
        let value = match v {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => n.as_i64().map(Value::Integer).unwrap_or(Value::Text(n.to_string())),
            Json::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        };
        row.insert(k, value);
    }
    row
}

#[async_trait]
impl<F, Fut> ListBackend for HttpListBackend<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(String, Duration)>> + Send,
{
    async fn create_item(&self, site: &str, list: &str, fields: &Row) -> Result<i64> {
        let url = self.items_url(site, list);
        let body = Json::Object(row_to_json(fields));
        let response = self
            .send_with_retry(|client, token| client.post(&url).bearer_auth(token).json(&body))
            .await?;
        let created: Json = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        created
            .get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| EngineError::Transport("create_item response missing id".to_string()))
    }

    async fn update_item(&self, site: &str, list: &str, item_id: i64, fields: &Row) -> Result<()> {
        let url = self.item_url(site, list, item_id);
        let body = Json::Object(row_to_json(fields));
        self.send_with_retry(|client, token| client.patch(&url).bearer_auth(token).json(&body))
            .await?;
        Ok(())
    }

    async fn delete_item(&self, site: &str, list: &str, item_id: i64) -> Result<()> {
        let url = self.item_url(site, list, item_id);
        // A missing item is treated as already deleted (spec §8: re-applying
        // a delete is a no-op).
        self.send_with_retry(|client, token| client.delete(&url).bearer_auth(token))
            .await?;
        Ok(())
    }

    async fn get_item(&self, site: &str, list: &str, item_id: i64) -> Result<Option<Row>> {
        let url = self.item_url(site, list, item_id);
        let response = self
            .send_with_retry(|client, token| client.get(&url).bearer_auth(token))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let fields: Map<String, Json> = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(Some(json_to_row(fields)))
    }

    async fn delta_changes(
        &self,
        site: &str,
        list: &str,
        delta_token: Option<&str>,
    ) -> Result<(Vec<DeltaItem>, String)> {
        let mut items = Vec::new();
        let mut next = delta_token.map(|t| t.to_string());

        loop {
            let url = self.delta_url(site, list, next.as_deref());
            let response = self
                .send_with_retry(|client, token| client.get(&url).bearer_auth(token))
                .await?;
            let page: DeltaPage = response
                .json()
                .await
                .map_err(|e| EngineError::Transport(e.to_string()))?;

            for row in page.value {
                items.push(row.into_item());
            }

            if let Some(delta_link) = page.delta_link {
                let token = extract_token(&delta_link)
                    .ok_or_else(|| EngineError::Transport("deltaLink missing token".to_string()))?;
                return Ok((items, token));
            }

            next = match page.next_link.as_deref().and_then(extract_token) {
                Some(token) => Some(token),
                None => {
                    return Err(EngineError::Transport(
                        "delta page carried neither nextLink nor deltaLink".to_string(),
                    ))
                }
            };
        }
    }
}
