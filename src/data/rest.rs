//! Client for a PostgREST-style table API (`{url}/rest/v1/{table}`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_RANGE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use url::Url;

use super::{DataError, DataStore};
use crate::filter::{Filter, Row, RowRange};

#[derive(Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    /// Bearer for data requests: the caller's access token, else the anon key.
    bearer: String,
}

impl RestStore {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, DataError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            bearer: anon_key.to_string(),
        })
    }

    pub fn with_token(&self, access_token: Option<&str>) -> Self {
        let mut store = self.clone();
        store.bearer = match access_token {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => self.anon_key.clone(),
        };
        store
    }

    pub async fn health_check(&self) -> Result<(), DataError> {
        let url = format!("{}/rest/v1/", self.base_url);
        let response = self.request(Method::GET, url).send().await?;
        check_status(response).await.map(|_| ())
    }

    fn table_url(&self, table: &str, params: &[(String, String)]) -> Result<Url, DataError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, table))
            .map_err(|e| DataError::Config(format!("invalid backend url: {}", e)))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: impl reqwest::IntoUrl) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.bearer)
    }
}

fn with_range(builder: RequestBuilder, range: Option<RowRange>) -> RequestBuilder {
    match range {
        Some(range) => builder.header("Range-Unit", "items").header("Range", range.header_value()),
        None => builder,
    }
}

async fn check_status(response: Response) -> Result<Response, DataError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DataError::Status { status: status.as_u16(), body })
}

async fn json_rows(response: Response) -> Result<Vec<Row>, DataError> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(vec![]);
    }
    match serde_json::from_str::<Value>(&text).map_err(|e| DataError::Decode(e.to_string()))? {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect()),
        Value::Object(row) => Ok(vec![row]),
        other => Err(DataError::Decode(format!("expected rows, got {}", other))),
    }
}

/// Total from `Content-Range: 0-0/57` or `*/57`. `None` when absent or unknown (`*`).
pub fn parse_content_range(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

#[async_trait]
impl DataStore for RestStore {
    async fn fetch_all(&self, filter: &Filter) -> Result<Vec<Row>, DataError> {
        let url = self.table_url(filter.table_name(), &filter.to_rest_params()?)?;
        tracing::debug!("GET {}", url);
        let response = with_range(self.request(Method::GET, url), filter.row_range()).send().await?;
        let response = check_status(response).await?;
        // No Content-Range means the window was ignored and the body starts at row 0
        let windowed = response.headers().contains_key(CONTENT_RANGE);
        let mut rows = json_rows(response).await?;

        if !windowed && filter.row_range().is_some() {
            let skip = (filter.offset_value() as usize).min(rows.len());
            rows.drain(..skip);
        }
        if let Some(limit) = filter.limit_value().filter(|l| *l > 0) {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, DataError> {
        let url = self.table_url(filter.table_name(), &filter.to_rest_params()?)?;
        tracing::debug!("COUNT {}", url);
        let response = self
            .request(Method::GET, url)
            .header("Range-Unit", "items")
            .header("Range", "0-0")
            .header("Prefer", "count=exact")
            .send()
            .await?;

        // An empty table answers the 0-0 window with 416 but still reports the total
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            if let Some(total) = parse_content_range(response.headers()) {
                return Ok(total);
            }
        }
        let response = check_status(response).await?;
        if let Some(total) = parse_content_range(response.headers()) {
            return Ok(total);
        }
        tracing::debug!("No usable Content-Range on count; counting body rows");
        Ok(json_rows(response).await?.len() as u64)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, DataError> {
        let url = self.table_url(table, &[])?;
        tracing::debug!("POST {}", url);
        let response = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let stored = json_rows(check_status(response).await?).await?;
        // Row-level policies may hide the inserted row from the reply
        Ok(stored.into_iter().next().unwrap_or(row))
    }

    async fn update(&self, filter: &Filter, row: Row) -> Result<Vec<Row>, DataError> {
        let url = self.table_url(filter.table_name(), &filter.to_rest_filter_params()?)?;
        tracing::debug!("PATCH {}", url);
        let response = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        json_rows(check_status(response).await?).await
    }

    async fn delete(&self, filter: &Filter) -> Result<(), DataError> {
        let url = self.table_url(filter.table_name(), &filter.to_rest_filter_params()?)?;
        tracing::debug!("DELETE {}", url);
        let response = self
            .request(Method::DELETE, url)
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        match check_status(response).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(content_range: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_str(content_range).unwrap());
        headers
    }

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range(&headers("0-0/57")), Some(57));
        assert_eq!(parse_content_range(&headers("*/0")), Some(0));
        assert_eq!(parse_content_range(&headers("0-9/*")), None);
        assert_eq!(parse_content_range(&headers("garbage")), None);
        assert_eq!(parse_content_range(&HeaderMap::new()), None);
    }

    #[test]
    fn token_falls_back_to_anon_key() {
        let store = RestStore::new("https://abc.example.co/", "anon", Duration::from_secs(5)).unwrap();
        assert_eq!(store.base_url, "https://abc.example.co");
        assert_eq!(store.with_token(Some("user-jwt")).bearer, "user-jwt");
        assert_eq!(store.with_token(Some("")).bearer, "anon");
        assert_eq!(store.with_token(None).bearer, "anon");
    }

    #[test]
    fn table_url_encodes_params() {
        let store = RestStore::new("https://abc.example.co", "anon", Duration::from_secs(5)).unwrap();
        let url = store
            .table_url("tickets", &[("category".into(), "eq.Hardware & Network".into())])
            .unwrap();
        assert_eq!(url.path(), "/rest/v1/tickets");
        assert_eq!(url.query(), Some("category=eq.Hardware+%26+Network"));
    }
}
