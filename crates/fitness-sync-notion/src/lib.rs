#![allow(clippy::missing_errors_doc)]

mod codec;

use std::time::Duration;

use anyhow::{anyhow, Result};
use fitness_sync_core::{DocumentStore, Filter, Properties, StoreError, TargetRecord};
use serde_json::{json, Value};

pub use codec::{
    decode_page, decode_property, decode_query_results, encode_filter, encode_properties,
    encode_property,
};

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";
const QUERY_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionConfig {
    pub token: String,
    pub base_url: String,
    pub notion_version: String,
    pub timeout_ms: u64,
}

impl NotionConfig {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            notion_version: DEFAULT_NOTION_VERSION.to_string(),
            timeout_ms: 30_000,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(anyhow!("notion token MUST NOT be empty"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(anyhow!(
                "notion base_url must start with http:// or https://, got '{}'",
                self.base_url
            ));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms MUST be >= 1"));
        }
        Ok(())
    }
}

/// [`DocumentStore`] over the Notion REST API. Collections are database ids.
///
/// Queries read the first result page only.
pub struct NotionStore {
    agent: ureq::Agent,
    config: NotionConfig,
}

impl NotionStore {
    pub fn new(config: NotionConfig) -> Result<Self> {
        config.validate()?;
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        Ok(Self { agent, config })
    }

    fn send(&self, method: &str, path: &str, body: &Value) -> Result<Value, StoreError> {
        let url = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        let request = self
            .agent
            .request(method, &url)
            .set("content-type", "application/json")
            .set("notion-version", &self.config.notion_version)
            .set("authorization", &format!("Bearer {}", self.config.token));

        match request.send_json(body) {
            Ok(response) => response
                .into_json::<Value>()
                .map_err(|err| StoreError::Backend(format!("invalid response body: {err}"))),
            Err(ureq::Error::Status(status, response)) => {
                let message = match response.into_json::<Value>() {
                    Ok(value) => value
                        .get("message")
                        .and_then(Value::as_str)
                        .map_or_else(|| value.to_string(), str::to_string),
                    Err(_) => format!("http status {status}"),
                };
                tracing::debug!(method, path, status, %message, "notion rejected request");
                Err(StoreError::Rejected { status, message })
            }
            Err(ureq::Error::Transport(err)) => Err(StoreError::Transport(err.to_string())),
        }
    }
}

fn backend(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{err:#}"))
}

impl DocumentStore for NotionStore {
    fn query(
        &mut self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<TargetRecord>, StoreError> {
        let body = json!({
            "filter": encode_filter(filter),
            "page_size": QUERY_PAGE_SIZE,
        });
        let response = self.send("POST", &format!("/v1/databases/{collection}/query"), &body)?;
        if response.get("has_more").and_then(Value::as_bool) == Some(true) {
            tracing::warn!(collection, "query matched more than one page; later pages ignored");
        }
        decode_query_results(&response).map_err(backend)
    }

    fn create(
        &mut self,
        collection: &str,
        properties: &Properties,
    ) -> Result<TargetRecord, StoreError> {
        let body = json!({
            "parent": { "database_id": collection },
            "properties": encode_properties(properties),
        });
        let response = self.send("POST", "/v1/pages", &body)?;
        decode_page(&response).map_err(backend)
    }

    fn update(&mut self, id: &str, properties: &Properties) -> Result<TargetRecord, StoreError> {
        let body = json!({ "properties": encode_properties(properties) });
        match self.send("PATCH", &format!("/v1/pages/{id}"), &body) {
            Ok(response) => decode_page(&response).map_err(backend),
            Err(StoreError::Rejected { status: 404, .. }) => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(err) => Err(err),
        }
    }
}
