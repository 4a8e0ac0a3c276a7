use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{RequestBuilder, Response};

use crate::api::wire::{BulkRequest, BulkResponse, SearchRequest, SearchResponse};
use crate::catalog::BatchAction;
use crate::config::types::ServiceConfig;
use crate::engine::{ActionParams, BatchPayload};
use crate::filter::FilterCriteria;
use crate::types::{BatchResult, Item};

/// HTTP client for the batch service.
pub struct BatchClient {
    http: reqwest::Client,
    base_url: String,
    resource: String,
    token: Option<String>,
}

impl BatchClient {
    pub fn new(service: &ServiceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(service.timeout_secs.max(1)))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: service.base_url.trim_end_matches('/').to_owned(),
            resource: service.resource.clone(),
            token: resolve_token(&service.token_env),
        })
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}/api/v1/{}/{route}", self.base_url, self.resource)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Issue one batch call and return the per-item outcome.
    pub async fn dispatch(
        &self,
        action: BatchAction,
        payload: &BatchPayload,
        params: ActionParams,
    ) -> Result<BatchResult> {
        let url = self.endpoint(action.route());
        let body = BulkRequest::new(payload, params);
        let req = if action == BatchAction::Delete {
            self.http.delete(&url)
        } else {
            self.http.post(&url)
        };
        let resp = self
            .authorize(req)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("sending {} request", action.name()))?;
        let resp = check_status(resp).await?;
        let parsed: BulkResponse = resp
            .json()
            .await
            .with_context(|| format!("decoding {} response", action.name()))?;
        Ok(parsed.into())
    }

    /// Load up to `limit` items of the filtered collection plus its total size.
    pub async fn search(&self, filter: &FilterCriteria, limit: usize) -> Result<(Vec<Item>, usize)> {
        let url = self.endpoint("search");
        let resp = self
            .authorize(self.http.post(&url))
            .json(&SearchRequest { filter, limit })
            .send()
            .await
            .context("sending search request")?;
        let resp = check_status(resp).await?;
        let parsed: SearchResponse = resp.json().await.context("decoding search response")?;
        let total = parsed.total.unwrap_or(parsed.items.len());
        Ok((parsed.items, total))
    }
}

/// Turn a non-2xx response into an error carrying the response body.
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        bail!("service returned {status}");
    }
    bail!("service returned {status}: {body}")
}

/// Read the bearer token from the configured environment variable.
fn resolve_token(var: &str) -> Option<String> {
    if var.is_empty() {
        return None;
    }
    std::env::var(var)
        .ok()
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
}
