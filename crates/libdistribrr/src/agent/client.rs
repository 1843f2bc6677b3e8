use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use reqwest::{Method, Url, header};
use serde::de::DeserializeOwned;

use crate::middleware::{CORRELATION_ID_HEADER, CorrelationId};
use crate::stats::Stats;
use crate::task::TaskEvent;

pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENT: &str = concat!("distribrr-server-", env!("CARGO_PKG_VERSION"));

/// Typed HTTP client the coordinator uses to reach a single agent.
/// Constructible from (addr, token) alone so nodes reloaded from the
/// persisted roster can rebuild theirs.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: Url,
    name: String,
    token: String,
}

impl AgentClient {
    pub fn new(addr: &str, name: &str, token: &str) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: Url::parse(addr).with_context(|| format!("invalid agent address {addr:?}"))?,
            http: reqwest::Client::builder()
                .timeout(DEFAULT_CLIENT_TIMEOUT)
                .build()?,
            name: name.to_owned(),
            token: token.to_owned(),
        })
    }

    fn url(&self, endpoint: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(&format!("/api/v1/{endpoint}"))
            .with_context(|| format!("could not build URL for node {}", self.name))
    }

    fn request(&self, method: Method, url: Url, cid: &CorrelationId) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header(header::AUTHORIZATION, self.token.as_str())
            .header(header::USER_AGENT, USER_AGENT)
            .header(CORRELATION_ID_HEADER, cid.as_str())
    }

    async fn send(&self, method: Method, url: Url, cid: &CorrelationId) -> anyhow::Result<reqwest::Response> {
        let response = self
            .request(method, url, cid)
            .send()
            .await
            .with_context(|| format!("error during request for node {}", self.name))?;
        check_response(response).await
    }

    /// Reverse-verification call made before a node is admitted to the
    /// registry: 2xx means the agent recognizes the advertised token.
    pub async fn verify(&self, cid: &CorrelationId) -> anyhow::Result<()> {
        self.send(Method::GET, self.url("verify")?, cid).await.map(drop)
    }

    pub async fn health_check(&self, cid: &CorrelationId) -> anyhow::Result<()> {
        self.send(Method::GET, self.url("healthz/liveness")?, cid)
            .await
            .map(drop)
    }

    pub async fn get_stats(&self, cid: &CorrelationId) -> anyhow::Result<Stats> {
        let response = self.send(Method::GET, self.url("stats")?, cid).await?;
        json_body(response).await
    }

    pub async fn get_labels(&self, cid: &CorrelationId) -> anyhow::Result<HashMap<String, String>> {
        let response = self.send(Method::GET, self.url("labels")?, cid).await?;
        json_body(response).await
    }

    pub async fn start_task(&self, cid: &CorrelationId, event: &TaskEvent) -> anyhow::Result<()> {
        let response = self
            .request(Method::POST, self.url("tasks")?, cid)
            .json(event)
            .send()
            .await
            .with_context(|| format!("error during request for node {}", self.name))?;
        check_response(response).await.map(drop)
    }
}

pub(crate) async fn check_response(r: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if r.status().is_success() {
        return Ok(r);
    }
    let status = r.status();
    let url = r.url().clone();
    let body = r
        .text()
        .await
        .with_context(|| format!("cannot read response body for request to {url} ({status})"))?;
    anyhow::bail!("{} -> {}: {}", url, status, body)
}

pub(crate) async fn json_body<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
    let url = response.url().clone();
    let body = response.bytes().await?;
    serde_json::from_slice(&body).with_context(|| {
        format!(
            "error deserializing response from {:?} as {:?}",
            url,
            std::any::type_name::<T>(),
        )
    })
}
