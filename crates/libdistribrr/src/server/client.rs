use anyhow::Context;
use reqwest::{Method, Url, header};

use crate::agent::client::{DEFAULT_CLIENT_TIMEOUT, check_response};
use crate::middleware::{CORRELATION_ID_HEADER, CorrelationId};

use super::{DeregisterRequest, RegisterRequest};

const USER_AGENT: &str = concat!("distribrr-client-", env!("CARGO_PKG_VERSION"));

/// Typed HTTP client an agent uses to talk to the coordinator.
#[derive(Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl ServerClient {
    pub fn new(addr: &str, token: &str) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: Url::parse(addr)
                .with_context(|| format!("invalid manager address {addr:?}"))?,
            http: reqwest::Client::builder()
                .timeout(DEFAULT_CLIENT_TIMEOUT)
                .build()?,
            token: token.to_owned(),
        })
    }

    fn request(&self, method: Method, endpoint: &str, cid: &CorrelationId) -> anyhow::Result<reqwest::RequestBuilder> {
        let url = self
            .base_url
            .join(&format!("/api/v1/{endpoint}"))
            .context("could not build manager URL")?;
        Ok(self
            .http
            .request(method, url)
            .header(header::AUTHORIZATION, self.token.as_str())
            .header(header::USER_AGENT, USER_AGENT)
            .header(CORRELATION_ID_HEADER, cid.as_str()))
    }

    pub async fn join(&self, cid: &CorrelationId, req: &RegisterRequest) -> anyhow::Result<()> {
        let response = self
            .request(Method::POST, "node/register", cid)?
            .json(req)
            .send()
            .await
            .context("error sending join request")?;
        check_response(response).await.map(drop)
    }

    pub async fn deregister(
        &self,
        cid: &CorrelationId,
        req: &DeregisterRequest,
    ) -> anyhow::Result<()> {
        let response = self
            .request(Method::POST, "node/deregister", cid)?
            .json(req)
            .send()
            .await
            .context("error sending deregister request")?;
        check_response(response).await.map(drop)
    }
}
