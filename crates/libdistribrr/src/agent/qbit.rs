use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use reqwest::{Url, header};
use serde::Deserialize;

use crate::agent::client::{check_response, json_body};
use crate::agent::config::TorrentClientConfig;
use crate::stats::ActiveDownload;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Default)]
pub struct AddTorrentOpts {
    pub category: Option<String>,
    pub tags: Option<String>,
}

/// What the agent needs from a torrent client: add a download, report the
/// active ones. Everything else the client does is its own business.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    fn name(&self) -> &str;
    fn max_active_downloads(&self) -> usize;
    async fn add_torrent(&self, url: &str, opts: &AddTorrentOpts) -> anyhow::Result<()>;
    async fn active_downloads(&self) -> anyhow::Result<Vec<ActiveDownload>>;
}

/// qBittorrent WebUI v2 adapter. Authenticates with a session cookie and
/// re-logs-in once when the session expires.
pub struct QbitClient {
    name: String,
    base_url: Url,
    user: String,
    pass: String,
    basic_user: String,
    basic_pass: String,
    max_active_downloads: usize,
    http: reqwest::Client,
    sid: Mutex<Option<String>>,
}

impl QbitClient {
    pub fn new(name: &str, cfg: &TorrentClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_owned(),
            base_url: Url::parse(&cfg.host)
                .with_context(|| format!("invalid qbittorrent host {:?}", cfg.host))?,
            user: cfg.user.clone(),
            pass: cfg.pass.clone(),
            basic_user: cfg.basic_user.clone(),
            basic_pass: cfg.basic_pass.clone(),
            max_active_downloads: cfg.rules.torrents.max_active_downloads,
            http: reqwest::Client::builder().timeout(CLIENT_TIMEOUT).build()?,
            sid: Mutex::new(None),
        })
    }

    fn apply_basic_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.basic_user.is_empty() {
            return builder;
        }
        builder.basic_auth(&self.basic_user, Some(&self.basic_pass))
    }

    async fn login(&self) -> anyhow::Result<()> {
        let url = self.base_url.join("/api/v2/auth/login")?;
        let response = self
            .apply_basic_auth(self.http.post(url))
            .form(&[("username", self.user.as_str()), ("password", self.pass.as_str())])
            .send()
            .await
            .with_context(|| format!("error logging in to client {}", self.name))?;
        let response = check_response(response).await?;

        let sid = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .find(|cookie| cookie.starts_with("SID="))
            .map(str::to_owned)
            .with_context(|| format!("client {} returned no session cookie", self.name))?;
        *self.sid.lock() = Some(sid);
        Ok(())
    }

    /// Sends an authenticated request, logging in first when there is no
    /// session yet and once more when the session turns out to be expired.
    async fn send_authed(
        &self,
        build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    ) -> anyhow::Result<reqwest::Response> {
        if self.sid.lock().is_none() {
            self.login().await?;
        }
        let cookie = self.sid.lock().clone().unwrap_or_default();
        let response = self
            .apply_basic_auth(build(&self.http))
            .header(header::COOKIE, cookie.as_str())
            .send()
            .await
            .with_context(|| format!("error during request for client {}", self.name))?;
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }

        self.login().await?;
        let cookie = self.sid.lock().clone().unwrap_or_default();
        self.apply_basic_auth(build(&self.http))
            .header(header::COOKIE, cookie.as_str())
            .send()
            .await
            .with_context(|| format!("error during request for client {}", self.name))
    }
}

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    eta: i64,
}

impl From<TorrentInfo> for ActiveDownload {
    fn from(info: TorrentInfo) -> Self {
        ActiveDownload {
            name: info.name,
            progress: info.progress,
            eta: info.eta,
        }
    }
}

#[async_trait]
impl TorrentClient for QbitClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_active_downloads(&self) -> usize {
        self.max_active_downloads
    }

    async fn add_torrent(&self, url: &str, opts: &AddTorrentOpts) -> anyhow::Result<()> {
        let endpoint = self.base_url.join("/api/v2/torrents/add")?;
        let mut form: Vec<(&str, String)> = vec![("urls", url.to_owned())];
        if let Some(category) = &opts.category {
            form.push(("category", category.clone()));
        }
        if let Some(tags) = &opts.tags {
            form.push(("tags", tags.clone()));
        }
        let response = self
            .send_authed(|http| http.post(endpoint.clone()).form(&form))
            .await?;
        check_response(response).await.map(drop)
    }

    async fn active_downloads(&self) -> anyhow::Result<Vec<ActiveDownload>> {
        let endpoint = self
            .base_url
            .join("/api/v2/torrents/info?filter=downloading")?;
        let response = self.send_authed(|http| http.get(endpoint.clone())).await?;
        let response = check_response(response).await?;
        let torrents: Vec<TorrentInfo> = json_body(response).await?;
        Ok(torrents.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_torrent_info_maps_to_active_download() {
        let raw = r#"[
            {"name": "ubuntu.iso", "progress": 0.5, "eta": 65, "state": "downloading", "size": 1000},
            {"name": "fedora.iso", "progress": 0.0, "eta": 8640000}
        ]"#;
        let torrents: Vec<TorrentInfo> = serde_json::from_str(raw).unwrap();
        let downloads: Vec<ActiveDownload> = torrents.into_iter().map(Into::into).collect();
        assert_eq!(downloads.len(), 2);
        assert_eq!(downloads[0].name, "ubuntu.iso");
        assert_eq!(downloads[0].eta, 65);
        assert_eq!(downloads[1].progress, 0.0);
    }
}
