pub mod client;
pub mod config;
pub mod http;
pub mod probes;
pub mod qbit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, error_span, info};

use crate::middleware::CorrelationId;
use crate::server::client::ServerClient;
use crate::server::{DeregisterRequest, RegisterRequest};
use crate::spawn_utils::spawn_with_cancel;
use crate::stats::{ClientStats, ClientStatus, Stats};
use crate::task::Task;

use config::AgentConfig;
use qbit::{AddTorrentOpts, QbitClient, TorrentClient};

pub const REGISTER_INTERVAL: Duration = Duration::from_secs(10);

/// A worker process fronting one or more torrent clients on a host. It
/// registers itself with the coordinator, reports capacity, and performs the
/// actual downloads.
pub struct Service {
    cfg: AgentConfig,
    clients: HashMap<String, Arc<dyn TorrentClient>>,
    server_client: Option<ServerClient>,
}

impl Service {
    pub fn new(mut cfg: AgentConfig) -> anyhow::Result<Self> {
        if cfg.agent.node_name.is_empty() {
            cfg.agent.node_name = gethostname::gethostname().to_string_lossy().into_owned();
            info!(node = %cfg.agent.node_name, "node name not configured, using hostname");
        }
        if cfg.http.token.is_empty() {
            // The coordinator verifies agents with the shared bearer, so an
            // agent without its own token accepts that one.
            cfg.http.token = cfg.manager.token.clone();
        }

        let mut clients: HashMap<String, Arc<dyn TorrentClient>> = HashMap::new();
        for (name, client_cfg) in &cfg.clients {
            clients.insert(name.clone(), Arc::new(QbitClient::new(name, client_cfg)?));
        }

        let server_client = if !cfg.manager.addr.is_empty() && !cfg.manager.token.is_empty() {
            Some(ServerClient::new(&cfg.manager.addr, &cfg.manager.token)?)
        } else {
            None
        };

        Ok(Self {
            cfg,
            clients,
            server_client,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        cfg: AgentConfig,
        clients: HashMap<String, Arc<dyn TorrentClient>>,
    ) -> Self {
        Self {
            cfg,
            clients,
            server_client: None,
        }
    }

    pub fn api_token(&self) -> Arc<str> {
        Arc::from(self.cfg.http.token.as_str())
    }

    pub fn labels(&self) -> HashMap<String, String> {
        self.cfg.agent.labels.clone()
    }

    /// Keeps knocking on the coordinator's door every 10s until a join
    /// succeeds, then stops.
    pub async fn register_loop(&self) -> anyhow::Result<()> {
        let Some(client) = &self.server_client else {
            info!("no manager configured, skipping registration");
            return Ok(());
        };

        let mut interval = tokio::time::interval(REGISTER_INTERVAL);
        loop {
            interval.tick().await;
            let cid = CorrelationId::generate();
            let req = RegisterRequest {
                node_name: self.cfg.agent.node_name.clone(),
                client_addr: self.cfg.agent.client_addr.clone(),
                token: self.cfg.http.token.clone(),
                labels: self.cfg.agent.labels.clone(),
            };
            match client.join(&cid, &req).await {
                Ok(()) => {
                    info!(manager = %self.cfg.manager.addr, "successfully joined manager");
                    return Ok(());
                }
                Err(e) => {
                    error!(manager = %self.cfg.manager.addr, "could not register agent with manager: {e:#}");
                }
            }
        }
    }

    pub async fn deregister(&self) -> anyhow::Result<()> {
        let Some(client) = &self.server_client else {
            return Ok(());
        };
        info!("deregistering node with manager");
        let req = DeregisterRequest {
            node_name: self.cfg.agent.node_name.clone(),
            client_addr: self.cfg.agent.client_addr.clone(),
        };
        client
            .deregister(&CorrelationId::generate(), &req)
            .await
            .context("could not deregister node")
    }

    /// Host probes plus per-client capacity, gathered fresh per request.
    pub async fn collect_stats(&self) -> Stats {
        let mut stats = probes::collect();

        for client_cfg in self.cfg.clients.values() {
            for rule in &client_cfg.rules.storage {
                stats
                    .disk_path_stats
                    .insert(rule.path.clone(), probes::disk(&rule.path));
            }
        }

        let client_stats = join_all(self.clients.values().map(|client| async move {
            match client.active_downloads().await {
                Ok(active) => ClientStats {
                    name: client.name().to_owned(),
                    active_downloads_count: active.len(),
                    ready: active.len() < client.max_active_downloads(),
                    max_active_downloads_allowed: client.max_active_downloads(),
                    active_downloads: active,
                    status: ClientStatus::Ready,
                },
                Err(e) => {
                    error!(client = %client.name(), "could not load active torrents: {e:#}");
                    ClientStats {
                        name: client.name().to_owned(),
                        status: ClientStatus::NotReady,
                        ..Default::default()
                    }
                }
            }
        }))
        .await;

        for entry in client_stats {
            stats.client_stats.insert(entry.name.clone(), entry);
        }
        stats.task_count = stats
            .client_stats
            .values()
            .map(|client| client.active_downloads_count)
            .sum();
        stats
    }

    /// Sends the download to every configured torrent client in parallel.
    pub async fn start_task(&self, task: &Task) -> anyhow::Result<()> {
        if self.clients.is_empty() {
            bail!("no torrent clients configured");
        }

        let opts = AddTorrentOpts {
            category: (!task.category.is_empty()).then(|| task.category.clone()),
            tags: (!task.tags.is_empty()).then(|| task.tags.clone()),
        };

        let opts = &opts;
        let results = join_all(self.clients.values().map(|client| async move {
            debug!(torrent = %task.name, client = %client.name(), "adding torrent");
            client
                .add_torrent(&task.download_url, opts)
                .await
                .with_context(|| {
                    format!("error adding torrent {} to client {}", task.name, client.name())
                })
        }))
        .await;

        let mut failed = 0;
        for result in &results {
            if let Err(e) = result {
                error!("{e:#}");
                failed += 1;
            }
        }
        if failed > 0 {
            bail!("{failed} of {} torrent clients failed to add the torrent", results.len());
        }
        debug!(torrent = %task.name, "successfully added torrent");
        Ok(())
    }
}

/// Runs the agent until the token is cancelled, then deregisters from the
/// coordinator before returning.
pub async fn run(cfg: AgentConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let service = Arc::new(Service::new(cfg)?);

    spawn_with_cancel(error_span!("register"), cancel.clone(), {
        let service = service.clone();
        async move { service.register_loop().await }
    });

    let addr = format!("{}:{}", service.cfg.http.host, service.cfg.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not open listener on {addr}"))?;
    info!("listening on {}", listener.local_addr()?);

    let app = http::make_router(service.clone());
    let serve = async move { axum::serve(listener, app).await };
    tokio::select! {
        _ = cancel.cancelled() => {
            info!("shutting down agent");
            if let Err(e) = service.deregister().await {
                error!("{e:#}");
                return Err(e);
            }
            Ok(())
        }
        r = serve => r.context("error running agent HTTP API"),
    }
}
