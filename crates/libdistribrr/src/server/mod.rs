pub mod client;
pub mod config;
pub mod http;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, error_span, info, trace, warn};

use crate::agent::client::AgentClient;
use crate::dispatcher::Dispatcher;
use crate::middleware::CorrelationId;
use crate::node::{Node, NodeStatus, NodeView, ROLE_WORKER};
use crate::registry::NodeRegistry;
use crate::spawn_utils::{spawn, spawn_with_cancel};
use crate::task::TaskEvent;
use crate::token;

use config::ServerConfig;

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node_name: String,
    pub client_addr: String,
    /// The token the coordinator will use to call back into the agent. The
    /// register handler overwrites it with the presented bearer.
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeregisterRequest {
    pub node_name: String,
    #[serde(default)]
    pub client_addr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("could not register node: bad token")]
    Auth,
    #[error("could not verify agent: {0:#}")]
    Verify(anyhow::Error),
    #[error("could not persist node roster: {0:#}")]
    Persistence(anyhow::Error),
}

impl From<RegisterError> for crate::api_error::ApiError {
    fn from(value: RegisterError) -> Self {
        let status = match &value {
            RegisterError::Auth => ::http::StatusCode::UNAUTHORIZED,
            RegisterError::Verify(_) | RegisterError::Persistence(_) => {
                ::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new_from_anyhow(status, anyhow::Error::new(value))
    }
}

/// The coordinator: owns the registry, verifies and admits agents, health
/// checks them, and dispatches task events.
pub struct Service {
    http: config::HttpConfig,
    config_path: Option<PathBuf>,
    registry: Arc<NodeRegistry>,
    dispatcher: Dispatcher,
    // write_to_file is already atomic; this only serializes concurrent flushes.
    roster_flush_lock: tokio::sync::Mutex<()>,
}

impl Service {
    pub fn new(mut cfg: ServerConfig, config_path: Option<PathBuf>) -> Self {
        if cfg.http.token.is_empty() {
            cfg.http.token = token::generate(16);
            warn!(
                "no API token configured, generated one: {}",
                cfg.http.token
            );
        }

        let registry = Arc::new(NodeRegistry::new());
        for entry in &cfg.nodes {
            match Node::new(&entry.name, &entry.addr, &entry.token, ROLE_WORKER) {
                // Reloaded nodes start NotReady until the first health tick.
                Ok(node) => registry.insert(Arc::new(node)),
                Err(e) => warn!(node = %entry.name, "skipping roster entry: {e:#}"),
            }
        }

        Self {
            http: cfg.http,
            config_path,
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            roster_flush_lock: Default::default(),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn api_token(&self) -> Arc<str> {
        Arc::from(self.http.token.as_str())
    }

    pub fn node_views(&self) -> Vec<NodeView> {
        self.registry.list().iter().map(|node| node.view()).collect()
    }

    pub async fn on_register(
        &self,
        cid: &CorrelationId,
        req: RegisterRequest,
    ) -> Result<(), RegisterError> {
        debug!(node = %req.node_name, "register node");

        if req.token != self.http.token {
            return Err(RegisterError::Auth);
        }

        // Call back into the agent before admitting it: the advertised
        // address must answer /verify with the advertised token.
        let probe = AgentClient::new(&req.client_addr, &req.node_name, &req.token)
            .map_err(RegisterError::Verify)?;
        probe.verify(cid).await.map_err(RegisterError::Verify)?;

        let node = self
            .registry
            .upsert(&req.node_name, &req.client_addr, &req.token, req.labels)
            .map_err(RegisterError::Verify)?;

        if let Err(e) = self.flush_roster().await {
            // The in-memory registration stands; only the file write failed.
            error!(node = %node.name, "could not write node to config: {e:#}");
            return Err(RegisterError::Persistence(e));
        }

        info!(node = %node.name, addr = %node.addr, "registered node");
        Ok(())
    }

    /// Soft delete: the node stays listed as Removed and the roster file is
    /// left alone. Re-registering under the same name reinstates it.
    pub fn deregister(&self, req: &DeregisterRequest) {
        info!(node = %req.node_name, "deregister node");
        if !self.registry.mark_removed(&req.node_name) {
            warn!(node = %req.node_name, "deregister for unknown node");
        }
    }

    /// Hands the event to the dispatcher on a task detached from the caller's
    /// request, so a client disconnect cannot abort the fan-out.
    pub fn add_task(self: &Arc<Self>, cid: &CorrelationId, event: TaskEvent) {
        let service = self.clone();
        let cid = cid.clone();
        spawn(
            error_span!("dispatch", correlation_id = %cid, task_id = %event.task.id),
            async move {
                service.dispatcher.dispatch(&cid, &event).await;
                Ok(())
            },
        );
    }

    async fn flush_roster(&self) -> anyhow::Result<()> {
        let Some(path) = self.config_path.as_deref() else {
            debug!("no config file configured, skipping roster write");
            return Ok(());
        };
        let _guard = self.roster_flush_lock.lock().await;
        let snapshot = ServerConfig {
            http: self.http.clone(),
            nodes: self.registry.snapshot(),
        };
        snapshot.write_to_file(path).await
    }

    pub async fn run_health_checks(&self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.health_check_pass(&CorrelationId::generate()).await;
        }
    }

    /// One liveness pass over every node that is not Removed, in parallel.
    pub async fn health_check_pass(&self, cid: &CorrelationId) {
        let nodes: Vec<_> = self
            .registry
            .list()
            .into_iter()
            .filter(|node| node.status() != NodeStatus::Removed)
            .collect();

        join_all(nodes.iter().map(|node| async move {
            match node.health_check(cid).await {
                Ok(()) => {
                    node.set_status(NodeStatus::Ready);
                    trace!(node = %node.name, status = ?node.status(), "healthcheck");
                }
                Err(e) => {
                    error!(node = %node.name, "agent healthcheck failed: {e:#}");
                    node.set_status(NodeStatus::Unknown);
                }
            }
        }))
        .await;
    }
}

/// Runs the coordinator until the token is cancelled. In-flight dispatches
/// are not awaited on shutdown.
pub async fn run(
    cfg: ServerConfig,
    config_path: Option<PathBuf>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let service = Arc::new(Service::new(cfg, config_path));

    spawn_with_cancel(error_span!("health_check"), cancel.clone(), {
        let service = service.clone();
        async move { service.run_health_checks().await }
    });

    let addr = format!("{}:{}", service.http.host, service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not open listener on {addr}"))?;
    info!("listening on {}", listener.local_addr()?);

    let app = http::make_router(service.clone());
    let serve = async move { axum::serve(listener, app).await };
    tokio::select! {
        _ = cancel.cancelled() => {
            info!("shutting down server");
            Ok(())
        }
        r = serve => r.context("error running HTTP API"),
    }
}
