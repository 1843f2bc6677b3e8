use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;

use crate::agent::config::{AgentConfig, AgentSettings, HttpConfig, ManagerConfig};
use crate::agent::qbit::{AddTorrentOpts, TorrentClient};
use crate::agent::{self, Service};
use crate::node::NodeStatus;
use crate::server;
use crate::server::config::{HttpConfig as ServerHttpConfig, ServerConfig};
use crate::stats::ActiveDownload;
use crate::task::{Task, TaskEvent};

use super::test_util::setup_test_logging;

const TOKEN: &str = "secret";

struct StubTorrentClient {
    name: String,
    max_active: usize,
    fail: bool,
    active: Vec<ActiveDownload>,
    added: Arc<Mutex<Vec<(String, AddTorrentOpts)>>>,
}

impl StubTorrentClient {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            max_active: 3,
            fail: false,
            active: Vec::new(),
            added: Default::default(),
        }
    }
}

#[async_trait]
impl TorrentClient for StubTorrentClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_active_downloads(&self) -> usize {
        self.max_active
    }

    async fn add_torrent(&self, url: &str, opts: &AddTorrentOpts) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("client down");
        }
        self.added.lock().push((url.to_string(), opts.clone()));
        Ok(())
    }

    async fn active_downloads(&self) -> anyhow::Result<Vec<ActiveDownload>> {
        if self.fail {
            anyhow::bail!("client down");
        }
        Ok(self.active.clone())
    }
}

fn agent_config(token: &str) -> AgentConfig {
    AgentConfig {
        http: HttpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            token: token.to_string(),
        },
        agent: AgentSettings {
            node_name: "agent0".to_string(),
            client_addr: String::new(),
            labels: HashMap::from([("disktype".to_string(), "ssd".to_string())]),
        },
        manager: ManagerConfig::default(),
        clients: HashMap::new(),
    }
}

fn service_with_clients(clients: Vec<StubTorrentClient>) -> (Service, Vec<Arc<Mutex<Vec<(String, AddTorrentOpts)>>>>) {
    let mut map: HashMap<String, Arc<dyn TorrentClient>> = HashMap::new();
    let mut added = Vec::new();
    for client in clients {
        added.push(client.added.clone());
        map.insert(client.name.clone(), Arc::new(client));
    }
    (Service::for_tests(agent_config(TOKEN), map), added)
}

fn download_task() -> Task {
    Task {
        id: uuid::Uuid::new_v4(),
        download_url: "https://indexer.example/release.torrent".to_string(),
        name: "release".to_string(),
        category: "tv".to_string(),
        tags: "sonarr".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_start_task_fans_out_to_all_clients() {
    setup_test_logging();
    let (service, added) =
        service_with_clients(vec![StubTorrentClient::new("qbit01"), StubTorrentClient::new("qbit02")]);

    service.start_task(&download_task()).await.unwrap();

    for client_added in &added {
        let entries = client_added.lock();
        assert_eq!(entries.len(), 1);
        let (url, opts) = &entries[0];
        assert_eq!(url, "https://indexer.example/release.torrent");
        assert_eq!(opts.category.as_deref(), Some("tv"));
        assert_eq!(opts.tags.as_deref(), Some("sonarr"));
    }
}

#[tokio::test]
async fn test_start_task_fails_when_any_client_fails() {
    setup_test_logging();
    let mut bad = StubTorrentClient::new("qbit02");
    bad.fail = true;
    let (service, added) = service_with_clients(vec![StubTorrentClient::new("qbit01"), bad]);

    let err = service.start_task(&download_task()).await.unwrap_err();
    assert!(err.to_string().contains("1 of 2"));

    // The healthy client was still attempted.
    let attempted: usize = added.iter().map(|a| a.lock().len()).sum();
    assert_eq!(attempted, 1);
}

#[tokio::test]
async fn test_start_task_without_clients_is_an_error() {
    setup_test_logging();
    let (service, _) = service_with_clients(vec![]);
    assert!(service.start_task(&download_task()).await.is_err());
}

#[tokio::test]
async fn test_collect_stats_reports_client_capacity() {
    setup_test_logging();
    let mut busy = StubTorrentClient::new("qbit01");
    busy.active = vec![ActiveDownload {
        name: "other".to_string(),
        progress: 0.5,
        eta: 65,
    }];
    let mut down = StubTorrentClient::new("qbit02");
    down.fail = true;
    let (service, _) = service_with_clients(vec![busy, down]);

    let stats = service.collect_stats().await;

    let busy_stats = &stats.client_stats["qbit01"];
    assert_eq!(busy_stats.active_downloads_count, 1);
    assert!(busy_stats.ready);
    assert_eq!(busy_stats.status, crate::stats::ClientStatus::Ready);

    let down_stats = &stats.client_stats["qbit02"];
    assert_eq!(down_stats.status, crate::stats::ClientStatus::NotReady);
    assert_eq!(down_stats.active_downloads_count, 0);

    assert_eq!(stats.task_count, 1);
}

async fn spawn_agent_http(service: Arc<Service>) -> String {
    let app = agent::http::make_router(service);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_agent_http_surface() {
    setup_test_logging();
    let (service, added) = service_with_clients(vec![StubTorrentClient::new("qbit01")]);
    let base = spawn_agent_http(Arc::new(service)).await;
    let client = reqwest::Client::new();

    // verify: 200 with the token, 401 without.
    let response = client
        .get(format!("{base}/api/v1/verify"))
        .header("Authorization", TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = client.get(format!("{base}/api/v1/verify")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // labels round-trip.
    let response = client
        .get(format!("{base}/api/v1/labels"))
        .header("Authorization", TOKEN)
        .send()
        .await
        .unwrap();
    let labels: HashMap<String, String> = response.json().await.unwrap();
    assert_eq!(labels["disktype"], "ssd");

    // stats include the configured client.
    let response = client
        .get(format!("{base}/api/v1/stats"))
        .header("Authorization", TOKEN)
        .send()
        .await
        .unwrap();
    let stats: crate::stats::Stats = response.json().await.unwrap();
    assert!(stats.client_stats.contains_key("qbit01"));

    // A task event lands in the torrent client.
    let event = TaskEvent::new(download_task());
    let response = client
        .post(format!("{base}/api/v1/tasks"))
        .header("Authorization", TOKEN)
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(added[0].lock().len(), 1);
}

#[tokio::test]
async fn test_agent_registers_and_deregisters_with_coordinator() {
    setup_test_logging();

    // Real coordinator.
    let server_service = Arc::new(server::Service::new(
        ServerConfig {
            http: ServerHttpConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                token: TOKEN.to_string(),
            },
            nodes: Vec::new(),
        },
        None,
    ));
    let server_app = server::http::make_router(server_service.clone());
    let server_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server_listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(server_listener, server_app).await;
    });

    // Real agent with its HTTP API up, so the reverse verification works.
    // No token of its own: it falls back to the shared manager token.
    let agent_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let agent_addr = agent_listener.local_addr().unwrap();
    let mut cfg = agent_config("");
    cfg.agent.client_addr = format!("http://{agent_addr}");
    cfg.manager = ManagerConfig {
        addr: format!("http://{server_addr}"),
        token: TOKEN.to_string(),
    };
    let agent_service = Arc::new(Service::new(cfg).unwrap());
    let agent_app = agent::http::make_router(agent_service.clone());
    tokio::spawn(async move {
        let _ = axum::serve(agent_listener, agent_app).await;
    });

    // First attempt fires immediately and should succeed.
    agent_service.register_loop().await.unwrap();

    assert_eq!(server_service.registry().len(), 1);
    let node = server_service.registry().get("agent0").unwrap();
    assert_eq!(node.status(), NodeStatus::Ready);
    assert_eq!(node.labels()["disktype"], "ssd");

    agent_service.deregister().await.unwrap();
    assert_eq!(
        server_service.registry().get("agent0").unwrap().status(),
        NodeStatus::Removed
    );
}
