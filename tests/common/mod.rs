//! Shared utilities for gateway integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::Json;
use axum::Router;
use serde_json::{json, Map, Value};
use tokio::net::{TcpListener, UnixListener};

use fedi_gateway::config::{ConfigStore, PolicyConfig, Protocol};
use fedi_gateway::http::HttpServer;
use fedi_gateway::lifecycle::Shutdown;
use fedi_gateway::net::Listener;

/// A mock upstream that echoes what it received as JSON.
pub struct Upstream {
    pub addr: Option<SocketAddr>,
    hits: Arc<AtomicUsize>,
}

impl Upstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> String {
        match self.addr {
            Some(addr) => format!("http://{}", addr),
            None => "http://localhost".to_string(),
        }
    }
}

fn echo_router(hits: Arc<AtomicUsize>) -> Router {
    Router::new().fallback(echo).with_state(hits)
}

async fn echo(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    if uri.path() == "/slow" {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let mut seen = Map::new();
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        seen.insert(name.as_str().to_string(), Value::String(values.join(", ")));
    }

    Json(json!({
        "method": method.as_str(),
        "uri": uri.to_string(),
        "headers": seen,
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Start an echo upstream on an ephemeral tcp port.
pub async fn start_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let app = echo_router(hits.clone());

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Upstream { addr: Some(addr), hits }
}

/// Start an echo upstream on a unix socket.
pub async fn start_unix_upstream(path: &Path) -> Upstream {
    let listener = UnixListener::bind(path).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let app = echo_router(hits.clone());

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Upstream { addr: None, hits }
}

/// Gateway config pointing at `upstream_url`, listening on an ephemeral port.
pub fn gateway_config(upstream_url: &str) -> PolicyConfig {
    let mut config = PolicyConfig::default();
    config.listen.protocol = Protocol::Tcp;
    config.listen.address = "127.0.0.1".to_string();
    config.listen.port = 0;
    config.upstream.url = upstream_url.to_string();
    config.limits.max_cc = 5;
    config.limits.max_mentions = 3;
    config.limits.keywords = vec!["forbidden".to_string()];
    config
}

pub struct Gateway {
    pub addr: Option<SocketAddr>,
    pub store: Arc<ConfigStore>,
    pub shutdown: Shutdown,
    pub handle: tokio::task::JoinHandle<()>,
}

impl Gateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr.unwrap(), path)
    }
}

/// Start a gateway serving `config`.
pub async fn start_gateway(config: PolicyConfig) -> Gateway {
    start_gateway_with_store(Arc::new(ConfigStore::new(config))).await
}

pub async fn start_gateway_with_store(store: Arc<ConfigStore>) -> Gateway {
    let listener = Listener::bind(&store.current().listen).await.unwrap();
    let addr = listener.local_addr();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(store.clone());
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    Gateway {
        addr,
        store,
        shutdown,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// An activity with `cc` recipients and `mentions` mention tags.
pub fn activity(cc: usize, mentions: usize, content: &str) -> String {
    let cc: Vec<String> = (0..cc).map(|i| format!("https://remote.example/users/{}", i)).collect();
    let tags: Vec<Value> = (0..mentions)
        .map(|i| json!({"type": "Mention", "href": format!("https://remote.example/users/{}", i)}))
        .collect();
    json!({
        "type": "Create",
        "actor": "https://remote.example/users/alice",
        "cc": cc,
        "object": {"type": "Note", "content": content, "tag": tags},
    })
    .to_string()
}

pub async fn post_activity(url: &str, body: String) -> reqwest::Response {
    client()
        .post(url)
        .header("content-type", "application/activity+json")
        .body(body)
        .send()
        .await
        .expect("gateway unreachable")
}
