//! Shared utilities for integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use tower::ServiceExt;

use storefront_edge::config::EdgeConfig;
use storefront_edge::experiments::{ExperimentRegistry, FixedRandom, RandomSource};
use storefront_edge::http::{AppState, HttpServer, UpstreamClient};

pub const SECRET: &str = "test-secret";

type Routes = Arc<Mutex<HashMap<String, (u16, String)>>>;

/// In-process stand-in for the data server, answering fixed JSON per path.
pub struct MockDataServer {
    pub addr: SocketAddr,
    routes: Routes,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    delay: Arc<Mutex<Duration>>,
}

impl MockDataServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let delay = Arc::new(Mutex::new(Duration::ZERO));

        let (r, h, d) = (routes.clone(), hits.clone(), delay.clone());
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let (routes, hits, delay) = (r.clone(), h.clone(), d.clone());
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }

                    let request = String::from_utf8_lossy(&buf);
                    let path = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    *hits.lock().entry(path.clone()).or_insert(0) += 1;

                    let wait = *delay.lock();
                    tokio::time::sleep(wait).await;

                    let (status, body) = routes
                        .lock()
                        .get(&path)
                        .cloned()
                        .unwrap_or((404, r#"{"error":"not found"}"#.to_string()));
                    let status_text = match status {
                        200 => "200 OK",
                        404 => "404 Not Found",
                        500 => "500 Internal Server Error",
                        503 => "503 Service Unavailable",
                        _ => "200 OK",
                    };

                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_text,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, routes, hits, delay }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set(&self, path: &str, status: u16, body: Value) {
        self.routes.lock().insert(path.to_string(), (status, body.to_string()));
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().get(path).copied().unwrap_or(0)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Serve the usual CMS documents.
    pub fn with_content(self) -> Self {
        self.set("/header", 200, json!({ "title": "Shop", "links": ["Home", "Sale"] }));
        self.set("/footer", 200, json!({ "copyright": "2024" }));
        self.set("/global", 200, json!({ "currency": "USD" }));
        self
    }

    pub fn with_experiments(self, experiments: Value) -> Self {
        self.set("/experiments", 200, json!({ "experiments": experiments }));
        self
    }
}

pub fn experiment(id: &str, allocation: f64, cookie: &str, routing: bool) -> Value {
    json!({
        "id": id,
        "name": id,
        "description": "",
        "status": "active",
        "traffic_allocation": allocation,
        "variants": {
            "A": { "name": "Control", "description": "", "button_color": "blue", "button_text": "Add to Cart" },
            "B": { "name": "Treatment", "description": "", "button_color": "green", "button_text": "Buy Now" }
        },
        "cookie_name": cookie,
        "cookie_duration_days": 30,
        "routing": routing
    })
}

/// Button and layout experiments at the given allocations.
pub fn storefront_experiments(button_allocation: f64, layout_allocation: f64) -> Value {
    json!({
        "add-to-cart-button": experiment("add-to-cart-button", button_allocation, "ab_btn", false),
        "product-layout": experiment("product-layout", layout_allocation, "ab_layout", true),
    })
}

pub fn edge_config(data: &MockDataServer) -> EdgeConfig {
    let mut config = EdgeConfig::default();
    config.registry.url = format!("{}/experiments", data.url());
    config.registry.max_age_secs = 0;
    config.registry.fetch_timeout_ms = 500;
    config.content.url = data.url();
    config.content.fetch_timeout_ms = 500;
    config.revalidation.secret = SECRET.to_string();
    config
}

pub fn app_with(config: EdgeConfig, rng: Arc<dyn RandomSource>) -> (AppState, Router) {
    let registry = Arc::new(ExperimentRegistry::from_config(&config.registry, UpstreamClient::new()));
    let state = AppState::new(config, registry, rng);
    let app = HttpServer::new(state.clone()).app();
    (state, app)
}

pub fn app(data: &MockDataServer) -> (AppState, Router) {
    app_with(edge_config(data), Arc::new(FixedRandom(0.5)))
}

pub async fn get(app: &Router, uri: &str, cookie: Option<&str>) -> (Response<Body>, Value) {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

pub async fn send(app: &Router, request: Request<Body>) -> (Response<Body>, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (Response::from_parts(parts, Body::empty()), value)
}

pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}
