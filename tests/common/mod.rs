#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bom_collector::point::Point;
use bom_collector::sink::{Destination, MetricsSink, SinkError};
use reqwest::Url;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

pub const OBSERVATIONS: &str = include_str!("../fixtures/observations.json");

/// Serve `router` on a random local port, returning the address it's bound to.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener).unwrap().serve(router.into_make_service());
    tokio::spawn(server);
    addr
}

pub fn url(addr: SocketAddr, path: &str) -> Url {
    Url::parse(&format!("http://{}{}", addr, path)).unwrap()
}

/// Stand in for the Bureau, serving a fixed body and failing a given number of requests first.
#[derive(Clone, Debug)]
pub struct Upstream {
    body: &'static str,
    failures: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    headers: Arc<Mutex<Option<HeaderMap>>>,
}

impl Upstream {
    pub fn new(body: &'static str) -> Self {
        Upstream {
            body,
            failures: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
            headers: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(body: &'static str, failures: usize) -> Self {
        let upstream = Self::new(body);
        upstream.failures.store(failures, Ordering::SeqCst);
        upstream
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.headers.lock().unwrap().clone()
    }

    /// Start serving the document at `/fwo/IDN60901/IDN60901.94768.json`
    pub async fn start(&self) -> Url {
        let router = Router::new()
            .route("/fwo/IDN60901/IDN60901.94768.json", get(observations))
            .with_state(self.clone());

        url(serve(router).await, "/fwo/IDN60901/IDN60901.94768.json")
    }
}

async fn observations(State(upstream): State<Upstream>, headers: HeaderMap) -> Response {
    upstream.requests.fetch_add(1, Ordering::SeqCst);
    *upstream.headers.lock().unwrap() = Some(headers);

    let fail = upstream
        .failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();

    if fail {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    } else {
        ([(CONTENT_TYPE, "application/json")], upstream.body).into_response()
    }
}

/// `MetricsSink` that keeps every batch written to it
#[derive(Debug, Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<(Destination, Vec<Point>)>>,
}

impl RecordingSink {
    pub fn batches(&self) -> Vec<(Destination, Vec<Point>)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn write(&self, destination: &Destination, points: &[Point]) -> Result<usize, SinkError> {
        self.batches
            .lock()
            .unwrap()
            .push((destination.clone(), points.to_vec()));
        Ok(points.len())
    }
}

/// Layer counting error level events emitted by this crate
#[derive(Clone, Debug, Default)]
pub struct ErrorCounter {
    errors: Arc<AtomicUsize>,
}

impl ErrorCounter {
    pub fn count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// Count errors logged on the current thread until the guard is dropped
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() == Level::ERROR && meta.target().starts_with("bom_collector") {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }
}
