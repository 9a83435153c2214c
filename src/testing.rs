// Deterministic collaborators for coordinator tests

use crate::models::capture::Frame;
use crate::models::pose::{EstimatorOptions, Keypoint, Pose, PoseError, PoseResult, Variant};
use crate::platform::pose::{EstimatorFactory, PoseEstimator};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

// ==============================================================================
// Scripted Estimator
// ==============================================================================

#[derive(Default)]
struct Script {
    created: Mutex<Vec<Variant>>,
    calls: Mutex<Vec<Variant>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    fail_on_call: Mutex<Option<usize>>,
    fail_create: AtomicBool,
    fail_dispose: AtomicBool,
    delay: Mutex<Duration>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

/// Factory whose estimators return one centred pose per frame and record
/// everything that happens to them
#[derive(Clone, Default)]
pub(crate) struct ScriptedFactory {
    script: Arc<Script>,
}

impl ScriptedFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th estimate call (1-based, counted across all estimators)
    pub(crate) fn failing_on_call(self, n: usize) -> Self {
        *self.script.fail_on_call.lock().unwrap() = Some(n);
        self
    }

    pub(crate) fn failing_dispose(self) -> Self {
        self.script.fail_dispose.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        *self.script.delay.lock().unwrap() = delay;
        self
    }

    /// Each estimate call consumes one permit from `gate` before returning
    pub(crate) fn gated(self, gate: Arc<Semaphore>) -> Self {
        *self.script.gate.lock().unwrap() = Some(gate);
        self
    }

    pub(crate) fn fail_create(&self, fail: bool) {
        self.script.fail_create.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn created(&self) -> Vec<Variant> {
        self.script.created.lock().unwrap().clone()
    }

    /// Variant of the estimator behind every estimate call, in order
    pub(crate) fn calls(&self) -> Vec<Variant> {
        self.script.calls.lock().unwrap().clone()
    }

    pub(crate) fn live(&self) -> usize {
        self.script.live.load(Ordering::SeqCst)
    }

    pub(crate) fn max_live(&self) -> usize {
        self.script.max_live.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.script.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EstimatorFactory for ScriptedFactory {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create(
        &self,
        variant: Variant,
        _options: &EstimatorOptions,
    ) -> PoseResult<Box<dyn PoseEstimator>> {
        if self.script.fail_create.load(Ordering::SeqCst) {
            return Err(PoseError::ModelLoadFailed(format!("{} unavailable", variant)));
        }
        self.script.created.lock().unwrap().push(variant);
        let live = self.script.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(ScriptedEstimator {
            variant,
            script: self.script.clone(),
        }))
    }
}

pub(crate) struct ScriptedEstimator {
    variant: Variant,
    script: Arc<Script>,
}

#[async_trait]
impl PoseEstimator for ScriptedEstimator {
    fn variant(&self) -> Variant {
        self.variant
    }

    async fn estimate(&mut self, frame: &Frame) -> PoseResult<Vec<Pose>> {
        let concurrent = self.script.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.max_concurrent.fetch_max(concurrent, Ordering::SeqCst);

        let gate = self.script.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let delay = *self.script.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let call = {
            let mut calls = self.script.calls.lock().unwrap();
            calls.push(self.variant);
            calls.len()
        };
        self.script.concurrent.fetch_sub(1, Ordering::SeqCst);

        if *self.script.fail_on_call.lock().unwrap() == Some(call) {
            return Err(PoseError::InferenceFailed(format!("scripted failure on call {}", call)));
        }

        let (cx, cy) = (frame.width() as f32 / 2.0, frame.height() as f32 / 2.0);
        Ok(vec![Pose::new(vec![Keypoint::new("nose", cx, cy, 0.9)]).with_score(0.9)])
    }

    async fn dispose(self: Box<Self>) -> PoseResult<()> {
        let fail = self.script.fail_dispose.load(Ordering::SeqCst);
        drop(self);
        if fail {
            return Err(PoseError::DisposeFailed("scripted dispose failure".to_string()));
        }
        Ok(())
    }
}

impl Drop for ScriptedEstimator {
    fn drop(&mut self) {
        self.script.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ==============================================================================
// HTTP Backend Stub
// ==============================================================================

/// Minimal HTTP server answering every request with a canned response
pub(crate) struct StubBackend {
    addr: std::net::SocketAddr,
    request_lines: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl StubBackend {
    pub(crate) async fn start(status: u16, body: String) -> Self {
        Self::spawn(Some((status, body))).await
    }

    /// Accepts requests and never answers them
    pub(crate) async fn hanging() -> Self {
        Self::spawn(None).await
    }

    async fn spawn(response: Option<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let request_lines = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let lines = request_lines.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let lines = lines.clone();
                let response = response.clone();
                tokio::spawn(async move {
                    serve(stream, lines, response).await;
                });
            }
        });

        Self {
            addr,
            request_lines,
        }
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) async fn request_lines(&self) -> Vec<String> {
        self.request_lines.lock().await.clone()
    }
}

async fn serve(
    mut stream: TcpStream,
    lines: Arc<tokio::sync::Mutex<Vec<String>>>,
    response: Option<(u16, String)>,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let request_line = head.lines().next().unwrap_or_default().to_string();
    let lower = head.to_lowercase();
    let content_length = lower
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok());
    let chunked = lower.contains("transfer-encoding: chunked");

    loop {
        let body = &buffer[header_end..];
        let complete = match content_length {
            Some(length) => body.len() >= length,
            None if chunked => find(body, b"0\r\n\r\n").is_some(),
            None => true,
        };
        if complete {
            break;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }

    lines.lock().await.push(request_line);

    match response {
        Some((status, body)) => {
            let reply = format!(
                "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
        None => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
