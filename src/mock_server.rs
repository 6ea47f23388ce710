// Test doubles for the two collaborators, plus a loopback HTTP stub for
// exercising the real reqwest-based implementations without the live site.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{
    dispatcher::{NotificationChannel, NotificationMessage},
    error::MonitorError,
    fetcher::{FetchedPage, PageFetcher},
};

// Fetcher that answers every call with the same canned result
pub struct MockPageSource {
    response: Result<FetchedPage, MonitorError>,
    calls: AtomicUsize,
}

impl MockPageSource {
    pub fn serving(page: FetchedPage) -> Self {
        Self {
            response: Ok(page),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(cause: &str) -> Self {
        Self {
            response: Err(MonitorError::Fetch(cause.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for MockPageSource {
    async fn fetch(
        &self,
        _url: &Url,
        _headers: &BTreeMap<String, String>,
    ) -> Result<FetchedPage, MonitorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

// Channel that records what it was asked to deliver
#[derive(Default)]
pub struct MockChannel {
    sent: Mutex<Vec<NotificationMessage>>,
    calls: AtomicUsize,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(cause: &str) -> Self {
        Self {
            fail_with: Some(cause.to_string()),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<NotificationMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationChannel for MockChannel {
    async fn deliver(&self, message: &NotificationMessage) -> Result<(), MonitorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(cause) = &self.fail_with {
            return Err(MonitorError::Dispatch(cause.clone()));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    status: u16,
    content_type: String,
    body: String,
    delay: Option<Duration>,
}

impl StubResponse {
    pub fn ok_html(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8".to_string(),
            body: body.into(),
            delay: None,
        }
    }

    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: body.into(),
            delay: None,
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: body.into(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn render(&self) -> Vec<u8> {
        let reason = if self.status == 200 { "OK" } else { "Stub" };
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason,
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

// Serves the scripted responses in order, then keeps repeating the last one.
// Every raw request (head and body) is recorded before its response goes out.
pub struct StubHttpServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl StubHttpServer {
    pub async fn start(responses: Vec<StubResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        let handle = tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((stream, _)) = listener.accept().await {
                let Some(response) = responses
                    .get(served)
                    .or_else(|| responses.last())
                    .cloned()
                else {
                    break;
                };
                served += 1;
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve_one(stream, response, recorded).await;
                });
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("{}{}", self.base_url(), path)).expect("stub url")
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl Drop for StubHttpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_one(
    mut stream: TcpStream,
    response: StubResponse,
    recorded: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    recorded.lock().push(String::from_utf8_lossy(&buf).to_string());

    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }
    stream.write_all(&response.render()).await?;
    stream.shutdown().await
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
