//! A scripted HTTP/1.1 server on a loopback port, for driving real requests
//! through the transport and the provider adapters.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::{HttpTransport, RetryPolicy};

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    /// Path and query from the request line.
    pub target: String,
    pub authorization: Option<String>,
    pub body: String,
}

pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Reply {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self::json(status, "")
    }

    /// `{base}` in `value` is replaced with the server's base URL.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Handler = dyn Fn(&Seen) -> Reply + Send + Sync;

pub struct StubServer {
    pub base: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl StubServer {
    pub async fn start(handler: impl Fn(&Seen) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let (task_base, task_seen) = (base.clone(), seen.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let base = task_base.clone();
                let seen = task_seen.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &base, &seen, handler.as_ref()).await;
                });
            }
        });

        Self { base, seen }
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

/// A transport that talks to the stub directly, never through a proxy, and
/// retries without waiting.
pub fn transport(token: &str) -> HttpTransport {
    let mut transport = HttpTransport::new("Stub", token.to_string(), 1000.0).with_policy(
        RetryPolicy::default().with_delays(Duration::from_millis(1), Duration::from_millis(1)),
    );
    transport.client = reqwest::Client::builder().no_proxy().build().unwrap();
    transport
}

async fn serve(
    mut stream: TcpStream,
    base: &str,
    seen: &Mutex<Vec<Seen>>,
    handler: &Handler,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();

    let mut authorization = None;
    let mut content_length = 0;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "authorization" => authorization = Some(value.trim().to_string()),
            "content-length" => content_length = value.trim().parse().unwrap_or(0),
            _ => {}
        }
    }

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = buf.len().min(head_end + content_length);

    let request = Seen {
        method,
        target,
        authorization,
        body: String::from_utf8_lossy(&buf[head_end..end]).into_owned(),
    };
    let reply = handler(&request);
    seen.lock().unwrap().push(request);

    let mut response = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        response.push_str(&format!("{name}: {}\r\n", value.replace("{base}", base)));
    }
    response.push_str("\r\n");
    response.push_str(&reply.body);

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
