//! Minimal HTTP/1.1 responders for cases wiremock cannot express: bodies
//! without `Content-Length`, bodies cut short, and slow trickled bodies that
//! honor `Range`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::socket_guard::should_skip_socket_bound_test;

/// How the responder sends its body.
#[derive(Debug, Clone, Copy)]
pub enum BodyMode {
    /// `200 OK` without `Content-Length`; the body ends when the connection closes.
    NoContentLength,
    /// Announces `announced` bytes but closes after sending the body.
    Truncated { announced: usize },
    /// Sends `chunk` bytes every `delay`; honors `Range: bytes=N-` with `206`.
    Trickle { chunk: usize, delay: Duration },
}

/// A running responder; aborted on drop.
pub struct RawServer {
    addr: SocketAddr,
    ranges: Arc<Mutex<Vec<Option<u64>>>>,
    handle: JoinHandle<()>,
}

impl RawServer {
    /// Starts a responder serving `body`, or `None` when sockets are unavailable.
    pub async fn start(body: Vec<u8>, mode: BodyMode) -> Option<Self> {
        if should_skip_socket_bound_test() {
            return None;
        }
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ranges = Arc::new(Mutex::new(Vec::new()));
        let body = Arc::new(body);
        let seen = Arc::clone(&ranges);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let body = Arc::clone(&body);
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    serve(stream, &body, mode, &seen).await;
                });
            }
        });
        Some(Self {
            addr,
            ranges,
            handle,
        })
    }

    /// URL for `path` on this responder.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Range start of each request received, in order (`None` without `Range`).
    pub fn ranges(&self) -> Vec<Option<u64>> {
        self.ranges.lock().unwrap().clone()
    }
}

impl Drop for RawServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    body: &[u8],
    mode: BodyMode,
    seen: &Mutex<Vec<Option<u64>>>,
) {
    let Some(request) = read_head(&mut stream).await else {
        return;
    };
    let range = parse_range(&request);
    seen.lock().unwrap().push(range);

    let result = match mode {
        BodyMode::NoContentLength => {
            let head = "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n";
            write_all(&mut stream, head.as_bytes(), body).await
        }
        BodyMode::Truncated { announced } => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {announced}\r\nConnection: close\r\n\r\n"
            );
            write_all(&mut stream, head.as_bytes(), body).await
        }
        BodyMode::Trickle { chunk, delay } => {
            let start = range
                .and_then(|offset| usize::try_from(offset).ok())
                .filter(|offset| *offset > 0 && *offset < body.len());
            let (head, rest) = match start {
                Some(offset) => (
                    format!(
                        "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                        body.len() - offset,
                        offset,
                        body.len() - 1,
                        body.len()
                    ),
                    &body[offset..],
                ),
                None => (
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    ),
                    body,
                ),
            };
            trickle(&mut stream, head.as_bytes(), rest, chunk, delay).await
        }
    };
    if result.is_ok() {
        let _ = stream.shutdown().await;
    }
}

async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 || buffer.len() > 16 * 1024 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    Some(String::from_utf8_lossy(&buffer).into_owned())
}

fn parse_range(request: &str) -> Option<u64> {
    request.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("range") {
            return None;
        }
        value
            .trim()
            .strip_prefix("bytes=")?
            .trim_end_matches('-')
            .parse()
            .ok()
    })
}

async fn write_all(stream: &mut TcpStream, head: &[u8], body: &[u8]) -> std::io::Result<()> {
    stream.write_all(head).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

async fn trickle(
    stream: &mut TcpStream,
    head: &[u8],
    body: &[u8],
    chunk: usize,
    delay: Duration,
) -> std::io::Result<()> {
    stream.write_all(head).await?;
    for piece in body.chunks(chunk) {
        stream.write_all(piece).await?;
        stream.flush().await?;
        tokio::time::sleep(delay).await;
    }
    Ok(())
}
