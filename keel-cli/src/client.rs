//! A thin HTTP/JSON client over the daemon's Unix socket (or TCP), the way
//! `docker-api-rs` layers its client on `hyperlocal` for the Unix
//! transport and plain `hyper` for TCP. Every call here opens and tears
//! down one connection; this is a CLI, not a long-lived connection pool.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode, Uri};
use keel_shared::constants::{API_MAJOR, API_MINOR};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

pub struct DaemonClient {
    endpoint: Endpoint,
    prefix: String,
}

impl DaemonClient {
    pub fn new(raw: &str) -> Result<Self> {
        let endpoint = if let Some(path) = raw.strip_prefix("unix://") {
            Endpoint::Unix(PathBuf::from(path))
        } else if let Some(addr) = raw.strip_prefix("tcp://") {
            Endpoint::Tcp(addr.to_string())
        } else {
            return Err(anyhow!("unsupported daemon endpoint {raw:?}, expected unix:// or tcp://"));
        };
        Ok(Self {
            endpoint,
            prefix: format!("/v{API_MAJOR}.{API_MINOR}"),
        })
    }

    fn uri(&self, path: &str) -> Uri {
        // The authority is unused by hyperlocal/plain HTTP/1.1 over a
        // direct stream, but a well-formed URI is still required.
        format!("http://keel{}{}", self.prefix, path).parse().expect("path forms a valid URI")
    }

    async fn io(&self) -> Result<Io> {
        match &self.endpoint {
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .with_context(|| format!("connecting to {}", path.display()))?;
                Ok(Io::Unix(stream))
            }
            Endpoint::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr)
                    .await
                    .with_context(|| format!("connecting to {addr}"))?;
                Ok(Io::Tcp(stream))
            }
        }
    }

    async fn send(&self, req: Request<Full<Bytes>>) -> Result<Response<Incoming>> {
        let io = self.io().await?;
        let (mut sender, conn) = match io {
            Io::Unix(stream) => hyper::client::conn::http1::handshake(hyper_util::rt::TokioIo::new(stream)).await?,
            Io::Tcp(stream) => hyper::client::conn::http1::handshake(hyper_util::rt::TokioIo::new(stream)).await?,
        };
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "connection closed");
            }
        });
        Ok(sender.send_request(req).await?)
    }

    pub async fn request_raw(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<(StatusCode, Bytes)> {
        let body = Full::new(Bytes::from(body.unwrap_or_default()));
        let req = Request::builder()
            .method(method)
            .uri(self.uri(path))
            .header("host", "keel")
            .header("content-type", "application/json")
            .body(body)?;
        let resp = self.send(req).await?;
        let status = resp.status();
        let bytes = resp.into_body().collect().await?.to_bytes();
        Ok((status, bytes))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (status, body) = self.request_raw(Method::GET, path, None).await?;
        Self::parse(status, &body)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let payload = serde_json::to_vec(body)?;
        let (status, body) = self.request_raw(Method::POST, path, Some(payload)).await?;
        Self::parse(status, &body)
    }

    pub async fn post_empty(&self, path: &str) -> Result<()> {
        let (status, body) = self.request_raw(Method::POST, path, None).await?;
        Self::check(status, &body)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let (status, body) = self.request_raw(Method::DELETE, path, None).await?;
        Self::check(status, &body)
    }

    /// Stream a newline-delimited JSON response, invoking `on_line` for
    /// each complete line as it arrives (used by `pull`, `push`, `logs -f`,
    /// `events`).
    pub async fn stream_lines(
        &self,
        method: Method,
        path: &str,
        mut on_line: impl FnMut(&str),
    ) -> Result<()> {
        let req = Request::builder()
            .method(method)
            .uri(self.uri(path))
            .header("host", "keel")
            .body(Empty::<Bytes>::new().boxed())?;
        let io = self.io().await?;
        let (mut sender, conn) = match io {
            Io::Unix(stream) => hyper::client::conn::http1::handshake(hyper_util::rt::TokioIo::new(stream)).await?,
            Io::Tcp(stream) => hyper::client::conn::http1::handshake(hyper_util::rt::TokioIo::new(stream)).await?,
        };
        tokio::spawn(async move {
            let _ = conn.await;
        });
        let mut resp = sender.send_request(req).await?;
        if !resp.status().is_success() {
            let body = resp.into_body().collect().await?.to_bytes();
            return Err(anyhow!(Self::error_message(&body)));
        }

        let mut buf = Vec::new();
        let body = resp.body_mut();
        while let Some(frame) = body.frame().await {
            let frame = frame?;
            if let Some(chunk) = frame.data_ref() {
                buf.extend_from_slice(chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    on_line(line.trim_end());
                }
            }
        }
        Ok(())
    }

    fn parse<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T> {
        if status.is_success() {
            Ok(serde_json::from_slice(body)
                .with_context(|| format!("decoding response body: {}", String::from_utf8_lossy(body)))?)
        } else {
            Err(anyhow!(Self::error_message(body)))
        }
    }

    fn check(status: StatusCode, body: &[u8]) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(anyhow!(Self::error_message(body)))
        }
    }

    fn error_message(body: &[u8]) -> String {
        #[derive(serde::Deserialize)]
        struct Message {
            message: String,
        }
        serde_json::from_slice::<Message>(body)
            .map(|m| m.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).to_string())
    }

    /// Open a raw duplex stream to the daemon for an already-hijacked
    /// connection (used by `attach`). The caller is responsible for having
    /// sent the HTTP request line itself before reading/writing raw bytes.
    pub async fn raw_io(&self) -> Result<Box<dyn RawDuplex>> {
        match self.io().await? {
            Io::Unix(stream) => Ok(Box::new(stream)),
            Io::Tcp(stream) => Ok(Box::new(stream)),
        }
    }

    /// Perform the HTTP upgrade handshake for a hijacked endpoint (attach):
    /// write the request line by hand, drain the `101 Switching Protocols`
    /// response headers, and hand back the raw duplex stream for the
    /// caller to pump bytes over directly.
    pub async fn hijack(&self, path: &str) -> Result<Box<dyn RawDuplex>> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut io = self.raw_io().await?;
        let request = format!(
            "POST {}{} HTTP/1.1\r\nHost: keel\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n",
            self.prefix, path
        );
        io.write_all(request.as_bytes()).await?;

        // Drain the response headers byte-by-byte until the blank line;
        // whatever arrives after belongs to the hijacked stream itself, so
        // this must not over-read into it with a buffered reader.
        let mut header = Vec::new();
        let mut last_four = [0u8; 4];
        loop {
            let mut byte = [0u8; 1];
            let n = io.read(&mut byte).await?;
            if n == 0 {
                return Err(anyhow!("connection closed before attach handshake completed"));
            }
            header.push(byte[0]);
            last_four.rotate_left(1);
            last_four[3] = byte[0];
            if last_four == *b"\r\n\r\n" {
                break;
            }
        }
        let status_line = String::from_utf8_lossy(&header);
        if !status_line.contains("101") {
            return Err(anyhow!("attach failed: {}", status_line.lines().next().unwrap_or("")));
        }
        Ok(io)
    }
}

enum Io {
    Unix(tokio::net::UnixStream),
    Tcp(tokio::net::TcpStream),
}

pub trait RawDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl RawDuplex for tokio::net::UnixStream {}
impl RawDuplex for tokio::net::TcpStream {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_unix_endpoint() {
        let client = DaemonClient::new("unix:///var/lib/keel/keeld.sock").unwrap();
        assert!(matches!(client.endpoint, Endpoint::Unix(_)));
    }

    #[test]
    fn accepts_tcp_endpoint() {
        let client = DaemonClient::new("tcp://127.0.0.1:2375").unwrap();
        assert!(matches!(client.endpoint, Endpoint::Tcp(_)));
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(DaemonClient::new("http://example.com").is_err());
    }

    #[test]
    fn error_message_prefers_json_message_field() {
        let body = br#"{"message": "container not found"}"#;
        assert_eq!(DaemonClient::error_message(body), "container not found");
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        let body = b"internal server error";
        assert_eq!(DaemonClient::error_message(body), "internal server error");
    }
}
