//! Control Listener Adapter
//!
//! Minimal raw-TCP control channel for the orchestrator:
//!
//! - `POST /prepare-shutdown` switches the service to draining
//! - `GET /active-db-ops` reports in-flight datastore operations
//!
//! One request per connection, no keep-alive. Malformed requests are
//! dropped without writing a single byte.

use crate::infrastructure::{OperationTracker, ServiceState, ShutdownController};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

/// Upper bound on request line plus headers.
pub const MAX_REQUEST_BYTES: u64 = 8 * 1024;

/// Default time allowed for a client to send its request.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// How long headers are drained once a valid request line has arrived.
const HEADER_DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Route selected by a well-formed request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    PrepareShutdown,
    ActiveDbOps,
    Unknown,
}

/// Parse an HTTP/1.x request line (`METHOD SP TARGET SP VERSION`).
///
/// Returns `None` when the line is not a request line at all.
pub fn parse_request_line(line: &str) -> Option<ControlRequest> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.split(' ');
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;

    if parts.next().is_some()
        || method.is_empty()
        || !method.bytes().all(|b| b.is_ascii_uppercase())
        || !target.starts_with('/')
        || !matches!(version, "HTTP/1.0" | "HTTP/1.1")
    {
        return None;
    }

    let path = target.split('?').next().unwrap_or(target);
    Some(match (method, path) {
        ("POST", "/prepare-shutdown") => ControlRequest::PrepareShutdown,
        ("GET", "/active-db-ops") => ControlRequest::ActiveDbOps,
        _ => ControlRequest::Unknown,
    })
}

/// Response written back on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    status: u16,
    reason: &'static str,
    content_type: Option<&'static str>,
    body: String,
}

impl ControlResponse {
    fn ok() -> Self {
        Self {
            status: 200,
            reason: "OK",
            content_type: None,
            body: String::new(),
        }
    }

    fn json(body: String) -> Self {
        Self {
            content_type: Some("application/json"),
            body,
            ..Self::ok()
        }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            reason: "Not Found",
            content_type: None,
            body: String::new(),
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serialize as an HTTP/1.1 response that closes the connection.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        if let Some(content_type) = self.content_type {
            head.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(self.body.as_bytes());
        bytes
    }
}

/// Shared state used by every connection handler.
struct ControlContext {
    tracker: Arc<OperationTracker>,
    state: ServiceState,
    read_timeout: Duration,
}

impl ControlContext {
    fn respond(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::PrepareShutdown => {
                if self.state.begin_drain() {
                    tracing::info!(
                        "drain requested via control channel, {} datastore operations in flight",
                        self.tracker.count()
                    );
                }
                ControlResponse::ok()
            }
            ControlRequest::ActiveDbOps => {
                let body = serde_json::json!({ "count": self.tracker.count() });
                ControlResponse::json(format!("{}\n", body))
            }
            ControlRequest::Unknown => ControlResponse::not_found(),
        }
    }
}

/// Control Listener - inbound adapter for orchestrator lifecycle commands.
pub struct ControlListener {
    listener: TcpListener,
    tracker: Arc<OperationTracker>,
    state: ServiceState,
    read_timeout: Duration,
}

impl ControlListener {
    /// Bind the control socket.
    ///
    /// Bind failures are returned to the caller; they are fatal at startup.
    pub async fn bind(
        addr: &str,
        tracker: Arc<OperationTracker>,
        state: ServiceState,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind control listener on {}: {}", addr, e))?;

        Ok(Self {
            listener,
            tracker,
            state,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Override how long a client may take to send its request.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown.
    ///
    /// On shutdown the listening socket is closed first; connections that
    /// were already accepted are allowed to finish their response.
    pub async fn run(self, shutdown: ShutdownController) -> anyhow::Result<()> {
        let Self {
            listener,
            tracker,
            state,
            read_timeout,
        } = self;
        let ctx = Arc::new(ControlContext {
            tracker,
            state,
            read_timeout,
        });
        tracing::info!("control listener on {}", listener.local_addr()?);

        let stopped = shutdown.wait();
        tokio::pin!(stopped);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = ctx.clone();
                        in_flight.spawn(async move {
                            if let Err(e) = handle_connection(stream, &ctx).await {
                                tracing::debug!("control connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("control listener accept failed: {}", e);
                    }
                },
            }
        }

        drop(listener);
        let pending = in_flight.len();
        if pending > 0 {
            tracing::debug!("waiting for {} control connections to finish", pending);
        }
        while in_flight.join_next().await.is_some() {}

        tracing::info!("control listener stopped");
        Ok(())
    }
}

/// Handle a single control connection.
async fn handle_connection(mut stream: TcpStream, ctx: &ControlContext) -> std::io::Result<()> {
    let request = {
        let (reader, _) = stream.split();
        let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
        read_request(&mut reader, ctx.read_timeout).await?
    };

    // Malformed, empty or too slow: close without a response.
    let Some(request) = request else {
        return Ok(());
    };

    let response = ctx.respond(request);
    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await
}

/// Read the request line and discard headers.
async fn read_request<R>(
    reader: &mut R,
    read_timeout: Duration,
) -> std::io::Result<Option<ControlRequest>>
where
    R: AsyncBufRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + read_timeout;

    let mut line = Vec::new();
    match tokio::time::timeout_at(deadline, reader.read_until(b'\n', &mut line)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => return Ok(None),
    }

    let request = match std::str::from_utf8(&line).ok().and_then(parse_request_line) {
        Some(request) => request,
        None => return Ok(None),
    };

    // Consume the headers so closing the socket does not reset the
    // connection under the client. A client that never finishes its
    // headers is answered after a short grace period.
    let header_deadline = deadline.min(tokio::time::Instant::now() + HEADER_DRAIN_TIMEOUT);
    let _ = tokio::time::timeout_at(header_deadline, skip_headers(reader)).await;

    Ok(Some(request))
}

async fn skip_headers<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut header = Vec::new();
    loop {
        header.clear();
        let n = reader.read_until(b'\n', &mut header).await?;
        if n == 0 || header == b"\r\n" || header == b"\n" {
            return Ok(());
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn ctx() -> ControlContext {
        ControlContext {
            tracker: Arc::new(OperationTracker::new()),
            state: ServiceState::new(),
            read_timeout: Duration::from_millis(200),
        }
    }

    // ===== parse_request_line Tests =====

    #[test]
    fn test_parse_known_routes() {
        assert_eq!(
            parse_request_line("POST /prepare-shutdown HTTP/1.1\r\n"),
            Some(ControlRequest::PrepareShutdown)
        );
        assert_eq!(
            parse_request_line("GET /active-db-ops HTTP/1.0\n"),
            Some(ControlRequest::ActiveDbOps)
        );
    }

    #[test]
    fn test_parse_ignores_query_string() {
        assert_eq!(
            parse_request_line("GET /active-db-ops?verbose=1 HTTP/1.1"),
            Some(ControlRequest::ActiveDbOps)
        );
    }

    #[test]
    fn test_parse_unknown_routes() {
        let tests = [
            "GET /prepare-shutdown HTTP/1.1",
            "POST /active-db-ops HTTP/1.1",
            "GET /health HTTP/1.1",
            "DELETE / HTTP/1.1",
        ];
        for line in tests {
            assert_eq!(parse_request_line(line), Some(ControlRequest::Unknown), "{}", line);
        }
    }

    #[test]
    fn test_parse_malformed() {
        let tests = [
            "",
            "\r\n",
            "garbage",
            "GET /active-db-ops",
            "GET active-db-ops HTTP/1.1",
            "GET /active-db-ops HTTP/1.1 extra",
            "GET  /active-db-ops HTTP/1.1",
            "get /active-db-ops HTTP/1.1",
            "GET /active-db-ops SMTP/1.1",
            "GET /active-db-ops HTTP/1.1garbage",
            "GET /active-db-ops HTTP/2.0",
            "xx POST /prepare-shutdown HTTP/1.1",
        ];
        for line in tests {
            assert_eq!(parse_request_line(line), None, "{:?}", line);
        }
    }

    // ===== ControlResponse Tests =====

    #[test]
    fn test_ok_response_bytes() {
        let bytes = ControlResponse::ok().to_bytes();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_not_found_response_bytes() {
        let bytes = ControlResponse::not_found().to_bytes();
        assert!(String::from_utf8(bytes)
            .unwrap()
            .starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn test_json_response_bytes() {
        let text = String::from_utf8(ControlResponse::json("{\"count\":2}\n".to_string()).to_bytes()).unwrap();
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 12\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"count\":2}\n"));
    }

    // ===== ControlContext Tests =====

    #[test]
    fn test_prepare_shutdown_drains_idempotently() {
        let ctx = ctx();

        let first = ctx.respond(ControlRequest::PrepareShutdown);
        assert_eq!(first.status(), 200);
        assert!(first.body().is_empty());
        assert!(ctx.state.is_draining());

        let second = ctx.respond(ControlRequest::PrepareShutdown);
        assert_eq!(second, first);
        assert!(ctx.state.is_draining());
    }

    #[test]
    fn test_active_db_ops_reports_count() {
        let ctx = ctx();
        ctx.tracker.begin();
        ctx.tracker.begin();
        ctx.tracker.begin();
        ctx.tracker.end();

        let response = ctx.respond(ControlRequest::ActiveDbOps);
        assert_eq!(response.status(), 200);
        assert!(response.body().ends_with('\n'));

        let body: serde_json::Value = serde_json::from_str(response.body().trim_end()).unwrap();
        assert_eq!(body, serde_json::json!({"count": 2}));
    }

    #[test]
    fn test_unknown_is_not_found() {
        let ctx = ctx();
        assert_eq!(ctx.respond(ControlRequest::Unknown).status(), 404);
        assert!(!ctx.state.is_draining());
    }

    // ===== read_request Tests =====

    #[tokio::test]
    async fn test_read_request_with_headers() {
        let raw: &[u8] = b"GET /active-db-ops HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let request = read_request(&mut reader, Duration::from_millis(100)).await.unwrap();
        assert_eq!(request, Some(ControlRequest::ActiveDbOps));
    }

    #[tokio::test]
    async fn test_read_request_empty() {
        let raw: &[u8] = b"";
        let mut reader = BufReader::new(raw);
        assert_eq!(read_request(&mut reader, Duration::from_millis(100)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_request_invalid_utf8() {
        let raw: &[u8] = b"\xff\xfe\x00POST /prepare-shutdown HTTP/1.1\r\n\r\n";
        let mut reader = BufReader::new(raw);
        assert_eq!(read_request(&mut reader, Duration::from_millis(100)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_request_oversized_line() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_REQUEST_BYTES as usize * 2));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");

        let mut reader = BufReader::new(raw.as_slice().take(MAX_REQUEST_BYTES));
        assert_eq!(read_request(&mut reader, Duration::from_millis(100)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_request_times_out() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(server);

        let request = read_request(&mut reader, Duration::from_millis(50)).await.unwrap();
        assert_eq!(request, None);
        drop(client);
    }

    #[tokio::test]
    async fn test_read_request_unfinished_headers_answered_quickly() {
        let (mut client, server) = tokio::io::duplex(256);
        client
            .write_all(b"GET /active-db-ops HTTP/1.1\r\nHost: localhost\r\n")
            .await
            .unwrap();
        let mut reader = BufReader::new(server);

        let started = std::time::Instant::now();
        let request = read_request(&mut reader, Duration::from_secs(2)).await.unwrap();
        assert_eq!(request, Some(ControlRequest::ActiveDbOps));
        assert!(started.elapsed() < Duration::from_millis(500));
        drop(client);
    }

    // ===== Socket Tests =====

    #[tokio::test]
    async fn test_bind_reports_address() {
        let listener = ControlListener::bind(
            "127.0.0.1:0",
            Arc::new(OperationTracker::new()),
            ServiceState::new(),
        )
        .await
        .unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let result =
            ControlListener::bind(&addr, Arc::new(OperationTracker::new()), ServiceState::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let listener = ControlListener::bind(
            "127.0.0.1:0",
            Arc::new(OperationTracker::new()),
            ServiceState::new(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = ShutdownController::new();
        let handle = tokio::spawn(listener.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.unwrap().unwrap().is_ok());

        // Listening socket is closed
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
