//! HTTP endpoint server
//!
//! Minimal HTTP/1.1 over a tokio `TcpListener`, one request per connection:
//! - `/api/makeTransaction`: the transaction request boundary
//! - `/metrics`: Prometheus text exposition
//! - `/health`: liveness

use crate::api::{ApiResponse, TransactionRequester};
use crate::metrics::metrics;
use anyhow::Result;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub const MAKE_TRANSACTION_PATH: &str = "/api/makeTransaction";

const MAX_HEADER_LINES: usize = 64;
const MAX_LINE_BYTES: usize = 8 * 1024;
const MAX_BODY_BYTES: usize = 16 * 1024;
/// Unread input discarded after an early error response
const DRAIN_LIMIT_BYTES: u64 = 64 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Parsed request
#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    body: Vec<u8>,
}

struct HttpResponse {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl HttpResponse {
    fn json(response: ApiResponse) -> Self {
        Self {
            status: response.status,
            content_type: "application/json",
            body: response.body.to_string().into_bytes(),
        }
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into().into_bytes(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(ApiResponse {
            status,
            body: serde_json::json!({ "error": message }),
        })
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Bind `addr` and serve until the task is dropped
pub async fn endpoint_server(addr: &str, requester: Arc<TransactionRequester>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Checkout endpoint listening on {}", listener.local_addr()?);
    serve(listener, requester).await
}

/// Accept loop on an already bound listener
pub async fn serve(listener: TcpListener, requester: Arc<TransactionRequester>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let requester = Arc::clone(&requester);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, &requester).await {
                        tracing::debug!(peer = %peer, error = %e, "Connection closed with error");
                    }
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, requester: &TransactionRequester) -> Result<()> {
    let mut reader = BufReader::new(socket);
    let (response, rejected) = match read_request(&mut reader).await {
        Ok(Some(request)) => (route(request, requester).await, false),
        Ok(None) => return Ok(()),
        Err(RequestError::TooLarge) => (HttpResponse::error(413, "Request too large"), true),
        Err(RequestError::HeadersTooLarge) => (
            HttpResponse::error(431, "Request header fields too large"),
            true,
        ),
        Err(RequestError::Malformed(reason)) => (HttpResponse::error(400, &reason), true),
        Err(RequestError::Io(e)) => return Err(e.into()),
    };
    write_response(reader.get_mut(), response).await?;
    if rejected {
        discard_unread(&mut reader).await;
    }
    Ok(())
}

/// Half-close and discard unread input, bounded by `DRAIN_LIMIT_BYTES` and `DRAIN_TIMEOUT`
async fn discard_unread(reader: &mut BufReader<TcpStream>) {
    if reader.get_mut().shutdown().await.is_err() {
        return;
    }
    let mut rest = (&mut *reader).take(DRAIN_LIMIT_BYTES);
    let _ = tokio::time::timeout(DRAIN_TIMEOUT, tokio::io::copy(&mut rest, &mut tokio::io::sink()))
        .await;
}

async fn route(request: HttpRequest, requester: &TransactionRequester) -> HttpResponse {
    tracing::debug!(method = %request.method, path = %request.path, "HTTP request");
    match request.path.as_str() {
        MAKE_TRANSACTION_PATH => HttpResponse::json(
            requester
                .handle(&request.method, &request.query, &request.body)
                .await,
        ),
        "/metrics" => match metrics().render() {
            Ok(text) => HttpResponse::text(200, text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to render metrics");
                HttpResponse::text(500, "metrics unavailable")
            }
        },
        "/health" => HttpResponse::text(200, "ok"),
        _ => HttpResponse::error(404, "Not found"),
    }
}

#[derive(Debug)]
enum RequestError {
    Io(std::io::Error),
    Malformed(String),
    TooLarge,
    HeadersTooLarge,
}

impl From<std::io::Error> for RequestError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Read one CRLF-terminated line of at most `MAX_LINE_BYTES`; 0 at end of stream
async fn read_line_capped(
    reader: &mut BufReader<TcpStream>,
    line: &mut String,
) -> Result<usize, RequestError> {
    line.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_line(line)
        .await?;
    if read > 0 && !line.ends_with('\n') {
        return Err(if read >= MAX_LINE_BYTES {
            RequestError::HeadersTooLarge
        } else {
            RequestError::Malformed("Truncated request".to_string())
        });
    }
    Ok(read)
}

async fn read_request(
    reader: &mut BufReader<TcpStream>,
) -> Result<Option<HttpRequest>, RequestError> {
    let mut line = String::new();
    if read_line_capped(reader, &mut line).await? == 0 {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(RequestError::Malformed("Malformed request line".to_string()));
    };
    let method = method.to_ascii_uppercase();
    let (path, query) = parse_target(target)?;

    let mut content_length = 0usize;
    let mut headers_done = false;
    for _ in 0..MAX_HEADER_LINES {
        if read_line_capped(reader, &mut line).await? == 0 {
            return Err(RequestError::Malformed("Truncated request".to_string()));
        }
        let header = line.trim_end();
        if header.is_empty() {
            headers_done = true;
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| RequestError::Malformed("Invalid Content-Length".to_string()))?;
            }
        }
    }
    if !headers_done {
        return Err(RequestError::HeadersTooLarge);
    }

    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge);
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    Ok(Some(HttpRequest {
        method,
        path,
        query,
        body,
    }))
}

/// Split a request target into its path and decoded query pairs
fn parse_target(target: &str) -> Result<(String, Vec<(String, String)>), RequestError> {
    let url = Url::parse("http://localhost")
        .and_then(|base| base.join(target))
        .map_err(|e| RequestError::Malformed(format!("Invalid request target: {e}")))?;
    let query = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    Ok((url.path().to_string(), query))
}

async fn write_response(socket: &mut TcpStream, response: HttpResponse) -> Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        response.status,
        reason_phrase(response.status),
        response.content_type,
        response.body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(&response.body).await?;
    socket.flush().await?;
    Ok(())
}
