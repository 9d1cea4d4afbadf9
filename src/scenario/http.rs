//! HTTP plumbing over simulated stacks.
//!
//! Serving: [`HttpServer`] accepts connections from a stack listener,
//! optionally terminates TLS, and speaks HTTP/1.1 via hyper. Handlers are
//! [`HttpHandler`] trait objects; [`PathMux`] routes by path and
//! [`DnsHttpHandler`] implements RFC 8484 DNS-over-HTTPS on top of a DNS
//! [`Handler`](crate::dns::Handler).
//!
//! Fetching: [`HttpClient`] resolves and dials through a stack, validates
//! TLS against the scenario root CAs, and performs GET requests.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use crate::dns::Handler as DnsHandler;
use crate::errno::Errno;
use crate::netstack::{Connection, Stack, TcpListener};

/// Content type of RFC 8484 DNS-over-HTTPS messages.
const DOH_CONTENT_TYPE: &str = "application/dns-message";

/// An HTTP request handler usable by scenario servers.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    /// Produces the response for one request.
    async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>>;
}

/// Serves a fixed status and body for every request.
pub struct TextHandler {
    status: StatusCode,
    body: String,
}

impl TextHandler {
    /// A `200 OK` handler with the given body.
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, body)
    }

    /// A handler with an explicit status code.
    #[must_use]
    pub fn with_status(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
impl HttpHandler for TextHandler {
    async fn handle(&self, _request: Request<Incoming>) -> Response<Full<Bytes>> {
        Response::builder()
            .status(self.status)
            .body(Full::new(Bytes::from(self.body.clone())))
            .expect("static response")
    }
}

/// Routes requests by exact path, with a fallback handler.
pub struct PathMux {
    routes: Vec<(String, Arc<dyn HttpHandler>)>,
    fallback: Arc<dyn HttpHandler>,
}

impl PathMux {
    /// Creates a mux serving `fallback` for unmatched paths.
    #[must_use]
    pub fn new(fallback: Arc<dyn HttpHandler>) -> Self {
        Self {
            routes: Vec::new(),
            fallback,
        }
    }

    /// Adds an exact-path route.
    #[must_use]
    pub fn route(mut self, path: impl Into<String>, handler: Arc<dyn HttpHandler>) -> Self {
        self.routes.push((path.into(), handler));
        self
    }
}

#[async_trait]
impl HttpHandler for PathMux {
    async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let path = request.uri().path().to_string();
        for (route, handler) in &self.routes {
            if *route == path {
                return handler.handle(request).await;
            }
        }
        self.fallback.handle(request).await
    }
}

/// RFC 8484 DNS-over-HTTPS endpoint over a DNS handler.
pub struct DnsHttpHandler {
    handler: Arc<dyn DnsHandler>,
}

impl DnsHttpHandler {
    /// Creates the DoH endpoint.
    #[must_use]
    pub fn new(handler: Arc<dyn DnsHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl HttpHandler for DnsHttpHandler {
    async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let Ok(body) = request.into_body().collect().await else {
            return status_response(StatusCode::BAD_REQUEST);
        };
        let Some(response) = self.handler.handle(&body.to_bytes()) else {
            return status_response(StatusCode::BAD_REQUEST);
        };
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, DOH_CONTENT_TYPE)
            .body(Full::new(Bytes::from(response)))
            .expect("static response")
    }
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("static response")
}

/// An HTTP/1.1 (optionally TLS) server over a stack listener.
pub struct HttpServer {
    listener: Arc<TcpListener>,
    handler: Arc<dyn HttpHandler>,
    tls: Option<TlsAcceptor>,
}

impl HttpServer {
    /// Creates a plaintext HTTP server.
    #[must_use]
    pub fn new(listener: Arc<TcpListener>, handler: Arc<dyn HttpHandler>) -> Self {
        Self {
            listener,
            handler,
            tls: None,
        }
    }

    /// Creates an HTTPS server.
    #[must_use]
    pub fn new_with_tls(
        listener: Arc<TcpListener>,
        handler: Arc<dyn HttpHandler>,
        acceptor: TlsAcceptor,
    ) -> Self {
        Self {
            listener,
            handler,
            tls: Some(acceptor),
        }
    }

    /// Accepts and serves connections until the listener closes.
    pub async fn run(self) {
        loop {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    debug!(error = %err, "http server: accept loop done");
                    return;
                }
            };
            let handler = Arc::clone(&self.handler);
            let tls = self.tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(acceptor) => match acceptor.accept(conn).await {
                        Ok(stream) => serve_http1(stream, handler).await,
                        Err(err) => {
                            debug!(error = %err, "https server: handshake failed");
                        }
                    },
                    None => serve_http1(conn, handler).await,
                }
            });
        }
    }
}

/// Serves HTTP/1.1 on one established stream.
async fn serve_http1<S>(stream: S, handler: Arc<dyn HttpHandler>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, std::convert::Infallible>(handler.handle(request).await) }
    });
    if let Err(err) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(error = %err, "http server: connection done");
    }
}

/// HTTP client failures.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A socket-level failure from the simulated stack.
    #[error(transparent)]
    Errno(#[from] Errno),

    /// An I/O failure, including TLS handshake errors.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// An HTTP protocol failure.
    #[error(transparent)]
    Http(#[from] hyper::Error),

    /// Building the request failed.
    #[error("request build failed: {0}")]
    Request(#[from] http::Error),

    /// The overall operation timeout elapsed.
    #[error("deadline exceeded")]
    Timeout,
}

/// A fetched response.
#[derive(Debug)]
pub struct HttpResponse {
    /// Response status code.
    pub status: StatusCode,
    /// Collected response body.
    pub body: Bytes,
}

/// A GET-oriented HTTP client dialing through a simulated stack.
pub struct HttpClient {
    stack: Arc<Stack>,
    tls: Arc<ClientConfig>,
}

impl HttpClient {
    /// Creates a client for the given stack, validating TLS with `tls`.
    #[must_use]
    pub fn new(stack: Arc<Stack>, tls: Arc<ClientConfig>) -> Self {
        Self { stack, tls }
    }

    /// Fetches `url` with GET.
    ///
    /// # Errors
    ///
    /// Any [`HttpError`] arising from resolution, dialing, TLS, or HTTP.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        let uri: Uri = url
            .parse()
            .map_err(|_| HttpError::InvalidUrl(url.to_string()))?;
        let scheme = uri.scheme_str().unwrap_or("http");
        let (https, default_port) = match scheme {
            "http" => (false, 80),
            "https" => (true, 443),
            _ => return Err(HttpError::InvalidUrl(url.to_string())),
        };
        let host = uri
            .host()
            .ok_or_else(|| HttpError::InvalidUrl(url.to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(default_port);

        let dial_target = match host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port).to_string(),
            Err(_) => format!("{host}:{port}"),
        };
        let conn = self.stack.dial("tcp", &dial_target).await?;
        let Connection::Tcp(tcp) = conn else {
            return Err(HttpError::Errno(Errno::Inval));
        };

        let path = uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str)
            .to_string();
        let request = Request::get(path)
            .header(HOST, &host)
            .body(Empty::<Bytes>::new())?;

        if https {
            let server_name = ServerName::try_from(host.clone())
                .map_err(|_| HttpError::InvalidUrl(url.to_string()))?;
            let connector = TlsConnector::from(Arc::clone(&self.tls));
            let stream = connector.connect(server_name, tcp).await?;
            round_trip(stream, request).await
        } else {
            round_trip(tcp, request).await
        }
    }

    /// Fetches `url`, failing with [`HttpError::Timeout`] after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`HttpClient::get`], plus the timeout.
    pub async fn get_with_timeout(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        tokio::time::timeout(timeout, self.get(url))
            .await
            .map_err(|_| HttpError::Timeout)?
    }
}

/// One HTTP/1.1 request/response exchange over an established stream.
async fn round_trip<S>(stream: S, request: Request<Empty<Bytes>>) -> Result<HttpResponse, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(error = %err, "http client: connection done");
        }
    });

    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok(HttpResponse { status, body })
}
