//! Accept loop and per-connection serving.
//!
//! Every accepted connection takes a semaphore permit; when none is left the
//! client gets a canned 503 and the socket is closed. On cancellation the
//! listener stops accepting, open connections are asked to finish their
//! in-flight request and the loop waits up to `shutdown_timeout` for them.

use crate::config::GateConfig;
use crate::error::ProxyError;
use crate::gateway::{GatewayService, error_response};
use crate::logging_layer::logging_layer;
use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Service, ServiceBuilder};
use tracing::{debug, error, info, warn};

/// Body type written back on the client connection.
type ConnectionBody = UnsyncBoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Grace period a single connection gets after shutdown is signalled.
const CONNECTION_GRACE: Duration = Duration::from_secs(5);

/// How the drain after shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainResult {
    Complete,
    Timeout { remaining: usize },
}

/// Serve `service` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    service: GatewayService,
    config: Arc<GateConfig>,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
) -> DrainResult {
    let service_stack = ServiceBuilder::new()
        .layer(logging_layer())
        .service(service);

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_streams));
    let connections = TaskTracker::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        warn!(
                            peer = %peer_addr,
                            max_streams = config.max_concurrent_streams,
                            "Rejected connection: max concurrent streams reached"
                        );
                        tokio::spawn(async move {
                            let _ = send_503_response(stream).await;
                        });
                        continue;
                    }
                };

                if let Err(e) = configure_tcp_stream(&stream, &config) {
                    debug!(error = %e, "Failed to configure socket");
                }

                let service_stack = service_stack.clone();
                let conn_shutdown = shutdown.clone();
                connections.spawn(async move {
                    handle_connection(stream, peer_addr, service_stack, conn_shutdown).await;
                    drop(permit);
                });
            }
            _ = shutdown.cancelled() => {
                info!("Shutdown signal received, stopping new connections");
                break;
            }
        }
    }

    connections.close();
    info!(
        active_connections = connections.len(),
        drain_timeout_secs = shutdown_timeout.as_secs(),
        "Waiting for active connections to drain"
    );

    match tokio::time::timeout(shutdown_timeout, connections.wait()).await {
        Ok(()) => DrainResult::Complete,
        Err(_) => DrainResult::Timeout {
            remaining: connections.len(),
        },
    }
}

/// Serve one TCP connection with HTTP/1 or HTTP/2.
async fn handle_connection<S, RB>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    service: S,
    shutdown: CancellationToken,
) where
    S: Service<Request<Incoming>, Response = Response<RB>, Error = ProxyError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    RB: http_body::Body<Data = Bytes> + Send + 'static,
    RB::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    debug!(peer = %peer_addr, "Connection accepted");
    let io = TokioIo::new(stream);

    let svc_fn = hyper::service::service_fn(move |req| {
        let mut svc = service.clone();
        async move {
            let result: Result<_, std::convert::Infallible> = match svc.call(req).await {
                Ok(response) => Ok(response.map(connection_body)),
                Err(e) => {
                    // Map the error to its status code instead of dropping the connection
                    error!(error = %e, "Service error");
                    Ok(error_response(&e).map(connection_body))
                }
            };
            result
        }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, svc_fn);
    tokio::pin!(conn);

    tokio::select! {
        result = &mut conn => {
            if let Err(e) = result {
                debug!(peer = %peer_addr, error = %e, "Connection error");
            }
        }
        _ = shutdown.cancelled() => {
            debug!(peer = %peer_addr, "Gracefully closing connection");
            conn.as_mut().graceful_shutdown();
            let _ = tokio::time::timeout(CONNECTION_GRACE, conn).await;
        }
    }
}

fn connection_body<B>(body: B) -> ConnectionBody
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// Apply nodelay, keepalive and buffer sizes from `config`.
pub fn configure_tcp_stream(stream: &TcpStream, config: &GateConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    let socket = socket2::SockRef::from(stream);

    let keepalive =
        socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.tcp_keepalive_secs));
    socket.set_tcp_keepalive(&keepalive)?;

    socket.set_recv_buffer_size(config.socket_buffer_size)?;
    socket.set_send_buffer_size(config.socket_buffer_size)?;

    Ok(())
}

/// Canned 503 for connections over the concurrency limit.
async fn send_503_response(mut stream: TcpStream) -> std::io::Result<()> {
    let body = "503 Service Unavailable\n\n\
                authgate has reached its maximum concurrent connection limit.\n\
                Please retry your request in a moment.";
    let response = format!(
        "HTTP/1.1 503 Service Unavailable\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Retry-After: 1\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
