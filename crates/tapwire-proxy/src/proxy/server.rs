//! Listener set and accept loops.
//!
//! One plain-HTTP listener and, when TLS is enabled, one TLS listener
//! run concurrently over a shared `ServerContext`. On shutdown each
//! listener stops accepting, asks live connections to finish, and
//! abandons whatever is still open when the grace deadline expires.

use super::context::ServerContext;
use super::handler;
use super::tls::create_tls_acceptor;
use crate::config::Config;
use crate::store::TrafficStore;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// How long live connections get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const MAX_HEADER_BYTES: usize = 1024 * 1024;
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ProxyServer {
    ctx: Arc<ServerContext>,
}

impl ProxyServer {
    pub fn new(config: Config, store: Arc<TrafficStore>) -> Result<Self, anyhow::Error> {
        Ok(Self {
            ctx: Arc::new(ServerContext::new(config, store)?),
        })
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Run all configured listeners until the shutdown signal fires,
    /// then drain them concurrently within the grace deadline.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        let ctx = self.ctx;

        info!(mode = ctx.mode.as_str(), "starting proxy");
        for (prefix, origin) in ctx.router.table() {
            info!("route {prefix} -> {origin}");
        }
        if let Some(origin) = ctx.router.default_origin() {
            info!("route default -> {origin}");
        }

        let mut listeners = Vec::new();

        let http_addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.http_port));
        let http_listener = bind_listener(http_addr)?;
        info!("HTTP proxy listening on http://{http_addr}");
        listeners.push(tokio::spawn(run_listener(
            Arc::clone(&ctx),
            http_listener,
            None,
            shutdown.clone(),
        )));

        if ctx.config.tls.enabled {
            let acceptor = create_tls_acceptor(&ctx.config.tls)?;
            let tls_addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.tls.port));
            let tls_listener = bind_listener(tls_addr)?;
            if ctx.config.tls.client_auth_required {
                info!("mTLS enabled: client certificates will be verified");
            }
            info!("HTTPS proxy listening on https://{tls_addr}");
            listeners.push(tokio::spawn(run_listener(
                Arc::clone(&ctx),
                tls_listener,
                Some(acceptor),
                shutdown,
            )));
        }

        for listener in listeners {
            listener.await?;
        }
        Ok(())
    }
}

/// Bind a proxy listener socket.
///
/// Both the HTTP and TLS listeners go through here so they share the
/// same socket discipline: SO_REUSEADDR for fast restarts after a
/// drain, and SO_REUSEPORT (where the platform has it) so additional
/// inspector processes can be pointed at the same ports when one
/// instance is being rotated out. Record and replay instances run
/// side by side during a capture-then-serve switchover this way.
fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "ios"))]
    {
        use std::os::fd::AsRawFd;
        unsafe {
            let optval: libc::c_int = 1;
            let ret = libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of_val(&optval) as libc::socklen_t,
            );
            if ret != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

async fn run_listener(
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                connections.spawn(serve_connection(
                    Arc::clone(&ctx),
                    stream,
                    remote_addr,
                    tls_acceptor.clone(),
                    shutdown.clone(),
                ));
                // Reap finished connections so the set stays bounded.
                while connections.try_join_next().is_some() {}
            }
        }
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            outstanding = connections.len(),
            "shutdown deadline expired, abandoning open connections"
        );
        connections.abort_all();
    }
}

async fn serve_connection(
    ctx: Arc<ServerContext>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    shutdown: watch::Receiver<bool>,
) {
    match tls_acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                serve_io(TokioIo::new(tls_stream), ctx, remote_addr, true, shutdown).await;
            }
            Err(e) => {
                // Includes peers rejected by client-certificate verification.
                error!(peer = %remote_addr, error = %e, "TLS handshake failed");
            }
        },
        None => {
            serve_io(TokioIo::new(stream), ctx, remote_addr, false, shutdown).await;
        }
    }
}

async fn serve_io<I>(
    io: I,
    ctx: Arc<ServerContext>,
    remote_addr: SocketAddr,
    via_tls: bool,
    mut shutdown: watch::Receiver<bool>,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        handler::handle_exchange(Arc::clone(&ctx), remote_addr, via_tls, req)
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT)
        .max_buf_size(MAX_HEADER_BYTES);

    let conn = builder.serve_connection(io, service);
    let mut conn = std::pin::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(peer = %remote_addr, error = %e, "connection closed with error");
            }
        }
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.as_mut().await {
                debug!(peer = %remote_addr, error = %e, "connection closed during drain");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_two_listeners_can_share_port() {
        // A second inspector instance can bind the same port during a
        // record-to-replay switchover.
        let first = bind_listener(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let addr = first.local_addr().unwrap();
        let second = bind_listener(addr);
        assert!(second.is_ok());
    }
}
