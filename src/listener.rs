//! TCP listener and accept loop
//!
//! `Listener` binds the hub port. `start` moves it into its own accept-loop
//! task and hands every accepted connection to a callback running on a
//! dedicated task, so a slow or panicking callback never stalls the loop.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{CloseHandle, CloseSignal, FramedConnection};
use crate::error::{AppError, AppResult};

/// Pause after a failed accept so a persistent error cannot spin the loop
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Bound, not yet accepting, listening socket
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_frame_size: u32,
}

impl Listener {
    /// Bind to the configured address with a bounded backlog
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &ServerConfig) -> AppResult<Self> {
        let addr = config.socket_addr();
        let bind_error = |source: std::io::Error| AppError::Bind {
            addr: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(config.backlog).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!(addr = %local_addr, backlog = config.backlog, "Listening");

        Ok(Self {
            listener,
            local_addr,
            max_frame_size: config.max_frame_size,
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for a single connection
    pub async fn accept(&self) -> AppResult<(FramedConnection, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        let connection = FramedConnection::new(stream, self.max_frame_size)?;
        Ok((connection, addr))
    }

    /// Run the accept loop on its own task
    ///
    /// `on_new_connection` receives each connection with its peer address
    /// (`ip:port`) and runs on a freshly spawned task owned by the loop.
    pub fn start<F, Fut>(self, on_new_connection: F) -> ListenerHandle
    where
        F: Fn(FramedConnection, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let closer = CloseHandle::new();
        let local_addr = self.local_addr;
        let task = tokio::spawn(accept_loop(self, closer.subscribe(), on_new_connection));

        ListenerHandle {
            local_addr,
            closer,
            task: Some(task),
        }
    }
}

/// IPv4 addresses this host's name resolves to, excluding loopback
///
/// These are the addresses participants on the LAN can reach a hub
/// bound to all interfaces on. Empty when the host name cannot be
/// resolved.
pub async fn lan_addresses(port: u16) -> Vec<SocketAddr> {
    let host = match hostname::get() {
        Ok(host) => host.to_string_lossy().into_owned(),
        Err(e) => {
            debug!(error = %e, "Host name unavailable");
            return Vec::new();
        }
    };

    let mut addrs: Vec<SocketAddr> = match lookup_host((host.as_str(), port)).await {
        Ok(addrs) => addrs
            .filter(|addr| addr.is_ipv4() && !addr.ip().is_loopback())
            .collect(),
        Err(e) => {
            debug!(host = %host, error = %e, "Host name did not resolve");
            Vec::new()
        }
    };
    addrs.sort();
    addrs.dedup();
    addrs
}

/// Running accept loop
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    closer: CloseHandle,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Close the listening socket and wait for the loop to exit
    ///
    /// Also waits for callbacks that are still running, so no connection
    /// accepted by this listener is handed off after this returns.
    pub async fn stop(mut self) {
        self.closer.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop failed");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.closer.close();
    }
}

async fn accept_loop<F, Fut>(listener: Listener, mut closed: CloseSignal, on_new_connection: F)
where
    F: Fn(FramedConnection, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut callbacks = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            biased;
            () = closed.closed() => break,
            Some(finished) = callbacks.join_next(), if !callbacks.is_empty() => {
                log_callback_result(finished);
                continue;
            }
            accepted = listener.listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => match FramedConnection::new(stream, listener.max_frame_size) {
                Ok(connection) => {
                    info!(peer = %addr, "New connection");
                    callbacks.spawn(on_new_connection(connection, addr.to_string()));
                }
                Err(e) => warn!(peer = %addr, error = %e, "Dropping connection"),
            },
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }

    // Stop accepting before waiting on callbacks still in flight
    let local_addr = listener.local_addr;
    drop(listener);
    while let Some(finished) = callbacks.join_next().await {
        log_callback_result(finished);
    }

    info!(addr = %local_addr, "Listener stopped");
}

fn log_callback_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "Connection callback failed");
    }
}
