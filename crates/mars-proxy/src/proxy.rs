//! MITM proxy server.
//!
//! Binds the listener, loads the root CA and runs hudsucker with a
//! [`RecordingHandler`] around the shared [`Recorder`].

use std::net::SocketAddr;

use hudsucker::certificate_authority::RcgenAuthority;
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::ca::CaManager;
use crate::error::{ProxyError, Result};
use crate::handler::RecordingHandler;
use crate::recorder::Recorder;
use crate::DEFAULT_PROXY_PORT;

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// Root CA used to sign per-host certificates.
    pub ca_manager: CaManager,
}

impl ProxyConfig {
    /// Default address with the CA from the Mars data directory.
    pub fn new() -> Result<Self> {
        let ca_manager = CaManager::with_default_dir()?;

        Ok(Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)),
            ca_manager,
        })
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Sets the CA manager.
    pub fn with_ca_manager(mut self, ca_manager: CaManager) -> Self {
        self.ca_manager = ca_manager;
        self
    }
}

/// Recording MITM proxy.
pub struct ProxyServer {
    config: ProxyConfig,
    recorder: Recorder,
    authority: RcgenAuthority,
}

impl ProxyServer {
    /// Creates a server, loading the root CA up front.
    pub fn new(config: ProxyConfig, recorder: Recorder) -> Result<Self> {
        let authority = config.ca_manager.load_authority()?;

        Ok(Self {
            config,
            recorder,
            authority,
        })
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the CA certificate path for client installation.
    pub fn ca_cert_path(&self) -> &std::path::Path {
        self.config.ca_manager.cert_path()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Runs the proxy until it fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting MITM proxy on {}", self.config.addr);
        tracing::info!("CA certificate: {:?}", self.ca_cert_path());

        let proxy = Proxy::builder()
            .with_addr(self.config.addr)
            .with_ca(self.authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(RecordingHandler::new(self.recorder))
            .build()
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        proxy
            .start()
            .await
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }

    /// Binds the listener and starts the proxy in the background.
    ///
    /// Returns a handle that can be used to stop the server; its address is
    /// the one actually bound, so port 0 picks a free port. Must be called
    /// from within a Tokio runtime.
    pub fn start(self) -> Result<ProxyHandle> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();

        let listener = std::net::TcpListener::bind(self.config.addr)?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let addr = listener.local_addr()?;

        let proxy = Proxy::builder()
            .with_listener(listener)
            .with_ca(self.authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(RecordingHandler::new(self.recorder))
            .build()
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        tracing::info!("Starting MITM proxy on {}", addr);

        let handle = tokio::spawn(async move {
            tokio::select! {
                result = proxy.start() => {
                    if let Err(e) = result {
                        tracing::error!("Proxy error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Proxy shutdown signal received");
                }
            };
        });

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}
