//! HTTPS listener lifecycle.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::ServerError;
use crate::tls::TlsIdentity;

/// A listener serving on a background task.
pub struct RunningServer {
    handle: Handle,
    task: JoinHandle<std::io::Result<()>>,
    local_addr: SocketAddr,
}

/// Bind `addr` and serve `app` over TLS until shut down.
///
/// Returns once the socket is bound, so a port of 0 can be resolved through
/// [`RunningServer::local_addr`].
pub async fn start(
    addr: SocketAddr,
    identity: &TlsIdentity,
    app: Router,
) -> Result<RunningServer, ServerError> {
    let tls = RustlsConfig::from_config(identity.server_config()?);
    let handle = Handle::new();

    let server = axum_server::bind_rustls(addr, tls).handle(handle.clone());
    let task = tokio::spawn(server.serve(app.into_make_service_with_connect_info::<SocketAddr>()));

    let Some(local_addr) = handle.listening().await else {
        return Err(match task.await {
            Ok(Err(source)) => ServerError::Bind { addr, source },
            Ok(Ok(())) => ServerError::Bind {
                addr,
                source: std::io::Error::other("listener exited before binding"),
            },
            Err(e) => ServerError::Join(e),
        });
    };

    info!(address = %local_addr, "web_server_listening");

    Ok(RunningServer {
        handle,
        task,
        local_addr,
    })
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.handle.connection_count()
    }

    /// Stop accepting connections and give in-flight requests up to `grace`
    /// to finish.
    pub async fn shutdown(self, grace: Duration) -> Result<(), ServerError> {
        info!(
            open_connections = self.handle.connection_count(),
            grace_secs = grace.as_secs(),
            "web_server_shutting_down"
        );
        self.handle.graceful_shutdown(Some(grace));

        self.task.await?.map_err(ServerError::Serve)?;
        info!("web_server_shutdown_complete");
        Ok(())
    }
}
