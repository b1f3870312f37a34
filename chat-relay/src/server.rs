use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinSet},
};
use tracing::{debug, info, warn};

use crate::{
    hub::{Hub, RelayConfig},
    protocol::ServerLine,
    session::Session,
};

pub const SHUTTING_DOWN: &str = "server shutting down";

pub struct Server {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl Server {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self::with_hub(listener, Arc::new(Hub::new(config)))
    }

    pub fn with_hub(listener: TcpListener, hub: Arc<Hub>) -> Self {
        Self { listener, hub }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Accepts connections until `shutdown` resolves, then ends every session.
    ///
    /// Connected users are sent `ERRO:server shutting down` after whatever was
    /// already queued for them, and their connections are closed. Clients
    /// still in the handshake are simply hung up on.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, hub } = self;
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => spawn_session(&mut sessions, stream, peer, &hub),
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    reap_session(finished);
                }
            }
        }

        drop(listener);
        let running = sessions.len();
        sessions.shutdown().await;
        let notified = disconnect_all(&hub);
        info!(sessions = running, notified, "relay stopped");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_session(sessions: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr, hub: &Arc<Hub>) {
    debug!(peer = %peer, "connection accepted");
    let session = Session::accept(stream, Arc::clone(hub));
    sessions.spawn(async move {
        if let Err(err) = session.run().await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

fn reap_session(finished: Result<(), JoinError>) {
    if let Err(err) = finished {
        if err.is_panic() {
            warn!(error = ?err, "session task panicked");
        }
    }
}

/// Empties the registry, telling each user why before their connection closes.
fn disconnect_all(hub: &Hub) -> usize {
    let notice = ServerLine::error(SHUTTING_DOWN);
    let mut notified = 0;
    for (user, sink) in hub.registry.drain() {
        match sink.send(&notice) {
            Ok(()) => notified += 1,
            Err(err) => debug!(user = %user, error = ?err, "failed to send shutdown notice"),
        }
        sink.close();
    }
    notified
}
