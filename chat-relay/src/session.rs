use std::{io, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncBufRead, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf},
};
use tracing::{debug, info, warn};

use crate::{
    broadcast, codec,
    hub::Hub,
    protocol::{Command, ServerLine},
    registry::RegisterError,
    router::Router,
    sink::{SessionId, Sink},
};

pub const PROCESSING_FAILED: &str = "failed to process command";
pub const LINE_TOO_LONG: &str = "line too long";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Active { user: String },
    Closed,
}

/// Server side of one client connection, from handshake to close.
pub struct Session<R> {
    id: SessionId,
    peer: Option<SocketAddr>,
    reader: R,
    sink: Sink,
    hub: Arc<Hub>,
    state: SessionState,
}

impl Session<BufReader<OwnedReadHalf>> {
    pub fn accept(stream: TcpStream, hub: Arc<Hub>) -> Self {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let id = hub.next_session_id();
        Session::new(id, peer, BufReader::new(reader), Sink::new(id, writer), hub)
    }
}

impl<R> Session<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(id: SessionId, peer: Option<SocketAddr>, reader: R, sink: Sink, hub: Arc<Hub>) -> Self {
        Self {
            id,
            peer,
            reader,
            sink,
            hub,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drives the connection to completion.
    ///
    /// Cleanup always runs, whether the client said `close`, the stream ended,
    /// or the handshake was rejected.
    pub async fn run(mut self) -> Result<()> {
        let result = match self.handshake().await {
            Ok(()) => self.command_loop().await,
            Err(err) => Err(err),
        };
        self.close();
        result
    }

    async fn handshake(&mut self) -> Result<()> {
        self.state = SessionState::Handshaking;
        self.sink.send(&ServerLine::Prompt)?;

        let candidate = self.next_line().await?;
        let user = match candidate {
            Some(name) if !is_reserved(&name) => name,
            other => {
                info!(peer = ?self.peer, candidate = ?other, "handshake rejected");
                self.refuse(RegisterError::InvalidName);
                bail!("handshake rejected: invalid username");
            }
        };

        if let Err(err) = self.hub.registry.register(&user, self.sink.clone()) {
            info!(peer = ?self.peer, candidate = %user, reason = %err, "handshake rejected");
            self.refuse(err);
            bail!("handshake rejected: {err}");
        }

        self.state = SessionState::Active { user: user.clone() };
        info!(peer = ?self.peer, session = self.id, user = %user, "user connected");

        let roster = ServerLine::UserList {
            users: self.hub.registry.snapshot(),
        };
        self.sink
            .send(&roster)
            .context("failed to send initial user list")?;
        broadcast::broadcast_users(&self.hub.registry);
        Ok(())
    }

    fn refuse(&self, reason: RegisterError) {
        if let Err(err) = self.sink.send(&ServerLine::error(reason)) {
            debug!(peer = ?self.peer, error = ?err, "failed to send handshake error");
        }
    }

    async fn command_loop(&mut self) -> Result<()> {
        let SessionState::Active { user } = &self.state else {
            bail!("command loop entered before handshake");
        };
        let user = user.clone();

        while let Some(line) = self.next_line().await? {
            let command = match Command::parse(&line) {
                Ok(Command::Close) => break,
                Ok(command) => command,
                Err(err) => {
                    self.sink.send(&ServerLine::error(err))?;
                    continue;
                }
            };

            let router = Router::new(&self.hub, &user, &self.sink);
            if let Err(err) = router.handle(command, &mut self.reader).await {
                warn!(user = %user, error = ?err, "command failed");
                self.sink.send(&ServerLine::error(PROCESSING_FAILED))?;
            }
        }

        Ok(())
    }

    /// Reads the next line, telling the client before giving up on an
    /// oversized one.
    async fn next_line(&mut self) -> Result<Option<String>> {
        match codec::read_line(&mut self.reader).await {
            Ok(line) => Ok(line),
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                let _ = self.sink.send(&ServerLine::error(LINE_TOO_LONG));
                Err(err).context("client sent an oversized line")
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Releases the registry slot (if the handshake got that far) and hangs up
    /// once everything already queued for this client is written.
    fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Active { user } = previous {
            if self.hub.registry.unregister(&user).is_some() {
                info!(peer = ?self.peer, session = self.id, user = %user, "user disconnected");
                broadcast::broadcast_users(&self.hub.registry);
            }
        }
        self.sink.close();
    }
}

/// Blank names and the literal `null` are refused before registration.
fn is_reserved(name: &str) -> bool {
    name.trim().is_empty() || name.eq_ignore_ascii_case("null")
}
