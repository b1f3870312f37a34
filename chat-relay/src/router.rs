//! Command handling for an active session.
//!
//! The router resolves a destination against the registry and group store,
//! checks membership, and queues output on the recipients' sinks. File
//! payloads are read from the caller's stream here, so a transfer holds up the
//! caller's command loop until the announced byte count has been consumed.

use std::{io, sync::Arc};

use anyhow::{Result, bail};
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::{
    broadcast,
    codec::{self, Transfer},
    hub::Hub,
    protocol::{Command, ServerLine},
    sink::Sink,
};

pub const DESTINATION_NOT_FOUND: &str = "destination not found or not permitted";

/// Where a message or file for `target` should go, from one caller's view.
#[derive(Debug)]
pub enum Destination {
    User { name: String, sink: Sink },
    /// Connected members of the group other than the caller.
    Group {
        name: String,
        recipients: Vec<(String, Sink)>,
    },
    Unreachable,
}

/// Resolves `target` for `caller`.
///
/// A connected user shadows a group of the same name. Groups are only
/// reachable by their members.
pub fn resolve(hub: &Hub, caller: &str, target: &str) -> Destination {
    if let Some(sink) = hub.registry.lookup(target) {
        return Destination::User {
            name: target.to_string(),
            sink,
        };
    }

    match hub.groups.members(target) {
        Some(members) if members.iter().any(|member| member == caller) => {
            let recipients = members
                .into_iter()
                .filter(|member| member != caller)
                .filter_map(|member| hub.registry.lookup(&member).map(|sink| (member, sink)))
                .collect();
            Destination::Group {
                name: target.to_string(),
                recipients,
            }
        }
        _ => Destination::Unreachable,
    }
}

pub struct Router<'a> {
    hub: &'a Hub,
    user: &'a str,
    sink: &'a Sink,
}

impl<'a> Router<'a> {
    pub fn new(hub: &'a Hub, user: &'a str, sink: &'a Sink) -> Self {
        Self { hub, user, sink }
    }

    /// Runs one command on behalf of the caller.
    ///
    /// Rejections (bad names, unknown targets) are answered with an `ERRO:`
    /// line and count as success. `Err` means the command broke part way and
    /// the caller should be told generically.
    pub async fn handle<R>(&self, command: Command, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        match command {
            Command::CreateGroup { name } => self.create_group(&name),
            Command::AddMember { group, member } => self.add_member(&group, &member),
            Command::Message { target, text } => self.send_message(&target, &text),
            Command::SendFile {
                target,
                filename,
                size,
            } => self.send_file(&target, &filename, size, reader).await,
            // The session loop stops on `close` before it gets here.
            Command::Close => Ok(()),
        }
    }

    fn create_group(&self, name: &str) -> Result<()> {
        if let Err(err) = self.hub.groups.create_group(name, self.user) {
            return self.reject(err);
        }
        info!(user = self.user, group = name, "group created");
        broadcast::broadcast_group(&self.hub.groups, &self.hub.registry, name);
        Ok(())
    }

    fn add_member(&self, group: &str, member: &str) -> Result<()> {
        if let Err(err) = self
            .hub
            .groups
            .add_member(group, member, &self.hub.registry)
        {
            return self.reject(err);
        }
        info!(user = self.user, group, member, "member added");
        broadcast::broadcast_group(&self.hub.groups, &self.hub.registry, group);
        Ok(())
    }

    fn send_message(&self, target: &str, text: &str) -> Result<()> {
        match resolve(self.hub, self.user, target) {
            Destination::User { name, sink } => {
                let line = ServerLine::Direct {
                    from: self.user.to_string(),
                    text: text.to_string(),
                };
                if let Err(err) = sink.send(&line) {
                    debug!(user = %name, error = ?err, "failed to deliver direct message");
                }
                info!(from = self.user, to = %name, "direct message");
                Ok(())
            }
            Destination::Group { name, recipients } => {
                let line = ServerLine::GroupMessage {
                    group: name.clone(),
                    from: self.user.to_string(),
                    text: text.to_string(),
                };
                let delivered = broadcast::deliver(&recipients, &line);
                info!(from = self.user, group = %name, delivered, "group message");
                Ok(())
            }
            Destination::Unreachable => self.reject(DESTINATION_NOT_FOUND),
        }
    }

    async fn send_file<R>(
        &self,
        target: &str,
        filename: &str,
        size: u64,
        reader: &mut R,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        match resolve(self.hub, self.user, target) {
            Destination::User { name, sink } => {
                self.relay_to_user(&name, &sink, filename, size, reader)
                    .await
            }
            Destination::Group { name, recipients } => {
                self.relay_to_group(&name, &recipients, filename, size, reader)
                    .await
            }
            Destination::Unreachable => {
                let transfer = codec::drain(reader, size).await?;
                debug!(from = self.user, target, ?transfer, "discarded file payload");
                self.reject(DESTINATION_NOT_FOUND)
            }
        }
    }

    /// Streams the payload straight from the caller to one recipient.
    async fn relay_to_user<R>(
        &self,
        to: &str,
        sink: &Sink,
        filename: &str,
        size: u64,
        reader: &mut R,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let announce = ServerLine::File {
            from: self.user.to_string(),
            filename: filename.to_string(),
            size,
        };
        let report = sink
            .relay_from(&announce, reader, size, self.hub.config().chunk_size)
            .await?;

        match (report.transfer, report.sink_error) {
            (Transfer::Truncated { received, expected }, _) => {
                // Nothing goes on the wire; the recipient is left short.
                warn!(from = self.user, to, filename, received, expected, "file relay truncated");
                Ok(())
            }
            (Transfer::Complete(_), Some(err)) => {
                bail!("failed to deliver file to {to}: {err}")
            }
            (Transfer::Complete(bytes), None) => {
                info!(from = self.user, to, filename, bytes, "file relayed");
                Ok(())
            }
        }
    }

    /// Buffers the payload once, then replays it to every recipient.
    async fn relay_to_group<R>(
        &self,
        group: &str,
        recipients: &[(String, Sink)],
        filename: &str,
        size: u64,
        reader: &mut R,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let payload: Arc<[u8]> = match codec::read_exact(reader, size).await {
            Ok(payload) => payload.into(),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(from = self.user, group, filename, error = %err, "group file upload truncated");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let announce = ServerLine::GroupFile {
            group: group.to_string(),
            from: self.user.to_string(),
            filename: filename.to_string(),
            size: payload.len() as u64,
        };
        for (member, sink) in recipients {
            match sink.send_file(&announce, Arc::clone(&payload)) {
                Ok(()) => debug!(group, member = %member, "group file queued"),
                Err(err) => debug!(group, member = %member, error = ?err, "failed to deliver group file"),
            }
        }
        info!(from = self.user, group, filename, bytes = payload.len(), "group file relayed");
        Ok(())
    }

    fn reject(&self, reason: impl std::fmt::Display) -> Result<()> {
        self.sink.send(&ServerLine::error(reason))?;
        Ok(())
    }
}
