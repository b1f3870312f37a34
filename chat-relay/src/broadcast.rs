//! Best-effort fan-out of presence and group roster updates.
//!
//! Lines are queued on each recipient's sink, so a recipient that is busy
//! receiving a file never holds up the caller. A connection whose writer has
//! stopped is logged and skipped; its own session cleans it up.

use tracing::debug;

use crate::{groups::GroupStore, protocol::ServerLine, registry::Registry, sink::Sink};

/// Sends `USERLIST|<csv>` to every connected user.
pub fn broadcast_users(registry: &Registry) -> usize {
    let entries = registry.entries();
    let line = ServerLine::UserList {
        users: entries.iter().map(|(name, _)| name.clone()).collect(),
    };
    deliver(&entries, &line)
}

/// Sends `GRUPO:<group>:<csv>` to the connected members of `group`.
pub fn broadcast_group(groups: &GroupStore, registry: &Registry, group: &str) -> usize {
    let Some(members) = groups.members(group) else {
        return 0;
    };
    let recipients: Vec<_> = members
        .iter()
        .filter_map(|member| registry.lookup(member).map(|sink| (member.clone(), sink)))
        .collect();
    let line = ServerLine::GroupRoster {
        group: group.to_string(),
        members,
    };
    deliver(&recipients, &line)
}

/// Queues `line` for every recipient and returns how many accepted it.
pub(crate) fn deliver(recipients: &[(String, Sink)], line: &ServerLine) -> usize {
    let mut delivered = 0;
    for (name, sink) in recipients {
        match sink.send(line) {
            Ok(()) => delivered += 1,
            Err(err) => debug!(user = %name, error = ?err, "failed to deliver line"),
        }
    }
    delivered
}
