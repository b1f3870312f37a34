//! Real-time TCP relay for named users, groups and file transfers.
//!
//! Every client holds one connection. Control traffic is newline-delimited
//! UTF-8; file payloads follow their announce line as raw bytes of the
//! declared length. Each module covers one piece:
//!
//! - [`codec`] reads and writes lines and fixed-length byte spans.
//! - [`protocol`] validates names, parses client commands and encodes the
//!   relay's control lines.
//! - [`sink`] is the queued outbound half of a connection, written by its
//!   own task.
//! - [`registry`] and [`groups`] hold the shared user and group state, and
//!   [`hub`] bundles them into the object every session receives.
//! - [`broadcast`] pushes user lists and group rosters after changes.
//! - [`router`] resolves destinations and delivers messages and files.
//! - [`session`] runs the handshake and command loop for one connection.
//! - [`server`] accepts connections and spawns a task per session.
//! - [`cli`] parses the command line.

pub mod broadcast;
pub mod cli;
pub mod codec;
pub mod groups;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod sink;
