//! Text side of the wire protocol.
//!
//! Clients send newline-terminated commands ([`Command`]); the relay answers
//! with the control lines in [`ServerLine`]. File payloads travel as raw
//! bytes right after an `ARQUIVO`/`GRUPO_ARQUIVO` line and are handled by
//! [`crate::codec`], not here.

use std::fmt;

/// Handshake prompt sent as soon as a connection is accepted.
pub const NAME_PROMPT: &str = "NOME?";

const GROUP_ADD_USAGE: &str = "/grupo_add <group> <user>";
const MSG_USAGE: &str = "/msg <target> <text>";
const FILE_USAGE: &str = "/arquivo <target> <filename> <size>";

/// Usernames and group names: ASCII letters, digits and `_`, at least three long.
pub fn is_valid_name(name: &str) -> bool {
    name.len() >= 3
        && name
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}

/// A command read from an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateGroup { name: String },
    AddMember { group: String, member: String },
    Message { target: String, text: String },
    SendFile {
        target: String,
        filename: String,
        size: u64,
    },
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Usage(&'static str),
    Unknown,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Usage(usage) => write!(f, "usage: {usage}"),
            CommandError::Unknown => f.write_str("unknown command"),
        }
    }
}

impl std::error::Error for CommandError {}

impl Command {
    /// Parses one line received after the handshake.
    ///
    /// Prefixes are matched with their trailing space, so a bare `/msg` is an
    /// unknown command rather than a usage error. `close` is case-insensitive.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        if line.eq_ignore_ascii_case("close") {
            return Ok(Command::Close);
        }

        if let Some(rest) = line.strip_prefix("/grupo_criar ") {
            return Ok(Command::CreateGroup {
                name: rest.trim().to_string(),
            });
        }

        if let Some(rest) = line.strip_prefix("/grupo_add ") {
            return match split_spaces(rest).as_slice() {
                [group, member] => Ok(Command::AddMember {
                    group: group.to_string(),
                    member: member.to_string(),
                }),
                _ => Err(CommandError::Usage(GROUP_ADD_USAGE)),
            };
        }

        if let Some(rest) = line.strip_prefix("/msg ") {
            // Only the first space separates target from text.
            return match rest.split_once(' ') {
                Some((target, text)) => Ok(Command::Message {
                    target: target.to_string(),
                    text: text.to_string(),
                }),
                None => Err(CommandError::Usage(MSG_USAGE)),
            };
        }

        if line.starts_with("/arquivo ") {
            return parse_file_command(line);
        }

        Err(CommandError::Unknown)
    }
}

fn parse_file_command(line: &str) -> Result<Command, CommandError> {
    let parts = split_spaces(line);
    let [_, target, name_parts @ .., size] = parts.as_slice() else {
        return Err(CommandError::Usage(FILE_USAGE));
    };
    if name_parts.is_empty() {
        return Err(CommandError::Usage(FILE_USAGE));
    }

    let size = size
        .parse::<u64>()
        .map_err(|_| CommandError::Usage(FILE_USAGE))?;

    Ok(Command::SendFile {
        target: target.to_string(),
        filename: name_parts.join(" "),
        size,
    })
}

/// Splits on single spaces, ignoring trailing ones.
fn split_spaces(text: &str) -> Vec<&str> {
    text.trim_end_matches(' ').split(' ').collect()
}

/// Control lines written by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    Prompt,
    Error {
        reason: String,
    },
    UserList {
        users: Vec<String>,
    },
    GroupRoster {
        group: String,
        members: Vec<String>,
    },
    Direct {
        from: String,
        text: String,
    },
    GroupMessage {
        group: String,
        from: String,
        text: String,
    },
    File {
        from: String,
        filename: String,
        size: u64,
    },
    GroupFile {
        group: String,
        from: String,
        filename: String,
        size: u64,
    },
}

impl ServerLine {
    pub fn error(reason: impl fmt::Display) -> Self {
        ServerLine::Error {
            reason: reason.to_string(),
        }
    }

    /// Decodes a control line. Returns `None` for anything unrecognised.
    ///
    /// Message text and filenames may contain `:`; sizes are taken from the
    /// last field.
    pub fn parse(line: &str) -> Option<Self> {
        if line == NAME_PROMPT {
            return Some(ServerLine::Prompt);
        }
        if let Some(reason) = line.strip_prefix("ERRO:") {
            return Some(ServerLine::error(reason));
        }
        if let Some(csv) = line.strip_prefix("USERLIST|") {
            return Some(ServerLine::UserList {
                users: split_csv(csv),
            });
        }
        if let Some(rest) = line.strip_prefix("GRUPO_MSG:") {
            let mut fields = rest.splitn(3, ':');
            return Some(ServerLine::GroupMessage {
                group: fields.next()?.to_string(),
                from: fields.next()?.to_string(),
                text: fields.next()?.to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("GRUPO_ARQUIVO:") {
            let (head, size) = rest.rsplit_once(':')?;
            let mut fields = head.splitn(3, ':');
            return Some(ServerLine::GroupFile {
                group: fields.next()?.to_string(),
                from: fields.next()?.to_string(),
                filename: fields.next()?.to_string(),
                size: size.parse().ok()?,
            });
        }
        if let Some(rest) = line.strip_prefix("GRUPO:") {
            let (group, csv) = rest.split_once(':')?;
            return Some(ServerLine::GroupRoster {
                group: group.to_string(),
                members: split_csv(csv),
            });
        }
        if let Some(rest) = line.strip_prefix("MSG:") {
            let (from, text) = rest.split_once(':')?;
            return Some(ServerLine::Direct {
                from: from.to_string(),
                text: text.to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("ARQUIVO:") {
            let (head, size) = rest.rsplit_once(':')?;
            let (from, filename) = head.split_once(':')?;
            return Some(ServerLine::File {
                from: from.to_string(),
                filename: filename.to_string(),
                size: size.parse().ok()?,
            });
        }
        None
    }
}

fn split_csv(csv: &str) -> Vec<String> {
    if csv.is_empty() {
        return Vec::new();
    }
    csv.split(',').map(str::to_string).collect()
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Prompt => f.write_str(NAME_PROMPT),
            ServerLine::Error { reason } => write!(f, "ERRO:{reason}"),
            ServerLine::UserList { users } => write!(f, "USERLIST|{}", users.join(",")),
            ServerLine::GroupRoster { group, members } => {
                write!(f, "GRUPO:{group}:{}", members.join(","))
            }
            ServerLine::Direct { from, text } => write!(f, "MSG:{from}:{text}"),
            ServerLine::GroupMessage { group, from, text } => {
                write!(f, "GRUPO_MSG:{group}:{from}:{text}")
            }
            ServerLine::File {
                from,
                filename,
                size,
            } => write!(f, "ARQUIVO:{from}:{filename}:{size}"),
            ServerLine::GroupFile {
                group,
                from,
                filename,
                size,
            } => write!(f, "GRUPO_ARQUIVO:{group}:{from}:{filename}:{size}"),
        }
    }
}
