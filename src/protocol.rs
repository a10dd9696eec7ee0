//! Wire codec: turns one request line into a [`Command`], and a [`ReplyCode`]
//! back into the bytes written to the socket.

use std::fmt;

pub const INDEX: &str = "INDEX";
pub const REMOVE: &str = "REMOVE";
pub const QUERY: &str = "QUERY";
pub const NOOP: &str = "NOOP";

const SEP: char = '|';

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub pkg: String,
    pub deps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Index,
    Remove,
    Query,
    Noop,
    /// Preserves the unrecognized literal so the semantics layer can report it.
    Invalid(String),
}

impl CommandKind {
    fn from_token(token: &str) -> Self {
        match token {
            INDEX => CommandKind::Index,
            REMOVE => CommandKind::Remove,
            QUERY => CommandKind::Query,
            NOOP => CommandKind::Noop,
            other => CommandKind::Invalid(other.to_string()),
        }
    }

    fn as_wire(&self) -> &str {
        match self {
            CommandKind::Index => INDEX,
            CommandKind::Remove => REMOVE,
            CommandKind::Query => QUERY,
            CommandKind::Noop => NOOP,
            CommandKind::Invalid(s) => s.as_str(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("message format is invalid: expecting 3 got {0} tokens")]
pub struct ParseError(pub usize);

/// Replies are always exactly one of these three codes, bit-exact on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Ok,
    Fail,
    Error,
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplyCode::Ok => "OK",
            ReplyCode::Fail => "FAIL",
            ReplyCode::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Parses one request line (already stripped of its trailing newline).
///
/// Trailing `\r` is tolerated so callers don't need to special-case CRLF
/// framing themselves.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let tokens: Vec<&str> = line.split(SEP).collect();
    if tokens.len() != 3 {
        return Err(ParseError(tokens.len()));
    }

    let kind = CommandKind::from_token(tokens[0]);
    let pkg = tokens[1].to_string();
    let deps = if tokens[2].is_empty() {
        Vec::new()
    } else {
        tokens[2].split(',').map(str::to_string).collect()
    };

    Ok(Command { kind, pkg, deps })
}

impl Command {
    /// Re-encodes a command to its wire form, normalizing an empty dependency
    /// list to an empty third token (used by property tests, see P6).
    pub fn encode(&self) -> String {
        format!(
            "{}{SEP}{}{SEP}{}",
            self.kind.as_wire(),
            self.pkg,
            self.deps.join(",")
        )
    }
}
