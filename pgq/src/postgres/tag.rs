//! `CommandComplete` tag parsing.
use std::fmt;

use crate::error::ProtocolError;
use crate::ext::parse_i64;

/// The command word of a completed statement's tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Command {
    #[default]
    Unknown,
    Insert,
    Delete,
    Update,
    Select,
    Move,
    Fetch,
    Copy,
}

impl Command {
    fn from_word(word: &[u8]) -> Option<Self> {
        Some(match std::str::from_utf8(word).ok()? {
            "INSERT" => Self::Insert,
            "DELETE" => Self::Delete,
            "UPDATE" => Self::Update,
            "SELECT" => Self::Select,
            "MOVE" => Self::Move,
            "FETCH" => Self::Fetch,
            "COPY" => Self::Copy,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Insert => "INSERT",
            Self::Delete => "DELETE",
            Self::Update => "UPDATE",
            Self::Select => "SELECT",
            Self::Move => "MOVE",
            Self::Fetch => "FETCH",
            Self::Copy => "COPY",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a tag such as `INSERT 0 17` into its command and row count.
pub(crate) fn parse_command_tag(tag: &[u8]) -> Result<(Command, i64), ProtocolError> {
    let mut reader = TagReader { b: tag };

    let word = reader.read_segment()?;
    let command = Command::from_word(word)
        .ok_or_else(|| ProtocolError::UnknownCommand(String::from_utf8_lossy(word).into_owned()))?;

    if command == Command::Insert {
        // skip the legacy oid column
        reader.read_segment()?;
    }

    let rows = parse_i64(reader.read_segment()?)?;
    Ok((command, rows))
}

struct TagReader<'a> {
    b: &'a [u8],
}

impl<'a> TagReader<'a> {
    fn read_segment(&mut self) -> Result<&'a [u8], ProtocolError> {
        if self.b.is_empty() {
            return Err(ProtocolError::MalformedCommandTag);
        }
        match self.b.iter().position(|b| *b == b' ') {
            None => Ok(std::mem::take(&mut self.b)),
            Some(i) => {
                let segment = &self.b[..i];
                self.b = &self.b[i + 1..];
                Ok(segment)
            }
        }
    }
}
