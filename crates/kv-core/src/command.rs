//! # command
//!
//! why: turn client operations into the bytes a log record carries, and back
//! relations: encoded by kv-node's cluster client, decoded by fsm.rs on apply
//! what: Command enum, length-prefixed wire codec
//!
//! Wire format:
//!
//! ```text
//! Put    A:<key len>:<value len>:<key><value>
//! Delete D:<key>
//! ```
//!
//! Lengths are decimal byte counts. They make the body unambiguous even when
//! the key or value contains `:`.

use crate::error::MalformedCommand;

const SEPARATOR: u8 = b':';

/// A client write carried through the replicated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { key: String, value: String },
    Delete { key: String },
}

impl Command {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Put { key, value } => {
                format!("A:{}:{}:{key}{value}", key.len(), value.len()).into_bytes()
            }
            Self::Delete { key } => format!("D:{key}").into_bytes(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MalformedCommand> {
        let (tag, rest) = split_once(bytes).ok_or(MalformedCommand::MissingTag)?;
        match tag {
            b"A" => decode_put(rest),
            b"D" => Ok(Self::Delete {
                key: utf8(rest, "key")?,
            }),
            other => Err(MalformedCommand::UnknownTag(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

fn decode_put(rest: &[u8]) -> Result<Command, MalformedCommand> {
    let (key_len, rest) = take_length(rest, "key")?;
    let (value_len, body) = take_length(rest, "value")?;

    let declared = key_len
        .checked_add(value_len)
        .ok_or(MalformedCommand::LengthMismatch {
            declared: usize::MAX,
            actual: body.len(),
        })?;
    if body.len() != declared {
        return Err(MalformedCommand::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    let (key, value) = body.split_at(key_len);
    Ok(Command::Put {
        key: utf8(key, "key")?,
        value: utf8(value, "value")?,
    })
}

fn take_length<'a>(
    bytes: &'a [u8],
    field: &'static str,
) -> Result<(usize, &'a [u8]), MalformedCommand> {
    let (raw, rest) = split_once(bytes).ok_or(MalformedCommand::MissingLength(field))?;
    let bad_length = || MalformedCommand::BadLength {
        field,
        raw: String::from_utf8_lossy(raw).into_owned(),
    };

    // digits only: `usize::from_str` would also take a leading `+`
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        return Err(bad_length());
    }
    let len = std::str::from_utf8(raw)
        .map_err(|_| bad_length())?
        .parse::<usize>()
        .map_err(|_| bad_length())?;
    Ok((len, rest))
}

fn split_once(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let at = bytes.iter().position(|b| *b == SEPARATOR)?;
    Some((&bytes[..at], &bytes[at + 1..]))
}

fn utf8(bytes: &[u8], field: &'static str) -> Result<String, MalformedCommand> {
    String::from_utf8(bytes.to_vec()).map_err(|_| MalformedCommand::NotUtf8(field))
}
