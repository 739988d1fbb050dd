//! Typed Operations over RESP2
//!
//! A client request is one RESP2 array whose first element names the command.
//! This module interprets such arrays as typed operations and renders typed
//! operations back into RESP2. The same encoding is reused by the WAL, which
//! stores the numeric [`OpKind`] of every entry.
//!
//! Command names are case-sensitive and arity is exact:
//!
//! | Command  | Arity | Example                                  |
//! |----------|-------|------------------------------------------|
//! | `GET`    | 2     | `*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n`       |
//! | `SET`    | 3     | `*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n<value>`|
//! | `DELETE` | 2     | `*2\r\n$6\r\nDELETE\r\n$3\r\nkey\r\n`    |
//! | `PING`   | 1     | `*1\r\n$4\r\nPING\r\n`                   |

use crate::protocol::types::RespValue;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Numeric operation tag, as persisted in WAL entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Get = 0,
    Set = 1,
    Delete = 2,
    Ping = 3,
}

impl OpKind {
    /// The persisted numeric encoding of this kind.
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for OpKind {
    type Error = OpError;

    fn try_from(code: i64) -> Result<Self, OpError> {
        match code {
            0 => Ok(OpKind::Get),
            1 => Ok(OpKind::Set),
            2 => Ok(OpKind::Delete),
            3 => Ok(OpKind::Ping),
            other => Err(OpError::UnknownOpCode(other)),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Get => "GET",
            OpKind::Set => "SET",
            OpKind::Delete => "DELETE",
            OpKind::Ping => "PING",
        };
        f.write_str(name)
    }
}

/// A typed client operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Get { key: String },
    Set { key: String, value: RespValue },
    Delete { key: String },
    Ping,
}

/// Errors produced while interpreting a RESP2 value as an operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OpError {
    #[error("expected RESP2 array for operation")]
    NotAnArray,

    #[error("{op} operation requires {args}")]
    Arity {
        op: &'static str,
        args: &'static str,
    },

    #[error("{op} operation key must be a string")]
    KeyNotString { op: &'static str },

    #[error("unknown operation type: {0}")]
    UnknownOp(String),

    #[error("unknown operation code: {0}")]
    UnknownOpCode(i64),
}

impl Op {
    /// Returns the numeric kind of this operation.
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Get { .. } => OpKind::Get,
            Op::Set { .. } => OpKind::Set,
            Op::Delete { .. } => OpKind::Delete,
            Op::Ping => OpKind::Ping,
        }
    }

    /// Interprets a parsed RESP2 value as an operation.
    pub fn from_value(value: RespValue) -> Result<Self, OpError> {
        let array = value.into_array().ok_or(OpError::NotAnArray)?;
        if array.is_empty() {
            return Err(OpError::NotAnArray);
        }

        let mut elems = array.into_iter();
        // First element names the command; both string forms are accepted.
        let name = match elems.next() {
            Some(v) => v.as_str().unwrap_or_default().to_string(),
            None => return Err(OpError::NotAnArray),
        };

        match name.as_str() {
            "GET" => {
                let (key, rest) = take_key(elems, "GET", "1 argument")?;
                if rest != 0 {
                    return Err(OpError::Arity {
                        op: "GET",
                        args: "1 argument",
                    });
                }
                Ok(Op::Get { key })
            }
            "SET" => {
                let mut elems = elems;
                let key = key_from(elems.next(), "SET", "2 arguments")?;
                let value = elems.next().ok_or(OpError::Arity {
                    op: "SET",
                    args: "2 arguments",
                })?;
                if elems.next().is_some() {
                    return Err(OpError::Arity {
                        op: "SET",
                        args: "2 arguments",
                    });
                }
                Ok(Op::Set { key, value })
            }
            "DELETE" => {
                let (key, rest) = take_key(elems, "DELETE", "1 argument")?;
                if rest != 0 {
                    return Err(OpError::Arity {
                        op: "DELETE",
                        args: "1 argument",
                    });
                }
                Ok(Op::Delete { key })
            }
            "PING" => {
                if elems.next().is_some() {
                    return Err(OpError::Arity {
                        op: "PING",
                        args: "no arguments",
                    });
                }
                Ok(Op::Ping)
            }
            _ => Err(OpError::UnknownOp(name)),
        }
    }

    /// Renders this operation as a RESP2 value.
    ///
    /// The command name goes out as a SimpleString, keys as BulkStrings, and
    /// a SET value verbatim.
    pub fn to_value(&self) -> RespValue {
        match self {
            Op::Get { key } => RespValue::Array(vec![
                RespValue::simple_string("GET"),
                RespValue::BulkString(Bytes::from(key.clone())),
            ]),
            Op::Set { key, value } => RespValue::Array(vec![
                RespValue::simple_string("SET"),
                RespValue::BulkString(Bytes::from(key.clone())),
                value.clone(),
            ]),
            Op::Delete { key } => RespValue::Array(vec![
                RespValue::simple_string("DELETE"),
                RespValue::BulkString(Bytes::from(key.clone())),
            ]),
            Op::Ping => RespValue::Array(vec![RespValue::simple_string("PING")]),
        }
    }

    /// Serializes this operation to RESP2 wire bytes.
    pub fn serialize(&self) -> Vec<u8> {
        self.to_value().serialize()
    }
}

/// Pulls the key argument off the iterator and counts what remains.
fn take_key(
    mut elems: std::vec::IntoIter<RespValue>,
    op: &'static str,
    args: &'static str,
) -> Result<(String, usize), OpError> {
    let key = key_from(elems.next(), op, args)?;
    Ok((key, elems.count()))
}

fn key_from(
    value: Option<RespValue>,
    op: &'static str,
    args: &'static str,
) -> Result<String, OpError> {
    let value = value.ok_or(OpError::Arity { op, args })?;
    match value.as_str() {
        Some(s) => Ok(s.to_string()),
        None => Err(OpError::KeyNotString { op }),
    }
}
