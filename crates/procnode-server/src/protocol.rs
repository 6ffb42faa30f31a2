//! Line protocol spoken on the server socket.
//!
//! One request per line, arguments separated by single spaces:
//!
//! | Request | Response |
//! |---|---|
//! | `ls <dir>` | `ok <n>` then n names, directories suffixed `/` |
//! | `stat <path>` | `ok file <size>` or `ok dir` |
//! | `cat <path>` | `ok <len>`, len raw bytes, newline |
//! | `put <path> <text>` | `ok <written>` |
//! | `truncate <path> <size>` | `ok` |
//! | `watch <path>` | `ok <len>`, next changed value, newline |
//! | `quit` | connection closes |
//!
//! Failures are `err <kind> <message>`.

use procnode_kernel::{DirEntry, FileAttr, ProcError};
use thiserror::Error;

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List(String),
    Stat(String),
    Cat(String),
    Put { path: String, data: Vec<u8> },
    Truncate { path: String, size: u64 },
    Watch(String),
    Quit,
}

/// Malformed request line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{command} needs a {arg}")]
    MissingArgument {
        command: &'static str,
        arg: &'static str,
    },
    #[error("not a number: {0}")]
    BadNumber(String),
}

impl Request {
    /// Parse one line (without its trailing newline).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(3, ' ');
        let command = parts.next().filter(|c| !c.is_empty()).ok_or(ProtocolError::Empty)?;
        let mut path = |command: &'static str| {
            parts
                .next()
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .ok_or(ProtocolError::MissingArgument { command, arg: "path" })
        };

        match command {
            "ls" => Ok(Request::List(path("ls")?)),
            "stat" => Ok(Request::Stat(path("stat")?)),
            "cat" => Ok(Request::Cat(path("cat")?)),
            "watch" => Ok(Request::Watch(path("watch")?)),
            "put" => {
                let path = path("put")?;
                let data = parts.next().unwrap_or("").as_bytes().to_vec();
                Ok(Request::Put { path, data })
            }
            "truncate" => {
                let path = path("truncate")?;
                let size = parts.next().ok_or(ProtocolError::MissingArgument {
                    command: "truncate",
                    arg: "size",
                })?;
                let size = size
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::BadNumber(size.to_string()))?;
                Ok(Request::Truncate { path, size })
            }
            "quit" => Ok(Request::Quit),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

/// `ok` with an optional tail.
pub fn ok_line(tail: &str) -> Vec<u8> {
    if tail.is_empty() {
        b"ok\n".to_vec()
    } else {
        format!("ok {tail}\n").into_bytes()
    }
}

/// Length-prefixed payload.
pub fn encode_data(data: &[u8]) -> Vec<u8> {
    let mut out = format!("ok {}\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.push(b'\n');
    out
}

/// Directory listing, directories suffixed `/`.
pub fn encode_listing(entries: &[DirEntry]) -> Vec<u8> {
    let mut out = format!("ok {}\n", entries.len());
    for entry in entries {
        out.push_str(&entry.name);
        if entry.kind.is_dir() {
            out.push('/');
        }
        out.push('\n');
    }
    out.into_bytes()
}

/// Stat result.
pub fn encode_attr(attr: &FileAttr) -> Vec<u8> {
    if attr.is_dir() {
        ok_line("dir")
    } else {
        ok_line(&format!("file {}", attr.size))
    }
}

/// Node tree failure.
pub fn encode_error(err: &ProcError) -> Vec<u8> {
    format!("err {} {}\n", err.kind(), single_line(&err.to_string())).into_bytes()
}

/// Request that could not be parsed.
pub fn encode_protocol_error(err: &ProtocolError) -> Vec<u8> {
    format!("err bad-request {}\n", single_line(&err.to_string())).into_bytes()
}

fn single_line(msg: &str) -> String {
    msg.replace(['\r', '\n'], " ")
}
