//! Line protocol spoken by clients.
//!
//! Every request is one line, `VERB [name] [data]`, and gets exactly one
//! response line starting with `OK: ` or `ERROR: `.

use std::fmt;

use flatfs::io::BlockStorage;
use flatfs::StorageManager;
use thiserror::Error;

#[derive(Debug, PartialEq)]
pub enum Command {
    Create(String),
    Write(String, String),
    Read(String),
    Delete(String),
    List,
    Quit,
}

#[derive(Error, Debug, PartialEq)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,
    #[error("{0} requires a filename")]
    MissingName(&'static str),
    #[error("WRITE requires filename and data")]
    MissingData,
    #[error("unknown command")]
    Unknown(String),
}

#[derive(Debug, PartialEq)]
pub enum Response {
    Ok(String),
    Error(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok(info) => write!(f, "OK: {}", info),
            Response::Error(msg) => write!(f, "ERROR: {}", msg),
        }
    }
}

/// Splits off at most two whitespace separated words; whatever follows is the
/// third part with its inner spacing intact.
fn split_request(line: &str) -> Vec<&str> {
    let mut parts = Vec::with_capacity(3);
    let mut rest = line.trim();
    while !rest.is_empty() && parts.len() < 2 {
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest);
                rest = "";
            }
        }
    }
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let parts = split_request(line);
        let verb = match parts.first() {
            Some(verb) => verb.to_uppercase(),
            None => return Err(ProtocolError::Empty),
        };
        let name = |verb: &'static str| {
            parts
                .get(1)
                .map(|name| name.to_string())
                .ok_or(ProtocolError::MissingName(verb))
        };

        match verb.as_str() {
            "CREATE" => Ok(Command::Create(name("CREATE")?)),
            "WRITE" => match (parts.get(1), parts.get(2)) {
                (Some(name), Some(data)) => Ok(Command::Write(name.to_string(), data.to_string())),
                _ => Err(ProtocolError::MissingData),
            },
            "READ" => Ok(Command::Read(name("READ")?)),
            "DELETE" => Ok(Command::Delete(name("DELETE")?)),
            "LIST" => Ok(Command::List),
            "QUIT" => Ok(Command::Quit),
            _ => Err(ProtocolError::Unknown(verb.clone())),
        }
    }

    /// Runs the command against the file system and renders the outcome.
    pub fn execute<T: BlockStorage>(&self, fs: &StorageManager<T>) -> Response {
        let result = match self {
            Command::Create(name) => fs.create(name).map(|_| format!("created {}", name)),
            Command::Write(name, data) => fs
                .write(name, data.as_bytes())
                .map(|_| format!("wrote {}", name)),
            Command::Read(name) => fs
                .read(name)
                .map(|content| String::from_utf8_lossy(&content).into_owned()),
            Command::Delete(name) => fs.delete(name).map(|_| format!("deleted {}", name)),
            Command::List => fs.list().map(|names| names.join(",")),
            Command::Quit => Ok("goodbye".to_string()),
        };
        match result {
            Ok(info) => Response::Ok(info),
            Err(err) => Response::Error(err.to_string()),
        }
    }
}

/// Parses and executes one request line. The flag is set when the client
/// asked to end the session.
pub fn handle_line<T: BlockStorage>(fs: &StorageManager<T>, line: &str) -> (Response, bool) {
    match Command::parse(line) {
        Ok(command) => {
            let quit = command == Command::Quit;
            (command.execute(fs), quit)
        }
        Err(err) => (Response::Error(err.to_string()), false),
    }
}
