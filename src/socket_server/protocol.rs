//! Socket server protocol message types
//!
//! Every frame, in both directions, is a JSON array of command objects:
//!
//! ```json
//! // Client -> Server
//! [{"cmd": "login", "seq": 1001, "immed": true, "data": {"uid": 1000}}]
//!
//! // Server -> Client
//! [{"cmd": "login", "seq": 1001, "code": 0, "data": {"id": 5001}}]
//! [{"cmd": "rcvdata", "seq": 0, "code": 0, "data": {"id": 5001, "uid": 1000, "chan": "", "data": "hi"}}]
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CommandError, DecodeError, PushError};

/// Server-assigned connection identifier, issued at login
pub type ClientId = i64;

/// Client-supplied logical identity; several sessions may share one
pub type UserId = i64;

/// Client-to-server command envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub cmd: String,
    #[serde(default)]
    pub seq: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub immed: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Fields this server does not know about, carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server-to-client command envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub cmd: String,
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Response {
    /// Successful acknowledgement of a request, echoing `cmd` and `seq`
    pub fn ack(req: &Request) -> Self {
        Self {
            cmd: req.cmd.clone(),
            seq: req.seq,
            code: 0,
            msg: String::new(),
            data: Value::Null,
        }
    }

    /// Acknowledgement carrying a payload
    pub fn ack_with(req: &Request, data: Value) -> Self {
        Self {
            data,
            ..Self::ack(req)
        }
    }

    /// Error response for a request
    pub fn error(req: &Request, err: &CommandError) -> Self {
        Self {
            code: err.code(),
            msg: err.to_string(),
            ..Self::ack(req)
        }
    }

    /// Server-initiated delivery of routed data
    pub fn rcvdata(payload: &RecvData) -> Self {
        Self {
            cmd: CommandKind::RecvData.as_str().to_string(),
            seq: 0,
            code: 0,
            msg: String::new(),
            data: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Payload of a `rcvdata` delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecvData {
    /// Sender's client id
    pub id: ClientId,
    /// Sender's user id
    pub uid: UserId,
    /// Channel that matched, empty for client/user addressing
    pub chan: String,
    pub data: Value,
}

/// Decode one frame into a batch.
///
/// Fails on malformed JSON, a non-array top level, or any element that is
/// not a command object. An empty array is a valid, empty batch.
pub fn decode_batch<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(DecodeError::NotAnArray {
                found: json_kind(&other),
            })
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item)
                .map_err(|source| DecodeError::InvalidCommand { index, source })
        })
        .collect()
}

/// Encode a batch as a JSON array
pub fn encode_batch<T: Serialize>(batch: &[T]) -> Result<String, PushError> {
    serde_json::to_string(batch).map_err(PushError::Encode)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Closed set of command names understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Login,
    Ping,
    Enter,
    Exit,
    SendToClients,
    SendToUsers,
    SendToChannels,
    RecvData,
}

impl CommandKind {
    /// Parse a `cmd` string into a CommandKind
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "login" => Some(Self::Login),
            "ping" => Some(Self::Ping),
            "enter" => Some(Self::Enter),
            "exit" => Some(Self::Exit),
            "snd2cli" => Some(Self::SendToClients),
            "snd2usr" => Some(Self::SendToUsers),
            "snd2chan" => Some(Self::SendToChannels),
            "rcvdata" => Some(Self::RecvData),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Ping => "ping",
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::SendToClients => "snd2cli",
            Self::SendToUsers => "snd2usr",
            Self::SendToChannels => "snd2chan",
            Self::RecvData => "rcvdata",
        }
    }
}

/// Who an addressed send goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Clients(Vec<ClientId>),
    Users(Vec<UserId>),
    Channels(Vec<String>),
}

/// An addressed send: targets plus the opaque data to deliver
#[derive(Debug, Clone, PartialEq)]
pub struct SendCommand {
    pub target: Target,
    pub data: Value,
}

/// A request resolved into its typed form
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { uid: UserId },
    Ping,
    Enter { chans: Vec<String> },
    Exit { chans: Vec<String> },
    Send(SendCommand),
}

impl Command {
    /// Resolve a request of a known kind into a typed command.
    ///
    /// `rcvdata` is server-to-client only and is rejected here.
    pub fn parse(kind: CommandKind, req: &Request) -> Result<Self, CommandError> {
        let payload = &req.data;
        match kind {
            CommandKind::Login => {
                let uid = payload
                    .get("uid")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| invalid(kind, "expected integer 'uid'"))?;
                Ok(Self::Login { uid })
            }
            CommandKind::Ping => Ok(Self::Ping),
            CommandKind::Enter => Ok(Self::Enter {
                chans: channel_list(kind, payload)?,
            }),
            CommandKind::Exit => Ok(Self::Exit {
                chans: channel_list(kind, payload)?,
            }),
            CommandKind::SendToClients => Ok(Self::Send(SendCommand {
                target: Target::Clients(lenient_list(payload.get("ids"))),
                data: send_data(payload),
            })),
            CommandKind::SendToUsers => Ok(Self::Send(SendCommand {
                target: Target::Users(lenient_list(payload.get("uids"))),
                data: send_data(payload),
            })),
            CommandKind::SendToChannels => Ok(Self::Send(SendCommand {
                target: Target::Channels(lenient_list(payload.get("chans"))),
                data: send_data(payload),
            })),
            CommandKind::RecvData => Err(CommandError::WrongCommand(req.cmd.clone())),
        }
    }
}

fn invalid(kind: CommandKind, message: &str) -> CommandError {
    CommandError::InvalidPayload {
        cmd: kind.as_str(),
        message: message.to_string(),
    }
}

fn channel_list(kind: CommandKind, payload: &Value) -> Result<Vec<String>, CommandError> {
    let chans = payload
        .get("chans")
        .ok_or_else(|| invalid(kind, "missing 'chans'"))?;
    serde_json::from_value(chans.clone())
        .map_err(|_| invalid(kind, "'chans' must be an array of strings"))
}

/// Target lists that do not parse degrade to an empty target set.
fn lenient_list<T: DeserializeOwned>(value: Option<&Value>) -> Vec<T> {
    match value {
        Some(v) => serde_json::from_value(v.clone()).unwrap_or_else(|e| {
            tracing::debug!("Ignoring malformed target list {}: {}", v, e);
            Vec::new()
        }),
        None => Vec::new(),
    }
}

fn send_data(payload: &Value) -> Value {
    payload.get("data").cloned().unwrap_or(Value::Null)
}
