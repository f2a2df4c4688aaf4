//! tpush socket server
//!
//! A push service over WebSocket: clients log in, join channels, and send
//! data addressed to connections, users, or channels.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       TPUSH SOCKET SERVER (tpush-daemon)                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               SessionRegistry (Arc, one RwLock)                  │   │
//! │  │                                                                  │   │
//! │  │  clients:  client_id ──► Session                                 │   │
//! │  │  users:    user_id   ──► {client_id, ...}                        │   │
//! │  │  channels: name      ──► {client_id, ...}                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Per connection:                                                        │
//! │    read loop ──► Dispatcher ──► Session / Registry / Router             │
//! │       │                                  │                              │
//! │       └── Supervisor deadlines           └──► target outbound queues    │
//! │    writer task ◄── own outbound queue (coalesced into batch frames)     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! Every frame is a JSON array of commands:
//!
//! ```json
//! // Client -> Server
//! [{"cmd": "login", "seq": 1, "immed": true, "data": {"uid": 1000}}]
//! [{"cmd": "enter", "seq": 2, "data": {"chans": ["lobby"]}}]
//! [{"cmd": "snd2chan", "seq": 3, "data": {"chans": ["lobby"], "data": "hi"}}]
//!
//! // Server -> Client
//! [{"cmd": "login", "seq": 1, "code": 0, "data": {"id": 5001}}]
//! [{"cmd": "rcvdata", "seq": 0, "code": 0, "data": {"id": 5001, "uid": 1000, "chan": "lobby", "data": "hi"}}]
//! ```

pub mod connection;
pub mod dispatcher;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
pub mod supervisor;

pub use connection::{accept_websocket, handle_connection, serve};
pub use dispatcher::Dispatcher;
pub use protocol::{
    decode_batch, encode_batch, ClientId, Command, CommandKind, RecvData, Request, Response,
    SendCommand, Target, UserId,
};
pub use registry::{RegistryStats, SessionRegistry};
pub use router::{Router, SelfDelivery};
pub use session::{CloseReason, Session, SessionState};
pub use supervisor::{LivenessPolicy, Supervisor, Verdict};
