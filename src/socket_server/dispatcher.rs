//! Frame dispatch
//!
//! Decodes an inbound frame into a batch and runs each command against the
//! session in array order. Responses go onto the session's own outbound
//! queue; a per-command error is reported in that command's response and
//! the rest of the batch still runs.
//!
//! Each command is checked in a fixed order, and the first failing check
//! decides the code: an unknown `cmd` is -21 (even before login), a
//! client-sent `rcvdata` is -22, any other command before login is -11, and
//! a payload of the wrong shape is -23.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::PushConfig;
use crate::error::{CommandError, DecodeError};
use crate::socket_server::protocol::{decode_batch, Command, CommandKind, Request, Response};
use crate::socket_server::registry::SessionRegistry;
use crate::socket_server::router::Router;
use crate::socket_server::session::{CloseReason, Session};
use crate::socket_server::supervisor::{LivenessPolicy, Supervisor};

/// Shared per-server state handed to every connection
pub struct Dispatcher {
    config: PushConfig,
    registry: Arc<SessionRegistry>,
    router: Router,
    supervisor: Supervisor,
}

impl Dispatcher {
    pub fn new(config: PushConfig) -> Self {
        let registry = Arc::new(SessionRegistry::with_first_id(config.routing.first_client_id));
        let router = Router::new(Arc::clone(&registry), config.routing.self_delivery);
        let supervisor = Supervisor::new(LivenessPolicy::from_config(&config.liveness));
        Self {
            config,
            registry,
            router,
            supervisor,
        }
    }

    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.config.server.send_timeout_ms)
    }

    /// Decode a frame and process every command in it.
    ///
    /// Returns the number of commands processed. A frame that does not
    /// decode is rejected whole.
    pub fn handle_frame(&self, session: &Arc<Session>, frame: &[u8]) -> Result<usize, DecodeError> {
        let batch: Vec<Request> = decode_batch(frame)?;
        for req in &batch {
            tracing::debug!("{} received {} seq {}", session.conn_id(), req.cmd, req.seq);
            let rsp = self.handle_request(session, req);
            if !session.send(rsp, req.immed) {
                tracing::debug!("{} writer gone, dropping response", session.conn_id());
            }
        }
        Ok(batch.len())
    }

    /// Run one command and build its response
    pub fn handle_request(&self, session: &Arc<Session>, req: &Request) -> Response {
        match self.execute(session, req) {
            Ok(rsp) => rsp,
            Err(e) => {
                tracing::debug!("{} {} seq {} rejected: {}", session.conn_id(), req.cmd, req.seq, e);
                Response::error(req, &e)
            }
        }
    }

    fn execute(&self, session: &Arc<Session>, req: &Request) -> Result<Response, CommandError> {
        let kind = CommandKind::parse(&req.cmd)
            .ok_or_else(|| CommandError::UnsupportedCommand(req.cmd.clone()))?;
        if kind == CommandKind::RecvData {
            return Err(CommandError::WrongCommand(req.cmd.clone()));
        }
        if kind != CommandKind::Login && !session.is_active() {
            return Err(CommandError::NotLoggedIn);
        }

        match Command::parse(kind, req)? {
            Command::Login { uid } => {
                let id = self.registry.register_client(session, uid)?;
                Ok(Response::ack_with(req, json!({ "id": id })))
            }
            Command::Ping => Ok(Response::ack(req)),
            Command::Enter { chans } => {
                for chan in &chans {
                    self.registry.join_channel(session, chan);
                }
                Ok(Response::ack(req))
            }
            Command::Exit { chans } => {
                for chan in &chans {
                    self.registry.leave_channel(session, chan);
                }
                Ok(Response::ack(req))
            }
            Command::Send(send) => Ok(self.router.dispatch(session, req, &send)),
        }
    }

    /// Close a session: purge it from every index, then release the writer.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn close_session(&self, session: &Session, reason: CloseReason) {
        if !session.begin_close() {
            return;
        }
        self.registry.remove(session);
        session.finish_close();

        match session.client_id() {
            Some(id) => tracing::info!("Client {} ({}) closed: {}", id, session.conn_id(), reason),
            None => tracing::info!("Connection {} closed before login: {}", session.conn_id(), reason),
        }
    }
}
