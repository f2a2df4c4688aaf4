//! Addressed delivery
//!
//! Resolves `snd2cli` / `snd2usr` / `snd2chan` targets through the registry
//! and enqueues a `rcvdata` response on each target's outbound queue.
//! Enqueueing never waits on a target's transport.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::socket_server::protocol::{
    ClientId, RecvData, Request, Response, SendCommand, Target, UserId,
};
use crate::socket_server::registry::SessionRegistry;
use crate::socket_server::session::Session;

/// Whether a sender receives its own message when it is in the target set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfDelivery {
    #[default]
    Exclude,
    Include,
}

pub struct Router {
    registry: Arc<SessionRegistry>,
    self_delivery: SelfDelivery,
}

impl Router {
    pub fn new(registry: Arc<SessionRegistry>, self_delivery: SelfDelivery) -> Self {
        Self {
            registry,
            self_delivery,
        }
    }

    /// Route a send and acknowledge it to the sender
    pub fn dispatch(&self, sender: &Session, req: &Request, send: &SendCommand) -> Response {
        let delivered = self.route(sender, send);
        tracing::debug!(
            "{} seq {} from {} delivered to {} session(s)",
            req.cmd,
            req.seq,
            sender.conn_id(),
            delivered
        );
        Response::ack(req)
    }

    /// Deliver to every resolved target and return the number of deliveries.
    ///
    /// Unknown targets are skipped. A sender that is not logged in has no
    /// identity to stamp on the delivery and routes nothing.
    pub fn route(&self, sender: &Session, send: &SendCommand) -> usize {
        let Some((id, uid)) = sender.identity() else {
            return 0;
        };

        match &send.target {
            Target::Clients(ids) => {
                let targets = self.registry.lookup_by_client_ids(ids);
                self.deliver(id, &targets, &recv_data(id, uid, "", &send.data))
            }
            Target::Users(uids) => {
                let targets = self.registry.lookup_by_user_ids(uids);
                self.deliver(id, &targets, &recv_data(id, uid, "", &send.data))
            }
            Target::Channels(chans) => {
                let mut seen = HashSet::new();
                chans
                    .iter()
                    .filter(|chan| seen.insert(chan.as_str()))
                    .map(|chan| {
                        let targets = self.registry.channel_members(chan);
                        self.deliver(id, &targets, &recv_data(id, uid, chan, &send.data))
                    })
                    .sum()
            }
        }
    }

    fn deliver(&self, sender_id: ClientId, targets: &[Arc<Session>], payload: &RecvData) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let rsp = Response::rcvdata(payload);
        targets
            .iter()
            .filter(|target| {
                self.self_delivery == SelfDelivery::Include || target.client_id() != Some(sender_id)
            })
            .filter(|target| target.send(rsp.clone(), false))
            .count()
    }
}

fn recv_data(id: ClientId, uid: UserId, chan: &str, data: &Value) -> RecvData {
    RecvData {
        id,
        uid,
        chan: chan.to_string(),
        data: data.clone(),
    }
}
