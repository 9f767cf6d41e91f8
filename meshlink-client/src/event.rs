//! App-facing notifications. The supervisor hands out one receiver; every
//! engine emits through a cloned sender. Sending never blocks and a closed
//! receiver is silently tolerated so the engine keeps running without a
//! listener.

use meshlink_encoding::types::KeyPrefix;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::entity::Message;
use crate::link::ConnectionState;

#[derive(Debug, Clone)]
pub enum Event {
    ConnectionState(ConnectionState),
    /// The link's send queue went busy or idle.
    SendActivity(bool),
    MessageDelivered {
        message_id: Uuid,
        round_trip_ms: u32,
    },
    MessageFailed {
        message_id: Uuid,
    },
    DirectMessage {
        message: Message,
    },
    ChannelMessage {
        message: Message,
    },
    RoomMessage {
        message: Message,
    },
    /// An inbound message arrived from a key the store does not know.
    UnknownSender {
        prefix: KeyPrefix,
    },
    ContactDiscovered {
        contact_id: Uuid,
    },
    ContactPathUpdated {
        contact_id: Uuid,
        path_len: i8,
    },
    /// A room keep-alive reported posts the host has not drained yet.
    SessionUnsynced {
        session_id: Uuid,
        count: u8,
    },
    /// A session could not be re-authenticated after a reconnect.
    SessionDisconnected {
        session_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<Event>);

impl EventSender {
    pub fn emit(&self, event: Event) {
        let _ = self.0.send(event);
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

pub(crate) fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender(tx), rx)
}
