//! Drains the radio's inbound queue when a `MESSAGES_WAITING` push
//! arrives. One drain loop runs at a time; pushes landing mid-drain bump
//! a counter and are absorbed by another pass. Malformed frames are
//! skipped without aborting the drain.

use std::sync::{Arc, Mutex};

use meshlink_encoding::creator;
use meshlink_encoding::parser::{ChannelMsgV3, ContactMsgV3, Response};
use meshlink_encoding::types::{TextKind, MAX_FRAME_LEN};

use crate::entity::{ActiveDevice, Identity, Message, RoomMessageKey, SessionRole};
use crate::event::{Event, EventSender};
use crate::mux::{RequestError, RequestMux};
use crate::store::{Store, StoreError};

#[cfg(test)]
mod test;

#[derive(Debug, thiserror::Error)]
enum InboxError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("codec: {0}")]
    Codec(#[from] meshlink_encoding::Error),
}

#[derive(Default)]
struct DrainState {
    waiting: u32,
    running: bool,
}

pub struct InboxDrainer {
    mux: RequestMux,
    store: Arc<dyn Store>,
    events: EventSender,
    active: Arc<ActiveDevice>,
    state: Mutex<DrainState>,
}

impl InboxDrainer {
    pub fn new(
        mux: RequestMux,
        store: Arc<dyn Store>,
        events: EventSender,
        active: Arc<ActiveDevice>,
    ) -> Self {
        InboxDrainer { mux, store, events, active, state: Mutex::new(DrainState::default()) }
    }

    /// `MESSAGES_WAITING` push: bump the counter and start a drain unless
    /// one is already running.
    pub fn notify_waiting(self: &Arc<Self>) {
        let start = {
            let mut state = self.state.lock().expect("inbox lock");
            state.waiting += 1;
            if state.running {
                false
            } else {
                state.running = true;
                true
            }
        };
        if start {
            let drainer = self.clone();
            tokio::spawn(async move {
                drainer.drain().await;
            });
        }
    }

    async fn drain(&self) {
        loop {
            self.state.lock().expect("inbox lock").waiting = 0;
            self.drain_pass().await;
            let done = {
                let mut state = self.state.lock().expect("inbox lock");
                if state.waiting > 0 {
                    false
                } else {
                    state.running = false;
                    true
                }
            };
            if done {
                return;
            }
        }
    }

    /// One pass: `SYNC_NEXT_MESSAGE` until `NO_MORE_MESSAGES`.
    async fn drain_pass(&self) {
        let Some(identity) = self.active.get() else {
            return;
        };
        loop {
            let mut buf = [0u8; MAX_FRAME_LEN];
            let frame = match creator::sync_next_message(&mut buf) {
                Ok(frame) => frame,
                Err(err) => {
                    log::error!("could not encode sync request: {err}");
                    return;
                }
            };
            match self.mux.request(frame).await {
                Ok(Response::NoMoreMessages) => return,
                Ok(Response::ContactMsgV3(msg)) => {
                    if let Err(err) = self.handle_direct(&identity, &msg).await {
                        log::warn!("skipping inbound direct message: {err}");
                    }
                }
                Ok(Response::ChannelMsgV3(msg)) => {
                    if let Err(err) = self.handle_channel(&identity, &msg).await {
                        log::warn!("skipping inbound channel message: {err}");
                    }
                }
                Ok(Response::LegacyMessage(_)) => {
                    log::debug!("ignoring pre-v3 message frame");
                }
                Ok(_) => log::debug!("ignoring unexpected frame in drain"),
                Err(RequestError::Timeout) => {
                    log::warn!("inbox drain timed out, giving up this pass");
                    return;
                }
                Err(err) => {
                    log::warn!("inbox drain aborted: {err}");
                    return;
                }
            }
        }
    }

    async fn handle_direct<T: AsRef<[u8]>>(
        &self,
        identity: &Identity,
        msg: &ContactMsgV3<T>,
    ) -> Result<(), InboxError> {
        let prefix = msg.sender_prefix();
        let Some(contact) = self.store.contact_by_prefix(identity.device_id, &prefix).await?
        else {
            self.events.emit(Event::UnknownSender { prefix });
            return Ok(());
        };
        let kind = msg.text_kind()?;

        if kind == TextKind::SignedPlain {
            let session = self.store.session_by_prefix(identity.device_id, &prefix).await?;
            if session.as_ref().map(|s| s.role) == Some(SessionRole::Room) {
                return self.handle_room_post(identity, contact.id, msg).await;
            }
        }

        let text = msg.text()?;
        let mut message = Message::incoming(identity.device_id, contact.id, text, msg.timestamp());
        message.text_kind = kind;
        message.snr_raw = Some(msg.snr_raw());
        message.path_len = Some(msg.path_len());
        message.sender_prefix = Some(prefix);
        self.store.save_message(&message).await?;
        self.store.bump_contact_unread(contact.id, msg.timestamp()).await?;
        self.events.emit(Event::DirectMessage { message });
        Ok(())
    }

    /// Room posts are relayed by the server with the original author's
    /// 4-byte prefix embedded; the same post can arrive through several
    /// paths and is stored at most once per `(ts, author, text)`.
    async fn handle_room_post<T: AsRef<[u8]>>(
        &self,
        identity: &Identity,
        room_contact_id: uuid::Uuid,
        msg: &ContactMsgV3<T>,
    ) -> Result<(), InboxError> {
        let author = msg.signed_author()?;
        let text = msg.signed_text()?;
        let key =
            RoomMessageKey { timestamp: msg.timestamp(), author, text: text.to_owned() };
        if self.store.room_message_seen(identity.device_id, &key).await? {
            return Ok(());
        }
        self.store.record_room_message(identity.device_id, &key).await?;

        let author_name = self
            .store
            .contact_by_author_prefix(identity.device_id, &author)
            .await?
            .map(|contact| contact.display_name().to_owned())
            .unwrap_or_else(|| author.to_string());

        let mut message =
            Message::incoming(identity.device_id, room_contact_id, text, msg.timestamp());
        message.text_kind = TextKind::SignedPlain;
        message.snr_raw = Some(msg.snr_raw());
        message.path_len = Some(msg.path_len());
        message.sender_prefix = Some(msg.sender_prefix());
        message.author = Some(author_name);
        message.is_from_self = author.matches(&identity.public_key);
        self.store.save_message(&message).await?;
        self.store.bump_contact_unread(room_contact_id, msg.timestamp()).await?;
        self.events.emit(Event::RoomMessage { message });
        Ok(())
    }

    async fn handle_channel<T: AsRef<[u8]>>(
        &self,
        identity: &Identity,
        msg: &ChannelMsgV3<T>,
    ) -> Result<(), InboxError> {
        let Some(channel) =
            self.store.channel_by_index(identity.device_id, msg.channel_index()).await?
        else {
            log::debug!("channel message for unknown channel {}", msg.channel_index());
            return Ok(());
        };
        let text = msg.text()?;
        let mut message =
            Message::incoming_channel(identity.device_id, channel.index, text, msg.timestamp());
        message.text_kind = msg.text_kind()?;
        message.snr_raw = Some(msg.snr_raw());
        message.path_len = Some(msg.path_len());
        self.store.save_message(&message).await?;
        self.store.bump_channel_unread(channel.id).await?;
        self.events.emit(Event::ChannelMessage { message });
        Ok(())
    }
}
