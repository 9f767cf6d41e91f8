//! Outbound direct-message state machine: attempt loop with flood
//! fallback, ack tracking against `SEND_CONFIRMED` pushes, and the expiry
//! reaper that bounds how long anything stays pending.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use meshlink_encoding::creator::{ChannelMsgCreator, TextMsgCreator};
use meshlink_encoding::types::{ContactKind, TextKind, MAX_FRAME_LEN, MAX_TEXT_LEN};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::contact::ContactService;
use crate::entity::{unix_time_now, ActiveDevice, Contact, Message, MessageStatus};
use crate::event::{Event, EventSender};
use crate::link::LinkError;
use crate::mux::{RequestError, RequestMux};
use crate::store::{Store, StoreError};


#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("recipient cannot receive direct messages")]
    InvalidRecipient,
    #[error("message text exceeds {MAX_TEXT_LEN} bytes")]
    MessageTooLong,
    #[error("channel not found")]
    ChannelNotFound,
    /// The radio answered `ERROR` with this reason code.
    #[error("radio rejected the command: {0:#04x}")]
    Protocol(u8),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum AckOutcome {
    Delivered { round_trip_ms: u32 },
    /// The link dropped; the table was drained and the message failed.
    Abandoned,
}

struct PendingAck {
    message_id: Uuid,
    sent_at: Instant,
    timeout: std::time::Duration,
    heard_repeats: u32,
    is_delivered: bool,
    /// Entries owned by a live retry loop; the reaper leaves their
    /// failure handling to that loop.
    retry_managed: bool,
    waiter: Option<oneshot::Sender<AckOutcome>>,
}

pub struct SendEngine {
    mux: RequestMux,
    store: Arc<dyn Store>,
    contacts: Arc<ContactService>,
    events: EventSender,
    config: Arc<Config>,
    active: Arc<ActiveDevice>,
    pending: Mutex<HashMap<u32, PendingAck>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl SendEngine {
    pub fn new(
        mux: RequestMux,
        store: Arc<dyn Store>,
        contacts: Arc<ContactService>,
        events: EventSender,
        config: Arc<Config>,
        active: Arc<ActiveDevice>,
    ) -> Self {
        SendEngine {
            mux,
            store,
            contacts,
            events,
            config,
            active,
            pending: Mutex::new(HashMap::new()),
            reaper: Mutex::new(None),
        }
    }

    /// Starts the expiry reaper. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.reaper.lock().expect("send lock");
        if slot.is_some() {
            return;
        }
        let engine = self.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(engine.config.expiry_tick).await;
                engine.sweep().await;
            }
        }));
    }

    /// Sends `text` to a chat contact with retries and flood fallback.
    ///
    /// The message row is persisted as pending before the first attempt so
    /// a UI can show it immediately, and always reaches a terminal status:
    /// delivered on a matching ack, failed on exhaustion or link loss.
    pub async fn send_with_retry(
        &self,
        contact: &Contact,
        text: &str,
    ) -> Result<Message, MessagingError> {
        if text.len() > MAX_TEXT_LEN {
            return Err(MessagingError::MessageTooLong);
        }
        if contact.kind != ContactKind::Chat {
            return Err(MessagingError::InvalidRecipient);
        }
        let identity = self.active.get().ok_or(LinkError::NotConnected)?;

        // One timestamp for every attempt keeps the message identity
        // stable across hops.
        let timestamp = unix_time_now();
        let mut message = Message::outgoing(identity.device_id, contact.id, text, timestamp);
        self.store.save_message(&message).await?;

        if !self.mux.is_ready() {
            self.fail_message(&mut message).await;
            return Err(LinkError::NotConnected.into());
        }

        let mut attempts: u8 = 0;
        let mut flood_attempts: u8 = 0;
        let mut is_flood = contact.is_flood_routed();
        let mut reset_done = false;

        while attempts < self.config.max_attempts && flood_attempts < self.config.max_flood_attempts
        {
            if attempts > 0 {
                tokio::time::sleep(self.config.attempt_backoff * u32::from(attempts)).await;
            }
            if attempts == self.config.flood_after && !is_flood && !reset_done {
                reset_done = true;
                if let Err(err) = self.contacts.reset_path(contact).await {
                    log::warn!("path reset before flood attempt failed: {err}");
                }
            }

            let mut buf = [0u8; MAX_FRAME_LEN];
            let frame = {
                let mut creator = TextMsgCreator::new(&mut buf[..])
                    .map_err(|err| MessagingError::SendFailed(err.to_string()))?;
                creator
                    .set_text_kind(TextKind::Plain)
                    .set_attempt(attempts)
                    .set_timestamp(timestamp)
                    .set_recipient(&contact.prefix());
                creator.set_text(text).map_err(|err| MessagingError::SendFailed(err.to_string()))?;
                creator.build().to_vec()
            };

            match self.mux.expect_sent(&frame).await {
                Ok(sent) => {
                    attempts += 1;
                    is_flood = sent.is_flood;
                    if is_flood {
                        flood_attempts += 1;
                    }
                    message.ack_code = Some(sent.ack_code);
                    message.attempt_count = attempts;
                    message.status = MessageStatus::Sent;
                    self.store.update_message_sent(message.id, sent.ack_code, attempts).await?;

                    let wait = self.config.ack_timeout(sent.estimated_timeout_ms);
                    let (tx, rx) = oneshot::channel();
                    self.pending.lock().expect("send lock").insert(
                        sent.ack_code,
                        PendingAck {
                            message_id: message.id,
                            sent_at: Instant::now(),
                            timeout: wait,
                            heard_repeats: 0,
                            is_delivered: false,
                            retry_managed: true,
                            waiter: Some(tx),
                        },
                    );

                    match tokio::time::timeout(wait, rx).await {
                        Ok(Ok(AckOutcome::Delivered { round_trip_ms })) => {
                            message.status = MessageStatus::Delivered;
                            message.round_trip_ms = Some(round_trip_ms);
                            return Ok(message);
                        }
                        Ok(Ok(AckOutcome::Abandoned)) | Ok(Err(_)) => {
                            // Link loss already failed the message.
                            message.status = MessageStatus::Failed;
                            return Ok(message);
                        }
                        Err(_) => {
                            self.pending.lock().expect("send lock").remove(&sent.ack_code);
                        }
                    }
                }
                Err(RequestError::Timeout) => {
                    attempts += 1;
                    if is_flood {
                        flood_attempts += 1;
                    }
                }
                Err(RequestError::Protocol(code)) => {
                    log::debug!("radio rejected attempt {attempts}: error {code:#04x}");
                    attempts += 1;
                    if is_flood {
                        flood_attempts += 1;
                    }
                }
                Err(RequestError::Link(
                    err @ (LinkError::PairingCancelled | LinkError::PairingFailed(_)),
                )) => {
                    self.fail_message(&mut message).await;
                    return Err(err.into());
                }
                Err(RequestError::Link(LinkError::NotConnected)) => {
                    self.fail_message(&mut message).await;
                    return Ok(message);
                }
                Err(RequestError::Link(err)) => {
                    log::debug!("transport error on attempt {attempts}: {err}");
                    attempts += 1;
                    if is_flood {
                        flood_attempts += 1;
                    }
                }
                Err(err) => {
                    self.fail_message(&mut message).await;
                    return Err(MessagingError::SendFailed(err.to_string()));
                }
            }
        }

        self.fail_message(&mut message).await;
        Ok(message)
    }

    /// Broadcast text on a channel. No ack tracking: status goes straight
    /// to sent on the radio's `OK`.
    pub async fn send_channel_message(
        &self,
        channel_index: u8,
        text: &str,
    ) -> Result<Message, MessagingError> {
        if text.len() > MAX_TEXT_LEN {
            return Err(MessagingError::MessageTooLong);
        }
        let identity = self.active.get().ok_or(LinkError::NotConnected)?;
        self.store
            .channel_by_index(identity.device_id, channel_index)
            .await?
            .ok_or(MessagingError::ChannelNotFound)?;

        let timestamp = unix_time_now();
        let mut message =
            Message::outgoing_channel(identity.device_id, channel_index, text, timestamp);
        self.store.save_message(&message).await?;

        if !self.mux.is_ready() {
            self.fail_message(&mut message).await;
            return Err(LinkError::NotConnected.into());
        }

        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = {
            let mut creator = ChannelMsgCreator::new(&mut buf[..])
                .map_err(|err| MessagingError::SendFailed(err.to_string()))?;
            creator.set_channel(channel_index).set_timestamp(timestamp);
            creator.set_text(text).map_err(|err| MessagingError::SendFailed(err.to_string()))?;
            creator.build().to_vec()
        };
        match self.mux.expect_ok(&frame).await {
            Ok(()) => {
                message.status = MessageStatus::Sent;
                self.store.update_message_status(message.id, MessageStatus::Sent).await?;
                Ok(message)
            }
            Err(err) => {
                self.fail_message(&mut message).await;
                match err {
                    RequestError::Protocol(code) => Err(MessagingError::Protocol(code)),
                    RequestError::Link(link) => Err(link.into()),
                    other => Err(MessagingError::SendFailed(other.to_string())),
                }
            }
        }
    }

    /// `SEND_CONFIRMED` push: resolve or count against the pending table.
    pub async fn handle_send_confirmed(&self, ack_code: u32, round_trip_ms: u32) {
        enum Action {
            First { message_id: Uuid, waiter: Option<oneshot::Sender<AckOutcome>> },
            Repeat { message_id: Uuid, heard_repeats: u32 },
        }
        let action = {
            let mut pending = self.pending.lock().expect("send lock");
            match pending.get_mut(&ack_code) {
                None => None,
                Some(entry) if !entry.is_delivered => {
                    entry.is_delivered = true;
                    entry.heard_repeats = 1;
                    Some(Action::First {
                        message_id: entry.message_id,
                        waiter: entry.waiter.take(),
                    })
                }
                Some(entry) => {
                    entry.heard_repeats += 1;
                    Some(Action::Repeat {
                        message_id: entry.message_id,
                        heard_repeats: entry.heard_repeats,
                    })
                }
            }
        };
        match action {
            None => {
                // Possibly an ack for a message from a previous process
                // lifetime; nothing to update.
                log::debug!("ack {ack_code:#010x} does not match any pending message");
            }
            Some(Action::First { message_id, waiter }) => {
                if let Err(err) = self.store.update_message_delivered(message_id, round_trip_ms).await
                {
                    log::warn!("failed to persist delivery: {err}");
                }
                self.events.emit(Event::MessageDelivered { message_id, round_trip_ms });
                if let Some(waiter) = waiter {
                    let _ = waiter.send(AckOutcome::Delivered { round_trip_ms });
                }
            }
            Some(Action::Repeat { message_id, heard_repeats }) => {
                if let Err(err) = self.store.update_heard_repeats(message_id, heard_repeats).await {
                    log::warn!("failed to persist heard repeats: {err}");
                }
            }
        }
    }

    /// Real link loss: stop the reaper, fail everything undelivered and
    /// drop the table.
    pub async fn stop_and_fail_all_pending(&self) {
        if let Some(handle) = self.reaper.lock().expect("send lock").take() {
            handle.abort();
        }
        self.fail_all_pending().await;
    }

    /// Auto-reconnect completed: the radio may have rebooted and will not
    /// acknowledge what it no longer tracks, so fail everything pending
    /// but keep the reaper running.
    pub async fn fail_all_pending(&self) {
        let drained: Vec<(u32, PendingAck)> = {
            let mut pending = self.pending.lock().expect("send lock");
            pending.drain().collect()
        };
        for (ack_code, mut entry) in drained {
            if entry.is_delivered {
                continue;
            }
            log::debug!("failing pending ack {ack_code:#010x}");
            if let Err(err) =
                self.store.update_message_status(entry.message_id, MessageStatus::Failed).await
            {
                log::warn!("failed to persist message failure: {err}");
            }
            self.events.emit(Event::MessageFailed { message_id: entry.message_id });
            if let Some(waiter) = entry.waiter.take() {
                let _ = waiter.send(AckOutcome::Abandoned);
            }
        }
    }

    /// Number of live entries in the pending-ack table.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("send lock").len()
    }

    async fn fail_message(&self, message: &mut Message) {
        message.status = MessageStatus::Failed;
        if let Err(err) = self.store.update_message_status(message.id, MessageStatus::Failed).await {
            log::warn!("failed to persist message failure: {err}");
        }
        self.events.emit(Event::MessageFailed { message_id: message.id });
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let mut failed: Vec<(Uuid, Option<oneshot::Sender<AckOutcome>>)> = Vec::new();
        {
            let mut pending = self.pending.lock().expect("send lock");
            pending.retain(|_, entry| {
                if entry.is_delivered {
                    // Linger so duplicate acks still count.
                    return now < entry.sent_at + entry.timeout + self.config.delivered_grace;
                }
                if entry.retry_managed || now < entry.sent_at + entry.timeout {
                    return true;
                }
                failed.push((entry.message_id, entry.waiter.take()));
                false
            });
        }
        for (message_id, waiter) in failed {
            if let Err(err) = self.store.update_message_status(message_id, MessageStatus::Failed).await
            {
                log::warn!("failed to persist message expiry: {err}");
            }
            self.events.emit(Event::MessageFailed { message_id });
            if let Some(waiter) = waiter {
                let _ = waiter.send(AckOutcome::Abandoned);
            }
        }
    }
}
