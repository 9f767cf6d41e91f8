//! Single dispatch point for push notifications. One task drains the
//! channel fed by the link's push handler and hands each frame to its
//! feature handler in arrival order, so handlers that mutate shared
//! state (the ack table, the login table) never race each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meshlink_encoding::parser::{parse_push, Push};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::advert::AdvertHandler;
use crate::inbox::InboxDrainer;
use crate::send::SendEngine;
use crate::session::SessionManager;

pub struct PushRouter {
    send: Arc<SendEngine>,
    inbox: Arc<InboxDrainer>,
    sessions: Arc<SessionManager>,
    adverts: Arc<AdvertHandler>,
    unknown: AtomicU64,
}

impl PushRouter {
    pub fn new(
        send: Arc<SendEngine>,
        inbox: Arc<InboxDrainer>,
        sessions: Arc<SessionManager>,
        adverts: Arc<AdvertHandler>,
    ) -> Self {
        PushRouter { send, inbox, sessions, adverts, unknown: AtomicU64::new(0) }
    }

    pub fn spawn(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                self.route(bytes).await;
            }
        })
    }

    /// Count of push frames dropped for carrying an unknown code.
    pub fn unknown_pushes(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }

    async fn route(&self, bytes: Vec<u8>) {
        match parse_push(bytes) {
            Ok(Push::MessagesWaiting) => self.inbox.notify_waiting(),
            Ok(Push::SendConfirmed(ack)) => {
                self.send.handle_send_confirmed(ack.ack_code(), ack.round_trip_ms()).await
            }
            Ok(Push::Advert(advert)) => {
                self.adverts.handle_advert(advert.prefix(), advert.timestamp()).await
            }
            Ok(Push::PathUpdated(update)) => {
                self.adverts.handle_path_updated(update.prefix(), update.new_path_len()).await
            }
            Ok(Push::NewAdvert(contact)) => self.adverts.handle_new_advert(&contact).await,
            Ok(Push::LoginResult(result)) => {
                self.sessions
                    .handle_login_result(result.prefix(), result.is_success(), result.acl())
                    .await
            }
            Ok(Push::BinaryResponse(resp)) => {
                self.sessions.handle_binary_response(resp.tag(), resp.payload()).await
            }
            Err(err) => {
                self.unknown.fetch_add(1, Ordering::Relaxed);
                log::debug!("dropping push frame: {err}");
            }
        }
    }
}
