//! Owns and wires every component: link, mux, push routing, the three
//! engines and the ports. Components never hold each other directly;
//! cross-component reactions flow through handler closures and one bridge
//! task, so ownership stays a tree with the supervisor at the root.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::advert::AdvertHandler;
use crate::config::Config;
use crate::contact::ContactService;
use crate::control::RadioControl;
use crate::entity::{unix_time_now, ActiveDevice, Contact, Device, Identity, Message, SelfInfo};
use crate::event::{self, Event, EventReceiver};
use crate::inbox::InboxDrainer;
use crate::link::driver::Driver;
use crate::link::{Link, LinkError};
use crate::mux::{RequestError, RequestMux};
use crate::push::PushRouter;
use crate::secret::SecretStore;
use crate::send::{MessagingError, SendEngine};
use crate::session::SessionManager;
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("no previously connected device")]
    NoKnownDevice,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum LinkSignal {
    Dropped,
    Restored,
}

pub struct Supervisor {
    link: Link,
    store: Arc<dyn Store>,
    config: Arc<Config>,
    active: Arc<ActiveDevice>,
    send: Arc<SendEngine>,
    inbox: Arc<InboxDrainer>,
    sessions: Arc<SessionManager>,
    contacts: Arc<ContactService>,
    control: Arc<RadioControl>,
    router_task: JoinHandle<()>,
    bridge_task: JoinHandle<()>,
    state_task: JoinHandle<()>,
}

impl Supervisor {
    /// Builds the full engine around injected ports. Must run inside a
    /// tokio runtime; background tasks are spawned here.
    pub fn new(
        driver: Arc<dyn Driver>,
        store: Arc<dyn Store>,
        secrets: Arc<dyn SecretStore>,
        config: Config,
    ) -> (Arc<Self>, EventReceiver) {
        let config = Arc::new(config);
        let (events, event_rx) = event::channel();
        let active = Arc::new(ActiveDevice::default());

        let link = Link::new(driver, config.clone());
        let mux = RequestMux::new(link.clone(), config.clone());

        let contacts = Arc::new(ContactService::new(
            mux.clone(),
            store.clone(),
            active.clone(),
            config.clone(),
        ));
        let send = Arc::new(SendEngine::new(
            mux.clone(),
            store.clone(),
            contacts.clone(),
            events.clone(),
            config.clone(),
            active.clone(),
        ));
        let inbox = Arc::new(InboxDrainer::new(
            mux.clone(),
            store.clone(),
            events.clone(),
            active.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            mux.clone(),
            store.clone(),
            secrets,
            events.clone(),
            config.clone(),
            active.clone(),
        ));
        let adverts = Arc::new(AdvertHandler::new(
            store.clone(),
            contacts.clone(),
            events.clone(),
            active.clone(),
        ));
        let control = Arc::new(RadioControl::new(mux.clone(), config.clone()));

        // Push frames: link -> channel -> router task, in arrival order.
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        link.set_push_handler(move |bytes| {
            let _ = push_tx.send(bytes);
        });
        let router =
            Arc::new(PushRouter::new(send.clone(), inbox.clone(), sessions.clone(), adverts));
        let router_task = router.spawn(push_rx);

        // Link lifecycle: handlers only enqueue; the bridge task owns the
        // reactions so the link never holds a reference back into itself.
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        {
            let signal_tx = signal_tx.clone();
            link.set_disconnect_handler(move |device_id, cause| {
                log::info!("device {device_id} disconnected: {cause:?}");
                let _ = signal_tx.send(LinkSignal::Dropped);
            });
        }
        link.set_reconnect_handler(move |device_id| {
            log::info!("device {device_id} reconnected");
            let _ = signal_tx.send(LinkSignal::Restored);
        });
        let bridge_task = tokio::spawn(bridge(
            signal_rx,
            link.clone(),
            send.clone(),
            sessions.clone(),
            active.clone(),
        ));

        {
            let events = events.clone();
            link.set_send_activity_handler(move |busy| {
                events.emit(Event::SendActivity(busy));
            });
        }
        let state_task = {
            let mut state_rx = link.subscribe_state();
            let events = events.clone();
            tokio::spawn(async move {
                while state_rx.changed().await.is_ok() {
                    let state = *state_rx.borrow_and_update();
                    events.emit(Event::ConnectionState(state));
                }
            })
        };

        let supervisor = Arc::new(Supervisor {
            link,
            store,
            config,
            active,
            send,
            inbox,
            sessions,
            contacts,
            control,
            router_task,
            bridge_task,
            state_task,
        });
        (supervisor, event_rx)
    }

    /// Connects and runs the device handshake: `DEVICE_QUERY`, `APP_START`,
    /// persist the device row, mark the link ready. Also nudges the
    /// radio's clock when it drifted from the host.
    pub async fn connect(&self, device_id: Uuid) -> Result<SelfInfo, ConnectError> {
        self.link.connect(device_id).await?;
        match self.handshake(device_id).await {
            Ok(info) => Ok(info),
            Err(err) => {
                self.link.disconnect().await;
                Err(err)
            }
        }
    }

    async fn handshake(&self, device_id: Uuid) -> Result<SelfInfo, ConnectError> {
        let device_info = self.control.device_query().await?;
        let self_info = self.control.app_start().await?;

        let device = Device {
            id: device_id,
            name: self_info.name.clone(),
            public_key: self_info.public_key,
            model: device_info.model.clone(),
            firmware_version: device_info.firmware_version.clone(),
            firmware_build: device_info.firmware_build.clone(),
            firmware_ver_code: device_info.firmware_ver_code,
        };
        self.store.save_device(&device).await?;
        self.store.set_active_device(Some(device_id)).await?;
        self.active.set(Identity { device_id, public_key: self_info.public_key });

        self.link.mark_ready();
        self.send.start();

        match self.control.device_time().await {
            Ok(radio_time) => {
                let host_time = unix_time_now();
                if host_time.abs_diff(radio_time) > 30 {
                    log::info!("radio clock off by {}s, syncing", host_time.abs_diff(radio_time));
                    if let Err(err) = self.control.set_device_time(host_time).await {
                        log::warn!("clock sync failed: {err}");
                    }
                }
            }
            Err(err) => log::debug!("device time unavailable: {err}"),
        }

        Ok(self_info)
    }

    /// Reconnects to the device this host last talked to.
    pub async fn connect_last(&self) -> Result<SelfInfo, ConnectError> {
        let device_id = self.store.active_device().await?.ok_or(ConnectError::NoKnownDevice)?;
        self.connect(device_id).await
    }

    /// Host-initiated teardown: fail in-flight messages, close sessions,
    /// drop the link. The stored last-connected device id is kept for the
    /// next launch.
    pub async fn disconnect(&self) {
        self.send.stop_and_fail_all_pending().await;
        self.sessions.handle_disconnect().await;
        self.link.disconnect().await;
        self.active.clear();
    }

    /// Convenience wrapper: look up the contact and run the retrying send.
    pub async fn send_message(
        &self,
        contact_id: Uuid,
        text: &str,
    ) -> Result<Message, MessagingError> {
        let contact: Contact = self
            .store
            .contact_by_id(contact_id)
            .await?
            .ok_or(MessagingError::InvalidRecipient)?;
        self.send.send_with_retry(&contact, text).await
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn active_identity(&self) -> Option<Identity> {
        self.active.get()
    }

    pub fn contacts(&self) -> &Arc<ContactService> {
        &self.contacts
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn sender(&self) -> &Arc<SendEngine> {
        &self.send
    }

    pub fn inbox(&self) -> &Arc<InboxDrainer> {
        &self.inbox
    }

    pub fn control(&self) -> &Arc<RadioControl> {
        &self.control
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.router_task.abort();
        self.bridge_task.abort();
        self.state_task.abort();
    }
}

/// Reacts to link lifecycle signals. A real drop fails everything and
/// clears the identity; a completed auto-reconnect restores readiness,
/// fails what the radio no longer tracks, and re-authenticates sessions.
async fn bridge(
    mut rx: mpsc::UnboundedReceiver<LinkSignal>,
    link: Link,
    send: Arc<SendEngine>,
    sessions: Arc<SessionManager>,
    active: Arc<ActiveDevice>,
) {
    while let Some(signal) = rx.recv().await {
        match signal {
            LinkSignal::Dropped => {
                send.stop_and_fail_all_pending().await;
                sessions.handle_disconnect().await;
                active.clear();
            }
            LinkSignal::Restored => {
                link.mark_ready();
                send.fail_all_pending().await;
                sessions.handle_reconnection().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::store::Store;
    use crate::supervisor::ConnectError;
    use crate::test_util::*;

    #[tokio::test(start_paused = true)]
    async fn handshake_persists_device_and_selects_it() {
        let mut h = setup();
        h.connect_ready().await;

        let device = h.supervisor.store().device_by_id(h.device_id).await.unwrap().unwrap();
        assert_eq!(device.name, "test-node");
        assert_eq!(device.model, "heltec-v3");
        assert_eq!(device.public_key, h.self_key);
        assert_eq!(h.supervisor.store().active_device().await.unwrap(), Some(h.device_id));

        let identity = h.supervisor.active_identity().unwrap();
        assert_eq!(identity.device_id, h.device_id);
        assert_eq!(identity.public_key, h.self_key);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_keeps_last_device_for_next_launch() {
        let mut h = setup();
        h.connect_ready().await;

        h.supervisor.disconnect().await;
        assert!(h.supervisor.active_identity().is_none());
        assert_eq!(
            h.supervisor.store().active_device().await.unwrap(),
            Some(h.device_id),
            "last-connected device survives a teardown"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_last_reuses_stored_device() {
        let mut h = setup();
        h.connect_ready().await;
        h.supervisor.disconnect().await;

        let supervisor = h.supervisor.clone();
        let task = tokio::spawn(async move { supervisor.connect_last().await });

        let frame = h.handle.next_write().await;
        assert_eq!(frame[0], 0x16);
        h.handle.respond(device_info_frame());
        let frame = h.handle.next_write().await;
        assert_eq!(frame[0], 0x01);
        let self_info = self_info_frame(&h.self_key, "test-node");
        h.handle.respond(self_info);
        let frame = h.handle.next_write().await;
        assert_eq!(frame[0], 0x05);
        h.handle.respond(curr_time_frame(crate::entity::unix_time_now()));

        task.await.unwrap().unwrap();
        assert_eq!(h.supervisor.active_identity().unwrap().device_id, h.device_id);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_last_without_history_fails() {
        let h = setup();
        let err = h.supervisor.connect_last().await.unwrap_err();
        assert!(matches!(err, ConnectError::NoKnownDevice));
    }
}
