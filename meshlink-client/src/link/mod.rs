//! Transport over one BLE peripheral: connection lifecycle, MTU-sized
//! fragmentation, request/response correlation and push demultiplexing.
//!
//! The link owns a single outstanding command at a time; additional
//! senders queue FIFO behind an async mutex. Inbound frames whose first
//! byte has the high bit set are pushes and go to the registered push
//! handler; everything else resolves the one outstanding response slot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, OwnedMutexGuard};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use meshlink_encoding::codes;

pub mod driver;
use driver::{DisconnectCause, Driver, DriverEvent};


/// Connection lifecycle. Monotonic `Disconnected -> Connecting ->
/// Connected -> Ready` except for auto-reconnects, which fall back to
/// `Connecting` and re-enter `Connected` after re-subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Subscribed and able to carry commands; the device handshake has not
    /// completed yet.
    Connected,
    /// Handshake done; the full engine is allowed to talk.
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("not connected")]
    NotConnected,
    #[error("timed out")]
    Timeout,
    #[error("write failed: {0}")]
    WriteFailure(String),
    #[error("bluetooth unavailable")]
    BluetoothUnavailable,
    #[error("bluetooth access not authorized")]
    BluetoothUnauthorized,
    #[error("bluetooth powered off")]
    BluetoothPoweredOff,
    #[error("pairing cancelled")]
    PairingCancelled,
    #[error("pairing failed: {0}")]
    PairingFailed(String),
    #[error("characteristic not found")]
    CharacteristicNotFound,
    #[error("invalid response")]
    InvalidResponse,
}

type PushHandler = Box<dyn Fn(Vec<u8>) + Send + Sync>;
type DisconnectHandler = Box<dyn Fn(Uuid, DisconnectCause) + Send + Sync>;
type ReconnectHandler = Box<dyn Fn(Uuid) + Send + Sync>;
type ActivityHandler = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    push: Mutex<Option<PushHandler>>,
    disconnect: Mutex<Option<DisconnectHandler>>,
    reconnect: Mutex<Option<ReconnectHandler>>,
    activity: Mutex<Option<ActivityHandler>>,
}

enum Responder {
    Single(oneshot::Sender<Vec<u8>>),
    Stream(mpsc::UnboundedSender<Vec<u8>>),
}

#[derive(Default)]
struct Shared {
    device_id: Option<Uuid>,
    responder: Option<Responder>,
    needs_resubscribe: bool,
}

struct LinkInner {
    driver: Arc<dyn Driver>,
    config: Arc<Config>,
    state: watch::Sender<ConnectionState>,
    shared: Mutex<Shared>,
    send_gate: Arc<tokio::sync::Mutex<()>>,
    handlers: Handlers,
    active_sends: AtomicUsize,
    unsolicited: AtomicU64,
}

/// Handle to the transport; cheap to clone.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl Link {
    pub fn new(driver: Arc<dyn Driver>, config: Arc<Config>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let events = driver.take_events();
        let inner = Arc::new(LinkInner {
            driver,
            config,
            state,
            shared: Mutex::new(Shared::default()),
            send_gate: Arc::new(tokio::sync::Mutex::new(())),
            handlers: Handlers::default(),
            active_sends: AtomicUsize::new(0),
            unsolicited: AtomicU64::new(0),
        });
        match events {
            Some(events) => {
                tokio::spawn(demux(inner.clone(), events));
            }
            None => log::error!("driver event stream was already taken"),
        }
        Link { inner }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch-style subscription to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn connected_device_id(&self) -> Option<Uuid> {
        self.inner.shared.lock().expect("link lock").device_id
    }

    pub fn set_push_handler(&self, handler: impl Fn(Vec<u8>) + Send + Sync + 'static) {
        *self.inner.handlers.push.lock().expect("link lock") = Some(Box::new(handler));
    }

    pub fn set_disconnect_handler(
        &self,
        handler: impl Fn(Uuid, DisconnectCause) + Send + Sync + 'static,
    ) {
        *self.inner.handlers.disconnect.lock().expect("link lock") = Some(Box::new(handler));
    }

    pub fn set_reconnect_handler(&self, handler: impl Fn(Uuid) + Send + Sync + 'static) {
        *self.inner.handlers.reconnect.lock().expect("link lock") = Some(Box::new(handler));
    }

    pub fn set_send_activity_handler(&self, handler: impl Fn(bool) + Send + Sync + 'static) {
        *self.inner.handlers.activity.lock().expect("link lock") = Some(Box::new(handler));
    }

    pub async fn connect(&self, device_id: Uuid) -> Result<(), LinkError> {
        if self.state() != ConnectionState::Disconnected {
            self.disconnect().await;
        }
        self.inner.state.send_replace(ConnectionState::Connecting);
        let establish = async {
            self.inner.driver.connect(device_id).await?;
            self.inner.driver.subscribe().await
        };
        match tokio::time::timeout(self.inner.config.connect_timeout, establish).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(err);
            }
            Err(_) => {
                let _ = self.inner.driver.disconnect().await;
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(LinkError::Timeout);
            }
        }
        {
            let mut shared = self.inner.shared.lock().expect("link lock");
            shared.device_id = Some(device_id);
            shared.needs_resubscribe = false;
        }
        self.inner.state.send_replace(ConnectionState::Connected);
        Ok(())
    }

    /// Host-initiated disconnect; does not fire the disconnect handler.
    pub async fn disconnect(&self) {
        {
            let mut shared = self.inner.shared.lock().expect("link lock");
            shared.device_id = None;
            shared.responder = None;
        }
        self.inner.state.send_replace(ConnectionState::Disconnected);
        let _ = self.inner.driver.disconnect().await;
    }

    /// Marks the handshake complete. No-op unless currently `Connected`.
    pub fn mark_ready(&self) {
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Ready;
                true
            } else {
                false
            }
        });
    }

    fn ensure_connected(&self) -> Result<(), LinkError> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Ready => Ok(()),
            _ => Err(LinkError::NotConnected),
        }
    }

    /// Sends one command frame and waits for its response. `Ok(None)`
    /// means the timeout elapsed without a response; the caller decides
    /// whether that is fatal for this command. With `pairing` set,
    /// transient write failures are retried for the duration of the
    /// pairing window.
    pub async fn send(
        &self,
        frame: &[u8],
        timeout: Duration,
        pairing: bool,
    ) -> Result<Option<Vec<u8>>, LinkError> {
        self.ensure_connected()?;
        let _activity = ActivityGuard::new(self.inner.clone());
        let _gate = self.inner.send_gate.clone().lock_owned().await;
        // A disconnect may have happened while this caller was queued.
        self.ensure_connected()?;

        let (tx, rx) = oneshot::channel();
        self.inner.shared.lock().expect("link lock").responder = Some(Responder::Single(tx));

        if let Err(err) = self.write_chunks(frame, pairing).await {
            self.inner.shared.lock().expect("link lock").responder = None;
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(bytes)) => Ok(Some(bytes)),
            // The responder was dropped by a disconnect mid-wait; reads
            // like a timed-out command to the caller.
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.inner.shared.lock().expect("link lock").responder = None;
                Ok(None)
            }
        }
    }

    /// Sends one command whose reply is a sequence of response frames
    /// (contact sync). The returned stream holds the send slot until
    /// dropped, so the one-in-flight rule is preserved.
    pub async fn send_stream(&self, frame: &[u8]) -> Result<ResponseStream, LinkError> {
        self.ensure_connected()?;
        let activity = ActivityGuard::new(self.inner.clone());
        let gate = self.inner.send_gate.clone().lock_owned().await;
        self.ensure_connected()?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.shared.lock().expect("link lock").responder = Some(Responder::Stream(tx));

        if let Err(err) = self.write_chunks(frame, false).await {
            self.inner.shared.lock().expect("link lock").responder = None;
            return Err(err);
        }

        Ok(ResponseStream { rx, inner: self.inner.clone(), _gate: gate, _activity: activity })
    }

    async fn write_chunks(&self, frame: &[u8], pairing: bool) -> Result<(), LinkError> {
        let mtu = self.inner.driver.mtu().max(1);
        let pairing_deadline = Instant::now() + self.inner.config.pairing_window;
        for chunk in frame.chunks(mtu) {
            loop {
                match self.inner.driver.write(chunk).await {
                    Ok(()) => break,
                    Err(err @ (LinkError::PairingFailed(_) | LinkError::PairingCancelled)) => {
                        return Err(err)
                    }
                    Err(LinkError::WriteFailure(detail))
                        if pairing && Instant::now() < pairing_deadline =>
                    {
                        // The OS stalls writes until the user finishes the
                        // pairing dialog.
                        log::debug!("write deferred during pairing window: {detail}");
                        tokio::time::sleep(self.inner.config.pairing_retry_delay).await;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Count of response frames that arrived with no command outstanding.
    pub fn unsolicited_responses(&self) -> u64 {
        self.inner.unsolicited.load(Ordering::Relaxed)
    }
}

/// Streamed multi-frame response; see [`Link::send_stream`].
pub struct ResponseStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    inner: Arc<LinkInner>,
    _gate: OwnedMutexGuard<()>,
    _activity: ActivityGuard,
}

impl ResponseStream {
    /// The next response frame, or `None` if `timeout` elapses first.
    pub async fn next(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => Err(LinkError::NotConnected),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        let mut shared = self.inner.shared.lock().expect("link lock");
        if matches!(shared.responder, Some(Responder::Stream(_))) {
            shared.responder = None;
        }
    }
}

struct ActivityGuard {
    inner: Arc<LinkInner>,
}

impl ActivityGuard {
    fn new(inner: Arc<LinkInner>) -> Self {
        if inner.active_sends.fetch_add(1, Ordering::SeqCst) == 0 {
            inner.fire_activity(true);
        }
        ActivityGuard { inner }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        if self.inner.active_sends.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.fire_activity(false);
        }
    }
}

impl LinkInner {
    fn fire_activity(&self, busy: bool) {
        if let Some(handler) = &*self.handlers.activity.lock().expect("link lock") {
            handler(busy);
        }
    }

    fn handle_notification(&self, bytes: Vec<u8>) {
        let Some(&code) = bytes.first() else {
            log::debug!("dropping empty notification");
            return;
        };
        if codes::is_push(code) {
            match &*self.handlers.push.lock().expect("link lock") {
                Some(handler) => handler(bytes),
                None => log::debug!("push {code:#04x} with no handler registered"),
            }
            return;
        }
        let mut shared = self.shared.lock().expect("link lock");
        match &shared.responder {
            Some(Responder::Single(_)) => {
                if let Some(Responder::Single(tx)) = shared.responder.take() {
                    let _ = tx.send(bytes);
                }
            }
            Some(Responder::Stream(tx)) => {
                if tx.send(bytes).is_err() {
                    shared.responder = None;
                }
            }
            None => {
                self.unsolicited.fetch_add(1, Ordering::Relaxed);
                log::warn!("response frame {code:#04x} with no command outstanding");
            }
        }
    }

    fn handle_disconnected(&self, reconnecting: bool, cause: DisconnectCause) {
        let device_id = {
            let mut shared = self.shared.lock().expect("link lock");
            // Dropping the responder wakes the in-flight sender.
            shared.responder = None;
            let device_id = shared.device_id;
            if reconnecting {
                shared.needs_resubscribe = true;
            } else {
                shared.device_id = None;
                shared.needs_resubscribe = false;
            }
            device_id
        };
        if reconnecting {
            log::info!("link dropped, system auto-reconnect in progress");
            self.state.send_replace(ConnectionState::Connecting);
        } else {
            log::info!("link disconnected: {cause:?}");
            self.state.send_replace(ConnectionState::Disconnected);
            if let Some(id) = device_id {
                if let Some(handler) = &*self.handlers.disconnect.lock().expect("link lock") {
                    handler(id, cause);
                }
            }
        }
    }

    async fn handle_reconnected(self: &Arc<Self>) {
        let (device_id, needs_resubscribe) = {
            let shared = self.shared.lock().expect("link lock");
            (shared.device_id, shared.needs_resubscribe)
        };
        let Some(id) = device_id else {
            return;
        };
        if !needs_resubscribe {
            log::debug!("ignoring reconnect event with no drop outstanding");
            return;
        }
        if let Err(err) = self.driver.subscribe().await {
            log::warn!("re-subscription after reconnect failed: {err}");
            self.handle_disconnected(false, DisconnectCause::Other("re-subscription failed".into()));
            return;
        }
        // Let the peripheral settle before resuming traffic.
        tokio::time::sleep(self.config.resubscribe_delay).await;
        self.shared.lock().expect("link lock").needs_resubscribe = false;
        self.state.send_replace(ConnectionState::Connected);
        if let Some(handler) = &*self.handlers.reconnect.lock().expect("link lock") {
            handler(id);
        }
    }
}

async fn demux(inner: Arc<LinkInner>, mut events: mpsc::UnboundedReceiver<DriverEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            DriverEvent::Notification(bytes) => inner.handle_notification(bytes),
            DriverEvent::Disconnected { reconnecting, cause } => {
                inner.handle_disconnected(reconnecting, cause)
            }
            DriverEvent::Reconnected => inner.handle_reconnected().await,
        }
    }
}
