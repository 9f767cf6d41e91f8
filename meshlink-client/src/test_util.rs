//! Shared test fixtures: a scripted fake driver, in-memory store and
//! secret fakes, and builders for the radio-side frames the engine
//! consumes. Tests run under a paused tokio clock, so every backoff and
//! expiry fires deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meshlink_encoding::types::{AuthorPrefix, ContactKind, KeyPrefix, PublicKey};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::entity::{
    unix_time_now, Channel, Contact, Device, Message, MessageStatus, PermissionLevel,
    RemoteNodeSession, RoomMessageKey, SessionRole,
};
use crate::event::EventReceiver;
use crate::link::driver::{DisconnectCause, Driver, DriverEvent};
use crate::link::LinkError;
use crate::secret::{SecretError, SecretStore};
use crate::store::{Store, StoreError, StoreResult};
use crate::supervisor::Supervisor;

// --- fake driver -----------------------------------------------------------

pub struct FakeDriver {
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<DriverEvent>>>,
    writes_tx: mpsc::UnboundedSender<Vec<u8>>,
    write_errors: Mutex<VecDeque<LinkError>>,
    subscribes: AtomicUsize,
    mtu: usize,
}

/// Test-side channel to the fake driver: inspect writes, inject frames and
/// lifecycle events.
pub struct DriverHandle {
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    writes_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    driver: Arc<FakeDriver>,
}

impl FakeDriver {
    pub fn new(mtu: usize) -> (DriverHandle, Arc<FakeDriver>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let driver = Arc::new(FakeDriver {
            events_rx: Mutex::new(Some(events_rx)),
            writes_tx,
            write_errors: Mutex::new(VecDeque::new()),
            subscribes: AtomicUsize::new(0),
            mtu,
        });
        (DriverHandle { events_tx, writes_rx, driver: driver.clone() }, driver)
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn connect(&self, _device_id: Uuid) -> Result<(), LinkError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn subscribe(&self) -> Result<(), LinkError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, chunk: &[u8]) -> Result<(), LinkError> {
        if let Some(err) = self.write_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let _ = self.writes_tx.send(chunk.to_vec());
        Ok(())
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<DriverEvent>> {
        self.events_rx.lock().unwrap().take()
    }
}

impl DriverHandle {
    /// Next write issued by the link. With a large test MTU each write is
    /// one whole frame; fragmentation tests shrink the MTU and see chunks.
    pub async fn next_write(&mut self) -> Vec<u8> {
        self.writes_rx.recv().await.expect("driver write channel closed")
    }

    pub fn try_next_write(&mut self) -> Option<Vec<u8>> {
        self.writes_rx.try_recv().ok()
    }

    /// Injects a response frame.
    pub fn respond(&self, bytes: Vec<u8>) {
        let _ = self.events_tx.send(DriverEvent::Notification(bytes));
    }

    /// Injects a push frame.
    pub fn push(&self, bytes: Vec<u8>) {
        let _ = self.events_tx.send(DriverEvent::Notification(bytes));
    }

    pub fn drop_link(&self, reconnecting: bool) {
        let _ = self.events_tx.send(DriverEvent::Disconnected {
            reconnecting,
            cause: DisconnectCause::LinkLost,
        });
    }

    pub fn reconnected(&self) {
        let _ = self.events_tx.send(DriverEvent::Reconnected);
    }

    pub fn queue_write_error(&self, err: LinkError) {
        self.driver.write_errors.lock().unwrap().push_back(err);
    }

    pub fn subscribe_count(&self) -> usize {
        self.driver.subscribes.load(Ordering::SeqCst)
    }
}

// --- in-memory ports -------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    devices: HashMap<Uuid, Device>,
    active: Option<Uuid>,
    contacts: HashMap<Uuid, Contact>,
    messages: HashMap<Uuid, Message>,
    channels: HashMap<Uuid, Channel>,
    sessions: HashMap<Uuid, RemoteNodeSession>,
    room_keys: HashSet<(Uuid, RoomMessageKey)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryStore::default())
    }

    pub fn message(&self, id: Uuid) -> Option<Message> {
        self.inner.lock().unwrap().messages.get(&id).cloned()
    }

    pub fn contact(&self, id: Uuid) -> Option<Contact> {
        self.inner.lock().unwrap().contacts.get(&id).cloned()
    }

    pub fn session(&self, id: Uuid) -> Option<RemoteNodeSession> {
        self.inner.lock().unwrap().sessions.get(&id).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    /// Synchronous view of a contact's messages, oldest first.
    pub fn messages_for_contact_sync(&self, contact_id: Uuid) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .inner
            .lock()
            .unwrap()
            .messages
            .values()
            .filter(|m| m.contact_id == Some(contact_id))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    pub fn channel_unread(&self, id: Uuid) -> u32 {
        self.inner.lock().unwrap().channels.get(&id).map(|c| c.unread_count).unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_device(&self, device: &Device) -> StoreResult<()> {
        self.inner.lock().unwrap().devices.insert(device.id, device.clone());
        Ok(())
    }

    async fn device_by_id(&self, id: Uuid) -> StoreResult<Option<Device>> {
        Ok(self.inner.lock().unwrap().devices.get(&id).cloned())
    }

    async fn set_active_device(&self, id: Option<Uuid>) -> StoreResult<()> {
        self.inner.lock().unwrap().active = id;
        Ok(())
    }

    async fn active_device(&self) -> StoreResult<Option<Uuid>> {
        Ok(self.inner.lock().unwrap().active)
    }

    async fn save_contact(&self, contact: &Contact) -> StoreResult<()> {
        self.inner.lock().unwrap().contacts.insert(contact.id, contact.clone());
        Ok(())
    }

    async fn delete_contact(&self, id: Uuid) -> StoreResult<()> {
        self.inner.lock().unwrap().contacts.remove(&id);
        Ok(())
    }

    async fn contact_by_id(&self, id: Uuid) -> StoreResult<Option<Contact>> {
        Ok(self.inner.lock().unwrap().contacts.get(&id).cloned())
    }

    async fn contact_by_key(
        &self,
        device_id: Uuid,
        key: &PublicKey,
    ) -> StoreResult<Option<Contact>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .contacts
            .values()
            .find(|c| c.device_id == device_id && c.public_key == *key)
            .cloned())
    }

    async fn contact_by_prefix(
        &self,
        device_id: Uuid,
        prefix: &KeyPrefix,
    ) -> StoreResult<Option<Contact>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .contacts
            .values()
            .find(|c| c.device_id == device_id && prefix.matches(&c.public_key))
            .cloned())
    }

    async fn contact_by_author_prefix(
        &self,
        device_id: Uuid,
        prefix: &AuthorPrefix,
    ) -> StoreResult<Option<Contact>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .contacts
            .values()
            .find(|c| c.device_id == device_id && prefix.matches(&c.public_key))
            .cloned())
    }

    async fn contacts(&self, device_id: Uuid) -> StoreResult<Vec<Contact>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .contacts
            .values()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn bump_contact_unread(&self, id: Uuid, last_message_at: u32) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let contact = inner.contacts.get_mut(&id).ok_or(StoreError("no such contact".into()))?;
        contact.unread_count += 1;
        contact.last_message_at = Some(last_message_at);
        Ok(())
    }

    async fn clear_contact_unread(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let contact = inner.contacts.get_mut(&id).ok_or(StoreError("no such contact".into()))?;
        contact.unread_count = 0;
        Ok(())
    }

    async fn save_message(&self, message: &Message) -> StoreResult<()> {
        self.inner.lock().unwrap().messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn message_by_id(&self, id: Uuid) -> StoreResult<Option<Message>> {
        Ok(self.inner.lock().unwrap().messages.get(&id).cloned())
    }

    async fn message_by_ack(&self, device_id: Uuid, ack_code: u32) -> StoreResult<Option<Message>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .messages
            .values()
            .find(|m| m.device_id == device_id && m.ack_code == Some(ack_code))
            .cloned())
    }

    async fn messages_for_contact(
        &self,
        contact_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .inner
            .lock()
            .unwrap()
            .messages
            .values()
            .filter(|m| m.contact_id == Some(contact_id))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages.into_iter().skip(offset).take(limit).collect())
    }

    async fn messages_for_channel(
        &self,
        device_id: Uuid,
        channel_index: u8,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .inner
            .lock()
            .unwrap()
            .messages
            .values()
            .filter(|m| m.device_id == device_id && m.channel_index == Some(channel_index))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages.into_iter().skip(offset).take(limit).collect())
    }

    async fn update_message_status(&self, id: Uuid, status: MessageStatus) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner.messages.get_mut(&id).ok_or(StoreError("no such message".into()))?;
        message.status = status;
        Ok(())
    }

    async fn update_message_sent(
        &self,
        id: Uuid,
        ack_code: u32,
        attempt_count: u8,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner.messages.get_mut(&id).ok_or(StoreError("no such message".into()))?;
        message.status = MessageStatus::Sent;
        message.ack_code = Some(ack_code);
        message.attempt_count = attempt_count;
        Ok(())
    }

    async fn update_message_delivered(&self, id: Uuid, round_trip_ms: u32) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner.messages.get_mut(&id).ok_or(StoreError("no such message".into()))?;
        message.status = MessageStatus::Delivered;
        message.round_trip_ms = Some(round_trip_ms);
        Ok(())
    }

    async fn update_heard_repeats(&self, id: Uuid, heard_repeats: u32) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let message = inner.messages.get_mut(&id).ok_or(StoreError("no such message".into()))?;
        message.heard_repeats = heard_repeats;
        Ok(())
    }

    async fn save_channel(&self, channel: &Channel) -> StoreResult<()> {
        self.inner.lock().unwrap().channels.insert(channel.id, channel.clone());
        Ok(())
    }

    async fn delete_channel(&self, id: Uuid) -> StoreResult<()> {
        self.inner.lock().unwrap().channels.remove(&id);
        Ok(())
    }

    async fn channel_by_index(&self, device_id: Uuid, index: u8) -> StoreResult<Option<Channel>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .channels
            .values()
            .find(|c| c.device_id == device_id && c.index == index)
            .cloned())
    }

    async fn channels(&self, device_id: Uuid) -> StoreResult<Vec<Channel>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .channels
            .values()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn bump_channel_unread(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let channel = inner.channels.get_mut(&id).ok_or(StoreError("no such channel".into()))?;
        channel.unread_count += 1;
        Ok(())
    }

    async fn clear_channel_unread(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let channel = inner.channels.get_mut(&id).ok_or(StoreError("no such channel".into()))?;
        channel.unread_count = 0;
        Ok(())
    }

    async fn save_session(&self, session: &RemoteNodeSession) -> StoreResult<()> {
        self.inner.lock().unwrap().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<()> {
        self.inner.lock().unwrap().sessions.remove(&id);
        Ok(())
    }

    async fn session_by_id(&self, id: Uuid) -> StoreResult<Option<RemoteNodeSession>> {
        Ok(self.inner.lock().unwrap().sessions.get(&id).cloned())
    }

    async fn session_by_prefix(
        &self,
        device_id: Uuid,
        prefix: &KeyPrefix,
    ) -> StoreResult<Option<RemoteNodeSession>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .find(|s| s.device_id == device_id && prefix.matches(&s.public_key))
            .cloned())
    }

    async fn sessions(&self, device_id: Uuid) -> StoreResult<Vec<RemoteNodeSession>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .filter(|s| s.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn update_session_connected(&self, id: Uuid, connected: bool) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.sessions.get_mut(&id).ok_or(StoreError("no such session".into()))?;
        session.is_connected = connected;
        Ok(())
    }

    async fn update_session_permission(
        &self,
        id: Uuid,
        permission: PermissionLevel,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.sessions.get_mut(&id).ok_or(StoreError("no such session".into()))?;
        session.permission = permission;
        Ok(())
    }

    async fn room_message_seen(&self, device_id: Uuid, key: &RoomMessageKey) -> StoreResult<bool> {
        Ok(self.inner.lock().unwrap().room_keys.contains(&(device_id, key.clone())))
    }

    async fn record_room_message(&self, device_id: Uuid, key: &RoomMessageKey) -> StoreResult<()> {
        self.inner.lock().unwrap().room_keys.insert((device_id, key.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySecrets {
    inner: Mutex<HashMap<String, String>>,
}

impl MemorySecrets {
    pub fn new() -> Arc<Self> {
        Arc::new(MemorySecrets::default())
    }
}

#[async_trait]
impl SecretStore for MemorySecrets {
    async fn store_password(&self, key: &str, secret: &str) -> Result<(), SecretError> {
        self.inner.lock().unwrap().insert(key.to_owned(), secret.to_owned());
        Ok(())
    }

    async fn retrieve_password(&self, key: &str) -> Result<Option<String>, SecretError> {
        Ok(self.inner.lock().unwrap().get(key).cloned())
    }

    async fn delete_password(&self, key: &str) -> Result<(), SecretError> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }
}

// --- frame builders (radio side) -------------------------------------------

pub fn ok_frame() -> Vec<u8> {
    vec![0x00]
}

pub fn err_frame(code: u8) -> Vec<u8> {
    vec![0x01, code]
}

pub fn sent_frame(ack_code: u32, is_flood: bool, estimated_timeout_ms: u32) -> Vec<u8> {
    let mut frame = vec![0x06, is_flood as u8];
    frame.extend_from_slice(&ack_code.to_le_bytes());
    frame.extend_from_slice(&estimated_timeout_ms.to_le_bytes());
    frame
}

pub fn no_more_messages_frame() -> Vec<u8> {
    vec![0x0A]
}

pub fn curr_time_frame(epoch: u32) -> Vec<u8> {
    let mut frame = vec![0x09];
    frame.extend_from_slice(&epoch.to_le_bytes());
    frame
}

pub fn device_info_frame() -> Vec<u8> {
    let mut frame = vec![0x0D, 3, 100, 8];
    frame.extend_from_slice(&0u16.to_le_bytes());
    let mut build = [0u8; 12];
    build[..6].copy_from_slice(b"feb-24");
    frame.extend_from_slice(&build);
    let mut model = [0u8; 20];
    model[..9].copy_from_slice(b"heltec-v3");
    frame.extend_from_slice(&model);
    let mut version = [0u8; 12];
    version[..5].copy_from_slice(b"1.8.2");
    frame.extend_from_slice(&version);
    frame
}

pub fn self_info_frame(public_key: &PublicKey, name: &str) -> Vec<u8> {
    let mut frame = vec![0x05, 1, 17, 22];
    frame.extend_from_slice(public_key.as_ref());
    frame.extend_from_slice(&0i32.to_le_bytes());
    frame.extend_from_slice(&0i32.to_le_bytes());
    frame.extend_from_slice(&[0; 4]);
    frame.extend_from_slice(&869_525u32.to_le_bytes());
    frame.extend_from_slice(&250_000u32.to_le_bytes());
    frame.push(11);
    frame.push(5);
    frame.extend_from_slice(name.as_bytes());
    frame
}

pub fn contacts_start_frame(count: u32) -> Vec<u8> {
    let mut frame = vec![0x02];
    frame.extend_from_slice(&count.to_le_bytes());
    frame
}

pub fn end_of_contacts_frame(last_modified: u32) -> Vec<u8> {
    let mut frame = vec![0x04];
    frame.extend_from_slice(&last_modified.to_le_bytes());
    frame
}

/// Contact body behind a leading code byte; used for both `CONTACT`
/// responses (0x03) and `NEW_ADVERT` pushes (0x8A).
pub fn contact_frame(
    code: u8,
    public_key: &PublicKey,
    kind: ContactKind,
    out_path_len: i8,
    name: &str,
) -> Vec<u8> {
    let mut frame = vec![code];
    frame.extend_from_slice(public_key.as_ref());
    frame.push(kind as u8);
    frame.push(0); // flags
    frame.push(out_path_len as u8);
    frame.extend_from_slice(&[0u8; 63]);
    let mut padded = [0u8; 32];
    padded[..name.len()].copy_from_slice(name.as_bytes());
    frame.extend_from_slice(&padded);
    frame.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    frame.extend_from_slice(&0i32.to_le_bytes());
    frame.extend_from_slice(&0i32.to_le_bytes());
    frame.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    frame
}

pub fn messages_waiting_push() -> Vec<u8> {
    vec![0x83]
}

pub fn advert_push(prefix: &KeyPrefix, timestamp: u32) -> Vec<u8> {
    let mut frame = vec![0x80];
    frame.extend_from_slice(prefix.as_ref());
    frame.extend_from_slice(&timestamp.to_le_bytes());
    frame
}

pub fn path_updated_push(prefix: &KeyPrefix, new_path_len: i8) -> Vec<u8> {
    let mut frame = vec![0x81];
    frame.extend_from_slice(prefix.as_ref());
    frame.push(new_path_len as u8);
    frame
}

pub fn send_confirmed_push(ack_code: u32, round_trip_ms: u32) -> Vec<u8> {
    let mut frame = vec![0x84];
    frame.extend_from_slice(&ack_code.to_le_bytes());
    frame.extend_from_slice(&round_trip_ms.to_le_bytes());
    frame
}

pub fn login_result_push(prefix: &KeyPrefix, success: bool, acl: Option<u8>) -> Vec<u8> {
    let mut frame = vec![0x85];
    frame.extend_from_slice(prefix.as_ref());
    frame.push(success as u8);
    if let Some(acl) = acl {
        frame.push(acl);
    }
    frame
}

pub fn binary_response_push(tag: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x8B];
    frame.extend_from_slice(&tag.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn contact_msg_v3_frame(
    sender: &KeyPrefix,
    text_kind: u8,
    timestamp: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = vec![0x10, 8, 0, 0];
    frame.extend_from_slice(sender.as_ref());
    frame.push(1); // path_len
    frame.push(text_kind);
    frame.extend_from_slice(&timestamp.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn channel_msg_v3_frame(channel: u8, timestamp: u32, text: &str) -> Vec<u8> {
    let mut frame = vec![0x11, 8, 0, 0];
    frame.push(channel);
    frame.push(0); // path_len
    frame.push(0); // plain
    frame.extend_from_slice(&timestamp.to_le_bytes());
    frame.extend_from_slice(text.as_bytes());
    frame
}

// --- harness ---------------------------------------------------------------

pub struct TestHarness {
    pub supervisor: Arc<Supervisor>,
    pub handle: DriverHandle,
    pub store: Arc<MemoryStore>,
    pub secrets: Arc<MemorySecrets>,
    pub events: EventReceiver,
    pub device_id: Uuid,
    pub self_key: PublicKey,
}

/// Engine with a large-MTU fake driver, not yet connected.
pub fn setup() -> TestHarness {
    setup_with_config(Config::default())
}

pub fn setup_with_config(config: Config) -> TestHarness {
    let (handle, driver) = FakeDriver::new(512);
    let store = MemoryStore::new();
    let secrets = MemorySecrets::new();
    let (supervisor, events) =
        Supervisor::new(driver, store.clone(), secrets.clone(), config);
    TestHarness {
        supervisor,
        handle,
        store,
        secrets,
        events,
        device_id: Uuid::new_v4(),
        self_key: PublicKey::new([0xEE; 32]),
    }
}

impl TestHarness {
    /// Drives the connect handshake against the fake radio until the link
    /// is ready.
    pub async fn connect_ready(&mut self) {
        let supervisor = self.supervisor.clone();
        let device_id = self.device_id;
        let task = tokio::spawn(async move { supervisor.connect(device_id).await });

        let frame = self.handle.next_write().await;
        assert_eq!(frame[0], 0x16, "expected DEVICE_QUERY");
        self.handle.respond(device_info_frame());

        let frame = self.handle.next_write().await;
        assert_eq!(frame[0], 0x01, "expected APP_START");
        let self_info = self_info_frame(&self.self_key, "test-node");
        self.handle.respond(self_info);

        let frame = self.handle.next_write().await;
        assert_eq!(frame[0], 0x05, "expected GET_DEVICE_TIME");
        self.handle.respond(curr_time_frame(unix_time_now()));

        task.await.expect("connect task panicked").expect("connect failed");
    }

    /// Seeds a contact for the active device.
    pub async fn seed_contact(&self, kind: ContactKind, out_path_len: i8) -> Contact {
        let key_byte = 0x30 + out_path_len.unsigned_abs();
        self.seed_contact_keyed(PublicKey::new([key_byte; 32]), kind, out_path_len).await
    }

    /// Seeds a contact with an explicit key, for prefix-matching tests.
    pub async fn seed_contact_keyed(
        &self,
        public_key: PublicKey,
        kind: ContactKind,
        out_path_len: i8,
    ) -> Contact {
        let contact = Contact {
            id: Uuid::new_v4(),
            device_id: self.device_id,
            public_key,
            kind,
            flags: 0,
            out_path_len,
            out_path: Vec::new(),
            name: "peer".to_owned(),
            last_advert_ts: 0,
            lat: 0,
            lon: 0,
            last_modified: 0,
            unread_count: 0,
            last_message_at: None,
            nickname: None,
            is_blocked: false,
            is_favorite: false,
        };
        self.store.save_contact(&contact).await.unwrap();
        contact
    }

    pub async fn seed_channel(&self, index: u8, name: &str) -> Channel {
        let channel = Channel {
            id: Uuid::new_v4(),
            device_id: self.device_id,
            index,
            name: name.to_owned(),
            unread_count: 0,
        };
        self.store.save_channel(&channel).await.unwrap();
        channel
    }

    pub async fn seed_session(
        &self,
        role: SessionRole,
        key_fill: u8,
        password: Option<&str>,
    ) -> RemoteNodeSession {
        let session = RemoteNodeSession::new(
            self.device_id,
            PublicKey::new([key_fill; 32]),
            role,
            "server",
        );
        self.store.save_session(&session).await.unwrap();
        if let Some(password) = password {
            let key = format!("{}/{}", session.device_id, session.public_key);
            self.secrets.store_password(&key, password).await.unwrap();
        }
        session
    }

    /// Yields until the send engine has `count` pending acks; lets tests
    /// order a push after the waiter is installed.
    pub async fn wait_pending(&self, count: usize) {
        while self.supervisor.sender().pending_count() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Collects every event currently queued.
    pub fn drain_events(&mut self) -> Vec<crate::event::Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
