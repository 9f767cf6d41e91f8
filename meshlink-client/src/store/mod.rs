//! Abstract persistence port. The engine never touches disk directly; a
//! concrete store (SQLite, Core Data bridge, ...) is injected as
//! `Arc<dyn Store>`. Implementations must make every write durable before
//! returning success.

use async_trait::async_trait;
use meshlink_encoding::types::{AuthorPrefix, KeyPrefix, PublicKey};
use uuid::Uuid;

use crate::entity::{
    Channel, Contact, Device, Message, MessageStatus, PermissionLevel, RemoteNodeSession,
    RoomMessageKey,
};

/// Opaque storage failure, propagated as-is.
#[derive(Debug, Clone, thiserror::Error)]
#[error("store: {0}")]
pub struct StoreError(pub String);

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // Devices.
    async fn save_device(&self, device: &Device) -> StoreResult<()>;
    async fn device_by_id(&self, id: Uuid) -> StoreResult<Option<Device>>;
    /// Selects (or clears) the active device; also remembered across
    /// restarts as the last-connected device.
    async fn set_active_device(&self, id: Option<Uuid>) -> StoreResult<()>;
    async fn active_device(&self) -> StoreResult<Option<Uuid>>;

    // Contacts.
    async fn save_contact(&self, contact: &Contact) -> StoreResult<()>;
    async fn delete_contact(&self, id: Uuid) -> StoreResult<()>;
    async fn contact_by_id(&self, id: Uuid) -> StoreResult<Option<Contact>>;
    async fn contact_by_key(&self, device_id: Uuid, key: &PublicKey) -> StoreResult<Option<Contact>>;
    async fn contact_by_prefix(
        &self,
        device_id: Uuid,
        prefix: &KeyPrefix,
    ) -> StoreResult<Option<Contact>>;
    async fn contact_by_author_prefix(
        &self,
        device_id: Uuid,
        prefix: &AuthorPrefix,
    ) -> StoreResult<Option<Contact>>;
    async fn contacts(&self, device_id: Uuid) -> StoreResult<Vec<Contact>>;
    async fn bump_contact_unread(&self, id: Uuid, last_message_at: u32) -> StoreResult<()>;
    async fn clear_contact_unread(&self, id: Uuid) -> StoreResult<()>;

    // Messages.
    async fn save_message(&self, message: &Message) -> StoreResult<()>;
    async fn message_by_id(&self, id: Uuid) -> StoreResult<Option<Message>>;
    async fn message_by_ack(&self, device_id: Uuid, ack_code: u32) -> StoreResult<Option<Message>>;
    async fn messages_for_contact(
        &self,
        contact_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;
    async fn messages_for_channel(
        &self,
        device_id: Uuid,
        channel_index: u8,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;
    async fn update_message_status(&self, id: Uuid, status: MessageStatus) -> StoreResult<()>;
    /// Records the radio's ack code and attempt count, moving the message
    /// to [`MessageStatus::Sent`].
    async fn update_message_sent(&self, id: Uuid, ack_code: u32, attempt_count: u8)
        -> StoreResult<()>;
    /// Records the round trip and moves the message to
    /// [`MessageStatus::Delivered`].
    async fn update_message_delivered(&self, id: Uuid, round_trip_ms: u32) -> StoreResult<()>;
    async fn update_heard_repeats(&self, id: Uuid, heard_repeats: u32) -> StoreResult<()>;

    // Channels.
    async fn save_channel(&self, channel: &Channel) -> StoreResult<()>;
    async fn delete_channel(&self, id: Uuid) -> StoreResult<()>;
    async fn channel_by_index(&self, device_id: Uuid, index: u8) -> StoreResult<Option<Channel>>;
    async fn channels(&self, device_id: Uuid) -> StoreResult<Vec<Channel>>;
    async fn bump_channel_unread(&self, id: Uuid) -> StoreResult<()>;
    async fn clear_channel_unread(&self, id: Uuid) -> StoreResult<()>;

    // Remote-node sessions.
    async fn save_session(&self, session: &RemoteNodeSession) -> StoreResult<()>;
    async fn delete_session(&self, id: Uuid) -> StoreResult<()>;
    async fn session_by_id(&self, id: Uuid) -> StoreResult<Option<RemoteNodeSession>>;
    async fn session_by_prefix(
        &self,
        device_id: Uuid,
        prefix: &KeyPrefix,
    ) -> StoreResult<Option<RemoteNodeSession>>;
    async fn sessions(&self, device_id: Uuid) -> StoreResult<Vec<RemoteNodeSession>>;
    async fn update_session_connected(&self, id: Uuid, connected: bool) -> StoreResult<()>;
    async fn update_session_permission(
        &self,
        id: Uuid,
        permission: PermissionLevel,
    ) -> StoreResult<()>;

    // Room-post dedup.
    async fn room_message_seen(&self, device_id: Uuid, key: &RoomMessageKey) -> StoreResult<bool>;
    async fn record_room_message(&self, device_id: Uuid, key: &RoomMessageKey) -> StoreResult<()>;
}
