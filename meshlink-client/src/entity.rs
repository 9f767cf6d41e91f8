//! Durable data model shared between the engine and the persistence port.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use meshlink_encoding::parser;
use meshlink_encoding::types::{AuthorPrefix, ContactKind, KeyPrefix, PublicKey, TextKind};
use uuid::Uuid;

/// Seconds since the Unix epoch, saturating at zero for clocks set before
/// 1970.
pub(crate) fn unix_time_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

/// A radio the host has connected to at least once.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub public_key: PublicKey,
    pub model: String,
    pub firmware_version: String,
    pub firmware_build: String,
    pub firmware_ver_code: u8,
}

/// A mesh peer known to the active radio.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Contact {
    pub id: Uuid,
    pub device_id: Uuid,
    pub public_key: PublicKey,
    pub kind: ContactKind,
    pub flags: u8,
    /// `-1` flood, `0` direct neighbour, `1..=63` explicit hop list.
    pub out_path_len: i8,
    pub out_path: Vec<u8>,
    pub name: String,
    pub last_advert_ts: u32,
    pub lat: i32,
    pub lon: i32,
    pub last_modified: u32,
    pub unread_count: u32,
    pub last_message_at: Option<u32>,
    pub nickname: Option<String>,
    pub is_blocked: bool,
    pub is_favorite: bool,
}

impl Contact {
    pub fn prefix(&self) -> KeyPrefix {
        self.public_key.prefix()
    }

    pub fn is_flood_routed(&self) -> bool {
        self.out_path_len < 0
    }

    /// The local nickname when set, otherwise the advertised name.
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageStatus {
    /// Persisted, not yet accepted by the radio.
    Pending,
    /// The radio accepted the packet and allocated an ack code.
    Sent,
    /// A matching delivery acknowledgement arrived.
    Delivered,
    /// Attempts exhausted, or the link dropped mid-flight.
    Failed,
}

/// One text message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    pub id: Uuid,
    pub device_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub channel_index: Option<u8>,
    pub text: String,
    pub timestamp: u32,
    pub direction: MessageDirection,
    pub status: MessageStatus,
    pub text_kind: TextKind,
    pub ack_code: Option<u32>,
    pub attempt_count: u8,
    pub path_len: Option<u8>,
    /// Raw quarter-dB SNR as reported by the radio.
    pub snr_raw: Option<i8>,
    pub sender_prefix: Option<KeyPrefix>,
    pub reply_to_id: Option<Uuid>,
    pub round_trip_ms: Option<u32>,
    pub heard_repeats: u32,
    /// Attributed author for room posts; falls back to the raw prefix.
    pub author: Option<String>,
    pub is_from_self: bool,
}

impl Message {
    pub fn outgoing(device_id: Uuid, contact_id: Uuid, text: &str, timestamp: u32) -> Self {
        Message {
            id: Uuid::new_v4(),
            device_id,
            contact_id: Some(contact_id),
            channel_index: None,
            text: text.to_owned(),
            timestamp,
            direction: MessageDirection::Out,
            status: MessageStatus::Pending,
            text_kind: TextKind::Plain,
            ack_code: None,
            attempt_count: 0,
            path_len: None,
            snr_raw: None,
            sender_prefix: None,
            reply_to_id: None,
            round_trip_ms: None,
            heard_repeats: 0,
            author: None,
            is_from_self: false,
        }
    }

    pub fn outgoing_channel(device_id: Uuid, channel_index: u8, text: &str, timestamp: u32) -> Self {
        Message {
            contact_id: None,
            channel_index: Some(channel_index),
            ..Message::outgoing(device_id, Uuid::nil(), text, timestamp)
        }
    }

    pub fn incoming(device_id: Uuid, contact_id: Uuid, text: &str, timestamp: u32) -> Self {
        Message {
            direction: MessageDirection::In,
            status: MessageStatus::Delivered,
            ..Message::outgoing(device_id, contact_id, text, timestamp)
        }
    }

    pub fn incoming_channel(device_id: Uuid, channel_index: u8, text: &str, timestamp: u32) -> Self {
        Message {
            contact_id: None,
            channel_index: Some(channel_index),
            ..Message::incoming(device_id, Uuid::nil(), text, timestamp)
        }
    }
}

/// A shared broadcast channel slot on the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Channel {
    pub id: Uuid,
    pub device_id: Uuid,
    pub index: u8,
    pub name: String,
    pub unread_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionRole {
    Room,
    Repeater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PermissionLevel {
    Guest,
    Member,
    Admin,
}

impl PermissionLevel {
    /// Maps the server's ACL byte. Unknown high values clamp to admin so a
    /// session stays usable when firmware adds levels.
    pub fn from_acl(acl: u8) -> Self {
        match acl {
            0 => PermissionLevel::Guest,
            1 => PermissionLevel::Member,
            _ => PermissionLevel::Admin,
        }
    }
}

/// A persistent login to a room server or repeater.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RemoteNodeSession {
    pub id: Uuid,
    pub device_id: Uuid,
    pub public_key: PublicKey,
    pub role: SessionRole,
    pub is_connected: bool,
    pub permission: PermissionLevel,
    pub name: String,
    pub lat: i32,
    pub lon: i32,
}

impl RemoteNodeSession {
    pub fn new(device_id: Uuid, public_key: PublicKey, role: SessionRole, name: &str) -> Self {
        RemoteNodeSession {
            id: Uuid::new_v4(),
            device_id,
            public_key,
            role,
            is_connected: false,
            permission: PermissionLevel::Guest,
            name: name.to_owned(),
            lat: 0,
            lon: 0,
        }
    }

    pub fn prefix(&self) -> KeyPrefix {
        self.public_key.prefix()
    }
}

/// Dedup key for room posts relayed by a server: the same original post may
/// arrive through several paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoomMessageKey {
    pub timestamp: u32,
    pub author: AuthorPrefix,
    pub text: String,
}

/// Firmware descriptors from `DEVICE_QUERY`, immutable per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    pub firmware_ver_code: u8,
    pub max_contacts: u8,
    pub max_channels: u8,
    pub features: u16,
    pub firmware_build: String,
    pub model: String,
    pub firmware_version: String,
}

impl DeviceInfo {
    pub fn from_frame<T: AsRef<[u8]>>(
        frame: &parser::DeviceInfo<T>,
    ) -> Result<Self, meshlink_encoding::Error> {
        Ok(DeviceInfo {
            firmware_ver_code: frame.firmware_ver_code(),
            max_contacts: frame.max_contacts(),
            max_channels: frame.max_channels(),
            features: frame.features(),
            firmware_build: frame.firmware_build()?.to_owned(),
            model: frame.model()?.to_owned(),
            firmware_version: frame.firmware_version()?.to_owned(),
        })
    }
}

/// The radio's own identity and PHY configuration from `APP_START`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelfInfo {
    pub adv_type: u8,
    pub tx_power_dbm: u8,
    pub max_tx_power_dbm: u8,
    pub public_key: PublicKey,
    pub lat: i32,
    pub lon: i32,
    pub radio_freq_khz: u32,
    pub radio_bw_hz: u32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub name: String,
}

impl SelfInfo {
    pub fn from_frame<T: AsRef<[u8]>>(
        frame: &parser::SelfInfo<T>,
    ) -> Result<Self, meshlink_encoding::Error> {
        Ok(SelfInfo {
            adv_type: frame.adv_type(),
            tx_power_dbm: frame.tx_power_dbm(),
            max_tx_power_dbm: frame.max_tx_power_dbm(),
            public_key: frame.public_key(),
            lat: frame.lat(),
            lon: frame.lon(),
            radio_freq_khz: frame.radio_freq_khz(),
            radio_bw_hz: frame.radio_bw_hz(),
            spreading_factor: frame.spreading_factor(),
            coding_rate: frame.coding_rate(),
            name: frame.name()?.to_owned(),
        })
    }
}

/// Battery and flash usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatteryAndStorage {
    pub battery_millivolts: u16,
    pub storage_used_kb: u32,
    pub storage_total_kb: u32,
}

/// The connected radio's identity, shared read-only with every engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub device_id: Uuid,
    pub public_key: PublicKey,
}

/// Holder for the single process-wide active device. Owned by the
/// supervisor; engines read through a shared handle instead of global
/// state.
#[derive(Debug, Default)]
pub struct ActiveDevice(Mutex<Option<Identity>>);

impl ActiveDevice {
    pub fn get(&self) -> Option<Identity> {
        self.0.lock().expect("active device lock").clone()
    }

    pub(crate) fn set(&self, identity: Identity) {
        *self.0.lock().expect("active device lock") = Some(identity);
    }

    pub(crate) fn clear(&self) {
        *self.0.lock().expect("active device lock") = None;
    }
}
