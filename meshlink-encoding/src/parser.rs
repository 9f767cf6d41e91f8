//! Provides types and methods for parsing frames received from the radio.
//!
//! Frames are kept as raw bytes; the types here are zero-copy views that
//! read fields at their fixed offsets. Use [`parse_response`] for frames
//! whose first byte is below `0x80` and [`parse_push`] for the rest.
//!
//! # Examples
//!
//! ```
//! use meshlink_encoding::parser::{parse_response, Response};
//!
//! let frame = [0x06u8, 0x00, 0xE9, 0x03, 0x00, 0x00, 0x88, 0x13, 0x00, 0x00];
//! if let Ok(Response::Sent(sent)) = parse_response(&frame[..]) {
//!     assert_eq!(sent.ack_code(), 0x03E9);
//!     assert_eq!(sent.estimated_timeout_ms(), 5000);
//! } else {
//!     panic!("failed to parse sent response");
//! }
//! ```

use crate::codes::{self, is_push};
use crate::types::{
    AuthorPrefix, ContactKind, KeyPrefix, PublicKey, TextKind, CONTACT_BODY_LEN, MAX_PATH_LEN,
};
use crate::Error;

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn i32_at(bytes: &[u8], offset: usize) -> i32 {
    u32_at(bytes, offset) as i32
}

/// UTF-8 view of a variable-length tail field.
fn str_field<'a>(bytes: &'a [u8], name: &'static str) -> Result<&'a str, Error> {
    core::str::from_utf8(bytes).map_err(|_| Error::BadField(name))
}

/// UTF-8 view of a fixed-width NUL-padded field.
fn padded_str<'a>(bytes: &'a [u8], name: &'static str) -> Result<&'a str, Error> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    str_field(&bytes[..end], name)
}

fn expect(bytes: &[u8], code: u8, min_len: usize) -> Result<(), Error> {
    if bytes.is_empty() || bytes[0] != code {
        return Err(Error::BadField("code"));
    }
    if bytes.len() < min_len {
        return Err(Error::ShortFrame);
    }
    Ok(())
}

/// A response frame classified by code.
#[derive(Debug, PartialEq, Eq)]
pub enum Response<T> {
    Ok(OkResponse<T>),
    Error(ErrorResponse<T>),
    ContactsStart(ContactsStart<T>),
    Contact(ContactFrame<T>),
    EndOfContacts(EndOfContacts<T>),
    SelfInfo(SelfInfo<T>),
    Sent(Sent<T>),
    /// A v < 3 message frame, carried raw; current radios no longer emit
    /// these and the client ignores them.
    LegacyMessage(T),
    CurrTime(CurrTime<T>),
    NoMoreMessages,
    BatteryAndStorage(BatteryAndStorage<T>),
    DeviceInfo(DeviceInfo<T>),
    ContactMsgV3(ContactMsgV3<T>),
    ChannelMsgV3(ChannelMsgV3<T>),
    AdvertPath(AdvertPath<T>),
}

/// A push frame classified by code.
#[derive(Debug, PartialEq, Eq)]
pub enum Push<T> {
    Advert(Advert<T>),
    PathUpdated(PathUpdated<T>),
    MessagesWaiting,
    SendConfirmed(SendConfirmed<T>),
    LoginResult(LoginResult<T>),
    NewAdvert(ContactFrame<T>),
    BinaryResponse(BinaryResponse<T>),
}

/// Parses a response frame (first byte `< 0x80`).
pub fn parse_response<T: AsRef<[u8]>>(data: T) -> Result<Response<T>, Error> {
    let code = *data.as_ref().first().ok_or(Error::ShortFrame)?;
    if is_push(code) {
        return Err(Error::UnknownCode(code));
    }
    use codes::resp;
    Ok(match code {
        resp::OK => Response::Ok(OkResponse::new(data)?),
        resp::ERROR => Response::Error(ErrorResponse::new(data)?),
        resp::CONTACTS_START => Response::ContactsStart(ContactsStart::new(data)?),
        resp::CONTACT => Response::Contact(ContactFrame::new(data)?),
        resp::END_OF_CONTACTS => Response::EndOfContacts(EndOfContacts::new(data)?),
        resp::SELF_INFO => Response::SelfInfo(SelfInfo::new(data)?),
        resp::SENT => Response::Sent(Sent::new(data)?),
        resp::CONTACT_MSG | resp::CHANNEL_MSG => Response::LegacyMessage(data),
        resp::CURR_TIME => Response::CurrTime(CurrTime::new(data)?),
        resp::NO_MORE_MESSAGES => Response::NoMoreMessages,
        resp::BATTERY_AND_STORAGE => Response::BatteryAndStorage(BatteryAndStorage::new(data)?),
        resp::DEVICE_INFO => Response::DeviceInfo(DeviceInfo::new(data)?),
        resp::CONTACT_MSG_V3 => Response::ContactMsgV3(ContactMsgV3::new(data)?),
        resp::CHANNEL_MSG_V3 => Response::ChannelMsgV3(ChannelMsgV3::new(data)?),
        resp::ADVERT_PATH => Response::AdvertPath(AdvertPath::new(data)?),
        other => return Err(Error::UnknownCode(other)),
    })
}

/// Parses a push frame (first byte `>= 0x80`).
pub fn parse_push<T: AsRef<[u8]>>(data: T) -> Result<Push<T>, Error> {
    let code = *data.as_ref().first().ok_or(Error::ShortFrame)?;
    if !is_push(code) {
        return Err(Error::UnknownCode(code));
    }
    use codes::push;
    Ok(match code {
        push::ADVERT => Push::Advert(Advert::new(data)?),
        push::PATH_UPDATED => Push::PathUpdated(PathUpdated::new(data)?),
        push::MESSAGES_WAITING => Push::MessagesWaiting,
        push::SEND_CONFIRMED => Push::SendConfirmed(SendConfirmed::new(data)?),
        push::LOGIN_RESULT => Push::LoginResult(LoginResult::new(data)?),
        push::NEW_ADVERT => Push::NewAdvert(ContactFrame::new(data)?),
        push::BINARY_RESPONSE => Push::BinaryResponse(BinaryResponse::new(data)?),
        other => return Err(Error::UnknownCode(other)),
    })
}

/// `OK`, optionally carrying a trailing payload the caller may ignore.
#[derive(Debug, PartialEq, Eq)]
pub struct OkResponse<T>(T);

impl<T: AsRef<[u8]>> OkResponse<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::OK, 1)?;
        Ok(Self(data))
    }

    pub fn payload(&self) -> &[u8] {
        &self.0.as_ref()[1..]
    }
}

/// `ERROR` with a one-byte reason code.
#[derive(Debug, PartialEq, Eq)]
pub struct ErrorResponse<T>(T);

impl<T: AsRef<[u8]>> ErrorResponse<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::ERROR, 1)?;
        Ok(Self(data))
    }

    /// The radio's error code; frames without the byte decode as 0.
    pub fn err_code(&self) -> u8 {
        self.0.as_ref().get(1).copied().unwrap_or(0)
    }
}

/// `CONTACTS_START`, announcing how many contact frames follow.
#[derive(Debug, PartialEq, Eq)]
pub struct ContactsStart<T>(T);

impl<T: AsRef<[u8]>> ContactsStart<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::CONTACTS_START, 5)?;
        Ok(Self(data))
    }

    pub fn count(&self) -> u32 {
        u32_at(self.0.as_ref(), 1)
    }
}

/// `END_OF_CONTACTS`, closing a contact sync.
#[derive(Debug, PartialEq, Eq)]
pub struct EndOfContacts<T>(T);

impl<T: AsRef<[u8]>> EndOfContacts<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::END_OF_CONTACTS, 5)?;
        Ok(Self(data))
    }

    /// Most recent `last_modified` seen; feed back as `since` next sync.
    pub fn last_modified(&self) -> u32 {
        u32_at(self.0.as_ref(), 1)
    }
}

/// The 146-byte contact body behind a `CONTACT` response or `NEW_ADVERT`
/// push.
#[derive(Debug, PartialEq, Eq)]
pub struct ContactFrame<T>(T);

impl<T: AsRef<[u8]>> ContactFrame<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        let bytes = data.as_ref();
        if bytes.is_empty()
            || (bytes[0] != codes::resp::CONTACT && bytes[0] != codes::push::NEW_ADVERT)
        {
            return Err(Error::BadField("code"));
        }
        if bytes.len() < 1 + CONTACT_BODY_LEN {
            return Err(Error::ShortFrame);
        }
        Ok(Self(data))
    }

    pub fn public_key(&self) -> PublicKey {
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.0.as_ref()[1..33]);
        PublicKey::new(key)
    }

    pub fn kind_raw(&self) -> u8 {
        self.0.as_ref()[33]
    }

    pub fn kind(&self) -> Result<ContactKind, Error> {
        ContactKind::try_from(self.kind_raw())
    }

    pub fn flags(&self) -> u8 {
        self.0.as_ref()[34]
    }

    /// `-1` means flood routing, `0` a direct neighbour, `1..=63` an
    /// explicit hop list.
    pub fn out_path_len(&self) -> i8 {
        self.0.as_ref()[35] as i8
    }

    /// The explicit hop list; empty when flood-routed. Trailing padding
    /// beyond `out_path_len` is not exposed.
    pub fn out_path(&self) -> &[u8] {
        let len = self.out_path_len();
        if len <= 0 {
            return &[];
        }
        &self.0.as_ref()[36..36 + len as usize]
    }

    pub fn name(&self) -> Result<&str, Error> {
        padded_str(&self.0.as_ref()[99..131], "name")
    }

    pub fn last_advert_ts(&self) -> u32 {
        u32_at(self.0.as_ref(), 131)
    }

    pub fn lat(&self) -> i32 {
        i32_at(self.0.as_ref(), 135)
    }

    pub fn lon(&self) -> i32 {
        i32_at(self.0.as_ref(), 139)
    }

    pub fn last_modified(&self) -> u32 {
        u32_at(self.0.as_ref(), 143)
    }
}

/// `SELF_INFO`, returned by `APP_START`: the radio's own identity and
/// PHY configuration.
#[derive(Debug, PartialEq, Eq)]
pub struct SelfInfo<T>(T);

impl<T: AsRef<[u8]>> SelfInfo<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::SELF_INFO, 58)?;
        Ok(Self(data))
    }

    pub fn adv_type(&self) -> u8 {
        self.0.as_ref()[1]
    }

    pub fn tx_power_dbm(&self) -> u8 {
        self.0.as_ref()[2]
    }

    pub fn max_tx_power_dbm(&self) -> u8 {
        self.0.as_ref()[3]
    }

    pub fn public_key(&self) -> PublicKey {
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.0.as_ref()[4..36]);
        PublicKey::new(key)
    }

    pub fn lat(&self) -> i32 {
        i32_at(self.0.as_ref(), 36)
    }

    pub fn lon(&self) -> i32 {
        i32_at(self.0.as_ref(), 40)
    }

    pub fn radio_freq_khz(&self) -> u32 {
        u32_at(self.0.as_ref(), 48)
    }

    pub fn radio_bw_hz(&self) -> u32 {
        u32_at(self.0.as_ref(), 52)
    }

    pub fn spreading_factor(&self) -> u8 {
        self.0.as_ref()[56]
    }

    pub fn coding_rate(&self) -> u8 {
        self.0.as_ref()[57]
    }

    pub fn name(&self) -> Result<&str, Error> {
        str_field(&self.0.as_ref()[58..], "name")
    }
}

/// `SENT`: the radio accepted an outbound packet and allocated an ack code.
#[derive(Debug, PartialEq, Eq)]
pub struct Sent<T>(T);

impl<T: AsRef<[u8]>> Sent<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::SENT, 10)?;
        Ok(Self(data))
    }

    pub fn is_flood(&self) -> bool {
        self.0.as_ref()[1] != 0
    }

    pub fn ack_code(&self) -> u32 {
        u32_at(self.0.as_ref(), 2)
    }

    /// The radio's round-trip estimate for this route, in milliseconds.
    pub fn estimated_timeout_ms(&self) -> u32 {
        u32_at(self.0.as_ref(), 6)
    }
}

/// `CURR_TIME`: the radio's clock as a Unix epoch.
#[derive(Debug, PartialEq, Eq)]
pub struct CurrTime<T>(T);

impl<T: AsRef<[u8]>> CurrTime<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::CURR_TIME, 5)?;
        Ok(Self(data))
    }

    pub fn epoch_secs(&self) -> u32 {
        u32_at(self.0.as_ref(), 1)
    }
}

/// `BATTERY_AND_STORAGE`.
#[derive(Debug, PartialEq, Eq)]
pub struct BatteryAndStorage<T>(T);

impl<T: AsRef<[u8]>> BatteryAndStorage<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::BATTERY_AND_STORAGE, 11)?;
        Ok(Self(data))
    }

    pub fn battery_millivolts(&self) -> u16 {
        u16_at(self.0.as_ref(), 1)
    }

    pub fn storage_used_kb(&self) -> u32 {
        u32_at(self.0.as_ref(), 3)
    }

    pub fn storage_total_kb(&self) -> u32 {
        u32_at(self.0.as_ref(), 7)
    }
}

/// `DEVICE_INFO`, returned by `DEVICE_QUERY`: immutable-per-connection
/// firmware descriptors.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceInfo<T>(T);

impl<T: AsRef<[u8]>> DeviceInfo<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::DEVICE_INFO, 50)?;
        Ok(Self(data))
    }

    pub fn firmware_ver_code(&self) -> u8 {
        self.0.as_ref()[1]
    }

    pub fn max_contacts(&self) -> u8 {
        self.0.as_ref()[2]
    }

    pub fn max_channels(&self) -> u8 {
        self.0.as_ref()[3]
    }

    pub fn features(&self) -> u16 {
        u16_at(self.0.as_ref(), 4)
    }

    pub fn firmware_build(&self) -> Result<&str, Error> {
        padded_str(&self.0.as_ref()[6..18], "firmware build")
    }

    pub fn model(&self) -> Result<&str, Error> {
        padded_str(&self.0.as_ref()[18..38], "model")
    }

    pub fn firmware_version(&self) -> Result<&str, Error> {
        padded_str(&self.0.as_ref()[38..50], "firmware version")
    }
}

/// `CONTACT_MSG_V3`: one inbound direct message drained from the radio.
#[derive(Debug, PartialEq, Eq)]
pub struct ContactMsgV3<T>(T);

impl<T: AsRef<[u8]>> ContactMsgV3<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::CONTACT_MSG_V3, 16)?;
        Ok(Self(data))
    }

    /// Raw SNR in quarter-dB steps; see [`crate::types::snr_db`].
    pub fn snr_raw(&self) -> i8 {
        self.0.as_ref()[1] as i8
    }

    pub fn sender_prefix(&self) -> KeyPrefix {
        let mut prefix = [0u8; 6];
        prefix.copy_from_slice(&self.0.as_ref()[4..10]);
        KeyPrefix::new(prefix)
    }

    pub fn path_len(&self) -> u8 {
        self.0.as_ref()[10]
    }

    pub fn text_kind_raw(&self) -> u8 {
        self.0.as_ref()[11]
    }

    pub fn text_kind(&self) -> Result<TextKind, Error> {
        TextKind::try_from(self.text_kind_raw())
    }

    pub fn timestamp(&self) -> u32 {
        u32_at(self.0.as_ref(), 12)
    }

    /// The raw text payload. For [`TextKind::SignedPlain`] this starts
    /// with a 4-byte author prefix and is not valid UTF-8 as a whole.
    pub fn payload(&self) -> &[u8] {
        &self.0.as_ref()[16..]
    }

    pub fn text(&self) -> Result<&str, Error> {
        str_field(self.payload(), "text")
    }

    /// Original-author prefix embedded in a signed room post.
    pub fn signed_author(&self) -> Result<AuthorPrefix, Error> {
        let payload = self.payload();
        if payload.len() < 4 {
            return Err(Error::ShortFrame);
        }
        AuthorPrefix::try_from(&payload[..4])
    }

    /// Text of a signed room post, past the author prefix.
    pub fn signed_text(&self) -> Result<&str, Error> {
        let payload = self.payload();
        if payload.len() < 4 {
            return Err(Error::ShortFrame);
        }
        str_field(&payload[4..], "text")
    }
}

/// `CHANNEL_MSG_V3`: one inbound broadcast message drained from the radio.
#[derive(Debug, PartialEq, Eq)]
pub struct ChannelMsgV3<T>(T);

impl<T: AsRef<[u8]>> ChannelMsgV3<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::resp::CHANNEL_MSG_V3, 11)?;
        Ok(Self(data))
    }

    pub fn snr_raw(&self) -> i8 {
        self.0.as_ref()[1] as i8
    }

    pub fn channel_index(&self) -> u8 {
        self.0.as_ref()[4]
    }

    pub fn path_len(&self) -> u8 {
        self.0.as_ref()[5]
    }

    pub fn text_kind_raw(&self) -> u8 {
        self.0.as_ref()[6]
    }

    pub fn text_kind(&self) -> Result<TextKind, Error> {
        TextKind::try_from(self.text_kind_raw())
    }

    pub fn timestamp(&self) -> u32 {
        u32_at(self.0.as_ref(), 7)
    }

    pub fn text(&self) -> Result<&str, Error> {
        str_field(&self.0.as_ref()[11..], "text")
    }
}

/// `ADVERT_PATH`: the hop list the radio last heard an advert through.
#[derive(Debug, PartialEq, Eq)]
pub struct AdvertPath<T>(T);

impl<T: AsRef<[u8]>> AdvertPath<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        let bytes = data.as_ref();
        expect(bytes, codes::resp::ADVERT_PATH, 2)?;
        let len = bytes[1] as usize;
        if len > MAX_PATH_LEN {
            return Err(Error::BadField("path length"));
        }
        if bytes.len() < 2 + len {
            return Err(Error::ShortFrame);
        }
        Ok(Self(data))
    }

    pub fn path(&self) -> &[u8] {
        let len = self.0.as_ref()[1] as usize;
        &self.0.as_ref()[2..2 + len]
    }
}

/// `ADVERT` push: a known node re-announced itself.
#[derive(Debug, PartialEq, Eq)]
pub struct Advert<T>(T);

impl<T: AsRef<[u8]>> Advert<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::push::ADVERT, 11)?;
        Ok(Self(data))
    }

    pub fn prefix(&self) -> KeyPrefix {
        let mut prefix = [0u8; 6];
        prefix.copy_from_slice(&self.0.as_ref()[1..7]);
        KeyPrefix::new(prefix)
    }

    pub fn timestamp(&self) -> u32 {
        u32_at(self.0.as_ref(), 7)
    }
}

/// `PATH_UPDATED` push: the radio learned a new route to a contact.
#[derive(Debug, PartialEq, Eq)]
pub struct PathUpdated<T>(T);

impl<T: AsRef<[u8]>> PathUpdated<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::push::PATH_UPDATED, 8)?;
        Ok(Self(data))
    }

    pub fn prefix(&self) -> KeyPrefix {
        let mut prefix = [0u8; 6];
        prefix.copy_from_slice(&self.0.as_ref()[1..7]);
        KeyPrefix::new(prefix)
    }

    pub fn new_path_len(&self) -> i8 {
        self.0.as_ref()[7] as i8
    }
}

/// `SEND_CONFIRMED` push: a recipient acknowledged an outbound message.
#[derive(Debug, PartialEq, Eq)]
pub struct SendConfirmed<T>(T);

impl<T: AsRef<[u8]>> SendConfirmed<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::push::SEND_CONFIRMED, 9)?;
        Ok(Self(data))
    }

    pub fn ack_code(&self) -> u32 {
        u32_at(self.0.as_ref(), 1)
    }

    pub fn round_trip_ms(&self) -> u32 {
        u32_at(self.0.as_ref(), 5)
    }
}

/// `LOGIN_RESULT` push: outcome of a `SEND_LOGIN`, tagged by key prefix.
#[derive(Debug, PartialEq, Eq)]
pub struct LoginResult<T>(T);

impl<T: AsRef<[u8]>> LoginResult<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::push::LOGIN_RESULT, 8)?;
        Ok(Self(data))
    }

    pub fn prefix(&self) -> KeyPrefix {
        let mut prefix = [0u8; 6];
        prefix.copy_from_slice(&self.0.as_ref()[1..7]);
        KeyPrefix::new(prefix)
    }

    pub fn is_success(&self) -> bool {
        self.0.as_ref()[7] != 0
    }

    /// ACL byte granting the session's permission level; only present on
    /// success from servers that enforce one.
    pub fn acl(&self) -> Option<u8> {
        self.0.as_ref().get(8).copied()
    }
}

/// `BINARY_RESPONSE` push: a remote node's reply to a `BINARY_REQ`,
/// correlated by the 4-byte tag.
#[derive(Debug, PartialEq, Eq)]
pub struct BinaryResponse<T>(T);

impl<T: AsRef<[u8]>> BinaryResponse<T> {
    pub fn new(data: T) -> Result<Self, Error> {
        expect(data.as_ref(), codes::push::BINARY_RESPONSE, 5)?;
        Ok(Self(data))
    }

    /// The little-endian ack code of the originating request.
    pub fn tag(&self) -> u32 {
        u32_at(self.0.as_ref(), 1)
    }

    pub fn payload(&self) -> &[u8] {
        &self.0.as_ref()[5..]
    }
}
