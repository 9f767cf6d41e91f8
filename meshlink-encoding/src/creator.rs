//! Provides types and methods for creating command frames.
//!
//! Multi-field commands use a creator struct that writes into a
//! caller-supplied buffer; fixed-shape commands are plain functions. Both
//! return the filled prefix of the buffer, ready to hand to the link.
//!
//! # Examples
//!
//! ```
//! use meshlink_encoding::creator::TextMsgCreator;
//! use meshlink_encoding::types::KeyPrefix;
//!
//! let mut buf = [0u8; 256];
//! let mut creator = TextMsgCreator::new(&mut buf[..]).unwrap();
//! creator.set_attempt(0).set_timestamp(1_700_000_000);
//! creator.set_recipient(&KeyPrefix::new([1, 2, 3, 4, 5, 6]));
//! creator.set_text("hello mesh").unwrap();
//! let frame = creator.build();
//! assert_eq!(frame[0], 0x02);
//! ```

use crate::codes::cmd;
use crate::types::{
    ContactKind, KeyPrefix, PublicKey, TextKind, FLOOD_PATH, MAX_NAME_LEN, MAX_PASSWORD_LEN,
    MAX_PATH_LEN, MAX_TEXT_LEN,
};
use crate::Error;

fn write_frame<'a>(buf: &'a mut [u8], parts: &[&[u8]]) -> Result<&'a [u8], Error> {
    let len = parts.iter().map(|part| part.len()).sum();
    if buf.len() < len {
        return Err(Error::BufferTooShort);
    }
    let mut offset = 0;
    for part in parts {
        buf[offset..offset + part.len()].copy_from_slice(part);
        offset += part.len();
    }
    Ok(&buf[..len])
}

/// `SYNC_NEXT_MESSAGE`: pop the next queued inbound message.
pub fn sync_next_message(buf: &mut [u8]) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::SYNC_NEXT_MESSAGE]])
}

/// `GET_DEVICE_TIME`.
pub fn get_device_time(buf: &mut [u8]) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::GET_DEVICE_TIME]])
}

/// `SET_DEVICE_TIME`.
pub fn set_device_time(buf: &mut [u8], epoch_secs: u32) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::SET_DEVICE_TIME], &epoch_secs.to_le_bytes()])
}

/// `REBOOT`.
pub fn reboot(buf: &mut [u8]) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::REBOOT]])
}

/// `FACTORY_RESET`.
pub fn factory_reset(buf: &mut [u8]) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::FACTORY_RESET]])
}

/// `GET_BATTERY_AND_STORAGE`.
pub fn get_battery_and_storage(buf: &mut [u8]) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::GET_BATTERY_AND_STORAGE]])
}

/// `DEVICE_QUERY` with the protocol version the host speaks.
pub fn device_query(buf: &mut [u8], protocol_ver: u8) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::DEVICE_QUERY, protocol_ver]])
}

/// `SEND_SELF_ADVERT`; `flood` requests a mesh-wide advert instead of
/// zero-hop.
pub fn send_self_advert(buf: &mut [u8], flood: bool) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::SEND_SELF_ADVERT, flood as u8]])
}

/// `SET_RADIO_TX_POWER`.
pub fn set_tx_power(buf: &mut [u8], dbm: u8) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::SET_RADIO_TX_POWER, dbm]])
}

/// `SET_RADIO_PARAMS`.
pub fn set_radio_params(
    buf: &mut [u8],
    freq_khz: u32,
    bw_hz: u32,
    spreading_factor: u8,
    coding_rate: u8,
) -> Result<&[u8], Error> {
    write_frame(
        buf,
        &[
            &[cmd::SET_RADIO_PARAMS],
            &freq_khz.to_le_bytes(),
            &bw_hz.to_le_bytes(),
            &[spreading_factor, coding_rate],
        ],
    )
}

/// `SET_DEVICE_PIN`.
pub fn set_device_pin(buf: &mut [u8], pin: u32) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::SET_DEVICE_PIN], &pin.to_le_bytes()])
}

/// `SET_OTHER_PARAMS`.
pub fn set_other_params(
    buf: &mut [u8],
    manual_add_contacts: bool,
    telemetry_mode: u8,
    advert_loc_policy: u8,
) -> Result<&[u8], Error> {
    write_frame(
        buf,
        &[&[cmd::SET_OTHER_PARAMS, manual_add_contacts as u8, telemetry_mode, advert_loc_policy]],
    )
}

/// `SET_ADVERT_LATLON`, fixed-point degrees x 10^6.
pub fn set_advert_latlon(buf: &mut [u8], lat: i32, lon: i32) -> Result<&[u8], Error> {
    write_frame(buf, &[&[cmd::SET_ADVERT_LATLON], &lat.to_le_bytes(), &lon.to_le_bytes()])
}

/// `SET_ADVERT_NAME`.
pub fn set_advert_name<'a>(buf: &'a mut [u8], name: &str) -> Result<&'a [u8], Error> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::FieldTooLong("name"));
    }
    write_frame(buf, &[&[cmd::SET_ADVERT_NAME], name.as_bytes()])
}

/// `GET_CONTACTS`, optionally restricted to entries modified after `since`.
pub fn get_contacts(buf: &mut [u8], since: Option<u32>) -> Result<&[u8], Error> {
    match since {
        Some(since) => write_frame(buf, &[&[cmd::GET_CONTACTS], &since.to_le_bytes()]),
        None => write_frame(buf, &[&[cmd::GET_CONTACTS]]),
    }
}

/// `RESET_PATH`: force the radio back to flood routing for this contact.
pub fn reset_path<'a>(buf: &'a mut [u8], key: &PublicKey) -> Result<&'a [u8], Error> {
    write_frame(buf, &[&[cmd::RESET_PATH], key.as_ref()])
}

/// `REMOVE_CONTACT`.
pub fn remove_contact<'a>(buf: &'a mut [u8], key: &PublicKey) -> Result<&'a [u8], Error> {
    write_frame(buf, &[&[cmd::REMOVE_CONTACT], key.as_ref()])
}

/// `SHARE_CONTACT`: re-broadcast a contact card into the mesh.
pub fn share_contact<'a>(buf: &'a mut [u8], key: &PublicKey) -> Result<&'a [u8], Error> {
    write_frame(buf, &[&[cmd::SHARE_CONTACT], key.as_ref()])
}

/// `GET_CONTACT_BY_KEY`.
pub fn get_contact_by_key<'a>(buf: &'a mut [u8], key: &PublicKey) -> Result<&'a [u8], Error> {
    write_frame(buf, &[&[cmd::GET_CONTACT_BY_KEY], key.as_ref()])
}

/// `PATH_DISCOVERY`: probe for a directed route to this contact.
pub fn path_discovery<'a>(buf: &'a mut [u8], key: &PublicKey) -> Result<&'a [u8], Error> {
    write_frame(buf, &[&[cmd::PATH_DISCOVERY], key.as_ref()])
}

/// `GET_ADVERT_PATH`.
pub fn get_advert_path<'a>(buf: &'a mut [u8], key: &PublicKey) -> Result<&'a [u8], Error> {
    write_frame(buf, &[&[cmd::GET_ADVERT_PATH], key.as_ref()])
}

/// `LOGOUT` from a room or repeater session.
pub fn logout<'a>(buf: &'a mut [u8], key: &PublicKey) -> Result<&'a [u8], Error> {
    write_frame(buf, &[&[cmd::LOGOUT], key.as_ref()])
}

const APP_START_HDR: usize = 8;

/// `APP_START` serves for declaring the host application to the radio and
/// switching the connection into companion mode.
pub struct AppStartCreator<D> {
    data: D,
    name_len: usize,
}

impl<D: AsMut<[u8]> + AsRef<[u8]>> AppStartCreator<D> {
    pub fn new(mut data: D) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < APP_START_HDR {
            return Err(Error::BufferTooShort);
        }
        d[..APP_START_HDR].fill(0);
        d[0] = cmd::APP_START;
        d[1] = 1;
        Ok(Self { data, name_len: 0 })
    }

    pub fn set_app_ver(&mut self, ver: u8) -> &mut Self {
        self.data.as_mut()[1] = ver;
        self
    }

    pub fn set_app_name(&mut self, name: &str) -> Result<&mut Self, Error> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::FieldTooLong("app name"));
        }
        let d = self.data.as_mut();
        if d.len() < APP_START_HDR + name.len() {
            return Err(Error::BufferTooShort);
        }
        d[APP_START_HDR..APP_START_HDR + name.len()].copy_from_slice(name.as_bytes());
        self.name_len = name.len();
        Ok(self)
    }

    pub fn build(&self) -> &[u8] {
        &self.data.as_ref()[..APP_START_HDR + self.name_len]
    }
}

const TEXT_MSG_HDR: usize = 13;

/// `SEND_TEXT_MSG` serves for creating a direct text message to a single
/// recipient, identified by key prefix.
#[derive(Debug)]
pub struct TextMsgCreator<D> {
    data: D,
    text_len: usize,
}

impl<D: AsMut<[u8]> + AsRef<[u8]>> TextMsgCreator<D> {
    pub fn new(mut data: D) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < TEXT_MSG_HDR {
            return Err(Error::BufferTooShort);
        }
        d[..TEXT_MSG_HDR].fill(0);
        d[0] = cmd::SEND_TEXT_MSG;
        Ok(Self { data, text_len: 0 })
    }

    pub fn set_text_kind(&mut self, kind: TextKind) -> &mut Self {
        self.data.as_mut()[1] = kind as u8;
        self
    }

    /// Zero-based attempt counter; repeated for retries of the same
    /// message so hops can deduplicate.
    pub fn set_attempt(&mut self, attempt: u8) -> &mut Self {
        self.data.as_mut()[2] = attempt;
        self
    }

    /// Sender timestamp, identical across every attempt of one message.
    pub fn set_timestamp(&mut self, epoch_secs: u32) -> &mut Self {
        self.data.as_mut()[3..7].copy_from_slice(&epoch_secs.to_le_bytes());
        self
    }

    pub fn set_recipient(&mut self, prefix: &KeyPrefix) -> &mut Self {
        self.data.as_mut()[7..13].copy_from_slice(prefix.as_ref());
        self
    }

    pub fn set_text(&mut self, text: &str) -> Result<&mut Self, Error> {
        if text.len() > MAX_TEXT_LEN {
            return Err(Error::FieldTooLong("text"));
        }
        let d = self.data.as_mut();
        if d.len() < TEXT_MSG_HDR + text.len() {
            return Err(Error::BufferTooShort);
        }
        d[TEXT_MSG_HDR..TEXT_MSG_HDR + text.len()].copy_from_slice(text.as_bytes());
        self.text_len = text.len();
        Ok(self)
    }

    pub fn build(&self) -> &[u8] {
        &self.data.as_ref()[..TEXT_MSG_HDR + self.text_len]
    }
}

const CHAN_MSG_HDR: usize = 7;

/// `SEND_CHAN_MSG` serves for creating a broadcast text message on a
/// shared channel. Channel messages receive no delivery acknowledgement.
pub struct ChannelMsgCreator<D> {
    data: D,
    text_len: usize,
}

impl<D: AsMut<[u8]> + AsRef<[u8]>> ChannelMsgCreator<D> {
    pub fn new(mut data: D) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < CHAN_MSG_HDR {
            return Err(Error::BufferTooShort);
        }
        d[..CHAN_MSG_HDR].fill(0);
        d[0] = cmd::SEND_CHAN_MSG;
        Ok(Self { data, text_len: 0 })
    }

    pub fn set_text_kind(&mut self, kind: TextKind) -> &mut Self {
        self.data.as_mut()[1] = kind as u8;
        self
    }

    pub fn set_channel(&mut self, index: u8) -> &mut Self {
        self.data.as_mut()[2] = index;
        self
    }

    pub fn set_timestamp(&mut self, epoch_secs: u32) -> &mut Self {
        self.data.as_mut()[3..7].copy_from_slice(&epoch_secs.to_le_bytes());
        self
    }

    pub fn set_text(&mut self, text: &str) -> Result<&mut Self, Error> {
        if text.len() > MAX_TEXT_LEN {
            return Err(Error::FieldTooLong("text"));
        }
        let d = self.data.as_mut();
        if d.len() < CHAN_MSG_HDR + text.len() {
            return Err(Error::BufferTooShort);
        }
        d[CHAN_MSG_HDR..CHAN_MSG_HDR + text.len()].copy_from_slice(text.as_bytes());
        self.text_len = text.len();
        Ok(self)
    }

    pub fn build(&self) -> &[u8] {
        &self.data.as_ref()[..CHAN_MSG_HDR + self.text_len]
    }
}

const LOGIN_HDR: usize = 33;

/// `SEND_LOGIN` serves for opening a session with a room server or
/// repeater. The result arrives later as a `LOGIN_RESULT` push.
#[derive(Debug)]
pub struct LoginCreator<D> {
    data: D,
    password_len: usize,
}

impl<D: AsMut<[u8]> + AsRef<[u8]>> LoginCreator<D> {
    pub fn new(mut data: D) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < LOGIN_HDR {
            return Err(Error::BufferTooShort);
        }
        d[..LOGIN_HDR].fill(0);
        d[0] = cmd::SEND_LOGIN;
        Ok(Self { data, password_len: 0 })
    }

    pub fn set_public_key(&mut self, key: &PublicKey) -> &mut Self {
        self.data.as_mut()[1..33].copy_from_slice(key.as_ref());
        self
    }

    pub fn set_password(&mut self, password: &str) -> Result<&mut Self, Error> {
        if password.len() > MAX_PASSWORD_LEN {
            return Err(Error::FieldTooLong("password"));
        }
        let d = self.data.as_mut();
        if d.len() < LOGIN_HDR + password.len() {
            return Err(Error::BufferTooShort);
        }
        d[LOGIN_HDR..LOGIN_HDR + password.len()].copy_from_slice(password.as_bytes());
        self.password_len = password.len();
        Ok(self)
    }

    pub fn build(&self) -> &[u8] {
        &self.data.as_ref()[..LOGIN_HDR + self.password_len]
    }
}

const BINARY_REQ_HDR: usize = 34;

/// `SEND_BINARY_REQ` serves for creating typed binary requests to a
/// remote node (status, telemetry, keep-alive, ...).
pub struct BinaryReqCreator<D> {
    data: D,
    payload_len: usize,
}

impl<D: AsMut<[u8]> + AsRef<[u8]>> BinaryReqCreator<D> {
    pub fn new(mut data: D) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < BINARY_REQ_HDR {
            return Err(Error::BufferTooShort);
        }
        d[..BINARY_REQ_HDR].fill(0);
        d[0] = cmd::SEND_BINARY_REQ;
        Ok(Self { data, payload_len: 0 })
    }

    pub fn set_recipient(&mut self, key: &PublicKey) -> &mut Self {
        self.data.as_mut()[1..33].copy_from_slice(key.as_ref());
        self
    }

    /// One of the [`crate::codes::binary_req`] subtypes.
    pub fn set_req_type(&mut self, req_type: u8) -> &mut Self {
        self.data.as_mut()[33] = req_type;
        self
    }

    pub fn set_payload(&mut self, payload: &[u8]) -> Result<&mut Self, Error> {
        let d = self.data.as_mut();
        if d.len() < BINARY_REQ_HDR + payload.len() {
            return Err(Error::BufferTooShort);
        }
        d[BINARY_REQ_HDR..BINARY_REQ_HDR + payload.len()].copy_from_slice(payload);
        self.payload_len = payload.len();
        Ok(self)
    }

    pub fn build(&self) -> &[u8] {
        &self.data.as_ref()[..BINARY_REQ_HDR + self.payload_len]
    }
}

const CONTACT_CMD_LEN: usize = 143;

/// `ADD_UPDATE_CONTACT` serves for creating the 142-byte contact body the
/// radio stores (everything but `last_modified`, which the radio assigns).
#[derive(Debug)]
pub struct ContactCreator<D> {
    data: D,
}

impl<D: AsMut<[u8]> + AsRef<[u8]>> ContactCreator<D> {
    pub fn new(mut data: D) -> Result<Self, Error> {
        let d = data.as_mut();
        if d.len() < CONTACT_CMD_LEN {
            return Err(Error::BufferTooShort);
        }
        d[..CONTACT_CMD_LEN].fill(0);
        d[0] = cmd::ADD_UPDATE_CONTACT;
        Ok(Self { data })
    }

    pub fn set_public_key(&mut self, key: &PublicKey) -> &mut Self {
        self.data.as_mut()[1..33].copy_from_slice(key.as_ref());
        self
    }

    pub fn set_kind(&mut self, kind: ContactKind) -> &mut Self {
        self.data.as_mut()[33] = kind as u8;
        self
    }

    pub fn set_flags(&mut self, flags: u8) -> &mut Self {
        self.data.as_mut()[34] = flags;
        self
    }

    /// Sets the outbound path. A length of `-1` (flood) requires an empty
    /// hop list; lengths `0..=63` must match the list exactly.
    pub fn set_out_path(&mut self, len: i8, path: &[u8]) -> Result<&mut Self, Error> {
        if len == FLOOD_PATH {
            if !path.is_empty() {
                return Err(Error::BadField("out path"));
            }
        } else if len < 0 || path.len() != len as usize || path.len() > MAX_PATH_LEN {
            return Err(Error::BadField("out path"));
        }
        let d = self.data.as_mut();
        d[35] = len as u8;
        d[36..99].fill(0);
        d[36..36 + path.len()].copy_from_slice(path);
        Ok(self)
    }

    pub fn set_name(&mut self, name: &str) -> Result<&mut Self, Error> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::FieldTooLong("name"));
        }
        let d = self.data.as_mut();
        d[99..131].fill(0);
        d[99..99 + name.len()].copy_from_slice(name.as_bytes());
        Ok(self)
    }

    pub fn set_last_advert_ts(&mut self, ts: u32) -> &mut Self {
        self.data.as_mut()[131..135].copy_from_slice(&ts.to_le_bytes());
        self
    }

    pub fn set_lat_lon(&mut self, lat: i32, lon: i32) -> &mut Self {
        let d = self.data.as_mut();
        d[135..139].copy_from_slice(&lat.to_le_bytes());
        d[139..143].copy_from_slice(&lon.to_le_bytes());
        self
    }

    pub fn build(&self) -> &[u8] {
        &self.data.as_ref()[..CONTACT_CMD_LEN]
    }
}
