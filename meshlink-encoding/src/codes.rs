//! Frame code assignments.
//!
//! Any inbound frame whose first byte has the high bit set is a push
//! notification; everything below `0x80` is a response to the single
//! outstanding command.

/// Commands, host to radio.
pub mod cmd {
    pub const APP_START: u8 = 0x01;
    pub const SEND_TEXT_MSG: u8 = 0x02;
    pub const SEND_CHAN_MSG: u8 = 0x03;
    pub const GET_CONTACTS: u8 = 0x04;
    pub const GET_DEVICE_TIME: u8 = 0x05;
    pub const SET_DEVICE_TIME: u8 = 0x06;
    pub const SEND_SELF_ADVERT: u8 = 0x07;
    pub const SET_ADVERT_NAME: u8 = 0x08;
    pub const ADD_UPDATE_CONTACT: u8 = 0x09;
    pub const SYNC_NEXT_MESSAGE: u8 = 0x0A;
    pub const SET_RADIO_PARAMS: u8 = 0x0B;
    pub const SET_RADIO_TX_POWER: u8 = 0x0C;
    pub const RESET_PATH: u8 = 0x0D;
    pub const SET_ADVERT_LATLON: u8 = 0x0E;
    pub const REMOVE_CONTACT: u8 = 0x0F;
    pub const SHARE_CONTACT: u8 = 0x10;
    pub const REBOOT: u8 = 0x13;
    pub const GET_BATTERY_AND_STORAGE: u8 = 0x14;
    pub const DEVICE_QUERY: u8 = 0x16;
    pub const SEND_LOGIN: u8 = 0x1A;
    pub const LOGOUT: u8 = 0x1D;
    pub const GET_CONTACT_BY_KEY: u8 = 0x1E;
    pub const SET_DEVICE_PIN: u8 = 0x25;
    pub const SET_OTHER_PARAMS: u8 = 0x26;
    pub const GET_ADVERT_PATH: u8 = 0x2A;
    pub const SEND_BINARY_REQ: u8 = 0x2B;
    pub const FACTORY_RESET: u8 = 0x2C;
    pub const PATH_DISCOVERY: u8 = 0x2D;
}

/// Responses, radio to host, `< 0x80`.
pub mod resp {
    pub const OK: u8 = 0x00;
    pub const ERROR: u8 = 0x01;
    pub const CONTACTS_START: u8 = 0x02;
    pub const CONTACT: u8 = 0x03;
    pub const END_OF_CONTACTS: u8 = 0x04;
    pub const SELF_INFO: u8 = 0x05;
    pub const SENT: u8 = 0x06;
    /// Legacy (v < 3) direct-message frame; accepted and ignored.
    pub const CONTACT_MSG: u8 = 0x07;
    /// Legacy (v < 3) channel-message frame; accepted and ignored.
    pub const CHANNEL_MSG: u8 = 0x08;
    pub const CURR_TIME: u8 = 0x09;
    pub const NO_MORE_MESSAGES: u8 = 0x0A;
    pub const BATTERY_AND_STORAGE: u8 = 0x0C;
    pub const DEVICE_INFO: u8 = 0x0D;
    pub const CONTACT_MSG_V3: u8 = 0x10;
    pub const CHANNEL_MSG_V3: u8 = 0x11;
    pub const ADVERT_PATH: u8 = 0x16;
}

/// Push notifications, radio to host, `>= 0x80`.
pub mod push {
    pub const ADVERT: u8 = 0x80;
    pub const PATH_UPDATED: u8 = 0x81;
    pub const MESSAGES_WAITING: u8 = 0x83;
    pub const SEND_CONFIRMED: u8 = 0x84;
    pub const LOGIN_RESULT: u8 = 0x85;
    pub const NEW_ADVERT: u8 = 0x8A;
    pub const BINARY_RESPONSE: u8 = 0x8B;
}

/// Subtypes carried by [`cmd::SEND_BINARY_REQ`].
pub mod binary_req {
    pub const STATUS: u8 = 0x01;
    pub const KEEP_ALIVE: u8 = 0x02;
    pub const TELEMETRY: u8 = 0x03;
    pub const MMA: u8 = 0x04;
    pub const ACL: u8 = 0x05;
    pub const NEIGHBOURS: u8 = 0x06;
}

/// First byte of a push frame has the high bit set.
pub const PUSH_BIT: u8 = 0x80;

/// Returns true when `code` belongs to the push code space.
pub const fn is_push(code: u8) -> bool {
    code & PUSH_BIT != 0
}
