//! Value types shared across frames: fixed-length key identifiers, field
//! caps and unit conversions.

use crate::Error;

/// Maximum UTF-8 byte length of a message text.
pub const MAX_TEXT_LEN: usize = 160;
/// Maximum UTF-8 byte length of a node or contact name.
pub const MAX_NAME_LEN: usize = 31;
/// Maximum UTF-8 byte length of a session password.
pub const MAX_PASSWORD_LEN: usize = 31;
/// Maximum number of explicit hops in an outbound path.
pub const MAX_PATH_LEN: usize = 63;
/// Path length denoting flood routing (no directed path known).
pub const FLOOD_PATH: i8 = -1;
/// Size of the contact body carried by `CONTACT` and `NEW_ADVERT` frames,
/// excluding the leading code byte.
pub const CONTACT_BODY_LEN: usize = 146;
/// Upper bound on any logical frame this protocol produces.
pub const MAX_FRAME_LEN: usize = 256;

macro_rules! fixed_len_key {
    (
        $(#[$outer:meta])*
        struct $type:ident[$size:expr];
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
        pub struct $type([u8; $size]);

        impl $type {
            /// Length of this identifier in bytes.
            pub const LEN: usize = $size;

            pub const fn new(bytes: [u8; $size]) -> Self {
                $type(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $size] {
                &self.0
            }
        }

        impl From<[u8; $size]> for $type {
            fn from(bytes: [u8; $size]) -> Self {
                $type(bytes)
            }
        }

        impl TryFrom<&[u8]> for $type {
            type Error = Error;

            fn try_from(slice: &[u8]) -> Result<Self, Error> {
                if slice.len() != $size {
                    return Err(Error::BadField(stringify!($type)));
                }
                let mut bytes = [0u8; $size];
                bytes.copy_from_slice(slice);
                Ok($type(bytes))
            }
        }

        impl AsRef<[u8]> for $type {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl core::fmt::Display for $type {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                for byte in self.0.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    };
}

fixed_len_key! {
    /// A node's full 32-byte public key.
    struct PublicKey[32];
}

fixed_len_key! {
    /// The leading 6 bytes of a public key, used as the compact on-wire
    /// identifier for contacts and sessions.
    struct KeyPrefix[6];
}

fixed_len_key! {
    /// The leading 4 bytes of a public key, embedded in signed room posts
    /// to attribute the original author.
    struct AuthorPrefix[4];
}

impl PublicKey {
    /// The 6-byte wire identifier derived from this key.
    pub fn prefix(&self) -> KeyPrefix {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&self.0[..6]);
        KeyPrefix::new(bytes)
    }

    /// The 4-byte author identifier derived from this key.
    pub fn author_prefix(&self) -> AuthorPrefix {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.0[..4]);
        AuthorPrefix::new(bytes)
    }
}

impl KeyPrefix {
    /// Whether this prefix identifies the given key.
    pub fn matches(&self, key: &PublicKey) -> bool {
        self.0 == key.as_bytes()[..6]
    }
}

impl AuthorPrefix {
    /// Whether this prefix identifies the given key.
    pub fn matches(&self, key: &PublicKey) -> bool {
        self.0 == key.as_bytes()[..4]
    }
}

/// Kind of a mesh contact, as carried in advert and contact frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum ContactKind {
    /// A peer that exchanges direct text messages.
    Chat = 1,
    /// An admin endpoint accepting CLI commands.
    Repeater = 2,
    /// A room server that accepts posts and redistributes them.
    Room = 3,
}

impl TryFrom<u8> for ContactKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(ContactKind::Chat),
            2 => Ok(ContactKind::Repeater),
            3 => Ok(ContactKind::Room),
            _ => Err(Error::BadField("contact kind")),
        }
    }
}

/// Interpretation of a message's text payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum TextKind {
    /// Plain UTF-8 text.
    Plain = 0,
    /// A CLI command line for a repeater.
    CliData = 1,
    /// Room post: a 4-byte author prefix followed by plain text.
    SignedPlain = 2,
}

impl TryFrom<u8> for TextKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(TextKind::Plain),
            1 => Ok(TextKind::CliData),
            2 => Ok(TextKind::SignedPlain),
            _ => Err(Error::BadField("text kind")),
        }
    }
}

/// Converts a raw wire SNR (i8, quarter-dB steps) to dB.
pub fn snr_db(raw: i8) -> f32 {
    f32::from(raw) / 4.0
}

/// Converts a fixed-point coordinate (degrees x 10^6) to degrees.
pub fn degrees(micro: i32) -> f64 {
    f64::from(micro) / 1_000_000.0
}

/// Converts degrees to the fixed-point wire representation.
pub fn microdegrees(deg: f64) -> i32 {
    (deg * 1_000_000.0) as i32
}
