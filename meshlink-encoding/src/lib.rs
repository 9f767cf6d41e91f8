//! This crate implements frame handling and parsing for the companion
//! serial protocol spoken between a host application and a LoRa mesh radio
//! over a Nordic-UART-style link.
//!
//! Every frame is a byte string whose first byte is a code: commands
//! (host to radio) use one code space, responses (`< 0x80`) and push
//! notifications (`>= 0x80`) use another. All integers are little-endian.
//!
//! [`parser`] provides zero-copy views over received response and push
//! frames; [`creator`] provides builders that write command frames into a
//! caller-supplied buffer.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codes;
pub mod creator;
pub mod parser;
pub mod types;

/// Errors raised while reading or writing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// The frame ends before a required field.
    ShortFrame,
    /// The leading code byte is not one this codec knows.
    UnknownCode(u8),
    /// A field failed validation; carries the field name.
    BadField(&'static str),
    /// The caller-supplied buffer cannot hold the frame being built.
    BufferTooShort,
    /// A variable-length field exceeds its wire cap; carries the field name.
    FieldTooLong(&'static str),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::ShortFrame => write!(f, "frame too short"),
            Error::UnknownCode(code) => write!(f, "unknown frame code {code:#04x}"),
            Error::BadField(name) => write!(f, "bad field: {name}"),
            Error::BufferTooShort => write!(f, "buffer too short"),
            Error::FieldTooLong(name) => write!(f, "field too long: {name}"),
        }
    }
}

impl core::error::Error for Error {}
