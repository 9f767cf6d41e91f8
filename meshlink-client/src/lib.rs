//! Host-side protocol engine for a LoRa mesh companion radio.
//!
//! A phone-class host drives a nearby mesh radio over a Nordic-UART-style
//! BLE serial link: discovering contacts, exchanging text messages through
//! the mesh, keeping sessions with room servers and repeater admin
//! endpoints alive, and resolving end-to-end delivery acknowledgements
//! that arrive asynchronously as mesh hops relay a packet.
//!
//! The engine is assembled by [`Supervisor::new`] from three injected
//! capability ports:
//!
//! - [`link::driver::Driver`], the platform BLE serial driver,
//! - [`store::Store`], the durable store for devices, contacts, messages,
//!   channels and sessions,
//! - [`secret::SecretStore`], keychain-style storage for session
//!   passwords.
//!
//! Frame encoding and decoding lives in the sibling `meshlink-encoding`
//! crate, re-exported here as [`encoding`].

pub use meshlink_encoding as encoding;

pub mod advert;
pub mod config;
pub mod contact;
pub mod control;
pub mod entity;
pub mod event;
pub mod inbox;
pub mod link;
pub mod mux;
pub mod push;
pub mod secret;
pub mod send;
pub mod session;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod test_util;

pub use config::Config;
pub use event::{Event, EventReceiver};
pub use link::{ConnectionState, LinkError};
pub use supervisor::{ConnectError, Supervisor};
