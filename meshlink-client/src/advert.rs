//! Handles advertisement pushes: contact discovery, advert refreshes and
//! route updates reported by the radio.

use std::sync::Arc;

use meshlink_encoding::parser::ContactFrame;
use meshlink_encoding::types::KeyPrefix;

use crate::contact::ContactService;
use crate::entity::ActiveDevice;
use crate::event::{Event, EventSender};
use crate::store::Store;

pub struct AdvertHandler {
    store: Arc<dyn Store>,
    contacts: Arc<ContactService>,
    events: EventSender,
    active: Arc<ActiveDevice>,
}

impl AdvertHandler {
    pub fn new(
        store: Arc<dyn Store>,
        contacts: Arc<ContactService>,
        events: EventSender,
        active: Arc<ActiveDevice>,
    ) -> Self {
        AdvertHandler { store, contacts, events, active }
    }

    /// `ADVERT`: a known node re-announced itself; refresh its timestamp.
    pub async fn handle_advert(&self, prefix: KeyPrefix, timestamp: u32) {
        let Some(identity) = self.active.get() else {
            return;
        };
        match self.store.contact_by_prefix(identity.device_id, &prefix).await {
            Ok(Some(mut contact)) => {
                contact.last_advert_ts = timestamp;
                if let Err(err) = self.store.save_contact(&contact).await {
                    log::warn!("failed to persist advert refresh: {err}");
                }
            }
            Ok(None) => log::debug!("advert from unknown prefix {prefix}"),
            Err(err) => log::warn!("advert lookup failed: {err}"),
        }
    }

    /// `PATH_UPDATED`: the radio learned (or lost) a directed route.
    pub async fn handle_path_updated(&self, prefix: KeyPrefix, new_path_len: i8) {
        let Some(identity) = self.active.get() else {
            return;
        };
        match self.store.contact_by_prefix(identity.device_id, &prefix).await {
            Ok(Some(mut contact)) => {
                contact.out_path_len = new_path_len;
                // The push carries only the length; stale hop bytes are
                // dropped unless they still fit the new length.
                if new_path_len <= 0 || contact.out_path.len() != new_path_len as usize {
                    contact.out_path.clear();
                }
                if let Err(err) = self.store.save_contact(&contact).await {
                    log::warn!("failed to persist path update: {err}");
                    return;
                }
                self.events.emit(Event::ContactPathUpdated {
                    contact_id: contact.id,
                    path_len: new_path_len,
                });
            }
            Ok(None) => log::debug!("path update for unknown prefix {prefix}"),
            Err(err) => log::warn!("path update lookup failed: {err}"),
        }
    }

    /// `NEW_ADVERT`: a full contact card; create or refresh the row.
    pub async fn handle_new_advert<T: AsRef<[u8]>>(&self, frame: &ContactFrame<T>) {
        let Some(identity) = self.active.get() else {
            return;
        };
        match self.contacts.upsert_from_frame(identity.device_id, frame).await {
            Ok((contact, created)) => {
                if created {
                    self.events.emit(Event::ContactDiscovered { contact_id: contact.id });
                }
            }
            Err(err) => log::warn!("failed to store advertised contact: {err}"),
        }
    }
}
