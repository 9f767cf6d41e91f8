//! Radio-side contact operations: full-list sync, add/update/remove,
//! path maintenance. Local rows are upserted by public key so ids,
//! nicknames and unread counters survive a re-sync.

use std::sync::Arc;

use meshlink_encoding::creator;
use meshlink_encoding::parser::{ContactFrame, Response};
use meshlink_encoding::types::{PublicKey, MAX_FRAME_LEN};
use uuid::Uuid;

use crate::config::Config;
use crate::entity::{ActiveDevice, Contact};
use crate::mux::{RequestError, RequestMux};
use crate::store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    #[error("no active device")]
    NoActiveDevice,
    #[error("contact not found")]
    NotFound,
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<crate::link::LinkError> for ContactError {
    fn from(err: crate::link::LinkError) -> Self {
        ContactError::Request(RequestError::Link(err))
    }
}

impl From<meshlink_encoding::Error> for ContactError {
    fn from(err: meshlink_encoding::Error) -> Self {
        ContactError::Request(RequestError::Codec(err))
    }
}

pub struct ContactService {
    mux: RequestMux,
    store: Arc<dyn Store>,
    active: Arc<ActiveDevice>,
    config: Arc<Config>,
}

impl ContactService {
    pub fn new(
        mux: RequestMux,
        store: Arc<dyn Store>,
        active: Arc<ActiveDevice>,
        config: Arc<Config>,
    ) -> Self {
        ContactService { mux, store, active, config }
    }

    fn device_id(&self) -> Result<Uuid, ContactError> {
        self.active.get().map(|identity| identity.device_id).ok_or(ContactError::NoActiveDevice)
    }

    /// Pulls the radio's contact list, optionally restricted to entries
    /// modified after `since`, and upserts every row. Returns the count
    /// synced and the newest `last_modified` to feed back next time.
    pub async fn sync_contacts(&self, since: Option<u32>) -> Result<(u32, u32), ContactError> {
        let device_id = self.device_id()?;
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::get_contacts(&mut buf, since)?;
        let mut stream = self.mux.stream(frame).await?;

        let first = stream
            .next(self.config.response_timeout)
            .await?
            .ok_or(RequestError::Timeout)?;
        let expected = match meshlink_encoding::parser::parse_response(first)
            .map_err(RequestError::Codec)?
        {
            Response::ContactsStart(start) => start.count(),
            Response::Error(err) => return Err(RequestError::Protocol(err.err_code()).into()),
            _ => return Err(RequestError::UnexpectedResponse.into()),
        };

        let mut synced = 0u32;
        let last_modified = loop {
            let bytes = stream
                .next(self.config.response_timeout)
                .await?
                .ok_or(RequestError::Timeout)?;
            match meshlink_encoding::parser::parse_response(bytes).map_err(RequestError::Codec)? {
                Response::Contact(frame) => {
                    self.upsert_from_frame(device_id, &frame).await?;
                    synced += 1;
                }
                Response::EndOfContacts(end) => break end.last_modified(),
                _ => return Err(RequestError::UnexpectedResponse.into()),
            }
        };
        if synced != expected {
            log::debug!("contact sync announced {expected} entries, stored {synced}");
        }
        Ok((synced, last_modified))
    }

    /// Stores (or refreshes) a contact from its wire body, preserving
    /// local-only fields. Returns the row and whether it was new.
    pub(crate) async fn upsert_from_frame<T: AsRef<[u8]>>(
        &self,
        device_id: Uuid,
        frame: &ContactFrame<T>,
    ) -> Result<(Contact, bool), ContactError> {
        let key = frame.public_key();
        let existing = self.store.contact_by_key(device_id, &key).await?;
        let created = existing.is_none();
        let mut contact = existing.unwrap_or_else(|| Contact {
            id: Uuid::new_v4(),
            device_id,
            public_key: key,
            kind: meshlink_encoding::types::ContactKind::Chat,
            flags: 0,
            out_path_len: -1,
            out_path: Vec::new(),
            name: String::new(),
            last_advert_ts: 0,
            lat: 0,
            lon: 0,
            last_modified: 0,
            unread_count: 0,
            last_message_at: None,
            nickname: None,
            is_blocked: false,
            is_favorite: false,
        });
        contact.kind = frame.kind()?;
        contact.flags = frame.flags();
        contact.out_path_len = frame.out_path_len();
        contact.out_path = frame.out_path().to_vec();
        contact.name = frame.name()?.to_owned();
        contact.last_advert_ts = frame.last_advert_ts();
        contact.lat = frame.lat();
        contact.lon = frame.lon();
        contact.last_modified = frame.last_modified();
        self.store.save_contact(&contact).await?;
        Ok((contact, created))
    }

    /// Pushes a locally-edited contact to the radio and persists it.
    pub async fn add_or_update(&self, contact: &Contact) -> Result<(), ContactError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let mut creator = creator::ContactCreator::new(&mut buf[..])?;
        creator.set_public_key(&contact.public_key).set_kind(contact.kind).set_flags(contact.flags);
        creator.set_out_path(contact.out_path_len, &contact.out_path)?;
        creator.set_name(&contact.name)?;
        creator.set_last_advert_ts(contact.last_advert_ts).set_lat_lon(contact.lat, contact.lon);
        self.mux.expect_ok(creator.build()).await?;
        self.store.save_contact(contact).await?;
        Ok(())
    }

    /// Removes the contact on the radio and locally.
    pub async fn remove(&self, contact: &Contact) -> Result<(), ContactError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::remove_contact(&mut buf, &contact.public_key)?;
        self.mux.expect_ok(frame).await?;
        self.store.delete_contact(contact.id).await?;
        Ok(())
    }

    /// Fetches one contact from the radio by full key and upserts it.
    pub async fn fetch_by_key(&self, key: &PublicKey) -> Result<Contact, ContactError> {
        let device_id = self.device_id()?;
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::get_contact_by_key(&mut buf, key)?;
        match self.mux.request(frame).await? {
            Response::Contact(frame) => {
                let (contact, _) = self.upsert_from_frame(device_id, &frame).await?;
                Ok(contact)
            }
            _ => Err(RequestError::UnexpectedResponse.into()),
        }
    }

    /// Forces the radio's router back to flood mode for this contact and
    /// mirrors that in the store; the flood-fallback send path relies on
    /// the local mirror.
    pub async fn reset_path(&self, contact: &Contact) -> Result<(), ContactError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::reset_path(&mut buf, &contact.public_key)?;
        self.mux.expect_ok(frame).await?;
        let mut updated = self.store.contact_by_id(contact.id).await?.unwrap_or_else(|| contact.clone());
        updated.out_path_len = -1;
        updated.out_path.clear();
        self.store.save_contact(&updated).await?;
        Ok(())
    }

    /// Asks the radio to probe for a directed route; the result arrives
    /// later as a `PATH_UPDATED` push.
    pub async fn discover_path(&self, contact: &Contact) -> Result<(), ContactError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::path_discovery(&mut buf, &contact.public_key)?;
        self.mux.expect_ok(frame).await?;
        Ok(())
    }

    /// The hop list the radio last heard this contact's advert through.
    pub async fn advert_path(&self, contact: &Contact) -> Result<Vec<u8>, ContactError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::get_advert_path(&mut buf, &contact.public_key)?;
        match self.mux.request(frame).await? {
            Response::AdvertPath(path) => Ok(path.path().to_vec()),
            _ => Err(RequestError::UnexpectedResponse.into()),
        }
    }

    /// Re-broadcasts a contact card into the mesh.
    pub async fn share(&self, contact: &Contact) -> Result<(), ContactError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::share_contact(&mut buf, &contact.public_key)?;
        self.mux.expect_ok(frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use meshlink_encoding::types::{ContactKind, PublicKey};

    use crate::store::Store;
    use crate::test_util::*;

    #[tokio::test(start_paused = true)]
    async fn sync_streams_until_end_of_contacts() {
        let mut h = setup();
        h.connect_ready().await;

        let contacts = h.supervisor.contacts().clone();
        let task = tokio::spawn(async move { contacts.sync_contacts(None).await });

        let frame = h.handle.next_write().await;
        assert_eq!(frame, vec![0x04], "expected GET_CONTACTS");
        h.handle.respond(contacts_start_frame(2));
        h.handle.respond(contact_frame(
            0x03,
            &PublicKey::new([0x11; 32]),
            ContactKind::Chat,
            0,
            "ada",
        ));
        h.handle.respond(contact_frame(
            0x03,
            &PublicKey::new([0x22; 32]),
            ContactKind::Room,
            2,
            "lounge",
        ));
        h.handle.respond(end_of_contacts_frame(1_700_000_000));

        let (synced, last_modified) = task.await.unwrap().unwrap();
        assert_eq!(synced, 2);
        assert_eq!(last_modified, 1_700_000_000);

        let stored = h.supervisor.store().contacts(h.device_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|c| c.name == "ada" && c.kind == ContactKind::Chat));
        assert!(stored.iter().any(|c| c.name == "lounge" && c.kind == ContactKind::Room));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_since_is_forwarded_and_rows_are_upserted() {
        let mut h = setup();
        h.connect_ready().await;

        // locally-nicknamed contact whose card comes back refreshed
        let key = PublicKey::new([0x33; 32]);
        let mut seeded = h.seed_contact_keyed(key, ContactKind::Chat, -1).await;
        seeded.nickname = Some("shortcut".to_owned());
        seeded.unread_count = 4;
        h.store.save_contact(&seeded).await.unwrap();

        let contacts = h.supervisor.contacts().clone();
        let task = tokio::spawn(async move { contacts.sync_contacts(Some(0xAA55)).await });

        let frame = h.handle.next_write().await;
        assert_eq!(frame[0], 0x04);
        assert_eq!(u32::from_le_bytes(frame[1..5].try_into().unwrap()), 0xAA55);
        h.handle.respond(contacts_start_frame(1));
        h.handle.respond(contact_frame(0x03, &key, ContactKind::Chat, 1, "renamed"));
        h.handle.respond(end_of_contacts_frame(7));
        task.await.unwrap().unwrap();

        let stored = h.store.contact(seeded.id).unwrap();
        assert_eq!(stored.name, "renamed", "wire fields refreshed");
        assert_eq!(stored.out_path_len, 1);
        assert_eq!(stored.nickname.as_deref(), Some("shortcut"), "local fields kept");
        assert_eq!(stored.unread_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_path_mirrors_flood_locally() {
        let mut h = setup();
        h.connect_ready().await;
        let mut contact = h.seed_contact(ContactKind::Chat, 3).await;
        contact.out_path = vec![1, 2, 3];
        h.store.save_contact(&contact).await.unwrap();

        let contacts = h.supervisor.contacts().clone();
        let target = contact.clone();
        let task = tokio::spawn(async move { contacts.reset_path(&target).await });

        let frame = h.handle.next_write().await;
        assert_eq!(frame[0], 0x0D);
        h.handle.respond(ok_frame());
        task.await.unwrap().unwrap();

        let stored = h.store.contact(contact.id).unwrap();
        assert_eq!(stored.out_path_len, -1);
        assert!(stored.out_path.is_empty());
    }
}
