//! Remote-node sessions: login correlation by key prefix, per-room
//! keep-alive, re-authentication after reconnects and the repeater CLI
//! path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use meshlink_encoding::codes::binary_req;
use meshlink_encoding::creator::{self, BinaryReqCreator, LoginCreator, TextMsgCreator};
use meshlink_encoding::types::{KeyPrefix, PublicKey, TextKind, MAX_FRAME_LEN};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::entity::{
    unix_time_now, ActiveDevice, PermissionLevel, RemoteNodeSession, SessionRole,
};
use crate::event::{Event, EventSender};
use crate::link::LinkError;
use crate::mux::{RequestError, RequestMux};
use crate::secret::{SecretError, SecretStore};
use crate::store::{Store, StoreError};


#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    SessionNotFound,
    #[error("no password stored for this session")]
    PasswordNotFound,
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("permission denied")]
    PermissionDenied,
    /// Keep-alive skipped: the server contact has no directed route.
    #[error("contact is flood-routed")]
    FloodRouted,
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Request(#[from] RequestError),
}

impl From<meshlink_encoding::Error> for SessionError {
    fn from(err: meshlink_encoding::Error) -> Self {
        SessionError::Request(RequestError::Codec(err))
    }
}

/// Resolved outcome of a login exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginOutcome {
    pub success: bool,
    pub permission: PermissionLevel,
}

type LoginWaiter = oneshot::Sender<Result<LoginOutcome, SessionError>>;

pub struct SessionManager {
    mux: RequestMux,
    store: Arc<dyn Store>,
    secrets: Arc<dyn SecretStore>,
    events: EventSender,
    config: Arc<Config>,
    active: Arc<ActiveDevice>,
    /// At most one live login per wire identity; a duplicate cancels the
    /// older waiter. The token distinguishes which waiter a timeout owns.
    pending_logins: Mutex<HashMap<KeyPrefix, (u64, LoginWaiter)>>,
    pending_binary: Mutex<HashMap<u32, oneshot::Sender<Vec<u8>>>>,
    keep_alives: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    login_token: AtomicU64,
    reauth_running: AtomicBool,
}

fn password_key(session: &RemoteNodeSession) -> String {
    format!("{}/{}", session.device_id, session.public_key)
}

impl SessionManager {
    pub fn new(
        mux: RequestMux,
        store: Arc<dyn Store>,
        secrets: Arc<dyn SecretStore>,
        events: EventSender,
        config: Arc<Config>,
        active: Arc<ActiveDevice>,
    ) -> Self {
        SessionManager {
            mux,
            store,
            secrets,
            events,
            config,
            active,
            pending_logins: Mutex::new(HashMap::new()),
            pending_binary: Mutex::new(HashMap::new()),
            keep_alives: Mutex::new(HashMap::new()),
            login_token: AtomicU64::new(0),
            reauth_running: AtomicBool::new(false),
        }
    }

    fn device_id(&self) -> Result<Uuid, SessionError> {
        self.active
            .get()
            .map(|identity| identity.device_id)
            .ok_or(SessionError::Link(LinkError::NotConnected))
    }

    /// Persists a new session record and optionally its password.
    pub async fn create_session(
        &self,
        public_key: PublicKey,
        role: SessionRole,
        name: &str,
        password: Option<&str>,
    ) -> Result<RemoteNodeSession, SessionError> {
        let device_id = self.device_id()?;
        let session = RemoteNodeSession::new(device_id, public_key, role, name);
        self.store.save_session(&session).await?;
        if let Some(password) = password {
            self.secrets.store_password(&password_key(&session), password).await?;
        }
        Ok(session)
    }

    /// Sends `SEND_LOGIN` and suspends until the matching `LOGIN_RESULT`
    /// push arrives or the per-login timeout elapses. The timeout scales
    /// with the known hop count to the server.
    pub async fn login(&self, session_id: Uuid) -> Result<LoginOutcome, SessionError> {
        if !self.mux.is_ready() {
            return Err(LinkError::NotConnected.into());
        }
        let device_id = self.device_id()?;
        let session =
            self.store.session_by_id(session_id).await?.ok_or(SessionError::SessionNotFound)?;
        let password = self
            .secrets
            .retrieve_password(&password_key(&session))
            .await?
            .ok_or(SessionError::PasswordNotFound)?;

        let path_len = self
            .store
            .contact_by_key(device_id, &session.public_key)
            .await?
            .map(|contact| contact.out_path_len.max(0) as u8)
            .unwrap_or(0);
        let wait = self.config.login_timeout(path_len);

        let prefix = session.prefix();
        let token = self.login_token.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_logins.lock().expect("session lock");
            if let Some((_, old)) = pending.insert(prefix, (token, tx)) {
                let _ = old.send(Err(SessionError::Cancelled));
            }
        }

        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = {
            let mut login = LoginCreator::new(&mut buf[..])?;
            login.set_public_key(&session.public_key);
            login.set_password(&password)?;
            login.build().to_vec()
        };
        if let Err(err) = self.mux.expect_sent(&frame).await {
            self.remove_login_waiter(&prefix, token);
            return Err(err.into());
        }

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SessionError::Cancelled),
            Err(_) => {
                self.remove_login_waiter(&prefix, token);
                Err(SessionError::LoginFailed("timed out".into()))
            }
        }
    }

    fn remove_login_waiter(&self, prefix: &KeyPrefix, token: u64) {
        let mut pending = self.pending_logins.lock().expect("session lock");
        if pending.get(prefix).map(|(t, _)| *t) == Some(token) {
            pending.remove(prefix);
        }
    }

    /// `LOGIN_RESULT` push: persist the outcome and resume the waiter.
    pub async fn handle_login_result(
        self: &Arc<Self>,
        prefix: KeyPrefix,
        success: bool,
        acl: Option<u8>,
    ) {
        let waiter = {
            let mut pending = self.pending_logins.lock().expect("session lock");
            pending.remove(&prefix).map(|(_, tx)| tx)
        };
        let Ok(device_id) = self.device_id() else {
            return;
        };
        let session = match self.store.session_by_prefix(device_id, &prefix).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                log::warn!("login result for unknown session prefix {prefix}");
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(SessionError::SessionNotFound));
                }
                return;
            }
            Err(err) => {
                log::warn!("session lookup failed: {err}");
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(err.into()));
                }
                return;
            }
        };

        let permission = PermissionLevel::from_acl(acl.unwrap_or(0));
        let persist = async {
            self.store.update_session_connected(session.id, success).await?;
            if success {
                self.store.update_session_permission(session.id, permission).await?;
            }
            Ok::<(), StoreError>(())
        };
        if let Err(err) = persist.await {
            log::warn!("failed to persist login result: {err}");
        }
        if success && session.role == SessionRole::Room {
            self.start_keep_alive(session.id);
        }
        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(LoginOutcome { success, permission }));
        }
    }

    /// Number of binary requests still awaiting their response push.
    pub fn pending_binary_count(&self) -> usize {
        self.pending_binary.lock().expect("session lock").len()
    }

    /// `BINARY_RESPONSE` push: resolve the request waiting on this tag.
    pub async fn handle_binary_response(&self, tag: u32, payload: &[u8]) {
        let waiter = self.pending_binary.lock().expect("session lock").remove(&tag);
        match waiter {
            Some(tx) => {
                let _ = tx.send(payload.to_vec());
            }
            None => log::debug!("binary response with unknown tag {tag:#010x}"),
        }
    }

    /// Typed binary request to a remote node, correlated by the ack code
    /// echoed back as the response tag.
    pub async fn binary_request(
        &self,
        key: &PublicKey,
        req_type: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = {
            let mut req = BinaryReqCreator::new(&mut buf[..])?;
            req.set_recipient(key).set_req_type(req_type);
            req.set_payload(payload)?;
            req.build().to_vec()
        };
        let sent = self.mux.expect_sent(&frame).await?;
        let (tx, rx) = oneshot::channel();
        self.pending_binary.lock().expect("session lock").insert(sent.ack_code, tx);
        match tokio::time::timeout(self.config.ack_timeout(sent.estimated_timeout_ms), rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(SessionError::Cancelled),
            Err(_) => {
                self.pending_binary.lock().expect("session lock").remove(&sent.ack_code);
                Err(RequestError::Timeout.into())
            }
        }
    }

    /// Remote status snapshot (repeater/room admin surface).
    pub async fn request_status(&self, session_id: Uuid) -> Result<Vec<u8>, SessionError> {
        let session =
            self.store.session_by_id(session_id).await?.ok_or(SessionError::SessionNotFound)?;
        self.binary_request(&session.public_key, binary_req::STATUS, &[]).await
    }

    /// Remote telemetry snapshot.
    pub async fn request_telemetry(&self, session_id: Uuid) -> Result<Vec<u8>, SessionError> {
        let session =
            self.store.session_by_id(session_id).await?.ok_or(SessionError::SessionNotFound)?;
        self.binary_request(&session.public_key, binary_req::TELEMETRY, &[]).await
    }

    fn start_keep_alive(self: &Arc<Self>, session_id: Uuid) {
        let manager = self.clone();
        let interval = self.config.keep_alive_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match manager.keep_alive_tick(session_id).await {
                    Ok(()) => {}
                    Err(SessionError::FloodRouted) => {
                        // The server will time us out; the next send
                        // re-authenticates.
                        log::debug!("keep-alive skipped, session {session_id} is flood-routed");
                    }
                    Err(err) => log::warn!("keep-alive for session {session_id} failed: {err}"),
                }
            }
        });
        let mut keep_alives = self.keep_alives.lock().expect("session lock");
        if let Some(old) = keep_alives.insert(session_id, handle) {
            old.abort();
        }
    }

    fn stop_keep_alive(&self, session_id: Uuid) {
        if let Some(handle) = self.keep_alives.lock().expect("session lock").remove(&session_id) {
            handle.abort();
        }
    }

    /// One keep-alive exchange. The server's reply carries how many room
    /// posts the host has not drained yet.
    async fn keep_alive_tick(&self, session_id: Uuid) -> Result<(), SessionError> {
        let device_id = self.device_id()?;
        let session =
            self.store.session_by_id(session_id).await?.ok_or(SessionError::SessionNotFound)?;
        if !session.is_connected {
            return Ok(());
        }
        let directed = self
            .store
            .contact_by_key(device_id, &session.public_key)
            .await?
            .map(|contact| contact.out_path_len >= 0)
            .unwrap_or(false);
        if !directed {
            return Err(SessionError::FloodRouted);
        }
        let reply =
            self.binary_request(&session.public_key, binary_req::KEEP_ALIVE, &[]).await?;
        if let Some(&unsynced) = reply.first() {
            if unsynced > 0 {
                self.events.emit(Event::SessionUnsynced { session_id, count: unsynced });
            }
        }
        Ok(())
    }

    /// Best-effort logout: the wire command may fail, the local state
    /// always ends disconnected.
    pub async fn logout(&self, session_id: Uuid) -> Result<(), SessionError> {
        let session =
            self.store.session_by_id(session_id).await?.ok_or(SessionError::SessionNotFound)?;
        self.stop_keep_alive(session_id);
        if self.mux.is_ready() {
            let mut buf = [0u8; MAX_FRAME_LEN];
            match creator::logout(&mut buf, &session.public_key) {
                Ok(frame) => {
                    if let Err(err) = self.mux.expect_ok(frame).await {
                        log::debug!("logout command failed: {err}");
                    }
                }
                Err(err) => log::debug!("could not encode logout: {err}"),
            }
        }
        self.store.update_session_connected(session_id, false).await?;
        Ok(())
    }

    /// Logs out, deletes the stored password and removes the record.
    pub async fn remove_session(&self, session_id: Uuid) -> Result<(), SessionError> {
        let session =
            self.store.session_by_id(session_id).await?.ok_or(SessionError::SessionNotFound)?;
        if let Err(err) = self.logout(session_id).await {
            log::debug!("logout before removal failed: {err}");
        }
        if let Err(err) = self.secrets.delete_password(&password_key(&session)).await {
            log::warn!("failed to delete session password: {err}");
        }
        self.store.delete_session(session_id).await?;
        Ok(())
    }

    /// CLI command to an admin repeater session, sent as `cli_data` text.
    pub async fn send_cli_command(
        &self,
        session_id: Uuid,
        command: &str,
    ) -> Result<(), SessionError> {
        let session =
            self.store.session_by_id(session_id).await?.ok_or(SessionError::SessionNotFound)?;
        if session.role != SessionRole::Repeater || session.permission != PermissionLevel::Admin {
            return Err(SessionError::PermissionDenied);
        }
        if !self.mux.is_ready() {
            return Err(LinkError::NotConnected.into());
        }
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = {
            let mut creator = TextMsgCreator::new(&mut buf[..])?;
            creator
                .set_text_kind(TextKind::CliData)
                .set_timestamp(unix_time_now())
                .set_recipient(&session.prefix());
            creator.set_text(command)?;
            creator.build().to_vec()
        };
        self.mux.expect_sent(&frame).await?;
        Ok(())
    }

    /// After an auto-reconnect: re-login every session that was connected,
    /// in parallel. Guarded so overlapping reconnects run one pass.
    pub async fn handle_reconnection(self: &Arc<Self>) {
        if self.reauth_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let result = self.reauth_all().await;
        self.reauth_running.store(false, Ordering::SeqCst);
        if let Err(err) = result {
            log::warn!("session re-authentication pass failed: {err}");
        }
    }

    async fn reauth_all(&self) -> Result<(), SessionError> {
        let device_id = self.device_id()?;
        let sessions = self.store.sessions(device_id).await?;
        let connected: Vec<_> =
            sessions.into_iter().filter(|session| session.is_connected).collect();
        if connected.is_empty() {
            return Ok(());
        }
        log::info!("re-authenticating {} session(s) after reconnect", connected.len());
        let logins = connected.iter().map(|session| {
            let session_id = session.id;
            async move {
                match self.login(session_id).await {
                    Ok(outcome) if outcome.success => {}
                    Ok(_) | Err(_) => {
                        log::warn!("re-login failed for session {session_id}");
                        if let Err(err) =
                            self.store.update_session_connected(session_id, false).await
                        {
                            log::warn!("failed to mark session disconnected: {err}");
                        }
                        self.events.emit(Event::SessionDisconnected { session_id });
                    }
                }
            }
        });
        join_all(logins).await;
        Ok(())
    }

    /// Real link loss: cancel every waiter and keep-alive, mark sessions
    /// disconnected. The next connect starts from a clean slate.
    pub async fn handle_disconnect(&self) {
        {
            let mut keep_alives = self.keep_alives.lock().expect("session lock");
            for (_, handle) in keep_alives.drain() {
                handle.abort();
            }
        }
        {
            let mut pending = self.pending_logins.lock().expect("session lock");
            for (_, (_, waiter)) in pending.drain() {
                let _ = waiter.send(Err(SessionError::Cancelled));
            }
        }
        self.pending_binary.lock().expect("session lock").clear();

        let Ok(device_id) = self.device_id() else {
            return;
        };
        match self.store.sessions(device_id).await {
            Ok(sessions) => {
                for session in sessions.into_iter().filter(|session| session.is_connected) {
                    if let Err(err) =
                        self.store.update_session_connected(session.id, false).await
                    {
                        log::warn!("failed to mark session disconnected: {err}");
                    }
                }
            }
            Err(err) => log::warn!("session cleanup after disconnect failed: {err}"),
        }
    }
}
