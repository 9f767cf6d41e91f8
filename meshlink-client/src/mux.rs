//! Thin request/response layer over [`Link::send`]: pairs each command
//! with a typed response, converts `ERROR` frames into
//! [`RequestError::Protocol`], and offers helpers for the common shapes.

use std::sync::Arc;
use std::time::Duration;

use meshlink_encoding::parser::{parse_response, Response};

use crate::config::Config;
use crate::link::{ConnectionState, Link, LinkError, ResponseStream};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("codec: {0}")]
    Codec(#[from] meshlink_encoding::Error),
    /// The radio answered `ERROR` with this reason code.
    #[error("radio error {0:#04x}")]
    Protocol(u8),
    #[error("no response within the timeout")]
    Timeout,
    /// The response decoded, but not to the shape this command expects.
    #[error("unexpected response")]
    UnexpectedResponse,
}

/// Fields of a `SENT` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentInfo {
    pub ack_code: u32,
    pub is_flood: bool,
    pub estimated_timeout_ms: u32,
}

#[derive(Clone)]
pub struct RequestMux {
    link: Link,
    config: Arc<Config>,
}

impl RequestMux {
    pub fn new(link: Link, config: Arc<Config>) -> Self {
        RequestMux { link, config }
    }

    pub fn link_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn is_ready(&self) -> bool {
        self.link.state() == ConnectionState::Ready
    }

    /// Raw exchange with the default response timeout; `Ok(None)` is a
    /// timeout the caller may treat as non-fatal.
    pub async fn raw(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, LinkError> {
        self.link.send(frame, self.config.response_timeout, false).await
    }

    /// Raw exchange with an explicit timeout and pairing-window handling,
    /// for the first-connection handshake.
    pub async fn raw_with(
        &self,
        frame: &[u8],
        timeout: Duration,
        pairing: bool,
    ) -> Result<Option<Vec<u8>>, LinkError> {
        self.link.send(frame, timeout, pairing).await
    }

    /// One exchange, classified: timeouts and `ERROR` frames become
    /// errors, anything else is returned parsed.
    pub async fn request(&self, frame: &[u8]) -> Result<Response<Vec<u8>>, RequestError> {
        let bytes = self.raw(frame).await?.ok_or(RequestError::Timeout)?;
        self.classify(bytes)
    }

    pub async fn request_with(
        &self,
        frame: &[u8],
        timeout: Duration,
        pairing: bool,
    ) -> Result<Response<Vec<u8>>, RequestError> {
        let bytes =
            self.raw_with(frame, timeout, pairing).await?.ok_or(RequestError::Timeout)?;
        self.classify(bytes)
    }

    fn classify(&self, bytes: Vec<u8>) -> Result<Response<Vec<u8>>, RequestError> {
        match parse_response(bytes)? {
            Response::Error(err) => Err(RequestError::Protocol(err.err_code())),
            response => Ok(response),
        }
    }

    /// Expect a bare `OK`.
    pub async fn expect_ok(&self, frame: &[u8]) -> Result<(), RequestError> {
        match self.request(frame).await? {
            Response::Ok(_) => Ok(()),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// Expect a `SENT` response carrying the ack bookkeeping.
    pub async fn expect_sent(&self, frame: &[u8]) -> Result<SentInfo, RequestError> {
        match self.request(frame).await? {
            Response::Sent(sent) => Ok(SentInfo {
                ack_code: sent.ack_code(),
                is_flood: sent.is_flood(),
                estimated_timeout_ms: sent.estimated_timeout_ms(),
            }),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// Open a streamed multi-frame response (contact sync).
    pub async fn stream(&self, frame: &[u8]) -> Result<ResponseStream, LinkError> {
        self.link.send_stream(frame).await
    }
}
