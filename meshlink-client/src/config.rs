//! Engine tunables. Defaults match the radio firmware's documented
//! behavior; anything here can be overridden before handing the config to
//! the supervisor.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Total send attempts for a direct message.
    pub max_attempts: u8,
    /// Attempts allowed once the message is flood-routed.
    pub max_flood_attempts: u8,
    /// Attempt index at which the contact's path is reset to flood.
    pub flood_after: u8,
    /// Base backoff between attempts; attempt `n` waits `n` times this.
    pub attempt_backoff: Duration,
    /// Multiplier applied to the radio's round-trip estimate.
    pub ack_timeout_factor: f64,
    /// Floor for the per-message ack wait.
    pub min_ack_timeout: Duration,
    /// Period of the pending-ack expiry sweep.
    pub expiry_tick: Duration,
    /// How long a delivered entry lingers so duplicate acks still count.
    pub delivered_grace: Duration,
    /// Room keep-alive period.
    pub keep_alive_interval: Duration,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    /// First-connection budget; spans the OS pairing dialog.
    pub setup_timeout: Duration,
    /// Window in which pairing-related write errors are tolerated.
    pub pairing_window: Duration,
    /// Delay between write retries inside the pairing window.
    pub pairing_retry_delay: Duration,
    /// Settling delay after re-subscribing on an auto-reconnect.
    pub resubscribe_delay: Duration,
    pub login_base_timeout: Duration,
    /// Extra login wait per known hop to the server.
    pub login_per_hop: Duration,
    pub login_max_timeout: Duration,
    /// Companion protocol version sent in `DEVICE_QUERY`.
    pub protocol_version: u8,
    pub app_name: String,
    pub app_ver: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_attempts: 3,
            max_flood_attempts: 2,
            flood_after: 2,
            attempt_backoff: Duration::from_millis(200),
            ack_timeout_factor: 1.2,
            min_ack_timeout: Duration::from_secs(5),
            expiry_tick: Duration::from_secs(5),
            delivered_grace: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(5),
            setup_timeout: Duration::from_secs(40),
            pairing_window: Duration::from_secs(35),
            pairing_retry_delay: Duration::from_millis(500),
            resubscribe_delay: Duration::from_millis(150),
            login_base_timeout: Duration::from_secs(5),
            login_per_hop: Duration::from_secs(10),
            login_max_timeout: Duration::from_secs(60),
            protocol_version: 3,
            app_name: "meshlink".to_owned(),
            app_ver: 1,
        }
    }
}

impl Config {
    /// Ack wait for one attempt: the radio's estimate scaled by
    /// [`ack_timeout_factor`](Config::ack_timeout_factor), floored at
    /// [`min_ack_timeout`](Config::min_ack_timeout).
    pub fn ack_timeout(&self, estimated_ms: u32) -> Duration {
        let scaled = Duration::from_millis((f64::from(estimated_ms) * self.ack_timeout_factor) as u64);
        scaled.max(self.min_ack_timeout)
    }

    /// Login wait for a server `path_len` hops away, capped at
    /// [`login_max_timeout`](Config::login_max_timeout).
    pub fn login_timeout(&self, path_len: u8) -> Duration {
        let wait = self.login_base_timeout + self.login_per_hop * u32::from(path_len);
        wait.min(self.login_max_timeout)
    }
}
