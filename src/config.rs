//! Service configuration.
//!
//! [`LinkerConfig`] covers the process (listen address, storage root, bridge
//! location); [`SessionTimings`] covers the session state machine and is
//! what tests shrink to milliseconds.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Timers and limits that drive every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTimings {
    /// Wait before requesting a pairing code.
    pub pairing_settle: Duration,
    /// Wait between `open` and `connected`.
    pub open_settle: Duration,
    /// Wait before reopening a closed connection.
    pub reconnect_delay: Duration,
    /// How long a connected session lingers before cleanup.
    pub cleanup_delay: Duration,
    /// Age after which an unfinished session is evicted.
    pub session_ttl: Duration,
    pub reap_interval: Duration,
    /// Consecutive reconnects allowed without reaching `open`. `None` retries
    /// forever.
    pub max_reconnects: Option<u32>,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            pairing_settle: Duration::from_secs(10),
            open_settle: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            cleanup_delay: Duration::from_secs(60),
            session_ttl: Duration::from_secs(900),
            reap_interval: Duration::from_secs(30),
            max_reconnects: None,
        }
    }
}

impl SessionTimings {
    pub fn with_pairing_settle(mut self, delay: Duration) -> Self {
        self.pairing_settle = delay;
        self
    }

    pub fn with_open_settle(mut self, delay: Duration) -> Self {
        self.open_settle = delay;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_max_reconnects(mut self, max: Option<u32>) -> Self {
        self.max_reconnects = max;
        self
    }
}

/// Process configuration.
///
/// # Example
///
/// ```ignore
/// use matdev_linker::config::LinkerConfig;
///
/// let config = LinkerConfig::from_env()
///     .with_port(0)
///     .with_sessions_dir("/tmp/sessions");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkerConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Root of the per-identifier credential slots
    pub sessions_dir: PathBuf,
    /// The single origin allowed by CORS
    pub allowed_origin: String,
    /// WebSocket URL of the handshake bridge
    pub bridge_url: String,
    pub timings: SessionTimings,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            sessions_dir: PathBuf::from("./sessions"),
            allowed_origin: "https://matdevlinker.vercel.app".to_string(),
            bridge_url: "ws://127.0.0.1:8787/link".to_string(),
            timings: SessionTimings::default(),
        }
    }
}

impl LinkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_sessions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sessions_dir = dir.into();
        self
    }

    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origin = origin.into();
        self
    }

    pub fn with_bridge_url(mut self, url: impl Into<String>) -> Self {
        self.bridge_url = url.into();
        self
    }

    pub fn with_timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Build the configuration from the environment.
    ///
    /// Unset variables keep their defaults; malformed ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = parse_env("PORT") {
            config.port = port;
        }
        if let Some(bind) = parse_env("MATDEV_BIND") {
            config.bind = bind;
        }
        if let Some(dir) = non_empty_env("MATDEV_SESSIONS_DIR") {
            config.sessions_dir = PathBuf::from(dir);
        }
        if let Some(origin) = non_empty_env("MATDEV_ALLOWED_ORIGIN") {
            config.allowed_origin = origin;
        }
        if let Some(url) = non_empty_env("MATDEV_BRIDGE_URL") {
            config.bridge_url = url;
        }
        if let Some(max) = parse_env::<u32>("MATDEV_MAX_RECONNECTS") {
            config.timings.max_reconnects = Some(max);
        }
        if let Some(secs) = parse_env::<u64>("MATDEV_SESSION_TTL_SECS") {
            config.timings.session_ttl = Duration::from_secs(secs);
        }

        config
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = non_empty_env(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 7] = [
        "PORT",
        "MATDEV_BIND",
        "MATDEV_SESSIONS_DIR",
        "MATDEV_ALLOWED_ORIGIN",
        "MATDEV_BRIDGE_URL",
        "MATDEV_MAX_RECONNECTS",
        "MATDEV_SESSION_TTL_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_timings() {
        let timings = SessionTimings::default();
        assert_eq!(timings.pairing_settle, Duration::from_secs(10));
        assert_eq!(timings.open_settle, Duration::from_secs(10));
        assert_eq!(timings.reconnect_delay, Duration::from_secs(5));
        assert_eq!(timings.cleanup_delay, Duration::from_secs(60));
        assert_eq!(timings.max_reconnects, None);
    }

    #[test]
    fn test_builder() {
        let config = LinkerConfig::new()
            .with_port(8080)
            .with_bind(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_allowed_origin("http://localhost:5173");
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8080");
        assert_eq!(config.allowed_origin, "http://localhost:5173");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        assert_eq!(LinkerConfig::from_env(), LinkerConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("PORT", "4100");
        std::env::set_var("MATDEV_SESSIONS_DIR", "/var/lib/matdev");
        std::env::set_var("MATDEV_BRIDGE_URL", "wss://bridge.internal/link");
        std::env::set_var("MATDEV_MAX_RECONNECTS", "3");
        std::env::set_var("MATDEV_SESSION_TTL_SECS", "120");

        let config = LinkerConfig::from_env();
        assert_eq!(config.port, 4100);
        assert_eq!(config.sessions_dir, PathBuf::from("/var/lib/matdev"));
        assert_eq!(config.bridge_url, "wss://bridge.internal/link");
        assert_eq!(config.timings.max_reconnects, Some(3));
        assert_eq!(config.timings.session_ttl, Duration::from_secs(120));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage() {
        clear_env();
        std::env::set_var("PORT", "not-a-port");
        std::env::set_var("MATDEV_BIND", "nowhere");
        std::env::set_var("MATDEV_ALLOWED_ORIGIN", "   ");

        let config = LinkerConfig::from_env();
        assert_eq!(config.port, 3000);
        assert_eq!(config.bind, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.allowed_origin, "https://matdevlinker.vercel.app");

        clear_env();
    }
}
