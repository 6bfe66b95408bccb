//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/smith_agent.sock";
pub const DEFAULT_MAILBOX_DIR: &str = "/var/run/elkeid_rasp";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    pub mailbox_dir: PathBuf,
    /// Fixed delay before every reconnect attempt. There is no backoff.
    pub reconnect_delay: Duration,
    /// Treat a connection with no inbound frame for this long as inactive.
    pub idle_timeout: Option<Duration>,
    /// Process id the mailbox file is keyed by.
    pub pid: u32,
    pub outbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            mailbox_dir: PathBuf::from(DEFAULT_MAILBOX_DIR),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            idle_timeout: None,
            pid: std::process::id(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `SMITH_SOCKET_PATH`, `SMITH_MAILBOX_DIR`,
    /// `SMITH_RECONNECT_SECS` and `SMITH_IDLE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("SMITH_SOCKET_PATH") {
            config.socket_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("SMITH_MAILBOX_DIR") {
            config.mailbox_dir = PathBuf::from(dir);
        }
        if let Some(delay) = parse_secs(&lookup, "SMITH_RECONNECT_SECS") {
            config.reconnect_delay = delay;
        }
        if let Some(timeout) = parse_secs(&lookup, "SMITH_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Some(timeout);
        }

        config
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_mailbox_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mailbox_dir = dir.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.parse::<f64>().map(Duration::try_from_secs_f64) {
        Ok(Ok(duration)) => Some(duration),
        _ => {
            tracing::warn!(key, value = %raw, "Ignoring invalid duration override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_agent_layout() {
        let config = ClientConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/var/run/smith_agent.sock"));
        assert_eq!(config.mailbox_dir, PathBuf::from("/var/run/elkeid_rasp"));
        assert_eq!(config.reconnect_delay, Duration::from_secs(60));
        assert!(config.idle_timeout.is_none());
        assert_eq!(config.pid, std::process::id());
    }

    #[test]
    fn env_overrides_apply() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SMITH_SOCKET_PATH", "/tmp/agent.sock"),
            ("SMITH_MAILBOX_DIR", "/tmp/mailbox"),
            ("SMITH_RECONNECT_SECS", "1.5"),
            ("SMITH_IDLE_TIMEOUT_SECS", "30"),
        ]));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/agent.sock"));
        assert_eq!(config.mailbox_dir, PathBuf::from("/tmp/mailbox"));
        assert_eq!(config.reconnect_delay, Duration::from_millis(1500));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn invalid_overrides_fall_back_to_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SMITH_RECONNECT_SECS", "soon"),
            ("SMITH_IDLE_TIMEOUT_SECS", "-4"),
        ]));
        assert_eq!(config.reconnect_delay, DEFAULT_RECONNECT_DELAY);
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn builders_set_fields() {
        let config = ClientConfig::new()
            .with_socket_path("/run/a.sock")
            .with_pid(7)
            .with_outbound_capacity(3)
            .with_idle_timeout(Duration::from_secs(5));
        assert_eq!(config.socket_path, PathBuf::from("/run/a.sock"));
        assert_eq!(config.pid, 7);
        assert_eq!(config.outbound_capacity, 3);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(5)));
    }
}
