//! Configuration for the tether binary
//!
//! CLI arguments and environment variable handling using clap.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;

use crate::notification::{socket_url, NotificationFormatter, DEFAULT_TEAM};
use crate::session::{BackoffPolicy, ClientConfig};

/// Tether - keeps a chat server websocket session alive
#[derive(Parser, Debug, Clone)]
#[command(name = "tether")]
#[command(about = "Resilient websocket session client for real-time chat services")]
pub struct Args {
    /// Chat server base URL; the socket URL is derived from it
    #[arg(long, env = "TETHER_SERVER_URL")]
    pub server_url: Option<String>,

    /// Explicit websocket URL, overrides the derived one
    #[arg(long, env = "TETHER_SOCKET_URL")]
    pub socket_url: Option<String>,

    /// Access token sent in the authentication challenge
    #[arg(long, env = "TETHER_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Current user id; own posts produce no notification
    #[arg(long, env = "TETHER_USER_ID")]
    pub user_id: Option<String>,

    /// Team used in channel paths when a post's team is unknown
    #[arg(long, env = "TETHER_DEFAULT_TEAM", default_value = DEFAULT_TEAM)]
    pub default_team: String,

    /// Team directory as id=name pairs
    #[arg(long, env = "TETHER_TEAMS", value_delimiter = ',')]
    pub teams: Vec<String>,

    /// Connection attempt timeout in milliseconds
    #[arg(long, env = "TETHER_CONNECT_TIMEOUT_MS", default_value = "10000")]
    pub connect_timeout_ms: u64,

    /// Request reply timeout in milliseconds
    #[arg(long, env = "TETHER_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Reconnect delay while failures stay below the fast-failure limit
    #[arg(long, env = "TETHER_RETRY_MIN_MS", default_value = "3000")]
    pub retry_min_ms: u64,

    /// Upper bound on the reconnect delay
    #[arg(long, env = "TETHER_RETRY_MAX_MS", default_value = "300000")]
    pub retry_max_ms: u64,

    /// Failures retried at the minimum delay before backing off
    #[arg(long, env = "TETHER_FAST_FAILURES", default_value = "7")]
    pub fast_failures: u32,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.target().is_none() {
            return Err("TETHER_SERVER_URL or TETHER_SOCKET_URL is required".to_string());
        }

        if self.retry_min_ms == 0 {
            return Err("TETHER_RETRY_MIN_MS must be greater than zero".to_string());
        }

        if self.retry_min_ms > self.retry_max_ms {
            return Err("TETHER_RETRY_MIN_MS must be less than or equal to TETHER_RETRY_MAX_MS".to_string());
        }

        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err("Timeouts must be greater than zero".to_string());
        }

        self.team_directory()?;

        Ok(())
    }

    /// Websocket URL to connect to.
    pub fn target(&self) -> Option<String> {
        self.socket_url
            .clone()
            .or_else(|| self.server_url.as_deref().map(socket_url))
    }

    /// Parse `teams` into an id to name map.
    pub fn team_directory(&self) -> Result<HashMap<String, String>, String> {
        self.teams
            .iter()
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((id, name)) if !id.trim().is_empty() && !name.trim().is_empty() => {
                    Ok((id.trim().to_string(), name.trim().to_string()))
                }
                _ => Err(format!("Invalid team entry '{}', expected id=name", entry)),
            })
            .collect()
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            min_delay: Duration::from_millis(self.retry_min_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
            fast_failures: self.fast_failures,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            target: self.target(),
            token: self.access_token.clone(),
            backoff: self.backoff(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn notification_formatter(&self) -> Result<NotificationFormatter, String> {
        Ok(NotificationFormatter::new(self.user_id.clone())
            .with_default_team(self.default_team.clone())
            .with_teams(self.team_directory()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("tether").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_server_url_derives_socket_url() {
        let args = parse(&["--server-url", "https://chat.example.com"]);
        assert_eq!(
            args.target().as_deref(),
            Some("wss://chat.example.com/api/v4/websocket")
        );
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_socket_url_overrides_server_url() {
        let args = parse(&[
            "--server-url",
            "https://chat.example.com",
            "--socket-url",
            "ws://127.0.0.1:8065/api/v4/websocket",
        ]);
        assert_eq!(
            args.client_config().target.as_deref(),
            Some("ws://127.0.0.1:8065/api/v4/websocket")
        );
    }

    #[test]
    fn test_defaults_match_backoff_policy() {
        let args = parse(&["--socket-url", "ws://localhost"]);
        assert_eq!(args.backoff(), BackoffPolicy::default());
        assert_eq!(args.default_team, "gitcoin");

        let config = args.client_config();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let mut args = parse(&["--socket-url", "ws://localhost"]);
        args.retry_min_ms = 10_000;
        args.retry_max_ms = 1_000;
        assert!(args.validate().is_err());

        let mut args = parse(&["--socket-url", "ws://localhost"]);
        args.teams = vec!["no-separator".to_string()];
        assert!(args.validate().is_err());

        let mut args = parse(&["--socket-url", "ws://localhost"]);
        args.socket_url = None;
        args.server_url = None;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_team_directory() {
        let args = parse(&["--socket-url", "ws://localhost", "--teams", "t1=hackers, t2=kudos"]);
        let teams = args.team_directory().unwrap();
        assert_eq!(teams.get("t1").map(String::as_str), Some("hackers"));
        assert_eq!(teams.get("t2").map(String::as_str), Some("kudos"));
    }
}
