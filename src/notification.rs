//! Notification formatting for `posted` events.
//!
//! Turns a pushed post into the title/channel/body triple a desktop
//! notification needs. Showing it is left to the caller.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TetherError};
use crate::session::Event;

/// Event name carrying new posts.
pub const POSTED: &str = "posted";

/// Team used in channel paths when a post's team is not in the directory.
pub const DEFAULT_TEAM: &str = "gitcoin";

/// Maximum length of a notification body, in characters.
pub const BODY_LIMIT: usize = 50;

const DIRECT_CHANNEL: &str = "D";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    /// Path of the channel inside the chat UI, e.g. `/gitcoin/channels/town-square`
    pub channel: String,
    pub body: String,
}

/// Channel-level fields of a `posted` event's data.
#[derive(Debug, Deserialize)]
struct PostedData {
    #[serde(default)]
    channel_type: String,
    #[serde(default)]
    channel_display_name: String,
    #[serde(default)]
    channel_name: String,
    #[serde(default)]
    team_id: String,
    #[serde(default)]
    sender_name: String,
    /// The post itself, as a JSON encoded string
    post: String,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct NotificationFormatter {
    own_user_id: Option<String>,
    default_team: String,
    teams: HashMap<String, String>,
}

impl Default for NotificationFormatter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl NotificationFormatter {
    pub fn new(own_user_id: Option<String>) -> Self {
        Self {
            own_user_id,
            default_team: DEFAULT_TEAM.to_string(),
            teams: HashMap::new(),
        }
    }

    pub fn with_default_team(mut self, team: impl Into<String>) -> Self {
        self.default_team = team.into();
        self
    }

    /// Team directory, id to URL name.
    pub fn with_teams(mut self, teams: HashMap<String, String>) -> Self {
        self.teams = teams;
        self
    }

    /// Format one pushed event.
    ///
    /// Returns `Ok(None)` for anything that is not a post, and for posts
    /// written by the current user.
    pub fn format(&self, event: &Event) -> Result<Option<Notification>> {
        if event.event != POSTED {
            return Ok(None);
        }

        let data = PostedData::deserialize(&event.data)
            .map_err(|e| TetherError::Protocol(format!("Malformed posted event: {}", e)))?;
        let post: Post = serde_json::from_str(&data.post)?;

        if self.own_user_id.as_deref() == Some(post.user_id.as_str()) {
            return Ok(None);
        }

        let title = if data.channel_type == DIRECT_CHANNEL {
            "Direct Message".to_string()
        } else {
            data.channel_display_name
        };

        let team = self
            .teams
            .get(&data.team_id)
            .map(String::as_str)
            .unwrap_or(&self.default_team);

        let body: String = format!("{}: {}", data.sender_name, post.message)
            .chars()
            .take(BODY_LIMIT)
            .collect();

        Ok(Some(Notification {
            title,
            channel: format!("/{}/channels/{}", team, data.channel_name),
            body,
        }))
    }
}

/// Websocket endpoint for a chat server base URL.
///
/// Any scheme is replaced by `wss://`.
pub fn socket_url(server_url: &str) -> String {
    let host = server_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .or_else(|| server_url.strip_prefix("//"))
        .unwrap_or(server_url)
        .trim_end_matches('/');
    format!("wss://{}/api/v4/websocket", host)
}
