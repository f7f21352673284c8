//! Named actions understood by the chat server, and their payloads.

use serde_json::{json, Value};

pub const USER_TYPING: &str = "user_typing";
pub const USER_UPDATE_ACTIVE_STATUS: &str = "user_update_active_status";
pub const GET_STATUSES: &str = "get_statuses";
pub const GET_STATUSES_BY_IDS: &str = "get_statuses_by_ids";

/// `parent_id` is empty for root posts.
pub fn user_typing(channel_id: &str, parent_id: Option<&str>) -> Value {
    json!({
        "channel_id": channel_id,
        "parent_id": parent_id.unwrap_or_default(),
    })
}

pub fn user_update_active_status(user_is_active: bool, manual: bool) -> Value {
    json!({
        "user_is_active": user_is_active,
        "manual": manual,
    })
}

pub fn get_statuses_by_ids<I, S>(user_ids: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let user_ids: Vec<String> = user_ids.into_iter().map(Into::into).collect();
    json!({ "user_ids": user_ids })
}
