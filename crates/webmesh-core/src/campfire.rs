//! Key layout of campfire chat rooms in the mesh key/value store.
//!
//! ```text
//! /campfire-chat/rooms/<room>
//! /campfire-chat/rooms/<room>/members/<member>
//! /campfire-chat/rooms/<room>/messages/<rfc3339-nanos>/<sender>
//! ```

use chrono::{DateTime, SecondsFormat, Utc};

pub const CAMPFIRE_PREFIX: &str = "/campfire-chat";
pub const ROOMS_PREFIX: &str = "/campfire-chat/rooms";

pub fn room_path(room: &str) -> String {
    format!("{ROOMS_PREFIX}/{room}")
}

pub fn members_path(room: &str) -> String {
    format!("{}/members", room_path(room))
}

pub fn messages_path(room: &str) -> String {
    format!("{}/messages", room_path(room))
}

/// Key for a message sent by `from` at `at`.
///
/// Timestamps always carry nine fractional digits so keys sort by time.
pub fn new_message_key(room: &str, from: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{from}",
        messages_path(room),
        at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
}

/// Room names among `keys`, skipping anything nested below a room.
pub fn room_names<'a>(keys: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    direct_children(&format!("{ROOMS_PREFIX}/"), keys)
}

/// Member names of `room` among `keys`.
pub fn member_names<'a>(room: &str, keys: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    direct_children(&format!("{}/", members_path(room)), keys)
}

fn direct_children<'a>(prefix: &str, keys: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    keys.into_iter()
        .filter_map(|key| key.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .map(str::to_string)
        .collect()
}

/// A decoded message key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKey {
    pub room: String,
    pub sent_at: DateTime<Utc>,
    pub from: String,
}

/// Decode a key produced by [`new_message_key`].
pub fn parse_message_key(key: &str) -> Option<MessageKey> {
    let rest = key.strip_prefix(ROOMS_PREFIX)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let room = parts.next()?;
    if parts.next()? != "messages" {
        return None;
    }
    let ts = parts.next()?;
    let from = parts.next()?;
    if parts.next().is_some() || room.is_empty() || from.is_empty() {
        return None;
    }
    let sent_at = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
    Some(MessageKey {
        room: room.to_string(),
        sent_at,
        from: from.to_string(),
    })
}

/// Something that happened in a room, decoded from a subscription key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    MemberJoined(String),
    Message(MessageKey),
}

/// Classify a key received on a subscription to [`room_path`].
pub fn parse_room_event(room: &str, key: &str) -> Option<RoomEvent> {
    let rest = key.strip_prefix(&room_path(room))?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        ["members", member] if !member.is_empty() => {
            Some(RoomEvent::MemberJoined((*member).to_string()))
        }
        ["messages", _, _] => parse_message_key(key).map(RoomEvent::Message),
        _ => None,
    }
}

/// One chat transcript line: `from [time]: body`.
pub fn format_chat_line(message: &MessageKey, body: &str) -> String {
    format!(
        "{} [{}]: {}",
        message.from,
        message.sent_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        body.trim()
    )
}
