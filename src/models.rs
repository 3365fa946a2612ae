//! Entity types mirrored from gateway payloads.
//!
//! Structs model the fields the library reads; everything else the server
//! supplies is retained in the `extra` map so field-wise merges never drop
//! data the caller may care about.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// A Discord user. The session keeps one de-duplicated directory of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// User ID
    pub id: String,

    /// Username
    #[serde(default)]
    pub username: String,

    /// Discriminator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,

    /// Whether this is a bot account
    #[serde(default)]
    pub bot: bool,

    /// Avatar hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    /// Presence status, merged in from presence updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Played game, merged in from presence updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<Value>,

    /// Server-supplied fields not modeled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A guild and its embedded collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guild {
    /// Guild ID
    pub id: String,

    /// Guild name
    #[serde(default)]
    pub name: String,

    /// Channels, in insertion order
    #[serde(default)]
    pub channels: Vec<Channel>,

    /// Members, in insertion order
    #[serde(default)]
    pub members: Vec<Member>,

    /// Roles, in insertion order
    #[serde(default)]
    pub roles: Vec<Role>,

    /// Custom emojis
    #[serde(default)]
    pub emojis: Vec<Value>,

    /// Whether the guild is an unavailable stub
    #[serde(default)]
    pub unavailable: bool,

    /// Server-supplied fields not modeled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Guild {
    /// Find a member by user id.
    #[must_use]
    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user.id == user_id)
    }

    pub(crate) fn member_mut(&mut self, user_id: &str) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.user.id == user_id)
    }

    /// Find a role by id.
    #[must_use]
    pub fn role(&self, role_id: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == role_id)
    }
}

/// Channel type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelKind {
    /// Guild text channel
    #[default]
    Text,
    /// Direct message channel
    Dm,
    /// Guild voice channel
    Voice,
    /// A type this library does not model
    Other(u8),
}

impl From<u8> for ChannelKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Text,
            1 => Self::Dm,
            2 => Self::Voice,
            other => Self::Other(other),
        }
    }
}

impl From<ChannelKind> for u8 {
    fn from(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Text => 0,
            ChannelKind::Dm => 1,
            ChannelKind::Voice => 2,
            ChannelKind::Other(other) => other,
        }
    }
}

/// A guild channel or DM channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Channel ID
    pub id: String,

    /// Channel type tag
    #[serde(rename = "type", default)]
    pub kind: ChannelKind,

    /// Owning guild, absent for DM channels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,

    /// Channel name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// DM recipients
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<User>,

    /// Server-supplied fields not modeled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Channel {
    /// Whether this is a direct message channel.
    #[must_use]
    pub fn is_dm(&self) -> bool {
        self.kind == ChannelKind::Dm
    }
}

/// A guild member, keyed by `user.id` within its guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    /// The member's user record
    pub user: User,

    /// Role ids held by the member
    #[serde(default)]
    pub roles: Vec<String>,

    /// Guild-local nickname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,

    /// Server mute
    #[serde(default)]
    pub mute: bool,

    /// Server deafen
    #[serde(default)]
    pub deaf: bool,

    /// Join timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<String>,

    /// Server-supplied fields not modeled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A guild role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Role ID
    pub id: String,

    /// Role name
    #[serde(default)]
    pub name: String,

    /// Display color
    #[serde(default)]
    pub color: u32,

    /// Whether the role is hoisted in the member list
    #[serde(default)]
    pub hoist: bool,

    /// Sort position
    #[serde(default)]
    pub position: i64,

    /// Permission bits
    #[serde(default)]
    pub permissions: u64,

    /// Whether an integration manages the role
    #[serde(default)]
    pub managed: bool,

    /// Whether the role is mentionable
    #[serde(default)]
    pub mentionable: bool,
}

/// Shallow field-wise merge of `patch` into `target`.
///
/// Only object patches merge; each field present in the patch replaces the
/// corresponding field wholesale, fields absent from the patch are kept.
pub(crate) fn merge_object(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Field-wise merge of a JSON patch into a typed entity.
///
/// Keys listed in `skip` are envelope fields (e.g. `guild_id`) that do not
/// belong to the entity. A patch that produces an undeserializable entity
/// leaves the entity unchanged.
pub(crate) fn merge_entity<T>(entity: &mut T, patch: &Value, skip: &[&str])
where
    T: Serialize + DeserializeOwned,
{
    let Value::Object(fields) = patch else {
        return;
    };
    let mut current = match serde_json::to_value(&*entity) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "entity did not reserialize for merge");
            return;
        }
    };
    let mut filtered = fields.clone();
    for key in skip {
        filtered.remove(*key);
    }
    merge_object(&mut current, &Value::Object(filtered));
    match serde_json::from_value(current) {
        Ok(updated) => *entity = updated,
        Err(err) => warn!(error = %err, "merge produced an undeserializable entity"),
    }
}
