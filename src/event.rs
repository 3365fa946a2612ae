//! Tagged dispatch events.

use serde_json::Value;

/// Every dispatch event name the library recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Resumed,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    GuildBanAdd,
    GuildBanRemove,
    GuildEmojisUpdate,
    GuildIntegrationsUpdate,
    GuildMemberAdd,
    GuildMemberRemove,
    GuildMemberUpdate,
    GuildMembersChunk,
    GuildRoleCreate,
    GuildRoleUpdate,
    GuildRoleDelete,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    MessageDeleteBulk,
    PresenceUpdate,
    TypingStart,
    UserUpdate,
    VoiceStateUpdate,
    /// A name this library does not recognize; forwarded unchanged.
    Unknown,
}

impl EventKind {
    /// Map a dispatch `t` field to its tag.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "READY" => Self::Ready,
            "RESUMED" => Self::Resumed,
            "CHANNEL_CREATE" => Self::ChannelCreate,
            "CHANNEL_UPDATE" => Self::ChannelUpdate,
            "CHANNEL_DELETE" => Self::ChannelDelete,
            "GUILD_CREATE" => Self::GuildCreate,
            "GUILD_UPDATE" => Self::GuildUpdate,
            "GUILD_DELETE" => Self::GuildDelete,
            "GUILD_BAN_ADD" => Self::GuildBanAdd,
            "GUILD_BAN_REMOVE" => Self::GuildBanRemove,
            "GUILD_EMOJIS_UPDATE" => Self::GuildEmojisUpdate,
            "GUILD_INTEGRATIONS_UPDATE" => Self::GuildIntegrationsUpdate,
            "GUILD_MEMBER_ADD" => Self::GuildMemberAdd,
            "GUILD_MEMBER_REMOVE" => Self::GuildMemberRemove,
            "GUILD_MEMBER_UPDATE" => Self::GuildMemberUpdate,
            "GUILD_MEMBERS_CHUNK" => Self::GuildMembersChunk,
            "GUILD_ROLE_CREATE" => Self::GuildRoleCreate,
            "GUILD_ROLE_UPDATE" => Self::GuildRoleUpdate,
            "GUILD_ROLE_DELETE" => Self::GuildRoleDelete,
            "MESSAGE_CREATE" => Self::MessageCreate,
            "MESSAGE_UPDATE" => Self::MessageUpdate,
            "MESSAGE_DELETE" => Self::MessageDelete,
            "MESSAGE_DELETE_BULK" => Self::MessageDeleteBulk,
            "PRESENCE_UPDATE" => Self::PresenceUpdate,
            "TYPING_START" => Self::TypingStart,
            "USER_UPDATE" => Self::UserUpdate,
            "VOICE_STATE_UPDATE" => Self::VoiceStateUpdate,
            _ => Self::Unknown,
        }
    }

    /// Canonical name for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Resumed => "RESUMED",
            Self::ChannelCreate => "CHANNEL_CREATE",
            Self::ChannelUpdate => "CHANNEL_UPDATE",
            Self::ChannelDelete => "CHANNEL_DELETE",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildUpdate => "GUILD_UPDATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::GuildBanAdd => "GUILD_BAN_ADD",
            Self::GuildBanRemove => "GUILD_BAN_REMOVE",
            Self::GuildEmojisUpdate => "GUILD_EMOJIS_UPDATE",
            Self::GuildIntegrationsUpdate => "GUILD_INTEGRATIONS_UPDATE",
            Self::GuildMemberAdd => "GUILD_MEMBER_ADD",
            Self::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            Self::GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
            Self::GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
            Self::GuildRoleCreate => "GUILD_ROLE_CREATE",
            Self::GuildRoleUpdate => "GUILD_ROLE_UPDATE",
            Self::GuildRoleDelete => "GUILD_ROLE_DELETE",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::MessageUpdate => "MESSAGE_UPDATE",
            Self::MessageDelete => "MESSAGE_DELETE",
            Self::MessageDeleteBulk => "MESSAGE_DELETE_BULK",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::TypingStart => "TYPING_START",
            Self::UserUpdate => "USER_UPDATE",
            Self::VoiceStateUpdate => "VOICE_STATE_UPDATE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// A dispatch event as delivered to handlers.
#[derive(Debug, Clone)]
pub struct Event {
    /// Recognized tag
    pub kind: EventKind,

    /// The wire event name, kept for unknown events
    pub name: String,

    /// Sequence number the server attached
    pub seq: Option<u64>,

    /// Event payload
    pub data: Value,
}

impl Event {
    /// Build an event from a dispatch envelope.
    #[must_use]
    pub fn from_dispatch(name: String, seq: Option<u64>, data: Value) -> Self {
        Self {
            kind: EventKind::parse(&name),
            name,
            seq,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in [
            EventKind::Ready,
            EventKind::GuildMemberUpdate,
            EventKind::MessageDeleteBulk,
            EventKind::PresenceUpdate,
        ] {
            assert_eq!(EventKind::parse(kind.name()), kind);
        }
    }

    #[test]
    fn unknown_names_keep_their_wire_form() {
        let event = Event::from_dispatch("SOMETHING_NEW".into(), Some(4), json!({ "a": 1 }));
        assert_eq!(event.kind, EventKind::Unknown);
        assert_eq!(event.name, "SOMETHING_NEW");
        assert_eq!(event.seq, Some(4));
    }
}
