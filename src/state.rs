//! In-memory mirror of the entities the event stream describes.
//!
//! Mutations originate only from the built-in handlers, which the dispatch
//! task runs serially before user callbacks observe the event. Handlers are
//! total: a malformed payload logs and leaves the store unchanged, it never
//! aborts the dispatch loop.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::event::{Event, EventKind};
use crate::gateway::Ready;
use crate::models::{merge_entity, Channel, Guild, Member, Role, User};

/// One session's logical document.
#[derive(Debug, Default)]
pub struct SessionState {
    /// The bot's own user, populated by READY
    pub self_user: Option<User>,

    /// Gateway-assigned session id
    pub session_id: Option<String>,

    /// Guilds by id
    pub guilds: HashMap<String, Guild>,

    /// DM channels by id
    pub dm_channels: HashMap<String, Channel>,

    /// Session-wide de-duplicated user directory
    pub users: HashMap<String, User>,

    /// Last server trace
    pub trace: Vec<String>,
}

impl SessionState {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accrete a user into the directory, merging over any existing entry.
    fn absorb_user(&mut self, user_value: &Value) {
        let Some(id) = user_value["id"].as_str().map(str::to_string) else {
            return;
        };
        if let Some(existing) = self.users.get_mut(&id) {
            merge_entity(existing, user_value, &[]);
        } else {
            match serde_json::from_value(user_value.clone()) {
                Ok(user) => {
                    self.users.insert(id, user);
                }
                Err(err) => warn!(error = %err, "user payload did not deserialize"),
            }
        }
    }

    /// Apply a built-in handler for `event`.
    pub(crate) fn apply(&mut self, event: &Event) {
        match event.kind {
            EventKind::Ready => self.apply_ready(&event.data),
            EventKind::Resumed => {
                if let Some(trace) = event.data["_trace"].as_array() {
                    self.trace = trace
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                }
            }
            EventKind::ChannelCreate => self.apply_channel_create(&event.data),
            EventKind::ChannelUpdate => self.apply_channel_update(&event.data),
            EventKind::ChannelDelete => self.apply_channel_delete(&event.data),
            EventKind::GuildCreate => self.apply_guild_create(&event.data),
            EventKind::GuildUpdate => self.apply_guild_update(&event.data),
            EventKind::GuildDelete => {
                if let Some(id) = event.data["id"].as_str() {
                    self.guilds.remove(id);
                }
            }
            EventKind::GuildEmojisUpdate => self.apply_guild_emojis(&event.data),
            EventKind::GuildMemberAdd => self.apply_member_add(&event.data),
            EventKind::GuildMemberRemove => self.apply_member_remove(&event.data),
            EventKind::GuildMemberUpdate => self.apply_member_update(&event.data),
            EventKind::GuildRoleCreate => self.apply_role_create(&event.data),
            EventKind::GuildRoleUpdate => self.apply_role_update(&event.data),
            EventKind::GuildRoleDelete => self.apply_role_delete(&event.data),
            EventKind::PresenceUpdate => self.apply_presence(&event.data),
            EventKind::UserUpdate => self.absorb_user(&event.data),

            // Intentional no-ops: the event reaches user handlers but the
            // store keeps nothing for it.
            EventKind::GuildBanAdd
            | EventKind::GuildBanRemove
            | EventKind::GuildIntegrationsUpdate
            | EventKind::GuildMembersChunk
            | EventKind::MessageCreate
            | EventKind::MessageUpdate
            | EventKind::MessageDelete
            | EventKind::MessageDeleteBulk
            | EventKind::TypingStart
            | EventKind::VoiceStateUpdate => {
                debug!(event = event.kind.name(), "no state kept for event");
            }
            EventKind::Unknown => {
                debug!(event = %event.name, "unknown event forwarded unchanged");
            }
        }
    }

    fn apply_ready(&mut self, data: &Value) {
        let ready: Ready = match serde_json::from_value(data.clone()) {
            Ok(ready) => ready,
            Err(err) => {
                warn!(error = %err, "READY payload did not deserialize");
                return;
            }
        };

        self.session_id = Some(ready.session_id);
        self.users
            .insert(ready.user.id.clone(), ready.user.clone());
        self.self_user = Some(ready.user);

        for entry in &ready.guilds {
            match serde_json::from_value::<Guild>(entry.clone()) {
                Ok(guild) => {
                    self.guilds.insert(guild.id.clone(), guild);
                }
                Err(err) => warn!(error = %err, "READY guild did not deserialize"),
            }
        }

        for entry in &ready.private_channels {
            match serde_json::from_value::<Channel>(entry.clone()) {
                Ok(channel) => {
                    if let Some(recipients) = entry["recipients"].as_array() {
                        for recipient in recipients {
                            self.absorb_user(recipient);
                        }
                    }
                    self.dm_channels.insert(channel.id.clone(), channel);
                }
                Err(err) => warn!(error = %err, "READY private channel did not deserialize"),
            }
        }

        self.trace = ready.trace;
    }

    fn apply_channel_create(&mut self, data: &Value) {
        let channel: Channel = match serde_json::from_value(data.clone()) {
            Ok(channel) => channel,
            Err(err) => {
                warn!(error = %err, "CHANNEL_CREATE payload did not deserialize");
                return;
            }
        };
        if channel.is_dm() {
            if let Some(recipients) = data["recipients"].as_array() {
                for recipient in recipients {
                    self.absorb_user(recipient);
                }
            }
            self.dm_channels.insert(channel.id.clone(), channel);
        } else if let Some(guild) = channel
            .guild_id
            .as_deref()
            .and_then(|id| self.guilds.get_mut(id))
        {
            if let Some(existing) = guild.channels.iter_mut().find(|c| c.id == channel.id) {
                debug!(channel = %channel.id, "CHANNEL_CREATE for known channel, replacing");
                *existing = channel;
            } else {
                guild.channels.push(channel);
            }
        } else {
            warn!(channel = %channel.id, "CHANNEL_CREATE for unknown guild");
        }
    }

    fn apply_channel_update(&mut self, data: &Value) {
        let Some(id) = data["id"].as_str() else {
            warn!("CHANNEL_UPDATE without id");
            return;
        };
        if let Some(channel) = self.dm_channels.get_mut(id) {
            merge_entity(channel, data, &[]);
            return;
        }
        for guild in self.guilds.values_mut() {
            if let Some(channel) = guild.channels.iter_mut().find(|c| c.id == id) {
                merge_entity(channel, data, &[]);
                return;
            }
        }
        debug!(channel = id, "CHANNEL_UPDATE for unknown channel");
    }

    fn apply_channel_delete(&mut self, data: &Value) {
        let Some(id) = data["id"].as_str() else {
            return;
        };
        if self.dm_channels.remove(id).is_some() {
            return;
        }
        for guild in self.guilds.values_mut() {
            guild.channels.retain(|c| c.id != id);
        }
    }

    fn apply_guild_create(&mut self, data: &Value) {
        let guild: Guild = match serde_json::from_value(data.clone()) {
            Ok(guild) => guild,
            Err(err) => {
                warn!(error = %err, "GUILD_CREATE payload did not deserialize");
                return;
            }
        };
        let guild_id = guild.id.clone();

        if let Some(members) = data["members"].as_array() {
            for member in members {
                self.absorb_user(&member["user"]);
            }
        }

        self.guilds.insert(guild_id.clone(), guild);

        // Presences arrive alongside the guild and flow through the same
        // handler a live PRESENCE_UPDATE would.
        if let Some(presences) = data["presences"].as_array() {
            for presence in presences {
                let mut presence = presence.clone();
                if let Value::Object(map) = &mut presence {
                    map.insert("guild_id".to_string(), Value::String(guild_id.clone()));
                }
                self.apply_presence(&presence);
            }
        }
    }

    fn apply_guild_update(&mut self, data: &Value) {
        let Some(guild) = data["id"].as_str().and_then(|id| self.guilds.get_mut(id)) else {
            debug!("GUILD_UPDATE for unknown guild");
            return;
        };
        merge_entity(guild, data, &[]);
    }

    fn apply_guild_emojis(&mut self, data: &Value) {
        let Some(guild) = data["guild_id"]
            .as_str()
            .and_then(|id| self.guilds.get_mut(id))
        else {
            return;
        };
        if let Some(emojis) = data["emojis"].as_array() {
            guild.emojis = emojis.clone();
        }
    }

    fn apply_member_add(&mut self, data: &Value) {
        self.absorb_user(&data["user"]);
        let member: Member = match serde_json::from_value(data.clone()) {
            Ok(member) => member,
            Err(err) => {
                warn!(error = %err, "GUILD_MEMBER_ADD payload did not deserialize");
                return;
            }
        };
        let Some(guild) = data["guild_id"]
            .as_str()
            .and_then(|id| self.guilds.get_mut(id))
        else {
            warn!("GUILD_MEMBER_ADD for unknown guild");
            return;
        };
        if let Some(existing) = guild.member_mut(&member.user.id) {
            debug!(user = %member.user.id, "GUILD_MEMBER_ADD for known member, replacing");
            *existing = member;
        } else {
            guild.members.push(member);
        }
    }

    fn apply_member_remove(&mut self, data: &Value) {
        let Some(guild) = data["guild_id"]
            .as_str()
            .and_then(|id| self.guilds.get_mut(id))
        else {
            return;
        };
        if let Some(user_id) = data["user"]["id"].as_str() {
            guild.members.retain(|m| m.user.id != user_id);
        }
    }

    fn apply_member_update(&mut self, data: &Value) {
        self.absorb_user(&data["user"]);
        let Some(guild) = data["guild_id"]
            .as_str()
            .and_then(|id| self.guilds.get_mut(id))
        else {
            return;
        };
        let Some(user_id) = data["user"]["id"].as_str() else {
            return;
        };
        if let Some(member) = guild.member_mut(user_id) {
            merge_entity(member, data, &["guild_id"]);
        } else {
            debug!(user = user_id, "GUILD_MEMBER_UPDATE for unknown member");
        }
    }

    fn apply_role_create(&mut self, data: &Value) {
        let Some(guild) = data["guild_id"]
            .as_str()
            .and_then(|id| self.guilds.get_mut(id))
        else {
            return;
        };
        match serde_json::from_value::<Role>(data["role"].clone()) {
            Ok(role) => {
                if let Some(existing) = guild.roles.iter_mut().find(|r| r.id == role.id) {
                    *existing = role;
                } else {
                    guild.roles.push(role);
                }
            }
            Err(err) => warn!(error = %err, "GUILD_ROLE_CREATE payload did not deserialize"),
        }
    }

    fn apply_role_update(&mut self, data: &Value) {
        let Some(guild) = data["guild_id"]
            .as_str()
            .and_then(|id| self.guilds.get_mut(id))
        else {
            return;
        };
        let Some(role_id) = data["role"]["id"].as_str() else {
            return;
        };
        if let Some(role) = guild.roles.iter_mut().find(|r| r.id == role_id) {
            merge_entity(role, &data["role"], &[]);
        } else {
            debug!(role = role_id, "GUILD_ROLE_UPDATE for unknown role");
        }
    }

    fn apply_role_delete(&mut self, data: &Value) {
        let Some(guild) = data["guild_id"]
            .as_str()
            .and_then(|id| self.guilds.get_mut(id))
        else {
            return;
        };
        if let Some(role_id) = data["role_id"].as_str() {
            guild.roles.retain(|r| r.id != role_id);
        }
    }

    fn apply_presence(&mut self, data: &Value) {
        let Some(user_id) = data["user"]["id"].as_str().map(str::to_string) else {
            warn!("PRESENCE_UPDATE without user id");
            return;
        };

        self.absorb_user(&data["user"]);
        if let Some(user) = self.users.get_mut(&user_id) {
            if let Some(status) = data.get("status") {
                user.status = status.as_str().map(str::to_string);
            }
            if let Some(game) = data.get("game") {
                user.game = if game.is_null() {
                    None
                } else {
                    Some(game.clone())
                };
            }
        }

        let Some(guild) = data["guild_id"]
            .as_str()
            .and_then(|id| self.guilds.get_mut(id))
        else {
            return;
        };
        if let Some(member) = guild.member_mut(&user_id) {
            if let Some(roles) = data["roles"].as_array() {
                member.roles = roles
                    .iter()
                    .filter_map(|r| r.as_str().map(str::to_string))
                    .collect();
            }
            if let Some(nick) = data.get("nick") {
                member.nick = nick.as_str().map(str::to_string);
            }
        }
    }
}
