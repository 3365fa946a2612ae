//! Typed endpoint wrappers and their request field tables.
//!
//! Each wrapper is a thin delegation to [`RestClient::send`]; the field
//! tables are the authoritative shape of every request body. Webhook
//! execution is intentionally left to the raw `send` surface.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{Channel, Guild, Member, Role, User};
use crate::schema::{query_string, FieldType, Schema};

use super::{Body, MultipartForm, Response, RestClient, SendOptions, Verb};

pub const CREATE_MESSAGE: Schema = &[
    ("content", FieldType::Str),
    ("nonce", FieldType::Str),
    ("tts", FieldType::Bare),
    ("embed", FieldType::Object(EMBED)),
];

pub const EMBED: Schema = &[
    ("title", FieldType::Str),
    ("description", FieldType::Str),
    ("url", FieldType::Str),
    ("color", FieldType::Bare),
];

pub const EDIT_MESSAGE: Schema = &[("content", FieldType::Str)];

pub const BULK_DELETE_MESSAGES: Schema = &[("messages", FieldType::Array(&FieldType::Str))];

pub const CREATE_DM: Schema = &[("recipient_id", FieldType::Str)];

pub const MODIFY_CHANNEL: Schema = &[
    ("name", FieldType::Str),
    ("topic", FieldType::Str),
    ("position", FieldType::Bare),
    ("bitrate", FieldType::Bare),
    ("user_limit", FieldType::Bare),
];

pub const CREATE_GUILD_CHANNEL: Schema = &[
    ("name", FieldType::Str),
    ("type", FieldType::Str),
    ("bitrate", FieldType::Bare),
    ("user_limit", FieldType::Bare),
];

pub const MODIFY_GUILD: Schema = &[
    ("name", FieldType::Str),
    ("region", FieldType::Str),
    ("verification_level", FieldType::Bare),
    ("afk_channel_id", FieldType::Str),
    ("afk_timeout", FieldType::Bare),
    ("icon", FieldType::Str),
    ("owner_id", FieldType::Str),
];

// Roles travel as plain id strings, not role objects.
pub const MODIFY_GUILD_MEMBER: Schema = &[
    ("nick", FieldType::Str),
    ("roles", FieldType::Array(&FieldType::Str)),
    ("mute", FieldType::Bare),
    ("deaf", FieldType::Bare),
    ("channel_id", FieldType::Str),
];

pub const GUILD_ROLE: Schema = &[
    ("name", FieldType::Str),
    ("permissions", FieldType::Bare),
    ("color", FieldType::Bare),
    ("hoist", FieldType::Bare),
    ("mentionable", FieldType::Bare),
];

fn one_field(name: &str, value: Value) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(name.to_string(), value);
    fields
}

impl RestClient {
    /// Get the current bot user.
    pub async fn get_current_user(&self) -> Result<User> {
        self.send(Verb::Get, "/users/@me", Body::None, SendOptions::default())
            .await?
            .json()
    }

    /// Get a user by id.
    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        self.send(
            Verb::Get,
            &format!("/users/{user_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await?
        .json()
    }

    /// Open (or fetch) a DM channel with a user.
    pub async fn create_dm(&self, recipient_id: &str) -> Result<Channel> {
        self.send(
            Verb::Post,
            "/users/@me/channels",
            Body::Json {
                fields: one_field("recipient_id", Value::String(recipient_id.to_string())),
                schema: CREATE_DM,
            },
            SendOptions::default(),
        )
        .await?
        .json()
    }

    /// Get a channel by id.
    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel> {
        self.send(
            Verb::Get,
            &format!("/channels/{channel_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await?
        .json()
    }

    /// Modify channel settings.
    pub async fn modify_channel(
        &self,
        channel_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Response> {
        self.send(
            Verb::Patch,
            &format!("/channels/{channel_id}"),
            Body::Json {
                fields,
                schema: MODIFY_CHANNEL,
            },
            SendOptions::default(),
        )
        .await
    }

    /// Delete a channel, or close a DM channel.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<Response> {
        self.send(
            Verb::Delete,
            &format!("/channels/{channel_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await
    }

    /// Fetch recent messages. `limit` is clamped server-side to 1..=100.
    pub async fn get_channel_messages(
        &self,
        channel_id: &str,
        limit: Option<u32>,
        before: Option<&str>,
    ) -> Result<Response> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(before) = before {
            params.push(("before", before.to_string()));
        }
        let mut resource = format!("/channels/{channel_id}/messages");
        if !params.is_empty() {
            resource.push('?');
            resource.push_str(&query_string(&params));
        }
        self.send(Verb::Get, &resource, Body::None, SendOptions::default())
            .await
    }

    /// Post a message with pre-built fields (content, nonce, tts, embed).
    pub async fn create_message_with(
        &self,
        channel_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Response> {
        self.send(
            Verb::Post,
            &format!("/channels/{channel_id}/messages"),
            Body::Json {
                fields,
                schema: CREATE_MESSAGE,
            },
            SendOptions::default(),
        )
        .await
    }

    /// Post a plain text message.
    pub async fn create_message(&self, channel_id: &str, content: &str) -> Result<Response> {
        self.create_message_with(channel_id, one_field("content", Value::String(content.into())))
            .await
    }

    /// Upload a file alongside an optional text message.
    pub async fn upload_file(
        &self,
        channel_id: &str,
        filename: &str,
        file_content_type: &str,
        bytes: &[u8],
        content: Option<&str>,
    ) -> Result<Response> {
        let mut form = MultipartForm::new();
        if let Some(content) = content {
            form.text("content", content);
        }
        form.text("nonce", &uuid::Uuid::new_v4().to_string());
        form.text("tts", "false");
        form.file("file", filename, file_content_type, bytes);
        let (content_type, body) = form.finish();

        self.send(
            Verb::Post,
            &format!("/channels/{channel_id}/messages"),
            Body::Bytes {
                bytes: body,
                content_type,
            },
            SendOptions::default(),
        )
        .await
    }

    /// Edit a message's content.
    pub async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Response> {
        self.send(
            Verb::Patch,
            &format!("/channels/{channel_id}/messages/{message_id}"),
            Body::Json {
                fields: one_field("content", Value::String(content.into())),
                schema: EDIT_MESSAGE,
            },
            SendOptions::default(),
        )
        .await
    }

    /// Delete a single message.
    pub async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<Response> {
        self.send(
            Verb::Delete,
            &format!("/channels/{channel_id}/messages/{message_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await
    }

    /// Delete several messages in one round trip.
    pub async fn bulk_delete_messages(
        &self,
        channel_id: &str,
        message_ids: &[&str],
    ) -> Result<Response> {
        let ids: Vec<Value> = message_ids
            .iter()
            .map(|id| Value::String((*id).to_string()))
            .collect();
        self.send(
            Verb::Post,
            &format!("/channels/{channel_id}/messages/bulk-delete"),
            Body::Json {
                fields: one_field("messages", Value::Array(ids)),
                schema: BULK_DELETE_MESSAGES,
            },
            SendOptions::default(),
        )
        .await
    }

    /// Fire the typing indicator in a channel.
    pub async fn trigger_typing(&self, channel_id: &str) -> Result<Response> {
        self.send(
            Verb::Post,
            &format!("/channels/{channel_id}/typing"),
            Body::None,
            SendOptions::default(),
        )
        .await
    }

    /// Get a guild by id.
    pub async fn get_guild(&self, guild_id: &str) -> Result<Guild> {
        self.send(
            Verb::Get,
            &format!("/guilds/{guild_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await?
        .json()
    }

    /// Modify guild settings.
    pub async fn modify_guild(
        &self,
        guild_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Response> {
        self.send(
            Verb::Patch,
            &format!("/guilds/{guild_id}"),
            Body::Json {
                fields,
                schema: MODIFY_GUILD,
            },
            SendOptions::default(),
        )
        .await
    }

    /// List a guild's channels.
    pub async fn get_guild_channels(&self, guild_id: &str) -> Result<Vec<Channel>> {
        self.send(
            Verb::Get,
            &format!("/guilds/{guild_id}/channels"),
            Body::None,
            SendOptions::default(),
        )
        .await?
        .json()
    }

    /// Create a guild channel.
    pub async fn create_guild_channel(
        &self,
        guild_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Channel> {
        self.send(
            Verb::Post,
            &format!("/guilds/{guild_id}/channels"),
            Body::Json {
                fields,
                schema: CREATE_GUILD_CHANNEL,
            },
            SendOptions::default(),
        )
        .await?
        .json()
    }

    /// Get one guild member.
    pub async fn get_guild_member(&self, guild_id: &str, user_id: &str) -> Result<Member> {
        self.send(
            Verb::Get,
            &format!("/guilds/{guild_id}/members/{user_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await?
        .json()
    }

    /// Modify a guild member (nick, roles as id strings, mute, deaf, move).
    pub async fn modify_guild_member(
        &self,
        guild_id: &str,
        user_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Response> {
        self.send(
            Verb::Patch,
            &format!("/guilds/{guild_id}/members/{user_id}"),
            Body::Json {
                fields,
                schema: MODIFY_GUILD_MEMBER,
            },
            SendOptions::default(),
        )
        .await
    }

    /// Grant a role to a member.
    pub async fn add_guild_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<Response> {
        self.send(
            Verb::Put,
            &format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await
    }

    /// Revoke a role from a member.
    pub async fn remove_guild_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<Response> {
        self.send(
            Verb::Delete,
            &format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await
    }

    /// Kick a member.
    pub async fn remove_guild_member(&self, guild_id: &str, user_id: &str) -> Result<Response> {
        self.send(
            Verb::Delete,
            &format!("/guilds/{guild_id}/members/{user_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await
    }

    /// Ban a user, optionally pruning their recent messages.
    pub async fn create_guild_ban(
        &self,
        guild_id: &str,
        user_id: &str,
        delete_message_days: Option<u8>,
    ) -> Result<Response> {
        let mut resource = format!("/guilds/{guild_id}/bans/{user_id}");
        if let Some(days) = delete_message_days {
            resource.push('?');
            resource.push_str(&query_string(&[("delete-message-days", days.to_string())]));
        }
        self.send(Verb::Put, &resource, Body::None, SendOptions::default())
            .await
    }

    /// Lift a ban.
    pub async fn remove_guild_ban(&self, guild_id: &str, user_id: &str) -> Result<Response> {
        self.send(
            Verb::Delete,
            &format!("/guilds/{guild_id}/bans/{user_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await
    }

    /// List a guild's roles.
    pub async fn get_guild_roles(&self, guild_id: &str) -> Result<Vec<Role>> {
        self.send(
            Verb::Get,
            &format!("/guilds/{guild_id}/roles"),
            Body::None,
            SendOptions::default(),
        )
        .await?
        .json()
    }

    /// Create a role.
    pub async fn create_guild_role(
        &self,
        guild_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Role> {
        self.send(
            Verb::Post,
            &format!("/guilds/{guild_id}/roles"),
            Body::Json {
                fields,
                schema: GUILD_ROLE,
            },
            SendOptions::default(),
        )
        .await?
        .json()
    }

    /// Modify a role.
    pub async fn modify_guild_role(
        &self,
        guild_id: &str,
        role_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Response> {
        self.send(
            Verb::Patch,
            &format!("/guilds/{guild_id}/roles/{role_id}"),
            Body::Json {
                fields,
                schema: GUILD_ROLE,
            },
            SendOptions::default(),
        )
        .await
    }

    /// Delete a role.
    pub async fn delete_guild_role(&self, guild_id: &str, role_id: &str) -> Result<Response> {
        self.send(
            Verb::Delete,
            &format!("/guilds/{guild_id}/roles/{role_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await
    }

    /// Leave a guild.
    pub async fn leave_guild(&self, guild_id: &str) -> Result<Response> {
        self.send(
            Verb::Delete,
            &format!("/users/@me/guilds/{guild_id}"),
            Body::None,
            SendOptions::default(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::ClientConfig;

    use super::*;

    fn test_client(server: &MockServer) -> RestClient {
        RestClient::new(&ClientConfig {
            token: "t".into(),
            api_url: server.uri(),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn bulk_delete_hits_the_canonical_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch/messages/bulk-delete"))
            .and(header("Content-Type", "application/json"))
            .and(body_json(json!({ "messages": ["m1", "m2", "m3"] })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        client
            .bulk_delete_messages("ch", &["m1", "m2", "m3"])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_message_sends_content_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch/messages"))
            .and(body_json(json!({ "content": "hi" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m1" })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let response = client.create_message("ch", "hi").await.unwrap();
        assert_eq!(response.data.unwrap()["id"], "m1");
    }

    #[tokio::test]
    async fn modify_guild_member_serializes_role_ids() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/guilds/g/members/u"))
            .and(body_json(json!({ "nick": "n", "roles": ["r1", "r2"] })))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let mut fields = Map::new();
        fields.insert("nick".into(), json!("n"));
        fields.insert("roles".into(), json!(["r1", "r2"]));
        client.modify_guild_member("g", "u", fields).await.unwrap();
    }

    #[tokio::test]
    async fn message_fetch_encodes_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/ch/messages"))
            .and(query_param("limit", "50"))
            .and(query_param("before", "m9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client = test_client(&server);
        client
            .get_channel_messages("ch", Some(50), Some("m9"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn file_uploads_are_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m1" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        client
            .upload_file("ch", "a.png", "image/png", b"\x89PNG", Some("here"))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let content_type = request
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let body = String::from_utf8_lossy(&request.body);
        assert!(body.contains("name=\"content\"\r\n\r\nhere"));
        assert!(body.contains("filename=\"a.png\""));
    }
}
