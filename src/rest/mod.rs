//! REST dispatcher: authenticated HTTPS requests with per-route rate
//! limiting.
//!
//! Every endpoint wrapper delegates to the single [`RestClient::send`]
//! primitive. The returned future is the continuation: it resolves once
//! with the decoded body and response metadata.

pub mod endpoints;
pub mod multipart;
pub mod ratelimit;
pub mod route;

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::schema::{self, Schema};

pub use multipart::MultipartForm;
pub use ratelimit::{RateLimitStore, RouteQuota};
pub use route::route_of;

/// HTTP verbs the dispatcher supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    /// Parse a verb string for dynamic callers.
    ///
    /// # Errors
    ///
    /// `Error::BadVerb` for anything other than the five supported verbs.
    pub fn parse(verb: &str) -> Result<Self> {
        match verb {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::BadVerb(other.to_string())),
        }
    }

    fn as_method(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Request body forms accepted by [`RestClient::send`].
#[derive(Debug, Clone)]
pub enum Body {
    /// No body.
    None,
    /// Pre-encoded bytes with their content type.
    Bytes {
        bytes: Vec<u8>,
        content_type: String,
    },
    /// A field map serialized through a schema table at send time.
    Json { fields: Map<String, Value>, schema: Schema },
}

/// Additional request headers or a content-type override.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Extra headers appended to the request.
    pub headers: Vec<(String, String)>,

    /// Override for the `Content-Type` header.
    pub content_type: Option<String>,
}

/// Decoded response body plus HTTP metadata.
#[derive(Debug, Clone)]
pub struct Response {
    /// Decoded JSON body, `None` for empty responses.
    pub data: Option<Value>,

    /// HTTP status code.
    pub status: u16,

    /// Response headers, lowercase keys.
    pub headers: HashMap<String, String>,
}

impl Response {
    /// Deserialize the body into a typed value.
    ///
    /// # Errors
    ///
    /// `Error::Decode` when the body is absent or does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self.data.clone().ok_or(Error::Decode {
            status: self.status,
        })?;
        serde_json::from_value(data).map_err(|_| Error::Decode {
            status: self.status,
        })
    }
}

fn header_u32(headers: &HashMap<String, String>, key: &str) -> Option<u32> {
    headers.get(key).and_then(|v| v.parse().ok())
}

fn header_u64(headers: &HashMap<String, String>, key: &str) -> Option<u64> {
    headers.get(key).and_then(|v| v.parse().ok())
}

/// REST dispatcher bound to one credential.
#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    authorization: String,
    limits: RateLimitStore,
    gateway_urls: Mutex<HashMap<String, String>>,
}

impl RestClient {
    /// Build a dispatcher from configuration.
    ///
    /// # Errors
    ///
    /// `Error::Http` when the underlying HTTP client cannot be constructed.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(format!(
                "DiscordBot ({}, {})",
                env!("CARGO_PKG_REPOSITORY"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        let scheme = if config.bearer { "Bearer" } else { "Bot" };
        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            authorization: format!("{scheme} {}", config.token),
            limits: RateLimitStore::new(),
            gateway_urls: Mutex::new(HashMap::new()),
        })
    }

    /// The rate-limit store backing this dispatcher.
    #[must_use]
    pub const fn limits(&self) -> &RateLimitStore {
        &self.limits
    }

    /// Issue a request. `resource` must start with `/`.
    ///
    /// # Errors
    ///
    /// `Error::RateLimited` / `Error::LocalRateLimit` before any socket I/O
    /// when a guard refuses; `Error::Status` for HTTP >= 300;
    /// `Error::Decode` for an unparseable body; `Error::Http` for transport
    /// failures.
    pub async fn send(
        &self,
        verb: Verb,
        resource: &str,
        body: Body,
        opts: SendOptions,
    ) -> Result<Response> {
        debug_assert!(resource.starts_with('/'), "resource must start with `/`");

        let route = route_of(resource);
        self.limits.acquire(&route)?;

        let url = format!("{}{}", self.base_url, resource);
        debug!(verb = verb.as_str(), resource, route = %route, "dispatching request");

        let mut request = self
            .http
            .request(verb.as_method(), &url)
            .header("Authorization", self.authorization.as_str());

        match body {
            Body::None => {}
            Body::Bytes {
                bytes,
                content_type,
            } => {
                let content_type = opts.content_type.clone().unwrap_or(content_type);
                request = request.header("Content-Type", content_type).body(bytes);
            }
            Body::Json { fields, schema } => {
                let encoded = schema::encode(&fields, schema)?;
                let content_type = opts
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/json".to_string());
                request = request
                    .header("Content-Type", content_type)
                    .body(encoded.to_string());
            }
        }

        for (name, value) in &opts.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        self.limits.update(
            &route,
            header_u32(&headers, "x-ratelimit-limit"),
            header_u32(&headers, "x-ratelimit-remaining"),
            header_u64(&headers, "x-ratelimit-reset"),
        );

        let bytes = response.bytes().await?;

        if status == 429 {
            let reset_in = self
                .limits
                .reset_in(&route)
                .or_else(|| {
                    header_u64(&headers, "retry-after").map(Duration::from_secs)
                })
                .unwrap_or(Duration::from_secs(5));
            warn!(route = %route, reset_in = ?reset_in, "rate limited by server");
            return Err(Error::RateLimited { reset_in });
        }

        if status >= 300 {
            return Err(Error::Status {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let data = if bytes.is_empty() {
            None
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(resource, error = %err, "undecodable response body");
                    return Err(Error::Decode { status });
                }
            }
        };

        Ok(Response {
            data,
            status,
            headers,
        })
    }

    /// Discover the gateway WebSocket URL, cached per base URL.
    ///
    /// # Errors
    ///
    /// Propagates the underlying `send` failure.
    pub async fn gateway_url(&self) -> Result<String> {
        if let Some(url) = self.gateway_urls.lock().get(&self.base_url) {
            return Ok(url.clone());
        }

        let response = self
            .send(Verb::Get, "/gateway", Body::None, SendOptions::default())
            .await?;
        let url = response
            .data
            .as_ref()
            .and_then(|d| d["url"].as_str())
            .ok_or(Error::Decode {
                status: response.status,
            })?
            .to_string();

        self.gateway_urls
            .lock()
            .insert(self.base_url.clone(), url.clone());
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config(server: &MockServer) -> ClientConfig {
        ClientConfig {
            token: "test_token_12345".into(),
            api_url: server.uri(),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn verb_parsing() {
        assert_eq!(Verb::parse("GET").unwrap(), Verb::Get);
        assert_eq!(Verb::parse("DELETE").unwrap(), Verb::Delete);
        assert!(matches!(Verb::parse("BREW"), Err(Error::BadVerb(v)) if v == "BREW"));
    }

    #[tokio::test]
    async fn requests_carry_bot_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .and(header("Authorization", "Bot test_token_12345"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RestClient::new(&test_config(&server)).unwrap();
        let response = client
            .send(Verb::Get, "/users/@me", Body::None, SendOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.data.unwrap()["id"], "1");
    }

    #[tokio::test]
    async fn bearer_credentials_switch_the_scheme() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .and(header("Authorization", "Bearer oauth_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
            .mount(&server)
            .await;

        let config = ClientConfig {
            token: "oauth_token".into(),
            bearer: true,
            api_url: server.uri(),
            ..ClientConfig::default()
        };
        let client = RestClient::new(&config).unwrap();
        assert!(client
            .send(Verb::Get, "/users/@me", Body::None, SendOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn schema_bodies_serialize_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch/messages/bulk-delete"))
            .and(header("Content-Type", "application/json"))
            .and(body_json(json!({ "messages": ["m1", "m2", "m3"] })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = RestClient::new(&test_config(&server)).unwrap();
        let mut fields = Map::new();
        fields.insert("messages".into(), json!(["m1", "m2", "m3"]));
        let response = client
            .send(
                Verb::Post,
                "/channels/ch/messages/bulk-delete",
                Body::Json {
                    fields,
                    schema: endpoints::BULK_DELETE_MESSAGES,
                },
                SendOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 204);
        assert!(response.data.is_none());
    }

    #[tokio::test]
    async fn exhausted_route_refuses_without_io() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch/messages"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("X-RateLimit-Limit", "5")
                    .insert_header("X-RateLimit-Remaining", "0")
                    .insert_header(
                        "X-RateLimit-Reset",
                        (std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap()
                            .as_secs()
                            + 10)
                            .to_string()
                            .as_str(),
                    )
                    .set_body_json(json!({ "message": "You are being rate limited." })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = RestClient::new(&test_config(&server)).unwrap();
        let first = client
            .send(
                Verb::Post,
                "/channels/ch/messages",
                Body::None,
                SendOptions::default(),
            )
            .await;
        assert!(matches!(first, Err(Error::RateLimited { .. })));

        let quota = client.limits().quota("/channels/ch").unwrap();
        assert_eq!(quota.limit, 5);
        assert_eq!(quota.remaining, 0);

        // The second send is refused locally; the mock's expect(1) verifies
        // no second request reached the socket.
        let second = client
            .send(
                Verb::Post,
                "/channels/ch/messages",
                Body::None,
                SendOptions::default(),
            )
            .await;
        match second {
            Err(Error::RateLimited { reset_in }) => {
                assert!(reset_in >= Duration::from_secs(8));
                assert!(reset_in <= Duration::from_secs(10));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_errors_surface_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "message": "401: Unauthorized" })),
            )
            .mount(&server)
            .await;

        let client = RestClient::new(&test_config(&server)).unwrap();
        match client
            .send(Verb::Get, "/users/@me", Body::None, SendOptions::default())
            .await
        {
            Err(Error::Status { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("Unauthorized"));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_bodies_are_decode_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = RestClient::new(&test_config(&server)).unwrap();
        assert!(matches!(
            client
                .send(Verb::Get, "/gateway", Body::None, SendOptions::default())
                .await,
            Err(Error::Decode { status: 200 })
        ));
    }

    #[tokio::test]
    async fn gateway_url_is_cached_per_base() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "url": "wss://gw.example" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = RestClient::new(&test_config(&server)).unwrap();
        assert_eq!(client.gateway_url().await.unwrap(), "wss://gw.example");
        assert_eq!(client.gateway_url().await.unwrap(), "wss://gw.example");
    }
}
