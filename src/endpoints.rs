//! Typed request builders for the Discord REST API
//!
//! Every endpoint the purge touches gets its own constructor taking the
//! exact IDs it needs, so paths are never assembled by positional formatting.

use crate::types::{Result, Snowflake};
use reqwest::Method;
use serde::Serialize;

/// Default API root
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v6";

/// Page size for message search
pub const SEARCH_PAGE_LIMIT: u32 = 25;

/// A fully formed request, ready to be dispatched any number of times
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,

    /// Path relative to the API root, including any query string
    pub path: String,

    /// Serialized JSON body
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    fn get(path: String) -> Self {
        Self {
            method: Method::GET,
            path,
            body: None,
        }
    }

    fn with_json<T: Serialize>(method: Method, path: String, body: &T) -> Result<Self> {
        Ok(Self {
            method,
            path,
            body: Some(serde_json::to_vec(body)?),
        })
    }
}

#[derive(Serialize)]
struct OpenDm<'a> {
    recipient_id: &'a Snowflake,
}

pub fn me() -> ApiRequest {
    ApiRequest::get("/users/@me".to_string())
}

pub fn relationships() -> ApiRequest {
    ApiRequest::get("/users/@me/relationships".to_string())
}

pub fn guilds() -> ApiRequest {
    ApiRequest::get("/users/@me/guilds".to_string())
}

pub fn guild_channels(guild_id: &Snowflake) -> ApiRequest {
    ApiRequest::get(format!("/guilds/{guild_id}/channels"))
}

/// Open DM channels of the current user
pub fn channels() -> ApiRequest {
    ApiRequest::get("/users/@me/channels".to_string())
}

/// Resolve (or open) the DM channel with a user
pub fn open_dm(recipient_id: &Snowflake) -> Result<ApiRequest> {
    ApiRequest::with_json(
        Method::POST,
        "/users/@me/channels".to_string(),
        &OpenDm { recipient_id },
    )
}

pub fn guild_search(guild_id: &Snowflake, author_id: &Snowflake, offset: u32) -> ApiRequest {
    ApiRequest::get(format!(
        "/guilds/{guild_id}/messages/search{}",
        search_query(author_id, offset)
    ))
}

pub fn channel_search(channel_id: &Snowflake, author_id: &Snowflake, offset: u32) -> ApiRequest {
    ApiRequest::get(format!(
        "/channels/{channel_id}/messages/search{}",
        search_query(author_id, offset)
    ))
}

pub fn delete_message(channel_id: &Snowflake, message_id: &Snowflake) -> ApiRequest {
    ApiRequest {
        method: Method::DELETE,
        path: format!("/channels/{channel_id}/messages/{message_id}"),
        body: None,
    }
}

fn search_query(author_id: &Snowflake, offset: u32) -> String {
    format!("?author_id={author_id}&include_nsfw=true&offset={offset}&limit={SEARCH_PAGE_LIMIT}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Snowflake {
        Snowflake::parse(s).unwrap()
    }

    #[test]
    fn test_search_paths() {
        let req = channel_search(&id("100"), &id("7"), 3);
        assert_eq!(req.method, Method::GET);
        assert_eq!(
            req.path,
            "/channels/100/messages/search?author_id=7&include_nsfw=true&offset=3&limit=25"
        );

        let req = guild_search(&id("200"), &id("7"), 0);
        assert_eq!(
            req.path,
            "/guilds/200/messages/search?author_id=7&include_nsfw=true&offset=0&limit=25"
        );
    }

    #[test]
    fn test_delete_and_open_dm() {
        let req = delete_message(&id("100"), &id("55"));
        assert_eq!(req.method, Method::DELETE);
        assert_eq!(req.path, "/channels/100/messages/55");
        assert!(req.body.is_none());

        let req = open_dm(&id("9")).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "/users/@me/channels");
        assert_eq!(req.body.as_deref(), Some(br#"{"recipient_id":"9"}"#.as_slice()));
    }
}
