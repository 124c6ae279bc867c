//! Authenticated request dispatch with server-directed backoff
//!
//! The dispatcher owns the HTTP client and the request counter. Each response
//! status is mapped onto one of a fixed set of dispositions; throttling is
//! absorbed here so that callers only ever see the final answer.

use crate::endpoints::ApiRequest;
use crate::types::{BackoffDirective, Error, Result, ResultExt};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-request timeout, independent of backoff sleeps
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How a response status is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 200: decode the body
    Ok,
    /// 204: success without a body
    NoContent,
    /// 202: search index still building, may carry a backoff directive
    Accepted,
    /// 429: wait and retry
    Throttled,
    /// 403: soft denial, the caller decides what it means
    Forbidden,
    BadRequest,
    Unauthorized,
    ServerError,
    Unhandled,
}

impl StatusClass {
    pub fn of(status: StatusCode) -> Self {
        match status {
            s if s.is_server_error() => StatusClass::ServerError,
            StatusCode::OK => StatusClass::Ok,
            StatusCode::NO_CONTENT => StatusClass::NoContent,
            StatusCode::ACCEPTED => StatusClass::Accepted,
            StatusCode::TOO_MANY_REQUESTS => StatusClass::Throttled,
            StatusCode::FORBIDDEN => StatusClass::Forbidden,
            StatusCode::BAD_REQUEST => StatusClass::BadRequest,
            StatusCode::UNAUTHORIZED => StatusClass::Unauthorized,
            _ => StatusClass::Unhandled,
        }
    }
}

/// Final answer to a request once throttling is out of the way
#[derive(Debug)]
enum Reply {
    Body(Vec<u8>),
    Empty,
    /// 403: the server refused without failing the run
    Denied(StatusCode),
}

/// What became of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Soft-denied; the message is still there
    Denied,
}

/// Backoff bookkeeping for one logical request
#[derive(Debug, Default)]
struct BackoffState {
    attempts: u32,
    waited: Duration,
}

impl BackoffState {
    async fn wait(&mut self, directive: &BackoffDirective) {
        let delay = directive.delay();
        self.attempts += 1;
        self.waited += delay;
        info!(
            "Server asked us to sleep for {} milliseconds (retry {}, {:?} waited so far)",
            delay.as_millis(),
            self.attempts,
            self.waited
        );
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Sends requests to the Discord API on behalf of one account
pub struct Dispatcher {
    http: reqwest::Client,
    base_url: String,
    requests: u64,
}

impl Dispatcher {
    /// Create a dispatcher that authenticates every request with `token`
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(token)
            .map_err(|e| Error::Config(format!("Invalid token header value: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            requests: 0,
        })
    }

    /// Number of requests that reached the network so far
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Send a request and decode a 200 body into `T`
    ///
    /// Returns `None` for responses that succeed without a body (204, bare 202)
    /// and for soft denials (403). Throttled requests are re-sent unchanged
    /// until the server stops throttling.
    pub async fn send<T: DeserializeOwned>(&mut self, request: &ApiRequest) -> Result<Option<T>> {
        match self.dispatch(request).await? {
            Reply::Body(body) => {
                let data = serde_json::from_slice(&body)
                    .map_err(Error::from)
                    .context("Error decoding response")?;
                Ok(Some(data))
            }
            Reply::Empty => Ok(None),
            Reply::Denied(status) => {
                warn!("Server returned {} for {}, skipping", status, request.path);
                Ok(None)
            }
        }
    }

    /// Send a delete request, telling a soft denial apart from a removal
    pub async fn delete(&mut self, request: &ApiRequest) -> Result<DeleteOutcome> {
        match self.dispatch(request).await? {
            Reply::Body(_) | Reply::Empty => Ok(DeleteOutcome::Deleted),
            Reply::Denied(_) => Ok(DeleteOutcome::Denied),
        }
    }

    /// Send a request that must produce a body
    pub async fn send_expecting<T: DeserializeOwned>(&mut self, request: &ApiRequest) -> Result<T> {
        self.send(request)
            .await?
            .ok_or_else(|| Error::MissingBody(request.path.clone()))
    }

    async fn dispatch(&mut self, request: &ApiRequest) -> Result<Reply> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut backoff = BackoffState::default();

        loop {
            debug!("{} {}", request.method, url);

            let mut builder = self.http.request(request.method.clone(), &url);
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }
            let response = builder
                .send()
                .await
                .map_err(Error::from)
                .context("Error sending request")?;
            self.requests += 1;

            let status = response.status();
            debug!("Server returned status {}", status);

            match StatusClass::of(status) {
                StatusClass::Ok => return Ok(Reply::Body(response.bytes().await?.to_vec())),
                StatusClass::NoContent => return Ok(Reply::Empty),
                StatusClass::Accepted => {
                    let body = response.bytes().await?;
                    match serde_json::from_slice::<BackoffDirective>(&body) {
                        Ok(directive) if directive.retry_after.is_some() => {
                            debug!("Search index not ready yet");
                            backoff.wait(&directive).await;
                        }
                        _ => return Ok(Reply::Empty),
                    }
                }
                StatusClass::Throttled => {
                    let body = response.bytes().await?;
                    let directive: BackoffDirective = serde_json::from_slice(&body)
                        .map_err(Error::from)
                        .context("Error decoding backoff directive")?;
                    backoff.wait(&directive).await;
                }
                StatusClass::Forbidden => return Ok(Reply::Denied(status)),
                StatusClass::BadRequest => {
                    return Err(Error::BadRequest {
                        status,
                        endpoint: request.path.clone(),
                    });
                }
                StatusClass::Unauthorized => return Err(Error::Unauthorized(status)),
                StatusClass::ServerError => {
                    return Err(Error::ServerError {
                        status,
                        endpoint: request.path.clone(),
                    });
                }
                StatusClass::Unhandled => {
                    return Err(Error::UnhandledStatus {
                        status,
                        endpoint: request.path.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints;
    use crate::types::{Me, Snowflake};
    use std::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher(server: &MockServer) -> Dispatcher {
        Dispatcher::new(&server.uri(), "test-token").unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(StatusClass::of(StatusCode::OK), StatusClass::Ok);
        assert_eq!(StatusClass::of(StatusCode::NO_CONTENT), StatusClass::NoContent);
        assert_eq!(StatusClass::of(StatusCode::ACCEPTED), StatusClass::Accepted);
        assert_eq!(StatusClass::of(StatusCode::TOO_MANY_REQUESTS), StatusClass::Throttled);
        assert_eq!(StatusClass::of(StatusCode::FORBIDDEN), StatusClass::Forbidden);
        assert_eq!(StatusClass::of(StatusCode::BAD_REQUEST), StatusClass::BadRequest);
        assert_eq!(StatusClass::of(StatusCode::UNAUTHORIZED), StatusClass::Unauthorized);
        assert_eq!(StatusClass::of(StatusCode::BAD_GATEWAY), StatusClass::ServerError);
        assert_eq!(StatusClass::of(StatusCode::NOT_FOUND), StatusClass::Unhandled);
        assert_eq!(StatusClass::of(StatusCode::IM_A_TEAPOT), StatusClass::Unhandled);
    }

    #[tokio::test]
    async fn test_sends_auth_headers_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .and(header("authorization", "test-token"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "42"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut d = dispatcher(&server);
        let me: Me = d.send_expecting(&endpoints::me()).await.unwrap();
        assert_eq!(me.id.as_str(), "42");
        assert_eq!(d.requests(), 1);
    }

    #[tokio::test]
    async fn test_throttled_request_waits_and_retries_identically() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/@me/channels"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(serde_json::json!({"retry_after": 500})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/users/@me/channels"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "77", "type": 1, "recipients": []})),
            )
            .mount(&server)
            .await;

        let mut d = dispatcher(&server);
        let request = endpoints::open_dm(&Snowflake::parse("9").unwrap()).unwrap();
        let started = Instant::now();
        let channel: crate::types::Channel = d.send_expecting(&request).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(channel.id.as_str(), "77");
        assert_eq!(d.requests(), 2);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].method, received[1].method);
        assert_eq!(received[0].url, received[1].url);
        assert_eq!(received[0].body, received[1].body);
        assert_eq!(received[0].body, br#"{"recipient_id":"9"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_non_positive_directive_retries_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(serde_json::json!({"retry_after": -250})),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
            .mount(&server)
            .await;

        let mut d = dispatcher(&server);
        let started = Instant::now();
        let me: Me = d.send_expecting(&endpoints::me()).await.unwrap();
        assert_eq!(me.id.as_str(), "1");
        assert_eq!(d.requests(), 3);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_accepted_with_directive_waits_for_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(202).set_body_json(serde_json::json!({"retry_after": 50})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"total_results": 0, "messages": []})),
            )
            .mount(&server)
            .await;

        let mut d = dispatcher(&server);
        let started = Instant::now();
        let id = Snowflake::parse("1").unwrap();
        let request = endpoints::channel_search(&id, &id, 0);
        let page: Option<crate::types::MessagePage> = d.send(&request).await.unwrap();
        assert!(page.unwrap().is_empty());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(d.requests(), 2);
    }

    #[tokio::test]
    async fn test_bodyless_success_and_soft_denial() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let mut d = dispatcher(&server);
        let id = Snowflake::parse("1").unwrap();
        let deleted = d.delete(&endpoints::delete_message(&id, &id)).await.unwrap();
        assert_eq!(deleted, DeleteOutcome::Deleted);
        let opened: Option<Me> = d.send(&endpoints::open_dm(&id).unwrap()).await.unwrap();
        assert!(opened.is_none());
        let denied: Option<Me> = d.send(&endpoints::me()).await.unwrap();
        assert!(denied.is_none());
        assert_eq!(d.requests(), 3);

        let err = d.send_expecting::<Me>(&endpoints::me()).await.unwrap_err();
        assert!(matches!(err, Error::MissingBody(_)));
    }

    #[tokio::test]
    async fn test_denied_delete_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/channels/1/messages/2"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let mut d = dispatcher(&server);
        let request = endpoints::delete_message(
            &Snowflake::parse("1").unwrap(),
            &Snowflake::parse("2").unwrap(),
        );
        let outcome = d.delete(&request).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Denied);
        assert_eq!(d.requests(), 1);
    }

    #[tokio::test]
    async fn test_fatal_statuses_are_not_retried() {
        let cases = [
            (400, "Bad status code 400"),
            (401, "is your token correct?"),
            (500, "Server error 500"),
            (404, "is unhandled"),
        ];

        for (code, needle) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(code))
                .expect(1)
                .mount(&server)
                .await;

            let mut d = dispatcher(&server);
            let err = d.send::<Me>(&endpoints::me()).await.unwrap_err();
            assert!(err.to_string().contains(needle), "{code}: got {err}");
            assert_eq!(d.requests(), 1);
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_wrapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let mut d = dispatcher(&server);
        let err = d.send::<Me>(&endpoints::me()).await.unwrap_err();
        assert!(err.to_string().starts_with("Error decoding response"));
        assert!(matches!(err.root(), Error::Json(_)));
    }
}
