//! HTTP transport behind the BrowserStack client.
//!
//! The client describes each call as an [`ApiRequest`] and hands it to a
//! [`Transport`] together with the credentials. The production transport is
//! [`HttpTransport`] (blocking reqwest); tests plug in a recording fake.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::blocking::multipart::Form;
use serde_json::Value;

/// User agent sent with every BrowserStack request.
pub const USER_AGENT: &str = concat!("appautomate/", env!("CARGO_PKG_VERSION"));

/// Basic-auth credentials for BrowserStack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserStackAuth {
    pub username: String,
    pub access_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    /// Multipart form with a `file` part and an optional `data` text part.
    Multipart { file: PathBuf, data: Option<String> },
    Json(Value),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Multipart { .. } => "multipart",
            Payload::Json(_) => "json",
        }
    }
}

/// A fully described BrowserStack call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub payload: Payload,
}

/// Status and body of a completed HTTP exchange, success or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs one HTTP exchange.
///
/// Implementations return `Ok` for any response that arrived, whatever its
/// status; `Err` is reserved for failures where no response exists (DNS,
/// TLS, connection reset, unreadable local file).
pub trait Transport {
    fn send(&self, auth: &BrowserStackAuth, request: &ApiRequest) -> anyhow::Result<RawResponse>;
}

/// Blocking reqwest transport. No timeout is configured.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(None::<Duration>)
            .build()
            .context("building HTTP client")?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn send(&self, auth: &BrowserStackAuth, request: &ApiRequest) -> anyhow::Result<RawResponse> {
        let builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        }
        .basic_auth(&auth.username, Some(&auth.access_key));

        let builder = match &request.payload {
            Payload::Empty => builder,
            Payload::Multipart { file, data } => {
                let mut form = Form::new()
                    .file("file", file)
                    .with_context(|| format!("reading {:?}", file))?;
                if let Some(data) = data {
                    form = form.text("data", data.clone());
                }
                builder.multipart(form)
            }
            Payload::Json(body) => builder.json(body),
        };

        let resp = builder
            .send()
            .with_context(|| format!("{} {}", request.method.as_str(), request.url))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .with_context(|| format!("reading response body from {}", request.url))?
            .to_vec();
        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Transport that replays canned responses and records every request.
    #[derive(Default)]
    pub struct FakeTransport {
        responses: RefCell<VecDeque<anyhow::Result<RawResponse>>>,
        pub requests: RefCell<Vec<ApiRequest>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, status: u16, body: impl Into<Vec<u8>>) -> Self {
            self.responses.borrow_mut().push_back(Ok(RawResponse {
                status,
                body: body.into(),
            }));
            self
        }

        pub fn respond_json(self, status: u16, body: Value) -> Self {
            self.respond(status, body.to_string())
        }

        pub fn fail(self, message: &str) -> Self {
            self.responses
                .borrow_mut()
                .push_back(Err(anyhow::anyhow!(message.to_string())));
            self
        }

        pub fn calls(&self) -> usize {
            self.requests.borrow().len()
        }

        pub fn request(&self, index: usize) -> ApiRequest {
            self.requests.borrow()[index].clone()
        }
    }

    impl Transport for FakeTransport {
        fn send(&self, _auth: &BrowserStackAuth, request: &ApiRequest) -> anyhow::Result<RawResponse> {
            self.requests.borrow_mut().push(request.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no canned response for {}", request.url)))
        }
    }
}
