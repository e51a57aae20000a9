use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use reqwest::{
    RequestBuilder, Response, Url,
    header::{COOKIE, SET_COOKIE},
};
use serde::de::DeserializeOwned;

use crate::message::{ConversationSummary, Identity, Message, NewMessage};

/// Request/response side of messaging as seen by a client.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Persists a message from the session's user. Only returns once it is durable.
    async fn send_message(&self, receiver: &Identity, content: &str) -> anyhow::Result<Message>;

    /// Conversation with `peer`, oldest first.
    async fn history(&self, peer: &Identity) -> anyhow::Result<Vec<Message>>;
}

/// HTTP client for the `/api` endpoints, carrying the session cookie.
#[derive(Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    cookie: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> HttpApi {
        HttpApi {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            cookie: None,
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> HttpApi {
        self.cookie = Some(cookie.into());
        self
    }

    /// The `name=value` session cookie, for the socket handshake.
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// Signs in through the development login route and keeps the session cookie.
    pub async fn dev_login(&mut self, identity: &Identity) -> anyhow::Result<()> {
        let response = self
            .request(self.http.post(self.login_url(identity)?))
            .send()
            .await?;
        let response = check(response).await?;

        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .context("login response did not set a session cookie")?
            .to_str()?;
        let pair = cookie.split(';').next().unwrap_or_default().trim();
        self.cookie = Some(pair.to_owned());
        Ok(())
    }

    pub async fn recent(&self) -> anyhow::Result<Vec<Message>> {
        self.get_json("/messages/recent").await
    }

    pub async fn conversations(&self) -> anyhow::Result<Vec<ConversationSummary>> {
        self.get_json("/conversations").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url)
    }

    /// `/api/dev/login/{identity}` with the identity escaped as one path segment.
    fn login_url(&self, identity: &Identity) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.url("/dev/login"))?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("{} cannot be a base url", self.base_url))?
            .push(identity.as_str());
        Ok(url)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let response = self.request(self.http.get(self.url(path))).send().await?;
        Ok(check(response).await?.json().await?)
    }
}

async fn check(response: Response) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{status}: {body}")
}

#[async_trait]
impl MessageApi for HttpApi {
    async fn send_message(&self, receiver: &Identity, content: &str) -> anyhow::Result<Message> {
        let body = NewMessage {
            receiver: receiver.clone(),
            content: content.to_owned(),
        };
        let response = self
            .request(self.http.post(self.url("/messages")))
            .json(&body)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn history(&self, peer: &Identity) -> anyhow::Result<Vec<Message>> {
        let response = self
            .request(self.http.get(self.url("/messages")))
            .query(&[("userId", peer.as_str())])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}
