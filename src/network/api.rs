use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::common::{ChatError, ChatResult, Identity, Message, UserId};

/// REST endpoints the chat core consumes but does not own.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Conversation with `peer_id`, oldest first.
    async fn history(&self, peer_id: UserId) -> ChatResult<Vec<Message>>;

    async fn recent_contacts(&self) -> ChatResult<Vec<Identity>>;

    /// Emails of every user currently connected to the broker.
    async fn online_users(&self) -> ChatResult<Vec<String>>;
}

pub struct HttpChatApi {
    client: Client,
    base_url: String,
    credential: String,
}

impl HttpChatApi {
    pub fn new(base_url: &str, credential: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: credential.to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ChatResult<T> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        log::debug!("GET {url}");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.credential)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn history(&self, peer_id: UserId) -> ChatResult<Vec<Message>> {
        self.get_json(&format!("messages/{peer_id}"))
            .await
            .map_err(|err| ChatError::HistoryFetch(err.to_string()))
    }

    async fn recent_contacts(&self) -> ChatResult<Vec<Identity>> {
        self.get_json("chat/recent-contacts").await
    }

    async fn online_users(&self) -> ChatResult<Vec<String>> {
        self.get_json("chat/online-users").await
    }
}
