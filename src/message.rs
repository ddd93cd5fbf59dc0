use serde::Deserialize;
use thiserror::Error;

/// Image-push notification as sent by the registry webhook.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PushEvent {
    pub callback_url: String,
    pub push_data: PushData,
    pub repository: Repository,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PushData {
    pub tag: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Repository {
    pub repo_name: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid push event payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("push event is missing {0}")]
    Missing(&'static str),
}

impl PushEvent {
    /// Decodes a webhook body. Tag and repository name must be non-empty.
    pub fn from_slice(body: &[u8]) -> Result<Self, DecodeError> {
        let event: PushEvent = serde_json::from_slice(body)?;

        if event.repository.repo_name.is_empty() {
            return Err(DecodeError::Missing("repository.repo_name"));
        }
        if event.push_data.tag.is_empty() {
            return Err(DecodeError::Missing("push_data.tag"));
        }

        Ok(event)
    }

    pub fn tag(&self) -> &str {
        &self.push_data.tag
    }

    pub fn repo_name(&self) -> &str {
        &self.repository.repo_name
    }
}
