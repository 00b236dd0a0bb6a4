use async_trait::async_trait;
use serde_json::Value;

use super::SyncError;

/// Destination for full-document writes.
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    async fn write(&self, document: &Value) -> Result<(), SyncError>;
}

/// Posts the document to the server's update endpoint.
#[derive(Debug, Clone)]
pub struct HttpWriter {
    client: reqwest::Client,
    url: String,
}

impl HttpWriter {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/api/update", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl DocumentWriter for HttpWriter {
    async fn write(&self, document: &Value) -> Result<(), SyncError> {
        let response = self.client.post(&self.url).json(document).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status));
        }
        Ok(())
    }
}
