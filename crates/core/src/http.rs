use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::models::ScreenshotSet;
use crate::payload::{LoadResponse, SavePayload, FILES_FIELD, SCREENSHOTS_FIELD};
use crate::preview::sniff_mime;
use crate::store::ScreenshotStore;

/// Store backed by the IDE's screenshot endpoints.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    project_id: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, project_id)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
        }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        Self::new(server.base_url.clone(), server.project_id.clone())
    }

    pub fn endpoint(&self, test_id: &str, action: &str) -> String {
        format!(
            "{}/ide/project/{}/test/{}/screenshots/{}",
            self.base_url, self.project_id, test_id, action
        )
    }

    async fn build_form(&self, payload: &SavePayload) -> Result<Form> {
        let mut form = Form::new().text(SCREENSHOTS_FIELD, payload.metadata_json()?);
        for upload in &payload.files {
            let bytes = upload.read().await?;
            let mime = sniff_mime(&bytes);
            let part = Part::bytes(bytes)
                .file_name(upload.file_name.clone())
                .mime_str(mime)?;
            form = form.part(FILES_FIELD, part);
        }
        Ok(form)
    }
}

#[async_trait]
impl ScreenshotStore for HttpStore {
    async fn load(&self, test_id: &str) -> Result<Vec<ScreenshotSet>> {
        let url = self.endpoint(test_id, "load");
        debug!(%url, "loading screenshots");
        let response = ensure_success(self.client.get(&url).send().await?).await?;
        let body: LoadResponse = response.json().await?;
        Ok(body.screenshots.into_iter().map(ScreenshotSet::from).collect())
    }

    async fn save(&self, test_id: &str, screenshots: &[ScreenshotSet]) -> Result<()> {
        let url = self.endpoint(test_id, "save");
        let payload = SavePayload::encode(screenshots);
        debug!(
            %url,
            sets = payload.screenshots.len(),
            parts = payload.files.len(),
            "saving screenshots"
        );
        let form = self.build_form(&payload).await?;
        ensure_success(self.client.post(&url).multipart(form).send().await?).await?;
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let reason = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(Error::Status {
        status: status.as_u16(),
        reason,
    })
}
