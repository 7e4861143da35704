use async_trait::async_trait;

use crate::error::Result;
use crate::models::ScreenshotSet;

/// Remote home of a test's screenshot sets.
///
/// `load` returns the authoritative collection; `save` persists the edited
/// collection (see [`crate::payload::SavePayload`] for what is transmitted).
#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    async fn load(&self, test_id: &str) -> Result<Vec<ScreenshotSet>>;

    async fn save(&self, test_id: &str, screenshots: &[ScreenshotSet]) -> Result<()>;
}
