use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::models::{Platform, ScreenshotSet};
use crate::payload::SavePayload;
use crate::preview;
use crate::reconcile::{self, IdAllocator, StoredFile, StoredSet};
use crate::store::ScreenshotStore;

/// In-memory store with simulated latency, seeded with a fixed fixture.
///
/// Saves go through the same encoding and reconciliation as the real server,
/// so a reload after a save shows server-assigned ids.
pub struct MockStore {
    latency: Duration,
    inner: Mutex<MockInner>,
}

struct MockInner {
    sets: Vec<StoredSet>,
    ids: IdAllocator,
    save_calls: usize,
    last_payload: Option<SavePayload>,
}

impl MockStore {
    pub fn new(latency: Duration) -> Self {
        Self::with_sets(latency, fixture())
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.mock_latency())
    }

    pub fn with_sets(latency: Duration, sets: Vec<StoredSet>) -> Self {
        let ids = IdAllocator::after(&sets);
        Self {
            latency,
            inner: Mutex::new(MockInner {
                sets,
                ids,
                save_calls: 0,
                last_payload: None,
            }),
        }
    }

    pub fn save_calls(&self) -> usize {
        self.inner().save_calls
    }

    pub fn last_payload(&self) -> Option<SavePayload> {
        self.inner().last_payload.clone()
    }

    fn inner(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ScreenshotStore for MockStore {
    async fn load(&self, test_id: &str) -> Result<Vec<ScreenshotSet>> {
        tokio::time::sleep(self.latency).await;
        let sets = self.inner().sets.clone();
        debug!(test_id, sets = sets.len(), "mock load");
        Ok(reconcile::to_screenshot_sets(&sets, mock_src))
    }

    async fn save(&self, test_id: &str, screenshots: &[ScreenshotSet]) -> Result<()> {
        let payload = SavePayload::encode(screenshots);
        self.inner().save_calls += 1;

        let mut parts = Vec::with_capacity(payload.files.len());
        for upload in &payload.files {
            parts.push(upload.read().await?);
        }
        tokio::time::sleep(self.latency).await;

        let mut inner = self.inner();
        let mut ids = inner.ids;
        let sets = reconcile::reconcile(&inner.sets, &payload.screenshots, &parts, &mut ids)?;
        debug!(test_id, sets = sets.len(), parts = parts.len(), "mock save");
        inner.sets = sets;
        inner.ids = ids;
        inner.last_payload = Some(payload);
        Ok(())
    }
}

/// Fixture files carry no bytes and point at the bundled sample images.
fn mock_src(platform: &Platform, file: &StoredFile) -> String {
    if file.data.is_empty() {
        format!("/static/common/img/screenshot-{platform}.png")
    } else {
        preview::data_url(&file.data)
    }
}

fn fixture() -> Vec<StoredSet> {
    let mut next_file = 0;
    (0..2)
        .map(|set_id| StoredSet {
            id: set_id,
            name: format!("Screenshot set {}", set_id + 1),
            files: Platform::defaults()
                .into_iter()
                .map(|platform| {
                    let file = StoredFile {
                        id: next_file,
                        content_type: "image/png".to_string(),
                        data: Vec::new(),
                    };
                    next_file += 1;
                    (platform, file)
                })
                .collect(),
        })
        .collect()
}
