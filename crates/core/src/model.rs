//! The screenshot sync model: the edited collection of a test's screenshot
//! sets, its dirty tracking, and load/save against a [`ScreenshotStore`].
//!
//! Listeners subscribe to [`ModelEvent`]s and treat every `Changed` payload
//! as a read-only snapshot. Load and save share one exclusive token: while
//! either is in flight the model is disabled, further saves and all local
//! edits are ignored, and a second load waits its turn.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::{Platform, ScreenshotFile, ScreenshotSet, Upload};
use crate::preview::{self, Preview};
use crate::store::ScreenshotStore;

const EVENT_CAPACITY: usize = 64;
pub const LOAD_ERROR_MESSAGE: &str = "Error getting screenshots";
pub const SAVE_ERROR_FOR: &str = "save screenshots";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    Changed(Vec<ScreenshotSet>),
    /// The store has been slow to answer; views may show a spinner.
    Waiting,
    Error(ErrorNotice),
    Saved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
    pub status: Option<u16>,
    pub reason: Option<String>,
    pub error_for: Option<String>,
}

impl ErrorNotice {
    fn load_failure() -> Self {
        Self {
            message: LOAD_ERROR_MESSAGE.to_string(),
            status: None,
            reason: None,
            error_for: None,
        }
    }

    fn save_failure(err: &Error) -> Self {
        let reason = match err {
            Error::Status { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        Self {
            message: err.to_string(),
            status: err.status(),
            reason: Some(reason),
            error_for: Some(SAVE_ERROR_FOR.to_string()),
        }
    }

    fn preview_failure(file_name: &str, err: &Error) -> Self {
        Self {
            message: format!("Could not read {file_name}"),
            status: None,
            reason: Some(err.to_string()),
            error_for: None,
        }
    }
}

pub struct ScreenshotsModel {
    test_id: String,
    store: Arc<dyn ScreenshotStore>,
    waiting_grace: Duration,
    state: Mutex<ModelState>,
    busy: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ModelEvent>,
}

#[derive(Default)]
struct ModelState {
    screenshots: Vec<ScreenshotSet>,
    original: Vec<ScreenshotSet>,
    loaded: bool,
    next_serial: u64,
}

/// A preview read started by `add_uploaded_files`.
struct PendingRead {
    index: usize,
    platform: Platform,
    upload: Upload,
    previous: ScreenshotFile,
}

impl ScreenshotsModel {
    pub fn new(
        test_id: impl Into<String>,
        store: Arc<dyn ScreenshotStore>,
        config: &SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            test_id: test_id.into(),
            store,
            waiting_grace: config.waiting_grace(),
            state: Mutex::new(ModelState::default()),
            busy: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.events.subscribe()
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn screenshots(&self) -> Vec<ScreenshotSet> {
        self.state().screenshots.clone()
    }

    pub fn original_screenshots(&self) -> Vec<ScreenshotSet> {
        self.state().original.clone()
    }

    /// Whether any load has succeeded yet.
    pub fn has_loaded(&self) -> bool {
        self.state().loaded
    }

    /// True while a load or save holds the model.
    pub fn is_disabled(&self) -> bool {
        self.busy.try_lock().is_err()
    }

    pub async fn load(&self) {
        let _token = self.busy.lock().await;
        self.load_locked().await;
    }

    async fn load_locked(&self) {
        debug!(test_id = %self.test_id, "loading screenshots");
        match self.with_waiting_notice(self.store.load(&self.test_id)).await {
            Ok(sets) => {
                let snapshot = {
                    let mut state = self.state();
                    state.original = sets.clone();
                    state.screenshots = sets;
                    state.loaded = true;
                    state.screenshots.clone()
                };
                debug!(test_id = %self.test_id, sets = snapshot.len(), "screenshots loaded");
                self.emit(ModelEvent::Changed(snapshot));
            }
            Err(err) => {
                warn!(test_id = %self.test_id, error = %err, "failed to load screenshots");
                self.emit(ModelEvent::Error(ErrorNotice::load_failure()));
            }
        }
    }

    pub async fn save(&self) {
        let Ok(_token) = self.busy.try_lock() else {
            debug!(test_id = %self.test_id, "save ignored, model is disabled");
            return;
        };
        let screenshots = self.screenshots();
        debug!(test_id = %self.test_id, sets = screenshots.len(), "saving screenshots");
        match self
            .with_waiting_notice(self.store.save(&self.test_id, &screenshots))
            .await
        {
            Ok(()) => {
                self.emit(ModelEvent::Saved);
                self.load_locked().await;
            }
            Err(err) => {
                warn!(test_id = %self.test_id, error = %err, "failed to save screenshots");
                self.emit(ModelEvent::Error(ErrorNotice::save_failure(&err)));
            }
        }
    }

    /// Attaches `files` for `platform`.
    ///
    /// With no `index` every file starts a new set. With an index, file `k`
    /// replaces the platform's image of set `index + k`, keeping that slot's
    /// id; files left over once the sets run out start new sets. `Changed`
    /// fires once, after every preview of this call has been read.
    pub async fn add_uploaded_files(
        &self,
        files: Vec<Upload>,
        index: Option<usize>,
        platform: &Platform,
    ) {
        if self.is_disabled() {
            debug!(test_id = %self.test_id, "upload ignored, model is disabled");
            return;
        }
        let reads = self.state().attach(files, index, platform);

        let mut tasks = JoinSet::new();
        for read in reads {
            tasks.spawn(async move {
                let result = preview::read_preview(&read.upload).await;
                (read, result)
            });
        }
        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!(error = %err, "preview task failed"),
            }
        }

        let (notices, snapshot) = {
            let mut state = self.state();
            let notices: Vec<ErrorNotice> = outcomes
                .into_iter()
                .filter_map(|(read, result)| state.apply_preview(read, result))
                .collect();
            (notices, state.screenshots.clone())
        };
        for notice in notices {
            self.emit(ModelEvent::Error(notice));
        }
        self.emit(ModelEvent::Changed(snapshot));
    }

    /// Clears one image slot, leaving an empty marker the next save leaves out.
    pub fn delete_file(&self, index: usize, platform: &Platform) {
        if self.is_disabled() {
            return;
        }
        let snapshot = {
            let mut state = self.state();
            let Some(slot) = state
                .screenshots
                .get_mut(index)
                .and_then(|set| set.files.get_mut(platform))
            else {
                return;
            };
            if slot.is_empty() {
                return;
            }
            *slot = ScreenshotFile::empty_marker();
            state.screenshots.clone()
        };
        self.emit(ModelEvent::Changed(snapshot));
    }

    pub fn set_name(&self, index: usize, name: impl Into<String>) {
        if self.is_disabled() {
            return;
        }
        let name = name.into();
        let snapshot = {
            let mut state = self.state();
            let changed = state
                .original
                .get(index)
                .map_or(true, |original| original.name != name);
            let Some(set) = state.screenshots.get_mut(index) else {
                return;
            };
            set.name = name;
            set.changed = changed;
            state.screenshots.clone()
        };
        self.emit(ModelEvent::Changed(snapshot));
    }

    async fn with_waiting_notice<T, F>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        tokio::pin!(work);
        let early = tokio::select! {
            biased;
            out = &mut work => Some(out),
            _ = tokio::time::sleep(self.waiting_grace) => None,
        };
        match early {
            Some(out) => out,
            None => {
                self.emit(ModelEvent::Waiting);
                work.await
            }
        }
    }

    fn emit(&self, event: ModelEvent) {
        let _ = self.events.send(event);
    }

    fn state(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ModelState {
    fn attach(
        &mut self,
        files: Vec<Upload>,
        index: Option<usize>,
        platform: &Platform,
    ) -> Vec<PendingRead> {
        let mut reads = Vec::new();
        let mut remaining = files.into_iter();

        if let Some(start) = index {
            let mut position = start;
            while position < self.screenshots.len() {
                let Some(upload) = remaining.next() else {
                    break;
                };
                let previous = self.screenshots[position]
                    .files
                    .get(platform)
                    .cloned()
                    .unwrap_or_else(ScreenshotFile::empty_marker);
                reads.push(self.attach_one(position, platform, upload, previous));
                position += 1;
            }
        }

        for upload in remaining {
            self.screenshots.push(ScreenshotSet {
                changed: true,
                ..ScreenshotSet::default()
            });
            let position = self.screenshots.len() - 1;
            reads.push(self.attach_one(
                position,
                platform,
                upload,
                ScreenshotFile::empty_marker(),
            ));
        }
        reads
    }

    fn attach_one(
        &mut self,
        position: usize,
        platform: &Platform,
        mut upload: Upload,
        previous: ScreenshotFile,
    ) -> PendingRead {
        upload.serial = self.next_serial;
        self.next_serial += 1;
        let file = ScreenshotFile::pending(upload.clone(), previous.id);
        self.screenshots[position]
            .files
            .insert(platform.clone(), file);
        PendingRead {
            index: position,
            platform: platform.clone(),
            upload,
            previous,
        }
    }

    /// Stores a finished preview read. Reads whose slot has since been
    /// replaced or cleared are dropped.
    fn apply_preview(&mut self, read: PendingRead, result: Result<Preview>) -> Option<ErrorNotice> {
        let slot = self
            .screenshots
            .get_mut(read.index)
            .and_then(|set| set.files.get_mut(&read.platform))?;
        let current = slot.file.as_mut()?;
        if current.serial != read.upload.serial {
            return None;
        }
        match result {
            Ok(preview) => {
                current.content = Some(preview.bytes);
                slot.src = preview.data_url;
                None
            }
            Err(err) => {
                warn!(file = %read.upload.file_name, error = %err, "failed to read screenshot");
                let notice = ErrorNotice::preview_failure(&read.upload.file_name, &err);
                *slot = read.previous;
                Some(notice)
            }
        }
    }
}
