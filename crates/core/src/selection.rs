use tokio::sync::broadcast;

use crate::config::{LayoutConfig, SyncConfig};
use crate::models::Platform;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    Changed { platforms: Vec<Platform> },
    /// New width in pixels for the hosting container.
    Resized { width: u32 },
}

/// Which platform columns are visible: all of them, or a single isolated one.
pub struct SelectionState {
    supported: Vec<Platform>,
    isolated: Option<Platform>,
    layout: LayoutConfig,
    events: broadcast::Sender<SelectionEvent>,
}

impl SelectionState {
    pub fn new(config: &SyncConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            supported: config.platforms.clone(),
            isolated: None,
            layout: config.layout,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SelectionEvent> {
        self.events.subscribe()
    }

    /// Isolates `platform`, or goes back to all platforms if it already was.
    pub fn toggle(&mut self, platform: &Platform) {
        if self.isolated.as_ref() == Some(platform) {
            self.isolated = None;
        } else {
            self.isolated = Some(platform.clone());
        }
        let _ = self.events.send(SelectionEvent::Changed {
            platforms: self.visible(),
        });
        let _ = self.events.send(SelectionEvent::Resized {
            width: self.width(),
        });
    }

    pub fn initial(&self) -> Vec<Platform> {
        self.supported.clone()
    }

    pub fn isolated(&self) -> Option<&Platform> {
        self.isolated.as_ref()
    }

    pub fn visible(&self) -> Vec<Platform> {
        match &self.isolated {
            Some(platform) => vec![platform.clone()],
            None => self.initial(),
        }
    }

    pub fn width(&self) -> u32 {
        let count = self.visible().len() as u32;
        self.layout.base_offset + self.layout.per_platform * count
    }
}
