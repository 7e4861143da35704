use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type SetId = u64;
pub type FileId = u64;

/// Target hardware identifier a screenshot is captured for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform(String);

impl Platform {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The platforms recognised when no configuration says otherwise.
    pub fn defaults() -> Vec<Platform> {
        ["aplite", "basalt", "chalk"]
            .into_iter()
            .map(Platform::new)
            .collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Platform {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Raw image payload chosen locally and not yet confirmed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub path: Option<PathBuf>,
    pub content: Option<Vec<u8>>,
    pub(crate) serial: u64,
}

impl Upload {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            file_name: file_name_of(&path),
            path: Some(path),
            content: None,
            serial: 0,
        }
    }

    pub fn from_bytes(file_name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            path: None,
            content: Some(content),
            serial: 0,
        }
    }

    /// Returns the payload bytes, reading them from disk if they have not been loaded yet.
    pub async fn read(&self) -> Result<Vec<u8>> {
        if let Some(content) = &self.content {
            return Ok(content.clone());
        }
        match &self.path {
            Some(path) => Ok(tokio::fs::read(path).await?),
            None => Err(Error::InvalidArgument(format!(
                "upload {} has neither content nor path",
                self.file_name
            ))),
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .unwrap_or_else(|| "screenshot".to_string())
}

/// One image for one platform within a screenshot set.
///
/// A pending `file` always comes with `is_new`. `id` and `file` are both set
/// while a re-upload of an already stored image waits to be saved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenshotFile {
    pub is_new: bool,
    pub id: Option<FileId>,
    pub file: Option<Upload>,
    pub src: String,
    pub changed: bool,
}

impl ScreenshotFile {
    pub fn stored(id: FileId, src: impl Into<String>) -> Self {
        Self {
            is_new: false,
            id: Some(id),
            file: None,
            src: src.into(),
            changed: false,
        }
    }

    pub fn pending(upload: Upload, id: Option<FileId>) -> Self {
        Self {
            is_new: true,
            id,
            file: Some(upload),
            src: String::new(),
            changed: true,
        }
    }

    /// Slot whose image was removed locally.
    pub fn empty_marker() -> Self {
        Self {
            is_new: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.file.is_none() && self.src.is_empty()
    }

    /// Whether the slot has anything the store needs to hear about on save.
    pub fn is_transmittable(&self) -> bool {
        self.id.is_some() || self.file.is_some()
    }
}

/// A named slot holding at most one image per platform.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenshotSet {
    pub name: String,
    pub id: Option<SetId>,
    pub files: BTreeMap<Platform, ScreenshotFile>,
    pub changed: bool,
}

impl ScreenshotSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn stored(id: SetId, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Some(id),
            files: BTreeMap::new(),
            changed: false,
        }
    }

    pub fn with_file(mut self, platform: Platform, file: ScreenshotFile) -> Self {
        self.files.insert(platform, file);
        self
    }

    pub fn file(&self, platform: &Platform) -> Option<&ScreenshotFile> {
        self.files.get(platform)
    }
}
