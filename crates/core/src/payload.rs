//! Wire shapes of the screenshot load/save protocol.
//!
//! Loading returns a JSON document. Saving is two-part: a JSON description of
//! the sets plus an ordered list of binary parts, each referenced from the
//! description by its `uploadId` (its position in that list).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{FileId, Platform, ScreenshotFile, ScreenshotSet, SetId, Upload};

/// Name of the multipart field carrying the JSON description.
pub const SCREENSHOTS_FIELD: &str = "screenshots";
/// Name of the repeated multipart field carrying the binary parts.
pub const FILES_FIELD: &str = "files[]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResponse {
    #[serde(default)]
    pub screenshots: Vec<WireSet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SetId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub files: BTreeMap<Platform, WireFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FileId>,
    #[serde(default)]
    pub src: String,
}

impl From<WireSet> for ScreenshotSet {
    fn from(wire: WireSet) -> Self {
        let mut set = ScreenshotSet::new(wire.name);
        set.id = wire.id;
        for (platform, file) in wire.files {
            let record = ScreenshotFile {
                id: file.id,
                src: file.src,
                ..ScreenshotFile::default()
            };
            set.files.insert(platform, record);
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SetId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub files: BTreeMap<Platform, SaveFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FileId>,
    #[serde(
        default,
        rename = "uploadId",
        skip_serializing_if = "Option::is_none"
    )]
    pub upload_id: Option<usize>,
}

/// The encoded form of a save request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SavePayload {
    pub screenshots: Vec<SaveSet>,
    pub files: Vec<Upload>,
}

impl SavePayload {
    /// Encodes the edited collection. Sets with no stored or pending image are
    /// dropped; pending payloads are numbered in the order they are referenced.
    pub fn encode(sets: &[ScreenshotSet]) -> Self {
        let mut payload = SavePayload::default();
        for set in sets {
            let mut files = BTreeMap::new();
            for (platform, file) in &set.files {
                if !file.is_transmittable() {
                    continue;
                }
                let upload_id = file.file.as_ref().map(|upload| {
                    payload.files.push(upload.clone());
                    payload.files.len() - 1
                });
                files.insert(
                    platform.clone(),
                    SaveFile {
                        id: file.id,
                        upload_id,
                    },
                );
            }
            if files.is_empty() {
                continue;
            }
            payload.screenshots.push(SaveSet {
                id: set.id,
                name: set.name.clone(),
                files,
            });
        }
        payload
    }

    pub fn metadata_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.screenshots)?)
    }
}
