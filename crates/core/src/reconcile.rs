//! Server-side application of a save request to the stored collection.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{FileId, Platform, ScreenshotFile, ScreenshotSet, SetId};
use crate::payload::{SaveSet, WireFile, WireSet};
use crate::preview::sniff_mime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: FileId,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSet {
    pub id: SetId,
    pub name: String,
    pub files: BTreeMap<Platform, StoredFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdAllocator {
    next_set: SetId,
    next_file: FileId,
}

impl IdAllocator {
    pub fn new(next_set: SetId, next_file: FileId) -> Self {
        Self {
            next_set,
            next_file,
        }
    }

    /// Allocator continuing after the highest ids in `sets`.
    pub fn after(sets: &[StoredSet]) -> Self {
        let next_set = sets.iter().map(|set| set.id + 1).max().unwrap_or(0);
        let next_file = sets
            .iter()
            .flat_map(|set| set.files.values())
            .map(|file| file.id + 1)
            .max()
            .unwrap_or(0);
        Self::new(next_set, next_file)
    }

    fn set_id(&mut self) -> SetId {
        let id = self.next_set;
        self.next_set += 1;
        id
    }

    fn file_id(&mut self) -> FileId {
        let id = self.next_file;
        self.next_file += 1;
        id
    }
}

/// Builds the collection that replaces `existing` after a save.
///
/// The request lists every set the client still has, in order. Ids the client
/// sends are honoured only if they belong to `existing` and are not claimed
/// twice; everything else gets a fresh id. Sets and platforms missing from the
/// request are gone afterwards.
pub fn reconcile(
    existing: &[StoredSet],
    request: &[SaveSet],
    parts: &[Vec<u8>],
    ids: &mut IdAllocator,
) -> Result<Vec<StoredSet>> {
    let known_sets: HashSet<SetId> = existing.iter().map(|set| set.id).collect();
    let known_files: HashMap<FileId, &StoredFile> = existing
        .iter()
        .flat_map(|set| set.files.values())
        .map(|file| (file.id, file))
        .collect();

    let mut claimed_sets = HashSet::new();
    let mut claimed_files = HashSet::new();
    let mut out = Vec::with_capacity(request.len());

    for wanted in request {
        let id = match wanted.id {
            Some(id) if known_sets.contains(&id) && claimed_sets.insert(id) => id,
            _ => ids.set_id(),
        };

        let mut files = BTreeMap::new();
        for (platform, file) in &wanted.files {
            let known = file
                .id
                .filter(|id| known_files.contains_key(id) && claimed_files.insert(*id));

            let stored = match (file.upload_id, known) {
                (Some(upload_id), known) => {
                    let data = parts.get(upload_id).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "uploadId {upload_id} does not match any of {} file part(s)",
                            parts.len()
                        ))
                    })?;
                    StoredFile {
                        id: known.unwrap_or_else(|| ids.file_id()),
                        content_type: sniff_mime(data).to_string(),
                        data: data.clone(),
                    }
                }
                (None, Some(known)) => known_files[&known].clone(),
                (None, None) => {
                    warn!(%platform, id = ?file.id, "dropping file entry without data or known id");
                    continue;
                }
            };
            files.insert(platform.clone(), stored);
        }

        out.push(StoredSet {
            id,
            name: wanted.name.clone(),
            files,
        });
    }

    Ok(out)
}

/// Client records for a stored collection; `src` decides where each image is served from.
pub fn to_screenshot_sets<F>(stored: &[StoredSet], src: F) -> Vec<ScreenshotSet>
where
    F: Fn(&Platform, &StoredFile) -> String,
{
    stored
        .iter()
        .map(|set| {
            let mut record = ScreenshotSet::stored(set.id, set.name.clone());
            for (platform, file) in &set.files {
                record
                    .files
                    .insert(platform.clone(), ScreenshotFile::stored(file.id, src(platform, file)));
            }
            record
        })
        .collect()
}

pub fn to_wire_sets<F>(stored: &[StoredSet], src: F) -> Vec<WireSet>
where
    F: Fn(&Platform, &StoredFile) -> String,
{
    stored
        .iter()
        .map(|set| WireSet {
            id: Some(set.id),
            name: set.name.clone(),
            files: set
                .files
                .iter()
                .map(|(platform, file)| {
                    (
                        platform.clone(),
                        WireFile {
                            id: Some(file.id),
                            src: src(platform, file),
                        },
                    )
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::SaveFile;

    fn stored_set(id: SetId, name: &str, files: &[(&str, FileId)]) -> StoredSet {
        StoredSet {
            id,
            name: name.to_string(),
            files: files
                .iter()
                .map(|(platform, file_id)| {
                    (
                        Platform::new(*platform),
                        StoredFile {
                            id: *file_id,
                            content_type: "image/png".to_string(),
                            data: vec![*file_id as u8],
                        },
                    )
                })
                .collect(),
        }
    }

    fn save_set(id: Option<SetId>, name: &str, files: &[(&str, Option<FileId>, Option<usize>)]) -> SaveSet {
        SaveSet {
            id,
            name: name.to_string(),
            files: files
                .iter()
                .map(|(platform, id, upload_id)| {
                    (
                        Platform::new(*platform),
                        SaveFile {
                            id: *id,
                            upload_id: *upload_id,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn new_sets_and_files_get_fresh_ids() {
        let existing = vec![stored_set(0, "one", &[("aplite", 0), ("basalt", 1)])];
        let mut ids = IdAllocator::after(&existing);
        let request = vec![
            save_set(Some(0), "one", &[("aplite", Some(0), None), ("basalt", Some(1), None)]),
            save_set(None, "two", &[("chalk", None, Some(0))]),
        ];

        let out = reconcile(&existing, &request, &[vec![7, 7]], &mut ids).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], existing[0]);
        assert_eq!(out[1].id, 1);
        let chalk = &out[1].files[&Platform::new("chalk")];
        assert_eq!(chalk.id, 2);
        assert_eq!(chalk.data, vec![7, 7]);
    }

    #[test]
    fn reupload_keeps_file_id_and_replaces_data() {
        let existing = vec![stored_set(4, "one", &[("aplite", 9)])];
        let mut ids = IdAllocator::after(&existing);
        let request = vec![save_set(Some(4), "renamed", &[("aplite", Some(9), Some(0))])];

        let out = reconcile(&existing, &request, &[vec![1, 2, 3]], &mut ids).unwrap();

        let aplite = &out[0].files[&Platform::new("aplite")];
        assert_eq!(aplite.id, 9);
        assert_eq!(aplite.data, vec![1, 2, 3]);
        assert_eq!(out[0].name, "renamed");
    }

    #[test]
    fn absent_sets_and_platforms_are_removed() {
        let existing = vec![
            stored_set(0, "one", &[("aplite", 0), ("basalt", 1)]),
            stored_set(1, "two", &[("chalk", 2)]),
        ];
        let mut ids = IdAllocator::after(&existing);
        let request = vec![save_set(Some(1), "two", &[("chalk", Some(2), None)])];

        let out = reconcile(&existing, &request, &[], &mut ids).unwrap();

        assert_eq!(out, vec![existing[1].clone()]);
    }

    #[test]
    fn unknown_ids_are_not_trusted() {
        let existing = vec![stored_set(0, "one", &[("aplite", 0)])];
        let mut ids = IdAllocator::after(&existing);
        let request = vec![save_set(Some(55), "forged", &[("aplite", Some(77), None), ("basalt", Some(78), Some(0))])];

        let out = reconcile(&existing, &request, &[vec![5]], &mut ids).unwrap();

        assert_eq!(out[0].id, 1);
        assert!(!out[0].files.contains_key(&Platform::new("aplite")));
        assert_eq!(out[0].files[&Platform::new("basalt")].id, 1);
    }

    #[test]
    fn upload_id_out_of_range_is_rejected() {
        let mut ids = IdAllocator::new(0, 0);
        let request = vec![save_set(None, "bad", &[("aplite", None, Some(3))])];

        let err = reconcile(&[], &request, &[vec![1]], &mut ids).unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn wire_sets_carry_ids_and_sources() {
        let existing = vec![stored_set(2, "one", &[("basalt", 5)])];

        let wire = to_wire_sets(&existing, |platform, file| format!("/{platform}/{}", file.id));

        assert_eq!(wire[0].id, Some(2));
        assert_eq!(wire[0].files[&Platform::new("basalt")].src, "/basalt/5");
    }
}
