//! SlotLayoutStore - Saved slot outlines per video source
//!
//! ## Responsibilities
//!
//! - Persist slot outlines and manual holds, keyed by source id
//! - Track which source is active
//!
//! ## File format
//!
//! ```json
//! { "live_camera": { "slots": [[[0,0],[100,0],[100,100],[0,100]]], "reserved": [1] } }
//! ```
//!
//! A bare list of outlines is accepted for a source and read as "no holds".

use crate::error::Result;
use crate::zone_geometry::Point;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Source id used until another one is selected
pub const DEFAULT_SOURCE: &str = "live_camera";

/// Slot outlines plus manually held slot ids (1-based)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotLayout {
    pub slots: Vec<Vec<Point>>,
    #[serde(default)]
    pub reserved: Vec<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredLayout {
    OutlinesOnly(Vec<Vec<Point>>),
    Full(SlotLayout),
}

impl From<StoredLayout> for SlotLayout {
    fn from(stored: StoredLayout) -> Self {
        match stored {
            StoredLayout::OutlinesOnly(slots) => SlotLayout {
                slots,
                reserved: Vec::new(),
            },
            StoredLayout::Full(layout) => layout,
        }
    }
}

/// JSON-file backed layout store
pub struct SlotLayoutStore {
    path: PathBuf,
    layouts: RwLock<BTreeMap<String, SlotLayout>>,
    active_source: RwLock<String>,
}

impl SlotLayoutStore {
    /// Open the store, reading the file if it exists
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let layouts = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: BTreeMap<String, StoredLayout> = serde_json::from_slice(&bytes)?;
                stored.into_iter().map(|(k, v)| (k, v.into())).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            sources = layouts.len(),
            "Slot layouts loaded"
        );

        Ok(Self {
            path,
            layouts: RwLock::new(layouts),
            active_source: RwLock::new(DEFAULT_SOURCE.to_string()),
        })
    }

    pub async fn active_source(&self) -> String {
        self.active_source.read().await.clone()
    }

    /// Make `source_id` active. Later `save_active` calls write under it.
    pub async fn select(&self, source_id: &str) {
        *self.active_source.write().await = source_id.to_string();
    }

    /// Saved layout for the source, empty if none
    pub async fn load(&self, source_id: &str) -> SlotLayout {
        self.layouts
            .read()
            .await
            .get(source_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Store the layout for the source and rewrite the file
    pub async fn save(&self, source_id: &str, layout: SlotLayout) -> Result<()> {
        let body = {
            let mut layouts = self.layouts.write().await;
            layouts.insert(source_id.to_string(), layout);
            serde_json::to_vec_pretty(&*layouts)?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!(source_id = source_id, "Slot layout saved");
        Ok(())
    }

    /// Save under the active source
    pub async fn save_active(&self, layout: SlotLayout) -> Result<()> {
        let source = self.active_source().await;
        self.save(&source, layout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    #[tokio::test]
    async fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layouts.json");

        let store = SlotLayoutStore::open(&path).await.unwrap();
        let layout = SlotLayout {
            slots: vec![square()],
            reserved: vec![1],
        };
        store.save("lot_a", layout.clone()).await.unwrap();

        let reopened = SlotLayoutStore::open(&path).await.unwrap();
        assert_eq!(reopened.load("lot_a").await, layout);
        assert_eq!(reopened.load("lot_b").await, SlotLayout::default());
    }

    #[tokio::test]
    async fn test_outlines_only_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layouts.json");
        tokio::fs::write(&path, br#"{"old": [[[0,0],[10,0],[10,10],[0,10]]]}"#)
            .await
            .unwrap();

        let store = SlotLayoutStore::open(&path).await.unwrap();
        let layout = store.load("old").await;
        assert_eq!(layout.slots, vec![square()]);
        assert!(layout.reserved.is_empty());
    }

    #[tokio::test]
    async fn test_select_switches_active_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = SlotLayoutStore::open(dir.path().join("l.json")).await.unwrap();
        assert_eq!(store.active_source().await, DEFAULT_SOURCE);

        store
            .save(
                "video_1",
                SlotLayout {
                    slots: vec![square()],
                    reserved: vec![],
                },
            )
            .await
            .unwrap();
        store.select("video_1").await;
        assert_eq!(store.active_source().await, "video_1");

        store.save_active(SlotLayout::default()).await.unwrap();
        assert!(store.load("video_1").await.slots.is_empty());
        assert!(store.load(DEFAULT_SOURCE).await.slots.is_empty());
    }
}
