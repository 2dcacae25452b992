//! FrameClassifier - Per-frame slot status from detection boxes
//!
//! ## Responsibilities
//!
//! - Assign each detection to the slots it touches
//! - Derive a raw FREE / FILLED / WRONG status per slot
//!
//! ## Rules
//!
//! - A detection "touches" a slot when its overlap ratio exceeds `assign`
//! - Touching exactly one slot fills it only above `fill`
//! - Touching two or more slots marks every touched slot WRONG
//! - Several detections on one slot resolve to the most severe status
//!
//! Status depends only on the current frame. Nothing is carried over.

use crate::zone_geometry::{overlap_ratio, BBox, Zone};
use serde::{Deserialize, Serialize};

/// Raw occupancy status of one slot in one frame.
///
/// Variant order is the severity order: `Free < Filled < Wrong`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlotStatus {
    #[default]
    Free,
    Filled,
    Wrong,
}

impl SlotStatus {
    /// FILLED and WRONG both mean a vehicle is in the slot
    pub fn is_occupied(&self) -> bool {
        matches!(self, SlotStatus::Filled | SlotStatus::Wrong)
    }

    /// Keep the more severe of two classifications
    pub fn escalate(self, other: SlotStatus) -> SlotStatus {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Free => "FREE",
            SlotStatus::Filled => "FILLED",
            SlotStatus::Wrong => "WRONG",
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detector box for the current frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(flatten)]
    pub bbox: BBox,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl Detection {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            bbox: BBox::new(x1, y1, x2, y2),
            label: None,
            confidence: None,
        }
    }
}

/// Overlap thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierThresholds {
    /// Minimum ratio for a detection to touch a slot
    pub assign: f64,
    /// Minimum ratio for a single-slot detection to fill it
    pub fill: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            assign: 0.15,
            fill: 0.25,
        }
    }
}

/// A (slot, ratio) pair recorded for one detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotTouch {
    /// Index into the zone list
    pub zone_index: usize,
    pub ratio: f64,
}

/// Slots touched by a single detection
pub fn touches(zones: &[Zone], bbox: &BBox, assign_threshold: f64) -> Vec<SlotTouch> {
    zones
        .iter()
        .enumerate()
        .filter_map(|(zone_index, zone)| {
            let ratio = overlap_ratio(&zone.polygon, bbox);
            (ratio > assign_threshold).then_some(SlotTouch { zone_index, ratio })
        })
        .collect()
}

/// Classify every zone for one frame.
///
/// Returns one status per zone, in zone order. A frame containing any
/// non-finite coordinate is treated as a frame without detections.
pub fn classify(
    zones: &[Zone],
    detections: &[Detection],
    thresholds: &ClassifierThresholds,
) -> Vec<SlotStatus> {
    let mut statuses = vec![SlotStatus::Free; zones.len()];

    if detections.iter().any(|d| !d.bbox.is_finite()) {
        tracing::warn!(
            detections = detections.len(),
            "Malformed detection frame (non-finite coordinates), treating as empty"
        );
        return statuses;
    }

    for detection in detections {
        let touched = touches(zones, &detection.bbox, thresholds.assign);
        match touched.as_slice() {
            [] => {}
            [single] => {
                if single.ratio > thresholds.fill {
                    let slot = &mut statuses[single.zone_index];
                    *slot = slot.escalate(SlotStatus::Filled);
                }
            }
            many => {
                for touch in many {
                    let slot = &mut statuses[touch.zone_index];
                    *slot = slot.escalate(SlotStatus::Wrong);
                }
            }
        }
    }

    statuses
}
