//! Maps raw detector classes onto the garbage domain.
//!
//! Decision order, first positive wins:
//! 1. the detector's class name equals the target label exactly;
//! 2. the class id is mapped to the target category;
//! 3. the class name contains an allow-listed word (case-insensitive).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::detect::{BoxPalette, Detection};
use crate::frame::Rgb;

pub const DEFAULT_TARGET_LABEL: &str = "trash";

/// COCO ids treated as litter.
const COCO_TRASH_IDS: &[u32] = &[
    39, 73, 41, 76, 75, 77, 25, 33, 14, 61, 67, 84, 44, 66, 46, 47, 43, 62, 64,
];
/// COCO ids treated as containers.
const COCO_BIN_IDS: &[u32] = &[1, 0];

pub const DEFAULT_FALLBACK_NAMES: &[&str] = &[
    "bottle",
    "cup",
    "vase",
    "book",
    "laptop",
    "cell phone",
    "wine glass",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainCategory {
    Trash,
    Bin,
}

impl DomainCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainCategory::Trash => "trash",
            DomainCategory::Bin => "bin",
        }
    }
}

/// Replaceable class-id to category table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassMapping {
    entries: BTreeMap<u32, DomainCategory>,
}

impl ClassMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in table for COCO-trained models.
    pub fn coco_default() -> Self {
        let mut mapping = Self::new();
        for id in COCO_TRASH_IDS {
            mapping.insert(*id, DomainCategory::Trash);
        }
        for id in COCO_BIN_IDS {
            mapping.insert(*id, DomainCategory::Bin);
        }
        mapping
    }

    pub fn insert(&mut self, class_id: u32, category: DomainCategory) {
        self.entries.insert(class_id, category);
    }

    pub fn get(&self, class_id: u32) -> Option<DomainCategory> {
        self.entries.get(&class_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(u32, DomainCategory)> for ClassMapping {
    fn from_iter<I: IntoIterator<Item = (u32, DomainCategory)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClassClassifier {
    target_label: String,
    target_category: DomainCategory,
    mapping: ClassMapping,
    fallback_names: Vec<String>,
}

impl ClassClassifier {
    pub fn new(
        target_label: impl Into<String>,
        mapping: ClassMapping,
        fallback_names: Vec<String>,
    ) -> Self {
        let target_label = target_label.into();
        let target_category = if target_label.eq_ignore_ascii_case(DomainCategory::Bin.as_str()) {
            DomainCategory::Bin
        } else {
            DomainCategory::Trash
        };
        Self {
            target_label,
            target_category,
            mapping,
            fallback_names: fallback_names
                .into_iter()
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    /// Swap the class table, e.g. when a different model is loaded.
    pub fn with_mapping(mut self, mapping: ClassMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn mapping(&self) -> &ClassMapping {
        &self.mapping
    }

    pub fn is_target_object(&self, class_id: u32, class_name: &str) -> bool {
        if class_name == self.target_label {
            return true;
        }
        if self.mapping.get(class_id) == Some(self.target_category) {
            return true;
        }
        let name = class_name.to_lowercase();
        self.fallback_names
            .iter()
            .any(|allowed| name.contains(allowed.as_str()))
    }

    /// True when any detection in the set is a target object.
    pub fn any_target(&self, detections: &[Detection]) -> bool {
        detections
            .iter()
            .any(|det| self.is_target_object(det.class_id, &det.class_name))
    }

    /// Box colors: red for targets, blue for people, green for bins, yellow otherwise.
    pub fn palette(&self) -> BoxPalette {
        let classifier = self.clone();
        Arc::new(move |det: &Detection| {
            if classifier.is_target_object(det.class_id, &det.class_name) {
                Rgb::RED
            } else if det.class_name.to_lowercase().contains("person") {
                Rgb::BLUE
            } else if det.class_name.eq_ignore_ascii_case(DomainCategory::Bin.as_str())
                || classifier.mapping.get(det.class_id) == Some(DomainCategory::Bin)
            {
                Rgb::GREEN
            } else {
                Rgb::YELLOW
            }
        })
    }
}

impl Default for ClassClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_TARGET_LABEL,
            ClassMapping::coco_default(),
            DEFAULT_FALLBACK_NAMES.iter().map(|s| s.to_string()).collect(),
        )
    }
}
