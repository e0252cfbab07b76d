// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Merge-by-overlap.
//!
//! The primary list is taken verbatim. Each additional source, in order,
//! contributes only the targets that do not overlap (IoU strictly above the
//! threshold) anything already merged. Targets without a rect are always
//! kept. Ids are renumbered 1..N at the end.

use tracing::{debug, info};

use super::{Detection, StateProvider};
use crate::error::Result;
use crate::platform::WindowInfo;

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.1;

/// Fold `extra` into `merged`. Returns how many candidates survived.
pub fn merge_into(merged: &mut Detection, extra: Detection, threshold: f64) -> usize {
    let mut kept = 0;
    for (candidate, handle) in extra.targets.into_iter().zip(extra.handles) {
        let covered = candidate.rect.is_some_and(|rect| {
            merged
                .targets
                .iter()
                .filter_map(|t| t.rect)
                .any(|existing| existing.iou(&rect) > threshold)
        });
        if covered {
            debug!(name = %candidate.name, "dropped overlapping target");
            continue;
        }
        merged.push(candidate, handle);
        kept += 1;
    }
    kept
}

/// Merge `extras` into `primary` in order and renumber.
pub fn fuse(primary: Detection, extras: impl IntoIterator<Item = Detection>, threshold: f64) -> Detection {
    let mut merged = primary;
    for extra in extras {
        merge_into(&mut merged, extra, threshold);
    }
    merged.renumber();
    merged
}

/// A primary provider plus zero or more additional ones.
pub struct CompositeProvider {
    primary: Box<dyn StateProvider>,
    additional: Vec<Box<dyn StateProvider>>,
    iou_threshold: f64,
}

impl CompositeProvider {
    pub fn new(primary: Box<dyn StateProvider>, additional: Vec<Box<dyn StateProvider>>) -> Self {
        Self {
            primary,
            additional,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.iou_threshold = threshold;
        self
    }
}

impl StateProvider for CompositeProvider {
    fn label(&self) -> &'static str {
        "composite"
    }

    fn detect(&self, window: &WindowInfo) -> Result<Detection> {
        let mut merged = self.primary.detect(window)?;
        let base = merged.len();
        for provider in &self.additional {
            let extra = provider.detect(window)?;
            let offered = extra.len();
            let kept = merge_into(&mut merged, extra, self.iou_threshold);
            info!(source = provider.label(), offered, kept, "fused additional targets");
        }
        merged.renumber();
        debug!(primary = base, total = merged.len(), "fusion done");
        Ok(merged)
    }
}
