// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Structural inference: a text-only model pass over the UIA list that adds
//! elements UIA cannot see (column borders, splitters, resize grips) with
//! coordinates derived from the rects it was given.

use tracing::{debug, info, warn};

use super::llm::{parse_elements, ContentBlock, ModelClient, RawElement};
use super::uia::UiaProvider;
use super::{Detection, StateProvider};
use crate::error::Result;
use crate::platform::WindowInfo;
use crate::targets::{Rect, TargetInfo};

pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;
const DEFAULT_TYPE: &str = "InferredElement";

const PROMPT: &str = "\
You analyse the UI Automation control list of one Windows application window \
and report interactive elements that exist on screen but are missing from it.

Input: one control per line, formatted as
[index] [ControlType] \"Name\" rect=[left, top, right, bottom]

Elements worth reporting:
1. ColumnBorder: the draggable boundary between two adjacent HeaderItems, about 4px wide, centred on the shared edge.
2. RowBorder: the draggable boundary between vertically adjacent DataItems, about 4px tall.
3. ResizeHandle: the grip at the bottom-right corner of a Table or DataGrid, about 8x8px.
4. Splitter: the divider in the gap between two Panes that share an edge, 4 to 6px wide.
5. PanelGrip: the resizable edge of a Pane bordering another Pane or empty space.

Compute every coordinate arithmetically from the rects above and name the \
controls and rect fields you used in `derived_from`. Report only what the \
layout clearly implies. Confidence runs from 0.0 to 1.0: adjacent HeaderItems \
in a table warrant 0.95 or more, adjacent DataItems 0.85 to 0.95, a table \
corner grip 0.75 to 0.85, a pane gap 0.60 to 0.75. Leave out anything below 0.60.

Reply with a JSON array and nothing else:
[{\"name\": \"Column border between Subject and Date\", \"type\": \"ColumnBorder\", \
\"rect\": [left, top, right, bottom], \"confidence\": 0.95, \"derived_from\": \"...\"}]
Reply [] when nothing can be inferred.

Controls:
";

pub struct StructuralInferenceProvider {
    uia: UiaProvider,
    client: Box<dyn ModelClient>,
    min_confidence: f64,
}

impl StructuralInferenceProvider {
    pub fn new(uia: UiaProvider, client: Box<dyn ModelClient>) -> Self {
        Self {
            uia,
            client,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    fn infer(&self, targets: &[TargetInfo]) -> Result<Vec<TargetInfo>> {
        let listing = format_controls(targets);
        if listing.trim().is_empty() {
            return Ok(Vec::new());
        }
        let reply = self
            .client
            .complete(vec![ContentBlock::text(format!("{PROMPT}{listing}"))])?;
        let raw = parse_elements(&reply);
        let offered = raw.len();
        let inferred: Vec<TargetInfo> = raw
            .into_iter()
            .filter(|e| {
                let confidence = e.confidence.unwrap_or(0.0);
                let keep = confidence >= self.min_confidence;
                if !keep {
                    debug!(name = ?e.name, confidence, "below confidence threshold");
                }
                keep
            })
            .filter_map(to_target)
            .collect();
        info!(offered, kept = inferred.len(), "structural inference");
        Ok(inferred)
    }
}

/// `[id] [type] "name" rect=[l, t, r, b]` per target, `rect=None` when absent.
pub fn format_controls(targets: &[TargetInfo]) -> String {
    targets
        .iter()
        .map(|t| {
            let rect = t.rect.map_or_else(|| "None".to_string(), |r| r.to_string());
            format!("[{}] [{}] \"{}\" rect={}", t.id_str(), t.control_type, t.name, rect)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `None` when the element carries a rect that cannot be placed on screen.
fn to_target(e: RawElement) -> Option<TargetInfo> {
    let rect = match e.rect4() {
        Some(raw) => match Rect::from_f64(raw) {
            Some(r) => Some(r),
            None => {
                warn!(name = ?e.name, rect = ?raw, "dropping inferred element with unusable rect");
                return None;
            }
        },
        None => None,
    };
    Some(
        TargetInfo::control(
            e.name.unwrap_or_default(),
            e.element_type.unwrap_or_else(|| DEFAULT_TYPE.to_string()),
        )
        .with_rect(rect),
    )
}

impl StateProvider for StructuralInferenceProvider {
    fn label(&self) -> &'static str {
        "uia+infer"
    }

    fn detect(&self, window: &WindowInfo) -> Result<Detection> {
        let mut out = self.uia.detect(window)?;
        match self.infer(&out.targets) {
            Ok(inferred) => {
                for t in inferred {
                    out.push(t, None);
                }
                out.renumber();
            }
            Err(e) => warn!(error = %e, "structural inference failed, using UIA only"),
        }
        Ok(out)
    }
}
