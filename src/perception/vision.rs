// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Vision detection: send a window capture to a multimodal model and turn
//! what it sees into coordinate-only targets.

use std::io::Cursor;
use std::rc::Rc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageOutputFormat, RgbaImage};
use tracing::{debug, info, warn};

use super::llm::{parse_elements, ContentBlock, ModelClient};
use super::{Detection, StateProvider};
use crate::error::Result;
use crate::platform::{Desktop, WindowInfo};
use crate::targets::{Rect, TargetInfo};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
/// Longest image side sent to the model. Larger captures are downscaled
/// here so the scale factor back to screen pixels is known exactly.
pub const MAX_IMAGE_LONG_SIDE: u32 = 1568;
const DEFAULT_TYPE: &str = "VisionElement";

const PROMPT: &str = "\
This is a screenshot of one Windows application window. List the interactive \
elements in it that UI Automation usually does NOT expose.

Look for:
1. ResizeHandle: small squares at the corners or edges of selected tables, images or text boxes, plus window and panel grips.
2. ColumnBorder: draggable lines between table or list columns and rows. Any visible table should be checked for these, and for a grip at its bottom-right corner.
3. IconButton: toolbar icons and buttons without a text label.
4. CanvasElement: points, nodes and shapes on drawing or chart surfaces.
5. Splitter: bars between panes.
6. CustomControl: owner-drawn toggles, colour pickers, unusual sliders.
7. StatusIndicator: clickable badges or status lights.
8. DragTarget: drop zones.

Skip anything accessibility APIs already report: labelled buttons, text fields, \
menus, tabs with text, list/tree/data items, checkboxes, radio buttons, combo \
boxes, scroll bars.

Coordinates are pixels in this image, origin at its top-left corner.
Reply with a JSON array and nothing else:
[{\"name\": \"short description\", \"type\": \"ResizeHandle\", \"rect\": [left, top, right, bottom]}]
Reply [] when there is nothing to report.";

pub struct VisionProvider {
    desktop: Rc<dyn Desktop>,
    client: Box<dyn ModelClient>,
}

/// A PNG ready for the model plus the per-axis factors mapping image
/// pixels back to window pixels.
pub struct PreparedImage {
    pub png_base64: String,
    pub scale_x: f64,
    pub scale_y: f64,
}

/// Downscale so the long side fits [`MAX_IMAGE_LONG_SIDE`], then PNG-encode.
pub fn prepare_image(image: RgbaImage) -> Result<PreparedImage> {
    let (w, h) = image.dimensions();
    let long_side = w.max(h);
    let (image, scale_x, scale_y) = if long_side > MAX_IMAGE_LONG_SIDE {
        let ratio = f64::from(MAX_IMAGE_LONG_SIDE) / f64::from(long_side);
        let nw = ((f64::from(w) * ratio).round() as u32).max(1);
        let nh = ((f64::from(h) * ratio).round() as u32).max(1);
        debug!(from = ?(w, h), to = ?(nw, nh), "downscaling capture");
        let resized = imageops::resize(&image, nw, nh, FilterType::Lanczos3);
        (resized, f64::from(w) / f64::from(nw), f64::from(h) / f64::from(nh))
    } else {
        (image, 1.0, 1.0)
    };

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)?;
    Ok(PreparedImage {
        png_base64: STANDARD.encode(&png),
        scale_x,
        scale_y,
    })
}

impl VisionProvider {
    pub fn new(desktop: Rc<dyn Desktop>, client: Box<dyn ModelClient>) -> Self {
        Self { desktop, client }
    }

    fn run(&self, window: &WindowInfo) -> Result<Vec<TargetInfo>> {
        let capture = self.desktop.capture(window.handle)?;
        let origin = self.desktop.window_rect(window.handle)?;
        let prepared = prepare_image(capture)?;
        let reply = self.client.complete(vec![
            ContentBlock::png_base64(prepared.png_base64),
            ContentBlock::text(PROMPT),
        ])?;

        let (sx, sy) = (prepared.scale_x, prepared.scale_y);
        let targets: Vec<TargetInfo> = parse_elements(&reply)
            .into_iter()
            .filter_map(|e| {
                let rect = match e.rect4() {
                    Some(raw) => match screen_rect(raw, (sx, sy), &origin) {
                        Some(r) => Some(r),
                        None => {
                            warn!(name = ?e.name, rect = ?raw, "dropping element with unusable rect");
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
            })
            .collect();
        info!(count = targets.len(), scale_x = sx, scale_y = sy, "vision detection");
        Ok(targets)
    }
}

/// Image pixels back to screen pixels. `None` for coordinates that are not
/// finite or land outside the `i32` range.
fn screen_rect(raw: [f64; 4], (sx, sy): (f64, f64), origin: &Rect) -> Option<Rect> {
    let [l, t, r, b] = raw;
    Rect::from_f64([(l * sx).round(), (t * sy).round(), (r * sx).round(), (b * sy).round()])?
        .checked_offset(origin.left, origin.top)
}

impl StateProvider for VisionProvider {
    fn label(&self) -> &'static str {
        "vision"
    }

    fn detect(&self, window: &WindowInfo) -> Result<Detection> {
        match self.run(window) {
            Ok(targets) => {
                let mut out = Detection::handleless(targets);
                out.renumber();
                Ok(out)
            }
            Err(e) => {
                warn!(error = %e, "vision detection failed, returning nothing");
                Ok(Detection::default())
            }
        }
    }
}
