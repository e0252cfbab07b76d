// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared target model: what a perception source reports about one element.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Window,
    #[default]
    Control,
    ThirdPartyAgent,
}

/// Screen rectangle in absolute pixels. Serialized as `[left, top, right, bottom]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Rect from model-supplied coordinates, truncated toward zero. `None`
    /// when any value is not finite or does not fit in `i32`.
    pub fn from_f64(coords: [f64; 4]) -> Option<Rect> {
        let mut out = [0i32; 4];
        for (slot, v) in out.iter_mut().zip(coords) {
            let v = v.trunc();
            if !v.is_finite() || v < f64::from(i32::MIN) || v > f64::from(i32::MAX) {
                return None;
            }
            *slot = v as i32;
        }
        Some(Rect::from(out))
    }

    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    /// Degenerate rects (width or height <= 0) have zero area.
    pub fn area(&self) -> i64 {
        self.width().max(0) * self.height().max(0)
    }

    /// Integer centre, `(l + r) / 2` per axis rounded toward negative infinity.
    pub fn center(&self) -> (i32, i32) {
        // The mean of two i32 values always fits back into i32.
        let mid = |a: i32, b: i32| (i64::from(a) + i64::from(b)).div_euclid(2) as i32;
        (mid(self.left, self.right), mid(self.top, self.bottom))
    }

    /// Shift by `(dx, dy)`, saturating at the `i32` bounds.
    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.left.saturating_add(dx),
            self.top.saturating_add(dy),
            self.right.saturating_add(dx),
            self.bottom.saturating_add(dy),
        )
    }

    /// Shift by `(dx, dy)`, or `None` if any edge leaves the `i32` range.
    pub fn checked_offset(&self, dx: i32, dy: i32) -> Option<Rect> {
        Some(Rect::new(
            self.left.checked_add(dx)?,
            self.top.checked_add(dy)?,
            self.right.checked_add(dx)?,
            self.bottom.checked_add(dy)?,
        ))
    }

    /// Intersection over union. 0.0 when the union is empty.
    pub fn iou(&self, other: &Rect) -> f64 {
        let inter = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        )
        .area();
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f64 / union as f64
    }
}

impl From<[i32; 4]> for Rect {
    fn from(r: [i32; 4]) -> Self {
        Rect::new(r[0], r[1], r[2], r[3])
    }
}

impl From<Rect> for [i32; 4] {
    fn from(r: Rect) -> Self {
        [r.left, r.top, r.right, r.bottom]
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.left, self.top, self.right, self.bottom)
    }
}

/// One perceived UI element.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetInfo {
    pub kind: TargetKind,
    pub name: String,
    #[serde(rename = "type", default)]
    pub control_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub rect: Option<Rect>,
}

impl TargetInfo {
    pub fn control(name: impl Into<String>, control_type: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Control,
            name: name.into(),
            control_type: control_type.into(),
            id: None,
            rect: None,
        }
    }

    pub fn with_rect(mut self, rect: Option<Rect>) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id_str(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// JSON object restricted to `keys`. Unknown keys are ignored.
    pub fn to_filtered_json(&self, keys: &[&str]) -> Value {
        let full = serde_json::to_value(self).unwrap_or(Value::Null);
        let mut out = Map::new();
        if let Value::Object(map) = full {
            for key in keys {
                if let Some(v) = map.get(*key) {
                    out.insert((*key).to_string(), v.clone());
                }
            }
        }
        Value::Object(out)
    }
}

/// Reassign ids "1".."N" in list order.
pub fn renumber(targets: &mut [TargetInfo]) {
    for (i, t) in targets.iter_mut().enumerate() {
        t.id = Some((i + 1).to_string());
    }
}

/// Ordered collection of targets. Ids are handed out sequentially to
/// targets registered without one.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<TargetInfo>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, targets: impl IntoIterator<Item = TargetInfo>) -> usize {
        let mut added = 0;
        for mut t in targets {
            if t.id.is_none() {
                t.id = Some((self.targets.len() + 1).to_string());
            }
            self.targets.push(t);
            added += 1;
        }
        added
    }

    pub fn get(&self, id: &str) -> Option<&TargetInfo> {
        self.targets.iter().find(|t| t.id.as_deref() == Some(id))
    }

    pub fn find_by_name(&self, name: &str) -> Vec<&TargetInfo> {
        self.targets.iter().filter(|t| t.name == name).collect()
    }

    pub fn all(&self) -> &[TargetInfo] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    pub fn to_list(&self, keys: &[&str]) -> Vec<Value> {
        self.targets.iter().map(|t| t.to_filtered_json(keys)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_identical_and_disjoint() {
        let a = Rect::new(0, 0, 10, 10);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&Rect::new(100, 100, 110, 110)), 0.0);
    }

    #[test]
    fn iou_partial_overlap() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 0, 15, 10);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_rects_never_overlap() {
        let zero = Rect::new(5, 5, 5, 5);
        assert_eq!(zero.iou(&zero), 0.0);
        assert_eq!(zero.iou(&Rect::new(0, 0, 10, 10)), 0.0);
        let inverted = Rect::new(10, 10, 0, 0);
        assert_eq!(inverted.area(), 0);
    }

    #[test]
    fn extreme_rects_do_not_overflow() {
        let wide = Rect::new(i32::MIN, 0, i32::MAX, 10);
        assert_eq!(wide.width(), u32::MAX as i64);
        assert_eq!(wide.center(), (-1, 5));
        assert!(wide.iou(&Rect::new(0, 0, 10, 10)) > 0.0);
        assert_eq!(wide.iou(&wide), 1.0);
        assert_eq!(Rect::new(i32::MAX - 1, 0, i32::MAX, 1).offset(10, 0).right, i32::MAX);
        assert_eq!(Rect::new(i32::MAX - 1, 0, i32::MAX, 1).checked_offset(10, 0), None);
    }

    #[test]
    fn center_rounds_down_on_negative_coordinates() {
        assert_eq!(Rect::new(-31, -31, -10, -10).center(), (-21, -21));
        assert_eq!(Rect::new(10, 10, 31, 31).center(), (20, 20));
    }

    #[test]
    fn model_coordinates_are_validated() {
        assert_eq!(Rect::from_f64([1.9, 2.0, 3.5, 4.0]), Some(Rect::new(1, 2, 3, 4)));
        assert_eq!(Rect::from_f64([3e9, 0.0, 3e9, 10.0]), None);
        assert_eq!(Rect::from_f64([f64::NAN, 0.0, 1.0, 1.0]), None);
        assert_eq!(Rect::from_f64([0.0, f64::NEG_INFINITY, 1.0, 1.0]), None);
    }

    #[test]
    fn rect_serializes_as_array() {
        let r = Rect::new(1, 2, 3, 4);
        assert_eq!(serde_json::to_string(&r).unwrap(), "[1,2,3,4]");
        let back: Rect = serde_json::from_str("[1,2,3,4]").unwrap();
        assert_eq!(back, r);
        assert_eq!(r.to_string(), "[1, 2, 3, 4]");
    }

    #[test]
    fn registry_assigns_ids_in_order() {
        let mut reg = TargetRegistry::new();
        let added = reg.register([
            TargetInfo::control("Button1", "Button"),
            TargetInfo::control("Button2", "Button"),
        ]);
        assert_eq!(added, 2);
        assert_eq!(reg.get("1").unwrap().name, "Button1");
        assert_eq!(reg.get("2").unwrap().name, "Button2");
        assert!(reg.get("3").is_none());
        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn registry_keeps_existing_ids_and_finds_by_name() {
        let mut reg = TargetRegistry::new();
        reg.register([TargetInfo::control("Save", "Button").with_id("7")]);
        assert!(reg.get("1").is_none());
        assert_eq!(reg.find_by_name("Save").len(), 1);
        assert!(reg.find_by_name("Open").is_empty());
    }

    #[test]
    fn filtered_json_drops_unlisted_keys() {
        let mut reg = TargetRegistry::new();
        reg.register([TargetInfo::control("OK", "Button")]);
        let list = reg.to_list(&["name", "type"]);
        assert_eq!(list[0]["name"], "OK");
        assert_eq!(list[0]["type"], "Button");
        assert!(list[0].get("id").is_none());
    }

    #[test]
    fn kind_uses_snake_case() {
        let v = serde_json::to_value(TargetKind::ThirdPartyAgent).unwrap();
        assert_eq!(v, "third_party_agent");
    }
}
