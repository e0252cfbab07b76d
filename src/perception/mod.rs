// winctl — Index-addressed Windows UI automation
// Copyright (C) 2026  Martin Gehrken (IamLumae)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Perception: turning a window into a numbered target list.
//!
//! Every source implements [`StateProvider`]. The accessibility tree is the
//! primary source; structural inference can wrap it, and vision results are
//! folded in afterwards by overlap ([`fusion`]).

use std::rc::Rc;

use tracing::info;

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::platform::{ControlRef, Desktop, WindowInfo};
use crate::targets::TargetInfo;

pub mod fusion;
pub mod llm;
pub mod state;
pub mod structural;
pub mod uia;
pub mod vision;

pub use fusion::CompositeProvider;
pub use state::UiState;
pub use structural::StructuralInferenceProvider;
pub use uia::UiaProvider;
pub use vision::VisionProvider;

/// One provider pass: targets plus their native handles, index-aligned.
/// A `None` handle marks a target that can only be acted on by coordinates.
#[derive(Default, Clone)]
pub struct Detection {
    pub targets: Vec<TargetInfo>,
    pub handles: Vec<Option<ControlRef>>,
}

impl Detection {
    /// Targets with no native handle.
    pub fn handleless(targets: Vec<TargetInfo>) -> Self {
        let handles = vec![None; targets.len()];
        Self { targets, handles }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn push(&mut self, target: TargetInfo, handle: Option<ControlRef>) {
        self.targets.push(target);
        self.handles.push(handle);
    }

    /// Reassign ids "1".."N" in list order.
    pub fn renumber(&mut self) {
        crate::targets::renumber(&mut self.targets);
    }
}

impl std::fmt::Debug for Detection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detection")
            .field("targets", &self.targets)
            .field("native", &self.handles.iter().filter(|h| h.is_some()).count())
            .finish()
    }
}

pub trait StateProvider {
    /// Short label for logs.
    fn label(&self) -> &'static str;
    fn detect(&self, window: &WindowInfo) -> Result<Detection>;
}

/// Assemble the provider chain for `config`.
///
/// The primary source is the UIA tree, wrapped in structural inference when
/// `infer` is set. With `vision` the primary is fused with a vision pass.
/// Missing credentials fail here, at construction, naming the flag.
pub fn build_chain(desktop: Rc<dyn Desktop>, config: &ProviderConfig) -> Result<Box<dyn StateProvider>> {
    let uia = UiaProvider::new(Rc::clone(&desktop));
    let primary: Box<dyn StateProvider> = if config.infer {
        let key = config.require_api_key("--infer")?;
        let client = llm::MessagesClient::new(key, config.resolve_base_url(), structural::DEFAULT_MODEL)?;
        Box::new(StructuralInferenceProvider::new(uia, Box::new(client)))
    } else {
        Box::new(uia)
    };

    let chain: Box<dyn StateProvider> = if config.vision {
        let key = config.require_api_key("--vision")?;
        let client = llm::MessagesClient::new(key, config.resolve_base_url(), vision::DEFAULT_MODEL)?;
        let vision = VisionProvider::new(desktop, Box::new(client));
        Box::new(CompositeProvider::new(primary, vec![Box::new(vision)]))
    } else {
        primary
    };
    info!(provider = chain.label(), vision = config.vision, infer = config.infer, "provider chain ready");
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ENV_API_KEY, ENV_API_KEY_FALLBACK};
    use crate::platform::memory::MemoryDesktop;
    use serial_test::serial;

    fn clear_keys() {
        std::env::remove_var(ENV_API_KEY);
        std::env::remove_var(ENV_API_KEY_FALLBACK);
    }

    #[test]
    #[serial]
    fn plain_chain_is_uia() {
        clear_keys();
        let desktop: Rc<dyn Desktop> = Rc::new(MemoryDesktop::new());
        let chain = build_chain(desktop, &ProviderConfig::default()).unwrap();
        assert_eq!(chain.label(), "uia");
    }

    #[test]
    #[serial]
    fn optional_sources_need_a_key() {
        clear_keys();
        let desktop: Rc<dyn Desktop> = Rc::new(MemoryDesktop::new());
        let err = build_chain(Rc::clone(&desktop), &ProviderConfig::default().with_flags(true, false))
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("Vision API key required for --vision."));
        let err = build_chain(desktop, &ProviderConfig::default().with_flags(false, true))
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("Vision API key required for --infer."));
    }

    #[test]
    #[serial]
    fn explicit_key_enables_vision() {
        clear_keys();
        let desktop: Rc<dyn Desktop> = Rc::new(MemoryDesktop::new());
        let cfg = ProviderConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        }
        .with_flags(true, true);
        let chain = build_chain(desktop, &cfg).unwrap();
        assert_eq!(chain.label(), "composite");
    }
}
