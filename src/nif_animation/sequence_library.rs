use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use bevy::log::{debug, info};

use crate::config::{BlendConfig, BlendFixes};
use crate::nif::error::{BlendError, Result};
use crate::nif::types::SequenceAsset;

use super::blend_fixes::fix_inconsistent_end_time;
use super::parser_helpers::normalize_anim_path;

/// Turns a `.kf` path into a parsed sequence. Implemented by the host's asset layer.
pub trait SequenceLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<SequenceAsset>;
    fn exists(&self, path: &str) -> bool;
}

/// Loader over assets registered up front, keyed by normalized path.
#[derive(Debug, Default, Clone)]
pub struct MemorySequenceLoader {
    assets: HashMap<String, SequenceAsset>,
}

impl MemorySequenceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, asset: SequenceAsset) {
        self.assets.insert(normalize_anim_path(path), asset);
    }

    pub fn with(mut self, path: &str, asset: SequenceAsset) -> Self {
        self.insert(path, asset);
        self
    }
}

impl SequenceLoader for MemorySequenceLoader {
    fn load(&self, path: &str) -> Result<SequenceAsset> {
        self.assets
            .get(&normalize_anim_path(path))
            .cloned()
            .ok_or_else(|| BlendError::MissingAsset(path.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.assets.contains_key(&normalize_anim_path(path))
    }
}

/// Cache of loaded sequence assets with load-time fixes applied.
pub struct SequenceLibrary {
    loader: Box<dyn SequenceLoader>,
    cache: RwLock<HashMap<String, Arc<SequenceAsset>>>,
}

impl SequenceLibrary {
    pub fn new(loader: Box<dyn SequenceLoader>) -> Self {
        Self {
            loader,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        let key = normalize_anim_path(path);
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key);
        cached || self.loader.exists(&key)
    }

    pub fn is_cached(&self, path: &str) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&normalize_anim_path(path))
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached asset or loads it, fixing its end time when enabled.
    pub fn get(&self, path: &str, config: &BlendConfig) -> Result<Arc<SequenceAsset>> {
        let key = normalize_anim_path(path);
        if let Some(asset) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(asset));
        }

        let mut asset = self.loader.load(&key)?;
        asset.validate()?;
        if config.fix_enabled(BlendFixes::INCONSISTENT_END_TIME) {
            fix_inconsistent_end_time(&mut asset);
        }
        debug!("loaded '{}' from {key}", asset.name);
        Ok(self.insert(&key, asset))
    }

    /// Stores an already parsed asset, e.g. one produced by a background load.
    pub fn insert(&self, path: &str, asset: SequenceAsset) -> Arc<SequenceAsset> {
        let asset = Arc::new(asset);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize_anim_path(path), Arc::clone(&asset));
        asset
    }

    pub fn clear(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if !cache.is_empty() {
            info!("dropping {} cached sequences", cache.len());
        }
        cache.clear();
    }
}
