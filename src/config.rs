use crate::nif::error::{BlendError, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

bitflags! {
    /// Optional corrective passes over known blending defects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BlendFixes: u32 {
        const CONFLICTING_PRIORITIES = 1;
        const INCONSISTENT_END_TIME = 1 << 1;
        const BLEND_SMOOTHING = 1 << 2;
        const MISSING_UP_DOWN = 1 << 3;
        const PREMATURE_FIRST_PERSON_END = 1 << 4;
    }
}

impl Default for BlendFixes {
    fn default() -> Self {
        BlendFixes::all().difference(BlendFixes::BLEND_SMOOTHING)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    pub fixes: BlendFixes,
    /// Seconds for blend smoothing to close ~63% of the gap to the target weight.
    pub smoothing_time_constant: f32,
    /// Ease in/out used when a caller does not give one.
    pub default_blend_time: f32,
    pub weight_threshold: f32,
    pub only_use_highest_weight: bool,
    /// Root of the override folder tree scanned by `reset`.
    pub override_root: Option<PathBuf>,
    /// Plugin file names in load order; the index becomes the mod tier priority.
    pub mod_load_order: Vec<String>,
    /// Fixed seed for variant selection, random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            fixes: BlendFixes::default(),
            smoothing_time_constant: 0.1,
            default_blend_time: 0.2,
            weight_threshold: 0.0,
            only_use_highest_weight: false,
            override_root: None,
            mod_load_order: Vec::new(),
            rng_seed: None,
        }
    }
}

impl BlendConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BlendConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: BlendConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_time_constant > 0.0) {
            return Err(BlendError::Configuration(format!(
                "smoothing_time_constant must be positive, got {}",
                self.smoothing_time_constant
            )));
        }
        if !(self.default_blend_time >= 0.0) {
            return Err(BlendError::Configuration(format!(
                "default_blend_time must not be negative, got {}",
                self.default_blend_time
            )));
        }
        if !(0.0..1.0).contains(&self.weight_threshold) {
            return Err(BlendError::Configuration(format!(
                "weight_threshold must be in [0, 1), got {}",
                self.weight_threshold
            )));
        }
        Ok(())
    }

    pub fn fix_enabled(&self, fix: BlendFixes) -> bool {
        self.fixes.contains(fix)
    }

    /// Load order index of a plugin, matched case-insensitively.
    pub fn mod_index(&self, mod_name: &str) -> Option<u8> {
        self.mod_load_order
            .iter()
            .position(|name| name.eq_ignore_ascii_case(mod_name))
            .and_then(|index| u8::try_from(index).ok())
    }
}
