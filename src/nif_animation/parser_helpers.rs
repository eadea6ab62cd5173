// src/nif_animation/parser_helpers.rs

use crate::nif::error::{BlendError, Result};

/// Splits a text key line into `(prefix, value)` at the first colon.
/// Returns `None` when the line has no colon or the prefix is empty.
pub(super) fn split_marker(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let (prefix, value) = line.split_once(':')?;
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return None;
    }
    Some((prefix, value.trim()))
}

// Text key prefixes that carry a payload (lowercase)
pub(super) const KNOWN_PAYLOAD_PREFIXES: [&str; 5] = ["morph", "script", "soundpath", "sound", "soundgen"];

/// Canonical form of an animation path: forward slashes, lowercase, relative to `meshes/`.
pub fn normalize_anim_path(path: &str) -> String {
    let cleaned = path.trim().replace('\\', "/").to_lowercase();
    let cleaned = cleaned.trim_start_matches('/');
    cleaned
        .strip_prefix("meshes/")
        .unwrap_or(cleaned)
        .to_string()
}

/// Normalizes `path` and rejects anything that cannot name a `.kf` asset.
pub fn validate_anim_path(path: &str) -> Result<String> {
    let normalized = normalize_anim_path(path);
    if normalized.is_empty() {
        return Err(BlendError::Configuration("empty animation path".to_string()));
    }
    if normalized.split('/').any(|part| part == "..") {
        return Err(BlendError::Configuration(format!(
            "animation path '{path}' escapes the asset root"
        )));
    }
    if !normalized.ends_with(".kf") {
        return Err(BlendError::Configuration(format!(
            "animation path '{path}' is not a .kf file"
        )));
    }
    Ok(normalized)
}

/// File stem of a normalized path (`characters/_male/idle_order_1.kf` -> `idle_order_1`).
pub fn anim_file_stem(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.strip_suffix(".kf")
        .or_else(|| file.strip_suffix(".KF"))
        .unwrap_or(file)
}

/// Variant markers carried in file names.
pub fn is_ordered_variant(path: &str) -> bool {
    anim_file_stem(path).to_lowercase().contains("_order_")
}

pub fn is_empty_reload_variant(path: &str) -> bool {
    anim_file_stem(path).to_lowercase().contains("_empty")
}

pub fn is_partial_reload_variant(path: &str) -> bool {
    anim_file_stem(path).to_lowercase().contains("_partial")
}
