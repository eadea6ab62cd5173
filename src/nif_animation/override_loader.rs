//! Builds override tables from the on-disk folder tree.
//!
//! ```text
//! <root>/_global/[_1stperson/]*.kf
//! <root>/<Mod.esp>/[_1stperson/]*.kf
//! <root>/<Mod.esp>/{weapon,actor,base,race}/<hex id>/[_1stperson/]*.kf
//! <root>/<Mod.esp>/creature/<type>/[_1stperson/]*.kf
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use bevy::log::{debug, info, warn};

use crate::config::BlendConfig;
use crate::nif::error::Result;

use super::anim_groups::AnimGroupId;
use super::parser_helpers::anim_file_stem;
use super::selector::{AnimationSelector, OverrideScope, RuleKey, VariantSet};

const GLOBAL_FOLDER: &str = "_global";
const FIRST_PERSON_FOLDER: &str = "_1stperson";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverrideLoadSummary {
    pub folders: usize,
    pub registered: usize,
    pub rejected: usize,
}

/// Scans `root` and registers one variant set per group and folder.
/// Registered paths are relative to the parent of `root`.
pub fn load_override_tree(
    root: &Path,
    config: &BlendConfig,
    selector: &mut AnimationSelector,
) -> Result<OverrideLoadSummary> {
    let mut summary = OverrideLoadSummary::default();
    let prefix = root
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    for (name, path) in sorted_subfolders(root)? {
        if name.eq_ignore_ascii_case(GLOBAL_FOLDER) {
            let relative = join(&prefix, &name);
            scan_scope(&path, &relative, OverrideScope::Global, selector, &mut summary)?;
            continue;
        }
        let Some(mod_index) = config.mod_index(&name) else {
            warn!("override folder '{name}' does not match a loaded plugin");
            summary.rejected += 1;
            continue;
        };
        let mod_relative = join(&prefix, &name);
        scan_scope(&path, &mod_relative, OverrideScope::Mod(mod_index), selector, &mut summary)?;

        for (kind, kind_path) in sorted_subfolders(&path)? {
            if kind.eq_ignore_ascii_case(FIRST_PERSON_FOLDER) {
                continue;
            }
            let kind_relative = join(&mod_relative, &kind);
            for (id, id_path) in sorted_subfolders(&kind_path)? {
                let Some(scope) = scope_for(&kind, &id) else {
                    warn!("ignoring override folder '{kind_relative}/{id}'");
                    summary.rejected += 1;
                    continue;
                };
                let relative = join(&kind_relative, &id);
                scan_scope(&id_path, &relative, scope, selector, &mut summary)?;
            }
        }
    }

    info!(
        "override tree {}: {} folders, {} sets registered, {} rejected",
        root.display(),
        summary.folders,
        summary.registered,
        summary.rejected
    );
    Ok(summary)
}

fn scope_for(kind: &str, id: &str) -> Option<OverrideScope> {
    match kind.to_lowercase().as_str() {
        "weapon" => parse_form_id(id).map(OverrideScope::Weapon),
        "actor" => parse_form_id(id).map(OverrideScope::Actor),
        "base" => parse_form_id(id).map(OverrideScope::BaseForm),
        "race" => parse_form_id(id).map(OverrideScope::Race),
        "creature" => id.parse().ok().map(OverrideScope::CreatureType),
        _ => None,
    }
}

fn parse_form_id(id: &str) -> Option<u32> {
    let digits = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id);
    u32::from_str_radix(digits, 16).ok()
}

fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

fn sorted_subfolders(dir: &Path) -> Result<Vec<(String, std::path::PathBuf)>> {
    let mut folders = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            folders.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    folders.sort();
    Ok(folders)
}

/// Registers the folder's files and those of its `_1stperson` subfolder.
fn scan_scope(
    dir: &Path,
    relative: &str,
    scope: OverrideScope,
    selector: &mut AnimationSelector,
    summary: &mut OverrideLoadSummary,
) -> Result<()> {
    scan_folder(dir, relative, scope, false, selector, summary)?;
    for (name, path) in sorted_subfolders(dir)? {
        if name.eq_ignore_ascii_case(FIRST_PERSON_FOLDER) {
            let relative = join(relative, &name);
            scan_folder(&path, &relative, scope, true, selector, summary)?;
        }
    }
    Ok(())
}

fn scan_folder(
    dir: &Path,
    relative: &str,
    scope: OverrideScope,
    first_person: bool,
    selector: &mut AnimationSelector,
    summary: &mut OverrideLoadSummary,
) -> Result<()> {
    let mut groups: HashMap<AnimGroupId, Vec<String>> = HashMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.to_lowercase().ends_with(".kf") {
            continue;
        }
        let Some(group) = AnimGroupId::parse(anim_file_stem(&file_name)) else {
            debug!("'{relative}/{file_name}' does not name an animation group");
            summary.rejected += 1;
            continue;
        };
        groups
            .entry(group)
            .or_default()
            .push(join(relative, &file_name));
    }
    if groups.is_empty() {
        return Ok(());
    }
    summary.folders += 1;

    let mut groups: Vec<_> = groups.into_iter().collect();
    groups.sort_by_key(|(group, _)| *group);
    for (group, mut paths) in groups {
        paths.sort();
        let key = RuleKey {
            scope,
            first_person,
            group,
        };
        match selector.register(key, VariantSet::new(paths)) {
            Ok(()) => summary.registered += 1,
            Err(err) => {
                warn!("rejected overrides for {group} in '{relative}': {err}");
                summary.rejected += 1;
            }
        }
    }
    Ok(())
}
