//! Context packs: named, persisted scope presets under
//! `.codevault/contextpacks/*.json`, with at most one "active" per project.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextPack {
    pub key: String,
    #[serde(rename = "pathGlob")]
    pub path_glob: Vec<String>,
    pub tags: Vec<String>,
    pub lang: Vec<String>,
    pub provider: Option<String>,
    pub reranker: bool,
    pub hybrid: bool,
    pub bm25: bool,
    #[serde(rename = "symbolBoost")]
    pub symbol_boost: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePackMarker {
    pub key: String,
    #[serde(rename = "appliedAt")]
    pub applied_at: String,
}

fn packs_dir(project_root: &Path) -> PathBuf {
    project_root.join(".codevault").join("contextpacks")
}

pub fn save_pack(project_root: &Path, pack: &ContextPack) -> Result<()> {
    let dir = packs_dir(project_root);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.json", pack.key));
    let json = serde_json::to_string_pretty(pack)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load_pack(project_root: &Path, key: &str) -> Option<ContextPack> {
    let path = packs_dir(project_root).join(format!("{key}.json"));
    std::fs::read_to_string(path).ok().and_then(|s| serde_json::from_str(&s).ok())
}

pub fn list_packs(project_root: &Path) -> Vec<ContextPack> {
    let dir = packs_dir(project_root);
    let Ok(read_dir) = std::fs::read_dir(&dir) else { return vec![] };
    read_dir
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .filter(|e| e.file_name() != "active-pack.json")
        .filter_map(|e| std::fs::read_to_string(e.path()).ok())
        .filter_map(|s| serde_json::from_str(&s).ok())
        .collect()
}

fn active_marker_path(project_root: &Path) -> PathBuf {
    packs_dir(project_root).join("active-pack.json")
}

pub fn set_active(project_root: &Path, key: &str, applied_at: &str) -> Result<()> {
    let dir = packs_dir(project_root);
    std::fs::create_dir_all(&dir)?;
    let marker = ActivePackMarker { key: key.to_string(), applied_at: applied_at.to_string() };
    let path = active_marker_path(project_root);
    let json = serde_json::to_string_pretty(&marker)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn active_pack(project_root: &Path) -> Option<ContextPack> {
    let marker_raw = std::fs::read_to_string(active_marker_path(project_root)).ok()?;
    let marker: ActivePackMarker = serde_json::from_str(&marker_raw).ok()?;
    load_pack(project_root, &marker.key)
}
