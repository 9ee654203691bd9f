// src/replacement.rs
//! On-disk replacement asset resolution and the persisted `rt64.json`
//! sidecar database (§4.4). Grounded on `rt64_replacement_database.h/.cpp`
//! for the JSON schema and on `texture_importer.rs`'s extension-tagged
//! dispatch style for format detection.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::dds::{self, DdsImage};
use crate::error::{Error, Result};
use crate::texture_map::ReplacementEntry;

/// `hashes.rt64v1`/`hashes.rice`-bearing pair for a database entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplacementHashes {
    #[serde(default)]
    pub rt64v1: String,
    #[serde(default)]
    pub rice: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementLoad {
    Preload,
    Stream,
    Async,
    Stall,
}

impl Default for ReplacementLoad {
    fn default() -> Self {
        ReplacementLoad::Stream
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementLife {
    Permanent,
    Pool,
    Age,
}

impl Default for ReplacementLife {
    fn default() -> Self {
        ReplacementLife::Pool
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementAutoPath {
    Rt64,
    Rice,
}

impl Default for ReplacementAutoPath {
    fn default() -> Self {
        ReplacementAutoPath::Rt64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplacementConfiguration {
    #[serde(rename = "autoPath", default)]
    pub auto_path: ReplacementAutoPath,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplacementTexture {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub load: ReplacementLoad,
    #[serde(default)]
    pub life: ReplacementLife,
    #[serde(default)]
    pub hashes: ReplacementHashes,
}

/// In-memory model of `rt64.json` (§4.4, §6 schema).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplacementDatabase {
    #[serde(rename = "configuration", default)]
    pub config: ReplacementConfiguration,
    #[serde(default)]
    pub textures: Vec<ReplacementTexture>,
    #[serde(skip)]
    fingerprint_to_index: HashMap<u64, usize>,
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s, 16).ok()
}

impl ReplacementDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_hash_maps(&mut self) {
        self.fingerprint_to_index.clear();
        for (i, texture) in self.textures.iter().enumerate() {
            if let Some(fp) = parse_hex_u64(&texture.hashes.rt64v1) {
                self.fingerprint_to_index.insert(fp, i);
            }
        }
    }

    pub fn add_replacement(&mut self, texture: ReplacementTexture) {
        if let Some(fp) = parse_hex_u64(&texture.hashes.rt64v1) {
            if let Some(&index) = self.fingerprint_to_index.get(&fp) {
                self.textures[index] = texture;
                return;
            }
        }
        self.textures.push(texture);
        self.build_hash_maps();
    }

    pub fn path_for_fingerprint(&self, fingerprint: u64) -> Option<&str> {
        self.fingerprint_to_index
            .get(&fingerprint)
            .map(|&i| self.textures[i].path.as_str())
            .filter(|p| !p.is_empty())
    }

    /// §4.4 "Pruning": drop entries with neither an explicit path nor an
    /// auto-resolved hit.
    pub fn remove_unused_entries(&mut self, auto_resolved: &std::collections::HashSet<u64>) {
        self.textures.retain(|t| {
            if !t.path.is_empty() {
                return true;
            }
            match parse_hex_u64(&t.hashes.rt64v1) {
                Some(fp) => auto_resolved.contains(&fp),
                None => false,
            }
        });
        self.build_hash_maps();
    }

    pub fn read(bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<ReplacementDatabase>(bytes) {
            Ok(mut db) => {
                db.build_hash_maps();
                Some(db)
            }
            Err(e) => {
                warn!("failed to parse replacement database: {e}");
                None
            }
        }
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::from)
    }
}

fn hash_fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

enum DecodedImage {
    Rgba { width: u16, height: u16, pixels: Vec<u8> },
    Dds(DdsImage),
}

fn detect_and_decode(bytes: &[u8]) -> Result<DecodedImage> {
    if bytes.len() >= 4 && bytes[0..4] == *b"DDS " {
        return Ok(DecodedImage::Dds(dds::parse(bytes)?));
    }
    if bytes.len() >= 8 && bytes[0..4] == [0x89, 0x50, 0x4E, 0x47] {
        let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
            .map_err(|e| Error::Decode(format!("png decode failed: {e}")))?
            .to_rgba8();
        let (width, height) = (img.width() as u16, img.height() as u16);
        return Ok(DecodedImage::Rgba { width, height, pixels: img.into_raw() });
    }
    Err(Error::Decode("unrecognized replacement image magic".into()))
}

/// Parses the rice-hash filename convention: the lowercased hex run between
/// the first `#` and the last `_` (§4.4 "Auto-resolution").
fn rice_key_from_filename(name: &str) -> Option<String> {
    let hash_pos = name.find('#')?;
    let underscore_pos = name.rfind('_')?;
    if underscore_pos <= hash_pos + 1 {
        return None;
    }
    Some(name[hash_pos + 1..underscore_pos].to_lowercase())
}

/// Owns loaded replacement textures and resolves fingerprints to on-disk
/// paths, explicit or auto-resolved (§4.4).
pub struct ReplacementMap {
    pub database: ReplacementDatabase,
    root: Option<PathBuf>,
    auto_path_map: HashMap<u64, String>,
    rice_to_path: HashMap<String, String>,
    loaded_textures: Vec<ReplacementEntry>,
    path_hash_to_loaded_index: HashMap<u64, usize>,
    fingerprint_to_loaded_index: HashMap<u64, usize>,
}

impl Default for ReplacementMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplacementMap {
    pub fn new() -> Self {
        Self {
            database: ReplacementDatabase::new(),
            root: None,
            auto_path_map: HashMap::new(),
            rice_to_path: HashMap::new(),
            loaded_textures: Vec::new(),
            path_hash_to_loaded_index: HashMap::new(),
            fingerprint_to_loaded_index: HashMap::new(),
        }
    }

    /// §4.4 "Path resolution": auto_path_map first, then the database path.
    pub fn relative_path_for_fingerprint(&self, fingerprint: u64) -> String {
        if let Some(path) = self.auto_path_map.get(&fingerprint) {
            return path.clone();
        }
        self.database.path_for_fingerprint(fingerprint).unwrap_or("").to_string()
    }

    fn scan_rice_filenames(root: &Path) -> HashMap<String, String> {
        let mut map = HashMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
                let lower = name.to_lowercase();
                if !(lower.ends_with(".png") || lower.ends_with(".dds")) {
                    continue;
                }
                if let Some(key) = rice_key_from_filename(name) {
                    if let Ok(relative) = path.strip_prefix(root) {
                        map.insert(key, relative.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
        }
        map
    }

    /// §4.4 "Directory model" + "Auto-resolution".
    pub fn load_directory(&mut self, root: impl Into<PathBuf>) -> Result<()> {
        let root = root.into();
        let db_path = root.join("rt64.json");
        self.database = if db_path.exists() {
            let bytes = fs::read(&db_path).with_context(|| format!("reading {}", db_path.display()))?;
            ReplacementDatabase::read(&bytes).unwrap_or_default()
        } else {
            ReplacementDatabase::new()
        };

        self.rice_to_path.clear();
        self.auto_path_map.clear();
        if matches!(self.database.config.auto_path, ReplacementAutoPath::Rice) {
            self.rice_to_path = Self::scan_rice_filenames(&root);
            for texture in &self.database.textures {
                if texture.hashes.rice.is_empty() {
                    continue;
                }
                let rice_key = texture
                    .hashes
                    .rice
                    .split('#')
                    .next()
                    .unwrap_or(&texture.hashes.rice)
                    .to_lowercase();
                if let (Some(path), Some(fp)) =
                    (self.rice_to_path.get(&rice_key), parse_hex_u64(&texture.hashes.rt64v1))
                {
                    self.auto_path_map.insert(fp, path.clone());
                }
            }
        }

        self.root = Some(root);
        Ok(())
    }

    /// §4.4 "Load operation".
    pub fn load_from_bytes(&mut self, fingerprint: u64, relative_path: &str, bytes: &[u8]) -> Result<()> {
        let path_hash = hash_fnv1a64(relative_path.as_bytes());
        if self.path_hash_to_loaded_index.contains_key(&path_hash) {
            return Ok(());
        }

        let decoded = detect_and_decode(bytes).with_context(|| format!("decoding {relative_path}"))?;
        let entry = match decoded {
            DecodedImage::Dds(dds) => ReplacementEntry {
                width: dds.width as u16,
                height: dds.height as u16,
                mip_count: dds.mip_levels,
                path_hash,
            },
            DecodedImage::Rgba { width, height, pixels: _ } => {
                ReplacementEntry { width, height, mip_count: 1, path_hash }
            }
        };

        let index = self.loaded_textures.len();
        self.loaded_textures.push(entry);
        self.path_hash_to_loaded_index.insert(path_hash, index);
        self.fingerprint_to_loaded_index.insert(fingerprint, index);
        Ok(())
    }

    /// Resolves a path returned by `relative_path_for_fingerprint` against
    /// the loaded directory root.
    pub fn full_path(&self, relative: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(relative))
    }

    pub fn loaded_entry(&self, fingerprint: u64) -> Option<&ReplacementEntry> {
        self.fingerprint_to_loaded_index.get(&fingerprint).map(|&i| &self.loaded_textures[i])
    }

    /// Resolved per Open Question #1 (see DESIGN.md): best-effort advisory
    /// invalidation, not a GPU-memory free. Returns whether anything was
    /// invalidated.
    pub fn evict(&mut self, fingerprint: u64) -> bool {
        let Some(index) = self.fingerprint_to_loaded_index.remove(&fingerprint) else {
            return false;
        };
        self.path_hash_to_loaded_index.retain(|_, &mut i| i != index);
        true
    }

    /// Resolved per Open Question #2: drains straight into `staging`
    /// (owned by the facade's lock-counter protocol) rather than an
    /// intermediate list.
    pub fn clear(&mut self, staging: &mut Vec<ReplacementEntry>) {
        staging.append(&mut self.loaded_textures);
        self.path_hash_to_loaded_index.clear();
        self.fingerprint_to_loaded_index.clear();
    }

    pub fn remove_unused_entries(&mut self) {
        let resolved: std::collections::HashSet<u64> = self.auto_path_map.keys().copied().collect();
        self.database.remove_unused_entries(&resolved);
    }

    pub fn add_database_entry(&mut self, texture: ReplacementTexture) {
        self.database.add_replacement(texture);
    }

    /// §6 "Database I/O": atomic three-file rename save.
    pub fn save_database(&self) -> Result<()> {
        let Some(root) = &self.root else {
            crate::bail!("no replacement directory loaded");
        };
        let canonical = root.join("rt64.json");
        let new_path = root.join("rt64.json.new");
        let old_path = root.join("rt64.json.old");

        fs::write(&new_path, self.database.to_pretty_json()?)
            .with_context(|| format!("writing {}", new_path.display()))?;
        if canonical.exists() {
            if old_path.exists() {
                fs::remove_file(&old_path).with_context(|| format!("removing {}", old_path.display()))?;
            }
            fs::rename(&canonical, &old_path)
                .with_context(|| format!("renaming {} to {}", canonical.display(), old_path.display()))?;
        }
        fs::rename(&new_path, &canonical)
            .with_context(|| format!("renaming {} to {}", new_path.display(), canonical.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("texture_cache_replacement_test_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rice_key_extraction_matches_convention() {
        assert_eq!(rice_key_from_filename("Mario#DEADBEEF_ciTex.png").as_deref(), Some("deadbeef"));
        assert_eq!(rice_key_from_filename("no_hash_here.png"), None);
    }

    #[test]
    fn database_round_trips_through_json() {
        let mut db = ReplacementDatabase::new();
        db.add_replacement(ReplacementTexture {
            path: "tex/foo.dds".into(),
            load: ReplacementLoad::Stream,
            life: ReplacementLife::Pool,
            hashes: ReplacementHashes { rt64v1: "000000000012345a".into(), rice: String::new() },
        });
        let json = db.to_pretty_json().unwrap();
        let mut parsed = ReplacementDatabase::read(json.as_bytes()).unwrap();
        parsed.build_hash_maps();
        assert_eq!(parsed.textures.len(), 1);
        assert_eq!(parsed.path_for_fingerprint(0x0000_0000_0012_345a), Some("tex/foo.dds"));
    }

    #[test]
    fn explicit_path_resolves_without_auto_path() {
        let dir = temp_dir("explicit");
        let db = r#"{"configuration":{"autoPath":"rt64"},"textures":[
            {"path":"tex/foo.dds","load":"stream","life":"pool","hashes":{"rt64v1":"000000000000abcd","rice":""}}
        ]}"#;
        fs::write(dir.join("rt64.json"), db).unwrap();

        let mut map = ReplacementMap::new();
        map.load_directory(&dir).unwrap();
        assert_eq!(map.relative_path_for_fingerprint(0xabcd), "tex/foo.dds");
    }

    #[test]
    fn auto_path_rice_resolves_filename() {
        let dir = temp_dir("autopath");
        fs::create_dir_all(dir.join("assets")).unwrap();
        fs::write(dir.join("assets/Mario#DEADBEEF_ciTex.png"), b"not a real png").unwrap();
        let db = r#"{"configuration":{"autoPath":"rice"},"textures":[
            {"path":"","load":"stream","life":"pool","hashes":{"rt64v1":"0000000012345678","rice":"deadbeef#0#2"}}
        ]}"#;
        fs::write(dir.join("rt64.json"), db).unwrap();

        let mut map = ReplacementMap::new();
        map.load_directory(&dir).unwrap();
        assert_eq!(
            map.relative_path_for_fingerprint(0x0000_0000_1234_5678),
            "assets/Mario#DEADBEEF_ciTex.png"
        );
    }

    #[test]
    fn save_database_performs_atomic_three_file_dance() {
        let dir = temp_dir("atomic_save");
        let mut map = ReplacementMap::new();
        map.load_directory(&dir).unwrap();
        map.add_database_entry(ReplacementTexture {
            path: "a.png".into(),
            hashes: ReplacementHashes { rt64v1: "0000000000000001".into(), rice: String::new() },
            ..Default::default()
        });
        map.save_database().unwrap();
        assert!(dir.join("rt64.json").exists());
        assert!(!dir.join("rt64.json.old").exists());

        map.add_database_entry(ReplacementTexture {
            path: "b.png".into(),
            hashes: ReplacementHashes { rt64v1: "0000000000000002".into(), rice: String::new() },
            ..Default::default()
        });
        map.save_database().unwrap();
        assert!(dir.join("rt64.json.old").exists());

        let mut f = fs::File::create(dir.join("marker")).unwrap();
        writeln!(f, "scenario 6 sentinel").unwrap();
    }
}
