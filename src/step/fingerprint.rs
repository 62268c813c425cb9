use std::collections::BTreeMap;
use std::fs;
use std::time::Instant;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::TaskContext;
use crate::core::Hash32;
use crate::select::FileSet;
use crate::utils::as_overhead;

/// Flat mapping from an original asset path to its fingerprinted name, both
/// relative to the output root. Written fresh on every build, never merged
/// with a previous run's manifest.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub(crate) fn insert(&mut self, original: String, hashed: String) {
        self.entries.insert(original, hashed);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    /// Reverse lookup: the original path an earlier run mapped to `hashed`.
    pub(crate) fn original_for(&self, hashed: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, value)| value.as_str() == hashed)
            .map(|(original, _)| original.as_str())
    }

    /// Mappings ordered longest original first, so a path can never be
    /// clobbered by a shorter mapping that happens to be its prefix.
    pub(crate) fn by_longest_original(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .entries
            .iter()
            .map(|(original, hashed)| (original.as_str(), hashed.as_str()))
            .collect();
        pairs.sort_by_key(|(original, _)| std::cmp::Reverse(original.len()));
        pairs
    }
}

/// Content-hashes every file under the output assets root, renames it to
/// embed the hash and writes the original → hashed manifest.
///
/// Files named by a previous run's manifest keep their hashed name and
/// carry their entry forward, so a long-lived watch process never stacks
/// hash suffixes. A freshly rebuilt asset under the original name takes
/// over the entry on the next pass.
pub(crate) fn run(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let layout = ctx.layout();
    let files = FileSet::new(&layout.dist, [layout.asset_glob()]).resolve()?;

    let previous = read_manifest(&layout.manifest_path());
    let mut manifest = Manifest::default();
    let mut carried = Vec::new();

    for file in &files {
        let original = file.strip_prefix(&layout.dist)?;

        if let Some(source) = previous.original_for(original.as_str()) {
            carried.push((source.to_string(), original.to_string()));
            continue;
        }

        let hash = Hash32::hash_file(file)
            .with_context(|| format!("couldn't hash {file}"))?
            .to_short_hex();

        let hashed = hashed_name(file, &hash);
        fs::rename(file, &hashed)?;

        let renamed = hashed.strip_prefix(&layout.dist)?;
        manifest.insert(original.to_string(), renamed.to_string());
    }

    // A freshly renamed asset wins over the carried entry for the same
    // original, whatever order the files were visited in.
    for (source, name) in carried {
        if manifest.get(&source).is_none() {
            manifest.insert(source, name);
        }
    }

    let out = fs::File::create(layout.manifest_path())?;
    serde_json::to_writer_pretty(out, &manifest)?;

    tracing::info!("fingerprinted {} assets {}", manifest.len(), as_overhead(s));
    Ok(())
}

/// The previous run's manifest, or an empty one on a clean build (the
/// `clear` step removes it together with the rest of the output root).
fn read_manifest(path: &Utf8Path) -> Manifest {
    fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

/// `assets/css/main.css` + `d41d8cd98f` → `assets/css/main-d41d8cd98f.css`.
fn hashed_name(file: &Utf8Path, hash: &str) -> Utf8PathBuf {
    let stem = file.file_stem().unwrap_or("");

    let name = match file.extension() {
        Some(ext) => format!("{stem}-{hash}.{ext}"),
        None => format!("{stem}-{hash}"),
    };

    file.with_file_name(name)
}
