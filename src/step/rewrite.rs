use std::fs;
use std::time::Instant;

use anyhow::Context as _;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::TaskContext;
use crate::select::FileSet;
use crate::step::fingerprint::Manifest;
use crate::utils::as_overhead;

/// Rewrites every manifest-mapped asset reference in the output HTML to its
/// fingerprinted counterpart. References missing from the manifest are left
/// untouched.
pub(crate) fn run(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let layout = ctx.layout();

    let manifest = fs::read_to_string(layout.manifest_path())
        .context("manifest not found, run fingerprint first")?;
    let manifest: Manifest = serde_json::from_str(&manifest).context("malformed manifest")?;
    let mappings = manifest.by_longest_original();

    let pages = FileSet::new(&layout.dist, [layout.output_page_glob()]).resolve()?;

    pages.par_iter().try_for_each(|page| -> anyhow::Result<()> {
        let text = fs::read_to_string(page)?;
        let mut rewritten = text.clone();

        for (original, hashed) in &mappings {
            if rewritten.contains(original) {
                rewritten = rewritten.replace(original, hashed);
            }
        }

        if rewritten != text {
            fs::write(page, rewritten)?;
        }

        Ok(())
    })?;

    tracing::info!(
        "rewrote references in {} pages {}",
        pages.len(),
        as_overhead(s)
    );
    Ok(())
}
