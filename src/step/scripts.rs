use std::fs;
use std::process::Command;
use std::time::Instant;

use anyhow::Context as _;

use crate::TaskContext;
use crate::select::FileSet;
use crate::utils::as_overhead;

/// Bundles the JavaScript entry point into `assets/js` with `esbuild`:
/// module graph resolution, transpilation to the target syntax level,
/// minification and a source map all happen inside the bundler.
///
/// The whole bundle is rebuilt whenever any script source changed since the
/// last run; with nothing changed the task is a no-op.
pub(crate) fn bundle(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let layout = ctx.layout();

    let since = ctx.last_run();
    let changed = FileSet::new(&layout.scripts, [layout.script_glob()]).resolve_since(since)?;

    if changed.is_empty() {
        if since.is_some() {
            tracing::debug!("scripts are up to date");
        } else {
            tracing::debug!("no script sources found");
        }
        return Ok(());
    }

    let out_dir = layout.js_dir();
    fs::create_dir_all(&out_dir)?;

    let output = Command::new("esbuild")
        .arg(layout.script_entry.as_str())
        .arg("--bundle")
        .arg("--minify")
        .arg("--sourcemap")
        .arg("--target=es2017")
        .arg(format!("--outdir={out_dir}"))
        .output()
        .context("failed to launch esbuild, is it installed?")?;

    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        anyhow::bail!("esbuild failed:\n{stderr}");
    }

    if !stderr.trim().is_empty() {
        tracing::warn!("esbuild:\n{stderr}");
    }

    tracing::info!("bundled {} {}", layout.script_entry, as_overhead(s));
    Ok(())
}
