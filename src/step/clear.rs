use std::fs;
use std::time::Instant;

use crate::TaskContext;
use crate::utils::as_overhead;

/// Deletes and recreates the output root. Runs first in a full build so no
/// artifact-producing task can observe stale output.
pub(crate) fn run(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let dist = &ctx.layout().dist;

    if fs::metadata(dist).is_ok() {
        fs::remove_dir_all(dist)?;
    }

    fs::create_dir_all(dist)?;

    tracing::info!("cleared {dist} {}", as_overhead(s));
    Ok(())
}
