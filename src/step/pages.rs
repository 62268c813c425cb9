use std::fs;
use std::time::Instant;

use anyhow::Context as _;

use crate::select::FileSet;
use crate::utils::as_overhead;
use crate::TaskContext;

/// Copies static page files from the templates root into the output root,
/// narrowed to files changed since the last run of this task.
pub(crate) fn copy_static(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let layout = ctx.layout();
    let set = FileSet::new(&layout.templates, [layout.page_glob()]);
    let files = set.resolve_since(ctx.last_run())?;
    let script = ctx.env.refresh_script();

    for file in &files {
        let rel = file.strip_prefix(set.base())?;
        let dest = layout.dist.join(rel);

        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }

        match &script {
            None => {
                fs::copy(file, &dest)?;
            }
            Some(script) => {
                let html = fs::read_to_string(file)?;
                fs::write(&dest, inject_refresh(&html, script))?;
            }
        }
    }

    tracing::info!("copied {} static pages {}", files.len(), as_overhead(s));
    Ok(())
}

/// Renders template files into the output root, keeping their source names;
/// `normalize-extension` strips the template suffix afterwards.
///
/// A failure in one template is reported and the batch continues, so one
/// malformed page never aborts the whole build.
pub(crate) fn render_templates(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let layout = ctx.layout();
    let set = FileSet::new(&layout.templates, [layout.template_glob()]);
    let files = set.resolve_since(ctx.last_run())?;
    let script = ctx.env.refresh_script();

    let mut env = minijinja::Environment::new();
    env.set_loader(minijinja::path_loader(&layout.templates));
    env.add_global("generator", ctx.env.generator);

    let mut rendered = 0usize;
    for file in &files {
        let rel = file.strip_prefix(set.base())?;

        let html = match env
            .get_template(rel.as_str())
            .and_then(|template| template.render(minijinja::context! {}))
        {
            Ok(html) => html,
            Err(err) => {
                tracing::error!("template {file} failed:\n{err:#}");
                continue;
            }
        };

        let dest = layout.dist.join(rel);
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)?;
        }

        match &script {
            None => fs::write(&dest, html)?,
            Some(script) => fs::write(&dest, inject_refresh(&html, script))?,
        }

        rendered += 1;
    }

    tracing::info!("rendered {rendered} templates {}", as_overhead(s));
    Ok(())
}

/// Strips the trailing template extension from already-written output pages:
/// `index.html.twig` becomes `index.html` in the same directory. Pure copy
/// under the stripped name; `prune-temp` deletes the intermediates.
pub(crate) fn normalize_extension(ctx: &TaskContext) -> anyhow::Result<()> {
    let layout = ctx.layout();
    let files = FileSet::new(&layout.dist, [layout.temp_page_glob()]).resolve()?;

    for file in &files {
        let target = file.with_extension("");
        fs::copy(file, &target)
            .with_context(|| format!("failed to normalize {file}"))?;
    }

    tracing::info!("normalized {} page names", files.len());
    Ok(())
}

/// Deletes the pre-normalization intermediate pages from the output root.
pub(crate) fn prune_temp(ctx: &TaskContext) -> anyhow::Result<()> {
    let layout = ctx.layout();
    let files = FileSet::new(&layout.dist, [layout.temp_page_glob()]).resolve()?;

    for file in &files {
        fs::remove_file(file).with_context(|| format!("failed to prune {file}"))?;
    }

    tracing::info!("pruned {} intermediate pages", files.len());
    Ok(())
}

/// Injects the live-reload snippet into a rendered page, right before the
/// closing body tag when one exists.
fn inject_refresh(html: &str, script: &str) -> String {
    let tag = format!("<script>{script}</script>");

    match html.rfind("</body>") {
        Some(index) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..index]);
            out.push_str(&tag);
            out.push_str(&html[index..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}
