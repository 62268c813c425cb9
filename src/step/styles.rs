use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Instant;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::TaskContext;
use crate::select::{FileSet, modified_after};
use crate::utils::as_overhead;

/// Compiles Sass entry points into minified CSS under `assets/css`.
///
/// Incremental selection is dependency-aware: an entry point is recompiled
/// when it changed itself or when any file it transitively `@use`s /
/// `@import`s changed. Partials (underscore-prefixed files) are never
/// compiled on their own. A failing entry is reported and the batch
/// continues.
pub(crate) fn compile(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let layout = ctx.layout();
    let set = FileSet::new(&layout.styles, layout.style_globs());
    let sources = set.resolve()?;

    if sources.is_empty() {
        tracing::debug!("no style sources found");
        return Ok(());
    }

    let graph = ImportGraph::scan(&sources);

    let changed: HashSet<Utf8PathBuf> = match ctx.last_run() {
        None => sources.iter().cloned().collect(),
        Some(stamp) => sources
            .iter()
            .filter(|file| modified_after(file, stamp))
            .cloned()
            .collect(),
    };

    let entries: Vec<&Utf8PathBuf> = sources
        .iter()
        .filter(|file| is_entry(file))
        .filter(|file| graph.reaches_any(file, &changed))
        .collect();

    let out_dir = layout.css_dir();
    fs::create_dir_all(&out_dir)?;

    let compiled: usize = entries
        .par_iter()
        .map(|entry| match compile_one(entry, &out_dir) {
            Ok(()) => 1,
            Err(err) => {
                tracing::error!("style {entry} failed:\n{err:#}");
                0
            }
        })
        .sum();

    tracing::info!(
        "compiled {compiled}/{} stylesheets {}",
        entries.len(),
        as_overhead(s)
    );
    Ok(())
}

fn is_entry(file: &Utf8Path) -> bool {
    !file
        .file_name()
        .is_some_and(|name| name.starts_with('_'))
}

fn compile_one(entry: &Utf8Path, out_dir: &Utf8Path) -> anyhow::Result<()> {
    let options = grass::Options::default().style(grass::OutputStyle::Compressed);
    let css = grass::from_path(entry, &options).map_err(|err| anyhow::anyhow!("{err}"))?;

    let stem = entry.file_stem().context("style file without a name")?;
    let name = format!("{stem}.css");
    let map_name = format!("{name}.map");

    let css = format!("{css}\n/*# sourceMappingURL={map_name} */\n");
    fs::write(out_dir.join(&name), css)?;

    // grass does not produce source maps, so a sources-only stub is written
    // to keep the emitted layout complete.
    let map = serde_json::json!({
        "version": 3,
        "file": name,
        "sources": [entry.as_str()],
        "names": [],
        "mappings": "",
    });
    fs::write(out_dir.join(&map_name), serde_json::to_string(&map)?)?;

    Ok(())
}

/// Directed graph of style imports: an edge importer → imported for every
/// resolvable `@use` / `@forward` / `@import` target.
struct ImportGraph {
    graph: Graph<Utf8PathBuf, ()>,
    nodes: HashMap<Utf8PathBuf, NodeIndex>,
}

impl ImportGraph {
    fn scan(sources: &[Utf8PathBuf]) -> Self {
        let mut this = Self {
            graph: Graph::new(),
            nodes: HashMap::new(),
        };

        for source in sources {
            this.node(source);
        }

        for source in sources {
            let text = match fs::read_to_string(source) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!("couldn't scan {source} for imports: {err}");
                    continue;
                }
            };

            let dir = source.parent().unwrap_or(Utf8Path::new(""));
            for target in parse_imports(&text) {
                if let Some(resolved) = resolve_target(dir, &target) {
                    let from = this.node(source);
                    let to = this.node(&resolved);
                    this.graph.add_edge(from, to, ());
                }
            }
        }

        this
    }

    fn node(&mut self, path: &Utf8Path) -> NodeIndex {
        match self.nodes.get(path) {
            Some(&index) => index,
            None => {
                let index = self.graph.add_node(path.to_path_buf());
                self.nodes.insert(path.to_path_buf(), index);
                index
            }
        }
    }

    /// Whether `from` (or anything it transitively imports) is in `changed`.
    fn reaches_any(&self, from: &Utf8Path, changed: &HashSet<Utf8PathBuf>) -> bool {
        let Some(&start) = self.nodes.get(from) else {
            return true;
        };

        let mut bfs = petgraph::visit::Bfs::new(&self.graph, start);
        while let Some(node) = bfs.next(&self.graph) {
            if changed.contains(&self.graph[node]) {
                return true;
            }
        }

        false
    }
}

/// Extracts `@use` / `@forward` / `@import` targets from Sass source text.
/// Remote and plain-CSS imports are not dependencies and are skipped.
fn parse_imports(source: &str) -> Vec<String> {
    let mut targets = Vec::new();

    for line in source.lines() {
        let line = line.trim_start();
        let found = ["@use", "@forward", "@import"]
            .iter()
            .find_map(|rule| line.strip_prefix(rule));

        let Some(rest) = found else { continue };

        for quoted in extract_quoted(rest) {
            let skip = quoted.starts_with("http://")
                || quoted.starts_with("https://")
                || quoted.starts_with("//")
                || quoted.ends_with(".css");
            if !skip {
                targets.push(quoted);
            }
        }
    }

    targets
}

fn extract_quoted(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(['"', '\'']) {
        let quote = rest.as_bytes()[start] as char;
        let tail = &rest[start + 1..];

        let Some(end) = tail.find(quote) else { break };
        out.push(tail[..end].to_string());
        rest = &tail[end + 1..];
    }

    out
}

/// Resolves an import target the way Sass does: relative to the importing
/// file, trying the plain name, the underscore-prefixed partial name and the
/// directory index, with both `.scss` and `.sass` extensions.
fn resolve_target(from_dir: &Utf8Path, target: &str) -> Option<Utf8PathBuf> {
    let target = Utf8Path::new(target);
    let dir = match target.parent() {
        Some(parent) if !parent.as_str().is_empty() => from_dir.join(parent),
        _ => from_dir.to_path_buf(),
    };
    let name = target.file_name()?;

    let candidates = [
        name.to_string(),
        format!("{name}.scss"),
        format!("{name}.sass"),
        format!("_{name}"),
        format!("_{name}.scss"),
        format!("_{name}.sass"),
    ];

    for candidate in candidates {
        let path = dir.join(candidate);
        if path.is_file() {
            return Some(path);
        }
    }

    for index in ["_index.scss", "_index.sass"] {
        let path = from_dir.join(target).join(index);
        if path.is_file() {
            return Some(path);
        }
    }

    None
}
