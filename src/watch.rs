use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::Utf8PathBuf;
use glob::Pattern;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;
use tungstenite::WebSocket;

use crate::error::WatchError;
use crate::layout::Layout;
use crate::{Pipeline, PipelineError};

const DEBOUNCE: Duration = Duration::from_millis(250);

/// Maps a set of glob patterns to a task or plan name. Each mapping gets its
/// own watcher thread, so a change under one mapping never blocks another.
pub struct WatchMapping {
    /// Task or plan re-invoked on a matching change.
    pub target: String,
    /// Directories watched recursively.
    pub roots: Vec<Utf8PathBuf>,
    /// Patterns a changed path must match to trigger the target.
    pub patterns: Vec<String>,
}

/// The standard watch wiring: pages, styles and scripts re-run the `dev`
/// composite; images re-run only the image task.
pub fn default_mappings(layout: &Layout) -> Vec<WatchMapping> {
    let mut site_patterns = vec![
        layout.page_glob(),
        layout.template_glob(),
        layout.script_glob(),
    ];
    site_patterns.extend(layout.style_globs());

    vec![
        WatchMapping {
            target: "dev".to_string(),
            roots: vec![
                layout.templates.clone(),
                layout.styles.clone(),
                layout.scripts.clone(),
            ],
            patterns: site_patterns,
        },
        WatchMapping {
            target: "images".to_string(),
            roots: vec![layout.images.clone()],
            patterns: vec![layout.image_glob()],
        },
    ]
}

/// Reserves the live-reload websocket port before the pipeline is built, so
/// rendered pages can embed the correct refresh script.
pub fn reserve_reload_port() -> Result<(TcpListener, u16), WatchError> {
    let listener = match TcpListener::bind("127.0.0.1:1337") {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0").map_err(WatchError::Bind)?,
    };

    let port = listener.local_addr().map_err(WatchError::Bind)?.port();
    Ok((listener, port))
}

/// Watches the source roots and re-invokes the mapped task or plan on every
/// matching change, broadcasting a refresh to connected browsers after each
/// successful rebuild. Runs until the process is interrupted; rebuild
/// failures are reported and watching continues.
pub fn watch(pipeline: &Pipeline, listener: TcpListener) -> Result<(), WatchError> {
    let clients = Arc::new(Mutex::new(vec![]));

    let _thread_incoming = new_thread_ws_incoming(listener, clients.clone());
    let (tx_reload, _thread_reload) = new_thread_ws_reload(clients);

    let mappings = default_mappings(pipeline.layout());

    // Compile all patterns up front: a malformed mapping is a startup error,
    // not something to discover after the first change event.
    let compiled: Vec<(WatchMapping, Vec<Pattern>)> = mappings
        .into_iter()
        .map(|mapping| {
            let patterns = mapping
                .patterns
                .iter()
                .map(|pattern| Pattern::new(pattern))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((mapping, patterns))
        })
        .collect::<Result<_, glob::PatternError>>()?;

    let root = std::env::current_dir()?;

    std::thread::scope(|scope| {
        for (mapping, patterns) in &compiled {
            let tx_reload = tx_reload.clone();
            let root = root.clone();
            scope.spawn(move || watch_mapping(pipeline, mapping, patterns, &root, tx_reload));
        }
    });

    Ok(())
}

fn watch_mapping(
    pipeline: &Pipeline,
    mapping: &WatchMapping,
    patterns: &[Pattern],
    root: &Path,
    tx_reload: Sender<()>,
) {
    let (tx, rx) = mpsc::channel();

    let mut debouncer = match new_debouncer(DEBOUNCE, None, tx) {
        Ok(debouncer) => debouncer,
        Err(err) => {
            tracing::error!("couldn't start watcher for '{}': {err}", mapping.target);
            return;
        }
    };

    for base in &mapping.roots {
        if let Err(err) = debouncer.watch(base.as_std_path(), RecursiveMode::Recursive) {
            tracing::warn!("couldn't watch {base}: {err}");
        }
    }

    tracing::info!("watching {:?} -> '{}'", mapping.roots, mapping.target);

    while let Ok(result) = rx.recv() {
        let events = match result {
            Ok(events) => events,
            Err(errors) => {
                for err in errors {
                    tracing::error!("watch error: {err}");
                }
                continue;
            }
        };

        let dirty = events
            .iter()
            .filter(|event| {
                matches!(
                    event.event.kind,
                    EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                )
            })
            .flat_map(|event| &event.event.paths)
            .any(|path| matches_any(patterns, root, path));

        if !dirty {
            continue;
        }

        tracing::info!("change detected, running '{}'", mapping.target);

        match pipeline.run(&mapping.target) {
            Ok(()) => {
                let _ = tx_reload.send(());
            }
            Err(PipelineError::Task(name, err)) => {
                tracing::error!("task '{name}' failed while watching:\n{err:#}");
            }
            Err(err) => {
                tracing::error!("rebuild failed while watching:\n{err}");
            }
        }
    }
}

/// Event paths arrive absolute; patterns are project-relative. Paths outside
/// the project root can never match.
fn matches_any(patterns: &[Pattern], root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    patterns.iter().any(|pattern| pattern.matches_path(relative))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else { continue };
            if let Ok(socket) = tungstenite::accept(stream) {
                clients.lock().unwrap().push(socket);
            }
        }
    })
}

fn new_thread_ws_reload(
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap();
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(err)) => {
                        if err.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(err) => {
                        tracing::error!("websocket error: {err:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections.
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_mappings_are_independent() {
        let layout = Layout::default();
        let mappings = default_mappings(&layout);

        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].target, "dev");
        assert_eq!(mappings[1].target, "images");

        // The image mapping never triggers the site rebuild and vice versa.
        assert!(!mappings[0].patterns.contains(&layout.image_glob()));
        assert!(!mappings[1].patterns.contains(&layout.template_glob()));
    }

    #[test]
    fn test_matches_any_strips_project_root() {
        let patterns = [Pattern::new("templates/**/*.twig").unwrap()];
        let root = Path::new("/work/site");

        assert!(matches_any(
            &patterns,
            root,
            Path::new("/work/site/templates/index.html.twig"),
        ));
        assert!(!matches_any(
            &patterns,
            root,
            Path::new("/work/site/style/main.scss"),
        ));
    }
}
