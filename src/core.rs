use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::layout::Layout;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// The fingerprinting step renders it into asset file names so that browsers
/// can cache aggressively while stale references are impossible.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new().update_mmap(path)?.finalize().into())
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).unwrap()
    }

    /// Short prefix embedded into fingerprinted file names.
    pub(crate) fn to_short_hex(self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(10);
        hex
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time build.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

/// Per-task "last successful run" timestamps backing incremental selection.
///
/// One entry per task name, monotonic per name and independent across names.
/// The store is an explicit object owned by the [`Environment`] rather than
/// ambient module state, so parallel pipeline instances never interfere.
#[derive(Debug, Clone, Default)]
pub struct RunStamps {
    inner: Arc<Mutex<HashMap<String, SystemTime>>>,
}

impl RunStamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// End of the previous successful run of `task`, if any was recorded.
    /// `None` means the next run is a full run.
    pub fn last_run(&self, task: &str) -> Option<SystemTime> {
        self.inner.lock().unwrap().get(task).copied()
    }

    /// Records "now" as the end of a successful run of `task`.
    pub fn mark(&self, task: &str) {
        self.inner
            .lock()
            .unwrap()
            .insert(task.to_string(), SystemTime::now());
    }
}

/// Global configuration and state shared by every task in the pipeline.
pub struct Environment {
    /// The name of the generator (defaults to "kumade").
    pub generator: &'static str,
    /// The current build mode (Build or Watch).
    pub mode: Mode,
    /// The port of the live-reload websocket (if running).
    pub port: Option<u16>,
    /// Source and output directory layout.
    pub layout: Layout,
    /// Incremental run stamps, one per task name.
    pub stamps: RunStamps,
}

impl Environment {
    /// Returns a JavaScript snippet enabling live-reloading.
    ///
    /// In `Watch` mode with a reserved websocket port this returns a script
    /// that reloads the page whenever the watcher broadcasts a refresh.
    pub fn refresh_script(&self) -> Option<String> {
        match self.mode {
            Mode::Build => None,
            Mode::Watch => self.port.map(|port| {
                format!(
                    r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
                )
            }),
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("generator", &self.generator)
            .field("mode", &self.mode)
            .field("port", &self.port)
            .field("layout", &self.layout)
            .finish()
    }
}

/// The context passed to every task execution.
pub struct TaskContext<'a> {
    /// Access to global configuration and state.
    pub env: &'a Environment,
    /// Name under which the running task was registered.
    pub(crate) task: &'a str,
}

impl TaskContext<'_> {
    pub fn layout(&self) -> &Layout {
        &self.env.layout
    }

    /// Incremental cutoff for this task: files modified before this instant
    /// were already processed by the previous run.
    pub fn last_run(&self) -> Option<SystemTime> {
        self.env.stamps.last_run(self.task)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hash_hex() {
        let hash = Hash32::hash(b"");
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(hash.to_short_hex().len(), 10);
        assert!(hash.to_hex().starts_with(&hash.to_short_hex()));
    }

    #[test]
    fn test_hash_is_content_addressed() {
        assert_eq!(Hash32::hash(b"abc"), Hash32::hash(b"abc"));
        assert_ne!(Hash32::hash(b"abc"), Hash32::hash(b"abd"));
    }

    #[test]
    fn test_stamps_independent_per_task() {
        let stamps = RunStamps::new();
        assert!(stamps.last_run("styles").is_none());

        stamps.mark("styles");
        assert!(stamps.last_run("styles").is_some());
        assert!(stamps.last_run("scripts").is_none());
    }

    #[test]
    fn test_stamps_monotonic() {
        let stamps = RunStamps::new();
        stamps.mark("html");
        let first = stamps.last_run("html").unwrap();
        stamps.mark("html");
        let second = stamps.last_run("html").unwrap();
        assert!(second >= first);
    }

    #[test]
    fn test_refresh_script_only_in_watch_mode() {
        let env = Environment {
            generator: "kumade",
            mode: Mode::Build,
            port: Some(1337),
            layout: Layout::default(),
            stamps: RunStamps::new(),
        };
        assert!(env.refresh_script().is_none());

        let env = Environment {
            mode: Mode::Watch,
            ..env
        };
        assert!(env.refresh_script().unwrap().contains("ws://localhost:1337"));
    }
}
