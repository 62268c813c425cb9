#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
mod error;
mod layout;
mod plan;
mod select;
mod server;
mod step;
mod utils;
mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

pub use crate::core::{Environment, Mode, RunStamps, TaskContext};
pub use crate::error::{PipelineError, PlanError, SelectError, TaskResult, WatchError};
pub use crate::layout::Layout;
pub use crate::plan::Step;
pub use crate::select::FileSet;
pub use crate::server::serve;
pub use crate::watch::{WatchMapping, default_mappings, reserve_reload_port, watch};

/// Task function pointer. Tasks select their own input file set through the
/// [`TaskContext`] and write results into the output root.
type TaskFn = Arc<dyn Fn(&TaskContext) -> TaskResult + Send + Sync>;

/// The blueprint for a pipeline.
///
/// Tasks are registered once at startup under unique names; composite plans
/// arrange those names into series and parallel groups. Converting the
/// blueprint into a [`Pipeline`] validates every name reference, so a typo in
/// a plan fails fast instead of surfacing mid-build.
pub struct Blueprint {
    layout: Layout,
    mode: Mode,
    port: Option<u16>,
    tasks: Vec<(String, TaskFn)>,
    plans: Vec<(String, Step)>,
}

impl Blueprint {
    pub fn new(layout: Layout, mode: Mode) -> Self {
        Self {
            layout,
            mode,
            port: None,
            tasks: Vec::new(),
            plans: Vec::new(),
        }
    }

    /// Port of the live-reload websocket, if one was reserved.
    pub fn port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn task<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        self.tasks.push((name.into(), Arc::new(func)));
        self
    }

    pub fn plan(mut self, name: impl Into<String>, step: Step) -> Self {
        self.plans.push((name.into(), step));
        self
    }

    pub fn finish(self) -> Result<Pipeline, PlanError> {
        let mut task_names = HashSet::new();
        for (name, _) in &self.tasks {
            if !task_names.insert(name.as_str()) {
                return Err(PlanError::DuplicateTask(name.clone()));
            }
        }

        let mut plan_names = HashSet::new();
        for (name, _) in &self.plans {
            if task_names.contains(name.as_str()) || !plan_names.insert(name.as_str()) {
                return Err(PlanError::DuplicatePlan(name.clone()));
            }
        }

        plan::validate(&task_names, &self.plans)?;

        Ok(Pipeline {
            tasks: self.tasks.into_iter().collect(),
            plans: self.plans.into_iter().collect(),
            env: Environment {
                generator: "kumade",
                mode: self.mode,
                port: self.port,
                layout: self.layout,
                stamps: RunStamps::new(),
            },
        })
    }
}

/// A validated task registry with its composite plans and run state.
pub struct Pipeline {
    tasks: HashMap<String, TaskFn>,
    plans: HashMap<String, Step>,
    env: Environment,
}

impl Pipeline {
    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn layout(&self) -> &Layout {
        &self.env.layout
    }

    /// Runs the task or plan registered under `name`.
    pub fn run(&self, name: &str) -> Result<(), PipelineError> {
        if self.tasks.contains_key(name) {
            return self.invoke(name);
        }

        match self.plans.get(name) {
            Some(step) => self.run_step(step),
            None => Err(PlanError::UnknownName(name.to_string()).into()),
        }
    }

    fn run_step(&self, step: &Step) -> Result<(), PipelineError> {
        match step {
            Step::Task(name) => self.run(name),
            Step::Series(steps) => {
                // A failure here skips every later step in the list.
                for step in steps {
                    self.run_step(step)?;
                }
                Ok(())
            }
            Step::Parallel(steps) => {
                let results: Vec<_> = std::thread::scope(|scope| {
                    let handles: Vec<_> = steps
                        .iter()
                        .map(|step| scope.spawn(move || self.run_step(step)))
                        .collect();

                    // Every member settles before the group reports, so a
                    // failed sibling never cancels one already running.
                    handles
                        .into_iter()
                        .map(|handle| handle.join().expect("parallel step panicked"))
                        .collect()
                });

                results.into_iter().collect::<Result<Vec<_>, _>>().map(|_| ())
            }
        }
    }

    fn invoke(&self, name: &str) -> Result<(), PipelineError> {
        let func = &self.tasks[name];
        let span = tracing::info_span!("task", task = name);
        let _enter = span.enter();

        let s = Instant::now();
        let context = TaskContext {
            env: &self.env,
            task: name,
        };

        match func(&context) {
            Ok(()) => {
                self.env.stamps.mark(name);
                tracing::info!("finished {name} {}", utils::as_overhead(s));
                Ok(())
            }
            Err(err) => Err(PipelineError::Task(name.to_string(), err)),
        }
    }
}

/// Names of the artifact-producing tasks of a full build, in dependency
/// order. Later steps consume earlier steps' on-disk output, so the order is
/// fixed: fingerprinting must not observe half-written assets, and reference
/// rewriting needs both the manifest and the normalized page names.
const FULL_BUILD: [&str; 10] = [
    "clear",
    "html",
    "templates",
    "styles",
    "scripts",
    "images",
    "fingerprint",
    "normalize-extension",
    "prune-temp",
    "rewrite-references",
];

/// Assembles the standard pipeline: one task per build step, plus the
/// `build` (full) and `dev` (incremental, keeps the output root) plans.
pub fn default_pipeline(
    layout: Layout,
    mode: Mode,
    port: Option<u16>,
) -> Result<Pipeline, PlanError> {
    Blueprint::new(layout, mode)
        .port(port)
        .task("clear", step::clear::run)
        .task("html", step::pages::copy_static)
        .task("templates", step::pages::render_templates)
        .task("normalize-extension", step::pages::normalize_extension)
        .task("prune-temp", step::pages::prune_temp)
        .task("styles", step::styles::compile)
        .task("scripts", step::scripts::bundle)
        .task("images", step::images::optimize)
        .task("fingerprint", step::fingerprint::run)
        .task("rewrite-references", step::rewrite::run)
        .plan("build", Step::series(FULL_BUILD.iter().map(|name| Step::task(*name))))
        .plan(
            "dev",
            Step::series(FULL_BUILD.iter().skip(1).map(|name| Step::task(*name))),
        )
        .finish()
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;

    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn logging_task(log: &Log, entry: &'static str) -> impl Fn(&TaskContext) -> TaskResult + use<> {
        let log = log.clone();
        move |_| {
            log.lock().unwrap().push(entry);
            Ok(())
        }
    }

    fn blueprint() -> Blueprint {
        Blueprint::new(Layout::default(), Mode::Build)
    }

    #[test]
    fn test_series_runs_in_order() {
        let log: Log = Default::default();
        let pipeline = blueprint()
            .task("a", logging_task(&log, "a"))
            .task("b", logging_task(&log, "b"))
            .plan("both", Step::series([Step::task("a"), Step::task("b")]))
            .finish()
            .unwrap();

        pipeline.run("both").unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_series_short_circuits_on_failure() {
        let log: Log = Default::default();
        let pipeline = blueprint()
            .task("a", logging_task(&log, "a"))
            .task("boom", |_| anyhow::bail!("broken step"))
            .task("c", logging_task(&log, "c"))
            .plan(
                "all",
                Step::series([Step::task("a"), Step::task("boom"), Step::task("c")]),
            )
            .finish()
            .unwrap();

        let err = pipeline.run("all").unwrap_err();
        assert!(matches!(err, PipelineError::Task(name, _) if name == "boom"));

        // "c" never started.
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_parallel_members_all_settle() {
        let log: Log = Default::default();
        let slow = {
            let log = log.clone();
            move |_: &TaskContext| {
                std::thread::sleep(Duration::from_millis(50));
                log.lock().unwrap().push("slow");
                anyhow::Ok(())
            }
        };

        let pipeline = blueprint()
            .task("slow", slow)
            .task("boom", |_| anyhow::bail!("broken sibling"))
            .plan(
                "group",
                Step::parallel([Step::task("slow"), Step::task("boom")]),
            )
            .finish()
            .unwrap();

        // The group fails, but the slow sibling still ran to completion.
        assert!(pipeline.run("group").is_err());
        assert_eq!(*log.lock().unwrap(), vec!["slow"]);
    }

    #[test]
    fn test_unknown_name_fails_at_assembly() {
        let result = blueprint()
            .task("a", |_| Ok(()))
            .plan("all", Step::series([Step::task("a"), Step::task("typo")]))
            .finish();

        assert!(matches!(
            result.map(|_| ()),
            Err(PlanError::UnknownName(name)) if name == "typo"
        ));
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let result = blueprint()
            .task("a", |_| Ok(()))
            .task("a", |_| Ok(()))
            .finish();

        assert!(matches!(
            result.map(|_| ()),
            Err(PlanError::DuplicateTask(name)) if name == "a"
        ));
    }

    #[test]
    fn test_stamp_marked_only_on_success() {
        let pipeline = blueprint()
            .task("ok", |_| Ok(()))
            .task("bad", |_| anyhow::bail!("nope"))
            .finish()
            .unwrap();

        pipeline.run("ok").unwrap();
        let _ = pipeline.run("bad");

        assert!(pipeline.env().stamps.last_run("ok").is_some());
        assert!(pipeline.env().stamps.last_run("bad").is_none());
    }

    fn write(path: &Utf8Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// One clean `build` run with a fresh pipeline, as separate command
    /// invocations would have, returning the output names relative to the
    /// output root.
    fn clean_build(root: &Utf8Path) -> Vec<String> {
        let pipeline = default_pipeline(Layout::rooted(root), Mode::Build, None).unwrap();
        pipeline.run("build").unwrap();

        let dist = &pipeline.layout().dist;
        FileSet::new(dist, [format!("{dist}/**/*")])
            .resolve()
            .unwrap()
            .iter()
            .map(|file| file.strip_prefix(dist).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_clean_builds_produce_identical_name_sets() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let layout = Layout::rooted(&root);

        // No JS sources, so the bundler is never launched.
        write(
            &layout.templates.join("index.html"),
            r#"<html><body><link href="assets/css/main.css"></body></html>"#,
        );
        write(&layout.templates.join("about.html.twig"), "<p>{{ 1 + 1 }}</p>");
        write(&layout.styles.join("main.scss"), "body { color: teal; }");
        write(&layout.images.join("logo.svg"), "<svg></svg>");

        let first = clean_build(&root);
        let second = clean_build(&root);
        assert_eq!(first, second);

        assert!(first.contains(&"index.html".to_string()));
        assert!(first.contains(&"about.html".to_string()));
        assert!(first.contains(&"manifest.json".to_string()));
        assert!(first.iter().any(|name| {
            name.starts_with("assets/css/main-") && name.ends_with(".css")
        }));
        assert!(first.iter().any(|name| {
            name.starts_with("assets/img/logo-") && name.ends_with(".svg")
        }));

        // The page references the fingerprinted stylesheet, never the
        // original name.
        let page = fs::read_to_string(layout.dist.join("index.html")).unwrap();
        assert!(page.contains("assets/css/main-"));
        assert!(!page.contains(r#""assets/css/main.css""#));
    }

    #[test]
    fn test_default_pipeline_has_all_operations() {
        let pipeline = default_pipeline(Layout::default(), Mode::Build, None).unwrap();
        for name in FULL_BUILD {
            assert!(pipeline.tasks.contains_key(name), "missing task {name}");
        }
        assert!(pipeline.plans.contains_key("build"));
        assert!(pipeline.plans.contains_key("dev"));
    }
}
