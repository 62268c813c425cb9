use clap::Parser;
use console::style;
use kumade::{Layout, Mode, default_pipeline};
use tracing_subscriber::EnvFilter;

/// Command-line surface: one operation name, nothing else. Log verbosity is
/// controlled through the `KUMADE_LOG` environment variable.
#[derive(Debug, Parser)]
#[command(
    name = "kumade",
    version,
    about = "Task-based asset pipeline for static sites",
    long_about = None
)]
struct CliArgs {
    /// Operation to run: a single task (clear, html, templates, styles,
    /// scripts, images, fingerprint, normalize-extension, prune-temp,
    /// rewrite-references), a composite (build, dev), or serve / watch /
    /// default.
    #[arg(value_name = "OPERATION", default_value = "default")]
    operation: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{} {err:?}", style("error:").red().bold());
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging();

    let operation = args.operation.as_str();
    let layout = Layout::default();

    eprintln!(
        "Running {} in {} mode.",
        style("kumade").red(),
        style(operation).blue()
    );

    match operation {
        "serve" => kumade::serve(&layout),
        "watch" => {
            let (listener, port) = kumade::reserve_reload_port()?;
            let pipeline = default_pipeline(layout, Mode::Watch, Some(port))?;
            kumade::watch(&pipeline, listener)?;
            Ok(())
        }
        "default" => {
            let (listener, port) = kumade::reserve_reload_port()?;
            let pipeline = default_pipeline(layout, Mode::Watch, Some(port))?;

            pipeline.run("build")?;

            // Server and watcher start together; neither waits for the
            // other, and both run until interrupted.
            std::thread::scope(|scope| -> anyhow::Result<()> {
                let server = scope.spawn(|| kumade::serve(pipeline.layout()));
                let watcher = scope.spawn(|| kumade::watch(&pipeline, listener));

                server.join().expect("server thread panicked")?;
                watcher.join().expect("watch thread panicked")?;
                Ok(())
            })
        }
        name => {
            let pipeline = default_pipeline(layout, Mode::Build, None)?;
            pipeline.run(name)?;
            Ok(())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("KUMADE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
