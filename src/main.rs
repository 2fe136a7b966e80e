use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use halley_launcher_lib::core::auth::RemoteCredentials;
use halley_launcher_lib::core::config::LauncherConfig;
use halley_launcher_lib::core::events::{LogLevel, LogLine, PipelineOutcome};
use halley_launcher_lib::core::progress::Progress;
use halley_launcher_lib::core::services::LauncherServices;
use halley_launcher_lib::core::stage::{LauncherStage, Presenter, StageControl};
use halley_launcher_lib::core::storage::{InstanceLock, SqliteStore};
use halley_launcher_lib::core::update::CURRENT_LAUNCHER_VERSION;

const TICK: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "halley-launcher")]
#[command(about = "Build, download and launch the Halley editor for your projects", long_about = None)]
struct Cli {
    /// Open this project straight away. Extra words are joined with spaces so
    /// unquoted paths still work.
    #[arg(long, num_args = 1.., value_name = "PATH")]
    project: Vec<String>,

    /// Use this directory for launcher data instead of the platform default
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered projects, dropping the ones that no longer exist
    List,
    /// Register a local project
    Add { path: PathBuf },
    /// Mirror a project from a project service and register it
    AddRemote {
        #[arg(long)]
        url: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Forget a project (remote mirrors are deleted from disk)
    Remove { path: PathBuf },
    /// Get the editor for a registered project and start it
    Open {
        path: PathBuf,
        /// Start the editor without loading the game DLL
        #[arg(long)]
        safe_mode: bool,
    },
    /// Ask the update server for a newer launcher
    CheckUpdate,
    /// Download and install a newer launcher, then restart
    Update,
}

/// Prints stage events to the terminal.
#[derive(Default)]
struct ConsolePresenter {
    last_percent: Option<u32>,
    outcome: Option<PipelineOutcome>,
}

impl Presenter for ConsolePresenter {
    fn on_status(&mut self, status: &str) {
        self.last_percent = None;
        println!("{status}");
    }

    fn on_log(&mut self, line: &LogLine) {
        // Everything else already reaches stderr through tracing.
        if line.level == LogLevel::Dev {
            println!("  {}", line.message);
        }
    }

    fn on_progress(&mut self, progress: Progress) {
        let percent = (progress.fraction() * 100.0) as u32;
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            println!("  {percent}% ({}/{})", progress.current, progress.total);
        }
    }

    fn on_finished(&mut self, outcome: &PipelineOutcome) {
        match outcome {
            PipelineOutcome::Launched { project } => {
                println!("Editor started for {}", project.display())
            }
            PipelineOutcome::UpdateHandedOff => println!("Restarting to finish the update"),
            PipelineOutcome::ReturnToProjectSelection => {}
            PipelineOutcome::Failed(message) => eprintln!("Failed: {message}"),
            PipelineOutcome::Cancelled => println!("Cancelled"),
        }
        self.outcome = Some(outcome.clone());
    }
}

fn init_tracing() {
    let filter = std::env::var("HALLEY_LAUNCHER_LOG")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Ticks the stage until the active view and any update check are done.
async fn drive(stage: &mut LauncherStage, presenter: &mut ConsolePresenter) -> Option<i32> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut interval = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                tracing::info!("Interrupted, cancelling");
                stage.cancel();
                presenter.on_finished(&PipelineOutcome::Cancelled);
            }
            _ = interval.tick() => {}
        }

        if let StageControl::Exit(code) = stage.tick(presenter) {
            return Some(code);
        }
        if !stage.is_busy() && !stage.is_checking_for_updates() {
            return None;
        }
    }
}

fn exit_code(presenter: &ConsolePresenter, control: Option<i32>) -> ExitCode {
    if let Some(code) = control {
        return ExitCode::from(u8::try_from(code).unwrap_or(1));
    }
    match presenter.outcome {
        Some(PipelineOutcome::Failed(_)) | Some(PipelineOutcome::Cancelled) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

fn print_projects(stage: &mut LauncherStage) {
    let projects = stage.scan_projects();
    if projects.is_empty() {
        println!("No projects registered. Use `add <path>` or `add-remote`.");
        return;
    }
    for properties in projects {
        let remote = stage
            .settings()
            .try_get(&properties.path)
            .is_some_and(|location| location.is_remote_tracked());
        let state = if !properties.is_built() {
            "not built".to_string()
        } else if properties.is_up_to_date() {
            "ready".to_string()
        } else {
            format!("built {}", properties.built_version)
        };
        println!(
            "{}{}  {}  (Halley {}, {state})",
            properties.name,
            if remote { " [remote]" } else { "" },
            properties.path.display(),
            properties.required_version,
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let config = LauncherConfig::load(cli.data_dir)?;
    let services = LauncherServices::from_config(config)?;
    services.layout.ensure()?;
    let _lock = InstanceLock::acquire(&services.layout.lock_file())?;
    let store = SqliteStore::open(&services.layout.settings_db())?;
    let mut stage = LauncherStage::new(Arc::new(services), Box::new(store))?;
    let mut presenter = ConsolePresenter::default();

    if !cli.project.is_empty() {
        stage.open_initial(PathBuf::from(cli.project.join(" ")));
        let control = drive(&mut stage, &mut presenter).await;
        return Ok(exit_code(&presenter, control));
    }

    let control = match cli.command.unwrap_or(Commands::List) {
        Commands::List => {
            stage.check_for_updates();
            print_projects(&mut stage);
            let control = drive(&mut stage, &mut presenter).await;
            if let Some(info) = stage.new_version_info().filter(|info| info.is_new_version()) {
                println!(
                    "Launcher version {} is available (running {CURRENT_LAUNCHER_VERSION}). Run `update` to install it.",
                    info.version
                );
            }
            control
        }
        Commands::Add { path } => {
            let properties = stage.add_local(&path)?;
            println!("Added {} ({})", properties.name, properties.path.display());
            stage.tick(&mut presenter);
            None
        }
        Commands::AddRemote {
            url,
            project,
            username,
            password,
        } => {
            stage.add_remote(RemoteCredentials::new(url, project, username, password))?;
            drive(&mut stage, &mut presenter).await
        }
        Commands::Remove { path } => {
            if stage.remove(&path)? {
                println!("Removed {}", path.display());
            } else {
                println!("{} is not registered", path.display());
            }
            stage.tick(&mut presenter);
            None
        }
        Commands::Open { path, safe_mode } => {
            stage.open(&path, safe_mode)?;
            drive(&mut stage, &mut presenter).await
        }
        Commands::CheckUpdate => {
            stage.check_for_updates();
            drive(&mut stage, &mut presenter).await;
            match stage.new_version_info() {
                Some(info) if info.is_new_version() => {
                    println!("Launcher version {} is available", info.version)
                }
                Some(_) => println!("Launcher is up to date (version {CURRENT_LAUNCHER_VERSION})"),
                None => anyhow::bail!("Unable to retrieve new version info"),
            }
            None
        }
        Commands::Update => {
            stage.check_for_updates();
            drive(&mut stage, &mut presenter).await;
            if stage.new_version_info().is_none() {
                anyhow::bail!("Unable to retrieve new version info");
            }
            if !stage.start_update() {
                println!("Launcher is up to date (version {CURRENT_LAUNCHER_VERSION})");
                return Ok(ExitCode::SUCCESS);
            }
            drive(&mut stage, &mut presenter).await
        }
    };

    Ok(exit_code(&presenter, control))
}
