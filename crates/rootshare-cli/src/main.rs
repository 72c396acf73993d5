mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::CliError;
use rootshare_core::{install_signal_handler, Engine, ErrorKind};
use rootshare_schema::Settings;
use rootshare_store::StoreLayout;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "rootshare",
    version,
    about = "Containers sharing root filesystems, with package dependency bookkeeping"
)]
struct Cli {
    /// Settings file (default: ~/.config/rootshare/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the state database, intent journal and root locks.
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Container engine: docker, podman or mock.
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a container, optionally on a shared root.
    Create {
        name: String,
        /// Distribution preset or [distributions.<name>] table from the settings.
        #[arg(short, long)]
        distro: String,
        /// Shared root to mount; omit for a private root.
        #[arg(long)]
        root: Option<String>,
        /// Opaque configuration blob stored with the container.
        #[arg(long, default_value = "{}")]
        configuration: String,
    },
    /// Destroy a container and release what only it was using.
    Destroy {
        name: String,
        /// Also drop the bookkeeping when the engine no longer has the container.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Install a package into a container and record its dependencies.
    Install {
        container: String,
        package: String,
        /// Record the package as an optional dependency of this parent package.
        #[arg(long)]
        optional_of: Option<String>,
    },
    /// Uninstall a package and remove dependencies nothing else needs.
    Uninstall { container: String, package: String },
    /// List containers.
    List {
        /// Include destroyed placeholders still pinning a shared root.
        #[arg(long, default_value_t = false)]
        all: bool,
        /// Only containers on this shared root.
        #[arg(long)]
        root: Option<String>,
        /// Only containers of this distribution.
        #[arg(long)]
        distro: Option<String>,
    },
    /// List explicitly installed packages.
    Packages {
        #[arg(long)]
        container: Option<String>,
        #[arg(long)]
        root: Option<String>,
        /// Regular expression searched for in the package name.
        #[arg(long)]
        name: Option<String>,
        /// SQL LIKE pattern for the package type, e.g. 'optional(%)'.
        #[arg(long = "type")]
        package_type: Option<String>,
    },
    /// Show the bookkeeping of a container or placeholder.
    Inspect { name: String },
    /// Print a container's configuration blob, or replace it.
    Configure {
        name: String,
        /// New configuration blob.
        #[arg(long)]
        set: Option<String>,
    },
    /// Repair bookkeeping left behind by interrupted operations.
    Reconcile {
        /// Only report what would be repaired.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Verify the cross-table invariants of the state database.
    VerifyStore,
    /// Bring the state database to the current schema version.
    Migrate,
    /// Run diagnostic checks on the system and store.
    Doctor,
    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ROOTSHARE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let json_output = cli.json;
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            if json_output {
                let payload = serde_json::json!({
                    "error": {
                        "kind": err.kind,
                        "message": err.message,
                    }
                });
                eprintln!("{payload}");
            } else {
                eprintln!("error: {}", err.message);
            }
            ExitCode::from(err.code)
        }
    }
}

fn run(cli: Cli) -> Result<u8, CliError> {
    match &cli.command {
        Commands::Completions { shell } => return commands::completions::run::<Cli>(*shell),
        Commands::ManPages { dir } => return commands::man_pages::run::<Cli>(dir),
        _ => {}
    }

    let settings = load_settings(cli.config.as_deref(), cli.data_dir, cli.engine)?;
    let layout = StoreLayout::new(expand_tilde(&settings.data_dir));
    let json_output = cli.json;
    tracing::debug!(
        "data dir {}, engine {}",
        layout.root().display(),
        settings.engine
    );

    match cli.command {
        Commands::Migrate => return commands::migrate::run(&layout, json_output),
        Commands::Doctor => return commands::doctor::run(&settings, &layout, json_output),
        _ => {}
    }

    let needs_runtime = matches!(
        cli.command,
        Commands::Create { .. }
            | Commands::Destroy { .. }
            | Commands::Install { .. }
            | Commands::Uninstall { .. }
            | Commands::Reconcile { .. }
    );
    if needs_runtime && std::env::var("ROOTSHARE_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = rootshare_runtime::check_engine_prereqs(&settings.engine);
        if !missing.is_empty() {
            return Err(CliError::new(
                ErrorKind::ExternalToolFailure,
                rootshare_runtime::format_missing(&missing),
            ));
        }
    }

    let engine = Engine::new(layout, settings)?;

    match cli.command {
        Commands::Create {
            name,
            distro,
            root,
            configuration,
        } => commands::create::run(
            &engine,
            &name,
            &distro,
            root.as_deref(),
            &configuration,
            json_output,
        ),
        Commands::Destroy { name, force } => {
            commands::destroy::run(&engine, &name, force, json_output)
        }
        Commands::Install {
            container,
            package,
            optional_of,
        } => commands::install::run(
            &engine,
            &container,
            &package,
            optional_of.as_deref(),
            json_output,
        ),
        Commands::Uninstall { container, package } => {
            commands::uninstall::run(&engine, &container, &package, json_output)
        }
        Commands::List { all, root, distro } => {
            commands::list::run(&engine, all, root, distro, json_output)
        }
        Commands::Packages {
            container,
            root,
            name,
            package_type,
        } => commands::packages::run(
            &engine,
            &rootshare_store::PackageFilter {
                container,
                shared_root: root,
                name,
                package_type,
            },
            json_output,
        ),
        Commands::Inspect { name } => commands::inspect::run(&engine, &name, json_output),
        Commands::Configure { name, set } => {
            commands::configure::run(&engine, &name, set.as_deref(), json_output)
        }
        Commands::Reconcile { dry_run } => commands::reconcile::run(&engine, dry_run, json_output),
        Commands::VerifyStore => commands::verify_store::run(&engine, json_output),
        Commands::Migrate
        | Commands::Doctor
        | Commands::Completions { .. }
        | Commands::ManPages { .. } => Ok(commands::EXIT_SUCCESS),
    }
}

fn load_settings(
    config: Option<&Path>,
    data_dir: Option<String>,
    engine: Option<String>,
) -> Result<Settings, CliError> {
    let mut settings = match config {
        Some(path) => Settings::load(path),
        None => Settings::load_default(),
    }
    .map_err(|e| CliError::new(ErrorKind::InvalidRequest, e.to_string()))?;
    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }
    if let Some(engine) = engine {
        settings.engine = engine;
    }
    Ok(settings)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
