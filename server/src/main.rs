//! WordServe binary — thin CLI shell over the [`wordserve_server`] library.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use wordserve_core::Completer;
use wordserve_server::loader::{ChunkLoader, LoaderError};
use wordserve_server::materialize::MaterializeOptions;
use wordserve_server::{Dispatcher, Settings};

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Frequency-ranked prefix completion server for editor integrations.
#[derive(Parser)]
#[command(name = "wordserve", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding dict_NNNN.bin chunk files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Configuration file (default: <data-dir>/wordserve.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the interactive REPL instead of the stdio protocol
    #[arg(long)]
    interactive: bool,

    /// Verbose logging (debug level)
    #[arg(long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();

    // Structured logging on stderr — stdout belongs to the wire protocol.
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("wordserve_server={level}").parse().unwrap())
                .add_directive(format!("wordserve_core={level}").parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Some(Commands::Completions { shell }) = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "wordserve", &mut std::io::stdout());
        return;
    }

    // ---------------------------------------------------------------------------
    // Configuration and data directory
    // ---------------------------------------------------------------------------

    if let Err(e) = std::fs::create_dir_all(&cli.data_dir) {
        error!(dir = %cli.data_dir.display(), error = %e, "Could not create data directory");
        std::process::exit(1);
    }

    let config_path = cli.config.unwrap_or_else(|| cli.data_dir.join("wordserve.toml"));
    let settings = match Settings::load_or_init(&config_path) {
        Ok(s) => s,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "Could not parse configuration");
            std::process::exit(1);
        }
    };

    // ---------------------------------------------------------------------------
    // Dictionary startup: make the initial chunk set resident
    // ---------------------------------------------------------------------------

    let loader = ChunkLoader::new(
        cli.data_dir.clone(),
        settings.dict.chunk_size,
        settings.dict.max_word_count_validation,
        MaterializeOptions::default(),
    );

    let target = settings.initial_chunk_target();
    match loader.set_resident_chunk_count(target) {
        Ok(()) => {}
        Err(LoaderError::InsufficientChunks { available, .. }) if available > 0 => {
            warn!(wanted = target, available, "Fewer chunks than requested, loading all of them");
            if let Err(e) = loader.set_resident_chunk_count(available) {
                error!(error = %e, "Initial chunk load failed");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!(dir = %cli.data_dir.display(), error = %e, "Initial chunk load failed");
            std::process::exit(1);
        }
    }

    let stats = loader.stats();
    info!(
        words = stats.total_words,
        chunks = stats.loaded_chunks,
        available = stats.available_chunks,
        "Dictionary ready"
    );

    loader.spawn_worker();

    // Interrupt or termination signal: stop the background loader and exit
    // cleanly. In-flight work has already produced its response by the time
    // the handler runs the shutdown.
    {
        let loader = Arc::clone(&loader);
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Received interrupt, shutting down...");
            loader.shutdown();
            std::process::exit(0);
        }) {
            warn!(error = %e, "Could not install signal handler");
        }
    }

    let mut completer = Completer::new(settings.engine_options());
    if cli.interactive {
        wordserve_server::interactive::run(&loader, &mut completer);
    } else {
        let mut dispatcher = Dispatcher::new(Arc::clone(&loader), completer, config_path);
        dispatcher.run();
    }

    loader.shutdown();
}
