// CLI application
use clap::Parser;
use deobs_cli::commands::{
    exit_code_for, install_cancel_handler, load_config, process_file, run_batch, show_config,
    transform_file, Overrides, EXIT_FAILURE,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "deobs")]
#[command(about = "Batch de-obfuscator for obfuscator-generated JavaScript")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Default)]
struct EngineArgs {
    /// Fail a file when the primary pass fails instead of using the original text
    #[arg(long)]
    strict: bool,

    /// Skip the external de-obfuscator
    #[arg(long)]
    no_primary: bool,

    /// Format with the built-in line formatter only
    #[arg(long)]
    no_prettier: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// De-obfuscate every JavaScript file in a directory
    Run {
        /// Directory to process
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Number of files processed in parallel
        #[arg(short, long)]
        jobs: Option<usize>,

        #[command(flatten)]
        engines: EngineArgs,

        /// Write a JSON report of the batch
        #[arg(long)]
        report: Option<PathBuf>,

        /// Exit with status 1 when any file failed
        #[arg(long)]
        fail_on_error: bool,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// De-obfuscate a single file
    File {
        /// File to process
        path: PathBuf,

        #[command(flatten)]
        engines: EngineArgs,

        /// Exit with status 1 when the file failed
        #[arg(long)]
        fail_on_error: bool,
    },
    /// Print the transformed source of a file without writing anything
    Transform {
        /// File to transform
        path: PathBuf,

        /// Format with the built-in line formatter only
        #[arg(long)]
        no_prettier: bool,
    },
    /// Print the effective configuration
    Config {
        /// Also save it to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl EngineArgs {
    fn overrides(&self, jobs: Option<usize>) -> Overrides {
        Overrides {
            jobs,
            strict: self.strict,
            no_primary: self.no_primary,
            no_prettier: self.no_prettier,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            dir,
            jobs,
            engines,
            report,
            fail_on_error,
            no_progress,
        } => {
            let config = load_config(config_path, &engines.overrides(jobs))?;
            let cancel = Arc::new(AtomicBool::new(false));
            install_cancel_handler(Arc::clone(&cancel));
            let show_progress = !no_progress && !cli.quiet;
            let report = run_batch(&dir, &config, report.as_deref(), show_progress, cancel)?;
            if fail_on_error && report.has_failures() {
                return Ok(ExitCode::from(EXIT_FAILURE));
            }
        }
        Commands::File {
            path,
            engines,
            fail_on_error,
        } => {
            let config = load_config(config_path, &engines.overrides(None))?;
            let result = process_file(&path, &config)?;
            if fail_on_error && !result.is_success() {
                return Ok(ExitCode::from(EXIT_FAILURE));
            }
        }
        Commands::Transform { path, no_prettier } => {
            let overrides = Overrides {
                no_prettier,
                ..Overrides::default()
            };
            let config = load_config(config_path, &overrides)?;
            print!("{}", transform_file(&path, &config)?);
        }
        Commands::Config { output } => {
            let config = load_config(config_path, &Overrides::default())?;
            println!("{}", show_config(&config, output.as_deref())?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
