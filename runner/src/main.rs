use clap::{Args, Parser, Subcommand};
use simstudy_runner::{
    config::{ConfigErrors, RunConfig},
    executors::{ExecutorError, ExecutorKind, Executors, Interrupt},
    inspect::{cat_files, extract_files, InspectError, DEFAULT_EXTRACT_GLOB, DEFAULT_EXTRACT_TARGET},
    report::StatusReport,
    store::{ResetOptions, ResetScope},
    templates::{copy_template, TemplateError, DEFAULT_TEMPLATE_FOLDER},
    Study, StudyError,
};
use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::exit,
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_unwrap::ResultExt;

#[derive(Parser, Debug)]
#[command(name = "simstudy", author, version, about = "Manage parameter sweeps of simulations")]
struct Cli {
    /// log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a starter study into a new folder
    CopyTemplate {
        #[arg(default_value = DEFAULT_TEMPLATE_FOLDER)]
        name: String,
        #[arg(long, default_value = ".")]
        destination: PathBuf,
    },
    /// Create the study folder from a declaration file
    Create { declaration: PathBuf },
    /// Run every not started case on this machine
    RunLocal(RunArgs),
    /// Submit every not started case to HTCondor
    RunHtcondor(RunArgs),
    /// Submit every not started case to Slurm
    RunSlurm(RunArgs),
    /// Print how many cases are in each status
    Status {
        root: PathBuf,
        /// skip folding in the markers written by remote jobs
        #[arg(long)]
        no_remote: bool,
    },
    /// Bring cases back to not started
    Reset {
        root: PathBuf,
        /// reset finished cases too
        #[arg(long)]
        all: bool,
        /// re-clone the case folders from the frozen template
        #[arg(long)]
        restore_original: bool,
        #[arg(long)]
        clear_out: bool,
        #[arg(long)]
        clear_err: bool,
        #[arg(long)]
        clear_log: bool,
    },
    /// Delete the whole study folder
    Nuke {
        root: PathBuf,
        #[arg(long)]
        yes: bool,
    },
    /// Print the captured stdout of the cases
    CatOut(CatArgs),
    /// Print the captured stderr of the cases
    CatErr(CatArgs),
    /// Print the executor logs
    CatLog(CatArgs),
    /// Collect output files of the finished cases into one folder
    ExtractFile {
        root: PathBuf,
        #[arg(long, default_value = DEFAULT_EXTRACT_GLOB)]
        glob: String,
        /// relative to the study root
        #[arg(long, default_value = DEFAULT_EXTRACT_TARGET)]
        target: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    root: PathBuf,
    /// run configuration, without it the local executor uses its defaults
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CatArgs {
    root: PathBuf,
    /// only print the idx-th file, sorted by name
    #[arg(long)]
    idx: Option<usize>,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Study(#[from] StudyError),
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Inspect(#[from] InspectError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Failed to install the Ctrl-C handler: {0}")]
    Interrupt(#[from] ctrlc::Error),
    #[error("Failed to read the confirmation: {0}")]
    Confirmation(#[from] io::Error),
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli.command) {
        error!("{e}");
        exit(1);
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::CopyTemplate { name, destination } => {
            let folder = copy_template(&destination, &name)?;
            info!("Starter study written to {}", folder.display());
        }
        Command::Create { declaration } => {
            let study = Study::load(&declaration)?;
            let state = study.create()?;

            println!("{}", StatusReport::new(state));
        }
        Command::RunLocal(args) => execute(ExecutorKind::Local, args)?,
        Command::RunHtcondor(args) => execute(ExecutorKind::Htcondor, args)?,
        Command::RunSlurm(args) => execute(ExecutorKind::Slurm, args)?,
        Command::Status { root, no_remote } => {
            let report = Study::open(&root)?.status(!no_remote)?;

            println!("{report}");
        }
        Command::Reset {
            root,
            all,
            restore_original,
            clear_out,
            clear_err,
            clear_log,
        } => {
            let options = ResetOptions {
                scope: if all {
                    ResetScope::All
                } else {
                    ResetScope::Unfinished
                },
                restore_original,
                clear_out,
                clear_err,
                clear_log,
            };
            let reset = Study::open(&root)?.reset(options)?;

            info!("{} case(s) reset to not started", reset.len());
        }
        Command::Nuke { root, yes } => {
            let study = Study::open(&root)?;

            if yes || confirm(study.layout().root())? {
                study.teardown()?;
                info!("Removed {}", root.display());
            } else {
                warn!("Aborted, nothing was removed");
            }
        }
        Command::CatOut(args) => cat(args, |study| study.layout().out_folder())?,
        Command::CatErr(args) => cat(args, |study| study.layout().err_folder())?,
        Command::CatLog(args) => cat(args, |study| study.layout().log_folder())?,
        Command::ExtractFile { root, glob, target } => {
            let study = Study::open(&root)?;
            let target = study.layout().root().join(target);
            let extracted = extract_files(&study, &glob, &target)?;

            info!("Extracted {} file(s) into {}", extracted.len(), target.display());
        }
    }

    Ok(())
}

fn execute(kind: ExecutorKind, args: RunArgs) -> Result<(), CliError> {
    let study = Study::open(&args.root)?;
    let config = match args.config {
        Some(path) => RunConfig::load(&path)?,
        None => RunConfig::default(),
    };

    let interrupt = Interrupt::new();
    if kind == ExecutorKind::Local {
        interrupt.install_ctrlc()?;
    }

    let mut executor = Executors::load(kind, config, &study, interrupt)?;
    let report = executor.execute()?;

    info!("{report}");
    println!("{}", study.status(false)?);

    Ok(())
}

fn cat(args: CatArgs, folder: impl FnOnce(&Study) -> PathBuf) -> Result<(), CliError> {
    let study = Study::open(&args.root)?;
    let stdout = io::stdout();
    let mut stdout = stdout.lock();

    for (path, content) in cat_files(&folder(&study), args.idx)? {
        writeln!(stdout, "==> {} <==", path.display()).unwrap_or_log();
        writeln!(stdout, "{content}").unwrap_or_log();
    }

    Ok(())
}

fn confirm(root: &Path) -> Result<bool, io::Error> {
    print!("Delete {} and everything inside it? [y/N] ", root.display());
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
