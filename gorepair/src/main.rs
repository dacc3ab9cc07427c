//! `gorepair` CLI.
//!
//! `run` drives repair sessions for one file of a Go module. `patch` merges a
//! single fragment into a file offline. `init-config` writes the default
//! `.gorepair.toml`.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;

use gorepair::controller::{JobOutcome, Repairer};
use gorepair::core::merge::merge;
use gorepair::core::parser::parse;
use gorepair::core::render::render;
use gorepair::exit_codes;
use gorepair::io::config::{CONFIG_FILE_NAME, init_config, load_config};
use gorepair::io::files::{OutputMode, emit};
use gorepair::io::oracle::OpenAiOracle;
use gorepair::io::toolchain::{GoToolchain, Gofmt};
use gorepair::logging;
use gorepair::session::{
    LineRequests, RequestSource, SessionConfig, SessionStop, SingleRequest, new_run_id,
    run_sessions,
};

#[derive(Parser)]
#[command(
    name = "gorepair",
    version,
    about = "Patch Go files from change requests and repair them until they build"
)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run repair sessions for one file, reading requests from stdin unless `--request` is given.
    Run(RunArgs),
    /// Merge a Go fragment into a file.
    Patch(PatchArgs),
    /// Write the default `.gorepair.toml` into a module.
    InitConfig(InitConfigArgs),
}

#[derive(Args)]
struct InitConfigArgs {
    /// Root of the Go module.
    #[arg(default_value = ".")]
    module_dir: PathBuf,
    /// Replace an existing config file.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Root of the Go module.
    module_dir: PathBuf,
    /// File to work on, relative to the module root.
    file: String,
    /// Single change request.
    #[arg(long)]
    request: Option<String>,
    /// Stop after this many requests.
    #[arg(long)]
    max_sessions: Option<u32>,
    /// Config file (default: `<module-dir>/.gorepair.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Skip asking the oracle whether each request is about Go code.
    #[arg(long)]
    no_verify: bool,
}

#[derive(Args)]
struct PatchArgs {
    /// File to patch. A missing file counts as empty.
    base: PathBuf,
    /// Go fragment with the declarations to add or replace.
    patch: PathBuf,
    #[command(flatten)]
    output: OutputArgs,
    /// Split imports into std, third-party and local groups.
    #[arg(long)]
    group_imports: bool,
    /// Import path prefix treated as local. Implies `--group-imports`.
    #[arg(long = "local", value_name = "PREFIX")]
    local: Vec<String>,
}

#[derive(Args)]
#[group(multiple = false)]
struct OutputArgs {
    /// Overwrite the base file.
    #[arg(long)]
    write: bool,
    /// Print the merged file (default).
    #[arg(long)]
    stdout: bool,
    /// Print a unified diff.
    #[arg(long)]
    diff: bool,
    /// Print the base file name if it would change.
    #[arg(long)]
    list: bool,
}

impl OutputArgs {
    fn mode(&self) -> OutputMode {
        if self.write {
            OutputMode::Write
        } else if self.diff {
            OutputMode::Diff
        } else if self.list {
            OutputMode::List
        } else {
            OutputMode::Stdout
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::ERROR
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            process::exit(code);
        }
    };
    if let Err(err) = dotenvy::dotenv()
        && !err.not_found()
    {
        eprintln!("warning: {err}");
    }
    logging::init(cli.verbose);

    let result = match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Patch(args) => cmd_patch(args),
        Command::InitConfig(args) => cmd_init_config(args),
    };
    match result {
        Ok(()) => process::exit(exit_codes::OK),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::ERROR);
        }
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let config_path = args
        .config
        .unwrap_or_else(|| args.module_dir.join(CONFIG_FILE_NAME));
    let cfg = load_config(&config_path)?;
    let oracle = OpenAiOracle::from_config(&cfg.oracle)?;
    let toolchain = GoToolchain::new(cfg.toolchain.clone());
    let formatter = Gofmt::new(cfg.toolchain.clone());
    let repairer = Repairer::new(&args.module_dir, &cfg, &oracle, &toolchain, &formatter)?;

    let session_cfg = SessionConfig {
        file: args.file,
        max_sessions: args.max_sessions,
        verify: cfg.verify_requests && !args.no_verify,
    };
    let mut source: Box<dyn RequestSource> = match args.request {
        Some(request) => Box::new(SingleRequest::new(request)),
        None => {
            eprintln!("Enter a change request per line (\"exit\" to quit).");
            Box::new(LineRequests::new(io::stdin().lock()))
        }
    };

    let outcome = run_sessions(
        &repairer,
        source.as_mut(),
        &session_cfg,
        &new_run_id(),
        print_job,
    )?;
    match outcome.stop {
        SessionStop::SourceExhausted => debug!(sessions = outcome.sessions, "no more requests"),
        SessionStop::MaxSessions { limit } => eprintln!("stopped after {limit} sessions"),
    }
    if outcome.rejected > 0 {
        eprintln!("{} request(s) rejected as not about Go code", outcome.rejected);
    }
    Ok(())
}

fn print_job(job: &JobOutcome) {
    if job.steps.is_empty() {
        println!("{}: skipped (not a Go file)", job.file);
        return;
    }
    for step in &job.steps {
        let status = if step.passed { "passed" } else { "exhausted" };
        println!("{}: {} {status} after {} attempt(s)", job.file, step.step, step.attempts);
    }
    for name in &job.unused {
        println!("{}: func {name} is unused", job.file);
    }
}

fn cmd_init_config(args: InitConfigArgs) -> Result<()> {
    let path = init_config(&args.module_dir, args.force)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_patch(args: PatchArgs) -> Result<()> {
    let cfg = load_config(Path::new(CONFIG_FILE_NAME))?;
    let mut style = cfg.imports.style();
    style.group |= args.group_imports || !args.local.is_empty();
    style.local_prefixes.extend(args.local);

    let before = match fs::read_to_string(&args.base) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err).with_context(|| format!("read {}", args.base.display())),
    };
    let patch_text = fs::read_to_string(&args.patch)
        .with_context(|| format!("read {}", args.patch.display()))?;

    let base = parse(&before).with_context(|| format!("parse {}", args.base.display()))?;
    let patch = parse(&patch_text).with_context(|| format!("parse {}", args.patch.display()))?;
    let merged = merge(&base, &patch);
    if merged.unit.package.is_none() {
        bail!(
            "no package clause in {} or {}",
            args.base.display(),
            args.patch.display()
        );
    }
    for signature in &merged.report.created {
        debug!(%signature, "created");
    }
    for signature in &merged.report.updated {
        debug!(%signature, "updated");
    }

    let after = render(&merged.unit, &style, &Gofmt::new(cfg.toolchain.clone()))
        .with_context(|| format!("format {}", args.base.display()))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    emit(args.output.mode(), &args.base, &before, &after, &mut out)?;
    out.flush().context("flush stdout")?;
    Ok(())
}
