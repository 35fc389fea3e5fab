use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use eegstage::{ConsolePrompt, Pipeline, PipelineConfig, Stage, StagePaths};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eegstage", about = "Staged EEG preprocessing: XDF → cleaned epochs → band power / TFR")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode the XDF file, prune, notch and band-pass
    Load(InputArgs),
    /// Mark bad channels and interpolate them
    Interpolate(CommonArgs),
    /// Restore the reference channel and re-reference
    Rereference(CommonArgs),
    /// Fit the decomposition and remove artifact components
    Ica(CommonArgs),
    /// Cut epochs around the condition events
    Epochs(CommonArgs),
    /// Welch band power per epoch and condition
    Bandpower(CommonArgs),
    /// Morlet time-frequency power per condition
    Tfr(CommonArgs),
    /// Every stage in order
    Run(InputArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// JSON pipeline configuration (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Subject / session id used in output file names
    #[arg(long)]
    subject: Option<String>,

    /// Directory for stage files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Ask on the console for stream choice, bad channels and components
    #[arg(long)]
    interactive: bool,
}

#[derive(Args)]
struct InputArgs {
    /// Input .xdf recording
    input: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

fn load_config(args: &CommonArgs) -> Result<PipelineConfig> {
    let mut cfg = match &args.config {
        Some(p) => PipelineConfig::from_json_file(p)?,
        None => PipelineConfig::default(),
    };
    if args.subject.is_some() {
        cfg.subject_id = args.subject.clone();
    }
    if args.output_dir.is_some() {
        cfg.output_dir = args.output_dir.clone();
    }
    cfg.interactive |= args.interactive;
    cfg.validate()?;
    Ok(cfg)
}

fn run(cli: Cli) -> Result<()> {
    let (stage, input, common) = match cli.command {
        Command::Load(a) => (Some(Stage::Load), Some(a.input), a.common),
        Command::Run(a) => (None, Some(a.input), a.common),
        Command::Interpolate(c) => (Some(Stage::Interpolate), None, c),
        Command::Rereference(c) => (Some(Stage::Rereference), None, c),
        Command::Ica(c) => (Some(Stage::Ica), None, c),
        Command::Epochs(c) => (Some(Stage::Epochs), None, c),
        Command::Bandpower(c) => (Some(Stage::Bandpower), None, c),
        Command::Tfr(c) => (Some(Stage::Tfr), None, c),
    };
    let cfg = load_config(&common)?;

    let paths = match &input {
        Some(input) => StagePaths::for_input(input, &cfg),
        None => {
            let id = cfg.subject_id.clone().ok_or_else(|| {
                eegstage::PipelineError::InvalidConfig(
                    "--subject (or subject_id in the config) is required without an input file".into(),
                )
            })?;
            StagePaths::new(cfg.output_dir.clone().unwrap_or_else(|| PathBuf::from(".")), id)
        }
    };

    let interactive = cfg.interactive;
    let mut console = ConsolePrompt;
    let mut pipeline = Pipeline::new(cfg, paths);
    if interactive {
        pipeline = pipeline.with_prompt(&mut console);
    }

    let written = match (stage, input.as_deref()) {
        (Some(stage), input) => pipeline.run_stage(stage, input)?,
        (None, Some(input)) => pipeline.run_all(input)?,
        (None, None) => vec![],
    };
    for p in written {
        println!("Written → {}", p.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}
