use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use eegstage::{load_xdf, XdfOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "xdf_inspect", about = "List the streams of an XDF recording")]
struct Args {
    /// Input .xdf file
    input: PathBuf,

    /// Print the inventory as JSON
    #[arg(long)]
    json: bool,

    /// Keep raw timestamps (no clock sync / dejitter)
    #[arg(long)]
    raw_timestamps: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let opts = if args.raw_timestamps {
        XdfOptions { synchronize_clocks: false, dejitter: false }
    } else {
        XdfOptions::default()
    };
    let rec = load_xdf(&args.input, &opts)?;
    let summaries = rec.summaries();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!(
        "{}  (XDF {})  {} stream(s)",
        args.input.display(),
        rec.version.as_deref().unwrap_or("?"),
        summaries.len()
    );
    for s in &summaries {
        println!(
            "[{}] {:<24} type={:<10} ch={:<3} srate={:<8} fmt={:<8} samples={:<8} dur={:.2}s",
            s.index, s.name, s.stream_type, s.channel_count, s.nominal_srate, s.channel_format, s.n_samples, s.duration
        );
        if !s.labels.is_empty() {
            println!("     labels: {}", s.labels.join(" "));
        }
    }
    Ok(())
}
