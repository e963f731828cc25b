//! readsimple CLI

use anyhow::{Context, Result};
use clap::Parser;
use readsimple_root::RootFile;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "readsimple")]
#[command(about = "Print the first entry of a ROOT TTree and the sum of its float columns")]
#[command(version)]
struct Cli {
    /// ROOT file to read
    #[arg(default_value = "/home/pivarski/storage/data/TrackResonanceNtuple_compressed.root")]
    path: PathBuf,

    /// Name (or slash-separated path) of the tree
    #[arg(long, default_value = "twoMuon")]
    tree: String,

    /// Comma-separated float32 branches to bind
    #[arg(long, value_delimiter = ',', default_value = "mass_mumu,px,py,pz")]
    branches: Vec<String>,

    /// Process every entry instead of only the first one
    #[arg(long)]
    all: bool,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let stdout = std::io::stdout();
    cmd_readsimple(&cli, &mut stdout.lock())
}

fn cmd_readsimple(cli: &Cli, out: &mut impl Write) -> Result<()> {
    tracing::info!(path = %cli.path.display(), "opening file");
    let file = RootFile::open(&cli.path)
        .with_context(|| format!("failed to open {}", cli.path.display()))?;

    let tree = file
        .get(&cli.tree)
        .and_then(|obj| obj.into_tree())
        .with_context(|| format!("failed to read tree '{}'", cli.tree))?;
    writeln!(out, "entries= {}", tree.entries)?;

    let names: Vec<&str> = cli.branches.iter().map(String::as_str).collect();
    let mut sc = file
        .scanner(&tree, &names)
        .with_context(|| format!("failed to bind branches {:?}", names))?;
    sc.require::<f32>().context("bound branches must be float32")?;
    tracing::info!(entries = tree.entries, branches = ?sc.names(), "scanner ready");

    let mut total = 0f32;
    while sc.next() {
        sc.scan().with_context(|| format!("failed to scan entry {}", sc.entry()))?;

        let mut line = sc.entry().to_string();
        let mut row = 0f32;
        for i in 0..names.len() {
            let v: f32 = sc.get(i)?;
            line.push(' ');
            line.push_str(&format_float(v));
            row += v;
        }
        writeln!(out, "{}", line)?;
        total += row;

        if !cli.all {
            break;
        }
    }
    tracing::debug!(entry = sc.entry(), "scan finished");

    writeln!(out, "{}", format_float(total))?;
    out.flush()?;
    Ok(())
}

/// Shortest round-trip form of `v`, switching to exponent notation
/// (`1e-05`, `1.234567e+06`) when the decimal exponent is below -4 or at
/// least 6.
fn format_float(v: f32) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    let sci = format!("{:e}", v);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return v.to_string();
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return v.to_string();
    };
    if (-4..6).contains(&exp) {
        return v.to_string();
    }
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", mantissa, sign, exp.abs())
}
