use anyhow::Context;
use clap::Parser;
use e2audit_core::AuditOptions;
use e2audit_filesystems::Ext2Filesystem;
use log::{debug, error};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "e2audit")]
#[command(about = "Read-only consistency checker for ext2 images", long_about = None)]
struct Cli {
    /// Path to the ext2 image or block device
    image: PathBuf,

    /// Also print the directory tree
    #[arg(long)]
    tree: bool,

    /// Print the report (and tree) as JSON
    #[arg(long)]
    json: bool,

    /// JSON file with audit options
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("e2audit: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Audit the image and print the results; `Ok(true)` when it is consistent
fn run(cli: &Cli) -> anyhow::Result<bool> {
    let options = match &cli.config {
        Some(path) => AuditOptions::from_json_file(path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => AuditOptions::default(),
    };
    debug!("Audit options: {:?}", options);

    let mut fs = Ext2Filesystem::open(&cli.image, options)
        .with_context(|| format!("Cannot audit {}", cli.image.display()))?;
    let report = fs.report();
    let tree = if cli.tree { Some(fs.tree()) } else { None };

    if cli.json {
        let output = serde_json::json!({
            "geometry": fs.geometry,
            "report": report,
            "tree": tree,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        if let Some(tree) = &tree {
            println!("{}", tree);
        }
        if report.is_clean() {
            println!("No errors found ({} inodes checked)", fs.inodes.len());
        } else {
            println!("{}", report);
        }
    }

    Ok(report.is_clean())
}
