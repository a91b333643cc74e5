//! atomgate-pack - Build a reproducible snapshot of a legacy application tree
//!
//! Usage:
//!   atomgate-pack --src <dir> --dst <file.tar.gz> [--exclude <dir> ...]
//!
//! The snapshot is what `atomgate` materializes into its application root.

use anyhow::{Context, Result};
use atomgate::archive::{self, Snapshot, DEFAULT_EXCLUDES};
use std::env;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Debug, Default)]
struct PackOptions {
    src: Option<PathBuf>,
    dst: Option<PathBuf>,
    excludes: Vec<String>,
}

enum Command {
    Help,
    Version,
    Pack(PackOptions),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    match parse_args(&args)? {
        Command::Help => print_help(),
        Command::Version => print_version(),
        Command::Pack(opts) => handle_pack(opts)?,
    }

    Ok(())
}

fn parse_args(args: &[String]) -> Result<Command> {
    if args.is_empty() {
        return Ok(Command::Help);
    }

    let mut opts = PackOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "help" | "--help" | "-h" => return Ok(Command::Help),
            "version" | "--version" | "-v" => return Ok(Command::Version),
            "--src" | "-s" => {
                let value = iter.next().context("--src requires a directory")?;
                opts.src = Some(PathBuf::from(value));
            }
            "--dst" | "-o" => {
                let value = iter.next().context("--dst requires a file path")?;
                opts.dst = Some(PathBuf::from(value));
            }
            "--exclude" | "-x" => {
                let value = iter.next().context("--exclude requires a directory")?;
                opts.excludes.push(value.trim_matches('/').to_string());
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }

    Ok(Command::Pack(opts))
}

fn handle_pack(opts: PackOptions) -> Result<()> {
    let src = opts.src.context("--src is required")?;
    let dst = opts.dst.context("--dst is required")?;

    let mut excludes: Vec<&str> = DEFAULT_EXCLUDES.to_vec();
    excludes.extend(opts.excludes.iter().map(String::as_str));

    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    // Written next to the destination, renamed once complete
    let mut partial = dst.clone().into_os_string();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let file = File::create(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let writer = archive::pack_dir(&src, BufWriter::new(file), &excludes)
        .with_context(|| format!("Failed to pack {}", src.display()))?;
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush {}: {}", partial.display(), e.error()))?
        .sync_all()?;
    fs::rename(&partial, &dst)
        .with_context(|| format!("Failed to move snapshot to {}", dst.display()))?;

    let snapshot = Snapshot::load(&dst)?;
    let files = archive::list_files(&snapshot)?;
    println!("Packed {} -> {}", src.display(), dst.display());
    println!("  files:    {}", files.len());
    println!("  excluded: {}", excludes.join(", "));
    println!("  sha256:   {}", snapshot.digest());

    Ok(())
}

fn print_help() {
    println!(
        r#"
atomgate-pack - Build a snapshot of a legacy application tree

USAGE:
    atomgate-pack --src <dir> --dst <file.tar.gz> [options]

OPTIONS:
    -s, --src <dir>          Application tree to pack
    -o, --dst <file>         Snapshot to write (gzip tar)
    -x, --exclude <dir>      Extra directory to leave out (repeatable)
    -h, --help               Show this help
    -v, --version            Show version

Always excluded: {}
"#,
        DEFAULT_EXCLUDES.join(", ")
    );
}

fn print_version() {
    println!("atomgate-pack {}", env!("CARGO_PKG_VERSION"));
}
