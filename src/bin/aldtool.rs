use ald_rs::archive::format::letter_from_char;
use ald_rs::{Config, ListingRow, Session};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "aldtool",
    about = "Inspect, extract and patch ALD/DAT/AFA/ALK game archives",
    version,
    long_about = "Works on multi-volume lettered archives (GAMEGA.ALD, ACG.DAT, ...) as one logical archive, \
                  and on images embedded in SWF, AFF, FLAT and WIPF containers inside them."
)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "ALDTOOL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entries of an archive
    List {
        archive: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Also list the images inside container entries
        #[arg(long)]
        sub_resources: bool,
    },

    /// Write entries to a directory
    Export {
        archive: PathBuf,
        dir: PathBuf,

        /// Only entries matching `*.ext`
        #[arg(long)]
        filter: Option<String>,
    },

    /// Replace entries with same-named files from a directory and save
    Import {
        archive: PathBuf,
        dir: PathBuf,

        /// Save to this path instead of overwriting the archive
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Add files or directories as new entries and save
    Add {
        archive: PathBuf,

        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Volume letter to add to (A-Z)
        #[arg(short, long, default_value = "A")]
        letter: char,
    },

    /// Write a patch holding only changed entries
    Patch {
        archive: PathBuf,

        /// Take changes from this directory
        #[arg(long)]
        from: Option<PathBuf>,

        /// Patch file for single-volume archives
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::List {
            archive,
            json,
            sub_resources,
        } => list(&archive, config, json, sub_resources),
        Commands::Export { archive, dir, filter } => {
            let mut session = open(&archive, config)?;
            let count = session.export_all(&dir, filter.as_deref())?;
            println!("Exported {} files to {}", count, dir.display());
            Ok(())
        }
        Commands::Import { archive, dir, output } => {
            let mut session = open(&archive, config)?;
            let count = session.import_all(&dir)?;
            if count == 0 {
                println!("Nothing to import from {}", dir.display());
                return Ok(());
            }
            match output {
                Some(output) => session.save_as(&output)?,
                None => session.save()?,
            }
            println!("Imported {} files", count);
            Ok(())
        }
        Commands::Add { archive, files, letter } => add(&archive, config, &files, letter),
        Commands::Patch { archive, from, output } => {
            let mut session = open(&archive, config)?;
            if let Some(dir) = &from {
                session.import_all(dir)?;
            }
            let report = session.save_patch(output.as_deref())?;
            for path in &report.written {
                println!("Wrote {}", path.display());
            }
            if let Some((from, to)) = &report.renamed {
                println!("Moved {} to {}", from.display(), to.display());
            }
            Ok(())
        }
    }
}

fn open(archive: &Path, config: Config) -> Result<Session> {
    Session::open(archive, config).with_context(|| format!("opening {}", archive.display()))
}

fn list(archive: &Path, config: Config, json: bool, sub_resources: bool) -> Result<()> {
    let mut session = open(archive, config)?;
    let rows = session.listing(sub_resources)?;

    if json {
        println!("{}", ListingRow::to_json(&rows)?);
        return Ok(());
    }

    println!("{:<6} {:<3} {:>10}  Name", "Number", "Vol", "Size");
    for row in &rows {
        println!(
            "{:<6} {:<3} {:>10}  {}{}",
            row.number,
            row.volume,
            row.size,
            row.name,
            if row.modified { " *" } else { "" }
        );
        for child in &row.sub_resources {
            println!("{:<6} {:<3} {:>10}    {}", "", "", "", child);
        }
    }
    info!("{} entries", rows.len());
    Ok(())
}

fn add(archive: &Path, config: Config, inputs: &[PathBuf], letter: char) -> Result<()> {
    let Some(letter) = letter_from_char(letter) else {
        bail!("{} is not a volume letter", letter);
    };

    let mut session = if archive.exists() {
        open(archive, config)?
    } else {
        Session::create(archive, config)?
    };

    let mut count = 0;
    for input in inputs {
        if input.is_dir() {
            let files = session.collect_import_files(input)?;
            count += session.import_new_files(&files, Some(input), letter)?;
        } else {
            count += session.import_new_files(std::slice::from_ref(input), None, letter)?;
        }
    }
    session.save()?;
    println!("Added {} files to {}", count, archive.display());
    Ok(())
}
