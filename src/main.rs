use clap::{ArgAction, Parser, Subcommand};
use filedb::archive::{self, Generator};
use filedb::config::Config;
use filedb::dump;
use filedb::filesystem::FileContents;
use filedb::index::ArchiveFileMap;
use filedb::logging;
use filedb::tag::TagCatalog;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "filedb", version, about = "Inspect and generate file.db archive trees")]
struct Cli {
    /// More diagnostics on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tag tree of a file.db
    Dump {
        input: PathBuf,
    },
    /// Merge file.db sources (or a directory of them) into a new file.db
    Gen {
        #[arg(short, long)]
        output: PathBuf,
        /// Sort directory entries by name for reproducible output
        #[arg(long)]
        sort: bool,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// List the files a file.db describes
    List {
        input: PathBuf,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct ListRow<'a> {
    path:              &'a str,
    uncompressed_size: u64,
    compressed_size:   u64,
    modification_time: u64,
    flags:             u32,
    /// Archive locator, or `None` for resident files.
    archive:           Option<&'a str>,
    position:          Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli    = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None       => Config::default(),
    };
    logging::init(cli.verbose, config.log_level.as_deref())?;

    let catalog = TagCatalog::standard();

    match cli.command {

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input } => {
            let tree   = archive::read_tree(&input, &catalog)?;
            let stdout = std::io::stdout();
            dump::dump(&tree, 0, &mut stdout.lock())?;
        }

        // ── Gen ──────────────────────────────────────────────────────────────
        Commands::Gen { output, sort, inputs } => {
            let mut options = config.gen.clone();
            options.sort_entries |= sort;
            let generated = Generator::new(&catalog, options).generate_to(&inputs, &output)?;
            for path in &generated.container_paths {
                println!("  merged  {}", path.display());
            }
            println!("Created: {} ({} files, {} archives)",
                     output.display(),
                     generated.file_system.files().len(),
                     generated.archives.len());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let mut archives = ArchiveFileMap::new();
            let fs    = archive::read_file_system(&input, &catalog, &mut archives)?;
            let files = fs.files();

            let mut rows = Vec::with_capacity(files.len());
            for (path, file) in &files {
                let (archive, position) = match &file.contents {
                    FileContents::Archived { archive, position } => {
                        (Some(archives.resolve(*archive)?), Some(*position))
                    }
                    FileContents::Resident(_) => (None, None),
                };
                rows.push(ListRow {
                    path,
                    uncompressed_size: file.uncompressed_size,
                    compressed_size:   file.compressed_size,
                    modification_time: file.modification_time,
                    flags:             file.flags,
                    archive,
                    position,
                });
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("file.db: {}", input.display());
                println!("{:<40} {:>12} {:>12}  {:<25}  Source",
                         "Path", "Size", "Compressed", "Modified");
                for row in &rows {
                    println!("{:<40} {:>12} {:>12}  {:<25}  {}",
                             row.path, row.uncompressed_size, row.compressed_size,
                             format_time(row.modification_time),
                             row.archive.unwrap_or("resident"));
                }
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn format_time(unix_seconds: u64) -> String {
    i64::try_from(unix_seconds)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| unix_seconds.to_string())
}
