use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use imdloader::{duck, pipeline, Progress};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "imd",
    version,
    about = "Download and load English Indices of Deprivation data into DuckDB"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the release spreadsheet and load it into DuckDB
    Load {
        /// Path to the DuckDB database
        #[arg(long, default_value = pipeline::DEFAULT_DB_PATH)]
        db_path: PathBuf,
        /// Local cache path for the downloaded spreadsheet
        #[arg(long, default_value = pipeline::DEFAULT_CACHE_PATH)]
        cache_path: PathBuf,
        /// Download URL override (skips scraping the statistics page)
        #[arg(long)]
        url: Option<String>,
        /// Abort once more than this many sheets have failed
        #[arg(long)]
        error_limit: Option<usize>,
        /// Emit progress as JSON lines instead of formatted text
        #[arg(long)]
        json: bool,
    },
    /// List all tables in the database
    ListTables {
        /// Path to the DuckDB database
        #[arg(long, default_value = pipeline::DEFAULT_DB_PATH)]
        db_path: PathBuf,
    },
    /// Execute a SQL query against the database
    Query {
        /// SQL to execute
        sql: String,
        /// Path to the DuckDB database
        #[arg(long, default_value = pipeline::DEFAULT_DB_PATH)]
        db_path: PathBuf,
    },
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Load {
            db_path,
            cache_path,
            url,
            error_limit,
            json,
        } => cmd_load(
            pipeline::LoadOptions {
                db_path,
                cache_path,
                url,
                error_limit,
            },
            json,
        ),
        Command::ListTables { db_path } => cmd_list_tables(&db_path),
        Command::Query { sql, db_path } => cmd_query(&sql, &db_path),
    }
}

fn cmd_load(options: pipeline::LoadOptions, json: bool) -> Result<()> {
    let db_path = options.db_path.clone();
    let mut run = pipeline::load_with_progress(options);

    for entry in &mut run {
        if json {
            println!("{}", serde_json::to_string(&entry)?);
            continue;
        }
        match entry {
            Progress::Starting => {}
            Progress::Downloading { url } => println!("downloading {url}"),
            Progress::Downloaded { file, cached: true } => {
                println!("using cached {}", file.display())
            }
            Progress::Downloaded { file, cached: false } => {
                println!("saved {}", file.display())
            }
            Progress::Extracting { file, sheets } => {
                println!("extracting {} sheets from {}", sheets, file.display())
            }
            Progress::SheetExtracted { sheet, rows } => {
                println!("  {sheet} ({rows} rows)")
            }
            Progress::TableLoaded {
                schema,
                table,
                rows,
            } => println!("  loaded {schema}.{table} ({rows} rows)"),
            Progress::SheetFailed { sheet, detail, .. } => {
                eprintln!("  skipped {sheet}: {detail}")
            }
            Progress::Complete { total_tables } => {
                println!("loaded {} tables into {}", total_tables, db_path.display())
            }
            // The fatal error surfaces through into_failure below.
            Progress::Failed { .. } => {}
        }
    }

    if let Some(err) = run.into_failure() {
        return Err(err.into());
    }
    Ok(())
}

fn cmd_list_tables(db_path: &PathBuf) -> Result<()> {
    if !db_path.exists() {
        bail!(
            "database not found at {}; run 'imd load' first",
            db_path.display()
        );
    }
    let conn = duck::open_db(db_path)?;
    let tables = duck::list_tables(&conn)?;
    if tables.is_empty() {
        println!("no tables found");
        return Ok(());
    }
    println!("found {} tables:", tables.len());
    for table in tables {
        println!("  {table}");
    }
    Ok(())
}

fn cmd_query(sql: &str, db_path: &PathBuf) -> Result<()> {
    if !db_path.exists() {
        bail!(
            "database not found at {}; run 'imd load' first",
            db_path.display()
        );
    }
    let conn = duck::open_db(db_path)?;
    let (columns, rows) = duck::query_rows(&conn, sql).context("query failed")?;
    if !columns.is_empty() {
        println!("{}", columns.join("\t"));
    }
    for row in rows {
        println!("{}", row.join("\t"));
    }
    Ok(())
}
