//! tables: load CSV/JSON from a file or pipe into a SQL database, guessing the schema.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use tables_load::checkpoint::FileCheckpointStore;
use tables_load::config::{DB_URI_ENV, LoadOptions};
use tables_load::execution::{
    CompositeObserver, LoadObserver, LoadPipeline, LoadSeverity, StdErrObserver, TracingObserver,
};
use tables_load::ingestion::InputFormat;
use tables_load::storage::SqliteStorage;
use tables_load::{LoadError, LoadResult};

/// Import CSV/JSON into a database table, guessing column types from the data.
#[derive(Parser, Debug)]
#[command(name = "tables")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file. Reads standard input when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Database URI (only sqlite:// is supported).
    #[arg(short, long, env = DB_URI_ENV)]
    db: Option<String>,

    /// JSON file with load options; flags given here override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input format: csv, tsv, json, or ndjson. Detected from the extension by default.
    #[arg(short, long)]
    format: Option<InputFormat>,

    /// `false` for headerless input, or a comma-separated list of column names.
    #[arg(long)]
    csv_headers: Option<String>,

    #[arg(long)]
    csv_delimiter: Option<char>,

    #[arg(long)]
    csv_quote: Option<char>,

    /// Target table name. Defaults to the input file name.
    #[arg(short, long)]
    table_name: Option<String>,

    /// Comma-separated key columns. Without one, an auto-increment key is added.
    #[arg(short, long, value_delimiter = ',')]
    key: Vec<String>,

    /// Columns to index: `/regex/` or a comma-separated list of names.
    #[arg(long)]
    index_fields: Option<String>,

    /// Date format (chrono strftime); may be repeated.
    #[arg(long)]
    date_format: Vec<String>,

    /// Datetime format (chrono strftime); may be repeated.
    #[arg(long)]
    datetime_format: Vec<String>,

    /// Rows per batch write.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Rows sampled to guess the model.
    #[arg(long)]
    guess_size: Option<usize>,

    /// Drop and recreate the target table.
    #[arg(long)]
    overwrite: bool,

    /// Confirm destructive actions without prompting.
    #[arg(short, long)]
    yes: bool,

    #[arg(long)]
    no_transactions: bool,

    /// Skip VACUUM/ANALYZE after loading.
    #[arg(long)]
    no_optimize: bool,

    /// Ignore any saved checkpoint and start from the beginning.
    #[arg(long)]
    no_resume: bool,

    /// Checkpoint id for this input. Defaults to the input path.
    #[arg(long)]
    id: Option<String>,

    /// Directory for resume checkpoints.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Only log errors.
    #[arg(long)]
    silent: bool,
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.silent { "error" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "tables failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> LoadResult<()> {
    let mut options = build_options(&args)?;

    if options.overwrite
        && !options.confirm_overwrite
        && options.require_explicit_overwrite_confirmation
    {
        options.confirm_overwrite = confirm_overwrite(&options)?;
    }
    options.validate()?;
    debug!(?options, "load options");

    let storage = SqliteStorage::new(options.effective_db_uri()?);
    let checkpoints = FileCheckpointStore::new(options.checkpoint_dir());

    let mut observers: Vec<Arc<dyn LoadObserver>> = vec![Arc::new(TracingObserver)];
    if !options.silent {
        observers.push(Arc::new(StdErrObserver));
    }

    let summary = LoadPipeline::new(options, storage)
        .with_observer(Arc::new(CompositeObserver::new(observers)))
        .with_alert_threshold(LoadSeverity::Critical)
        .with_checkpoints(Box::new(checkpoints))
        .run()?;

    for model in &summary.models {
        info!(table = %model.table_name, fields = model.fields.len(), "loaded");
    }
    info!(metrics = %summary.metrics, "done");
    Ok(())
}

fn build_options(args: &Args) -> LoadResult<LoadOptions> {
    let mut o = match &args.config {
        Some(path) => LoadOptions::from_json_file(path)?,
        None => LoadOptions::default(),
    };

    if args.input.is_some() {
        o.input = args.input.clone();
    }
    if args.db.is_some() {
        o.db = args.db.clone();
    }
    if args.format.is_some() {
        o.format = args.format;
    }
    if let Some(headers) = args.csv_headers.as_deref() {
        match headers.trim() {
            "false" | "no" => o.format_options.has_headers = false,
            "true" | "yes" => o.format_options.has_headers = true,
            list => {
                o.format_options.headers =
                    Some(list.split(',').map(|h| h.trim().to_string()).collect())
            }
        }
    }
    if args.csv_delimiter.is_some() {
        o.format_options.delimiter = args.csv_delimiter;
    }
    if args.csv_quote.is_some() {
        o.format_options.quote = args.csv_quote;
    }
    if args.table_name.is_some() {
        o.table_name = args.table_name.clone();
    }
    if !args.key.is_empty() {
        o.key = args.key.iter().map(|k| k.trim().to_string()).collect();
    }
    if args.index_fields.is_some() {
        o.fields_to_index = args.index_fields.clone();
    }
    if !args.date_format.is_empty() {
        o.date_format = args.date_format.clone();
    }
    if !args.datetime_format.is_empty() {
        o.datetime_format = args.datetime_format.clone();
    }
    if let Some(n) = args.batch_size {
        o.batch_threshold = n;
    }
    if let Some(n) = args.guess_size {
        o.guess_limit = n;
    }
    if args.id.is_some() {
        o.id = args.id.clone();
    }
    if args.data.is_some() {
        o.checkpoint_path = args.data.clone();
    }
    o.overwrite |= args.overwrite;
    o.confirm_overwrite |= args.yes;
    o.use_transactions &= !args.no_transactions;
    o.optimize_after_load &= !args.no_optimize;
    o.resume &= !args.no_resume;
    o.silent |= args.silent;
    Ok(o)
}

// Prompts only when both ends are a terminal; a piped input cannot answer.
fn confirm_overwrite(options: &LoadOptions) -> LoadResult<bool> {
    let stdin = io::stdin();
    if options.input.is_none() || !stdin.is_terminal() || !io::stderr().is_terminal() {
        return Err(LoadError::OverwriteNotConfirmed);
    }

    eprint!(
        "This will drop and recreate table '{}'. Continue? [y/N] ",
        options.effective_table_name()
    );
    io::stderr().flush()?;

    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Ok(true),
        _ => Err(LoadError::OverwriteNotConfirmed),
    }
}
