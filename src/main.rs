use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use geo_importer::config::ImporterConfig;
use geo_importer::connector::{
    Connector, ConnectorConfiguration, ConnectorConfigurations, ConnectorContext, Limits, ProviderKind,
};
use geo_importer::db::{init_pool, PgExecutor, RecordingExecutor, SqlExecutor};
use geo_importer::ingestion::{
    BulkLoader, CsvNormalizer, Downloader, HttpOptions, ImportPipeline, ImportRequest, LoadMode, Unpacker,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "geo-importer")]
#[command(about = "Acquire, normalize and load geospatial data into PostgreSQL")]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL (or resolve a local path) into a scratch directory
    Download {
        url: String,

        /// Remaining storage quota in bytes
        #[arg(long)]
        quota: Option<u64>,

        /// ETag from a previous download
        #[arg(long)]
        etag: Option<String>,

        /// Last-Modified from a previous download (RFC 3339)
        #[arg(long)]
        last_modified: Option<DateTime<Utc>>,
    },
    /// Extract an archive and list the loadable files it contains
    Unpack { path: PathBuf },
    /// Rewrite a delimited text file as UTF-8, comma separated
    Normalize { path: PathBuf },
    /// Load a file into the import schema with ogr2ogr
    Load {
        path: PathBuf,

        #[arg(long)]
        table: String,

        #[arg(long)]
        append: bool,

        #[arg(long)]
        overwrite: bool,

        /// Print the command instead of running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Download, unpack, normalize and load a URL
    Import {
        url: String,

        #[arg(long)]
        table: String,

        #[arg(long)]
        quota: Option<u64>,

        #[arg(long)]
        append: bool,

        #[arg(long)]
        overwrite: bool,
    },
    /// Copy or list tables of a remote database through FDW
    Connector {
        #[command(subcommand)]
        action: ConnectorAction,
    },
}

#[derive(Subcommand)]
enum ConnectorAction {
    /// Copy a remote table into a local one
    Copy {
        #[command(flatten)]
        target: ConnectorTarget,

        #[arg(long)]
        schema: String,

        #[arg(long)]
        table: String,

        #[arg(long)]
        max_rows: Option<u64>,
    },
    /// List tables available through the connector
    List {
        #[command(flatten)]
        target: ConnectorTarget,

        #[arg(long)]
        limit: Option<u64>,
    },
}

#[derive(clap::Args)]
struct ConnectorTarget {
    /// postgres, mysql, sqlserver, hive or odbc
    #[arg(long)]
    provider: ProviderKind,

    /// Provider parameters as JSON
    #[arg(long)]
    params: String,

    /// Database role owning the copied table
    #[arg(long, default_value = "postgres")]
    username: String,

    /// JSON file with connector configuration records
    #[arg(long)]
    configurations: Option<PathBuf>,

    /// Print the FDW statements instead of running them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ImporterConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    match args.command {
        Commands::Download { url, quota, etag, last_modified } => {
            let options = HttpOptions {
                etag,
                last_modified,
                ..HttpOptions::default()
            };
            let mut downloader = Downloader::new(&url, &config, options)?.with_cancellation(cancel);
            match downloader.run(quota).await? {
                Some(source_file) => println!("{}", source_file.fullpath().display()),
                None => println!("not modified"),
            }
            println!("{}", serde_json::to_string_pretty(downloader.result())?);
        }
        Commands::Unpack { path } => {
            let mut unpacker = Unpacker::new(config.unp.clone()).with_cancellation(cancel);
            for source_file in unpacker.run(&path).await? {
                println!("{}", source_file.fullpath().display());
            }
        }
        Commands::Normalize { path } => {
            let mut normalizer = CsvNormalizer::new(&path);
            normalizer.run()?;
            info!("Normalized {}", path.display());
        }
        Commands::Load { path, table, append, overwrite, dry_run } => {
            let mut loader =
                BulkLoader::new(table, &path, &config.database, &config.ogr2ogr, None).with_cancellation(cancel);
            loader.overwrite = overwrite;
            if dry_run {
                let mode = if append { LoadMode::Append } else { LoadMode::Import };
                println!("{}", loader.build_command(mode));
                return Ok(());
            }
            loader.run(append).await?;
            print!("{}", loader.command_output());
            match loader.exit_code() {
                Some(0) => {}
                code => anyhow::bail!("ogr2ogr exited with {:?}", code),
            }
        }
        Commands::Import { url, table, quota, append, overwrite } => {
            let pipeline = ImportPipeline::new(config).with_cancellation(cancel);
            let request = ImportRequest {
                url,
                table_name: table,
                available_quota: quota,
                append,
                overwrite,
                ..ImportRequest::default()
            };
            let result = pipeline.run(&request).await;
            println!("{}", serde_json::to_string_pretty(&pipeline.progress())?);
            let outcome = result?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Connector { action } => run_connector(action, &config).await?,
    }

    Ok(())
}

async fn run_connector(action: ConnectorAction, config: &ImporterConfig) -> Result<()> {
    let target = match &action {
        ConnectorAction::Copy { target, .. } | ConnectorAction::List { target, .. } => target,
    };

    let params: serde_json::Value =
        serde_json::from_str(&target.params).context("--params must be valid JSON")?;
    let records: Vec<ConnectorConfiguration> = match &target.configurations {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Vec::new(),
    };
    let configurations = ConnectorConfigurations::with_records(config.connectors.clone(), records)?;
    let context = ConnectorContext {
        user_id: target.username.clone(),
        organization_id: None,
        database_username: target.username.clone(),
    };

    let recorder = Arc::new(RecordingExecutor::new());
    let (superuser, user): (Arc<dyn SqlExecutor>, Arc<dyn SqlExecutor>) = if target.dry_run {
        (recorder.clone(), recorder.clone())
    } else {
        let superuser_pool = init_pool(&config.database, &config.database.superuser).await?;
        let user_pool = init_pool(&config.database, &config.database.user).await?;
        (
            Arc::new(PgExecutor::new(superuser_pool)),
            Arc::new(PgExecutor::new(user_pool)),
        )
    };

    let connector = Connector::new(
        target.provider,
        &params,
        &context,
        &configurations,
        config,
        superuser,
        user,
    )?;

    match &action {
        ConnectorAction::Copy { schema, table, max_rows, .. } => {
            let limits = Limits {
                max_rows: *max_rows,
                max_listed_tables: None,
            };
            let warnings = connector.copy_table(schema, table, &limits).await?;
            if let Some(message) = warnings.user_message() {
                warn!("{}", message);
            }
            println!("{}", serde_json::to_string_pretty(&warnings)?);
        }
        ConnectorAction::List { limit, .. } => {
            let limits = Limits {
                max_rows: None,
                max_listed_tables: *limit,
            };
            let tables = connector.list_tables(&limits).await?;
            println!("{}", serde_json::to_string_pretty(&tables)?);
        }
    }

    if target.dry_run {
        for statement in recorder.statements() {
            println!("{}", statement);
        }
    }
    Ok(())
}
