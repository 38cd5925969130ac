use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colorskew::{
    ConflictRetryDriver, ConnectionConfig, ConnectionProvider, DriverReport, MemoryProvider,
    PostgresProvider, RetryPolicy, TargetTable,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// In-process snapshot-isolated table
    Memory,
    /// Live PostgreSQL server, configured through the property file
    Postgres,
}

#[derive(Parser)]
#[command(name = "colorskew")]
#[command(about = "Force a SERIALIZABLE write-skew conflict and recover with bounded retries")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Property file naming the URL/USER/PASS environment variables
    #[arg(long, default_value = "db.properties")]
    properties: PathBuf,

    #[arg(long, default_value = "colors")]
    table: String,

    #[arg(long, default_value = "color")]
    column: String,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Base delay between retries; 0 retries immediately
    #[arg(long, default_value_t = 0)]
    backoff_ms: u64,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let target = TargetTable::new(&cli.table, &cli.column)?;

    let provider: Arc<dyn ConnectionProvider> = match cli.backend {
        Backend::Memory => Arc::new(MemoryProvider::write_skew(target.clone())),
        Backend::Postgres => {
            let config = ConnectionConfig::from_properties(&cli.properties).with_context(|| {
                format!("loading connection settings from {}", cli.properties.display())
            })?;
            Arc::new(PostgresProvider::new(config)?)
        }
    };

    let policy = RetryPolicy::default()
        .with_max_retries(cli.max_retries)
        .with_backoff(cli.backoff_ms, cli.backoff_ms.saturating_mul(8));

    let report = ConflictRetryDriver::new(Arc::clone(&provider), target.clone())
        .with_policy(policy)
        .run()
        .await
        .context("serializable write did not complete")?;

    print_report(&report, cli.json)?;

    let mut conn = provider
        .connect()
        .await
        .context("reading back the final table")?;
    let colors = conn.select_colors(&target).await?;
    let rendered: Vec<&str> = colors.iter().map(|color| color.as_str()).collect();
    println!("{} = [{}]", target.table(), rendered.join(", "));

    Ok(())
}

fn print_report(report: &DriverReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let path: Vec<String> = report.states.iter().map(ToString::to_string).collect();
    println!("states:    {}", path.join(" -> "));
    println!("conflicts: {}", report.conflicts);
    println!("retries:   {}", report.retries);
    println!("rows:      {}", report.rows_affected);
    Ok(())
}
