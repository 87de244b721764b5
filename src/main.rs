use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, command};
use harvester::{
    BasicAuth, FileStateManager, Granularity, GranularityPolicy, HarvestConfig, Harvester,
    HttpCommunicator, PgRecordWriter, SetSelector, db, expand_path,
};
use tracing_subscriber::EnvFilter;

/// OAI-PMH harvester
#[derive(Debug, Parser)]
#[command(name = "harvester")]
#[command(about = "OAI-PMH harvester", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(arg_required_else_help = true)]
    Harvest(HarvesterArgs),
}

#[derive(Debug, Args)]
struct HarvesterArgs {
    /// OAI-PMH base repository URL
    #[arg(long, env = "OAI_URL")]
    url: String,

    /// OAI metadata prefix
    #[arg(long, default_value = "oai_dc", env = "METADATA_PREFIX")]
    metadata_prefix: String,

    /// Set spec to harvest; repeat for several, omit for all sets
    #[arg(long = "set", env = "OAI_SET")]
    sets: Vec<String>,

    /// Lower bound of the harvest window (overrides the persisted marker)
    #[arg(long, env = "OAI_FROM")]
    from: Option<String>,

    /// Upper bound of the harvest window (skips `Identify` unless granularity is auto)
    #[arg(long, env = "OAI_UNTIL")]
    until: Option<String>,

    /// Explicit OAI granularity token (`YYYY-MM-DD` or `YYYY-MM-DDThh:mm:ssZ`);
    /// omit to auto-detect via `Identify`
    #[arg(long, env = "OAI_DATE_GRANULARITY")]
    date_granularity: Option<String>,

    /// Skip the `Identify` call when granularity and `until` are both explicit
    #[arg(long, default_value_t = false)]
    skip_identify_for_until: bool,

    /// HTTP basic-auth username
    #[arg(long, env = "OAI_HTTP_USER")]
    http_user: Option<String>,

    /// HTTP basic-auth password
    #[arg(long, env = "OAI_HTTP_PASS")]
    http_pass: Option<String>,

    /// Directory holding the checkpoint and last-harvest marker files
    #[arg(long, default_value = "state", env = "STATE_DIR")]
    state_dir: PathBuf,

    /// Postgres connection string for the record writer
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Emit debug-level tracing
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Harvest(args) => init_tracing(args.verbose),
    }

    match cli.command {
        Commands::Harvest(args) => run_harvest(args).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_harvest(args: HarvesterArgs) -> anyhow::Result<()> {
    let credentials = match (args.http_user, args.http_pass) {
        (Some(username), Some(password)) => Some(BasicAuth { username, password }),
        (None, None) => None,
        _ => anyhow::bail!("--http-user and --http-pass must be supplied together"),
    };

    let set_spec = match args.sets.len() {
        0 => SetSelector::All,
        1 => SetSelector::One(args.sets.into_iter().next().unwrap()),
        _ => SetSelector::Many(args.sets),
    };

    let granularity = match &args.date_granularity {
        Some(token) => GranularityPolicy::Explicit(Granularity::from_token(token)),
        None => GranularityPolicy::Auto,
    };

    let config = HarvestConfig {
        url: args.url.clone(),
        credentials: credentials.clone(),
        metadata_prefix: args.metadata_prefix.clone(),
        set_spec,
        from: args.from,
        until: args.until,
        granularity,
        identify_for_until: !args.skip_identify_for_until,
    };

    let communicator = HttpCommunicator::new(args.url.clone(), credentials);

    let pool = db::create_pool(&args.database_url).await?;
    let writer = PgRecordWriter::new(pool, args.url, args.metadata_prefix);

    let state_dir = expand_path(&args.state_dir);
    let state = FileStateManager::new(state_dir);

    let harvester = Harvester::new(config, communicator, writer, state);
    harvester.launch().await?;

    Ok(())
}
