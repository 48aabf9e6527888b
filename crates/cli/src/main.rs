use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dashsync_api::{HttpService, Notifier, StaticCredentials};
use dashsync_controller::{BulkAction, BulkStrategy, LoadPhase, SyncController};
use dashsync_core::{EntityId, NoticeKind, PageResult, QuerySnapshot, QueryState, SyncConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dashctl", version, about = "Query and bulk-edit a dashboard collection")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Base URL of the collection API, e.g. https://dash.example.com/api
    #[arg(long = "endpoint", env = "DASHSYNC_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Bearer token
    #[arg(long = "token", env = "DASHSYNC_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Per-request timeout in milliseconds (none by default)
    #[arg(long = "timeout-ms", env = "DASHSYNC_TIMEOUT_MS", global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug, Clone)]
struct QueryArgs {
    /// Free-text search
    #[arg(long = "search", short = 's')]
    search: Option<String>,
    /// Attribute filter, repeatable: --filter status=sent
    #[arg(long = "filter", short = 'f', value_name = "KEY=VALUE")]
    filters: Vec<String>,
    /// Attribute to order by; prefix with '-' for descending
    #[arg(long = "sort")]
    sort: Option<String>,
    #[arg(long = "page", default_value_t = 1)]
    page: u32,
    #[arg(long = "per-page")]
    per_page: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List one page of a collection
    Ls {
        /// Collection path, e.g. "invoices"
        collection: String,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Show counters for the filtered collection
    Stats {
        collection: String,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Run a mutating action over ids of the selected page
    Bulk {
        collection: String,
        /// Action name, e.g. "delete" or "send"
        action: String,
        /// Comma-separated ids; must be on the listed page
        #[arg(long = "ids", value_delimiter = ',', required = true)]
        ids: Vec<String>,
        /// Skip entities whose attribute has this value, repeatable
        #[arg(long = "skip-when", value_name = "KEY=VALUE")]
        skip_when: Vec<String>,
        /// JSON payload sent with the action
        #[arg(long = "payload")]
        payload: Option<String>,
        /// One request per id instead of one batch
        #[arg(long = "per-item", action = ArgAction::SetTrue)]
        per_item: bool,
        #[command(flatten)]
        query: QueryArgs,
    },
}

fn init_tracing() {
    let env = std::env::var("DASHSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DASHSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid DASHSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

/// Prints notices to stderr so stdout stays machine-readable.
struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        eprintln!("[{}] {}", kind.label(), message);
    }
}

fn parse_pair(raw: &str) -> Result<(String, String)> {
    let (k, v) = raw.split_once('=').ok_or_else(|| anyhow!("expected KEY=VALUE, got {:?}", raw))?;
    if k.trim().is_empty() {
        bail!("empty key in {:?}", raw);
    }
    Ok((k.trim().to_string(), v.trim().to_string()))
}

fn build_query(args: &QueryArgs, config: &SyncConfig) -> Result<QueryState> {
    let mut q = QueryState::new(config.default_per_page);
    let mut snapshot = QuerySnapshot { search_text: args.search.clone().unwrap_or_default(), ..Default::default() };
    for raw in &args.filters {
        let (k, v) = parse_pair(raw)?;
        snapshot.filters.insert(k, v);
    }
    q.apply_snapshot(snapshot);
    q.set_sort(args.sort.clone());
    if let Some(n) = args.per_page {
        q.set_per_page(n, &config.allowed_per_page)?;
    }
    q.set_page(args.page, None)?;
    Ok(q)
}

async fn open(cli: &Cli, collection: &str, query: &QueryArgs) -> Result<SyncController> {
    let endpoint = cli.endpoint.clone().context("--endpoint (or DASHSYNC_ENDPOINT) is required")?;
    let config = SyncConfig::from_env();
    let service = HttpService::new(endpoint, collection, cli.timeout_ms.map(Duration::from_millis))?;
    let credentials = Arc::new(StaticCredentials::new(cli.token.clone()));
    let query = build_query(query, &config)?;
    let mut ctl = SyncController::new(Arc::new(service), credentials, Arc::new(StderrNotifier), config).with_query(query);
    ctl.start();
    ctl.settle().await;
    if ctl.phase() == LoadPhase::ErrorInitial {
        let msg = ctl.error().map(|e| e.error.to_string()).unwrap_or_default();
        bail!("could not load {}: {}", collection, msg);
    }
    Ok(ctl)
}

fn attr_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn print_page(page: &PageResult) {
    // Columns come from the first row; heterogeneous rows show "-" for gaps.
    let cols: Vec<&String> = page.items.first().map(|e| e.attributes.keys().collect()).unwrap_or_default();
    let mut header = format!("{:<12}", "ID");
    for c in &cols {
        header.push_str(&format!(" {:<16}", c.to_uppercase()));
    }
    println!("{}", header.trim_end());
    for e in &page.items {
        let mut line = format!("{:<12}", e.id.as_str());
        for c in &cols {
            let cell = e.attr(c).map(attr_text).unwrap_or_else(|| "-".to_string());
            line.push_str(&format!(" {:<16}", cell));
        }
        println!("{}", line.trim_end());
    }
    println!("page {}/{} • {} per page • {} total", page.current_page, page.last_page.max(1), page.per_page, page.total);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Ls { collection, query } => {
            info!(collection = %collection, "ls invoked");
            let ctl = open(&cli, collection, query).await?;
            let page = ctl.page().cloned().unwrap_or_else(|| PageResult::empty(ctl.query().per_page()));
            match cli.output {
                Output::Human => print_page(&page),
                Output::Json => println!("{}", serde_json::to_string_pretty(&page)?),
            }
        }
        Commands::Stats { collection, query } => {
            info!(collection = %collection, "stats invoked");
            let ctl = open(&cli, collection, query).await?;
            let view = ctl.stats();
            if let Some(err) = &view.error {
                bail!("stats failed: {}", err);
            }
            let snap = view.snapshot.unwrap_or_default();
            match cli.output {
                Output::Human => {
                    for (k, v) in &snap.counters {
                        println!("{:<16} {}", k, v);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&snap)?),
            }
        }
        Commands::Bulk { collection, action, ids, skip_when, payload, per_item, query } => {
            info!(collection = %collection, action = %action, ids = ids.len(), "bulk invoked");
            let mut bulk = BulkAction::new(action.as_str());
            if let Some(raw) = payload {
                bulk = bulk.with_payload(serde_json::from_str(raw).context("--payload is not valid JSON")?);
            }
            if *per_item {
                bulk = bulk.with_strategy(BulkStrategy::PerItem);
            }
            for raw in skip_when {
                let (k, v) = parse_pair(raw)?;
                bulk = bulk.skip_when(&k, &v);
            }
            let mut ctl = open(&cli, collection, query).await?;
            for id in ids {
                ctl.toggle_select(&EntityId::from(id.as_str()))
                    .with_context(|| format!("cannot select {}", id))?;
            }
            let outcome = ctl.run_bulk_action(&bulk).await?;
            // let the follow-up refresh land so its errors are reported
            ctl.settle().await;
            match cli.output {
                Output::Human => {
                    println!("{}", outcome.summary());
                    for (id, reason) in &outcome.reason_per_skip {
                        println!("  skipped {}: {}", id, reason);
                    }
                    for (id, err) in &outcome.error_per_failure {
                        println!("  failed  {}: {}", id, err);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
            }
            if !outcome.failed_ids.is_empty() {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}
