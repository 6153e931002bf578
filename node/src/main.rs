use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{Config, ConfigError, File as ConfigFile};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uptime_rewards::{Collaborators, RewardEngine};
use uptime_storage::{MemoryRewardStore, RewardStore, SledRewardStore};
use uptime_time::{Clock, SystemClock, DEFAULT_BLOCK_INTERVAL_SECS};
use uptime_types::RewardParams;

mod api;
mod registry;
mod version;

use registry::RegistryConfig;
use version::{git_commit_hash, UPTIME_NODE_VERSION};

const DEFAULT_CONFIG_PATH: &str = "config/uptime-node.toml";
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageBackend {
    Sled,
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "sled" => Ok(StorageBackend::Sled),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("unknown storage backend '{other}'; expected 'sled' or 'memory'"),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            StorageBackend::Sled => "sled",
            StorageBackend::Memory => "memory",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone)]
struct AppConfig {
    config_path: Option<PathBuf>,

    // Network
    http_host: String,
    http_port: u16,

    // Storage
    storage: StorageBackend,
    data_dir: String,
    db_path: String,

    // Clock
    block_interval_secs: u64,

    // Rewards
    rewards: RewardParams,
    registry: RegistryConfig,

    // Observability
    prometheus_enabled: bool,

    // Logging
    log_level: String,
    log_format: String,

    // Development
    dev_mode: bool,
}

impl AppConfig {
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                Some(path)
            } else {
                None
            }
        };

        let mut builder = Config::builder();

        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }

        builder = builder.add_source(config::Environment::with_prefix("UPTIME"));

        let config = builder.build()?;

        let data_dir = get_string_value(&config, &["DATA_DIR", "storage.data_dir"])
            .unwrap_or_else(|| "./data".to_string());
        let db_path = get_string_value(&config, &["DB_PATH", "storage.db_path"])
            .unwrap_or_else(|| format!("{data_dir}/rewards"));
        let storage = match get_string_value(&config, &["STORAGE", "storage.backend"]) {
            Some(value) => StorageBackend::parse(&value)?,
            None => StorageBackend::Sled,
        };

        let http_port = get_u64_value(&config, &["HTTP_PORT", "http.port"])?.unwrap_or(8_090);
        let http_port = u16::try_from(http_port)
            .with_context(|| format!("HTTP_PORT {http_port} is out of range"))?;

        let registry = match config.get::<RegistryConfig>("registry") {
            Ok(registry) => registry,
            Err(ConfigError::NotFound(_)) => RegistryConfig::default(),
            Err(err) => return Err(err).context("invalid [registry] section"),
        };

        Ok(Self {
            config_path: resolved_path,
            http_host: get_string_value(&config, &["HTTP_HOST", "http.host"])
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            http_port,
            storage,
            data_dir,
            db_path,
            block_interval_secs: get_u64_value(
                &config,
                &["BLOCK_INTERVAL_SECS", "clock.block_interval_secs"],
            )?
            .unwrap_or(DEFAULT_BLOCK_INTERVAL_SECS),
            rewards: load_reward_params(&config)?,
            registry,
            prometheus_enabled: get_bool_value(
                &config,
                &[
                    "PROMETHEUS_ENABLED",
                    "metrics.enabled",
                    "observability.prometheus_enabled",
                ],
                true,
            ),
            log_level: get_string_value(&config, &["LOG_LEVEL", "logging.level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["LOG_FORMAT", "logging.format"])
                .unwrap_or_else(|| "pretty".to_string()),
            dev_mode: get_bool_value(&config, &["DEV_MODE", "node.dev_mode"], false),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.http_port == 0 {
            anyhow::bail!("HTTP_PORT must be greater than zero");
        }
        if self.block_interval_secs == 0 {
            anyhow::bail!("BLOCK_INTERVAL_SECS must be greater than zero");
        }
        if self.storage == StorageBackend::Sled && self.db_path.trim().is_empty() {
            anyhow::bail!("DB_PATH must not be empty");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                self.log_format
            );
        }
        self.rewards
            .validate()
            .context("invalid [rewards] section")?;
        self.registry.validate()?;
        Ok(())
    }
}

/// Reward parameters from `[rewards]` or `UPTIME_REWARD_*`, falling back
/// to the defaults field by field.
fn load_reward_params(config: &Config) -> Result<RewardParams> {
    let mut params = RewardParams::default();

    if let Some(rate) = get_tokens_value(
        config,
        &["REWARD_RATE_PER_MONTH", "rewards.reward_rate_per_month"],
    )? {
        params.reward_rate_per_month = rate;
        params.monthly_cap = RewardParams::default_cap_for(rate);
    }
    if let Some(cap) = get_tokens_value(config, &["REWARD_MONTHLY_CAP", "rewards.monthly_cap"])? {
        params.monthly_cap = cap;
    }

    let read = |keys: &[&str], slot: &mut u64| -> Result<()> {
        if let Some(value) = get_u64_value(config, keys)? {
            *slot = value;
        }
        Ok(())
    };
    read(
        &["REWARD_PERIOD_LENGTH_SECS", "rewards.period_length_secs"],
        &mut params.period_length_secs,
    )?;
    read(
        &["REWARD_MONTH_LENGTH_SECS", "rewards.month_length_secs"],
        &mut params.month_length_secs,
    )?;
    read(
        &["REWARD_SUBMISSION_WINDOW_SECS", "rewards.submission_window_secs"],
        &mut params.submission_window_secs,
    )?;
    read(
        &["REWARD_VIEW_WINDOW_PERIODS", "rewards.view_window_periods"],
        &mut params.view_window_periods,
    )?;
    read(
        &["REWARD_DEFAULT_PERIODS_PER_CLAIM", "rewards.default_periods_per_claim"],
        &mut params.default_periods_per_claim,
    )?;
    read(
        &["REWARD_MAX_PERIODS_PER_CLAIM", "rewards.max_periods_per_claim"],
        &mut params.max_periods_per_claim,
    )?;
    read(
        &["REWARD_BREAKER_COOLDOWN_BLOCKS", "rewards.breaker_cooldown_blocks"],
        &mut params.breaker_cooldown_blocks,
    )?;
    read(
        &["REWARD_START_TIME", "rewards.reward_start_time"],
        &mut params.reward_start_time,
    )?;

    if let Some(size) = get_u64_value(config, &["REWARD_MAX_BATCH_SIZE", "rewards.max_batch_size"])? {
        params.max_batch_size =
            u32::try_from(size).with_context(|| format!("max_batch_size {size} is out of range"))?;
    }

    Ok(params)
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn get_u64_value(config: &Config, keys: &[&str]) -> Result<Option<u64>> {
    match get_string_value(config, keys) {
        Some(raw) => raw
            .replace('_', "")
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{} must be a non-negative integer, got '{raw}'", keys[0])),
        None => Ok(None),
    }
}

/// Token amounts may exceed `i64`, so they are read as strings.
fn get_tokens_value(config: &Config, keys: &[&str]) -> Result<Option<u128>> {
    match get_string_value(config, keys) {
        Some(raw) => raw
            .replace('_', "")
            .parse::<u128>()
            .map(Some)
            .with_context(|| format!("{} must be a token amount, got '{raw}'", keys[0])),
        None => Ok(None),
    }
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.data_dir = data_dir.clone();
        config.db_path = format!("{data_dir}/rewards");
    }

    if let Some(storage) = matches.get_one::<String>("storage") {
        if let Ok(backend) = StorageBackend::parse(storage) {
            config.storage = backend;
        }
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(http_host) = matches.get_one::<String>("http-host") {
        config.http_host = http_host.clone();
    }

    if let Some(http_port) = matches.get_one::<u16>("http-port") {
        config.http_port = *http_port;
    }

    if matches.get_flag("disable-metrics") {
        config.prometheus_enabled = false;
    }

    if matches.get_flag("dev") {
        config.dev_mode = true;
        config.log_level = "debug".to_string();
        config.log_format = "pretty".to_string();
        config.storage = StorageBackend::Memory;
    }
}

fn build_cli() -> Command {
    Command::new("uptime-node")
        .version(UPTIME_NODE_VERSION)
        .about("Uptime reward accrual and claiming node")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory")
                .global(true),
        )
        .arg(
            Arg::new("storage")
                .long("storage")
                .value_name("BACKEND")
                .value_parser(["sled", "memory"])
                .help("Select the reward store backend")
                .global(true),
        )
        .arg(
            Arg::new("dev")
                .long("dev")
                .action(ArgAction::SetTrue)
                .help("Run in development mode (in-memory store, debug logs)")
                .global(true),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print detailed version information and exit")
                .global(true),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Validate configuration and storage, then exit")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format")
                .global(true),
        )
        .arg(
            Arg::new("http-host")
                .long("http-host")
                .value_name("HOST")
                .help("Override HTTP bind host")
                .global(true),
        )
        .arg(
            Arg::new("http-port")
                .long("http-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override HTTP port")
                .global(true),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus exporter")
                .global(true),
        )
        .subcommand(Command::new("start").about("Start the reward node (default)"))
        .subcommand(Command::new("params").about("Print the effective reward parameters and exit"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    if matches.get_flag("version_flag") {
        print_version_info();
        return Ok(());
    }

    let config = load_config_with_overrides(&matches)?;

    if matches.get_flag("check") {
        return run_self_check(&config);
    }

    if let Some(("params", _)) = matches.subcommand() {
        println!("{}", serde_json::to_string_pretty(&config.rewards)?);
        return Ok(());
    }

    init_logging(&config)?;
    run_node(config).await
}

async fn run_node(config: AppConfig) -> Result<()> {
    info!(
        version = UPTIME_NODE_VERSION,
        commit = git_commit_hash(),
        storage = %config.storage,
        "Starting uptime reward node"
    );
    if let Some(path) = &config.config_path {
        info!("Loaded configuration from {}", path.display());
    }
    if config.dev_mode {
        warn!("Development mode enabled; state is not persisted");
    }

    let metrics_handle = init_metrics(&config);

    let sled_store = match config.storage {
        StorageBackend::Sled => {
            fs::create_dir_all(&config.data_dir)
                .with_context(|| format!("failed to create data dir {}", config.data_dir))?;
            let store = SledRewardStore::open(&config.db_path)
                .with_context(|| format!("failed to open reward store at {}", config.db_path))?;
            Some(Arc::new(store))
        }
        StorageBackend::Memory => None,
    };
    let store: Arc<dyn RewardStore> = match &sled_store {
        Some(store) => store.clone(),
        None => Arc::new(MemoryRewardStore::new()),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.block_interval_secs));
    let registries = config.registry.build();
    let engine = Arc::new(RewardEngine::new(
        store,
        clock,
        Collaborators {
            membership: registries.membership.clone(),
            custody: registries.custody.clone(),
            roles: registries.roles.clone(),
        },
        config.rewards.clone(),
    )?);

    let params = engine.params();
    info!(
        rate_per_month = %params.reward_rate_per_month,
        monthly_cap = %params.monthly_cap,
        period_length_secs = params.period_length_secs,
        "Reward engine ready"
    );

    let reporter = tokio::spawn(report_status(engine.clone()));

    let addr = format!("{}:{}", config.http_host, config.http_port);
    let state = api::ApiState::new(engine, metrics_handle);
    let served = api::start_server(state, &addr, shutdown_signal()).await;

    reporter.abort();
    if let Some(store) = sled_store {
        store.flush().context("failed to flush reward store")?;
    }
    info!("Uptime reward node stopped");
    served
}

/// Publish slow-moving engine gauges.
async fn report_status(engine: Arc<RewardEngine>) {
    let mut interval = tokio::time::interval(STATUS_REPORT_INTERVAL);
    loop {
        interval.tick().await;
        metrics::gauge!("uptime_custody_available").set(engine.custody_available() as f64);
        match engine.totals() {
            Ok(totals) => {
                metrics::gauge!("uptime_total_distributed").set(totals.total_distributed as f64);
                metrics::gauge!("uptime_total_claims").set(totals.total_claims as f64);
            }
            Err(err) => warn!("Failed to read distribution totals: {}", err),
        }
        match engine.circuit_breaker_status() {
            Ok(status) => {
                let tripped = if status.tripped { 1.0 } else { 0.0 };
                metrics::gauge!("uptime_circuit_breaker_tripped").set(tripped);
            }
            Err(err) => warn!("Failed to read circuit breaker state: {}", err),
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.prometheus_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            describe_counter!(
                "uptime_online_submissions_total",
                "Accepted online-status submissions"
            );
            describe_counter!(
                "uptime_online_bits_set_total",
                "Participant periods newly marked online"
            );
            describe_counter!("uptime_claims_total", "Completed claims, including empty ones");
            describe_counter!(
                "uptime_rewards_distributed_total",
                "Tokens paid out through claims"
            );
            describe_counter!(
                "uptime_claim_transfer_failures_total",
                "Claims aborted because custody refused the transfer"
            );
            describe_counter!(
                "uptime_migrated_participants_total",
                "Legacy attendance records converted to the period ledger"
            );
            describe_gauge!(
                "uptime_circuit_breaker_tripped",
                "Circuit breaker state (1 = tripped)"
            );
            describe_gauge!("uptime_custody_available", "Tokens left in custody");
            describe_gauge!("uptime_total_distributed", "Tokens distributed since genesis");
            describe_gauge!("uptime_total_claims", "Claims settled since genesis");
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

fn print_version_info() {
    println!(
        "uptime-node {} (commit {})",
        UPTIME_NODE_VERSION,
        git_commit_hash()
    );
}

fn run_self_check(config: &AppConfig) -> Result<()> {
    println!("Running uptime node self-check...");
    let mut issues = Vec::new();

    if let Err(err) = ensure_port_available(&config.http_host, config.http_port) {
        issues.push(err);
    }

    if config.storage == StorageBackend::Sled {
        if let Err(err) = check_store(Path::new(&config.db_path), &config.rewards) {
            issues.push(err);
        }
    }

    if config.registry.pools.is_empty() {
        issues.push("no pools configured; online-status submissions will be rejected".to_string());
    }
    if config.registry.admins.is_empty() {
        issues.push("no admin accounts configured".to_string());
    }

    if issues.is_empty() {
        println!("OK");
        Ok(())
    } else {
        for issue in &issues {
            eprintln!("- {issue}");
        }
        anyhow::bail!("self-check failed")
    }
}

fn ensure_port_available(host: &str, port: u16) -> Result<(), String> {
    let addr = format!("{host}:{port}");
    match std::net::TcpListener::bind(&addr) {
        Ok(listener) => drop(listener),
        Err(err) => return Err(format!("HTTP port {addr} is not available for binding: {err}")),
    }
    Ok(())
}

/// Open the store and report whether persisted parameters override the
/// configured ones.
fn check_store(path: &Path, configured: &RewardParams) -> Result<(), String> {
    let store = SledRewardStore::open(path)
        .map_err(|err| format!("Unable to open reward store {}: {err}", path.display()))?;
    let persisted = store
        .get_params()
        .map_err(|err| format!("Unable to read persisted parameters: {err}"))?;
    if let Some(persisted) = persisted {
        if &persisted != configured {
            println!(
                "note: persisted reward parameters in {} take precedence over the configuration",
                path.display()
            );
        }
    }
    Ok(())
}
