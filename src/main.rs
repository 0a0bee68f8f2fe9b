use clap::{Parser, Subcommand, ValueEnum};
use eyre::{Result, WrapErr};
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use etherscope::{
    config::{Config, DEFAULT_BIND, DEFAULT_RATE_LIMIT_RPM},
    indexer::EtherscanClient,
    report::WalletReport,
    server::ServerConfig,
    service::WalletService,
    wallet::WalletSnapshot,
};

#[derive(Parser)]
#[command(
    name = "etherscope",
    about = "Ethereum wallet analyzer: classifies activity, flags DeFi/NFT/deployer behaviour and scores wallets 0-100."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Summary,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a single wallet
    Analyze {
        /// Wallet address to analyze
        #[arg(long, required_unless_present = "input")]
        wallet: Option<String>,

        /// Path to a wallet snapshot JSON file (offline analysis)
        #[arg(long, conflicts_with = "wallet")]
        input: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "summary")]
        format: OutputFormat,
    },

    /// Batch analysis from a file of wallet addresses
    Scan {
        /// Path to file with wallet addresses (one per line)
        #[arg(long)]
        input: PathBuf,

        /// Wallets analyzed concurrently
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Directory to write one JSON report per wallet
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Start the HTTP server
    Serve {
        /// Address to bind to
        #[arg(long)]
        bind: Option<String>,

        /// Rate limit in requests per minute per IP (0 = no limit)
        #[arg(long)]
        rate_limit: Option<u32>,

        /// Disable the result cache
        #[arg(long, default_value_t = false)]
        no_cache: bool,
    },
}

fn build_service(config: &Config) -> Result<WalletService> {
    if config.api_key().is_empty() {
        tracing::warn!("no Etherscan API key configured; requests will be heavily throttled");
    }
    let client = EtherscanClient::new(config.base_url(), config.api_key())
        .with_max_transactions(config.max_transactions())
        .with_rate_limit(config.upstream_rate_limit_rpm());
    let service = WalletService::new(Arc::new(client), &config.service_config()?)?;
    Ok(service)
}

fn print_summary(report: &WalletReport) {
    let behavior = &report.behavior;
    println!("Wallet:          {}", report.wallet_address);
    println!("ETH balance:     {} ETH", report.eth_balance_display);
    println!(
        "Activity:        {} ({} transactions over {} days)",
        behavior.activity_level, behavior.total_transactions, behavior.days_active
    );
    println!("Score:           {}/100", behavior.score);
    println!(
        "Contract calls:  {} ({:.1}%)",
        behavior.contract_calls,
        behavior.contract_call_ratio * 100.0
    );
    println!("Counterparties:  {}", behavior.unique_counterparties);
    println!("Failed:          {}", behavior.failed_transactions);
    println!(
        "Flags:           defi={} nft={} deployer={}",
        behavior.is_defi_user, behavior.is_nft_trader, behavior.is_contract_deployer
    );
    if !report.token_summary.top_tokens.is_empty() {
        println!("Top tokens:");
        for token in &report.token_summary.top_tokens {
            println!("  {:<10} {}", token.symbol, token.balance_display);
        }
    }
}

fn cmd_analyze(wallet: Option<String>, input: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let config = Config::load();
    let service = build_service(&config)?;

    let report = match (input, wallet) {
        (Some(input_path), _) => {
            let content = fs::read_to_string(&input_path)
                .wrap_err_with(|| format!("Failed to read snapshot: {}", input_path.display()))?;
            let snapshot: WalletSnapshot =
                serde_json::from_str(&content).wrap_err("Failed to parse snapshot JSON")?;
            service.analyze_snapshot(&snapshot)?
        }
        (None, Some(wallet)) => {
            eprintln!("Fetching history for {} ...", wallet);
            let rt = tokio::runtime::Runtime::new()?;
            let report = rt.block_on(service.analyze_wallet(&wallet))?;
            WalletReport::clone(&report)
        }
        (None, None) => eyre::bail!("either --wallet or --input is required"),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Summary => print_summary(&report),
    }
    Ok(())
}

fn cmd_scan(input: PathBuf, concurrency: usize, output_dir: Option<PathBuf>) -> Result<()> {
    use futures::stream::{self, StreamExt};

    let content = fs::read_to_string(&input)
        .wrap_err_with(|| format!("Failed to read wallet list: {}", input.display()))?;
    let wallets: Vec<String> = content
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    eprintln!("Scanning {} wallets...", wallets.len());

    let config = Config::load();
    let service = build_service(&config)?;

    if let Some(ref dir) = output_dir {
        fs::create_dir_all(dir)?;
    }

    let rt = tokio::runtime::Runtime::new()?;
    let total = wallets.len();

    let failures = rt.block_on(async {
        stream::iter(wallets.into_iter().enumerate())
            .map(|(i, wallet)| {
                let service = service.clone();
                let output_dir = output_dir.clone();
                async move {
                    eprintln!("[{}/{}] Scanning {}...", i + 1, total, wallet);
                    match service.analyze_wallet(&wallet).await {
                        Ok(report) => {
                            println!(
                                "{}: {} score={} defi={} nft={} deployer={}",
                                report.wallet_address,
                                report.behavior.activity_level,
                                report.behavior.score,
                                report.behavior.is_defi_user,
                                report.behavior.is_nft_trader,
                                report.behavior.is_contract_deployer,
                            );
                            if let Some(dir) = output_dir {
                                let path = dir.join(format!("{}.json", report.wallet_address));
                                if let Err(e) = serde_json::to_string_pretty(&*report)
                                    .map_err(eyre::Report::from)
                                    .and_then(|json| fs::write(&path, json).map_err(Into::into))
                                {
                                    eprintln!("  ERROR writing {}: {}", path.display(), e);
                                }
                            }
                            0usize
                        }
                        Err(e) => {
                            eprintln!("  ERROR: {}", e);
                            1
                        }
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .fold(0usize, |acc, failed| async move { acc + failed })
            .await
    });

    if let Some(stats) = service.cache_stats() {
        eprintln!(
            "Cache: {} entries, {} hits, {} misses, {} evictions, {} expirations (hit ratio {:.2})",
            stats.size, stats.hits, stats.misses, stats.evictions, stats.expirations, stats.hit_ratio
        );
    }
    if failures > 0 {
        eyre::bail!("{failures} of {total} wallets failed");
    }
    Ok(())
}

fn cmd_serve(bind: Option<String>, rate_limit: Option<u32>, no_cache: bool) -> Result<()> {
    let mut config = Config::load();
    if no_cache {
        config.cache_enabled = Some(false);
    }

    let bind = bind
        .or_else(|| config.bind.clone())
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .wrap_err_with(|| format!("Invalid bind address: {bind}"))?;

    let server_config = ServerConfig {
        bind_addr,
        rate_limit_rpm: rate_limit
            .or(config.rate_limit_rpm)
            .unwrap_or(DEFAULT_RATE_LIMIT_RPM),
        allowed_origins: config.allowed_origins.clone(),
        cache_cleanup_interval: config.cleanup_interval(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let service = build_service(&config)?;
        etherscope::server::run_server(server_config, service).await
    })
}

fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("etherscope=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze {
            wallet,
            input,
            format,
        } => cmd_analyze(wallet, input, format),
        Commands::Scan {
            input,
            concurrency,
            output_dir,
        } => cmd_scan(input, concurrency, output_dir),
        Commands::Serve {
            bind,
            rate_limit,
            no_cache,
        } => cmd_serve(bind, rate_limit, no_cache),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
