//! powgate - proof-of-work gated quote service
//!
//! Usage:
//!   powgate --help

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use powgate::pow::{hash_rate, solve, Challenge};
use powgate::{
    ClientConfig, Gate, QuoteClient, QuoteStore, Settings, DEFAULT_PORT, POWGATE_VERSION,
};

#[derive(Parser)]
#[command(name = "powgate")]
#[command(version = POWGATE_VERSION)]
#[command(about = "Proof-of-work gated TCP quote service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server
    Serve {
        /// Path to a YAML settings file
        #[arg(short, long)]
        config: Option<String>,

        /// Override the bind port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the challenge difficulty (leading zero bits)
        #[arg(short, long)]
        difficulty: Option<u32>,

        /// Override the YAML quotes file
        #[arg(short, long)]
        quotes: Option<String>,
    },

    /// Request one quote from a running server
    Fetch {
        /// Server address
        #[arg(short, long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
        addr: String,

        /// Connect and I/O timeout in seconds
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// Solve a challenge line and print the nonce
    Solve {
        /// Challenge in wire form: data|difficulty|timestamp
        challenge: String,
    },

    /// Benchmark local hashing and estimate solve times
    Bench {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },

    /// Show version and default settings
    Info,
}

fn main() {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            difficulty,
            quotes,
        } => {
            run_serve(config, port, difficulty, quotes);
        }
        Commands::Fetch { addr, timeout } => {
            run_fetch(addr, timeout);
        }
        Commands::Solve { challenge } => {
            run_solve(challenge);
        }
        Commands::Bench { duration } => {
            run_bench(duration);
        }
        Commands::Info => {
            show_info();
        }
    }
}

fn run_serve(
    config_path: Option<String>,
    port: Option<u16>,
    difficulty: Option<u32>,
    quotes_file: Option<String>,
) {
    let mut settings = match &config_path {
        Some(path) => match Settings::load(path) {
            Ok(settings) => settings,
            Err(err) => {
                error!("failed to load config {path}: {err}");
                std::process::exit(1);
            }
        },
        None => Settings::default(),
    };
    settings.apply_env_overrides();

    if let Some(port) = port {
        settings.port = port;
    }
    if let Some(difficulty) = difficulty {
        settings.challenge_difficulty = difficulty;
    }
    if let Some(path) = quotes_file {
        settings.quotes_file = Some(path);
    }

    let quotes = match &settings.quotes_file {
        Some(path) => match QuoteStore::from_file(path) {
            Ok(store) => {
                info!("loaded {} quotes from {path}", store.len());
                store
            }
            Err(err) => {
                error!("failed to load quotes from {path}: {err}");
                std::process::exit(1);
            }
        },
        None => {
            info!("no quotes file configured, using built-in list");
            QuoteStore::with_defaults()
        }
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime");

    rt.block_on(async {
        let gate = match Gate::start(settings, Arc::new(quotes)).await {
            Ok(gate) => gate,
            Err(err) => {
                error!("failed to start server: {err}");
                std::process::exit(1);
            }
        };
        info!("server listening on {}", gate.local_addr());
        info!("Press Ctrl+C to stop");

        wait_for_shutdown_signal().await;
        info!("shutting down...");
        gate.shutdown().await;
    });
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

fn run_fetch(addr: String, timeout_secs: u64) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime");

    rt.block_on(async {
        let client = QuoteClient::new(ClientConfig {
            addr: addr.clone(),
            timeout: Duration::from_secs(timeout_secs),
        });

        match client.fetch().await {
            Ok(quote) => println!("{quote}"),
            Err(err) => {
                eprintln!("fetch from {addr} failed: {err}");
                std::process::exit(1);
            }
        }
    });
}

fn run_solve(challenge_line: String) {
    let challenge = match Challenge::parse(challenge_line.trim()) {
        Ok(challenge) => challenge,
        Err(err) => {
            eprintln!("invalid challenge: {err}");
            std::process::exit(1);
        }
    };

    let start = std::time::Instant::now();
    let nonce = solve(&challenge);
    eprintln!(
        "solved {} leading zero bits in {:?}",
        challenge.difficulty,
        start.elapsed()
    );
    println!("{nonce}");
}

fn run_bench(duration: u64) {
    println!();
    println!("Measuring SHA-256 challenge throughput for {duration} seconds...");
    println!();

    let rate = hash_rate(Duration::from_secs(duration));

    println!("Results:");
    println!("  - Hashes/second:   {}", format_number(rate));
    println!();
    println!("Expected solve time by difficulty (bits):");
    for bits in [8u32, 12, 16, 20, 24] {
        let expected_hashes = 1u64 << bits;
        let seconds = expected_hashes as f64 / rate.max(1) as f64;
        println!("  - {bits:>2} bits: ~{seconds:.3} s");
    }
    println!();
}

fn show_info() {
    println!();
    println!("powgate {POWGATE_VERSION}");
    println!("Proof-of-work gated TCP quote service");
    println!();

    let defaults = Settings::default();
    println!("Default settings:");
    println!("  bind address:       {}", defaults.bind_addr());
    println!("  difficulty:         {} bits", defaults.challenge_difficulty);
    println!("  read timeout:       {:?}", defaults.read_timeout());
    println!("  write timeout:      {:?}", defaults.write_timeout());
    println!("  rate limit:         {}/s", defaults.rate_limit);
    println!("  burst limit:        {}", defaults.burst_limit);
    println!("  max connections:    {}", defaults.max_connections);
    println!("  worker pool size:   {}", defaults.worker_pool_size);
    println!("  queue size:         {}", defaults.queue_size);
    println!("  base backoff:       {:?}", defaults.base_backoff());
    println!("  max backoff:        {:?}", defaults.max_backoff());
    println!("  nonce window:       {:?}", defaults.nonce_window());
    println!();
    println!("Commands:");
    println!("  serve  - Run the server");
    println!("  fetch  - Request one quote from a running server");
    println!("  solve  - Solve a challenge line and print the nonce");
    println!("  bench  - Benchmark local hashing");
    println!();
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
