use clap::{Args, Parser, Subcommand, ValueEnum};
use kvload::config::{ClusterConfig, DEFAULT_ENDPOINT, RunConfig, defaults, exit, messages};
use kvload::error::{AppError, ErrorContext, Result};
use kvload::memory::{LatencyRange, MemoryConnector, MemoryStore};
use kvload::net::{self, TcpConnector};
use kvload::runner::run_blocking;
use std::io;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kvload")]
#[command(about = "kvload performs load tests against a key-value store")]
#[command(version)]
struct Cli {
    /// Store endpoints, connections are assigned round-robin
    #[arg(long, global = true, value_delimiter = ',', default_value = DEFAULT_ENDPOINT)]
    endpoints: Vec<String>,

    /// Dial timeout for client connections
    #[arg(long, global = true, default_value = "2s", value_parser = humantime::parse_duration)]
    dial_timeout: Duration,

    /// Store backend to drive
    #[arg(long, global = true, value_enum, default_value_t = Backend::Tcp)]
    backend: Backend,

    /// Lower bound of simulated latency for the memory backend
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    memory_latency_min: Option<Duration>,

    /// Upper bound of simulated latency for the memory backend
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    memory_latency_max: Option<Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Tcp,
    Memory,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Performs load test for put, update and read(get) operations
    #[command(name = "test-pur", alias = "TestPUR")]
    TestPur(PurArgs),
    /// Serves an in-memory store over TCP for local runs
    Serve {
        /// Address to listen on
        #[arg(long, default_value = DEFAULT_ENDPOINT)]
        listen: String,
    },
}

#[derive(Args, Debug)]
struct PurArgs {
    /// No of cycle for which the operation is to be performed
    #[arg(long, default_value_t = defaults::ROUNDS)]
    rounds: usize,
    /// Total no of concurrent operations to be performed
    #[arg(long, default_value_t = defaults::TOTAL_CONCURRENT_OPS)]
    total_concurrent_ops: usize,
    /// Total no of client connections to use
    #[arg(long, default_value_t = defaults::TOTAL_CLIENT)]
    total_client: usize,
    /// all, put, update, get
    #[arg(long, default_value = defaults::MODE)]
    mode: String,
    /// Total no of unique prefixes to use
    #[arg(long, default_value_t = defaults::TOTAL_PREFIXES)]
    total_prefixes: usize,
    /// Total number of keys for the operation
    #[arg(long, default_value_t = defaults::TOTAL_KEYS)]
    total_keys: usize,
    /// Length of key for the operation
    #[arg(long, default_value_t = defaults::KEY_LENGTH)]
    key_length: usize,
    /// Length of value for the operation
    #[arg(long, default_value_t = defaults::VALUE_LENGTH)]
    value_length: usize,
    /// Linearizable(l) or Serializable(s)
    #[arg(long, default_value = defaults::CONSISTENCY)]
    consistency: String,
    /// Seed for reproducible keys and values
    #[arg(long)]
    seed: Option<u64>,
    /// Check every read returns the value written for that key
    #[arg(long)]
    verify_reads: bool,
}

impl PurArgs {
    fn to_config(&self) -> Result<RunConfig> {
        Ok(RunConfig {
            rounds: self.rounds,
            total_concurrent_ops: self.total_concurrent_ops,
            total_client: self.total_client,
            total_prefixes: self.total_prefixes,
            total_keys: self.total_keys,
            key_length: self.key_length,
            value_length: self.value_length,
            consistency: self.consistency.parse()?,
            mode: self.mode.parse()?,
            seed: self.seed,
            verify_reads: self.verify_reads,
        })
    }
}

impl Cli {
    fn cluster(&self) -> ClusterConfig {
        ClusterConfig {
            endpoints: self.endpoints.clone(),
            dial_timeout: self.dial_timeout,
        }
    }

    fn memory_store(&self) -> Result<MemoryStore> {
        let store = MemoryStore::new();
        match (self.memory_latency_min, self.memory_latency_max) {
            (None, None) => Ok(store),
            (min, max) => {
                let max = max.or(min).unwrap_or_default();
                let range = LatencyRange::new(min.unwrap_or_default(), max)?;
                Ok(store.with_latency(range))
            }
        }
    }
}

fn init_tracing() {
    // 报告走 stdout，日志走 stderr
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let cluster = cli.cluster();
    match &cli.command {
        Command::TestPur(args) => {
            let config = args.to_config()?;
            let mut stdout = io::stdout().lock();
            match cli.backend {
                Backend::Tcp => run_blocking(&TcpConnector, &cluster, &config, &mut stdout)?,
                Backend::Memory => {
                    let connector = MemoryConnector::new(cli.memory_store()?);
                    run_blocking(&connector, &cluster, &config, &mut stdout)?
                }
            };
            Ok(())
        }
        Command::Serve { listen } => {
            let store = cli.memory_store()?;
            let runtime = compio::runtime::Runtime::new()
                .map_err(|e| AppError::RuntimeCreate(e.to_string()))
                .with_context(messages::RUNTIME_CREATE_FAILED)?;
            runtime
                .block_on(async {
                    let listener = net::bind(listen).await?;
                    net::serve(listener, store).await
                })
                .with_context(messages::SERVE_FAILED)
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { exit::BAD_CONFIG } else { exit::SUCCESS };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::from(exit::SUCCESS),
        Err(e) => {
            error!(error = %e, "kvload failed");
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
