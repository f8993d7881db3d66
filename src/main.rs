use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use taskfarm::config::{ClientConfig, ServerConfig, CLIENT_CONFIG_FILE, SERVER_CONFIG_FILE};
use taskfarm::node::Node;
use taskfarm::overview::Overview;
use taskfarm::protocol::parse_jobs;
use taskfarm::remote::{CoordinatorClient, RetryPolicy, MIN_RETRY_INTERVAL};
use taskfarm::scheduler::SubmissionAck;
use taskfarm::shutdown::install_shutdown_handler;
use taskfarm::worker::{UpdatePoller, Worker};

#[derive(Parser, Debug)]
#[command(name = "taskfarm")]
#[command(version)]
#[command(about = "A distributed job farm: a coordinator and worker clients")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the coordinator
    Server(ServerArgs),

    /// Start a worker client
    Client(ClientArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        manager: ManagerArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Show the farm overview
    Status {
        #[command(flatten)]
        manager: ManagerArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// JSON config file (missing file means defaults)
    #[arg(long, default_value = SERVER_CONFIG_FILE)]
    config: PathBuf,

    /// Database directory (overrides the config file)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// JSON config file (missing file means defaults)
    #[arg(long, default_value = CLIENT_CONFIG_FILE)]
    config: PathBuf,

    /// Coordinator URL
    #[arg(long)]
    server: Option<String>,

    /// Capacity units (0 = number of CPU cores)
    #[arg(long)]
    max_threads: Option<u32>,

    /// Directory for job working directories and task logs
    #[arg(long)]
    temp_dir: Option<PathBuf>,
}

// =============================================================================
// Manager Arguments (shared by job and status commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ManagerArgs {
    /// Coordinator URL
    #[arg(long, short = 's', default_value = "http://127.0.0.1:8081")]
    server: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit the job (or array of jobs) in a JSON file
    Submit {
        file: PathBuf,

        /// Retries while the coordinator is unreachable
        #[arg(long, default_value_t = 20)]
        max_retry: u32,

        /// Milliseconds between retries (at least 2000)
        #[arg(long, default_value_t = 10000)]
        retry_interval_ms: u64,
    },
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Manager commands print their results on stdout; diagnostics go to stderr.
fn init_manager_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

fn print_acks(acks: &[SubmissionAck], output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(acks)?),
        OutputFormat::Table => {
            for ack in acks {
                println!("JOB '{}', ID '{}', TASKS {}", ack.name, ack.id, ack.task_count);
            }
        }
    }
    Ok(())
}

fn print_overview(overview: &Overview, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    if let OutputFormat::Json = output_format {
        println!("{}", serde_json::to_string_pretty(overview)?);
        return Ok(());
    }

    println!("Farm Status");
    println!("{}", "=".repeat(40));
    println!("Jobs:      {}", overview.job_count);
    println!(
        "Tasks:     {} total, {} pending, {} completed, {} error",
        overview.tasks.total, overview.tasks.pending, overview.tasks.completed, overview.tasks.error
    );
    println!();

    if overview.jobs.is_empty() {
        println!("No jobs found.");
    } else {
        println!(
            "{:<30} {:<20} {:<10} {:>7} {:>7} BLOCKED BY",
            "JOB ID", "NAME", "STATUS", "DONE", "ERROR"
        );
        println!("{}", "-".repeat(90));
        for job in &overview.jobs {
            let name = if job.name.chars().count() > 20 {
                format!("{}...", job.name.chars().take(17).collect::<String>())
            } else {
                job.name.clone()
            };
            let done = format!("{}/{}", job.completed, job.task_count);
            let blocked = if job.blocked_by.is_empty() {
                "-".to_string()
            } else {
                job.blocked_by.join(",")
            };
            println!(
                "{:<30} {:<20} {:<10} {:>7} {:>7} {}",
                job.id, name, job.status, done, job.error, blocked
            );
        }
    }

    println!();
    println!("Clients:");
    println!("{:<40} {:<10} STATUS", "ID", "THREADS");
    println!("{}", "-".repeat(60));
    for client in &overview.clients {
        let threads = format!("{}/{}", client.free_threads, client.max_threads);
        let status = if client.stale { "[-] stale" } else { "[+] alive" };
        println!("{:<40} {:<10} {}", client.id, threads, status);
    }
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut config = ServerConfig::load(&args.config)?;
    if let Some(database) = args.database {
        config = config.with_database(database);
    }
    if let Some(ip) = args.ip {
        config.ip = ip;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let shutdown = install_shutdown_handler()?;
    let (node, writer) = Node::start(config).await?;
    node.run(writer, shutdown).await?;

    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut config = ClientConfig::load(&args.config)?;
    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(max_threads) = args.max_threads {
        config.max_threads = max_threads;
    }
    if let Some(temp_dir) = args.temp_dir {
        config.temp_dir = temp_dir;
    }
    let config = config.resolve();

    tracing::info!(
        hostname = %config.hostname,
        max_threads = config.max_threads,
        temp_dir = %config.temp_dir.display(),
        "Starting client"
    );

    let shutdown = install_shutdown_handler()?;
    let worker = Worker::new(&config)?;
    UpdatePoller::new(config.update_interval())
        .run(&worker, shutdown)
        .await;

    Ok(())
}

async fn handle_job_submit(
    remote: &CoordinatorClient,
    file: PathBuf,
    retry: RetryPolicy,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(&file).await?;
    let jobs = parse_jobs(serde_json::from_str(&content)?)?;

    match remote.add_jobs_with_retry(&jobs, retry).await {
        Ok(acks) => print_acks(&acks, output_format)?,
        Err(e) => {
            if RetryPolicy::is_retryable(&e) {
                eprintln!("Max retries ({}) reached.", retry.max_retries);
            }
            eprintln!("Error: Job submission failed: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn handle_status(
    remote: &CoordinatorClient,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let overview = remote.status().await?;
    print_overview(&overview, output_format)
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Client(client_args) => {
            run_client(client_args).await?;
        }
        Commands::Job { manager, command } => {
            init_manager_tracing();
            let remote = CoordinatorClient::new(manager.server.clone())?;
            match command {
                JobCommands::Submit {
                    file,
                    max_retry,
                    retry_interval_ms,
                } => {
                    let retry = RetryPolicy {
                        max_retries: max_retry,
                        interval: Duration::from_millis(retry_interval_ms).max(MIN_RETRY_INTERVAL),
                    };
                    handle_job_submit(&remote, file, retry, &manager.output).await?;
                }
            }
        }
        Commands::Status { manager } => {
            let remote = CoordinatorClient::new(manager.server.clone())?;
            handle_status(&remote, &manager.output).await?;
        }
    }

    Ok(())
}
