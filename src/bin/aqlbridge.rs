use std::io::Read;
use std::path::PathBuf;

use aqlbridge::config::AdapterConfig;
use aqlbridge::errors::DbError;
use aqlbridge::logger;
use aqlbridge::query::{CompileRequest, compile};
use aqlbridge::replication::{ChangeEvent, EventBus};
use aqlbridge::Adapter;
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "aqlbridge", version, about = "Criteria compiler and change-stream tail", long_about = None)]
struct Cli {
    /// Path to a config file (TOML)
    #[arg(long, global = true, help = "Path to a config file (TOML). If omitted, the usual locations are searched.")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Log level override: error|warn|info|debug|trace")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Compile a request (JSON) and print the statement as JSON")]
    Compile {
        #[arg(help = "Compile request JSON; read from stdin when omitted")]
        request: Option<String>,
        #[arg(long, help = "Pretty-print the output")]
        pretty: bool,
    },
    #[command(about = "Follow the server's change stream and print one NDJSON line per change")]
    Tail {
        #[arg(long, value_delimiter = ',', help = "Only print changes for these collections (comma-separated)")]
        collections: Vec<String>,
    },
    #[command(name = "show-config", about = "Print the resolved configuration (password redacted)")]
    ShowConfig,
}

fn main() {
    let cli = Cli::parse();
    let r = match cli.command {
        Commands::Compile { request, pretty } => run_compile(request, pretty),
        Commands::Tail { collections } => load(&cli.config, cli.log_level.as_deref()).and_then(|cfg| run_tail(cfg, collections)),
        Commands::ShowConfig => load(&cli.config, cli.log_level.as_deref()).map(|cfg| println!("{cfg:#?}")),
    };
    if let Err(e) = r {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn load(path: &Option<PathBuf>, level: Option<&str>) -> Result<AdapterConfig, DbError> {
    let mut cfg = AdapterConfig::load(path.as_deref())?;
    if let Some(l) = level {
        cfg.logging.level = l.to_string();
    }
    logger::init_from_config(&cfg.logging)?;
    Ok(cfg)
}

fn run_compile(request: Option<String>, pretty: bool) -> Result<(), DbError> {
    let text = match request {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let req: CompileRequest = serde_json::from_str(&text)?;
    let compiled = compile(&req)?;
    let out = if pretty { serde_json::to_string_pretty(&compiled)? } else { serde_json::to_string(&compiled)? };
    println!("{out}");
    Ok(())
}

fn line(ev: &ChangeEvent) -> String {
    json!({
        "collection": ev.collection,
        "event": ev.event_name(),
        "tick": ev.tick.map(|t| t.to_string()),
        "document": ev.document,
    })
    .to_string()
}

fn run_tail(cfg: AdapterConfig, collections: Vec<String>) -> Result<(), DbError> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let bus = EventBus::new();
        if collections.is_empty() {
            bus.on_any(|ev| println!("{}", line(ev)));
        } else {
            for c in &collections {
                bus.on(c, |ev| println!("{}", line(ev)));
            }
        }
        let listener = Adapter::new(cfg).listener(bus)?;
        let handle = listener.start();
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r?;
                handle.stop();
            }
            () = wait_stopped(&handle) => {}
        }
        let tick = handle.join().await?;
        eprintln!("stopped at tick {tick}");
        Ok::<(), DbError>(())
    })
}

async fn wait_stopped(handle: &aqlbridge::replication::ListenerHandle) {
    while handle.is_running() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
