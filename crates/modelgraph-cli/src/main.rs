//! modelgraph CLI
//!
//! - `modelgraph serve`: HTTP service accepting whole-file and chunked IFC
//!   uploads and answering with a bounded node/edge graph.
//! - `modelgraph extract <file>`: run the same extraction locally.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use modelgraph_graph::{
    extract, EntitySource, GraphCaps, DEFAULT_MAX_NODES, DEFAULT_MAX_RELATIONSHIPS,
};
use modelgraph_ingest_step::StepEntitySource;

mod server;

#[derive(Parser)]
#[command(name = "modelgraph")]
#[command(author, version, about = "modelgraph: IFC models as bounded graphs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload server.
    ///
    /// Endpoints:
    /// - `POST /upload` (multipart field `file`)
    /// - `POST /upload-chunk` (raw body; `file-id`, `chunk-number`,
    ///   `total-chunks` headers)
    /// - `GET /health`
    ///
    /// Both upload endpoints accept `?max_nodes=&max_relationships=`.
    Serve(ServeArgs),

    /// Extract the graph of a local IFC file and print it as JSON.
    Extract(ExtractArgs),
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    /// Listen address (use `127.0.0.1:0` to auto-pick a free port).
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Storage root for staged chunks and assembled files.
    ///
    /// Defaults to `uploads` under the system temporary directory.
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Node cap applied when a request does not pass `max_nodes`.
    #[arg(long, default_value_t = DEFAULT_MAX_NODES)]
    default_max_nodes: usize,

    /// Relationship cap applied when a request does not pass
    /// `max_relationships`.
    #[arg(long, default_value_t = DEFAULT_MAX_RELATIONSHIPS)]
    default_max_relationships: usize,

    /// Idle time after which an unfinished chunked upload is discarded.
    /// `0` keeps sessions forever.
    #[arg(long, default_value_t = 600)]
    session_ttl_secs: u64,

    /// How often the reaper looks for abandoned uploads. `0` disables it.
    #[arg(long, default_value_t = 60)]
    reap_interval_secs: u64,

    /// Origins allowed by CORS (repeatable; `*` allows any).
    #[arg(long = "cors-origin", default_value = "http://localhost:5173")]
    cors_origins: Vec<String>,

    /// Largest accepted chunk body, in bytes.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    max_chunk_bytes: u64,

    /// If set, write a small JSON file once the server is listening.
    ///
    /// Useful for scripts/tests to learn the chosen port when `--listen ...:0`.
    #[arg(long)]
    ready_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct ExtractArgs {
    /// IFC (STEP physical file) to read.
    input: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_NODES)]
    max_nodes: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_RELATIONSHIPS)]
    max_relationships: usize,

    /// Write the graph here instead of stdout.
    #[arg(long, short)]
    out: Option<PathBuf>,

    /// Pretty-print the JSON.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => server::cmd_serve(args),
        Commands::Extract(args) => cmd_extract(&args),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_extract(args: &ExtractArgs) -> Result<()> {
    eprintln!(
        "{} {}",
        "Extracting".green().bold(),
        args.input.display()
    );

    let entities = StepEntitySource
        .load(&args.input)
        .map_err(|e| anyhow!("{}: {e}", args.input.display()))?;
    let graph = extract(
        entities,
        GraphCaps::new(args.max_nodes, args.max_relationships),
    );

    let json = if args.pretty {
        serde_json::to_vec_pretty(&graph)?
    } else {
        graph.to_json_vec()?
    };
    match &args.out {
        Some(out) => {
            fs::write(out, &json)?;
            eprintln!("{} {}", "wrote".green().bold(), out.display().to_string().bold());
        }
        None => println!("{}", String::from_utf8_lossy(&json)),
    }

    let summary = graph.summary;
    eprintln!(
        "  {} {} entities, {} nodes, {} edges ({} forward)",
        "→".cyan(),
        summary.entities_total,
        summary.nodes,
        summary.edges,
        summary.forward_edges
    );
    if summary.nodes_truncated {
        eprintln!(
            "  {} node cap {} reached",
            "→".yellow(),
            args.max_nodes
        );
    }
    if summary.relationships_truncated {
        eprintln!(
            "  {} relationship cap {} reached",
            "→".yellow(),
            args.max_relationships
        );
    }
    Ok(())
}
