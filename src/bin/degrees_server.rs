//! Degrees Server - Unix socket server for path searches
//!
//! Provides a MessagePack-based protocol for searches and cache maintenance.
//! Multiple clients can connect and share the same cache and rate-limit budget.
//!
//! Usage:
//!   degrees-server /path/to/social.degrees [--socket /tmp/degrees.sock] [--upstream fixture.json]
//!
//! Protocol:
//!   Request:  [4-byte length BE] [MessagePack payload]
//!   Response: [4-byte length BE] [MessagePack payload]

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use degrees::discovery::{Hashtag, StaticUpstream, User};
use degrees::ratelimit::{AuthContext, PoolStatus, RateLimitStatus, Scope};
use degrees::search::{SearchRequest, SearchResult};
use degrees::storage::{CacheStats, EntityKind, SearchRecord};
use degrees::{SearchConfig, SearchEngine, SearchService, SeedEdge};

const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;
const DEFAULT_RECENT_SEARCHES: usize = 20;

// ============================================================================
// Wire Protocol Types
// ============================================================================

/// Request from client
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    // Searches
    FindHashtagPath {
        start: String,
        end: String,
        #[serde(rename = "maxDegrees")]
        max_degrees: usize,
        #[serde(rename = "maxApiCalls")]
        max_api_calls: u32,
        #[serde(default, rename = "userId")]
        user_id: Option<String>,
    },
    FindUserPath {
        start: u64,
        end: u64,
        #[serde(rename = "maxDegrees")]
        max_degrees: usize,
        #[serde(rename = "maxApiCalls")]
        max_api_calls: u32,
        #[serde(default, rename = "userId")]
        user_id: Option<String>,
    },

    // Cache
    SeedEdges { kind: EntityKind, edges: Vec<SeedEdge> },
    RecentSearches { limit: Option<usize> },
    Stats,
    Flush,

    // Rate limits
    UpdateRateLimit {
        resource: String,
        #[serde(default, rename = "userId")]
        user_id: Option<String>,
        remaining: u32,
        #[serde(rename = "untilResetSecs")]
        until_reset_secs: u64,
    },
    RateLimitStatus,

    // Control
    Ping,
    Shutdown,
}

/// Response to client
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: bool },
    Error { error: String },
    HashtagResult { result: SearchResult<Hashtag> },
    UserResult { result: SearchResult<User> },
    Seeded { seeded: usize },
    Searches { searches: Vec<SearchRecord> },
    Stats { stats: CacheStats },
    Pools { pools: Vec<PoolStatus> },
    Pong { pong: bool, version: String },
}

fn error_response(e: impl std::fmt::Display) -> Response {
    Response::Error { error: e.to_string() }
}

fn scope_of(user_id: Option<String>) -> Scope {
    match user_id {
        Some(id) => Scope::PerUser(id),
        None => Scope::AppWide,
    }
}

// ============================================================================
// Request Handler
// ============================================================================

fn handle_request(service: &SearchService, request: Request) -> Response {
    let engine = service.engine();

    match request {
        Request::FindHashtagPath { start, end, max_degrees, max_api_calls, user_id } => {
            let request = SearchRequest::new(Hashtag::new(&start), Hashtag::new(&end), max_degrees, max_api_calls);
            match service.find_hashtag_path(request, user_id.map(AuthContext::new)) {
                Ok(result) => Response::HashtagResult { result },
                Err(e) => error_response(e),
            }
        }

        Request::FindUserPath { start, end, max_degrees, max_api_calls, user_id } => {
            let request = SearchRequest::new(User::provisional(start), User::provisional(end), max_degrees, max_api_calls);
            match service.find_user_path(request, user_id.map(AuthContext::new)) {
                Ok(result) => Response::UserResult { result },
                Err(e) => error_response(e),
            }
        }

        Request::SeedEdges { kind, edges } => match engine.seed_edges(kind, &edges) {
            Ok(seeded) => Response::Seeded { seeded },
            Err(e) => error_response(e),
        },

        Request::RecentSearches { limit } => {
            match engine.cache().recent_searches(limit.unwrap_or(DEFAULT_RECENT_SEARCHES)) {
                Ok(searches) => Response::Searches { searches },
                Err(e) => error_response(e),
            }
        }

        Request::Stats => match engine.cache().stats() {
            Ok(stats) => Response::Stats { stats },
            Err(e) => error_response(e),
        },

        Request::Flush => match engine.cache().flush() {
            Ok(()) => Response::Ok { ok: true },
            Err(e) => error_response(e),
        },

        Request::UpdateRateLimit { resource, user_id, remaining, until_reset_secs } => {
            let status = RateLimitStatus {
                remaining,
                until_reset: Duration::from_secs(until_reset_secs),
            };
            engine.update_rate_limit(&resource, &scope_of(user_id), status);
            Response::Ok { ok: true }
        }

        Request::RateLimitStatus => Response::Pools { pools: engine.rate_limit_status() },

        Request::Ping => Response::Pong {
            pong: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        },

        Request::Shutdown => {
            if let Err(e) = engine.cache().flush() {
                tracing::error!("Flush before shutdown failed: {}", e);
            }
            Response::Ok { ok: true }
        }
    }
}

// ============================================================================
// Client Connection Handler
// ============================================================================

fn read_message(stream: &mut UnixStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;

    Ok(Some(buf))
}

fn write_message(stream: &mut UnixStream, data: &[u8]) -> std::io::Result<()> {
    let len = data.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(data)?;
    stream.flush()?;
    Ok(())
}

fn send_response(stream: &mut UnixStream, response: &Response) -> std::io::Result<()> {
    // Named fields, so clients can decode maps
    match rmp_serde::to_vec_named(response) {
        Ok(bytes) => write_message(stream, &bytes),
        Err(e) => {
            tracing::error!("Serialize error: {}", e);
            Ok(())
        }
    }
}

fn handle_client(mut stream: UnixStream, service: Arc<SearchService>, client_id: usize, socket_path: PathBuf) {
    tracing::info!("Client {} connected", client_id);

    loop {
        let msg = match read_message(&mut stream) {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::info!("Client {} disconnected", client_id);
                break;
            }
            Err(e) => {
                tracing::warn!("Client {} read error: {}", client_id, e);
                break;
            }
        };

        let request: Request = match rmp_serde::from_slice(&msg) {
            Ok(req) => req,
            Err(e) => {
                let response = Response::Error { error: format!("Invalid request: {}", e) };
                if send_response(&mut stream, &response).is_err() {
                    break;
                }
                continue;
            }
        };

        let is_shutdown = matches!(request, Request::Shutdown);
        let response = handle_request(&service, request);

        if let Err(e) = send_response(&mut stream, &response) {
            tracing::warn!("Client {} write error: {}", client_id, e);
            break;
        }

        if is_shutdown {
            tracing::info!("Shutdown requested by client {}", client_id);
            let _ = std::fs::remove_file(&socket_path);
            std::process::exit(0);
        }
    }
}

// ============================================================================
// Main
// ============================================================================

/// Shortest-connection search server
#[derive(Parser, Debug)]
#[command(name = "degrees-server", version)]
#[command(about = "Serves path searches over a persistent social-graph cache", long_about = None)]
struct Args {
    /// Path to the cache directory
    db_path: PathBuf,

    /// Unix socket path
    #[arg(long, default_value = "/tmp/degrees.sock")]
    socket: PathBuf,

    /// JSON search configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON upstream fixture; without one, only cached edges are found
    #[arg(long)]
    upstream: Option<PathBuf>,

    /// Search worker threads (overrides the configuration)
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SearchConfig::load(path).with_context(|| format!("loading config {:?}", path))?,
        None => SearchConfig::default(),
    }
    .apply_env();
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let upstream = match &args.upstream {
        Some(path) => StaticUpstream::load(path).with_context(|| format!("loading upstream fixture {:?}", path))?,
        None => {
            tracing::warn!("No upstream configured, searches are served from the cache only");
            StaticUpstream::new()
        }
    };

    // Remove stale socket file
    let _ = std::fs::remove_file(&args.socket);

    tracing::info!("Opening cache: {:?}", args.db_path);
    let workers = config.workers;
    let engine = SearchEngine::open(&args.db_path, config, Arc::new(upstream)).context("opening cache")?;
    let stats = engine.cache().stats()?;
    tracing::info!(
        "Cache opened: {} entities, {} edges, {} expanded",
        stats.entity_count, stats.edge_count, stats.expanded_count
    );

    let service = Arc::new(SearchService::start(Arc::new(engine), workers)?);

    let listener = UnixListener::bind(&args.socket).with_context(|| format!("binding {:?}", args.socket))?;
    tracing::info!("Listening on {:?}", args.socket);

    // Flush and exit on SIGINT/SIGTERM
    let service_for_signal = Arc::clone(&service);
    let socket_for_signal = args.socket.clone();
    let mut signals = signal_hook::iterator::Signals::new([signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM])
        .context("registering signal handlers")?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!("Received signal {}, flushing...", sig);
            match service_for_signal.engine().cache().flush() {
                Ok(()) => tracing::info!("Flush complete"),
                Err(e) => tracing::error!("Flush failed: {}", e),
            }
            let _ = std::fs::remove_file(&socket_for_signal);
            tracing::info!("Exiting");
            std::process::exit(0);
        }
    });

    let mut client_id = 0;
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                client_id += 1;
                let service = Arc::clone(&service);
                let socket_path = args.socket.clone();
                thread::spawn(move || handle_client(stream, service, client_id, socket_path));
            }
            Err(e) => {
                tracing::warn!("Accept error: {}", e);
            }
        }
    }

    Ok(())
}
