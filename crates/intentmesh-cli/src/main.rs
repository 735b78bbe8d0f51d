mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use config::MeshConfig;
use intentmesh_core::{GeoPoint, NewIntention};
use intentmesh_memory::{LocalEmbedding, RankOptions, Ranker};
use intentmesh_security::{AuditLog, HmacSigner};
use intentmesh_session::{
    AttentionTracker, FileLocalCache, InMemoryLocalCache, LocalCache, LocalState,
};
use intentmesh_sync::{
    Invitation, JoinOrchestrator, LinkContext, LoopbackMesh, NodeFaults, PeerTransport,
    TransportMonitor, WritePipeline,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LINK_BASE: &str = "https://intentmesh.app/";

#[derive(Parser)]
#[command(name = "intentmesh", about = "intentmesh: shared intentions, offline first")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "intentmesh.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank cached intentions against a query
    Search {
        query: String,
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
        /// Override the configured result limit
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Inspect the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Inspect persisted device state
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Parse or build invitation links
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },
    /// Switch the active intention, recording a signed attention event
    Focus {
        /// Intention ID; omit to clear focus
        id: Option<String>,
    },
    /// Run two in-process peers through a join, a search and an offline write
    Demo,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached intentions
    List,
    /// Drop every cached intention
    Clear,
}

#[derive(Subcommand)]
enum StateAction {
    /// Print the remembered address, focus and attention log
    Show,
    /// Forget the remembered store address
    Forget,
}

#[derive(Subcommand)]
enum LinkAction {
    /// Print the invitation carried by a link
    Parse { url: String },
    /// Build an invitation link
    Build {
        #[arg(long)]
        db: String,
        /// Peer address hint; repeatable
        #[arg(long = "peer")]
        peers: Vec<String>,
        #[arg(long, default_value = DEFAULT_LINK_BASE)]
        base: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = MeshConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Search {
            query,
            lat,
            lon,
            limit,
        } => {
            let cache = FileLocalCache::new(config.cache_path()).await?;
            let items = cache.load_all().await?;
            let mut opts = config.ranking.clone();
            if let (Some(lat), Some(lon)) = (lat, lon) {
                opts = opts.with_location(GeoPoint::new(lat, lon));
            }
            if let Some(limit) = limit {
                opts.max_results = limit;
            }

            let ranker = Ranker::new(Arc::new(LocalEmbedding::default()));
            let results = ranker.rank(&query, &items, &opts).await?;
            if results.is_empty() {
                println!("No matches among {} cached intention(s).", items.len());
            } else {
                print_results(&results);
            }
        }
        Commands::Cache { action } => {
            let cache = FileLocalCache::new(config.cache_path()).await?;
            match action {
                CacheAction::List => {
                    let items = cache.load_all().await?;
                    if items.is_empty() {
                        println!("Cache is empty ({}).", cache.path().display());
                    }
                    for item in &items {
                        println!("  {}  [{:?}]  {}", item.id, item.status, item.title);
                    }
                    if !items.is_empty() {
                        println!("\nTotal: {} intention(s)", items.len());
                    }
                }
                CacheAction::Clear => {
                    let n = cache.count().await?;
                    cache.clear().await?;
                    println!("Cleared {n} cached intention(s).");
                }
            }
        }
        Commands::State { action } => {
            let state = LocalState::open(config.state_path()).await?;
            match action {
                StateAction::Show => {
                    println!(
                        "Remembered store: {}",
                        state.remembered_address().await.as_deref().unwrap_or("(none)")
                    );
                    println!(
                        "Active intention: {}",
                        state.active_intention().await.as_deref().unwrap_or("(none)")
                    );
                    println!(
                        "Credential cached: {}",
                        if state.credential().await.is_some() { "yes" } else { "no" }
                    );
                    let log = state.attention_log().await;
                    println!("Attention events: {}", log.len());
                    for event in log.iter().rev().take(5) {
                        println!(
                            "  {}  {} -> {}",
                            event.at.to_rfc3339(),
                            event.from.as_deref().unwrap_or("-"),
                            event.to.as_deref().unwrap_or("-")
                        );
                    }
                }
                StateAction::Forget => {
                    state.forget_address().await?;
                    println!("Remembered store address cleared.");
                }
            }
        }
        Commands::Link { action } => match action {
            LinkAction::Parse { url } => match Invitation::from_link(&url)? {
                Some(invitation) => {
                    println!("Store: {}", invitation.address);
                    if invitation.peers.is_empty() {
                        println!("Peers: (none, ambient discovery)");
                    }
                    for peer in &invitation.peers {
                        println!("Peer:  {peer}");
                    }
                }
                None => println!("No invitation in this link."),
            },
            LinkAction::Build { db, peers, base } => {
                println!("{}", Invitation::new(db, peers).to_link(&base)?);
            }
        },
        Commands::Focus { id } => {
            let key = config.identity.resolve_signing_key().ok_or_else(|| {
                anyhow::anyhow!(
                    "no signing key: set [identity].signing_key or {}",
                    config::SIGNING_KEY_ENV
                )
            })?;
            let signer = Arc::new(HmacSigner::new(config.identity.author.clone(), key)?);
            let state = Arc::new(LocalState::open(config.state_path()).await?);
            let tracker = AttentionTracker::new(state, signer);
            let event = tracker.switch_to(id.as_deref()).await?;
            println!(
                "Focus: {} (signature {})",
                event.to.as_deref().unwrap_or("(none)"),
                event.signature
            );
        }
        Commands::Demo => run_demo(&config).await?,
    }

    Ok(())
}

fn print_results(results: &[intentmesh_memory::RankedResult]) {
    println!("{:>6}  {:>6}  {:>9}  title", "score", "scale", "card");
    for r in results {
        println!(
            "{:>6.3}  {:>6.3}  {:>4}x{:<4}  {}",
            r.combined_score, r.display.scale, r.display.width, r.display.height, r.intention.title
        );
    }
}

/// Two loopback peers: alice creates a store and writes, bob joins through
/// an invitation, searches, then writes while his replication is failing.
async fn run_demo(config: &MeshConfig) -> anyhow::Result<()> {
    let mesh = LoopbackMesh::new();
    let embedder = Arc::new(LocalEmbedding::default());
    let audit = Arc::new(AuditLog::new(config.audit_dir()));

    let alice = mesh.node("alice");
    let _alice_monitor = TransportMonitor::spawn(&alice);
    let alice_join = JoinOrchestrator::new(
        Arc::new(alice.clone()),
        Arc::new(alice.clone()),
        Arc::new(LocalState::in_memory()),
        config.store_name.clone(),
    )
    .with_timeouts(config.timeouts.join())
    .with_audit(Arc::clone(&audit));
    let joined = alice_join.join(None).await?;
    println!("alice created store {}", joined.address);

    let alice_pipeline = WritePipeline::new(
        Arc::clone(&joined.session),
        Arc::new(InMemoryLocalCache::new()),
        embedder.clone(),
    )
    .with_timeouts(config.timeouts.pipeline(false))
    .with_audit(Arc::clone(&audit));

    let seeds = [
        ("I need help moving furniture", Some(GeoPoint::new(52.52, 13.405))),
        ("Learn Spanish conversation", None),
        ("Bake sourdough bread", Some(GeoPoint::new(48.8566, 2.3522))),
        ("Find a chess partner", Some(GeoPoint::new(52.50, 13.42))),
        ("Volunteer at the food bank", None),
    ];
    for (title, geo) in &seeds {
        let mut draft = NewIntention::new(*title, "alice");
        if let Some(geo) = *geo {
            draft = draft.with_geo(geo);
        }
        alice_pipeline.create(draft).await?;
    }
    alice_pipeline.flush().await;
    println!("alice wrote {} intentions", seeds.len());

    let link = Invitation::new(joined.address.clone(), alice.listen_addresses())
        .to_link(DEFAULT_LINK_BASE)?;
    println!("invitation: {link}");

    let bob = mesh.node("bob");
    let bob_join = JoinOrchestrator::new(
        Arc::new(bob.clone()),
        Arc::new(bob.clone()),
        Arc::new(LocalState::in_memory()),
        config.store_name.clone(),
    )
    .with_timeouts(config.timeouts.join())
    .with_audit(Arc::clone(&audit));
    let context = LinkContext::new(link);
    let bob_session = bob_join.join(Some(&context)).await?;
    println!(
        "bob joined {} via {:?} (direct peer: {}), link now {}",
        bob_session.address,
        bob_session.origin,
        bob_session.direct_peer_connected,
        context.current()
    );

    let bob_cache: Arc<dyn LocalCache> = Arc::new(InMemoryLocalCache::new());
    let bob_pipeline = WritePipeline::new(
        Arc::clone(&bob_session.session),
        Arc::clone(&bob_cache),
        embedder.clone(),
    )
    .with_timeouts(config.timeouts.pipeline(false))
    .with_audit(Arc::clone(&audit));
    let items = bob_pipeline.load_all(bob_session.is_new_session()).await?;
    info!(count = items.len(), "bob loaded intentions");

    let ranker = Ranker::new(embedder.clone());
    let opts: RankOptions = config
        .ranking
        .clone()
        .with_location(GeoPoint::new(52.51, 13.40));
    println!("\nbob searches \"help moving\" near Berlin:");
    print_results(&ranker.rank("help moving", &items, &opts).await?);

    bob.set_faults(NodeFaults {
        fail_writes: true,
        ..NodeFaults::default()
    });
    let draft = bob_pipeline
        .create(NewIntention::new("Offline draft: borrow a ladder", "bob"))
        .await?;
    bob_pipeline.flush().await;
    let visible = bob_pipeline
        .load_all(false)
        .await?
        .iter()
        .any(|i| i.id == draft.id);
    println!(
        "\nbob wrote while replication failed: cached={visible}, pending replication={}",
        bob_pipeline.pending_replication()
    );

    Ok(())
}
