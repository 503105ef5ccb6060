mod host;
mod playlist;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pigo_api::anilist::AniListClient;
use pigo_api::backend::BackendClient;
use pigo_core::config::AppConfig;
use pigo_core::directory::ServerDirectory;
use pigo_core::error::PigoError;
use pigo_core::handoff::{HandoffController, HandoffOutcome, HandoffState, Platform};
use pigo_core::loader::{LoaderState, StreamLoader};
use pigo_core::matcher::CatalogMatcher;
use pigo_core::models::{CandidateServer, MediaIdentity, MediaKind};
use pigo_core::resolver::{Resolution, StreamResolver};
use pigo_core::session::PlaybackSession;

use host::SystemHost;
use playlist::{FileSurface, PlaylistEngineFactory};

const DEFAULT_FILTER: &str = "pigo=info,pigo_core=info,pigo_api=info";

#[derive(Parser, Debug)]
#[command(name = "pigo")]
#[command(about = "Find streams for catalog titles and hand them to the companion player")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file to use instead of the per-user one
    #[arg(long, global = true, env = "PIGO_CONFIG")]
    config: Option<PathBuf>,

    /// Also write daily-rotated logs to this directory
    #[arg(long, global = true, env = "PIGO_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Write logs to the default log directory
    #[arg(long, global = true, default_value_t = false)]
    log: bool,
}

#[derive(ClapArgs, Debug, Clone)]
struct MediaArgs {
    /// Primary catalog id
    id: u64,

    /// movie, tv or anime
    #[arg(long, default_value = "movie")]
    kind: MediaKind,

    #[arg(long)]
    season: Option<u32>,

    #[arg(long)]
    episode: Option<u32>,
}

impl MediaArgs {
    fn identity(&self) -> MediaIdentity {
        // The backend keys servers by id and kind only.
        MediaIdentity::new(self.id, self.kind, "")
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Match a primary-catalog title to its anime chain
    Match {
        /// Primary catalog id
        id: u64,

        title: String,

        /// Release or first-air date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        #[arg(long, default_value = "tv")]
        kind: MediaKind,
    },
    /// List candidate servers
    Servers {
        #[command(flatten)]
        media: MediaArgs,
    },
    /// Resolve a server into a playable stream
    Resolve {
        #[command(flatten)]
        media: MediaArgs,

        /// Server name (defaults to the first offered)
        #[arg(long)]
        server: Option<String>,
    },
    /// Resolve and play, via the companion app or a local playlist
    Play {
        #[command(flatten)]
        media: MediaArgs,

        #[arg(long)]
        server: Option<String>,

        /// User id for watch history
        #[arg(long, env = "PIGO_USER", default_value = "local")]
        user: String,

        /// Platform to act as (defaults to this machine's)
        #[arg(long)]
        platform: Option<Platform>,

        /// Play in-page: write a proxied playlist instead of handing off
        #[arg(long, default_value_t = false)]
        in_page: bool,

        /// Output file for --in-page
        #[arg(long, default_value = "pigo.m3u8")]
        out: PathBuf,

        /// Pretend adaptive streaming is unavailable (blob fallback)
        #[arg(long, default_value_t = false)]
        no_engine: bool,
    },
    /// Show or initialize the config file
    Config {
        /// Write the built-in defaults to the config file
        #[arg(long, default_value_t = false)]
        init: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().or_else(|| cli.log.then(AppConfig::log_dir));
    let _guard = init_tracing(log_dir.as_deref());

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Command::Match {
            id,
            title,
            date,
            kind,
        } => {
            let identity =
                MediaIdentity::new(id, kind, title).with_date_str(date.as_deref().unwrap_or(""));
            let client = AniListClient::default()
                .with_endpoint(config.catalog.endpoint.clone())
                .with_per_page(config.catalog.per_page);
            let matcher = CatalogMatcher::new(client, config.retry_policy());

            match matcher.resolve(&identity).await? {
                Some(found) => println!("{}", serde_json::to_string_pretty(&found)?),
                None => println!("No matching catalog entry for \"{}\".", identity.title),
            }
        }
        Command::Servers { media } => {
            let backend = Arc::new(backend_client(&config)?);
            let directory = ServerDirectory::new(backend, config.retry_policy());
            let servers = directory
                .list(&media.identity(), media.season, media.episode)
                .await?;
            if servers.is_empty() {
                println!("No servers available.");
            }
            for server in &servers {
                println!("{:<16} {}", server.name, server.link);
            }
        }
        Command::Resolve { media, server } => {
            let backend = Arc::new(backend_client(&config)?);
            let directory = ServerDirectory::new(Arc::clone(&backend), config.retry_policy());
            let servers = directory
                .list(&media.identity(), media.season, media.episode)
                .await?;
            let chosen = choose(&servers, server.as_deref())?;

            let resolver = StreamResolver::new(Arc::clone(&backend), config.retry_policy());
            let Resolution::Current(stream) = resolver.resolve(chosen).await? else {
                bail!("stream resolution was superseded");
            };
            let proxied = backend.proxy().url_for(&stream.uri, &stream.headers);
            println!("{}", serde_json::to_string_pretty(&stream)?);
            println!("proxied: {proxied}");
        }
        Command::Play {
            media,
            server,
            user,
            platform,
            in_page,
            out,
            no_engine,
        } => {
            let backend = Arc::new(backend_client(&config)?);
            let factory = PlaylistEngineFactory {
                http: reqwest::Client::new(),
                out: out.clone(),
                enabled: !no_engine,
            };
            let loader = StreamLoader::new(Arc::clone(&backend), backend.proxy().clone(), factory);
            let handoff_config = config.handoff_config();
            let capability = handoff_config.capability(platform.unwrap_or_else(Platform::current));
            let handoff =
                HandoffController::new(SystemHost::new(config.backend_url()?), handoff_config);

            let session = PlaybackSession::new(
                media.identity(),
                user,
                backend,
                config.retry_policy(),
                loader,
                handoff,
            );
            session.set_episode(media.season, media.episode);

            let listing = session.servers().await?;
            let chosen = match server.as_deref() {
                Some(_) => choose(&listing.servers, server.as_deref())?.clone(),
                None => listing.default.context("no servers available")?,
            };
            if let Resolution::Superseded = session.select(&chosen).await? {
                bail!("stream resolution was superseded");
            }

            if in_page {
                let surface = Arc::new(FileSurface {
                    path: out.clone(),
                    native_hls: true,
                });
                match session.play_in_page(surface).await? {
                    LoaderState::Playing => {
                        session.playback_started().await;
                        println!("Playlist written to {}", out.display());
                    }
                    LoaderState::Failed(failure) => bail!("playback failed: {failure}"),
                    other => bail!("playback ended in state {other:?}"),
                }
            } else {
                let result = session.hand_off(capability).await;
                let outcome = settle_handoff(result, session.handoff_state())?;
                println!("Handoff: {}", serde_json::to_string(&outcome)?);
            }
            session.teardown();
        }
        Command::Config { init } => {
            let path = cli.config.unwrap_or_else(AppConfig::config_path);
            if init {
                AppConfig::default().save_to(&path)?;
                println!("Wrote default config to {}", path.display());
            } else {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pigo.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn backend_client(config: &AppConfig) -> anyhow::Result<BackendClient> {
    let client = BackendClient::with_timeout(config.backend_url()?, config.backend_timeout())
        .context("failed to build backend client")?
        .with_history_path(config.backend.history_path.clone());
    Ok(client)
}

/// An attempt that ended on the install page is not a failure, even when
/// the OS refused the URI outright.
fn settle_handoff(
    result: Result<HandoffOutcome, PigoError>,
    state: HandoffState,
) -> anyhow::Result<HandoffOutcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if state == HandoffState::Redirecting => {
            tracing::warn!(error = %e, "companion app could not be launched");
            Ok(HandoffOutcome::AppMissing)
        }
        Err(e) => Err(e.into()),
    }
}

fn choose<'a>(
    servers: &'a [CandidateServer],
    name: Option<&str>,
) -> anyhow::Result<&'a CandidateServer> {
    match name {
        Some(name) => servers
            .iter()
            .find(|s| s.name == name)
            .with_context(|| format!("server '{name}' is not offered")),
        None => servers.first().context("no servers available"),
    }
}
