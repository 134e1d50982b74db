mod data_dir;

use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Report,
    Result,
    WrapErr,
    eyre,
};
use guild_context::{
    api_client::DashboardClient,
    config::CoordinatorConfig,
    guild::GuildId,
    header_binder::HeaderBinder,
    preferences::sled_storage::SledPreferenceStore,
    query_cache::{
        InMemoryQueryCache,
        QueryKey,
        QueryRegistry,
        WALLET_BALANCE,
    },
    session::DashboardSession,
    switch_state::SwitchSnapshot,
};
use std::{
    fmt,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_stream::{
    StreamExt,
    wrappers::WatchStream,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";

type Session = DashboardSession<InMemoryQueryCache<DashboardClient>>;

#[derive(Parser, Debug)]
#[command(
    name = "guild-dash",
    about = "Inspect and switch the active guild of a casino dashboard session",
    version
)]
struct Args {
    /// Dashboard API base URL
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// JSON file with coordinator timings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override how long an unconfirmed switch may stay pending
    #[arg(long)]
    fallback_timeout_ms: Option<u64>,

    /// Override the delay between a matching profile and completing the switch
    #[arg(long)]
    grace_period_ms: Option<u64>,

    /// Override the quiet period required before the app counts as ready
    #[arg(long)]
    stabilization_window_ms: Option<u64>,

    /// Override the data directory (defaults to ~/.guild-dash)
    #[arg(long)]
    data_dir: Option<String>,

    /// Write logs to a daily file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the guilds the logged-in user can see
    Guilds,
    /// Switch the active guild and wait for the switch to settle
    Switch { guild: String },
    /// Follow the switch state and app readiness until interrupted
    Watch,
}

impl Args {
    fn coordinator_config(&self) -> Result<CoordinatorConfig> {
        let mut config = match &self.config {
            Some(path) => CoordinatorConfig::load(path).map_err(report)?,
            None => CoordinatorConfig::default(),
        };
        if let Some(ms) = self.fallback_timeout_ms {
            config.fallback_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.grace_period_ms {
            config.grace_period = Duration::from_millis(ms);
        }
        if let Some(ms) = self.stabilization_window_ms {
            config.stabilization_window = Duration::from_millis(ms);
        }
        config.validate().map_err(report)?;
        Ok(config)
    }
}

fn report(err: impl fmt::Display) -> Report {
    eyre!("{err:#}")
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_dir {
        Some(dir) => {
            let appender = rolling::daily(dir, "guild-dash.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = builder.with_writer(writer).with_ansi(false).try_init();
            Some(guard)
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
            None
        }
    }
}

fn describe(snapshot: &SwitchSnapshot) -> String {
    let selected = snapshot
        .selected
        .as_ref()
        .map_or_else(|| "<none>".to_string(), GuildId::to_string);
    match &snapshot.pending {
        Some(pending) => format!("selected {selected} (switching to {pending})"),
        None => format!("selected {selected}"),
    }
}

fn print_guilds(session: &Session) -> Result<()> {
    let snapshot = session.context().snapshot();
    if let Some(error) = &snapshot.error {
        return Err(eyre!("could not load guilds: {error}"));
    }
    if snapshot.guilds.is_empty() {
        println!("{} is not a member of any guild", session.user().username);
        return Ok(());
    }
    for guild in &snapshot.guilds {
        let marker = if snapshot.selected.as_ref() == Some(&guild.id) {
            "*"
        } else {
            " "
        };
        println!("{marker} {:<24} {}", guild.id, guild.name);
    }
    Ok(())
}

async fn switch(
    session: &Session,
    cache: &InMemoryQueryCache<DashboardClient>,
    guild: String,
) -> Result<()> {
    let guild = GuildId::new(guild);
    let snapshot = session.context().snapshot();
    if !snapshot.guilds.iter().any(|known| known.id == guild) {
        return Err(eyre!(
            "guild {guild} is not available to {}",
            session.user().username
        ));
    }

    let started = Instant::now();
    session.context().select_guild(guild.clone()).await;
    let settled = session.context().settled().await;
    println!("{} after {:?}", describe(&settled), started.elapsed());

    let wallet = QueryKey::new(WALLET_BALANCE, Some(guild)).with_subject(&session.user().id);
    let balance = cache
        .fetch(&wallet)
        .await
        .map_err(report)
        .wrap_err("failed to load wallet balance for the new guild")?;
    println!("wallet balance: {balance}");
    Ok(())
}

async fn watch(session: &Session) -> Result<()> {
    let mut snapshots = WatchStream::new(session.context().subscribe());
    let mut shell = WatchStream::new(session.shell().subscribe());
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            Some(snapshot) = snapshots.next() => println!("{}", describe(&snapshot)),
            Some(state) = shell.next() => println!(
                "ready={} show_loading_screen={}",
                state.ready, state.show_loading_screen
            ),
            res = &mut interrupt => {
                match res {
                    Ok(()) => tracing::info!("Received interrupt, exiting"),
                    Err(_) => tracing::warn!("Received interrupt error, exiting anyway"),
                }
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref());
    let config = args.coordinator_config()?;

    let data_dir = data_dir::resolve_data_dir(args.data_dir.as_deref())?;
    let preferences = SledPreferenceStore::open(data_dir::preferences_path(&data_dir))
        .map_err(report)
        .wrap_err("failed to open preference store")?;

    let headers = HeaderBinder::new();
    let client = DashboardClient::new(&args.api_url, headers.clone()).map_err(report)?;
    let cache = InMemoryQueryCache::new(client.clone());
    tracing::info!("starting dashboard session against {client}");
    let session = DashboardSession::start(
        &config,
        client.clone(),
        headers,
        preferences,
        cache.clone(),
        QueryRegistry::with_defaults(),
    )
    .await
    .map_err(report)
    .wrap_err_with(|| format!("failed to start a session against {client}"))?;

    match args.command {
        Command::Guilds => print_guilds(&session),
        Command::Switch { guild } => switch(&session, &cache, guild).await,
        Command::Watch => watch(&session).await,
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn coordinator_config__flags_override_defaults() {
        // given
        let args = Args::parse_from([
            "guild-dash",
            "--fallback-timeout-ms",
            "8000",
            "--grace-period-ms",
            "250",
            "guilds",
        ]);

        // when
        let config = args.coordinator_config().unwrap();

        // then
        assert_eq!(config.fallback_timeout, Duration::from_millis(8_000));
        assert_eq!(config.grace_period, Duration::from_millis(250));
        assert_eq!(
            config.stabilization_window,
            CoordinatorConfig::default().stabilization_window
        );
    }

    #[test]
    fn coordinator_config__rejects_grace_longer_than_fallback() {
        let args = Args::parse_from([
            "guild-dash",
            "--fallback-timeout-ms",
            "500",
            "switch",
            "g1",
        ]);
        assert!(args.coordinator_config().is_err());
    }

    #[test]
    fn describe__shows_pending_switch() {
        let snapshot = SwitchSnapshot {
            selected: Some(GuildId::new("g2")),
            pending: Some(GuildId::new("g2")),
            ..SwitchSnapshot::default()
        };
        assert_eq!(describe(&snapshot), "selected g2 (switching to g2)");
    }
}
