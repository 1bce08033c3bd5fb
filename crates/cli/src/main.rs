use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use rtc_client_core::adapter::{JoinBehavior, OfflineReason, SimulatedEngine};
use rtc_client_core::{
    AudioProfile, ChannelConfig, JoinOutcome, RtcSessionBuilder, SessionConfig, SessionEventHandler, UserId,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Join an RTC channel on the simulated engine", long_about = None)]
struct Args {
    /// Session configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application id, overrides the config file
    #[arg(long, env = "RTC_APP_ID")]
    app_id: Option<String>,

    /// Channel to join; defaults to the configured default channel
    #[arg(short = 'n', long)]
    channel: Option<String>,

    /// Access token for the join
    #[arg(long)]
    token: Option<String>,

    /// Requested local uid; the engine assigns one when omitted
    #[arg(short, long)]
    uid: Option<UserId>,

    /// Audio profile (default, music-standard, music-high-quality, speech-standard)
    #[arg(short, long)]
    profile: Option<AudioProfile>,

    /// Remote uids the simulated engine announces after the join
    #[arg(short, long, value_delimiter = ',')]
    remote_participants: Vec<UserId>,

    /// Delay before the simulated engine confirms the join
    #[arg(long, default_value = "50")]
    join_delay_ms: u64,

    /// Make the simulated join fail with an invalid-token error
    #[arg(long)]
    fail_join: bool,

    /// Mute the local microphone once joined
    #[arg(short, long)]
    mute: bool,

    /// Seconds to stay in the channel (Ctrl-C leaves early)
    #[arg(short, long, default_value = "2")]
    stay_secs: u64,

    /// Print every session event as a JSON line
    #[arg(long)]
    json: bool,
}

/// Prints session activity in human readable form
struct ConsolePrinter;

#[async_trait]
impl SessionEventHandler for ConsolePrinter {
    async fn on_log_message(&self, text: String) {
        println!("  · {}", text);
    }

    async fn on_connection_state_changed(&self, connected: bool) {
        println!("{}", if connected { "● connected" } else { "○ disconnected" });
    }

    async fn on_local_join_confirmed(&self, channel: String, uid: UserId) {
        println!("joined {} as uid {}", channel, uid);
    }

    async fn on_participant_joined(&self, uid: UserId) {
        println!("+ participant {}", uid);
    }

    async fn on_participant_left(&self, uid: UserId, reason: OfflineReason) {
        println!("- participant {} ({:?})", uid, reason);
    }
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(app_id) = &args.app_id {
        config.app_id = app_id.clone();
    }
    if let Some(profile) = args.profile {
        config.audio_profile = profile;
    }
    Ok(config)
}

fn channel_config(args: &Args, config: &SessionConfig) -> Result<ChannelConfig> {
    let mut channel = match &args.channel {
        Some(name) => ChannelConfig::new(name.clone()).with_audio_profile(config.audio_profile),
        None => config
            .default_channel_config()
            .context("no --channel given and no default_channel configured")?,
    };
    if let Some(token) = &args.token {
        channel = channel.with_token(token.clone());
    }
    if let Some(uid) = args.uid {
        channel = channel.with_requested_uid(uid);
    }
    Ok(channel)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = session_config(&args)?;
    let channel = channel_config(&args, &config)?;

    let delay = Duration::from_millis(args.join_delay_ms);
    let engine = SimulatedEngine::new()
        .with_default_join(JoinBehavior::succeed_after(delay))
        .with_remote_participants(args.remote_participants.iter().copied());
    if args.fail_join {
        engine.script_join(JoinBehavior::fail(110, "invalid token", delay));
    }

    let session = RtcSessionBuilder::from_config(config)
        .simulated(engine)
        .build()
        .await?;
    info!("session {} ready", session.session_id());

    let printer = if args.json {
        let mut events = session.subscribe_events();
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("cannot encode event: {}", e),
                    },
                    Err(RecvError::Lagged(skipped)) => warn!("skipped {} events", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    } else {
        session.add_event_handler(Arc::new(ConsolePrinter));
        None
    };

    session.initialize_from_config().await?;

    match session.join_channel(channel).await? {
        JoinOutcome::Success(uid) => info!("in {:?} as uid {}", session.current_channel(), uid),
        JoinOutcome::Failure(reason) => {
            session.dispose().await;
            bail!("join failed: {}", reason);
        }
    }

    if args.mute {
        session.set_audio_muted(true).await?;
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.stay_secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted, leaving"),
    }

    let stats = session.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    session.leave_channel().await?;
    session.dispose().await;

    drop(session);
    if let Some(printer) = printer {
        let _ = tokio::time::timeout(Duration::from_millis(500), printer).await;
    }
    Ok(())
}
