//! taskboard-watch - follow taskboard notifications from the terminal
//!
//! Logs in, opens the notification push channel and prints every
//! notification. Anti-abuse challenges are asked on stdin.

mod config;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskboard_client::{
    ChallengePrompt, ChannelChallengeHandler, ConnectionState, CredentialStore, Notification,
    RealtimeChannel, RequestGateway, SessionEvent, TaskboardApi,
};

use config::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "taskboard_watch={level},taskboard_client={level}",
            level = args.log_level
        )
        .into()
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!(api = %args.api_url, ws = %args.ws_url, user = %args.username, "Starting taskboard-watch");

    let (handler, prompts) = ChannelChallengeHandler::channel(1);
    tokio::spawn(answer_from_stdin(prompts));

    let gateway = RequestGateway::builder(args.client_config())
        .challenge_handler(Arc::new(handler))
        .build()?;
    let api = TaskboardApi::new(gateway.clone());
    let mut session = gateway.events().subscribe();

    let auth = api.login(&args.username, &args.password).await?;
    info!(role = ?auth.user.role, "Authenticated as {}", auth.user.username);

    match api.unread_count().await {
        Ok(unread) => info!(count = unread.count, "Unread notifications"),
        Err(e) => warn!(error = %e, "Could not fetch unread count"),
    }

    let channel = RealtimeChannel::new(args.channel_config());
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Notification>();
    let subscription = channel.subscribe(move |notification: &Notification| {
        let _ = seen_tx.send(notification.clone());
    });

    let Some(credential) = gateway.credentials().get() else {
        anyhow::bail!("login returned no access credential");
    };
    channel.connect(credential.access);
    let mut state = channel.watch_state();

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break Ok(());
            }
            Some(notification) = seen_rx.recv() => {
                print_notification(&notification);
                if args.mark_read {
                    channel.mark_read(notification.id);
                }
            }
            event = session.recv() => match event {
                Ok(SessionEvent::SessionEnded { reason }) => {
                    error!(reason = %reason, "Session ended");
                    break Err(anyhow::anyhow!("session ended: {}", reason));
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped = skipped, "Session events skipped"),
                Err(RecvError::Closed) => break Ok(()),
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *state.borrow_and_update();
                debug!(state = ?current, "Push channel state changed");
                if current == ConnectionState::Exhausted {
                    break Err(anyhow::anyhow!("push channel gave up reconnecting"));
                }
            }
        }
    };

    subscription.unsubscribe();
    channel.disconnect();
    api.logout().await;
    outcome
}

fn print_notification(notification: &Notification) {
    let task = notification
        .task_title
        .as_deref()
        .map(|title| format!(" [{}]", title))
        .unwrap_or_default();
    println!(
        "{} {:?}{} {}",
        notification.created_at.format("%Y-%m-%d %H:%M"),
        notification.notification_type,
        task,
        notification.message
    );
}

/// Ask each challenge on stdin. An empty line or EOF cancels it.
async fn answer_from_stdin(mut prompts: mpsc::Receiver<ChallengePrompt>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(prompt) = prompts.recv().await {
        eprintln!("Verification required: {}", prompt.challenge.question);
        eprint!("Answer (empty to cancel): ");
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => prompt.answer(line.trim()),
            Ok(_) => prompt.cancel(),
            Err(e) => {
                warn!(error = %e, "Could not read challenge answer");
                prompt.cancel();
            }
        }
    }
}
