use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, load_settings_from, Settings},
    orchestrator::parse_duration_days,
    ElectionSession, ElectionView, SessionEvent, TransactionOrchestrator,
};
use shared::{
    domain::{CandidateId, TxHash, TxKind},
    error::ElectionError,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Without a log subscription, `watch` re-reads the contract this often.
const POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "ballot", about = "Inspect and drive an on-chain election")]
struct Cli {
    /// Config file (defaults to ./ballot.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    rpc_url: Option<String>,
    #[arg(long)]
    ws_url: Option<String>,
    #[arg(long)]
    contract: Option<String>,
    /// Account transactions are sent from; the node signs for it.
    #[arg(long)]
    account: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current election state once.
    Status,
    /// Keep a live dashboard on screen until Ctrl-C.
    Watch,
    AddCandidate {
        name: String,
    },
    /// Open voting for a number of days.
    Start {
        #[arg(long)]
        days: String,
    },
    End,
    Vote {
        #[arg(long)]
        candidate: u64,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        let mut settings = match &self.config {
            Some(path) => load_settings_from(path),
            None => load_settings(),
        };
        if let Some(v) = &self.rpc_url {
            settings.rpc_url = v.clone();
        }
        if let Some(v) = &self.ws_url {
            settings.ws_url = Some(v.clone());
        }
        if let Some(v) = &self.contract {
            settings.contract_address = Some(v.clone());
        }
        if let Some(v) = &self.account {
            settings.account = Some(v.clone());
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let settings = cli.settings();

    let session = ElectionSession::from_settings(&settings)
        .context("failed to set up the election session")?;
    session
        .refresh()
        .await
        .context("failed to read election state")?;

    let outcome = match cli.command {
        Command::Status => {
            print_dashboard(&session).await;
            Ok(())
        }
        Command::Watch => watch(&session, &settings).await,
        Command::AddCandidate { name } => {
            warn_unless_admin(&session).await;
            run_action(&session, TxKind::AddCandidate, session.add_candidate(&name)).await
        }
        Command::Start { days } => {
            warn_unless_admin(&session).await;
            let days = parse_duration_days(&days)?;
            run_action(&session, TxKind::StartVoting, session.start_voting(days)).await
        }
        Command::End => {
            warn_unless_admin(&session).await;
            if let Some(phase) = session.phase().await {
                if !TransactionOrchestrator::can_end_voting(phase) {
                    warn!(%phase, "voting is not active; the contract will likely reject this");
                }
            }
            run_action(&session, TxKind::EndVoting, session.end_voting()).await
        }
        Command::Vote { candidate } => {
            run_action(
                &session,
                TxKind::CastVote,
                session.cast_vote(CandidateId(candidate)),
            )
            .await
        }
    };

    session.shutdown().await;
    outcome
}

async fn warn_unless_admin(session: &ElectionSession) {
    if !session.is_admin().await {
        warn!("connected account is not the election admin");
    }
}

async fn run_action(
    session: &ElectionSession,
    kind: TxKind,
    action: impl Future<Output = Result<TxHash, ElectionError>>,
) -> Result<()> {
    println!("{}", kind.pending_label());
    match action.await {
        Ok(tx_hash) => {
            println!("{} ({tx_hash})", kind.success_label());
            if let Err(err) = session.refresh().await {
                warn!("could not refresh after {kind}: {err}");
            }
            print_dashboard(session).await;
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", err.message());
            Err(err).with_context(|| format!("{kind} failed"))
        }
    }
}

async fn watch(session: &Arc<ElectionSession>, settings: &Settings) -> Result<()> {
    session.spawn_refresh_listener().await;
    let mut events = session.subscribe();

    let contract = settings.contract_address()?;
    let pushed = match settings.ws_endpoint() {
        Ok(ws_url) => match session.attach_event_feed(ws_url.as_str(), &contract).await {
            Ok(()) => true,
            Err(err) => {
                warn!("log subscription unavailable, polling instead: {err:#}");
                false
            }
        },
        Err(err) => {
            warn!("no usable websocket endpoint, polling instead: {err:#}");
            false
        }
    };

    print_dashboard(session).await;
    let mut ticks = tokio::time::interval(settings.tick_interval);
    let mut polls = tokio::time::interval(POLL_INTERVAL);
    polls.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("stopping watch");
                break;
            }
            _ = ticks.tick() => {
                println!("Time remaining: {}", session.countdown_label().await);
            }
            _ = polls.tick(), if !pushed => {
                let _ = session.refresh().await;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Refreshed(view)) => render(session, &view).await,
                Ok(SessionEvent::Transaction(request)) => {
                    if let Some(label) = request.label() {
                        println!("[{}] {label}", request.kind);
                    }
                }
                Ok(SessionEvent::Contract(event)) => println!("event: {}", event.name()),
                Ok(SessionEvent::RefreshFailed(message)) => eprintln!("refresh failed: {message}"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn print_dashboard(session: &ElectionSession) {
    match session.view().await {
        Some(view) => render(session, &view).await,
        None => println!("election state not loaded"),
    }
}

async fn render(session: &ElectionSession, view: &ElectionView) {
    println!("Status: {}", view.status_label());
    println!("Time remaining: {}", session.countdown_label().await);
    println!(
        "Voting window: {} to {}",
        view.window_start_label(),
        view.window_end_label()
    );
    match view.leader_votes {
        Some(votes) => println!("Leader: {} ({votes} votes)", view.leader_label()),
        None => println!("Leader: {}", view.leader_label()),
    }
    println!("Total votes: {}", view.total_votes);
    println!("{}", view.candidate_count_label());
    for row in &view.rows {
        let marker = if row.is_leader { " *" } else { "" };
        println!(
            "  #{} {}: {} votes ({}%){marker}",
            row.id,
            row.name,
            row.votes,
            row.percentage_label()
        );
    }
    if let Some(voter) = session.voter().await {
        let role = if session.is_admin().await { " (admin)" } else { "" };
        let voted = if voter.has_voted { "yes" } else { "no" };
        println!("Account: {}{role}, voted: {voted}", voter.address);
    }
}
