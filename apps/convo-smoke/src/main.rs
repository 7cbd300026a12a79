mod config;
mod logging;

use std::{collections::HashSet, env, error::Error, process::ExitCode, sync::Arc};

use convo_core::{MessageId, MessageRecord, Peer, Sender, SessionEvent};
use convo_runtime::{HttpHistoryFetcher, RuntimeConfig, WsTransport, derive_ws_url, spawn_runtime};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{error, info, warn};

use config::SmokeConfig;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting convo-smoke");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "convo-smoke failed");
            eprintln!("convo-smoke: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = SmokeConfig::from_env()?;
    let peer_id = config.resolve_peer(env::args().nth(1))?;
    let ws_url = match &config.ws_url {
        Some(url) => url.clone(),
        None => derive_ws_url(&config.base_url)?,
    };
    info!(
        base_url = %config.base_url,
        ws_url = %ws_url,
        self_id = %config.self_id,
        peer_id = %peer_id,
        history_limit = config.history_limit,
        "smoke config loaded"
    );

    let fetcher =
        HttpHistoryFetcher::new(&config.base_url, config.history_limit, config.http_timeout)?;
    let transport = WsTransport::new(&ws_url)?;
    let handle = spawn_runtime(
        config.self_id.clone(),
        RuntimeConfig {
            timeline_max_items: config.timeline_max_items,
            ..RuntimeConfig::default()
        },
        Arc::new(fetcher),
        Arc::new(transport),
    );

    let mut events = handle.subscribe();
    handle.select_conversation(Peer::new(peer_id)).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = HashSet::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(event, &mut printed),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(err) = handle.send(line).await {
                        println!("! {}: {}", err.code, err.message);
                    }
                }
                None => break,
            },
        }
    }

    info!("stdin closed; tearing down");
    handle.teardown().await?;
    Ok(())
}

/// Print what changed since the last event. Each record is printed once,
/// even when it is merged below records already shown.
fn print_event(event: SessionEvent, printed: &mut HashSet<MessageId>) {
    match event {
        SessionEvent::ConversationSelected { key } => {
            printed.clear();
            println!("-- conversation {key}");
        }
        SessionEvent::TimelineUpdated { records, .. } => {
            for record in unseen(&records, printed) {
                println!("{}", render(record));
            }
        }
        SessionEvent::ConnectionStateChanged { key, state } => {
            println!("-- {key}: {state:?}");
        }
        SessionEvent::Error { error } => {
            println!("! {}: {}", error.code, error.message);
        }
    }
}

/// Records not printed yet, in timeline order. Marks them as printed.
fn unseen<'a>(
    records: &'a [MessageRecord],
    printed: &mut HashSet<MessageId>,
) -> Vec<&'a MessageRecord> {
    records
        .iter()
        .filter(|record| printed.insert(record.id))
        .collect()
}

fn render(record: &MessageRecord) -> String {
    let author = if record.is_self {
        "me".to_owned()
    } else {
        match &record.sender {
            Sender::Participant(id) => id.to_string(),
            Sender::Unknown => "?".to_owned(),
        }
    };
    format!("[{}] {author}: {}", record.id, record.content)
}
