//! Contract log decoding and the `eth_subscribe` feed that pushes them.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared::{
    domain::{Address, CandidateId},
    protocol::{ContractEvent, JsonRpcRequest, LogEntry, SubscriptionNotification},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{
    abi::{self, signatures},
    RemoteError, RemoteResult,
};

/// Decodes one log emitted by the contract. Logs from unknown events and
/// logs dropped by a reorg yield `None`.
pub fn decode_log(log: &LogEntry) -> RemoteResult<Option<ContractEvent>> {
    if log.removed {
        return Ok(None);
    }
    let Some(topic0) = log.topics.first().map(|t| t.to_ascii_lowercase()) else {
        return Ok(None);
    };
    let data = abi::decode_hex(&log.data)?;

    let event = if topic0 == abi::event_topic(signatures::CANDIDATE_ADDED) {
        ContractEvent::CandidateAdded {
            candidate_id: CandidateId(abi::decode_uint(&topic(log, 1)?)?),
            name: abi::decode_string(&data)?,
        }
    } else if topic0 == abi::event_topic(signatures::VOTE_CAST) {
        ContractEvent::VoteCast {
            voter: abi::decode_address(&topic(log, 1)?)?,
            candidate_id: CandidateId(abi::decode_uint(&topic(log, 2)?)?),
        }
    } else if topic0 == abi::event_topic(signatures::VOTING_STARTED) {
        let (start, end) = abi::decode_uint_pair(&data)?;
        ContractEvent::VotingStarted { start, end }
    } else if topic0 == abi::event_topic(signatures::VOTING_ENDED) {
        ContractEvent::VotingEnded {
            end: abi::decode_uint(&data)?,
        }
    } else {
        return Ok(None);
    };
    Ok(Some(event))
}

fn topic(log: &LogEntry, index: usize) -> RemoteResult<Vec<u8>> {
    let raw = log.topics.get(index).ok_or_else(|| {
        RemoteError::Corrupt(format!("log is missing indexed topic {index}"))
    })?;
    Ok(abi::decode_hex(raw)?)
}

/// Opens a websocket to the node, subscribes to the contract's logs and
/// forwards every decoded event to `events` until the socket closes.
pub async fn spawn_log_subscription(
    ws_url: &str,
    contract: &Address,
    events: broadcast::Sender<ContractEvent>,
) -> Result<JoinHandle<()>> {
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
    let (mut ws_writer, mut ws_reader) = ws_stream.split();

    let request = JsonRpcRequest::new(
        1,
        "eth_subscribe",
        json!(["logs", { "address": contract }]),
    );
    ws_writer
        .send(Message::Text(serde_json::to_string(&request)?))
        .await
        .context("failed to send eth_subscribe")?;
    info!(contract = %contract, "events: subscribing to contract logs");

    Ok(tokio::spawn(async move {
        // The writer half stays alive so the node keeps the subscription open.
        let _ws_writer = ws_writer;
        while let Some(msg) = ws_reader.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_frame(&text, &events),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("events: websocket receive failed: {err}");
                    break;
                }
            }
        }
        info!("events: subscription closed");
    }))
}

fn handle_frame(text: &str, events: &broadcast::Sender<ContractEvent>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("events: invalid frame: {err}");
            return;
        }
    };

    if frame.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        if let Some(error) = frame.get("error") {
            warn!(%error, "events: subscription rejected");
        } else if let Some(id) = frame.get("result") {
            debug!(subscription = %id, "events: subscription confirmed");
        }
        return;
    }

    let notification = match serde_json::from_value::<SubscriptionNotification>(frame) {
        Ok(notification) => notification,
        Err(err) => {
            warn!("events: invalid notification: {err}");
            return;
        }
    };
    match decode_log(&notification.params.result) {
        Ok(Some(event)) => {
            debug!(event = event.name(), "events: contract event");
            let _ = events.send(event);
        }
        Ok(None) => {}
        Err(err) => warn!("events: undecodable log: {err}"),
    }
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
