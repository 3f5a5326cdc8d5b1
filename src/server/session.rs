//! One import session per websocket connection.
//!
//! Lifecycle: await the JSON header, confirm it, then run two tasks until
//! both finish — a producer moving binary frames from the socket into the
//! byte pipe, and a consumer running the import against the pipe's read
//! end. The pipe's writer half is owned by the producer, so end-of-stream
//! is guaranteed whenever the producer loop exits and the consumer can
//! never be left blocked. Failures on either side are logged and relayed
//! to the client as `msg` lines; a failed import still closes cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::server::protocol::{ClientMessage, HeaderPayload, ServerMessage};
use crate::services::import::{ImportNotice, ImportNotifier, ImportService};
use crate::services::pipe::{byte_pipe, PipeWriter};

/// Maximum buffered, unread chunks in the byte pipe.
const PIPE_CAPACITY: usize = 3500;
/// Backlog depth at which the client is told to slow down.
const TOO_FAST_THRESHOLD: usize = 3000;
/// How long the producer pauses after signalling `toofast`.
const TOO_FAST_PAUSE: Duration = Duration::from_secs(3);
/// Grace period between `finished` and the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const OUTBOUND_BUFFER: usize = 64;

enum Outbound {
    Message(ServerMessage),
    Close,
}

/// Drive one websocket connection through a full import session.
pub async fn run_session(socket: WebSocket, service: Arc<ImportService>) {
    let (sink, mut stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(write_outbound(out_rx, sink));

    let socket_usable = import_over_socket(&mut stream, &out_tx, service).await;

    if socket_usable {
        let _ = out_tx
            .send(Outbound::Message(ServerMessage::finished()))
            .await;
        tokio::time::sleep(CLOSE_GRACE).await;
        let _ = out_tx.send(Outbound::Close).await;
    }

    drop(out_tx);
    let _ = writer.await;
}

/// Run the session body. Returns whether the socket is still usable for
/// the `finished`/close sequence.
async fn import_over_socket(
    stream: &mut SplitStream<WebSocket>,
    out_tx: &mpsc::Sender<Outbound>,
    service: Arc<ImportService>,
) -> bool {
    // AwaitingHeader
    let header = match receive_header(stream).await {
        Ok(Some(header)) => header,
        Ok(None) => {
            debug!("connection closed before a header arrived");
            return false;
        }
        Err(e) => {
            warn!("failed to read import header: {e:#}");
            let _ = out_tx
                .send(Outbound::Message(ServerMessage::Msg(format!("{e:#}"))))
                .await;
            return true;
        }
    };

    let context = match header.into_context() {
        Ok(context) => context,
        Err(e) => {
            warn!("rejected import header: {e}");
            let _ = out_tx
                .send(Outbound::Message(ServerMessage::Msg(e.to_string())))
                .await;
            return true;
        }
    };

    info!(
        kind = context.kind.as_str(),
        batch_size = context.batch_size,
        groups = context.groups.len(),
        "import header accepted"
    );

    // HeaderConfirmed
    let _ = out_tx
        .send(Outbound::Message(ServerMessage::header_confirmed()))
        .await;

    // Streaming
    let (pipe_writer, pipe_reader) = byte_pipe(PIPE_CAPACITY);
    let consumer_finished = Arc::new(AtomicBool::new(false));
    let (notifier, mut notices) = ImportNotifier::channel(pipe_writer.gauge());

    let relay_out = out_tx.clone();
    let relay = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            let text = match notice {
                ImportNotice::Progress {
                    total_processed,
                    buffered_chunks,
                } => format!("Total processed {total_processed}, buffered chunks: {buffered_chunks}"),
                ImportNotice::RecordFailed(result) => {
                    if result.success {
                        continue;
                    }
                    let detail = result.message.unwrap_or_else(|| "record skipped".to_string());
                    match result.contact_guid {
                        Some(guid) => format!("contact {guid}: {detail}"),
                        None => detail,
                    }
                }
            };
            let _ = relay_out.try_send(Outbound::Message(ServerMessage::Msg(text)));
        }
    });

    let consumer_flag = Arc::clone(&consumer_finished);
    let consumer_out = out_tx.clone();
    let consumer = tokio::spawn(async move {
        let result = service.run_import(pipe_reader, context, notifier).await;
        consumer_flag.store(true, Ordering::SeqCst);
        if result.is_ok() {
            let _ = consumer_out.try_send(Outbound::Message(ServerMessage::Msg(
                "...finished".to_string(),
            )));
        }
        result
    });

    // The producer runs in this task; the pipe writer is consumed by it and
    // dropped on every exit path, which completes the stream for the consumer.
    let mut socket_usable = true;
    match run_producer(stream, pipe_writer, out_tx, &consumer_finished).await {
        Ok(()) => {}
        Err(e) => {
            socket_usable = false;
            error!("producer transport failure: {e}");
        }
    }

    // Draining
    match consumer.await {
        Ok(Ok(total)) => info!("import session complete: {total} records processed"),
        Ok(Err(e)) => {
            error!("import failed: {e:#}");
            let _ = out_tx
                .send(Outbound::Message(ServerMessage::Msg(format!("{e:#}"))))
                .await;
        }
        Err(e) => {
            error!("import task aborted: {e}");
            let _ = out_tx
                .send(Outbound::Message(ServerMessage::Msg(
                    "import task aborted".to_string(),
                )))
                .await;
        }
    }

    let _ = relay.await;
    socket_usable
}

/// Read frames until a complete header message arrives. `Ok(None)` means
/// the peer went away first.
async fn receive_header(stream: &mut SplitStream<WebSocket>) -> Result<Option<HeaderPayload>> {
    while let Some(frame) = stream.next().await {
        match frame.context("websocket error while awaiting header")? {
            Message::Text(text) => {
                let message: ClientMessage =
                    serde_json::from_str(text.as_str()).context("invalid header message")?;
                return match message {
                    ClientMessage::Header { payload } => Ok(Some(payload.unwrap_or_default())),
                    ClientMessage::Done => Ok(None),
                };
            }
            Message::Close(_) => return Ok(None),
            // Binary or ping/pong before the header is not meaningful.
            _ => {}
        }
    }
    Ok(None)
}

/// Receive loop: binary frames go into the pipe, each acknowledged with a
/// `progress` message; a growing backlog triggers `toofast` plus a pause.
/// Stops on `done`, on transport closure or error, or once the consumer
/// has already finished.
async fn run_producer(
    stream: &mut SplitStream<WebSocket>,
    writer: PipeWriter,
    out_tx: &mpsc::Sender<Outbound>,
    consumer_finished: &AtomicBool,
) -> Result<(), axum::Error> {
    while !consumer_finished.load(Ordering::SeqCst) {
        let frame = match stream.next().await {
            None => break,
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(e),
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Done) => break,
                Ok(ClientMessage::Header { .. }) => {
                    let _ = out_tx.try_send(Outbound::Message(ServerMessage::Msg(
                        "unexpected header after streaming started".to_string(),
                    )));
                }
                Err(_) => debug!("ignoring unrecognized text frame"),
            },
            Message::Binary(bytes) => {
                let count = bytes.len();
                if writer.write(bytes.to_vec()).await.is_err() {
                    // Consumer is gone; nothing left to feed.
                    break;
                }
                let _ = out_tx.try_send(Outbound::Message(ServerMessage::Progress(count)));

                if writer.pending_chunks() > TOO_FAST_THRESHOLD {
                    let backlog = writer.pending_chunks();
                    let _ = out_tx.try_send(Outbound::Message(ServerMessage::too_fast()));
                    let _ = out_tx.try_send(Outbound::Message(ServerMessage::Msg(format!(
                        "Too fast, waiting {}s, buffered chunks: {backlog}",
                        TOO_FAST_PAUSE.as_secs()
                    ))));
                    tokio::time::sleep(TOO_FAST_PAUSE).await;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    writer.complete();
    Ok(())
}

/// Single writer for the socket's send half. Telemetry senders use
/// `try_send` so a slow client drops progress lines instead of stalling
/// the import; control messages use awaited sends.
async fn write_outbound(
    mut rx: mpsc::Receiver<Outbound>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Message(message) => {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("failed to serialize outbound message: {e}");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "Standard closing".into(),
                    })))
                    .await;
                break;
            }
        }
    }
}
