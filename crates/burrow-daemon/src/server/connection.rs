use std::sync::Arc;

use burrow_protocol::{ClientMessage, DaemonMessage, ErrorCode, decode_payload, encode_payload};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::Daemon;
use crate::errors::DaemonError;
use crate::protocol::{read_message, write_message};
use crate::session::Attachment;

type Incoming = Result<ClientMessage, DaemonError>;

/// Serve one client connection.
///
/// A connection starts as a probe: `info`, `history`, `kill` and `detach`
/// are answered without touching the client set or focus. `attach` turns it
/// into an attached client for the rest of its life.
pub async fn handle_connection(stream: UnixStream, daemon: Arc<Daemon>) {
    let (read_half, mut writer) = stream.into_split();
    let (msg_tx, mut msg_rx) = mpsc::channel(32);
    // Frames are read on their own task so the select loops below never drop a
    // half-read line.
    let reader_task = tokio::spawn(read_loop(read_half, msg_tx));

    if let Err(e) = serve(&daemon, &mut msg_rx, &mut writer).await {
        debug!(
            event = "daemon.connection.closed_with_error",
            error = %e,
        );
    }
    reader_task.abort();
}

async fn read_loop(read_half: OwnedReadHalf, tx: mpsc::Sender<Incoming>) {
    let mut reader = BufReader::new(read_half);
    loop {
        match read_message::<_, ClientMessage>(&mut reader).await {
            Ok(Some(msg)) => {
                if tx.send(Ok(msg)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

async fn send_error(writer: &mut OwnedWriteHalf, err: &DaemonError) -> Result<(), DaemonError> {
    write_message(writer, &DaemonMessage::error(err.wire_code(), err.to_string())).await
}

/// Answer the requests that behave the same attached or not.
fn answer_query(daemon: &Daemon, msg: &ClientMessage) -> Option<DaemonMessage> {
    match msg {
        ClientMessage::Info => Some(DaemonMessage::Info {
            session: daemon.info(),
        }),
        ClientMessage::History { format } => Some(match daemon.history(*format) {
            Ok(data) => DaemonMessage::History {
                data: data.map(|d| encode_payload(&d)),
            },
            Err(e) => {
                warn!(event = "daemon.connection.history_failed", error = %e);
                DaemonMessage::error(e.wire_code(), e.to_string())
            }
        }),
        ClientMessage::Kill => {
            daemon.request_kill();
            Some(DaemonMessage::Ack)
        }
        _ => None,
    }
}

async fn serve(
    daemon: &Arc<Daemon>,
    msg_rx: &mut mpsc::Receiver<Incoming>,
    writer: &mut OwnedWriteHalf,
) -> Result<(), DaemonError> {
    loop {
        let incoming = tokio::select! {
            incoming = msg_rx.recv() => incoming,
            _ = daemon.ended().cancelled() => {
                let exit_code = daemon.exit_code();
                return write_message(writer, &DaemonMessage::SessionEnded { exit_code }).await;
            }
        };
        let Some(incoming) = incoming else {
            return Ok(());
        };
        let msg = match incoming {
            Ok(msg) => msg,
            Err(e) => {
                send_error(writer, &e).await?;
                return Err(e);
            }
        };

        if let Some(response) = answer_query(daemon, &msg) {
            write_message(writer, &response).await?;
            continue;
        }

        match msg {
            ClientMessage::Attach { cols, rows } => {
                let attachment = match daemon.attach(cols, rows) {
                    Ok(attachment) => attachment,
                    Err(e) => {
                        send_error(writer, &e).await?;
                        return Err(e);
                    }
                };
                let id = attachment.id;
                let result = pump(daemon, attachment, msg_rx, writer).await;
                daemon.detach(id);
                return result;
            }
            ClientMessage::Detach => {
                let count = daemon.detach_all();
                debug!(event = "daemon.connection.detach_all", clients = count);
                write_message(writer, &DaemonMessage::Ack).await?;
            }
            ClientMessage::Input { .. } | ClientMessage::Resize { .. } => {
                write_message(
                    writer,
                    &DaemonMessage::error(ErrorCode::ProtocolError, "not attached"),
                )
                .await?;
            }
            other => {
                write_message(
                    writer,
                    &DaemonMessage::error(
                        ErrorCode::ProtocolError,
                        format!("unsupported message: {:?}", other),
                    ),
                )
                .await?;
            }
        }
    }
}

/// Stream a snapshot, then live output, to an attached client while applying
/// its input and resizes.
async fn pump(
    daemon: &Arc<Daemon>,
    attachment: Attachment,
    msg_rx: &mut mpsc::Receiver<Incoming>,
    writer: &mut OwnedWriteHalf,
) -> Result<(), DaemonError> {
    let Attachment {
        id,
        snapshot,
        mut output,
        detach,
        ..
    } = attachment;

    write_message(writer, &DaemonMessage::snapshot(&snapshot)).await?;

    loop {
        tokio::select! {
            biased;
            _ = daemon.ended().cancelled() => {
                // Deliver everything published before the end.
                loop {
                    match output.try_recv() {
                        Ok(chunk) => write_message(writer, &DaemonMessage::output(&chunk)).await?,
                        Err(TryRecvError::Lagged(chunks)) => {
                            write_message(writer, &DaemonMessage::OutputDropped { chunks }).await?
                        }
                        Err(_) => break,
                    }
                }
                let exit_code = daemon.exit_code();
                return write_message(writer, &DaemonMessage::SessionEnded { exit_code }).await;
            }
            _ = detach.cancelled() => {
                return write_message(writer, &DaemonMessage::Detached).await;
            }
            incoming = msg_rx.recv() => {
                let Some(incoming) = incoming else {
                    debug!(event = "daemon.connection.client_gone", client_id = id);
                    return Ok(());
                };
                let msg = match incoming {
                    Ok(msg) => msg,
                    Err(e) => {
                        send_error(writer, &e).await?;
                        return Err(e);
                    }
                };
                if let Some(response) = answer_query(daemon, &msg) {
                    write_message(writer, &response).await?;
                    continue;
                }
                match msg {
                    ClientMessage::Input { data } => match decode_payload(&data) {
                        Ok(bytes) => {
                            if !daemon.send_input(id, bytes) {
                                debug!(event = "daemon.connection.input_ignored", client_id = id);
                            }
                        }
                        Err(e) => send_error(writer, &DaemonError::from(e)).await?,
                    },
                    ClientMessage::Resize { cols, rows } => daemon.resize(id, cols, rows),
                    ClientMessage::Detach => {
                        // Hand focus back before confirming.
                        daemon.detach(id);
                        return write_message(writer, &DaemonMessage::Detached).await;
                    }
                    ClientMessage::Attach { .. } => {
                        write_message(
                            writer,
                            &DaemonMessage::error(ErrorCode::ProtocolError, "already attached"),
                        )
                        .await?;
                    }
                    other => {
                        write_message(
                            writer,
                            &DaemonMessage::error(
                                ErrorCode::ProtocolError,
                                format!("unsupported message: {:?}", other),
                            ),
                        )
                        .await?;
                    }
                }
            }
            chunk = output.recv() => match chunk {
                Ok(chunk) => write_message(writer, &DaemonMessage::output(&chunk)).await?,
                Err(RecvError::Lagged(chunks)) => {
                    warn!(
                        event = "daemon.connection.output_dropped",
                        client_id = id,
                        chunks = chunks,
                    );
                    write_message(writer, &DaemonMessage::OutputDropped { chunks }).await?;
                }
                Err(RecvError::Closed) => {
                    daemon.ended().cancelled().await;
                    let exit_code = daemon.exit_code();
                    return write_message(writer, &DaemonMessage::SessionEnded { exit_code }).await;
                }
            },
        }
    }
}
