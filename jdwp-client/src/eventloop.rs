// JDWP Event Loop
//
// Handles concurrent reading of events and replies from JDWP socket

use crate::events::{parse_event_packet, EventSet};
use crate::protocol::{CommandPacket, JdwpError, JdwpResult, ReplyPacket, HEADER_SIZE, REPLY_FLAG};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Maximum allowed JDWP packet size (10MB)
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Request to send a command and get reply
pub struct CommandRequest {
    pub packet: CommandPacket,
    pub reply_tx: oneshot::Sender<JdwpResult<ReplyPacket>>,
}

/// Handle to the event loop for sending commands and receiving events
#[derive(Clone, Debug)]
pub struct EventLoopHandle {
    command_tx: mpsc::Sender<CommandRequest>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EventSet>>>,
}

impl EventLoopHandle {
    /// Send a command and wait for reply
    pub async fn send_command(&self, packet: CommandPacket) -> JdwpResult<ReplyPacket> {
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = CommandRequest { packet, reply_tx };

        self.command_tx
            .send(request)
            .await
            .map_err(|_| JdwpError::ConnectionClosed)?;

        reply_rx.await.map_err(|_| JdwpError::ConnectionClosed)?
    }

    /// Wait for the next event; `None` after the socket closed
    pub async fn recv_event(&self) -> Option<EventSet> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }
}

/// Start the event loop task
pub fn spawn_event_loop<R, W>(reader: R, writer: W, event_buffer: usize) -> EventLoopHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(event_buffer);

    tokio::spawn(event_loop_task(reader, writer, command_rx, event_tx));

    EventLoopHandle {
        command_tx,
        event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
    }
}

/// Main event loop task
async fn event_loop_task<R, W>(
    reader: R,
    mut writer: W,
    mut command_rx: mpsc::Receiver<CommandRequest>,
    event_tx: mpsc::Sender<EventSet>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    info!("Event loop started");

    // Reads run on their own task so a command send never cancels a partial read
    let mut packet_rx = spawn_packet_reader(reader);

    let mut pending_replies: HashMap<u32, oneshot::Sender<JdwpResult<ReplyPacket>>> =
        HashMap::new();

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("Connection handle dropped");
                    break;
                };
                let packet_id = cmd.packet.id;
                debug!("Sending command id={}", packet_id);

                let encoded = cmd.packet.encode();
                let written = match writer.write_all(&encoded).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    error!("Failed to write command: {}", e);
                    cmd.reply_tx.send(Err(JdwpError::Io(e))).ok();
                    continue;
                }

                pending_replies.insert(packet_id, cmd.reply_tx);
            }

            result = packet_rx.recv() => {
                let result = result.unwrap_or(Err(JdwpError::ConnectionClosed));
                match result {
                    Ok((true, packet_id, data)) => {
                        debug!("Received reply id={}", packet_id);

                        match pending_replies.remove(&packet_id) {
                            Some(tx) => {
                                tx.send(ReplyPacket::decode(&data)).ok();
                            }
                            None => warn!("Received reply for unknown command id={}", packet_id),
                        }
                    }
                    Ok((false, _, data)) => {
                        // Composite event command: data starts after the 11-byte header
                        match parse_event_packet(&data[HEADER_SIZE..]) {
                            Ok(event_set) => {
                                debug!(
                                    "Parsed event set: {} events, suspend_policy={:?}",
                                    event_set.events.len(),
                                    event_set.suspend_policy
                                );
                                // Backpressure instead of dropping: a lost event set would leave
                                // its threads suspended forever
                                if event_tx.send(event_set).await.is_err() {
                                    warn!("Event receiver dropped, future events will be discarded");
                                }
                            }
                            Err(e) => warn!("Failed to parse event: {}", e),
                        }
                    }
                    Err(e) => {
                        error!("Failed to read packet: {}", e);
                        break;
                    }
                }
            }
        }
    }

    for (_, tx) in pending_replies.drain() {
        tx.send(Err(JdwpError::ConnectionClosed)).ok();
    }

    info!("Event loop shutting down");
}

fn spawn_packet_reader<R>(mut reader: R) -> mpsc::Receiver<JdwpResult<(bool, u32, Vec<u8>)>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (packet_tx, packet_rx) = mpsc::channel(32);
    tokio::spawn(async move {
        loop {
            let result = read_packet(&mut reader).await;
            let failed = result.is_err();
            if packet_tx.send(result).await.is_err() || failed {
                break;
            }
        }
    });
    packet_rx
}

/// Read a packet from the socket and determine if it's a reply or event
async fn read_packet<R>(reader: &mut R) -> JdwpResult<(bool, u32, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let packet_id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let flags = header[8];

    if length < HEADER_SIZE {
        return Err(JdwpError::Protocol(format!(
            "Invalid packet length: {}",
            length
        )));
    }

    if length > MAX_PACKET_SIZE {
        return Err(JdwpError::Protocol(format!(
            "Packet too large: {} bytes (max: {} bytes)",
            length, MAX_PACKET_SIZE
        )));
    }

    let mut full_packet = Vec::with_capacity(length);
    full_packet.extend_from_slice(&header);
    full_packet.resize(length, 0);
    reader.read_exact(&mut full_packet[HEADER_SIZE..]).await?;

    Ok((flags == REPLY_FLAG, packet_id, full_packet))
}
