// JDWP connection management
//
// Handles TCP connection, handshake, and event loop startup

use crate::eventloop::{spawn_event_loop, EventLoopHandle};
use crate::events::EventSet;
use crate::protocol::*;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Default capacity of the event channel between the socket reader and consumers
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug)]
pub struct JdwpConnection {
    event_loop: EventLoopHandle,
    next_id: AtomicU32,
}

impl JdwpConnection {
    /// Connect to a JVM via JDWP
    pub async fn connect(host: &str, port: u16) -> JdwpResult<Self> {
        Self::connect_with_buffer(host, port, DEFAULT_EVENT_BUFFER).await
    }

    /// Connect with an explicit event channel capacity
    pub async fn connect_with_buffer(host: &str, port: u16, event_buffer: usize) -> JdwpResult<Self> {
        info!("Connecting to JDWP at {}:{}", host, port);

        let mut stream = TcpStream::connect((host, port)).await?;

        // Perform JDWP handshake
        handshake(&mut stream).await?;

        // Split stream and spawn event loop
        let (reader, writer) = stream.into_split();
        let event_loop = spawn_event_loop(reader, writer, event_buffer.max(1));

        Ok(Self {
            event_loop,
            next_id: AtomicU32::new(1),
        })
    }

    /// Send a command and wait for its reply payload
    ///
    /// A reply carrying a JDWP error code is turned into `JdwpError::JdwpErrorCode`.
    pub async fn send(&self, command_set: u8, command: u8, data: Vec<u8>) -> JdwpResult<Vec<u8>> {
        let packet = CommandPacket::with_data(self.next_id(), command_set, command, data);
        debug!(
            "Sending command {}/{} id={}",
            command_set, command, packet.id
        );
        self.event_loop.send_command(packet).await?.into_result()
    }

    /// Wait for the next event set; `None` once the connection is gone
    pub async fn recv_event(&self) -> Option<EventSet> {
        self.event_loop.recv_event().await
    }

    /// Generate next packet ID
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// Perform JDWP handshake
async fn handshake<S>(stream: &mut S) -> JdwpResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Performing JDWP handshake");

    stream.write_all(JDWP_HANDSHAKE).await?;
    stream.flush().await?;

    let mut buf = vec![0u8; JDWP_HANDSHAKE.len()];
    stream.read_exact(&mut buf).await?;

    if buf != JDWP_HANDSHAKE {
        warn!("Invalid handshake response: {:?}", buf);
        return Err(JdwpError::InvalidHandshake);
    }

    info!("JDWP handshake successful");
    Ok(())
}
