//! # AudioSocket Transport
//!
//! Reads and writes the telephony switch's TCP audio-streaming protocol.
//!
//! ## Wire Format:
//! Every message is `[1-byte kind][2-byte big-endian length][payload]`.
//! - `0x00` hangup (terminal)
//! - `0x01` stream id, a 16-byte binary UUID
//! - `0x03` DTMF digit
//! - `0x10` signed linear 16-bit 8kHz mono PCM
//! - `0xff` error, optional application error code
//!
//! ## Sharing the Connection:
//! The read half belongs to the media relay loop. The write half is shared by the
//! keepalive supervisor and the runner inbound loop through [`TelephonyWriter`];
//! writers hold the lock for one message at a time.

use byteorder::{BigEndian, ByteOrder};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audio::codec::{wrap_pcm16, KIND_SLIN};
use crate::error::{BridgeError, BridgeResult};

const HEADER_SIZE: usize = 3;
const STREAM_ID_SIZE: usize = 16;

/// Upper bound on waiting for the writer lock and shutting the write half down.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Heartbeat written by the keepalive supervisor: one byte of SLIN silence.
pub const KEEPALIVE_FRAME: [u8; 4] = [KIND_SLIN, 0x00, 0x01, 0x00];

/// Shared, type-erased write half of a telephony connection.
pub type TelephonyWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Wrap any write half so it can be shared between session tasks.
pub fn telephony_writer<W>(writer: W) -> TelephonyWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(writer)))
}

/// AudioSocket message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Hangup,
    Id,
    Dtmf,
    Audio,
    Error,
    Other(u8),
}

impl From<u8> for MessageKind {
    fn from(value: u8) -> Self {
        match value {
            0x00 => MessageKind::Hangup,
            0x01 => MessageKind::Id,
            0x03 => MessageKind::Dtmf,
            KIND_SLIN => MessageKind::Audio,
            0xff => MessageKind::Error,
            other => MessageKind::Other(other),
        }
    }
}

/// One decoded AudioSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Message {
    /// Decode the stream id carried by an `Id` message.
    pub fn stream_id(&self) -> BridgeResult<Uuid> {
        if self.kind != MessageKind::Id {
            return Err(BridgeError::Protocol(format!(
                "expected an ID message, got {:?}",
                self.kind
            )));
        }

        Uuid::from_slice(&self.payload).map_err(|_| {
            BridgeError::Protocol(format!(
                "ID payload must be {} bytes, got {}",
                STREAM_ID_SIZE,
                self.payload.len()
            ))
        })
    }
}

/// Read exactly one message from the connection.
pub async fn read_message<R>(reader: &mut R) -> BridgeResult<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let kind = MessageKind::from(header[0]);
    let len = BigEndian::read_u16(&header[1..]) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Message { kind, payload })
}

/// Read the handshake message and return the call's stream id.
///
/// Fails with `Protocol` unless the first message is an `Id`.
pub async fn get_streaming_id<R>(reader: &mut R) -> BridgeResult<Uuid>
where
    R: AsyncRead + Unpin,
{
    let message = read_message(reader).await?;
    message.stream_id()
}

/// Read one message and return its audio payload.
///
/// ## Returns:
/// - `Ok(Some(pcm))` for an `Audio` message with a non-empty payload
/// - `Ok(None)` for anything else; the caller keeps reading
/// - `Err(Hangup)` when the switch ends the call
pub async fn get_next_media<R>(reader: &mut R) -> BridgeResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let message = read_message(reader).await?;

    match message.kind {
        MessageKind::Audio if !message.payload.is_empty() => Ok(Some(message.payload)),
        MessageKind::Hangup => Err(BridgeError::Hangup),
        MessageKind::Error => {
            warn!(code = ?message.payload, "Received AudioSocket error message");
            Ok(None)
        }
        kind => {
            debug!(?kind, len = message.payload.len(), "Skipping AudioSocket message without audio");
            Ok(None)
        }
    }
}

/// Pacing for outbound audio.
#[derive(Debug, Clone, Copy)]
pub struct WritePacing {
    pub fragment_size: usize,
    pub fragment_delay: Duration,
}

impl Default for WritePacing {
    fn default() -> Self {
        Self {
            fragment_size: 320,
            fragment_delay: Duration::from_millis(20),
        }
    }
}

/// Play `pcm` to the telephony leg in paced SLIN fragments.
///
/// Each fragment is wrapped with [`wrap_pcm16`] and written while holding the
/// writer lock; the delay between fragments keeps the switch's read buffer from
/// overrunning. Returns `Cancelled` as soon as the token fires, including
/// while a write is blocked on a switch that stopped reading.
pub async fn write(
    token: &CancellationToken,
    writer: &TelephonyWriter,
    pcm: &[u8],
    pacing: WritePacing,
) -> BridgeResult<()> {
    if pcm.len() % 2 != 0 {
        return Err(BridgeError::InvalidPcm(pcm.len()));
    }

    let mut fragments = pcm.chunks(pacing.fragment_size.max(2)).peekable();
    while let Some(fragment) = fragments.next() {
        if token.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let message = wrap_pcm16(fragment)?;
        send(token, writer, &message).await?;

        if fragments.peek().is_some() {
            tokio::select! {
                _ = token.cancelled() => return Err(BridgeError::Cancelled),
                _ = tokio::time::sleep(pacing.fragment_delay) => {}
            }
        }
    }

    Ok(())
}

/// Write the 4-byte keepalive frame.
pub async fn write_keepalive(token: &CancellationToken, writer: &TelephonyWriter) -> BridgeResult<()> {
    send(token, writer, &KEEPALIVE_FRAME).await
}

/// Write one message under the lock. The lock is released when the token fires.
async fn send(token: &CancellationToken, writer: &TelephonyWriter, message: &[u8]) -> BridgeResult<()> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(BridgeError::Cancelled),
        res = async {
            let mut conn = writer.lock().await;
            conn.write_all(message).await?;
            conn.flush().await?;
            Ok::<(), BridgeError>(())
        } => res,
    }
}

/// Close the write half, giving up after [`CLOSE_TIMEOUT`]. Errors from an
/// already-closed connection are returned to the caller, which logs them.
pub async fn close(writer: &TelephonyWriter) -> BridgeResult<()> {
    let shutdown = async {
        let mut conn = writer.lock().await;
        conn.shutdown().await
    };

    match tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await {
        Ok(res) => Ok(res?),
        Err(_) => Err(BridgeError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out closing the telephony connection",
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::duplex;

    pub(crate) fn id_message(id: &Uuid) -> Vec<u8> {
        let mut res = vec![0x01, 0x00, 0x10];
        res.extend_from_slice(id.as_bytes());
        res
    }

    pub(crate) fn audio_message(pcm: &[u8]) -> Vec<u8> {
        let mut res = vec![0x10];
        res.extend_from_slice(&(pcm.len() as u16).to_be_bytes());
        res.extend_from_slice(pcm);
        res
    }

    #[tokio::test]
    async fn test_get_streaming_id() {
        let id = Uuid::new_v4();
        let (mut client, mut server) = duplex(1024);
        client.write_all(&id_message(&id)).await.unwrap();

        assert_eq!(get_streaming_id(&mut server).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_get_streaming_id_rejects_audio_first() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(&audio_message(&[0, 0])).await.unwrap();

        assert!(matches!(get_streaming_id(&mut server).await, Err(BridgeError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_get_streaming_id_rejects_short_id() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(&[0x01, 0x00, 0x02, 0xab, 0xcd]).await.unwrap();

        assert!(matches!(get_streaming_id(&mut server).await, Err(BridgeError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_get_next_media_sequence() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(&audio_message(&[1, 2, 3, 4])).await.unwrap();
        client.write_all(&[0x03, 0x00, 0x01, b'5']).await.unwrap();
        client.write_all(&[0x10, 0x00, 0x00]).await.unwrap();
        client.write_all(&[0x42, 0x00, 0x00]).await.unwrap();
        client.write_all(&[0x00, 0x00, 0x00]).await.unwrap();

        assert_eq!(get_next_media(&mut server).await.unwrap(), Some(vec![1, 2, 3, 4]));
        assert_eq!(get_next_media(&mut server).await.unwrap(), None);
        assert_eq!(get_next_media(&mut server).await.unwrap(), None);
        assert_eq!(get_next_media(&mut server).await.unwrap(), None);
        assert!(matches!(get_next_media(&mut server).await, Err(BridgeError::Hangup)));
    }

    #[tokio::test]
    async fn test_get_next_media_eof_is_io_error() {
        let (client, mut server) = duplex(1024);
        drop(client);

        assert!(matches!(get_next_media(&mut server).await, Err(BridgeError::Io(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_fragments_and_paces() {
        let (local, mut remote) = duplex(64 * 1024);
        let writer = telephony_writer(local);
        let token = CancellationToken::new();
        let pcm: Vec<u8> = (0..800u32).map(|i| (i % 251) as u8).collect();

        let started = tokio::time::Instant::now();
        write(&token, &writer, &pcm, WritePacing::default()).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(40));

        let mut received = Vec::new();
        for expected in [320usize, 320, 160] {
            let message = read_message(&mut remote).await.unwrap();
            assert_eq!(message.kind, MessageKind::Audio);
            assert_eq!(message.payload.len(), expected);
            received.extend_from_slice(&message.payload);
        }
        assert_eq!(received, pcm);
    }

    #[tokio::test]
    async fn test_write_aborts_when_cancelled() {
        let (local, _remote) = duplex(64 * 1024);
        let writer = telephony_writer(local);
        let token = CancellationToken::new();
        token.cancel();

        let res = write(&token, &writer, &[0u8; 640], WritePacing::default()).await;
        assert!(matches!(res, Err(BridgeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_write_rejects_odd_pcm() {
        let (local, _remote) = duplex(1024);
        let writer = telephony_writer(local);
        let token = CancellationToken::new();

        let res = write(&token, &writer, &[0u8; 5], WritePacing::default()).await;
        assert!(matches!(res, Err(BridgeError::InvalidPcm(5))));
    }

    #[tokio::test]
    async fn test_write_keepalive() {
        let (local, mut remote) = duplex(1024);
        let writer = telephony_writer(local);
        write_keepalive(&CancellationToken::new(), &writer).await.unwrap();

        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, KEEPALIVE_FRAME);
    }

    #[tokio::test]
    async fn test_blocked_write_releases_lock_on_cancel() {
        // the remote never reads, so the first fragment fills the pipe
        let (local, _remote) = duplex(16);
        let writer = telephony_writer(local);
        let token = CancellationToken::new();

        let task = tokio::spawn({
            let token = token.clone();
            let writer = writer.clone();
            async move { write(&token, &writer, &[0u8; 640], WritePacing::default()).await }
        });
        tokio::task::yield_now().await;

        token.cancel();
        let res = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(matches!(res, Err(BridgeError::Cancelled)));

        tokio::time::timeout(Duration::from_secs(2), close(&writer))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_times_out_when_writer_is_held() {
        let (local, _remote) = duplex(16);
        let writer = telephony_writer(local);
        let _held = writer.lock().await;

        let res = close(&writer).await;
        assert!(matches!(res, Err(BridgeError::Io(err)) if err.kind() == std::io::ErrorKind::TimedOut));
    }
}
