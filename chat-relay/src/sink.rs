use std::{fmt, io, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::debug;

use crate::{
    codec::{self, Transfer},
    protocol::ServerLine,
};

pub type SessionId = u64;

/// Chunks a direct relay may have in flight before the sending session waits
/// for the recipient's writer.
const RELAY_DEPTH: usize = 8;

/// Result of relaying a payload into a recipient's connection.
///
/// Read-side failures are returned as `Err` from [`Sink::relay_from`]; a
/// write-side failure is kept here because the sender's bytes were still
/// consumed.
#[derive(Debug)]
pub struct RelayReport {
    pub transfer: Transfer,
    pub sink_error: Option<io::Error>,
}

/// One unit of output, written to the connection without interleaving.
enum Outbound {
    Line(String),
    File {
        announce: String,
        payload: Arc<[u8]>,
    },
    /// Announce line followed by chunks until the relaying side drops its sender.
    Stream {
        announce: String,
        chunks: mpsc::Receiver<Vec<u8>>,
    },
    Close,
}

/// Outbound half of one connected peer.
///
/// Every connection owns a writer task fed by an unbounded queue, so sending
/// to a peer never waits on that peer's socket. Frames are written in queue
/// order, and a streamed file holds back everything queued behind it until
/// its last chunk is written.
#[derive(Clone)]
pub struct Sink {
    session: SessionId,
    queue: mpsc::UnboundedSender<Outbound>,
}

impl Sink {
    /// Spawns the writer task for `writer` on the current runtime.
    pub fn new<W>(session: SessionId, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (queue, outbound) = mpsc::unbounded_channel();
        tokio::spawn(write_outbound(session, writer, outbound));
        Self { session, queue }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// True once the writer task has stopped and nothing more will be written.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn send(&self, line: &ServerLine) -> io::Result<()> {
        self.enqueue(Outbound::Line(line.to_string()))
    }

    /// Queues an announce line followed by an already buffered payload.
    pub fn send_file(&self, announce: &ServerLine, payload: Arc<[u8]>) -> io::Result<()> {
        self.enqueue(Outbound::File {
            announce: announce.to_string(),
            payload,
        })
    }

    /// Queues an announce line, then streams `size` bytes from `reader`.
    ///
    /// Only the caller waits on the recipient: chunks go through a short
    /// bounded channel to this connection's writer task. If the connection
    /// cannot be written to, the payload is still consumed from `reader`.
    pub async fn relay_from<R>(
        &self,
        announce: &ServerLine,
        reader: &mut R,
        size: u64,
        chunk_size: usize,
    ) -> io::Result<RelayReport>
    where
        R: AsyncRead + Unpin,
    {
        let (chunk_tx, chunks) = mpsc::channel(RELAY_DEPTH);
        let mut sink_error = None;
        let mut chunk_tx = match self.enqueue(Outbound::Stream {
            announce: announce.to_string(),
            chunks,
        }) {
            Ok(()) => Some(chunk_tx),
            Err(err) => {
                sink_error = Some(err);
                None
            }
        };

        let chunk_size = chunk_size.max(1) as u64;
        let mut received = 0u64;
        while received < size {
            let mut chunk = vec![0u8; (size - received).min(chunk_size) as usize];
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            received += n as u64;
            chunk.truncate(n);

            let delivered = match &chunk_tx {
                Some(tx) => tx.send(chunk).await.is_ok(),
                None => continue,
            };
            if !delivered {
                sink_error = Some(writer_stopped());
                chunk_tx = None;
            }
        }

        Ok(RelayReport {
            transfer: Transfer::from_counts(received, size),
            sink_error,
        })
    }

    /// Asks the writer task to flush what is queued and then shut the connection.
    pub fn close(&self) {
        let _ = self.queue.send(Outbound::Close);
    }

    fn enqueue(&self, frame: Outbound) -> io::Result<()> {
        self.queue.send(frame).map_err(|_| writer_stopped())
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

fn writer_stopped() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection writer has stopped")
}

async fn write_outbound<W>(
    session: SessionId,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let result = match frame {
            Outbound::Line(line) => codec::write_line(&mut writer, &line).await,
            Outbound::File { announce, payload } => {
                write_file(&mut writer, &announce, &payload).await
            }
            Outbound::Stream {
                announce,
                mut chunks,
            } => write_stream(&mut writer, &announce, &mut chunks).await,
            Outbound::Close => {
                if let Err(err) = writer.shutdown().await {
                    debug!(session, error = ?err, "failed to shut down connection");
                }
                break;
            }
        };

        if let Err(err) = result {
            debug!(session, error = ?err, "connection writer stopped");
            break;
        }
    }
}

async fn write_file<W>(writer: &mut W, announce: &str, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    codec::write_line(writer, announce).await?;
    codec::write_exact(writer, payload).await
}

async fn write_stream<W>(
    writer: &mut W,
    announce: &str,
    chunks: &mut mpsc::Receiver<Vec<u8>>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    codec::write_line(writer, announce).await?;
    while let Some(chunk) = chunks.recv().await {
        writer.write_all(&chunk).await?;
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_exact, read_line};
    use tokio::io::BufReader;

    fn announce(size: u64) -> ServerLine {
        ServerLine::File {
            from: "alice123".into(),
            filename: "a.bin".into(),
            size,
        }
    }

    #[tokio::test]
    async fn clones_share_one_connection() {
        let (writer, reader) = tokio::io::duplex(256);
        let mut reader = BufReader::new(reader);
        let sink = Sink::new(7, writer);
        let other = sink.clone();

        sink.send(&ServerLine::Prompt).expect("send");
        other.send(&ServerLine::error("bad")).expect("send from clone");

        assert_eq!(other.session(), 7);
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("NOME?"));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("ERRO:bad"));
    }

    #[tokio::test]
    async fn relay_from_writes_announce_then_payload() {
        let (writer, reader) = tokio::io::duplex(256);
        let mut reader = BufReader::new(reader);
        let sink = Sink::new(1, writer);
        let mut sender = BufReader::new(&b"0123456789/msg bob hi\n"[..]);

        let report = sink
            .relay_from(&announce(10), &mut sender, 10, 3)
            .await
            .expect("relay");

        assert_eq!(report.transfer, Transfer::Complete(10));
        assert!(report.sink_error.is_none());
        assert_eq!(
            read_line(&mut sender).await.unwrap().as_deref(),
            Some("/msg bob hi")
        );
        assert_eq!(
            read_line(&mut reader).await.unwrap().as_deref(),
            Some("ARQUIVO:alice123:a.bin:10")
        );
        assert_eq!(read_exact(&mut reader, 10).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn relay_of_zero_bytes_reads_nothing() {
        let (writer, reader) = tokio::io::duplex(256);
        let mut reader = BufReader::new(reader);
        let sink = Sink::new(1, writer);
        let mut sender = &b"next"[..];

        let report = sink
            .relay_from(&announce(0), &mut sender, 0, 4096)
            .await
            .expect("relay");
        sink.send(&ServerLine::Prompt).expect("send");

        assert_eq!(report.transfer, Transfer::Complete(0));
        assert_eq!(sender, b"next");
        assert_eq!(
            read_line(&mut reader).await.unwrap().as_deref(),
            Some("ARQUIVO:alice123:a.bin:0")
        );
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("NOME?"));
    }

    #[tokio::test]
    async fn relay_reports_truncated_sender() {
        let (writer, reader) = tokio::io::duplex(256);
        let mut reader = BufReader::new(reader);
        let sink = Sink::new(1, writer);
        let mut sender = &b"abcd"[..];

        let report = sink
            .relay_from(&announce(10), &mut sender, 10, 4096)
            .await
            .expect("relay");

        assert_eq!(
            report.transfer,
            Transfer::Truncated {
                received: 4,
                expected: 10
            }
        );
        read_line(&mut reader).await.unwrap();
        assert_eq!(read_exact(&mut reader, 4).await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn lines_queued_during_a_stream_follow_its_payload() {
        let (writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);
        let sink = Sink::new(1, writer);
        let (mut upload, mut sender) = tokio::io::duplex(64);

        let relay = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.relay_from(&announce(6), &mut sender, 6, 2).await })
        };
        upload.write_all(b"abc").await.unwrap();
        assert_eq!(
            read_line(&mut reader).await.unwrap().as_deref(),
            Some("ARQUIVO:alice123:a.bin:6")
        );
        assert_eq!(read_exact(&mut reader, 3).await.unwrap(), b"abc");

        // The stalled upload does not make other senders wait.
        sink.send(&ServerLine::error("queued")).expect("send while streaming");

        upload.write_all(b"def").await.unwrap();
        let report = relay.await.unwrap().expect("relay");
        assert_eq!(report.transfer, Transfer::Complete(6));
        assert_eq!(read_exact(&mut reader, 3).await.unwrap(), b"def");
        assert_eq!(
            read_line(&mut reader).await.unwrap().as_deref(),
            Some("ERRO:queued")
        );
    }

    #[tokio::test]
    async fn relay_from_a_closed_connection_still_drains_the_sender() {
        let (writer, reader) = tokio::io::duplex(256);
        drop(reader);
        let sink = Sink::new(1, writer);
        let _ = sink.send(&ServerLine::Prompt);
        while !sink.is_closed() {
            tokio::task::yield_now().await;
        }
        let mut sender = &b"abcnext"[..];

        let report = sink
            .relay_from(&announce(3), &mut sender, 3, 4096)
            .await
            .expect("sender side is healthy");

        assert!(report.sink_error.is_some());
        assert_eq!(report.transfer, Transfer::Complete(3));
        assert_eq!(sender, b"next");
    }

    #[tokio::test]
    async fn close_flushes_queued_lines_before_shutting_down() {
        let (writer, reader) = tokio::io::duplex(256);
        let mut reader = BufReader::new(reader);
        let sink = Sink::new(1, writer);

        sink.send(&ServerLine::error("bye")).expect("send");
        sink.close();

        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("ERRO:bye"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
        while !sink.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(sink.send(&ServerLine::Prompt).is_err());
    }
}
