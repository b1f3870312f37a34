use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How far a bounded copy from a sender's stream got before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Every announced byte was read.
    Complete(u64),
    /// The sender's stream ended early.
    Truncated { received: u64, expected: u64 },
}

impl Transfer {
    pub(crate) fn from_counts(received: u64, expected: u64) -> Self {
        if received == expected {
            Transfer::Complete(received)
        } else {
            Transfer::Truncated { received, expected }
        }
    }
}

/// Longest line accepted from a peer, terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Reads one `\n`-terminated line, dropping the terminator and a trailing `\r`.
///
/// Returns `Ok(None)` only when the stream is exhausted and nothing was read,
/// so an empty line comes back as `Some("")`. Invalid UTF-8 is replaced
/// rather than rejected. A line longer than [`MAX_LINE_LEN`] fails with
/// `InvalidData`; the stream is no longer framed after that.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if bytes == 0 {
        return Ok(None);
    }
    if bytes == MAX_LINE_LEN && buf.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {MAX_LINE_LEN} bytes"),
        ));
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Writes `line` plus a newline delimiter and flushes before returning.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Reads exactly `len` bytes, failing with `UnexpectedEof` if the stream ends first.
///
/// The buffer grows as data arrives instead of trusting `len` up front.
pub async fn read_exact<R>(reader: &mut R, len: u64) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    (&mut *reader).take(len).read_to_end(&mut buf).await?;
    if (buf.len() as u64) < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, stream ended after {}", buf.len()),
        ));
    }
    Ok(buf)
}

pub async fn write_exact<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Discards up to `len` bytes from the reader, stopping early at end of stream.
pub async fn drain<R>(reader: &mut R, len: u64) -> io::Result<Transfer>
where
    R: AsyncRead + Unpin,
{
    let received = tokio::io::copy(&mut (&mut *reader).take(len), &mut tokio::io::sink()).await?;
    Ok(Transfer::from_counts(received, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn read_line_strips_crlf_and_distinguishes_empty_from_eof() {
        let mut reader = BufReader::new(&b"hello\r\n\nlast"[..]);

        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("hello"));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some(""));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("last"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_line_only_strips_trailing_carriage_return() {
        let mut reader = BufReader::new(&b"a\rb\r\n"[..]);
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("a\rb"));
    }

    #[tokio::test]
    async fn write_line_appends_newline() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = BufReader::new(reader);

        write_line(&mut writer, "MSG:alice:olá").await.expect("write line");
        let line = read_line(&mut reader).await.expect("read line");

        assert_eq!(line.as_deref(), Some("MSG:alice:olá"));
    }

    #[tokio::test]
    async fn read_exact_reports_truncation() {
        let mut reader = &b"abc"[..];
        let err = read_exact(&mut reader, 5).await.expect_err("stream is short");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut reader = &b"abcdef"[..];
        assert_eq!(read_exact(&mut reader, 4).await.unwrap(), b"abcd");
        assert_eq!(reader, b"ef");
    }

    #[tokio::test]
    async fn read_line_rejects_lines_over_the_limit() {
        let mut long = vec![b'a'; MAX_LINE_LEN + 10];
        long.push(b'\n');
        let mut reader = BufReader::new(&long[..]);

        let err = read_line(&mut reader).await.expect_err("line is too long");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn read_line_accepts_a_line_at_the_limit() {
        let mut line = vec![b'a'; MAX_LINE_LEN - 1];
        line.extend_from_slice(b"\nnext\n");
        let mut reader = BufReader::new(&line[..]);

        let first = read_line(&mut reader).await.unwrap().expect("line");
        assert_eq!(first.len(), MAX_LINE_LEN - 1);
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn drain_stops_early_at_end_of_stream() {
        let mut reader = &b"xyz"[..];
        let transfer = drain(&mut reader, 8).await.expect("drain");
        assert_eq!(
            transfer,
            Transfer::Truncated {
                received: 3,
                expected: 8
            }
        );
    }
}
