//! Line splitting for child process output.

use std::pin::Pin;

use futures_core::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// A complete output line, tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    /// The line text without its delimiter.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Stdout(line) | Self::Stderr(line) => line,
        }
    }
}

/// Boxed stream of output lines.
pub type LineStream = Pin<Box<dyn Stream<Item = OutputLine> + Send>>;

/// Read `reader` as a stream of lines with `\n` / `\r\n` stripped.
///
/// Invalid UTF-8 is replaced rather than ending the stream. A trailing
/// fragment without a newline is yielded once the reader hits EOF.
pub fn read_lines<R>(reader: R) -> impl Stream<Item = String> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    futures_util::stream::unfold(BufReader::new(reader), |mut reader| async move {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some((String::from_utf8_lossy(&buf).into_owned(), reader))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read process output");
                None
            }
        }
    })
}

/// Merge stdout and stderr into one stream.
///
/// Order is preserved within each stream; the interleaving between the
/// two is whatever arrives first. The stream ends when both are closed.
pub fn output_lines<O, E>(stdout: O, stderr: E) -> LineStream
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    use futures_util::StreamExt;

    let stdout = read_lines(stdout).map(OutputLine::Stdout);
    let stderr = read_lines(stderr).map(OutputLine::Stderr);
    Box::pin(futures_util::stream::select(stdout, stderr))
}
