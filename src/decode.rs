use futures::Stream;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Line-delimited JSON decoder over a byte stream.
///
/// Yields one parsed record per non-empty line; lines that fail to parse
/// are logged under `context` and skipped, so interleaved noise (progress
/// bars, stray prints) does not kill the stream. The trailing unterminated
/// line, if any, is flushed at EOF. Finite, not restartable.
pub fn json_lines<R>(reader: R, context: &'static str) -> impl Stream<Item = Value> + Send
where
    R: AsyncRead + Send + Unpin + 'static,
{
    async_stream::stream! {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(record) => yield record,
                        Err(e) => {
                            tracing::debug!(context, error = %e, "skipping non-JSON line");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(context, error = %e, "stream read failed");
                    break;
                }
            }
        }
    }
}
