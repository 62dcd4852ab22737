//! Line transport over async byte streams.
//!
//! Both processes read protocol lines from stdin and write them to stdout.
//! The reader turns lines into [`Message`]s on a channel; the writer drains a
//! channel of outbound messages.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::{Addressing, Message};

/// Read protocol lines until EOF or shutdown and forward the decoded
/// messages. Undecodable lines are logged and skipped.
///
/// Returns when the input ends, the receiver is dropped or shutdown is
/// signalled. Dropping the sender on return tells the consumer the input is
/// gone.
pub async fn read_messages<R>(
    reader: R,
    addressing: Addressing,
    tx: mpsc::Sender<Message>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
                continue;
            }
        };

        let Some(line) = line else {
            debug!("Input closed");
            return Ok(());
        };
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match Message::decode(line, addressing) {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => warn!(error = %e, line, "Ignoring malformed protocol line"),
        }
    }
}

/// Write every message from `rx` as one line, flushing after each.
pub async fn write_messages<W>(mut writer: W, mut rx: mpsc::Receiver<Message>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = message.encode();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
