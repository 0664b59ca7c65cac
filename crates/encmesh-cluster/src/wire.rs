//! Line-delimited JSON framing: one message per line.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ClusterError, ClusterResult};
use crate::message::Message;

/// Upper bound of a single encoded message.
pub const MAX_MESSAGE_BYTES: u64 = 4 * 1024 * 1024;

pub async fn write_message<W>(writer: &mut W, msg: &Message) -> ClusterResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(msg)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R>(reader: &mut R) -> ClusterResult<Message>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.take(MAX_MESSAGE_BYTES).read_line(&mut line).await?;
    if read == 0 {
        return Err(ClusterError::Closed);
    }
    if !line.ends_with('\n') && read as u64 == MAX_MESSAGE_BYTES {
        return Err(ClusterError::MessageTooLarge(MAX_MESSAGE_BYTES));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}
