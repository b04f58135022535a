//! The writing half of a framed channel: a big-endian length header, then a JSON body.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// Writes whole frames, one message each.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    frame: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            frame: Vec::new(),
        }
    }

    /// Encodes `msg` and writes it as a single frame.
    ///
    /// The frame is built in a reused buffer so the header and the body go out in one write.
    ///
    /// # Errors
    /// `InvalidInput` if the encoded body is larger than a receiver would accept, or the
    /// underlying writer's error.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> io::Result<()> {
        let Self { frame, tx } = self;

        frame.clear();
        frame.extend_from_slice(&[0; LEN_TYPE_SIZE]);
        serde_json::to_writer(&mut *frame, msg)?;

        let body = frame.len() - LEN_TYPE_SIZE;
        if body > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to send a {body} byte frame, the limit is {MAX_FRAME_LEN}"),
            ));
        }

        frame[..LEN_TYPE_SIZE].copy_from_slice(&(body as LenType).to_be_bytes());

        tx.write_all(frame).await?;
        tx.flush().await
    }
}
