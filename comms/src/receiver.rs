use std::io;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// The receiving end handle of the communication.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Sets the largest frame this receiver accepts from now on.
    pub fn set_max_frame_len(&mut self, max_frame_len: usize) {
        self.max_frame_len = max_frame_len;
    }

    /// Waits to receive a new message from the inner receiver.
    ///
    /// The frame's body is buffered as it arrives, a length header alone never
    /// allocates the announced size.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> io::Result<T> {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut size_buf).await?;
        let len = LenType::from_be_bytes(size_buf);

        if len > self.max_frame_len as LenType {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Received a frame of {len} bytes, the limit is {}",
                    self.max_frame_len
                ),
            ));
        }

        self.buf.clear();
        let read = (&mut self.rx).take(len).read_to_end(&mut self.buf).await?;

        if (read as LenType) < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Frame ended after {read} of {len} bytes"),
            ));
        }

        let msg = serde_json::from_slice(&self.buf)?;
        Ok(msg)
    }
}
