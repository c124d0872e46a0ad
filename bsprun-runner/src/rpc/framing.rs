// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::FrameError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

const CONTENT_LENGTH: &str = "content-length";

/// The largest message body accepted from the server.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Reads `Content-Length` framed message bodies from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a new frame reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Reads the next message body.
    ///
    /// Returns `Ok(None)` if the stream ended cleanly between messages.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut content_length = None;
        let mut saw_header = false;

        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line).await?;
            if read == 0 {
                if saw_header {
                    return Err(FrameError::Io(std::io::ErrorKind::UnexpectedEof.into()));
                }
                return Ok(None);
            }

            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if saw_header {
                    break;
                }
                // Tolerate stray blank lines between messages.
                continue;
            }
            saw_header = true;

            let Some((name, value)) = line.split_once(':') else {
                return Err(FrameError::InvalidHeader {
                    line: line.to_owned(),
                });
            };
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let value = value.trim();
                let length = value
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength {
                        value: value.to_owned(),
                    })?;
                if length > MAX_FRAME_LENGTH {
                    return Err(FrameError::FrameTooLarge {
                        length,
                        max: MAX_FRAME_LENGTH,
                    });
                }
                content_length = Some(length);
            }
        }

        let length = content_length.ok_or(FrameError::MissingContentLength)?;
        let mut body = vec![0; length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }
}

/// Writes `body` to `writer` as a single framed message and flushes it.
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    body: &[u8],
) -> std::io::Result<()> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}
