//! JSON frame codec for agent stdout.
//!
//! Lines are split by [`LinesCodec`]; each non-blank line is appended to a
//! reassembly buffer which is then parsed as a stream of JSON values. Every
//! complete value becomes a [`Frame`]; an incomplete tail stays buffered
//! until the next line completes it. This covers one object per line,
//! several objects concatenated on one line, and one object split across
//! several lines.
//!
//! The buffer is capped at `max_buffer_size` bytes. Growing past the cap is
//! an error ([`AppError::BufferExceeded`]); a buffer of exactly the cap is
//! accepted. Syntax errors and values without a string `type` come out as
//! [`Decoded::Malformed`], after every frame that preceded them.

use std::collections::VecDeque;

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// A typed JSON object read from the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Value of the `type` field.
    pub message_type: String,
    /// The whole object, `type` included.
    pub body: Value,
}

impl Frame {
    /// Wrap a parsed value, reading its discriminator.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when `value` is not an object with a
    /// string `type` field.
    pub fn from_value(value: Value) -> Result<Self> {
        let message_type = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(AppError::Protocol("`type` field is not a string".into())),
            None if value.is_object() => {
                return Err(AppError::Protocol("message without `type` field".into()))
            }
            None => {
                return Err(AppError::Protocol(format!(
                    "expected a json object, got {value}"
                )))
            }
        };
        Ok(Self {
            message_type,
            body: value,
        })
    }
}

/// One decoder output.
#[derive(Debug)]
pub enum Decoded {
    /// A complete, typed object.
    Frame(Frame),
    /// Data that could not be turned into a frame.
    Malformed(AppError),
}

/// Line-splitting, buffer-bounded JSON decoder.
#[derive(Debug)]
pub struct JsonFrameCodec {
    lines: LinesCodec,
    buffer: String,
    max_buffer_size: usize,
    ready: VecDeque<Decoded>,
}

impl JsonFrameCodec {
    /// Create a codec that fails once the reassembly buffer exceeds
    /// `max_buffer_size` bytes.
    #[must_use]
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_buffer_size),
            buffer: String::new(),
            max_buffer_size,
            ready: VecDeque::new(),
        }
    }

    /// Bytes currently held for an incomplete value.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn accept_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let size = self.buffer.len() + line.len();
        if size > self.max_buffer_size {
            self.buffer.clear();
            return Err(AppError::BufferExceeded {
                size,
                limit: self.max_buffer_size,
            });
        }

        self.buffer.push_str(line);
        self.drain_complete_values();
        Ok(())
    }

    fn drain_complete_values(&mut self) {
        let mut consumed = 0;
        let mut values = Vec::new();
        let mut syntax_error = None;

        let mut stream = serde_json::Deserializer::from_str(&self.buffer).into_iter::<Value>();
        loop {
            match stream.next() {
                Some(Ok(value)) => {
                    consumed = stream.byte_offset();
                    values.push(value);
                }
                // Incomplete tail: wait for more lines.
                Some(Err(err)) if err.is_eof() => break,
                Some(Err(err)) => {
                    syntax_error = Some(err);
                    break;
                }
                None => {
                    consumed = self.buffer.len();
                    break;
                }
            }
        }

        for value in values {
            self.ready.push_back(match Frame::from_value(value) {
                Ok(frame) => Decoded::Frame(frame),
                Err(err) => Decoded::Malformed(err),
            });
        }

        if let Some(err) = syntax_error {
            // The rest of the buffer cannot be resynchronized.
            self.buffer.clear();
            self.ready
                .push_back(Decoded::Malformed(AppError::Protocol(format!(
                    "invalid json: {err}"
                ))));
        } else {
            self.buffer.drain(..consumed);
        }
    }

    fn line_error(&self, err: LinesCodecError, pending: usize) -> AppError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => AppError::BufferExceeded {
                size: self.buffer.len() + pending,
                limit: self.max_buffer_size,
            },
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Decoder for JsonFrameCodec {
    type Item = Decoded;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Ok(Some(item));
            }
            match self.lines.decode(src) {
                Ok(Some(line)) => self.accept_line(&line)?,
                Ok(None) => return Ok(None),
                Err(err) => return Err(self.line_error(err, src.len())),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Ok(Some(item));
            }
            match self.lines.decode_eof(src) {
                Ok(Some(line)) => self.accept_line(&line)?,
                Ok(None) if self.buffer.is_empty() => return Ok(None),
                Ok(None) => {
                    let pending = self.buffer.len();
                    self.buffer.clear();
                    return Ok(Some(Decoded::Malformed(AppError::Protocol(format!(
                        "stream ended inside a json value ({pending} bytes pending)"
                    )))));
                }
                Err(err) => return Err(self.line_error(err, src.len())),
            }
        }
    }
}
