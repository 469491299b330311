//! NDJSON codec for agent streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length and JSON (de)serialisation of frames.
//!
//! A line that is too long or not a valid frame is yielded as an
//! `Ok(Some(Err(..)))` item rather than a decoder error. `Framed` ends the
//! stream after a decoder error, and a single bad frame must not look like
//! the agent hanging up.

use std::marker::PhantomData;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::config::DEFAULT_MAX_FRAME_BYTES;
use crate::{AppError, Result};

/// Newline-delimited JSON codec decoding frames of type `In`.
///
/// Encodes any [`Serialize`] value as one `\n`-terminated line.
#[derive(Debug)]
pub struct FrameCodec<In> {
    lines: LinesCodec,
    max_line_bytes: usize,
    _inbound: PhantomData<fn() -> In>,
}

impl<In> FrameCodec<In> {
    /// Create a codec with the default 1 MiB line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec rejecting inbound lines longer than `max_line_bytes`.
    #[must_use]
    pub fn with_max_length(max_line_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
            _inbound: PhantomData,
        }
    }

    fn parse(line: Option<String>) -> Option<Result<In>>
    where
        In: DeserializeOwned,
    {
        line.map(|line| {
            serde_json::from_str::<In>(&line)
                .map_err(|err| AppError::Codec(format!("malformed frame: {err}")))
        })
    }

    fn lift(&self, err: LinesCodecError) -> Result<Option<Result<In>>> {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Ok(Some(Err(AppError::Codec(format!(
                "line too long: exceeded {} bytes",
                self.max_line_bytes
            ))))),
            LinesCodecError::Io(io_err) => Err(AppError::Io(io_err.to_string())),
        }
    }
}

impl<In> Default for FrameCodec<In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: DeserializeOwned> Decoder for FrameCodec<In> {
    type Item = Result<In>;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.lines.decode(src) {
            Ok(line) => Ok(Self::parse(line)),
            Err(err) => self.lift(err),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.lines.decode_eof(src) {
            Ok(line) => Ok(Self::parse(line)),
            Err(err) => self.lift(err),
        }
    }
}

impl<In, Out: Serialize> Encoder<Out> for FrameCodec<In> {
    type Error = AppError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<()> {
        let line = serde_json::to_string(&item)
            .map_err(|err| AppError::Codec(format!("failed to serialise frame: {err}")))?;
        self.lines
            .encode(line, dst)
            .map_err(|err| AppError::Io(err.to_string()))
    }
}
