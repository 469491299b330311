//! Agent-facing stream abstraction.
//!
//! The [`AgentStream`] trait is the seam between the coordinator and the
//! transport: production code uses [`FramedAgentStream`] over a TCP or TLS
//! connection, tests substitute scripted fakes.
//!
//! Submodules:
//! - `codec`: NDJSON framing with a bounded line length.
//! - `frames`: request/response wire types.

pub mod codec;
pub mod frames;

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::models::{Reply, WorkUnit};
use crate::stream::codec::FrameCodec;
use crate::stream::frames::{RequestFrame, ResponseFrame};
use crate::{AppError, Result};

/// One agent conversation: strictly alternating send and receive.
pub trait AgentStream: Send {
    /// Send one unit of work to the agent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the frame cannot be written.
    fn send<'a>(
        &'a mut self,
        unit: &'a WorkUnit,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Receive the agent's answer to the last request sent.
    ///
    /// # Errors
    ///
    /// - [`AppError::EndOfStream`] when the agent has closed its side.
    /// - [`AppError::Transport`] for any other receive failure.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Reply>> + Send + '_>>;
}

/// [`AgentStream`] over any byte stream, framed with [`FrameCodec`].
#[derive(Debug)]
pub struct FramedAgentStream<T> {
    framed: Framed<T, FrameCodec<ResponseFrame>>,
}

impl<T> FramedAgentStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap `io`, rejecting inbound frames longer than `max_frame_bytes`.
    #[must_use]
    pub fn new(io: T, max_frame_bytes: usize) -> Self {
        Self {
            framed: Framed::new(io, FrameCodec::with_max_length(max_frame_bytes)),
        }
    }

    /// Flush pending frames and shut down the write side.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the flush or shutdown fails.
    pub async fn close(&mut self) -> Result<()> {
        SinkExt::<RequestFrame>::close(&mut self.framed).await
    }
}

impl<T> AgentStream for FramedAgentStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send<'a>(
        &'a mut self,
        unit: &'a WorkUnit,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.framed
                .send(RequestFrame::from(unit))
                .await
                .map_err(|err| AppError::Transport(format!("send failed: {err}")))
        })
    }

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Reply>> + Send + '_>> {
        Box::pin(async move {
            match self.framed.next().await {
                None => Err(AppError::EndOfStream),
                Some(Ok(Ok(frame))) => Ok(Reply::from(frame)),
                Some(Ok(Err(err)) | Err(err)) => {
                    Err(AppError::Transport(format!("receive failed: {err}")))
                }
            }
        })
    }
}
