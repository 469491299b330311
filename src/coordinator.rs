//! Dispatches queued exchanges over one agent invocation.
//!
//! ## Protocol
//!
//! For each exchange in the drained batch the coordinator sends one request
//! frame and then waits for exactly one response frame before moving on.
//! Responses carry no correlation identifier, so this strict alternation is
//! what ties a response to its exchange.
//!
//! | Receive outcome | Current exchange        | Rest of batch                  |
//! |-----------------|-------------------------|--------------------------------|
//! | reply           | resolved with the reply | continue                       |
//! | transport error | failed with that error  | continue                       |
//! | end of stream   | failed (transport)      | failed with `EndOfStream`, unsent |
//! | no reply in time | failed (transport)     | failed with `EndOfStream`, unsent |
//! | aborted         | failed (transport)      | failed with `EndOfStream`, unsent |
//!
//! A failed send fails only the exchange being sent. A send or receive that
//! outlives [`DispatchPolicy::reply_timeout`] means the agent is gone without
//! having closed the connection, so it is handled like end of stream.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::exchange::Exchange;
use crate::registry::{Batch, Registry};
use crate::stream::AgentStream;
use crate::AppError;

/// Tally of one dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Exchanges in the batch.
    pub batch_size: usize,
    /// Exchanges resolved with a reply.
    pub delivered: usize,
    /// Exchanges failed by a send or receive error.
    pub failed: usize,
    /// Exchanges failed without being sent because the agent hung up.
    pub cut_short: usize,
    /// Replies dropped because their exchange had already been settled,
    /// typically by the caller's deadline.
    pub discarded: usize,
}

/// Default bound on a single send or receive.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Limits applied while a batch is on the wire.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Longest wait for one send or one reply.
    pub reply_timeout: Duration,
    /// Cancelled to give up on the batch, e.g. when shutdown runs out of grace.
    pub abort: CancellationToken,
}

impl DispatchPolicy {
    /// Policy with `reply_timeout` and a fresh abort token.
    #[must_use]
    pub fn new(reply_timeout: Duration) -> Self {
        Self {
            reply_timeout,
            abort: CancellationToken::new(),
        }
    }

    /// Run one stream operation under the reply timeout and the abort token.
    ///
    /// The outer `Err` means the connection must be treated as dead.
    async fn bounded<F: Future>(&self, op: F) -> Result<F::Output, AppError> {
        tokio::select! {
            biased;

            () = self.abort.cancelled() => Err(AppError::Transport("dispatch aborted".into())),

            out = tokio::time::timeout(self.reply_timeout, op) => out.map_err(|_| {
                AppError::Transport(format!(
                    "agent did not answer within {}s",
                    self.reply_timeout.as_secs_f64()
                ))
            }),
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_TIMEOUT)
    }
}

/// Service one agent invocation: drain the registry and dispatch the batch.
///
/// Returns immediately, without touching the stream, when nothing is queued.
pub async fn run_invocation<S>(
    registry: &Registry,
    stream: &mut S,
    policy: &DispatchPolicy,
) -> BatchReport
where
    S: AgentStream + ?Sized,
{
    let batch = registry.drain_all();
    if batch.is_empty() {
        debug!("no queued requests for agent");
        return BatchReport::default();
    }

    dispatch_batch(batch, stream, policy).await
}

/// Dispatch `batch` over `stream` in iteration order, settling every exchange.
pub async fn dispatch_batch<S>(batch: Batch, stream: &mut S, policy: &DispatchPolicy) -> BatchReport
where
    S: AgentStream + ?Sized,
{
    let span = info_span!("dispatch_batch", batch_size = batch.len());
    async move {
        let mut report = BatchReport {
            batch_size: batch.len(),
            ..BatchReport::default()
        };
        let mut remaining = batch.into_iter();

        while let Some(exchange) = remaining.next() {
            let exchange_id = exchange.id().to_owned();
            debug!(%exchange_id, path = %exchange.unit().path, "sending request to agent");

            match policy.bounded(stream.send(exchange.unit())).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(%exchange_id, %err, "could not send request to agent");
                    exchange.resolve_failure(err);
                    report.failed += 1;
                    continue;
                }
                Err(err) => {
                    warn!(%exchange_id, %err, "agent stalled on send, failing rest of batch");
                    exchange.resolve_failure(err);
                    report.failed += 1;
                    report.cut_short += fail_unsent(remaining.by_ref());
                    break;
                }
            }

            match policy.bounded(stream.recv()).await {
                Ok(Ok(reply)) => {
                    debug!(%exchange_id, status = reply.status, "agent replied");
                    if exchange.resolve_success(reply) {
                        report.delivered += 1;
                    } else {
                        report.discarded += 1;
                    }
                }
                Ok(Err(AppError::EndOfStream)) => {
                    warn!(%exchange_id, "agent closed the stream, failing rest of batch");
                    exchange.resolve_failure(AppError::Transport(
                        "agent closed the stream before replying".into(),
                    ));
                    report.failed += 1;
                    report.cut_short += fail_unsent(remaining.by_ref());
                    break;
                }
                Ok(Err(err)) => {
                    warn!(%exchange_id, %err, "error receiving agent reply");
                    exchange.resolve_failure(err);
                    report.failed += 1;
                }
                Err(err) => {
                    warn!(%exchange_id, %err, "no reply from agent, failing rest of batch");
                    exchange.resolve_failure(err);
                    report.failed += 1;
                    report.cut_short += fail_unsent(remaining.by_ref());
                    break;
                }
            }
        }

        debug!(?report, "batch disposed");
        report
    }
    .instrument(span)
    .await
}

fn fail_unsent(rest: impl Iterator<Item = Arc<Exchange>>) -> usize {
    let mut count = 0;
    for exchange in rest {
        debug!(exchange_id = %exchange.id(), "connection closed, request not sent");
        exchange.resolve_failure(AppError::EndOfStream);
        count += 1;
    }
    count
}
