//! Outbound cancellation notices.

use async_trait::async_trait;
use fxdesk_common::{CancellationNotice, DeskError, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::info;

/// Delivers cancellation notices to whatever tells the client.
///
/// Delivery is fire-and-forget from the desk's side: an error is logged and
/// counted, the cancellation itself stands.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn notify(&self, notice: CancellationNotice) -> Result<()>;
}

/// Writes notices to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, notice: CancellationNotice) -> Result<()> {
        info!(
            transaction_id = %notice.transaction_id,
            client = %notice.client,
            currency = %notice.currency,
            reason = %notice.reason,
            "Transaction cancelled, client must re-quote"
        );
        Ok(())
    }
}

/// Pushes notices into a bounded channel. A full or closed channel is an
/// `Unavailable` error; the notifier never waits for room.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<CancellationNotice>,
}

impl ChannelNotifier {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<CancellationNotice>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn notify(&self, notice: CancellationNotice) -> Result<()> {
        self.tx.try_send(notice).map_err(|e| match e {
            TrySendError::Full(_) => DeskError::Unavailable("notification channel full".into()),
            TrySendError::Closed(_) => {
                DeskError::Unavailable("notification channel closed".into())
            }
        })
    }
}
