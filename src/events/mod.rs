//! Pipeline event fan-out
//!
//! Merge outcomes worth telling someone about become events, delivered to
//! registered sinks on a spawned task. Delivery is fire-and-forget: a slow
//! or failing sink never blocks the merge path.

use crate::logger::{self, LogTag};
use crate::types::TokenStatus;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    NewToken {
        mint: String,
        symbol: Option<String>,
        status: TokenStatus,
    },
    StatusChange {
        mint: String,
        from: TokenStatus,
        to: TokenStatus,
    },
    Blacklisted {
        mint: String,
        reason: String,
    },
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::NewToken { .. } => "new_token",
            PipelineEvent::StatusChange { .. } => "status_change",
            PipelineEvent::Blacklisted { .. } => "blacklisted",
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, event: &PipelineEvent);
}

/// Default sink: events land in the log
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::NewToken { mint, symbol, status } => logger::info(
                LogTag::Events,
                &format!(
                    "new token {} ({}) status {}",
                    mint,
                    symbol.as_deref().unwrap_or("?"),
                    status
                ),
            ),
            PipelineEvent::StatusChange { mint, from, to } => logger::info(
                LogTag::Events,
                &format!("{} moved {} -> {}", mint, from, to),
            ),
            PipelineEvent::Blacklisted { mint, reason } => logger::warning(
                LogTag::Events,
                &format!("{} blacklisted: {}", mint, reason),
            ),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sinks: Arc<Vec<Arc<dyn NotificationSink>>>,
}

impl EventBus {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
        }
    }

    /// Deliver to every sink on a detached task
    pub fn emit(&self, event: PipelineEvent) {
        let sinks = self.sinks.clone();
        tokio::spawn(async move {
            logger::debug(
                LogTag::Events,
                &format!("emitting {} event", event.kind()),
            );
            for sink in sinks.iter() {
                sink.deliver(&event).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn deliver(&self, _event: &PipelineEvent) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn events_reach_every_sink() {
        let a = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
        });
        let b = Arc::new(CountingSink {
            delivered: AtomicUsize::new(0),
        });
        let bus = EventBus::new(vec![
            a.clone() as Arc<dyn NotificationSink>,
            b.clone() as Arc<dyn NotificationSink>,
        ]);
        bus.emit(PipelineEvent::Blacklisted {
            mint: "m".to_string(),
            reason: "drained".to_string(),
        });
        // Delivery is spawned; give the task a chance to run
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(a.delivered.load(Ordering::SeqCst), 1);
        assert_eq!(b.delivered.load(Ordering::SeqCst), 1);
    }
}
