//! Stats worker - single-writer owner of a Registry
//!
//! Call sites anywhere in the process send messages to one actor that owns
//! the registry, so registration and recording never contend on a lock.
//!
//! ```text
//! record ────┐                                   ┌──► subscriber A
//! register ──┤──► StatsWorker ──► Registry ──tick─┤
//! retrieve ──┘                                   └──► subscriber B
//! ```
//!
//! Records are fire-and-forget. Every other request replies on a oneshot.
//! On each report tick the worker snapshots the views that have subscribers
//! and hands them over with `try_send`: a full channel loses that round, a
//! closed channel is unsubscribed. Delivery never waits on a consumer.

use super::error::StatsError;
use super::measure::{MeasureDesc, Measurement};
use super::registry::Registry;
use super::tags::TagSet;
use super::view::{View, ViewDesc, ViewSender};
use crate::config::{ConfigError, StatsConfig};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<Result<T, StatsError>>;

/// Messages for the stats worker
pub enum StatsMessage {
    RegisterMeasure {
        desc: Arc<MeasureDesc>,
        reply: Reply<()>,
    },
    UnregisterMeasure {
        name: String,
        reply: Reply<()>,
    },
    RegisterView {
        desc: Arc<ViewDesc>,
        reply: Reply<()>,
    },
    UnregisterView {
        name: String,
        reply: Reply<()>,
    },
    Subscribe {
        view: String,
        tx: ViewSender,
        reply: Reply<()>,
    },
    Unsubscribe {
        view: String,
        tx: ViewSender,
        reply: Reply<()>,
    },
    /// Record measurements; no reply, failures are logged
    Record {
        now_ms: u64,
        tags: TagSet,
        measurements: Vec<Measurement>,
    },
    RetrieveViews {
        reply: Reply<Vec<View>>,
    },
    RetrieveView {
        desc: Arc<ViewDesc>,
        reply: Reply<View>,
    },
    /// Deliver snapshots to subscribers immediately; replies with the
    /// number of snapshots handed over
    ReportNow {
        reply: Reply<usize>,
    },
    /// Graceful shutdown
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

/// Wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Actor that owns the registry and processes messages
pub struct StatsWorker {
    registry: Registry,
    rx: mpsc::UnboundedReceiver<StatsMessage>,
    report_interval: Duration,
}

impl StatsWorker {
    fn new(
        registry: Registry,
        rx: mpsc::UnboundedReceiver<StatsMessage>,
        report_interval: Duration,
    ) -> Self {
        StatsWorker {
            registry,
            rx,
            report_interval,
        }
    }

    /// Run the actor loop until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(interval_ms = self.report_interval.as_millis() as u64, "stats worker started");
        let mut ticker = tokio::time::interval(self.report_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };
                    if self.handle_message(msg) {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.report(now_ms());
                }
            }
        }
        info!("stats worker stopped: all handles dropped");
    }

    /// Handle a single message. Returns true if shutdown.
    fn handle_message(&mut self, msg: StatsMessage) -> bool {
        match msg {
            StatsMessage::RegisterMeasure { desc, reply } => {
                let _ = reply.send(self.registry.register_measure(desc));
            }
            StatsMessage::UnregisterMeasure { name, reply } => {
                let _ = reply.send(self.registry.unregister_measure(&name));
            }
            StatsMessage::RegisterView { desc, reply } => {
                let _ = reply.send(self.registry.register_view(desc, now_ms()));
            }
            StatsMessage::UnregisterView { name, reply } => {
                let _ = reply.send(self.registry.unregister_view(&name));
            }
            StatsMessage::Subscribe { view, tx, reply } => {
                let _ = reply.send(self.registry.subscribe(&view, tx));
            }
            StatsMessage::Unsubscribe { view, tx, reply } => {
                let _ = reply.send(self.registry.unsubscribe(&view, &tx));
            }
            StatsMessage::Record {
                now_ms,
                tags,
                measurements,
            } => {
                if let Err(e) = self.registry.record_batch(now_ms, &tags, &measurements) {
                    warn!(error = %e, "dropping measurements");
                }
            }
            StatsMessage::RetrieveViews { reply } => {
                let _ = reply.send(self.registry.retrieve_views(now_ms()));
            }
            StatsMessage::RetrieveView { desc, reply } => {
                let _ = reply.send(self.registry.retrieve_view(now_ms(), &desc));
            }
            StatsMessage::ReportNow { reply } => {
                let _ = reply.send(Ok(self.report(now_ms())));
            }
            StatsMessage::Shutdown { response_tx } => {
                // Apply whatever was queued ahead of the shutdown request.
                while let Ok(msg) = self.rx.try_recv() {
                    if let StatsMessage::Shutdown { response_tx } = msg {
                        let _ = response_tx.send(());
                    } else {
                        self.handle_message(msg);
                    }
                }
                info!("stats worker shutting down");
                let _ = response_tx.send(());
                return true;
            }
        }
        false
    }

    /// Push a snapshot of each subscribed view to its subscribers
    fn report(&mut self, now_ms: u64) -> usize {
        let mut delivered = 0;
        for state in self.registry.views_mut() {
            let pruned = state.prune_closed();
            if pruned > 0 {
                debug!(view = state.desc().name(), pruned, "removed closed subscribers");
            }
            if state.subscribers().is_empty() {
                continue;
            }

            let view = match state.retrieve_view(now_ms) {
                Ok(view) => Arc::new(view),
                Err(e) => {
                    warn!(view = state.desc().name(), error = %e, "failed to snapshot view");
                    continue;
                }
            };
            for tx in state.subscribers() {
                match tx.try_send(Arc::clone(&view)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        debug!(view = state.desc().name(), "subscriber full, skipping delivery");
                    }
                    Err(TrySendError::Closed(_)) => {}
                }
            }
        }
        delivered
    }
}

/// Cloneable handle for talking to a running [`StatsWorker`]
#[derive(Debug, Clone)]
pub struct StatsHandle {
    tx: mpsc::UnboundedSender<StatsMessage>,
    subscriber_capacity: usize,
}

/// Spawn a worker on the current tokio runtime
///
/// Fails without spawning if `config` does not validate.
pub fn spawn_worker(config: &StatsConfig) -> Result<(StatsHandle, JoinHandle<()>), ConfigError> {
    config.validate()?;
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = StatsWorker::new(Registry::new(), rx, config.report_interval);
    let join = tokio::spawn(worker.run());
    let handle = StatsHandle {
        tx,
        subscriber_capacity: config.subscriber_capacity,
    };
    Ok((handle, join))
}

impl StatsHandle {
    /// Create a subscriber channel sized by `subscriber_capacity`
    pub fn subscriber_channel(&self) -> (ViewSender, mpsc::Receiver<Arc<View>>) {
        mpsc::channel(self.subscriber_capacity)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> StatsMessage,
    ) -> Result<T, StatsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| StatsError::WorkerClosed)?;
        rx.await.map_err(|_| StatsError::WorkerClosed)?
    }

    pub async fn register_measure(&self, desc: Arc<MeasureDesc>) -> Result<(), StatsError> {
        self.request(|reply| StatsMessage::RegisterMeasure { desc, reply })
            .await
    }

    pub async fn unregister_measure(&self, name: &str) -> Result<(), StatsError> {
        let name = name.to_string();
        self.request(|reply| StatsMessage::UnregisterMeasure { name, reply })
            .await
    }

    pub async fn register_view(&self, desc: Arc<ViewDesc>) -> Result<(), StatsError> {
        self.request(|reply| StatsMessage::RegisterView { desc, reply })
            .await
    }

    pub async fn unregister_view(&self, name: &str) -> Result<(), StatsError> {
        let name = name.to_string();
        self.request(|reply| StatsMessage::UnregisterView { name, reply })
            .await
    }

    pub async fn subscribe(&self, view: &str, tx: ViewSender) -> Result<(), StatsError> {
        let view = view.to_string();
        self.request(|reply| StatsMessage::Subscribe { view, tx, reply })
            .await
    }

    pub async fn unsubscribe(&self, view: &str, tx: ViewSender) -> Result<(), StatsError> {
        let view = view.to_string();
        self.request(|reply| StatsMessage::Unsubscribe { view, tx, reply })
            .await
    }

    /// Queue measurements for recording at the current time
    ///
    /// Returns once the message is queued; recording failures are logged by
    /// the worker.
    pub fn record(&self, tags: TagSet, measurements: Vec<Measurement>) -> Result<(), StatsError> {
        self.tx
            .send(StatsMessage::Record {
                now_ms: now_ms(),
                tags,
                measurements,
            })
            .map_err(|_| StatsError::WorkerClosed)
    }

    pub async fn retrieve_views(&self) -> Result<Vec<View>, StatsError> {
        self.request(|reply| StatsMessage::RetrieveViews { reply })
            .await
    }

    pub async fn retrieve_view(&self, desc: Arc<ViewDesc>) -> Result<View, StatsError> {
        self.request(|reply| StatsMessage::RetrieveView { desc, reply })
            .await
    }

    /// Deliver snapshots to subscribers now instead of waiting for the tick
    pub async fn report_now(&self) -> Result<usize, StatsError> {
        self.request(|reply| StatsMessage::ReportNow { reply }).await
    }

    /// Stop the worker after it drains already-queued messages
    pub async fn shutdown(&self) -> Result<(), StatsError> {
        let (response_tx, rx) = oneshot::channel();
        self.tx
            .send(StatsMessage::Shutdown { response_tx })
            .map_err(|_| StatsError::WorkerClosed)?;
        rx.await.map_err(|_| StatsError::WorkerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::aggregator::{AggregatorStats, SumStats};
    use crate::stats::measure::MeasureKind;
    use crate::stats::view::AggregationDesc;

    fn test_config() -> StatsConfig {
        StatsConfig {
            report_interval: Duration::from_secs(3600),
            ..StatsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_record_then_retrieve() {
        let (handle, join) = spawn_worker(&test_config()).unwrap();
        let bytes = MeasureDesc::new("rpc.bytes", "", "By", MeasureKind::Int64);
        let view = ViewDesc::new("bytes_total", "", "rpc.bytes", vec![], AggregationDesc::Sum);
        handle.register_measure(bytes.clone()).await.unwrap();
        handle.register_view(view.clone()).await.unwrap();

        handle
            .record(
                TagSet::empty(),
                vec![
                    Measurement::new(&bytes, 100i64).unwrap(),
                    Measurement::new(&bytes, 24i64).unwrap(),
                ],
            )
            .unwrap();

        let snapshot = handle.retrieve_view(view).await.unwrap();
        assert_eq!(
            snapshot.aggregations[0].stats,
            AggregatorStats::Sum(SumStats {
                sum: 124.0,
                count: 2
            })
        );

        handle.shutdown().await.unwrap();
        join.await.unwrap();
        assert!(matches!(
            handle.retrieve_views().await,
            Err(StatsError::WorkerClosed)
        ));
    }

    #[tokio::test]
    async fn test_report_skips_full_and_drops_closed() {
        let (handle, _join) = spawn_worker(&test_config()).unwrap();
        let up = MeasureDesc::new("up", "", "1", MeasureKind::Bool);
        let view = ViewDesc::new("up_gauge", "", "up", vec![], AggregationDesc::GaugeBool);
        handle.register_measure(up.clone()).await.unwrap();
        handle.register_view(view.clone()).await.unwrap();

        let (full_tx, mut full_rx) = mpsc::channel(1);
        let (closed_tx, closed_rx) = mpsc::channel(1);
        handle.subscribe("up_gauge", full_tx.clone()).await.unwrap();
        handle.subscribe("up_gauge", closed_tx.clone()).await.unwrap();
        drop(closed_rx);

        handle
            .record(TagSet::empty(), vec![Measurement::new(&up, true).unwrap()])
            .unwrap();
        assert_eq!(handle.report_now().await.unwrap(), 1);
        // Channel of capacity one is now full.
        assert_eq!(handle.report_now().await.unwrap(), 0);

        let view = full_rx.recv().await.unwrap();
        assert_eq!(view.desc.name(), "up_gauge");
        assert_eq!(view.aggregations.len(), 1);

        assert!(matches!(
            handle.unsubscribe("up_gauge", closed_tx).await,
            Err(StatsError::NotSubscribed { .. })
        ));
        handle.unsubscribe("up_gauge", full_tx).await.unwrap();
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_applies_queued_records() {
        let (handle, join) = spawn_worker(&test_config()).unwrap();
        let hits = MeasureDesc::new("hits", "", "1", MeasureKind::Int64);
        let view = ViewDesc::new("hits_count", "", "hits", vec![], AggregationDesc::Count);
        handle.register_measure(hits.clone()).await.unwrap();
        handle.register_view(view).await.unwrap();

        let (tx, mut rx) = handle.subscriber_channel();
        handle.subscribe("hits_count", tx).await.unwrap();
        for _ in 0..10 {
            handle
                .record(TagSet::empty(), vec![Measurement::new(&hits, 1i64).unwrap()])
                .unwrap();
        }
        assert_eq!(handle.report_now().await.unwrap(), 1);
        handle.shutdown().await.unwrap();
        join.await.unwrap();

        let view = rx.recv().await.unwrap();
        assert_eq!(
            view.aggregations[0].stats,
            AggregatorStats::Count(crate::stats::aggregator::CountStats { count: 10 })
        );
    }

    #[tokio::test]
    async fn test_spawn_rejects_unusable_config() {
        let zero_interval = StatsConfig {
            report_interval: Duration::ZERO,
            ..StatsConfig::default()
        };
        assert!(matches!(
            spawn_worker(&zero_interval),
            Err(ConfigError::Invalid(_))
        ));

        let zero_capacity = StatsConfig {
            subscriber_capacity: 0,
            ..test_config()
        };
        assert!(matches!(
            spawn_worker(&zero_capacity),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_subscriber_channel_uses_configured_capacity() {
        let config = StatsConfig {
            subscriber_capacity: 3,
            ..test_config()
        };
        let (handle, _join) = spawn_worker(&config).unwrap();
        let (tx, _rx) = handle.subscriber_channel();
        assert_eq!(tx.max_capacity(), 3);
        handle.shutdown().await.unwrap();
    }
}
