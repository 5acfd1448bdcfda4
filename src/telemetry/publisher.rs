//! Publishing flattened state to an external retained-message sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{Publication, StateTree, StateValue, flatten};
use crate::error::SinkError;

/// First topic segment of everything this process publishes.
pub const TOPIC_ROOT: &str = "prosumers";

/// Topic (below the site prefix) carrying the online flag and last will.
pub const ONLINE_KEY: &str = "isOnline";

/// Destination for flattened state, e.g. an MQTT broker.
#[async_trait]
pub trait StateSink: Send + Sync {
    /// Publishes one leaf value.
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), SinkError>;
}

/// Short site id: the token after the last `:` of the site address.
///
/// # Examples
///
/// ```
/// use prosumer_sim::telemetry::publisher::short_site_id;
///
/// assert_eq!(short_site_id("vp:site-42"), "site-42");
/// assert_eq!(short_site_id("plain"), "plain");
/// ```
pub fn short_site_id(vp_address: &str) -> &str {
    vp_address.rsplit(':').next().unwrap_or(vp_address)
}

/// Outcome of publishing one state tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Flattens state trees under `prosumers/{site}/...` and hands them to a sink.
///
/// Sink failures are counted and never abort the remaining leaves. Each call
/// logs at most one warning, however many leaves failed.
#[derive(Clone)]
pub struct StatePublisher {
    sink: Arc<dyn StateSink>,
    prefix: String,
}

impl StatePublisher {
    pub fn new(sink: Arc<dyn StateSink>, short_site_id: &str) -> Self {
        Self {
            sink,
            prefix: format!("{TOPIC_ROOT}/{short_site_id}"),
        }
    }

    /// `prosumers/{site}`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full topic for a path below the site prefix.
    pub fn topic(&self, path: &str) -> String {
        format!("{}/{path}", self.prefix)
    }

    /// Publishes every leaf of `tree` below `prosumers/{site}/{entity_root}`.
    pub async fn publish_state(&self, entity_root: &str, tree: &StateTree) -> PublishReport {
        let root = self.topic(entity_root);
        let publications = flatten(&root, tree);
        self.publish_all(&root, &publications).await
    }

    /// Publishes a single retained value directly below the site prefix.
    pub async fn publish_value(&self, key: &str, value: StateValue) -> PublishReport {
        let mut tree = StateTree::new();
        tree.insert(key.to_string(), value);
        let publications = flatten(&self.prefix, &tree);
        self.publish_all(&self.prefix, &publications).await
    }

    /// Marks the site online; the transport's last will flips it back.
    pub async fn announce_online(&self) -> PublishReport {
        self.publish_value(ONLINE_KEY, StateValue::Bool(true)).await
    }

    async fn publish_all(&self, root: &str, publications: &[Publication]) -> PublishReport {
        let mut report = PublishReport::default();
        for publication in publications {
            match self
                .sink
                .publish(&publication.topic, &publication.payload, publication.retain)
                .await
            {
                Ok(()) => {
                    tracing::trace!(
                        topic = %publication.topic,
                        payload = %publication.payload,
                        "published"
                    );
                    report.published += 1;
                }
                Err(error) => {
                    tracing::debug!(topic = %publication.topic, %error, "publish failed");
                    report.failed += 1;
                }
            }
        }
        if !report.is_clean() {
            tracing::warn!(
                root,
                failed = report.failed,
                published = report.published,
                "state publish incomplete"
            );
        }
        report
    }
}

/// Sink that keeps every publication in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Publication>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent publishes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn publications(&self) -> Vec<Publication> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest payload seen for `topic`.
    pub fn last_payload(&self, topic: &str) -> Option<String> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .map(|p| p.payload.clone())
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl StateSink for MemorySink {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError(format!("rejected {topic}")));
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Publication {
                topic: topic.to_string(),
                payload: payload.to_string(),
                retain,
            });
        Ok(())
    }
}

/// Sink that only logs, for running without a broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl StateSink for LogSink {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), SinkError> {
        tracing::info!(%topic, %payload, retain, "publish");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher(sink: &Arc<MemorySink>) -> StatePublisher {
        StatePublisher::new(sink.clone(), "site-1")
    }

    #[test]
    fn short_site_id_takes_last_token() {
        assert_eq!(short_site_id("urn:vp:abc"), "abc");
        assert_eq!(short_site_id("abc:"), "");
    }

    #[tokio::test]
    async fn publish_state_prefixes_site_and_entity() {
        let sink = Arc::new(MemorySink::new());
        let mut tree = StateTree::new();
        tree.insert("power".into(), StateValue::Float(2.5));
        tree.insert("$internal".into(), StateValue::Int(1));

        let report = publisher(&sink).publish_state("generations/pv", &tree).await;

        assert_eq!(report, PublishReport { published: 1, failed: 0 });
        let published = sink.publications();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "prosumers/site-1/generations/pv/power");
        assert_eq!(published[0].payload, "2.5");
        assert!(published[0].retain);
    }

    #[tokio::test]
    async fn announce_online_publishes_retained_flag() {
        let sink = Arc::new(MemorySink::new());
        let report = publisher(&sink).announce_online().await;
        assert!(report.is_clean());
        assert_eq!(
            sink.last_payload("prosumers/site-1/isOnline").as_deref(),
            Some("true")
        );
    }

    #[tokio::test]
    async fn sink_failures_are_counted_not_fatal() {
        let sink = Arc::new(MemorySink::new());
        sink.set_failing(true);
        let mut tree = StateTree::new();
        tree.insert("a".into(), StateValue::Int(1));
        tree.insert("b".into(), StateValue::Int(2));

        let report = publisher(&sink).publish_state("x", &tree).await;
        assert_eq!(report, PublishReport { published: 0, failed: 2 });
        assert!(sink.is_empty());

        sink.set_failing(false);
        let report = publisher(&sink).publish_state("x", &tree).await;
        assert!(report.is_clean());
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn each_call_reports_only_its_own_failures() {
        let sink = Arc::new(MemorySink::new());
        sink.set_failing(true);
        let publisher = publisher(&sink);
        let mut tree = StateTree::new();
        tree.insert("a".into(), StateValue::Int(1));

        for _ in 0..3 {
            let report = publisher.publish_state("x", &tree).await;
            assert_eq!(report, PublishReport { published: 0, failed: 1 });
        }
        let report = publisher.announce_online().await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn log_sink_accepts_everything() {
        let sink = LogSink;
        assert!(sink.publish("t", "p", true).await.is_ok());
    }
}
