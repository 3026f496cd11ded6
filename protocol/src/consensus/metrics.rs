//! Prometheus counters for the consensus driver.
//!
//! Dropped messages are counted per reason so a dashboard can tell a
//! misbehaving peer (`request_signature_invalid`) from plain network
//! noise (`unknown_request`). The label set is the fixed list returned by
//! `ConsensusError::reason`.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

#[derive(Clone, Debug)]
pub struct ConsensusMetrics {
    /// Messages dropped by the driver, labelled by `reason`.
    pub dropped_total: IntCounterVec,
    pub rounds_started_total: IntCounter,
    pub rounds_finalized_total: IntCounter,
    pub rounds_expired_total: IntCounter,
    pub replies_sent_total: IntCounter,
    /// Rounds currently held in the registry.
    pub live_rounds: IntGauge,
}

impl ConsensusMetrics {
    /// Creates the counters and registers them in `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.dropped_total.clone()))?;
        registry.register(Box::new(metrics.rounds_started_total.clone()))?;
        registry.register(Box::new(metrics.rounds_finalized_total.clone()))?;
        registry.register(Box::new(metrics.rounds_expired_total.clone()))?;
        registry.register(Box::new(metrics.replies_sent_total.clone()))?;
        registry.register(Box::new(metrics.live_rounds.clone()))?;
        Ok(metrics)
    }

    /// Counters that are not exported anywhere. Used by tests and benches.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Ok(Self {
            dropped_total: IntCounterVec::new(
                Opts::new(
                    "consensus_messages_dropped_total",
                    "Consensus messages dropped, by reason",
                ),
                &["reason"],
            )?,
            rounds_started_total: IntCounter::new(
                "consensus_rounds_started_total",
                "Rounds started by this node",
            )?,
            rounds_finalized_total: IntCounter::new(
                "consensus_rounds_finalized_total",
                "Rounds that reached commit quorum",
            )?,
            rounds_expired_total: IntCounter::new(
                "consensus_rounds_expired_total",
                "Rounds that passed their deadline without replying",
            )?,
            replies_sent_total: IntCounter::new(
                "consensus_replies_sent_total",
                "Reply messages sent to clients",
            )?,
            live_rounds: IntGauge::new("consensus_live_rounds", "Rounds held in memory")?,
        })
    }

    pub fn dropped(&self, reason: &str) {
        self.dropped_total.with_label_values(&[reason]).inc();
    }

    pub fn dropped_count(&self, reason: &str) -> u64 {
        self.dropped_total.with_label_values(&[reason]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_once_per_registry() {
        let registry = Registry::new();
        let metrics = ConsensusMetrics::new(&registry).unwrap();
        metrics.dropped("wrong_primary");
        metrics.dropped("wrong_primary");
        assert_eq!(metrics.dropped_count("wrong_primary"), 2);
        assert_eq!(metrics.dropped_count("unknown_request"), 0);

        assert!(ConsensusMetrics::new(&registry).is_err());
        assert!(registry
            .gather()
            .iter()
            .any(|f| f.get_name() == "consensus_messages_dropped_total"));
    }
}
