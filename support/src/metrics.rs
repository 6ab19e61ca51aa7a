use prometheus::{IntCounter, Registry};
use tracing::warn;

/// Metrics for the chaincode stream handler.
#[derive(Debug)]
pub struct HandlerMetrics {
    /// Number of incoming ledger messages dropped because their (channel,
    /// txid) was already being processed. The drop itself is silent on the
    /// wire; this counter is the only trace it leaves.
    pub(crate) duplicate_transactions_dropped: IntCounter,
    /// Number of KEEPALIVE probes sent on idle streams.
    pub(crate) keepalives_sent: IntCounter,
    /// Number of streams that ended with a transport or protocol error.
    pub(crate) stream_failures: IntCounter,
    /// Reference to the registry for unregistering.
    registry: Registry,
}

impl HandlerMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let duplicate_transactions_dropped = IntCounter::new(
            "handler_duplicate_transactions_dropped_total",
            "number of incoming ledger messages dropped as concurrent duplicates",
        )?;
        let keepalives_sent = IntCounter::new(
            "handler_keepalives_sent_total",
            "number of keepalive messages sent on idle chaincode streams",
        )?;
        let stream_failures = IntCounter::new(
            "handler_stream_failures_total",
            "number of chaincode streams that ended with an error",
        )?;
        registry.register(Box::new(duplicate_transactions_dropped.clone()))?;
        registry.register(Box::new(keepalives_sent.clone()))?;
        registry.register(Box::new(stream_failures.clone()))?;

        Ok(HandlerMetrics {
            duplicate_transactions_dropped,
            keepalives_sent,
            stream_failures,
            registry: registry.clone(),
        })
    }
}

impl Drop for HandlerMetrics {
    fn drop(&mut self) {
        self.registry
            .unregister(Box::new(self.duplicate_transactions_dropped.clone()))
            .unwrap_or_else(|err| {
                warn!(%err, "did not expect deregistering duplicate_transactions_dropped to fail")
            });
        self.registry
            .unregister(Box::new(self.keepalives_sent.clone()))
            .unwrap_or_else(|err| {
                warn!(%err, "did not expect deregistering keepalives_sent to fail")
            });
        self.registry
            .unregister(Box::new(self.stream_failures.clone()))
            .unwrap_or_else(|err| {
                warn!(%err, "did not expect deregistering stream_failures to fail")
            });
    }
}
