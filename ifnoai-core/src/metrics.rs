use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus collectors for the sinkhole, registered into a caller's registry.
pub struct SinkholeMetrics {
    pub(crate) hits_total: IntCounterVec,
    pub(crate) connections_active: IntGauge,
    pub(crate) connection_errors_total: IntCounterVec,
    pub(crate) listeners_active: IntGauge,
}

impl SinkholeMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let hits_total = IntCounterVec::new(
            Opts::new(
                "ifnoai_hits_total",
                "Total number of intercepted connections",
            ),
            &["protocol", "classified"],
        )?;
        registry.register(Box::new(hits_total.clone()))?;

        let connections_active = IntGauge::new(
            "ifnoai_connections_active",
            "Number of connections currently being handled",
        )?;
        registry.register(Box::new(connections_active.clone()))?;

        let connection_errors_total = IntCounterVec::new(
            Opts::new(
                "ifnoai_connection_errors_total",
                "Suppressed per-connection I/O errors by stage",
            ),
            &["stage"],
        )?;
        registry.register(Box::new(connection_errors_total.clone()))?;

        let listeners_active = IntGauge::new(
            "ifnoai_listeners_active",
            "Number of running accept loops",
        )?;
        registry.register(Box::new(listeners_active.clone()))?;

        Ok(Self {
            hits_total,
            connections_active,
            connection_errors_total,
            listeners_active,
        })
    }
}
