use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    // Ledger metrics
    pub static ref LEDGER_ENTRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wallet_ledger_entries_total", "Ledger entries written"),
        &["direction", "entry_type"]
    ).expect("metric can be created");

    pub static ref POINTS_MOVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wallet_points_moved_total", "Points credited or debited"),
        &["direction"]
    ).expect("metric can be created");

    pub static ref MUTATIONS_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wallet_mutations_rejected_total", "Balance mutations rejected before commit"),
        &["reason"]
    ).expect("metric can be created");

    // Payment token metrics
    pub static ref PAYMENT_TOKENS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("wallet_payment_tokens_total", "Payment token lifecycle transitions"),
        &["outcome"]
    ).expect("metric can be created");

    // Audit metrics
    pub static ref AUDIT_RECORDS_DROPPED: IntCounter = IntCounter::new(
        "wallet_audit_records_dropped_total",
        "Audit records dropped because the channel was full or closed"
    ).expect("metric can be created");

    pub static ref AUDIT_WRITE_FAILURES: IntCounter = IntCounter::new(
        "wallet_audit_write_failures_total",
        "Audit records the sink failed to persist"
    ).expect("metric can be created");
}

/// Register all metrics with the given registry
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(LEDGER_ENTRIES_TOTAL.clone()))?;
    registry.register(Box::new(POINTS_MOVED_TOTAL.clone()))?;
    registry.register(Box::new(MUTATIONS_REJECTED_TOTAL.clone()))?;
    registry.register(Box::new(PAYMENT_TOKENS_TOTAL.clone()))?;
    registry.register(Box::new(AUDIT_RECORDS_DROPPED.clone()))?;
    registry.register(Box::new(AUDIT_WRITE_FAILURES.clone()))?;

    Ok(())
}

/// Render a registry in Prometheus text format
pub fn render(registry: &Registry) -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let registry = Registry::new();
        assert!(register_metrics(&registry).is_ok());
    }

    #[test]
    fn test_render_contains_counters() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();
        PAYMENT_TOKENS_TOTAL.with_label_values(&["issued"]).inc();

        let output = render(&registry).unwrap();
        assert!(output.contains("wallet_payment_tokens_total"));
    }
}
