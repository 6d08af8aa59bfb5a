/*!
 * # Metrics Module
 *
 * Prometheus counters for checkout and payment reconciliation, kept in a
 * process-wide registry and rendered in the text exposition format at
 * `/metrics`.
 */

use lazy_static::lazy_static;
use prometheus::{core::Collector, Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Orders inserted into the store.
    pub static ref ORDERS_CREATED: IntCounter = register(
        IntCounter::new("storefront_orders_created_total", "Total number of orders created")
            .expect("metric can be created")
    );

    /// Create-order calls answered with an existing order.
    pub static ref DUPLICATE_ORDER_ATTEMPTS: IntCounter = register(
        IntCounter::new(
            "storefront_duplicate_order_attempts_total",
            "Create-order calls for a payment reference that already has an order"
        )
        .expect("metric can be created")
    );

    /// Terminal reconciliation states by outcome.
    pub static ref RECONCILIATION_OUTCOMES: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new(
                "storefront_reconciliation_outcomes_total",
                "Payment callback reconciliations by terminal outcome"
            ),
            &["outcome"]
        )
        .expect("metric can be created")
    );

    /// Gateway verification lookups by result.
    pub static ref GATEWAY_VERIFICATIONS: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new(
                "storefront_gateway_verifications_total",
                "Payment gateway verification calls by result"
            ),
            &["result"]
        )
        .expect("metric can be created")
    );
}

fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    if let Err(err) = REGISTRY.register(Box::new(collector.clone())) {
        warn!(error = %err, "metric registration failed");
    }
    collector
}

pub fn record_reconciliation(outcome: &str) {
    RECONCILIATION_OUTCOMES.with_label_values(&[outcome]).inc();
}

pub fn record_verification(result: &str) {
    GATEWAY_VERIFICATIONS.with_label_values(&[result]).inc();
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    // Touch the lazies so every family appears even before its first increment.
    lazy_static::initialize(&ORDERS_CREATED);
    lazy_static::initialize(&DUPLICATE_ORDER_ATTEMPTS);
    lazy_static::initialize(&RECONCILIATION_OUTCOMES);
    lazy_static::initialize(&GATEWAY_VERIFICATIONS);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_rendered_output() {
        record_reconciliation("created");
        ORDERS_CREATED.inc();

        let text = render().unwrap();
        assert!(text.contains("storefront_orders_created_total"));
        assert!(text.contains("storefront_reconciliation_outcomes_total{outcome=\"created\"}"));
    }
}
