//! Relay metrics.
//!
//! Uses the global OpenTelemetry meter provider, which the host application
//! may install. Without one, recording is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("talkify-relay"))
}

// ============================================================================
// Counters
// ============================================================================

/// Counter for messages persisted and fanned out.
pub fn messages_routed() -> Counter<u64> {
    meter()
        .u64_counter("relay.messages.routed")
        .with_description("Total chat messages persisted and routed")
        .with_unit("message")
        .build()
}

/// Counter for messages rejected by the store.
pub fn messages_rejected() -> Counter<u64> {
    meter()
        .u64_counter("relay.messages.rejected")
        .with_description("Total chat messages rejected by the message store")
        .with_unit("message")
        .build()
}

/// Counter for envelopes dropped because a queue was full or closed.
pub fn envelopes_dropped() -> Counter<u64> {
    meter()
        .u64_counter("relay.envelopes.dropped")
        .with_description("Total outbound envelopes dropped")
        .with_unit("envelope")
        .build()
}

// ============================================================================
// Gauges
// ============================================================================

/// Gauge for registered connections.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("relay.connections.active")
        .with_description("Current number of registered chat connections")
        .with_unit("connection")
        .build()
}

// ============================================================================
// Histograms
// ============================================================================

/// Histogram for route latency (persist plus fan-out).
pub fn route_latency() -> Histogram<f64> {
    meter()
        .f64_histogram("relay.route.latency")
        .with_description("Time to persist and fan out one chat message")
        .with_unit("ms")
        .build()
}

// ============================================================================
// Recording Helpers
// ============================================================================

pub fn record_routed(receiver_online: bool) {
    messages_routed().add(
        1,
        &[KeyValue::new(
            "receiver",
            if receiver_online { "online" } else { "offline" },
        )],
    );
}

pub fn record_rejected(reason: &'static str) {
    messages_rejected().add(1, &[KeyValue::new("reason", reason)]);
}

pub fn record_dropped(reason: &'static str) {
    envelopes_dropped().add(1, &[KeyValue::new("reason", reason)]);
}

pub fn record_connection_count(count: usize) {
    connections_active().record(count as i64, &[]);
}

pub fn record_route_latency(latency_ms: f64) {
    route_latency().record(latency_ms, &[]);
}
