use std::net::SocketAddr;

use crate::model::Event;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "innkeep_bookings_created_total";

/// Counter: persisted state changes. Labels: event.
pub const EVENTS_TOTAL: &str = "innkeep_events_total";

/// Counter: availability checks that came back unavailable.
pub const AVAILABILITY_DENIALS_TOTAL: &str = "innkeep_availability_denials_total";

/// Counter: price quotes served.
pub const QUOTES_TOTAL: &str = "innkeep_price_quotes_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: scheduled sweep runs.
pub const SWEEP_RUNS_TOTAL: &str = "innkeep_sweep_runs_total";

/// Counter: bookings transitioned by sweep passes. Labels: pass.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "innkeep_sweep_transitions_total";

/// Counter: per-item sweep failures (isolated, never abort the batch).
pub const SWEEP_FAILURES_TOTAL: &str = "innkeep_sweep_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Install the fmt tracing subscriber. Embedders that bring their own
/// subscriber skip this and the call is a no-op.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map an Event variant to a short label for metrics.
pub fn event_label(event: &Event) -> &'static str {
    match event {
        Event::PropertyCreated { .. } => "property_created",
        Event::ClosureAdded { .. } => "closure_added",
        Event::ClosureRemoved { .. } => "closure_removed",
        Event::RoomCreated { .. } => "room_created",
        Event::RoomUpdated { .. } => "room_updated",
        Event::RoomActiveSet { .. } => "room_active_set",
        Event::BookingCreated { .. } => "booking_created",
        Event::PaymentPendingMarked { .. } => "payment_pending",
        Event::BookingConfirmed { .. } => "booking_confirmed",
        Event::BookingRejected { .. } => "booking_rejected",
        Event::BookingActivated { .. } => "booking_activated",
        Event::BookingCompleted { .. } => "booking_completed",
        Event::BookingCancelled { .. } => "booking_cancelled",
        Event::DateChangeRequested { .. } => "date_change_requested",
        Event::DateChangeApproved { .. } => "date_change_approved",
        Event::DateChangeRejected { .. } => "date_change_rejected",
        Event::EarlyCheckoutApplied { .. } => "early_checkout",
    }
}
