use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::{ApprovalStatus, BookingStatus};

/// What one sweep run did. Re-running immediately yields empty lists —
/// every pass is idempotent.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub activated: Vec<Ulid>,
    pub completed: Vec<Ulid>,
    pub cancelled: Vec<Ulid>,
    pub expired_requests: Vec<Ulid>,
    /// Per-item infrastructure failures; the batch never aborts.
    pub failures: Vec<(Ulid, String)>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.activated.is_empty()
            && self.completed.is_empty()
            && self.cancelled.is_empty()
            && self.expired_requests.is_empty()
            && self.failures.is_empty()
    }
}

impl Engine {
    /// Snapshot time-due bookings per pass. Rooms locked for writing by a
    /// live transition are skipped — the next run picks them up.
    fn collect_due(&self) -> (Vec<Ulid>, Vec<Ulid>, Vec<Ulid>) {
        let today = self.clock.today();
        let now = self.clock.now_ms();
        let mut to_activate = Vec::new();
        let mut to_complete = Vec::new();
        let mut unpaid = Vec::new();

        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for b in &guard.bookings {
                    match b.status {
                        BookingStatus::Confirmed if b.stay.start <= today => {
                            to_activate.push(b.id);
                        }
                        BookingStatus::Active if b.stay.end <= today => {
                            to_complete.push(b.id);
                        }
                        BookingStatus::Pending
                            if now - b.created_at >= self.policy.unpaid_grace =>
                        {
                            unpaid.push(b.id);
                        }
                        _ => {}
                    }
                }
            }
        }
        (to_activate, to_complete, unpaid)
    }

    /// One batch run over all bookings: activate confirmed stays whose
    /// check-in arrived, complete active stays whose check-out passed,
    /// auto-cancel unpaid pending bookings past the grace period, and
    /// reject date-change requests orphaned by a terminal booking.
    ///
    /// Every item goes through the normal status-guarded transition, so a
    /// booking concurrently moved by a user is simply skipped. Domain
    /// refusals are debug-logged; infrastructure errors are recorded
    /// per item and never abort the batch.
    pub async fn run_scheduled_sweep(&self) -> SweepReport {
        metrics::counter!(crate::observability::SWEEP_RUNS_TOTAL).increment(1);
        let mut report = SweepReport::default();
        let (to_activate, to_complete, unpaid) = self.collect_due();

        for id in to_activate {
            match self.activate_booking(id).await {
                Ok(_) => report.activated.push(id),
                Err(e) => record_miss(&mut report, "activate", id, e),
            }
        }

        for id in to_complete {
            match self.complete_booking(id).await {
                Ok(_) => report.completed.push(id),
                Err(e) => record_miss(&mut report, "complete", id, e),
            }
        }

        for id in unpaid {
            match self.auto_cancel_unpaid(id).await {
                Ok(Some(_)) => report.cancelled.push(id),
                Ok(None) => {} // paid after all, or back inside grace
                Err(e) => record_miss(&mut report, "auto-cancel", id, e),
            }
        }

        // Housekeeping: requests left pending on closed bookings.
        let orphan_candidates: Vec<Ulid> = self
            .date_changes
            .iter()
            .filter(|e| e.value().status == ApprovalStatus::Pending)
            .map(|e| *e.key())
            .collect();
        for id in orphan_candidates {
            match self.expire_orphaned_date_change(id).await {
                Ok(true) => report.expired_requests.push(id),
                Ok(false) => {}
                Err(e) => record_miss(&mut report, "expire-request", id, e),
            }
        }

        for (pass, count) in [
            ("activate", report.activated.len()),
            ("complete", report.completed.len()),
            ("auto-cancel", report.cancelled.len()),
            ("expire-request", report.expired_requests.len()),
        ] {
            if count > 0 {
                metrics::counter!(
                    crate::observability::SWEEP_TRANSITIONS_TOTAL,
                    "pass" => pass
                )
                .increment(count as u64);
            }
        }

        if !report.is_empty() {
            info!(
                activated = ?report.activated,
                completed = ?report.completed,
                cancelled = ?report.cancelled,
                expired_requests = ?report.expired_requests,
                failures = report.failures.len(),
                "sweep run finished"
            );
        }
        report
    }
}

fn record_miss(
    report: &mut SweepReport,
    pass: &'static str,
    id: Ulid,
    e: crate::engine::EngineError,
) {
    if e.is_infrastructure() {
        error!("sweep {pass} failed for {id}: {e}");
        metrics::counter!(crate::observability::SWEEP_FAILURES_TOTAL).increment(1);
        report.failures.push((id, e.to_string()));
    } else {
        // Lost the optimistic race to a live transition — expected
        debug!("sweep {pass} skip {id}: {e}");
    }
}

/// Background task driving the scheduled sweep.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        engine.run_scheduled_sweep().await;
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await > threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => error!("WAL compaction failed: {e}"),
            }
        }
    }
}
