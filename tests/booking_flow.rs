use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use ulid::Ulid;

use innkeep::{
    BookingStatus, CancelActor, Discount, Engine, LedgerPayments, ManualClock, NotifyHub,
    PolicyConfig, StaticPromos,
};

fn d(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("innkeep_test_flow");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// One booking travelling the whole happy path through the public API:
/// search → quote → create → pay → confirm → activate → early checkout →
/// complete, with the sweep driving the time-triggered steps.
#[tokio::test]
async fn full_booking_lifecycle() {
    innkeep::observability::init_logging();
    let clock = Arc::new(ManualClock::new(d("2024-06-01"), 0));
    let payments = Arc::new(LedgerPayments::new());
    let promos = Arc::new(StaticPromos::new());
    promos.insert("JUNE10", Discount::percentage(10));

    let engine = Engine::new(
        test_wal_path("full_lifecycle.wal"),
        Arc::new(NotifyHub::new()),
        PolicyConfig::default(),
        clock.clone(),
        payments.clone(),
        promos.clone(),
    )
    .unwrap();

    let property_id = Ulid::new();
    engine.create_property(property_id, Some("Harbor House".into())).await.unwrap();
    let room_id = Ulid::new();
    engine
        .create_room(room_id, Some(property_id), Some("Seaview Double".into()), 10_000, 2, 1, 14)
        .await
        .unwrap();

    // Search finds the room, the quote applies the promo
    let found = engine
        .find_available_rooms(d("2024-06-03"), d("2024-06-08"), 2)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, room_id);

    let quote = engine
        .calculate_price(room_id, d("2024-06-03"), d("2024-06-08"), 2, Some("JUNE10"))
        .await
        .unwrap();
    assert_eq!(quote.subtotal, 50_000);
    assert_eq!(quote.total, 45_000);

    let booking = engine
        .create_booking(
            Ulid::new(),
            room_id,
            Some(Ulid::new()),
            d("2024-06-03"),
            d("2024-06-08"),
            2,
            Some("JUNE10"),
            json!({"channel": "web"}),
        )
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.total_price, 45_000);

    // The room is gone from search while the booking is open
    let found = engine
        .find_available_rooms(d("2024-06-03"), d("2024-06-08"), 2)
        .await
        .unwrap();
    assert!(found.is_empty());

    payments.record_payment(booking.id, booking.total_price);
    let confirmed = engine.confirm_booking(booking.id, Ulid::new()).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    // Check-in day: the sweep activates the stay
    clock.set_today(d("2024-06-03"));
    let report = engine.run_scheduled_sweep().await;
    assert_eq!(report.activated, vec![booking.id]);

    // Guest leaves two nights early; half the night rate comes back
    clock.set_today(d("2024-06-05"));
    let outcome = engine
        .apply_early_checkout(booking.id, d("2024-06-06"), "flight moved", true)
        .await
        .unwrap();
    assert_eq!(outcome.refund_amount, 10_000); // 2 × 10000 × 50%
    assert!(outcome.record.is_some());

    // Check-out passed: the sweep completes the stay
    clock.set_today(d("2024-06-06"));
    let report = engine.run_scheduled_sweep().await;
    assert_eq!(report.completed, vec![booking.id]);

    let done = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(done.status, BookingStatus::Completed);
    assert_eq!(done.stay.end, d("2024-06-06"));
    assert_eq!(done.refund_amount, Some(10_000));

    // Terminal bookings free the calendar for the same dates next guest
    let rebook = engine
        .create_booking(
            Ulid::new(),
            room_id,
            None,
            d("2024-06-06"),
            d("2024-06-08"),
            2,
            None,
            json!({}),
        )
        .await
        .unwrap();
    assert_eq!(rebook.status, BookingStatus::Pending);
}

#[tokio::test]
async fn rejection_refunds_and_releases_dates() {
    let clock = Arc::new(ManualClock::new(d("2024-06-01"), 0));
    let payments = Arc::new(LedgerPayments::new());
    let engine = Engine::new(
        test_wal_path("reject_flow.wal"),
        Arc::new(NotifyHub::new()),
        PolicyConfig::default(),
        clock,
        payments.clone(),
        Arc::new(StaticPromos::new()),
    )
    .unwrap();

    let room_id = Ulid::new();
    engine.create_room(room_id, None, None, 8000, 3, 1, 30).await.unwrap();

    let booking = engine
        .create_booking(Ulid::new(), room_id, None, d("2024-06-10"), d("2024-06-12"), 3, None, json!({}))
        .await
        .unwrap();
    payments.record_payment(booking.id, booking.total_price);

    let rejected = engine
        .reject_booking(booking.id, Ulid::new(), "maintenance issue found")
        .await
        .unwrap();
    assert_eq!(rejected.status, BookingStatus::Rejected);
    assert_eq!(rejected.refund_amount, Some(16_000));

    let res = engine
        .check_availability(room_id, d("2024-06-10"), d("2024-06-12"), 2, None)
        .await
        .unwrap();
    assert!(res.available);
}

#[tokio::test]
async fn guest_cancellation_with_full_refund() {
    let clock = Arc::new(ManualClock::new(d("2024-06-01"), 0));
    let payments = Arc::new(LedgerPayments::new());
    let engine = Engine::new(
        test_wal_path("cancel_flow.wal"),
        Arc::new(NotifyHub::new()),
        PolicyConfig::default(),
        clock,
        payments.clone(),
        Arc::new(StaticPromos::new()),
    )
    .unwrap();

    let room_id = Ulid::new();
    engine.create_room(room_id, None, None, 5000, 2, 1, 30).await.unwrap();

    // Two months out: comfortably before the cutoff
    let booking = engine
        .create_booking(Ulid::new(), room_id, None, d("2024-08-01"), d("2024-08-04"), 2, None, json!({}))
        .await
        .unwrap();
    payments.record_payment(booking.id, booking.total_price);
    engine.confirm_booking(booking.id, Ulid::new()).await.unwrap();

    let out = engine
        .cancel_booking(booking.id, CancelActor::Guest(None), "plans changed", true)
        .await
        .unwrap();
    assert_eq!(out.refund_amount, 15_000);
    assert_eq!(out.booking.status, BookingStatus::Cancelled);
    assert_eq!(out.booking.cancel_reason.as_deref(), Some("plans changed"));
}
