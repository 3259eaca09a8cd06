use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::broadcast::error::TryRecvError;
use ulid::Ulid;

use super::*;
use crate::model::*;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomsync_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open(path: &PathBuf) -> Engine {
    Engine::open(path, SlotClock::default(), EventBus::default()).unwrap()
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
}

fn at(h: u32, m: u32) -> chrono::NaiveDateTime {
    day().and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

/// "now" well before `day()`, so no retroactive cutoff applies.
fn before_day() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

// ── BookingService ───────────────────────────────────────

#[tokio::test]
async fn book_then_read_back() {
    let path = test_wal_path("book_read_back.wal");
    let engine = open(&path);

    let r = engine.book("A201", day(), 20, 4, "alice").await.unwrap();
    assert_eq!(r.room_name, "A201");
    assert_eq!(r.span(), SlotSpan::new(20, 24));
    assert_eq!(r.owner_id, "alice");

    assert_eq!(engine.list_for_room_day("A201", day()).await, vec![r.clone()]);
    assert_eq!(engine.list_reservations("alice").await, vec![r.clone()]);
    assert!(engine.list_reservations("bob").await.is_empty());
    assert_eq!(engine.store.get(r.id).await, Some(r));
}

#[tokio::test]
async fn round_trip_through_availability() {
    let path = test_wal_path("round_trip.wal");
    let engine = open(&path);
    let now = before_day();

    let before = engine.availability_at("A201", day(), 2, now).await;
    assert!(before.contains(&30));

    let r = engine.book("A201", day(), 30, 2, "alice").await.unwrap();
    let during = engine.availability_at("A201", day(), 2, now).await;
    for blocked in 29..=31 {
        assert!(!during.contains(&blocked), "{blocked} still offered");
    }
    assert!(engine.list_reservations("alice").await.iter().any(|x| x.id == r.id));

    engine.cancel(r.id, "alice").await.unwrap();
    assert_eq!(engine.availability_at("A201", day(), 2, now).await, before);
    assert!(engine.list_reservations("alice").await.is_empty());
    assert!(engine.store.get(r.id).await.is_none());
}

#[tokio::test]
async fn availability_is_idempotent() {
    let path = test_wal_path("idempotent.wal");
    let engine = open(&path);
    engine.book("A201", day(), 20, 4, "alice").await.unwrap();
    engine.book("A201", day(), 33, 1, "bob").await.unwrap();

    let first = engine.availability_at("A201", day(), 3, before_day()).await;
    let second = engine.availability_at("A201", day(), 3, before_day()).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn morning_booking_blocks_one_hour_starts() {
    let path = test_wal_path("scenario_a201.wal");
    let engine = open(&path);
    engine.book("A201", day(), 20, 4, "alice").await.unwrap();

    let free = engine.availability_at("A201", day(), 2, before_day()).await;
    for blocked in [17, 18, 19, 20, 21, 22, 23] {
        assert!(!free.contains(&blocked));
    }
    assert!(free.contains(&16));
    assert!(free.contains(&24));

    // other rooms and days are untouched
    let other_room = engine.availability_at("B105", day(), 2, before_day()).await;
    assert_eq!(other_room.len(), 25);
    let next_day = day().succ_opt().unwrap();
    assert_eq!(engine.availability_at("A201", next_day, 2, before_day()).await.len(), 25);
}

#[tokio::test]
async fn retroactive_starts_are_not_offered() {
    let path = test_wal_path("retroactive.wal");
    let engine = open(&path);

    let free = engine.availability_at("A201", day(), 1, at(11, 45)).await;
    assert_eq!(free.first(), Some(&23));

    let yesterday_view = engine
        .availability_at("A201", day().pred_opt().unwrap(), 1, at(11, 45))
        .await;
    assert!(yesterday_view.is_empty());

    let after_close = engine.availability_at("A201", day(), 1, at(22, 0)).await;
    assert!(after_close.is_empty());
}

#[tokio::test]
async fn input_errors_fail_before_the_store() {
    let path = test_wal_path("input_errors.wal");
    let engine = open(&path);

    assert!(matches!(
        engine.book("A201", day(), 15, 2, "alice").await,
        Err(EngineError::OutOfWindow { slot: 15, .. })
    ));
    assert!(matches!(
        engine.book("A201", day(), 41, 2, "alice").await,
        Err(EngineError::OutOfWindow { .. })
    ));
    assert!(matches!(
        engine.book("A201", day(), 20, 0, "alice").await,
        Err(EngineError::InvalidDuration(_))
    ));
    assert!(matches!(
        engine.book("", day(), 20, 2, "alice").await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    assert_eq!(engine.store.reservation_count(), 0);
}

#[tokio::test]
async fn overlapping_booking_conflicts() {
    let path = test_wal_path("conflict.wal");
    let engine = open(&path);
    let first = engine.book("A201", day(), 20, 4, "alice").await.unwrap();

    match engine.book("A201", day(), 23, 2, "bob").await {
        Err(EngineError::Conflict { with, span }) => {
            assert_eq!(with, first.id);
            assert_eq!(span, SlotSpan::new(20, 24));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    // adjacent ranges are fine
    engine.book("A201", day(), 24, 2, "bob").await.unwrap();
    engine.book("A201", day(), 18, 2, "bob").await.unwrap();
    assert_eq!(engine.list_for_room_day("A201", day()).await.len(), 3);
}

#[tokio::test]
async fn cancel_by_non_owner_is_forbidden() {
    let path = test_wal_path("forbidden.wal");
    let engine = open(&path);
    let r = engine.book("A201", day(), 20, 2, "alice").await.unwrap();

    assert!(matches!(
        engine.cancel(r.id, "mallory").await,
        Err(EngineError::Forbidden(id)) if id == r.id
    ));
    assert_eq!(engine.store.get(r.id).await, Some(r.clone()));
    assert_eq!(engine.list_reservations("alice").await, vec![r]);
}

#[tokio::test]
async fn cancel_unknown_or_twice_is_not_found() {
    let path = test_wal_path("not_found.wal");
    let engine = open(&path);

    let ghost = Ulid::new();
    assert!(matches!(
        engine.cancel(ghost, "alice").await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));

    let r = engine.book("A201", day(), 20, 2, "alice").await.unwrap();
    engine.cancel(r.id, "alice").await.unwrap();
    assert!(matches!(
        engine.cancel(r.id, "alice").await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn past_slots_can_still_be_cancelled() {
    let path = test_wal_path("cancel_past.wal");
    let engine = open(&path);
    let long_ago = NaiveDate::from_ymd_opt(2020, 1, 6).unwrap();
    let r = engine.book("A201", long_ago, 16, 2, "alice").await.unwrap();
    engine.cancel(r.id, "alice").await.unwrap();
}

#[tokio::test]
async fn owner_listing_spans_rooms_and_days_in_order() {
    let path = test_wal_path("owner_listing.wal");
    let engine = open(&path);
    let tomorrow = day().succ_opt().unwrap();

    let c = engine.book("A201", tomorrow, 16, 1, "alice").await.unwrap();
    let b = engine.book("B105", day(), 30, 2, "alice").await.unwrap();
    let a = engine.book("A201", day(), 20, 2, "alice").await.unwrap();
    engine.book("A201", day(), 24, 2, "bob").await.unwrap();

    let ids: Vec<Ulid> = engine.list_reservations("alice").await.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![a.id, b.id, c.id]);
}

#[tokio::test]
async fn occupancy_merges_adjacent_bookings() {
    let path = test_wal_path("occupancy.wal");
    let engine = open(&path);
    engine.book("A201", day(), 20, 2, "alice").await.unwrap();
    engine.book("A201", day(), 22, 2, "bob").await.unwrap();
    engine.book("A201", day(), 30, 1, "bob").await.unwrap();

    assert_eq!(
        engine.occupancy("A201", day()).await,
        vec![SlotSpan::new(20, 24), SlotSpan::new(30, 31)]
    );
    assert!(engine.occupancy("A201", day().succ_opt().unwrap()).await.is_empty());
}

// ── Exclusivity ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_simultaneous_bookings_one_wins() {
    let path = test_wal_path("simultaneous.wal");
    let engine = Arc::new(open(&path));

    let (a, b) = tokio::join!(
        {
            let engine = engine.clone();
            tokio::spawn(async move { engine.book("A201", day(), 30, 2, "alice").await })
        },
        {
            let engine = engine.clone();
            tokio::spawn(async move { engine.book("A201", day(), 30, 2, "bob").await })
        }
    );
    let results = [a.unwrap(), b.unwrap()];
    let won: Vec<&Reservation> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(won.len(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(EngineError::Conflict { .. }))));
    assert_eq!(engine.list_for_room_day("A201", day()).await, vec![won[0].clone()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn n_overlapping_bookings_exactly_one_commits() {
    let path = test_wal_path("exclusive_n.wal");
    let engine = Arc::new(open(&path));

    // every candidate covers slot 30
    let mut handles = Vec::new();
    for i in 0..32u32 {
        let engine = engine.clone();
        let begin = 27 + (i % 4);
        handles.push(tokio::spawn(async move {
            engine.book("A201", day(), begin, 4, &format!("user{i}")).await
        }));
    }

    let mut committed = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => committed += 1,
            Err(EngineError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(conflicts, 31);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_mixed_bookings_never_overlap() {
    let path = test_wal_path("exclusive_mixed.wal");
    let engine = Arc::new(open(&path));

    let mut handles = Vec::new();
    for i in 0..200u32 {
        let engine = engine.clone();
        let room = if i % 3 == 0 { "B105" } else { "A201" };
        let begin = 16 + (i * 7) % 24;
        let duration = 1 + i % 3;
        handles.push(tokio::spawn(async move {
            engine.book(room, day(), begin, duration, "load").await
        }));
    }
    for h in handles {
        let _ = h.await.unwrap();
    }

    for room in ["A201", "B105"] {
        let committed = engine.list_for_room_day(room, day()).await;
        assert!(!committed.is_empty());
        for (i, a) in committed.iter().enumerate() {
            for b in &committed[i + 1..] {
                assert!(!a.span().overlaps(&b.span()), "{a:?} overlaps {b:?}");
            }
        }
    }
}

// ── Events ───────────────────────────────────────────────

#[tokio::test]
async fn commits_publish_created_and_cancelled() {
    let path = test_wal_path("publish.wal");
    let engine = open(&path);
    let mut rx = engine.bus.subscribe();

    let r = engine.book("A201", day(), 20, 2, "alice").await.unwrap();
    engine.cancel(r.id, "alice").await.unwrap();

    let created = rx.recv().await.unwrap();
    assert_eq!(created.kind, EventKind::Created);
    assert_eq!(created.reservation, r);
    let cancelled = rx.recv().await.unwrap();
    assert_eq!(cancelled.kind, EventKind::Cancelled);
    assert_eq!(cancelled.reservation.id, r.id);
    assert!(cancelled.seq > created.seq);
    assert_eq!(engine.store.last_seq(), cancelled.seq);
}

#[tokio::test]
async fn rejected_requests_publish_nothing() {
    let path = test_wal_path("publish_nothing.wal");
    let engine = open(&path);
    let r = engine.book("A201", day(), 20, 2, "alice").await.unwrap();
    let mut rx = engine.bus.subscribe();

    let _ = engine.book("A201", day(), 20, 2, "bob").await;
    let _ = engine.book("A201", day(), 50, 2, "bob").await;
    let _ = engine.cancel(r.id, "bob").await;
    let _ = engine.cancel(Ulid::new(), "bob").await;

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn event_order_matches_commit_order() {
    let path = test_wal_path("event_order.wal");
    let engine = Arc::new(open(&path));
    let mut rx = engine.bus.subscribe();

    let mut handles = Vec::new();
    for i in 0..40u32 {
        let engine = engine.clone();
        let room = format!("R{}", i % 5);
        handles.push(tokio::spawn(async move {
            engine.book(&room, day(), 16 + i / 5, 1, "alice").await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let mut seqs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seqs.push(event.seq);
    }
    assert_eq!(seqs, (1..=40).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn published_reservation_is_already_readable() {
    let path = test_wal_path("visible_before_publish.wal");
    let engine = Arc::new(open(&path));
    let mut rx = engine.bus.subscribe();

    let reader = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                let event = rx.recv().await.unwrap();
                assert!(engine.store.get(event.reservation.id).await.is_some());
            }
        })
    };
    for begin in 16..26 {
        engine.book("A201", day(), begin, 1, "alice").await.unwrap();
    }
    reader.await.unwrap();
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let (kept, gone) = {
        let engine = open(&path);
        let kept = engine.book("A201", day(), 20, 4, "alice").await.unwrap();
        let gone = engine.book("B105", day(), 30, 2, "bob").await.unwrap();
        engine.cancel(gone.id, "bob").await.unwrap();
        (kept, gone)
    };

    let engine = open(&path);
    assert_eq!(engine.list_reservations("alice").await, vec![kept.clone()]);
    assert!(engine.list_reservations("bob").await.is_empty());
    assert!(engine.store.get(gone.id).await.is_none());
    assert!(matches!(
        engine.book("A201", day(), 22, 1, "carol").await,
        Err(EngineError::Conflict { with, .. }) if with == kept.id
    ));
}

#[tokio::test]
async fn compaction_keeps_only_live_reservations() {
    let path = test_wal_path("compaction.wal");
    let live = {
        let engine = open(&path);
        let mut live = Vec::new();
        for begin in (16..36).step_by(2) {
            let r = engine.book("A201", day(), begin, 2, "alice").await.unwrap();
            if begin % 4 == 0 {
                live.push(r);
            } else {
                engine.cancel(r.id, "alice").await.unwrap();
            }
        }
        assert_eq!(engine.wal_appends_since_compact().await, 15);
        assert_eq!(engine.compact_wal().await.unwrap(), live.len());
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // appends after the swap land in the new file
        live.push(engine.book("A201", day(), 40, 2, "alice").await.unwrap());
        live
    };

    assert_eq!(crate::wal::Wal::replay(&path).unwrap().len(), live.len());
    let engine = open(&path);
    assert_eq!(engine.list_reservations("alice").await, live);
}

// ── WAL writer failures ──────────────────────────────────

fn created(begin: Slot) -> Event {
    Event::ReservationCreated(Reservation {
        id: Ulid::new(),
        room_name: "A201".into(),
        date: day(),
        begin_slot: begin,
        duration: 2,
        owner_id: "alice".into(),
    })
}

async fn append(tx: &tokio::sync::mpsc::Sender<WalCommand>, event: Event) -> std::io::Result<()> {
    let (response, rx) = tokio::sync::oneshot::channel();
    tx.send(WalCommand::Append { event, response }).await.unwrap();
    rx.await.unwrap()
}

#[tokio::test]
async fn failed_batch_never_reaches_the_log() {
    let path = test_wal_path("failed_batch.wal");
    let durable = created(16);
    let rejected = created(20);
    let later = created(24);

    let mut wal = Wal::open(&path).unwrap();
    wal.append_buffered(&durable).unwrap();
    wal.flush_sync().unwrap();
    // the failed batch's bytes are in the file before the sync reports an error
    wal.faults.sync = true;
    let tx = spawn_wal_writer(wal);

    assert!(append(&tx, rejected).await.is_err());
    append(&tx, later.clone()).await.unwrap();

    let (response, rx) = tokio::sync::oneshot::channel();
    tx.send(WalCommand::AppendsSinceCompact { response }).await.unwrap();
    assert_eq!(rx.await.unwrap(), 2);
    drop(tx);

    assert_eq!(Wal::replay(&path).unwrap(), vec![durable, later]);
}

#[tokio::test]
async fn writer_stops_when_rollback_fails() {
    let path = test_wal_path("rollback_fails.wal");
    let mut wal = Wal::open(&path).unwrap();
    wal.faults.sync = true;
    wal.faults.discard = true;
    let tx = spawn_wal_writer(wal);

    assert!(append(&tx, created(16)).await.is_err());
    let err = append(&tx, created(20)).await.unwrap_err();
    assert!(err.to_string().contains("stopped"), "{err}");

    let (response, rx) = tokio::sync::oneshot::channel();
    tx.send(WalCommand::Compact { events: Vec::new(), response }).await.unwrap();
    assert!(rx.await.unwrap().is_err());
}
