//! End-to-end lifecycle scenarios through the public `BetService`.

use chrono::Utc;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use wager::engine::{machine, AgreeOutcome, BetService, EngineConfig, FeeSchedule};
use wager::notify::{self, NotificationEvent, Outbox};
use wager::retry::RetryPolicy;
use wager::storage::{BetStore, InMemoryStore, SqliteStore};
use wager::types::{
    BetError, BetStatus, EvidenceKind, PaymentStatus, ResolutionType, CONSENSUS_RESOLVER,
};

use crate::mock_gateways::{new_bet, Harness, RecordingNotifier};

#[tokio::test]
async fn test_fan_out_two_winners_three_losers() {
    let mut h = Harness::new();

    // Joins close once a second side is taken, so a five-person line-up is
    // assembled directly and handed to the store already awaiting a verdict.
    let now = Utc::now();
    let (mut bet, _) = machine::create(
        "bet-fanout".to_string(),
        new_bet(ResolutionType::NeutralParty, dec!(50), &["Over", "Under"]),
        &FeeSchedule::default(),
        now,
    )
    .unwrap();
    for (user, side) in [("l1", "Under"), ("bob", "Over"), ("l2", "Under"), ("l3", "Under")] {
        bet.add_participant(user, user, side, now).unwrap();
    }
    bet.status = BetStatus::AwaitingResolution;
    h.store.insert(&bet).await.unwrap();

    let resolution = h.service.resolve_bet("bet-fanout", "Over", "judge").await.unwrap();
    assert_eq!(resolution.bet.winner.as_deref(), Some("Over"));
    assert_eq!(resolution.bet.resolved_by.as_deref(), Some("judge"));
    assert!(resolution.bet.resolution_is_consistent());

    let obligations = h.service.obligations_for_bet("bet-fanout").await.unwrap();
    assert_eq!(obligations.len(), 3);
    for ob in &obligations {
        assert_eq!(ob.amount, dec!(50));
        assert_eq!(ob.fee, dec!(1));
        assert_eq!(ob.to_user_id, "alice");
    }
    let mut payers: Vec<_> = obligations.iter().map(|o| o.from_user_id.clone()).collect();
    payers.sort();
    assert_eq!(payers, vec!["l1", "l2", "l3"]);

    let sent = h.drain();
    let payment_required = sent
        .iter()
        .filter(|n| n.event == NotificationEvent::PaymentRequired)
        .count();
    assert_eq!(payment_required, 3);
    let resolved = sent
        .iter()
        .find(|n| n.event == NotificationEvent::BetResolved)
        .unwrap();
    assert_eq!(resolved.targets.len(), 5);
    assert_eq!(resolved.payload["winner"], "Over");
}

#[tokio::test]
async fn test_single_sided_joins_stay_active() {
    let h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(30), &["Rain", "Shine"]))
        .await
        .unwrap();
    assert_eq!(bet.status, BetStatus::Pending);

    for user in ["bob", "carol", "dave"] {
        let bet = h.service.join_bet(&bet.id, user, user, "Rain").await.unwrap();
        assert_eq!(bet.status, BetStatus::Active);
    }

    let bet = h.service.join_bet(&bet.id, "erin", "Erin", "Shine").await.unwrap();
    assert_eq!(bet.status, BetStatus::AwaitingResolution);
    assert_eq!(bet.participants.len(), 5);
}

#[tokio::test]
async fn test_join_rejections() {
    let h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(30), &["Rain", "Shine"]))
        .await
        .unwrap();

    let dup = h.service.join_bet(&bet.id, "alice", "Alice", "Shine").await.unwrap_err();
    assert!(matches!(dup, BetError::Validation(_)));

    let unknown = h.service.join_bet(&bet.id, "bob", "Bob", "Hail").await.unwrap_err();
    assert!(matches!(unknown, BetError::Validation(_)));

    let arbiter = h.service.join_bet(&bet.id, "judge", "Judge", "Rain").await.unwrap_err();
    assert!(matches!(arbiter, BetError::Validation(_)));

    // None of the rejected calls touched the stored bet.
    let stored = h.store.load(&bet.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.bet.participants.len(), 1);
}

#[tokio::test]
async fn test_consensus_gating_three_participants() {
    let h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::EveryoneAgrees, dec!(40), &["Red", "Blue"]))
        .await
        .unwrap();
    h.service.join_bet(&bet.id, "bob", "Bob", "Red").await.unwrap();
    h.service.join_bet(&bet.id, "carol", "Carol", "Blue").await.unwrap();

    for user in ["alice", "bob"] {
        match h.service.agree_to_resolution(&bet.id, user, Some("Blue")).await.unwrap() {
            AgreeOutcome::Recorded { bet, .. } => assert_eq!(bet.status, BetStatus::AwaitingResolution),
            AgreeOutcome::Resolved(_) => panic!("resolved before everyone agreed"),
        }
    }

    match h.service.agree_to_resolution(&bet.id, "carol", Some("Blue")).await.unwrap() {
        AgreeOutcome::Resolved(res) => {
            assert_eq!(res.bet.winner.as_deref(), Some("Blue"));
            assert_eq!(res.bet.resolved_by.as_deref(), Some(CONSENSUS_RESOLVER));
            assert_eq!(res.settlement.created.len(), 2);
            assert!(res.settlement.created.iter().all(|o| o.to_user_id == "carol"));
        }
        AgreeOutcome::Recorded { .. } => panic!("third agreement with a side should resolve"),
    }
}

#[tokio::test]
async fn test_consensus_without_side_waits_for_a_named_winner() {
    let h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::EveryoneAgrees, dec!(40), &["Red", "Blue"]))
        .await
        .unwrap();
    h.service.join_bet(&bet.id, "bob", "Bob", "Blue").await.unwrap();

    h.service.agree_to_resolution(&bet.id, "alice", None).await.unwrap();
    let last = h.service.agree_to_resolution(&bet.id, "bob", None).await.unwrap();
    match last {
        AgreeOutcome::Recorded { progress, bet } => {
            assert!(progress.is_unanimous());
            assert_eq!(bet.status, BetStatus::AwaitingResolution);
        }
        AgreeOutcome::Resolved(_) => panic!("no side was named"),
    }

    // A repeat agreement that names the side settles it.
    let outcome = h.service.agree_to_resolution(&bet.id, "alice", Some("Red")).await.unwrap();
    assert!(matches!(outcome, AgreeOutcome::Resolved(ref r) if r.bet.winner.as_deref() == Some("Red")));

    let late = h.service.agree_to_resolution(&bet.id, "bob", Some("Blue")).await.unwrap_err();
    assert!(matches!(late, BetError::IllegalTransition { .. }));
}

#[tokio::test]
async fn test_consensus_cannot_override_a_dissenting_proposal() {
    let h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::EveryoneAgrees, dec!(40), &["Red", "Blue"]))
        .await
        .unwrap();
    h.service.join_bet(&bet.id, "bob", "Bob", "Blue").await.unwrap();

    h.service.agree_to_resolution(&bet.id, "alice", Some("Red")).await.unwrap();
    let overridden = h.service.agree_to_resolution(&bet.id, "bob", Some("Blue")).await.unwrap_err();
    assert!(matches!(overridden, BetError::IllegalTransition { .. }));

    let stored = h.service.get_bet(&bet.id).await.unwrap();
    assert_eq!(stored.status, BetStatus::AwaitingResolution);
    assert!(stored.winner.is_none());
    assert_eq!(h.service.agreement_progress(&bet.id).await.unwrap().agreed, 1);
    assert!(h.service.obligations_for_bet(&bet.id).await.unwrap().is_empty());

    // Bob concedes, which is a real unanimous verdict.
    match h.service.agree_to_resolution(&bet.id, "bob", Some("Red")).await.unwrap() {
        AgreeOutcome::Resolved(res) => {
            assert_eq!(res.bet.winner.as_deref(), Some("Red"));
            assert_eq!(res.settlement.created[0].from_user_id, "bob");
        }
        AgreeOutcome::Recorded { .. } => panic!("both participants named Red"),
    }
}

#[tokio::test]
async fn test_resolve_is_rejected_for_wrong_protocol_or_actor() {
    let h = Harness::new();
    let consensus = h
        .service
        .create_bet(new_bet(ResolutionType::EveryoneAgrees, dec!(40), &["Red", "Blue"]))
        .await
        .unwrap();
    h.service.join_bet(&consensus.id, "bob", "Bob", "Blue").await.unwrap();
    let err = h.service.resolve_bet(&consensus.id, "Red", "alice").await.unwrap_err();
    assert!(matches!(err, BetError::IllegalTransition { .. }));

    let neutral = h
        .service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(40), &["Red", "Blue"]))
        .await
        .unwrap();
    // Not yet awaiting resolution.
    let early = h.service.resolve_bet(&neutral.id, "Red", "judge").await.unwrap_err();
    assert!(matches!(early, BetError::IllegalTransition { .. }));

    h.service.join_bet(&neutral.id, "bob", "Bob", "Blue").await.unwrap();
    let outsider = h.service.resolve_bet(&neutral.id, "Red", "mallory").await.unwrap_err();
    assert!(matches!(
        outsider,
        BetError::IllegalTransition { required_role: Some(_), .. }
    ));

    let bad_side = h.service.resolve_bet(&neutral.id, "Green", "judge").await.unwrap_err();
    assert!(matches!(bad_side, BetError::Validation(_)));
}

#[tokio::test]
async fn test_double_resolve_creates_no_duplicate_obligations() {
    let h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(75), &["Yes", "No"]))
        .await
        .unwrap();
    h.service.join_bet(&bet.id, "bob", "Bob", "No").await.unwrap();

    h.service.resolve_bet(&bet.id, "Yes", "judge").await.unwrap();
    let second = h.service.resolve_bet(&bet.id, "No", "alice").await.unwrap_err();
    assert!(matches!(second, BetError::IllegalTransition { status: BetStatus::Resolved, .. }));

    let stored = h.service.get_bet(&bet.id).await.unwrap();
    assert_eq!(stored.winner.as_deref(), Some("Yes"));
    assert_eq!(h.service.obligations_for_bet(&bet.id).await.unwrap().len(), 1);
    assert_eq!(h.sink.calls(), 1);
}

#[tokio::test]
async fn test_sink_outage_is_retried_in_background() {
    let h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(75), &["Yes", "No"]))
        .await
        .unwrap();
    h.service.join_bet(&bet.id, "bob", "Bob", "No").await.unwrap();

    h.sink.set_error("payments backend unavailable");
    let resolution = h.service.resolve_bet(&bet.id, "No", "judge").await.unwrap();
    assert_eq!(resolution.bet.status, BetStatus::Resolved);
    assert_eq!(resolution.settlement.deferred.len(), 1);
    assert!(h.service.obligations_for_bet(&bet.id).await.unwrap().is_empty());

    h.sink.clear_error();

    let mut created = Vec::new();
    for _ in 0..50 {
        created = h.service.obligations_for_bet(&bet.id).await.unwrap();
        if !created.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].from_user_id, "alice");
    assert_eq!(created[0].to_user_id, "bob");
}

#[tokio::test]
async fn test_payments_complete_the_bet() {
    let h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(20), &["Yes", "No"]))
        .await
        .unwrap();
    h.service.join_bet(&bet.id, "bob", "Bob", "Yes").await.unwrap();
    h.service.join_bet(&bet.id, "carol", "Carol", "No").await.unwrap();
    h.service.resolve_bet(&bet.id, "No", "judge").await.unwrap();

    let winner_pays = h.service.record_payment(&bet.id, "carol").await.unwrap_err();
    assert!(matches!(winner_pays, BetError::IllegalTransition { .. }));

    let bet_after_one = h.service.record_payment(&bet.id, "alice").await.unwrap();
    assert_eq!(bet_after_one.status, BetStatus::Resolved);

    let done = h.service.record_payment(&bet.id, "bob").await.unwrap();
    assert_eq!(done.status, BetStatus::Completed);
    assert!(done.participants.iter().filter(|p| p.side == "Yes").all(|p| p.has_paid));

    let obligations = h.service.obligations_for_bet(&bet.id).await.unwrap();
    assert_eq!(obligations.len(), 2);
    assert!(obligations.iter().all(|o| o.status == PaymentStatus::Completed));
}

#[tokio::test]
async fn test_unbacked_winner_owes_nothing() {
    let mut h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(30), &["A", "B", "C"]))
        .await
        .unwrap();
    h.service.join_bet(&bet.id, "bob", "Bob", "B").await.unwrap();
    h.drain();

    let resolution = h.service.resolve_bet(&bet.id, "C", "judge").await.unwrap();
    assert_eq!(resolution.settlement.total_obligations(), 0);
    assert!(h.service.obligations_for_bet(&bet.id).await.unwrap().is_empty());
    let events: Vec<_> = h.drain().into_iter().map(|n| n.event).collect();
    assert_eq!(events, vec![NotificationEvent::BetResolved]);

    for user in ["alice", "bob"] {
        let err = h.service.record_payment(&bet.id, user).await.unwrap_err();
        assert!(matches!(err, BetError::IllegalTransition { .. }));
    }
    let stored = h.service.get_bet(&bet.id).await.unwrap();
    assert_eq!(stored.status, BetStatus::Resolved);
    assert!(stored.participants.iter().all(|p| !p.has_paid));
}

#[tokio::test]
async fn test_evidence_window() {
    let h = Harness::new();
    let bet = h
        .service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(20), &["Yes", "No"]))
        .await
        .unwrap();
    h.service.join_bet(&bet.id, "bob", "Bob", "No").await.unwrap();

    h.service
        .submit_evidence(&bet.id, "bob", EvidenceKind::Photo, "https://img.example.com/1.jpg")
        .await
        .unwrap();
    let outsider = h
        .service
        .submit_evidence(&bet.id, "mallory", EvidenceKind::Text, "trust me")
        .await
        .unwrap_err();
    assert!(matches!(outsider, BetError::IllegalTransition { .. }));

    h.service.resolve_bet(&bet.id, "No", "judge").await.unwrap();
    let closed = h
        .service
        .submit_evidence(&bet.id, "judge", EvidenceKind::Text, "late")
        .await
        .unwrap_err();
    assert!(matches!(closed, BetError::IllegalTransition { .. }));

    let stored = h.service.get_bet(&bet.id).await.unwrap();
    assert_eq!(stored.evidence.len(), 1);
    assert_eq!(stored.evidence[0].submitted_by, "bob");
}

#[tokio::test]
async fn test_notifications_reach_the_notifier() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let (outbox, rx) = Outbox::channel();
    let dispatcher = notify::spawn_dispatcher(rx, notifier.clone(), RetryPolicy::new(2, 1, 1));

    let service = BetService::new(
        store.clone(),
        store,
        outbox,
        FeeSchedule::default(),
        EngineConfig::default(),
    );
    let bet = service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(100), &["Yes", "No"]))
        .await
        .unwrap();
    service.join_bet(&bet.id, "bob", "Bob", "No").await.unwrap();
    service.resolve_bet(&bet.id, "No", "judge").await.unwrap();

    // Closing the outbox lets the dispatcher drain and stop.
    drop(service);
    dispatcher.await.unwrap();

    assert_eq!(
        notifier.events(),
        vec![
            NotificationEvent::BetCreated,
            NotificationEvent::NeutralPartyAssigned,
            NotificationEvent::BetJoined,
            NotificationEvent::BetReadyForResolution,
            NotificationEvent::PaymentRequired,
            NotificationEvent::BetResolved,
        ]
    );
    let received = notifier.received();
    assert_eq!(received[1].targets, vec!["judge"]);
    assert_eq!(received[4].targets, vec!["alice"]);
    assert_eq!(received[4].payload["to_user_id"], "bob");
    assert!(received.iter().all(|n| n.bet_id() == Some(bet.id.as_str())));
}

#[tokio::test]
async fn test_sqlite_backend_lifecycle() {
    let db = Arc::new(SqliteStore::in_memory().await.unwrap());
    let (outbox, _rx) = Outbox::channel();
    let service = BetService::new(
        db.clone(),
        db,
        outbox,
        FeeSchedule::default(),
        EngineConfig::default(),
    );

    let bet = service
        .create_bet(new_bet(ResolutionType::NeutralParty, dec!(600), &["Yes", "No"]))
        .await
        .unwrap();
    assert_eq!(bet.facilitation_fee, dec!(9));

    service.join_bet(&bet.id, "bob", "Bob", "No").await.unwrap();
    let resolution = service.resolve_bet(&bet.id, "Yes", "alice").await.unwrap();
    assert_eq!(resolution.settlement.created.len(), 1);

    let obligations = service.obligations_for_bet(&bet.id).await.unwrap();
    assert_eq!(obligations.len(), 1);
    assert_eq!(obligations[0].from_user_id, "bob");
    assert_eq!(obligations[0].amount, dec!(600));

    assert_eq!(service.bets_for_user("bob").await.unwrap().len(), 1);
    assert_eq!(service.bets_for_user("judge").await.unwrap().len(), 1);

    let done = service.record_payment(&bet.id, "bob").await.unwrap();
    assert_eq!(done.status, BetStatus::Completed);
    let obligations = service.obligations_for_bet(&bet.id).await.unwrap();
    assert_eq!(obligations[0].status, PaymentStatus::Completed);
}
