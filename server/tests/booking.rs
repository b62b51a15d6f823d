mod common;

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use common::Harness;
use tourapp_server::inscriptions::InscriptionError;
use tourapp_server::ledger::LedgerError;
use tourapp_server::models::{ExcursionStatus, PaymentStatus};
use tourapp_server::notifications::Notification;

#[tokio::test]
async fn test_last_seat_fills_excursion_and_next_booking_has_no_capacity() {
    let harness = Harness::new();
    let excursion = harness.excursion(1).await;
    let ana = harness.customer("Ana Souza");
    let bruno = harness.customer("Bruno Lima");

    let inscription = harness
        .state
        .inscriptions
        .create_inscription(excursion.id, ana, None)
        .await
        .unwrap();
    assert_eq!(inscription.payment_status, PaymentStatus::Pending);
    assert_eq!(inscription.amount_due, excursion.price);
    assert_eq!(harness.occupancy(excursion.id).await, (1, ExcursionStatus::Full));

    let second = harness
        .state
        .inscriptions
        .create_inscription(excursion.id, bruno, None)
        .await;
    assert!(matches!(
        second,
        Err(InscriptionError::Ledger(LedgerError::NoCapacity(_)))
    ));
    assert_eq!(harness.occupancy(excursion.id).await, (1, ExcursionStatus::Full));
}

#[tokio::test]
async fn test_duplicate_booking_is_rejected_and_seat_returned() {
    let harness = Harness::new();
    let excursion = harness.excursion(3).await;
    let ana = harness.customer("Ana Souza");

    harness
        .state
        .inscriptions
        .create_inscription(excursion.id, ana, None)
        .await
        .unwrap();

    let again = harness
        .state
        .inscriptions
        .create_inscription(excursion.id, ana, Some("window seat".to_string()))
        .await;
    assert!(matches!(again, Err(InscriptionError::Duplicate)));
    assert_eq!(harness.occupancy(excursion.id).await, (1, ExcursionStatus::Active));
}

#[tokio::test]
async fn test_cancelled_booking_frees_customer_to_book_again() {
    let harness = Harness::new();
    let excursion = harness.excursion(2).await;
    let ana = harness.customer("Ana Souza");
    let inscriptions = &harness.state.inscriptions;

    let first = inscriptions
        .create_inscription(excursion.id, ana, None)
        .await
        .unwrap();
    inscriptions
        .apply_payment_status(first.id, PaymentStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(harness.occupancy(excursion.id).await, (0, ExcursionStatus::Active));

    inscriptions
        .create_inscription(excursion.id, ana, None)
        .await
        .unwrap();
    assert_eq!(harness.occupancy(excursion.id).await, (1, ExcursionStatus::Active));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_for_last_seat() {
    let harness = Harness::new();
    let excursion = harness.excursion(1).await;
    let ana = harness.customer("Ana Souza");
    let bruno = harness.customer("Bruno Lima");

    let manager = harness.state.inscriptions.clone();
    let other = harness.state.inscriptions.clone();
    let excursion_id = excursion.id;

    let (a, b) = tokio::join!(
        tokio::spawn(async move { manager.create_inscription(excursion_id, ana, None).await }),
        tokio::spawn(async move { other.create_inscription(excursion_id, bruno, None).await }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let no_capacity = results
        .iter()
        .filter(|r| matches!(r, Err(InscriptionError::Ledger(LedgerError::NoCapacity(_)))))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(no_capacity, 1);
    assert_eq!(harness.occupancy(excursion.id).await, (1, ExcursionStatus::Full));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_bookings_never_oversell() {
    let harness = Harness::new();
    let excursion = harness.excursion(7).await;

    let mut handles = Vec::new();
    for i in 0..25 {
        let customer = harness.customer(&format!("Customer {i}"));
        let manager = Arc::clone(&harness.state.inscriptions);
        let excursion_id = excursion.id;
        handles.push(tokio::spawn(async move {
            manager.create_inscription(excursion_id, customer, None).await
        }));
    }

    let mut booked = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            booked += 1;
        }
    }

    assert_eq!(booked, 7);
    assert_eq!(harness.occupancy(excursion.id).await, (7, ExcursionStatus::Full));
}

#[tokio::test]
async fn test_draft_and_departed_excursions_are_not_bookable() {
    let harness = Harness::new();
    let ana = harness.customer("Ana Souza");

    let draft = harness
        .state
        .ledger
        .create_excursion(
            Uuid::new_v4(),
            tourapp_server::models::NewExcursion {
                title: "Jalapão".to_string(),
                seats_total: 4,
                departure_at: common::start_time() + Duration::days(3),
                price: rust_decimal::Decimal::new(90000, 2),
                accepts_pix: true,
                accepts_card: true,
            },
        )
        .await
        .unwrap();
    let result = harness
        .state
        .inscriptions
        .create_inscription(draft.id, ana, None)
        .await;
    assert!(matches!(
        result,
        Err(InscriptionError::Ledger(LedgerError::NotBookable { .. }))
    ));

    let active = harness.excursion(4).await;
    harness.clock.advance(Duration::days(11));
    let result = harness
        .state
        .inscriptions
        .create_inscription(active.id, ana, None)
        .await;
    assert!(matches!(
        result,
        Err(InscriptionError::Ledger(LedgerError::NotBookable { .. }))
    ));
    assert_eq!(harness.occupancy(active.id).await.0, 0);
}

#[tokio::test]
async fn test_unknown_excursion_is_not_found() {
    let harness = Harness::new();
    let ana = harness.customer("Ana Souza");

    let result = harness
        .state
        .inscriptions
        .create_inscription(Uuid::new_v4(), ana, None)
        .await;
    assert!(matches!(
        result,
        Err(InscriptionError::Ledger(LedgerError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_banned_customer_cannot_book() {
    let harness = Harness::new();
    let excursion = harness.excursion(2).await;
    let ana = harness.customer("Ana Souza");
    harness.directory.ban(ana, excursion.id);

    let result = harness
        .state
        .inscriptions
        .create_inscription(excursion.id, ana, None)
        .await;
    assert!(matches!(result, Err(InscriptionError::Forbidden(_))));
    assert_eq!(harness.occupancy(excursion.id).await.0, 0);
}

#[tokio::test]
async fn test_booking_enqueues_confirmation() {
    let mut harness = Harness::new();
    let excursion = harness.excursion(2).await;
    let ana = harness.customer("Ana Souza");

    let inscription = harness
        .state
        .inscriptions
        .create_inscription(excursion.id, ana, None)
        .await
        .unwrap();

    let seen = harness.drain_notifications();
    assert_eq!(seen.len(), 1);
    assert!(matches!(
        &seen[0],
        Notification::InscriptionCreated { inscription_id, excursion_title, .. }
            if *inscription_id == inscription.id && excursion_title == "Serra da Canastra"
    ));
}

#[tokio::test]
async fn test_inscriptions_are_private_to_their_customer() {
    let harness = Harness::new();
    let excursion = harness.excursion(2).await;
    let ana = harness.customer("Ana Souza");
    let bruno = harness.customer("Bruno Lima");
    let inscriptions = &harness.state.inscriptions;

    let booking = inscriptions
        .create_inscription(excursion.id, ana, None)
        .await
        .unwrap();

    assert!(inscriptions.get_for_customer(booking.id, ana).await.is_ok());
    assert!(matches!(
        inscriptions.get_for_customer(booking.id, bruno).await,
        Err(InscriptionError::NotFound(_))
    ));
    assert_eq!(inscriptions.list_for_customer(ana).await.unwrap().len(), 1);
    assert!(inscriptions.list_for_customer(bruno).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refund_after_approval_releases_seat() {
    let harness = Harness::new();
    let excursion = harness.excursion(1).await;
    let ana = harness.customer("Ana Souza");
    let inscriptions = &harness.state.inscriptions;

    let booking = inscriptions
        .create_inscription(excursion.id, ana, None)
        .await
        .unwrap();
    inscriptions
        .apply_payment_status(booking.id, PaymentStatus::Approved)
        .await
        .unwrap();
    assert_eq!(harness.occupancy(excursion.id).await, (1, ExcursionStatus::Full));

    inscriptions
        .apply_payment_status(booking.id, PaymentStatus::Refunded)
        .await
        .unwrap();
    assert_eq!(harness.occupancy(excursion.id).await, (0, ExcursionStatus::Active));

    // Further updates are absorbed.
    let change = inscriptions
        .apply_payment_status(booking.id, PaymentStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(change.inscription.payment_status, PaymentStatus::Refunded);
    assert_eq!(harness.occupancy(excursion.id).await.0, 0);
}
