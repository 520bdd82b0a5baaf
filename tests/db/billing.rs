//! Merchant, subscription and processed-event ledger tests

#[path = "../common/mod.rs"]
mod common;

use common::*;
use happyhour::db::queries::SubscriptionPatch;
use happyhour::handlers::webhooks::common::{
    ApplyOutcome, Reconciliation, SubscriptionChange, apply_reconciliation,
};

fn upsert_input(sub_id: &str, status: &str, plan: PlanTier) -> UpsertSubscription {
    UpsertSubscription {
        plan,
        status: status.to_string(),
        current_period_start: Some(NOW - ONE_DAY),
        current_period_end: Some(NOW + 29 * ONE_DAY),
        external_subscription_id: sub_id.to_string(),
        cancel_at_period_end: false,
    }
}

// ============ Merchants ============

#[test]
fn test_new_merchant_starts_in_trial() {
    let conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", None);

    let stored = queries::get_merchant_by_id(&conn, &merchant.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.subscription_status, MerchantStatus::Trial);
    assert!(stored.billing_customer_id.is_none());
}

#[test]
fn test_link_billing_customer_only_when_unlinked() {
    let conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", None);

    assert!(queries::link_billing_customer(&conn, &merchant.id, "cus_first", NOW).unwrap());
    assert!(
        !queries::link_billing_customer(&conn, &merchant.id, "cus_second", NOW).unwrap(),
        "an existing link must not be overwritten"
    );

    let found = queries::get_merchant_by_billing_customer(&conn, "cus_first")
        .unwrap()
        .expect("merchant should be found by customer id");
    assert_eq!(found.id, merchant.id);
    assert!(
        queries::get_merchant_by_billing_customer(&conn, "cus_second")
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_set_merchant_status() {
    let conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", Some("cus_1"));

    assert!(
        queries::set_merchant_subscription_status(&conn, &merchant.id, MerchantStatus::PastDue, NOW)
            .unwrap()
    );

    let stored = queries::get_merchant_by_id(&conn, &merchant.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.subscription_status, MerchantStatus::PastDue);
    assert_eq!(stored.updated_at, NOW);
}

// ============ Subscriptions ============

#[test]
fn test_upsert_keeps_one_row_per_merchant() {
    let conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", Some("cus_1"));

    let first = queries::upsert_subscription(
        &conn,
        &merchant.id,
        &upsert_input("sub_1", "active", PlanTier::Basic),
        NOW,
    )
    .unwrap();
    let second = queries::upsert_subscription(
        &conn,
        &merchant.id,
        &upsert_input("sub_2", "past_due", PlanTier::Growth),
        NOW + 10,
    )
    .unwrap();

    assert_eq!(first.id, second.id, "upsert should update the existing row");
    assert_eq!(second.external_subscription_id, "sub_2");
    assert_eq!(second.plan, PlanTier::Growth);
    assert_eq!(second.status, "past_due");
    assert_eq!(second.created_at, NOW);
    assert_eq!(second.updated_at, NOW + 10);

    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM subscriptions WHERE merchant_id = ?1",
            [&merchant.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_patch_touches_only_given_fields() {
    let conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", Some("cus_1"));
    queries::upsert_subscription(
        &conn,
        &merchant.id,
        &upsert_input("sub_1", "active", PlanTier::Enterprise),
        NOW,
    )
    .unwrap();

    let patch = SubscriptionPatch {
        status: Some("past_due".to_string()),
        ..Default::default()
    };
    assert!(queries::patch_subscription(&conn, &merchant.id, &patch, NOW + 5).unwrap());

    let sub = queries::get_subscription_for_merchant(&conn, &merchant.id)
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, "past_due");
    assert_eq!(sub.plan, PlanTier::Enterprise);
    assert_eq!(sub.current_period_end, Some(NOW + 29 * ONE_DAY));
    assert_eq!(sub.updated_at, NOW + 5);
}

#[test]
fn test_patch_without_row_reports_false() {
    let conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", Some("cus_1"));

    let patch = SubscriptionPatch {
        status: Some("canceled".to_string()),
        ..Default::default()
    };
    assert!(!queries::patch_subscription(&conn, &merchant.id, &patch, NOW).unwrap());
}

// ============ Processed events ============

#[test]
fn test_record_processed_event_once() {
    let conn = setup_test_db();

    assert!(!queries::is_event_processed(&conn, "evt_1").unwrap());
    assert!(queries::try_record_processed_event(&conn, "evt_1", "invoice.paid", NOW).unwrap());
    assert!(
        !queries::try_record_processed_event(&conn, "evt_1", "invoice.paid", NOW + 1).unwrap(),
        "second insert of the same id should be ignored"
    );

    let event = queries::get_processed_event(&conn, "evt_1")
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, "invoice.paid");
    assert_eq!(event.processed_at, NOW);
    assert_eq!(queries::count_processed_events(&conn).unwrap(), 1);
}

// ============ Reconciliation transaction ============

fn upsert_reconciliation(customer: &str) -> Reconciliation {
    Reconciliation {
        customer_id: Some(customer.to_string()),
        merchant_hint: None,
        merchant_status: Some(MerchantStatus::Active),
        subscription: SubscriptionChange::Upsert(upsert_input("sub_1", "active", PlanTier::Basic)),
    }
}

#[test]
fn test_apply_records_event_and_effects() {
    let mut conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", Some("cus_1"));

    let outcome = apply_reconciliation(
        &mut conn,
        "evt_1",
        "customer.subscription.updated",
        Some(&upsert_reconciliation("cus_1")),
        NOW,
    )
    .unwrap();

    assert_eq!(
        outcome,
        ApplyOutcome::Applied {
            merchant_id: merchant.id.clone()
        }
    );
    assert!(queries::is_event_processed(&conn, "evt_1").unwrap());
    assert!(
        queries::get_subscription_for_merchant(&conn, &merchant.id)
            .unwrap()
            .is_some()
    );

    let again = apply_reconciliation(
        &mut conn,
        "evt_1",
        "customer.subscription.updated",
        Some(&upsert_reconciliation("cus_1")),
        NOW,
    )
    .unwrap();
    assert_eq!(again, ApplyOutcome::AlreadyProcessed);
}

#[test]
fn test_failed_effects_leave_no_ledger_row() {
    let mut conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", Some("cus_1"));
    conn.execute_batch("DROP TABLE subscriptions").unwrap();

    let result = apply_reconciliation(
        &mut conn,
        "evt_1",
        "checkout.session.completed",
        Some(&upsert_reconciliation("cus_1")),
        NOW,
    );

    assert!(result.is_err());
    assert!(
        !queries::is_event_processed(&conn, "evt_1").unwrap(),
        "ledger row must roll back with the failed effects"
    );
    let stored = queries::get_merchant_by_id(&conn, &merchant.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.subscription_status, MerchantStatus::Trial);
}

#[test]
fn test_ignored_and_unmatched_events_are_recorded() {
    let mut conn = setup_test_db();

    let ignored = apply_reconciliation(&mut conn, "evt_a", "charge.refunded", None, NOW).unwrap();
    assert_eq!(ignored, ApplyOutcome::Ignored);

    let unmatched = apply_reconciliation(
        &mut conn,
        "evt_b",
        "invoice.paid",
        Some(&upsert_reconciliation("cus_unknown")),
        NOW,
    )
    .unwrap();
    assert_eq!(unmatched, ApplyOutcome::MerchantNotFound);

    assert!(queries::is_event_processed(&conn, "evt_a").unwrap());
    assert!(queries::is_event_processed(&conn, "evt_b").unwrap());
}

#[test]
fn test_hint_links_unlinked_merchant() {
    let mut conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", None);

    let rec = Reconciliation {
        merchant_hint: Some(merchant.id.clone()),
        ..upsert_reconciliation("cus_new")
    };
    let outcome =
        apply_reconciliation(&mut conn, "evt_1", "checkout.session.completed", Some(&rec), NOW)
            .unwrap();

    assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
    let stored = queries::get_merchant_by_id(&conn, &merchant.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.billing_customer_id.as_deref(), Some("cus_new"));
    assert_eq!(stored.subscription_status, MerchantStatus::Active);
}

#[test]
fn test_hint_ignored_for_merchant_linked_elsewhere() {
    let mut conn = setup_test_db();
    let merchant = create_test_merchant(&conn, "Taco Town", Some("cus_original"));

    let rec = Reconciliation {
        merchant_hint: Some(merchant.id.clone()),
        ..upsert_reconciliation("cus_other")
    };
    let outcome =
        apply_reconciliation(&mut conn, "evt_1", "checkout.session.completed", Some(&rec), NOW)
            .unwrap();

    assert_eq!(outcome, ApplyOutcome::MerchantNotFound);
    assert!(
        queries::get_subscription_for_merchant(&conn, &merchant.id)
            .unwrap()
            .is_none()
    );
}
