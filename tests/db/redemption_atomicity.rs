//! Concurrency tests for redemption and claiming.
//!
//! Each thread opens its own connection to a shared database file, the way
//! separate request handlers or processes would, and all threads start
//! together behind a barrier.

#[path = "../common/mod.rs"]
mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::*;

/// Run `f` on `n` threads released at the same instant, each with its own
/// connection to `db_path`.
fn race<T, F>(db_path: &str, n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize, &mut rusqlite::Connection) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(n));
    let f = Arc::new(f);

    let handles: Vec<_> = (0..n)
        .map(|i| {
            let barrier = barrier.clone();
            let f = f.clone();
            let path = db_path.to_string();
            thread::spawn(move || {
                let mut conn = open_thread_connection(&path);
                barrier.wait();
                f(i, &mut conn)
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect()
}

#[test]
fn test_same_voucher_redeemed_once() {
    let ctx = create_test_context();
    let (deal, voucher) = setup_redeemable_voucher(&ctx.conn(), None);

    let voucher_id = voucher.id.clone();
    let results = race(&ctx.db_path, 8, move |_, conn| {
        queries::redeem_voucher_atomic(conn, &voucher_id, NOW)
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one thread should redeem the voucher");
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(
            matches!(result, Err(AppError::AlreadyRedeemed)),
            "losers should see ALREADY_REDEEMED, got {:?}",
            result
        );
    }

    let stored = queries::get_deal_by_id(&ctx.conn(), &deal.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.redeemed_count, 1);
}

#[test]
fn test_cap_holds_under_concurrent_redemptions() {
    let ctx = create_test_context();
    let (deal, _) = setup_deal(&ctx.conn(), Some(3));

    let voucher_ids: Vec<String> = (0..8)
        .map(|i| {
            let conn = ctx.conn();
            let user = create_test_user(&conn, &format!("racer{}@example.com", i));
            create_test_voucher(&conn, &deal.id, &user.id, NOW + ONE_HOUR).id
        })
        .collect();

    let ids = Arc::new(voucher_ids);
    let results = race(&ctx.db_path, 8, move |i, conn| {
        queries::redeem_voucher_atomic(conn, &ids[i], NOW)
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 3, "cap of 3 should admit exactly 3 redemptions");
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(AppError::CapReached)))
    );

    let stored = queries::get_deal_by_id(&ctx.conn(), &deal.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.redeemed_count, 3);

    let redeemed = queries::list_vouchers_for_deal(&ctx.conn(), &deal.id)
        .unwrap()
        .into_iter()
        .filter(|v| v.status == VoucherStatus::Redeemed)
        .count();
    assert_eq!(redeemed, 3, "only vouchers that took a unit of cap are consumed");
}

#[test]
fn test_guarded_increment_never_passes_cap() {
    let ctx = create_test_context();
    let (deal, _) = setup_deal(&ctx.conn(), Some(3));

    let deal_id = deal.id.clone();
    let results = race(&ctx.db_path, 8, move |_, conn| {
        queries::try_increment_redeemed_count(conn, &deal_id, NOW).expect("increment failed")
    });

    assert_eq!(results.iter().filter(|&&ok| ok).count(), 3);
    let stored = queries::get_deal_by_id(&ctx.conn(), &deal.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.redeemed_count, 3);
}

#[test]
fn test_concurrent_claims_issue_one_voucher_per_user() {
    let ctx = create_test_context();
    let (deal, user) = setup_deal(&ctx.conn(), None);

    let (deal_id, user_id) = (deal.id.clone(), user.id.clone());
    let results = race(&ctx.db_path, 6, move |_, conn| {
        queries::claim_voucher_atomic(conn, &deal_id, &user_id, ONE_HOUR, NOW)
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(AppError::Conflict(_))))
    );
    assert_eq!(
        queries::list_vouchers_for_deal(&ctx.conn(), &deal.id)
            .unwrap()
            .len(),
        1
    );
}
