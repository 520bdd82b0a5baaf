//! Provider-independent half of webhook processing.
//!
//! A provider handler turns a verified delivery into a [`Reconciliation`]
//! (doing any network calls first), then [`apply_reconciliation`] records the
//! event and applies its effects in a single database transaction.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;

use crate::db::queries::{self, SubscriptionPatch};
use crate::error::AppError;
use crate::models::{Merchant, MerchantStatus, UpsertSubscription};

/// Terminal webhook failures. Anything not listed here is acknowledged with 200.
#[derive(Debug)]
pub enum WebhookError {
    /// No signing secret configured.
    MissingConfig,
    MissingSignature,
    InvalidSignature,
    InvalidPayload(String),
    /// Provider or database failure; the provider will redeliver.
    Processing(String),
}

impl WebhookError {
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::MissingConfig => "MISSING_CONFIG",
            WebhookError::MissingSignature => "MISSING_SIGNATURE",
            WebhookError::InvalidSignature => "INVALID_SIGNATURE",
            WebhookError::InvalidPayload(_) => "INVALID_PAYLOAD",
            WebhookError::Processing(_) => "PROCESSING_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::MissingConfig | WebhookError::Processing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            WebhookError::MissingSignature
            | WebhookError::InvalidSignature
            | WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<AppError> for WebhookError {
    fn from(err: AppError) -> Self {
        WebhookError::Processing(err.to_string())
    }
}

#[derive(Serialize)]
struct WebhookErrorBody {
    error: &'static str,
    code: &'static str,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let error = match &self {
            WebhookError::MissingConfig => {
                tracing::error!("Webhook received but STRIPE_WEBHOOK_SECRET is not configured");
                "Webhook secret not configured"
            }
            WebhookError::MissingSignature => "Missing stripe-signature header",
            WebhookError::InvalidSignature => "Invalid signature",
            WebhookError::InvalidPayload(e) => {
                tracing::warn!("Invalid webhook payload: {}", e);
                "Invalid payload"
            }
            WebhookError::Processing(e) => {
                tracing::error!("Webhook processing failed: {}", e);
                "Webhook processing failed"
            }
        };

        let body = WebhookErrorBody {
            error,
            code: self.code(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub message: &'static str,
}

/// What to do to the local Subscription row.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionChange {
    Keep,
    /// Create or replace from the provider's full subscription.
    Upsert(UpsertSubscription),
    /// Touch only some fields of an existing row.
    Patch(SubscriptionPatch),
}

/// Effects of one billing event on one merchant, resolved ahead of the
/// database transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Billing customer id carried by the event.
    pub customer_id: Option<String>,
    /// Our own merchant id, when the provider echoes it back (checkout only).
    pub merchant_hint: Option<String>,
    pub merchant_status: Option<MerchantStatus>,
    pub subscription: SubscriptionChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { merchant_id: String },
    AlreadyProcessed,
    /// Event type or payload we take no action on.
    Ignored,
    MerchantNotFound,
}

impl ApplyOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied { .. } => "Event processed",
            ApplyOutcome::AlreadyProcessed => "Event already processed",
            ApplyOutcome::Ignored => "Event ignored",
            ApplyOutcome::MerchantNotFound => "No matching merchant; event acknowledged",
        }
    }
}

/// Record the event in the ledger and apply its effects atomically.
///
/// Ledger row and effects commit together or not at all. A zero-row ledger
/// insert means a concurrent delivery of the same event already committed.
pub fn apply_reconciliation(
    conn: &mut Connection,
    event_id: &str,
    event_type: &str,
    reconciliation: Option<&Reconciliation>,
    now: i64,
) -> Result<ApplyOutcome, AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if !queries::try_record_processed_event(&tx, event_id, event_type, now)? {
        return Ok(ApplyOutcome::AlreadyProcessed);
    }

    let outcome = match reconciliation {
        Some(rec) => apply_to_merchant(&tx, event_id, rec, now)?,
        None => ApplyOutcome::Ignored,
    };

    tx.commit()?;
    Ok(outcome)
}

fn apply_to_merchant(
    tx: &Transaction,
    event_id: &str,
    rec: &Reconciliation,
    now: i64,
) -> Result<ApplyOutcome, AppError> {
    let Some(merchant) = find_merchant(tx, rec, now)? else {
        tracing::warn!(
            "Webhook {}: no merchant for customer {:?} (hint {:?}), skipping",
            event_id,
            rec.customer_id,
            rec.merchant_hint
        );
        return Ok(ApplyOutcome::MerchantNotFound);
    };

    match &rec.subscription {
        SubscriptionChange::Keep => {}
        SubscriptionChange::Upsert(input) => {
            let sub = queries::upsert_subscription(tx, &merchant.id, input, now)?;
            tracing::info!(
                "Subscription {} for merchant {}: plan={}, status={}",
                sub.external_subscription_id,
                merchant.id,
                sub.plan.as_ref(),
                sub.status
            );
        }
        SubscriptionChange::Patch(patch) => {
            if !queries::patch_subscription(tx, &merchant.id, patch, now)? {
                tracing::warn!(
                    "Webhook {}: merchant {} has no local subscription row, updating merchant only",
                    event_id,
                    merchant.id
                );
            }
        }
    }

    if let Some(status) = rec.merchant_status {
        queries::set_merchant_subscription_status(tx, &merchant.id, status, now)?;
        if status != merchant.subscription_status {
            tracing::info!(
                "Merchant {} status {} -> {}",
                merchant.id,
                merchant.subscription_status.as_ref(),
                status.as_ref()
            );
        }
    }

    Ok(ApplyOutcome::Applied {
        merchant_id: merchant.id,
    })
}

/// Find the merchant by billing customer id, falling back to the merchant
/// hint. A hinted merchant without a customer id gets linked to this one.
fn find_merchant(
    conn: &Connection,
    rec: &Reconciliation,
    now: i64,
) -> Result<Option<Merchant>, AppError> {
    if let Some(customer_id) = rec.customer_id.as_deref() {
        if let Some(merchant) = queries::get_merchant_by_billing_customer(conn, customer_id)? {
            return Ok(Some(merchant));
        }
    }

    let Some(hint) = rec.merchant_hint.as_deref() else {
        return Ok(None);
    };
    let Some(merchant) = queries::get_merchant_by_id(conn, hint)? else {
        return Ok(None);
    };

    match (rec.customer_id.as_deref(), merchant.billing_customer_id.as_deref()) {
        (Some(customer_id), None) => {
            queries::link_billing_customer(conn, &merchant.id, customer_id, now)?;
            tracing::info!(
                "Linked billing customer {} to merchant {}",
                customer_id,
                merchant.id
            );
            Ok(Some(Merchant {
                billing_customer_id: Some(customer_id.to_string()),
                ..merchant
            }))
        }
        (Some(customer_id), Some(existing)) => {
            tracing::warn!(
                "Merchant {} is linked to customer {}, not {}; ignoring hint",
                merchant.id,
                existing,
                customer_id
            );
            Ok(None)
        }
        (None, _) => Ok(Some(merchant)),
    }
}
