use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde::de::DeserializeOwned;

use crate::config::PlanPrices;
use crate::db::queries::{self, SubscriptionPatch};
use crate::db::AppState;
use crate::models::MerchantStatus;
use crate::payments::{
    BillingProvider, StripeCheckoutSession, StripeEvent, StripeInvoice, StripeSubscription,
};

use super::common::{
    Reconciliation, SubscriptionChange, WebhookAck, WebhookError, apply_reconciliation,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, WebhookError> {
    let billing = state.billing.clone().ok_or(WebhookError::MissingConfig)?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .ok_or(WebhookError::MissingSignature)?
        .to_str()
        .map_err(|_| WebhookError::InvalidSignature)?;

    match billing.verify_webhook_signature(&body, signature, state.clock.now()) {
        Ok(true) => {}
        Ok(false) => return Err(WebhookError::InvalidSignature),
        Err(e) => {
            tracing::debug!("Unparseable Stripe signature header: {}", e);
            return Err(WebhookError::InvalidSignature);
        }
    }

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    {
        let conn = state.db.get().map_err(|e| WebhookError::Processing(e.to_string()))?;
        if queries::is_event_processed(&conn, &event.id)? {
            tracing::debug!("Stripe event {} already processed", event.id);
            return Ok(Json(WebhookAck {
                message: "Event already processed",
            }));
        }
    }

    let reconciliation = resolve_event(billing.as_ref(), &state.plan_prices, &event).await?;

    let mut conn = state.db.get().map_err(|e| WebhookError::Processing(e.to_string()))?;
    let outcome = apply_reconciliation(
        &mut conn,
        &event.id,
        &event.event_type,
        reconciliation.as_ref(),
        state.clock.now(),
    )?;

    tracing::info!(
        "Stripe event {} ({}): {:?}",
        event.id,
        event.event_type,
        outcome
    );

    Ok(Json(WebhookAck {
        message: outcome.message(),
    }))
}

fn parse_object<T: DeserializeOwned>(event: &StripeEvent) -> Result<T, WebhookError> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        WebhookError::InvalidPayload(format!("{} object: {}", event.event_type, e))
    })
}

async fn fetch_subscription(
    billing: &dyn BillingProvider,
    subscription_id: &str,
) -> Result<StripeSubscription, WebhookError> {
    billing
        .retrieve_subscription(subscription_id)
        .await
        .map_err(|e| {
            WebhookError::Processing(format!(
                "Failed to retrieve subscription {}: {}",
                subscription_id, e
            ))
        })
}

/// Work out what an event should change, fetching the full subscription from
/// the provider where the payload alone is not enough.
///
/// `None` means the event is recorded but has no effect.
pub async fn resolve_event(
    billing: &dyn BillingProvider,
    prices: &PlanPrices,
    event: &StripeEvent,
) -> Result<Option<Reconciliation>, WebhookError> {
    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: StripeCheckoutSession = parse_object(event)?;
            let Some(subscription_id) = session.subscription.as_deref() else {
                tracing::debug!(
                    "Checkout {} has no subscription (mode={:?}), ignoring",
                    session.id,
                    session.mode
                );
                return Ok(None);
            };

            let sub = fetch_subscription(billing, subscription_id).await?;
            Ok(Some(Reconciliation {
                customer_id: session.customer.clone().or_else(|| sub.customer.clone()),
                merchant_hint: session.merchant_reference().map(str::to_string),
                merchant_status: Some(MerchantStatus::Active),
                subscription: SubscriptionChange::Upsert(sub.to_upsert(prices)),
            }))
        }

        "invoice.paid" | "invoice.payment_succeeded" => {
            let invoice: StripeInvoice = parse_object(event)?;
            let Some(subscription_id) = invoice.subscription_id() else {
                tracing::debug!("Invoice {} is not for a subscription, ignoring", invoice.id);
                return Ok(None);
            };

            let sub = fetch_subscription(billing, subscription_id).await?;
            let (current_period_start, current_period_end) = sub.period();
            Ok(Some(Reconciliation {
                customer_id: invoice.customer.clone().or_else(|| sub.customer.clone()),
                merchant_hint: None,
                merchant_status: Some(MerchantStatus::from_provider_status(&sub.status)),
                subscription: SubscriptionChange::Patch(SubscriptionPatch {
                    status: Some(sub.status.clone()),
                    current_period_start,
                    current_period_end,
                    ..Default::default()
                }),
            }))
        }

        "invoice.payment_failed" => {
            let invoice: StripeInvoice = parse_object(event)?;
            let subscription = match invoice.subscription_id() {
                Some(subscription_id) => {
                    let sub = fetch_subscription(billing, subscription_id).await?;
                    SubscriptionChange::Patch(SubscriptionPatch {
                        status: Some(sub.status),
                        ..Default::default()
                    })
                }
                None => SubscriptionChange::Keep,
            };

            Ok(Some(Reconciliation {
                customer_id: invoice.customer.clone(),
                merchant_hint: None,
                merchant_status: Some(MerchantStatus::PastDue),
                subscription,
            }))
        }

        "customer.subscription.updated" => {
            let sub: StripeSubscription = parse_object(event)?;
            let (current_period_start, current_period_end) = sub.period();
            Ok(Some(Reconciliation {
                customer_id: sub.customer.clone(),
                merchant_hint: None,
                merchant_status: Some(MerchantStatus::from_provider_status(&sub.status)),
                subscription: SubscriptionChange::Patch(SubscriptionPatch {
                    plan: Some(sub.plan_tier(prices)),
                    status: Some(sub.status.clone()),
                    current_period_start,
                    current_period_end,
                    cancel_at_period_end: Some(sub.cancel_at_period_end),
                }),
            }))
        }

        "customer.subscription.deleted" => {
            let sub: StripeSubscription = parse_object(event)?;
            Ok(Some(Reconciliation {
                customer_id: sub.customer.clone(),
                merchant_hint: None,
                merchant_status: Some(MerchantStatus::Canceled),
                subscription: SubscriptionChange::Patch(SubscriptionPatch {
                    status: Some("canceled".to_string()),
                    cancel_at_period_end: Some(true),
                    ..Default::default()
                }),
            }))
        }

        other => {
            tracing::debug!("Ignoring Stripe event type {}", other);
            Ok(None)
        }
    }
}
