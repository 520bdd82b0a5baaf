mod stripe;

pub use stripe::*;

use async_trait::async_trait;

use crate::error::Result;

/// The billing provider as seen by the webhook reconciler.
///
/// Implemented by [`StripeClient`] in production and by in-process fakes in tests.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Check a webhook signature header against the raw body.
    ///
    /// `Ok(false)` means a well-formed header that does not verify (bad MAC or
    /// stale timestamp). `Err` means the header could not be parsed.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str, now: i64) -> Result<bool>;

    /// Fetch the current state of a subscription from the provider.
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription>;
}
