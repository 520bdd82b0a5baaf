pub mod health;
pub mod vouchers;
pub mod webhooks;
