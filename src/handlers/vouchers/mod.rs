mod claim;
mod redeem;

pub use claim::*;
pub use redeem::*;

use axum::{
    Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::models::VoucherDetails;

#[derive(Debug, Serialize)]
pub struct VoucherResponse {
    pub voucher: VoucherDetails,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/vouchers/redeem", post(redeem_voucher))
        .route("/vouchers/{code}", get(get_voucher))
        .route("/deals/{deal_id}/claim", post(claim_deal))
}
