use axum::{extract::State, http::StatusCode};
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Path};

use super::VoucherResponse;

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub user_id: String,
}

/// POST /deals/{deal_id}/claim - issue a voucher on a live deal.
pub async fn claim_deal(
    State(state): State<AppState>,
    Path(deal_id): Path<String>,
    Json(req): Json<ClaimRequest>,
) -> Result<(StatusCode, Json<VoucherResponse>)> {
    let mut conn = state.db.get()?;
    let now = state.clock.now();

    let voucher = queries::claim_voucher_atomic(
        &mut conn,
        &deal_id,
        &req.user_id,
        state.voucher_ttl_secs,
        now,
    )?;

    tracing::info!(
        "Voucher {} issued on deal {} to user {} (expires_at={})",
        voucher.id,
        voucher.deal_id,
        voucher.user_id,
        voucher.expires_at
    );

    let details = queries::get_voucher_details(&conn, voucher)?;
    Ok((StatusCode::CREATED, Json(VoucherResponse { voucher: details })))
}
