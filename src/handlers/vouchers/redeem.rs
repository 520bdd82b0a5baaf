use axum::extract::State;
use rusqlite::Connection;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::id::normalize_voucher_code;
use crate::models::Voucher;

use super::VoucherResponse;

/// Request body for POST /vouchers/redeem. Exactly one field must be set.
#[derive(Debug, Default, Deserialize)]
pub struct RedeemRequest {
    /// Code typed in by staff.
    #[serde(default)]
    pub code: Option<String>,
    /// Raw scanner output from the voucher's QR code.
    #[serde(default)]
    pub scanned: Option<String>,
}

/// JSON carried in a voucher QR code.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScannedPayload {
    #[serde(default, alias = "redemptionId", alias = "redemption_id")]
    code: Option<String>,
    #[serde(default, alias = "voucher_id")]
    voucher_id: Option<String>,
    #[serde(default, alias = "deal_id")]
    deal_id: Option<String>,
    #[serde(default, alias = "user_id")]
    user_id: Option<String>,
}

/// The voucher a redemption request points at, plus any supporting ids
/// that must agree with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedemptionTarget {
    pub code: Option<String>,
    pub voucher_id: Option<String>,
    pub deal_id: Option<String>,
    pub user_id: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RedemptionTarget {
    pub fn from_request(req: RedeemRequest) -> Result<Self> {
        match (non_empty(req.code), non_empty(req.scanned)) {
            (Some(code), None) => Ok(Self {
                code: Some(normalize_voucher_code(&code)),
                ..Default::default()
            }),
            (None, Some(scanned)) => Self::from_scanned(&scanned),
            _ => Err(AppError::BadRequest(msg::CODE_REQUIRED.into())),
        }
    }

    /// Decode scanner output. Structured payloads are JSON objects; anything
    /// else is read as a plain voucher code.
    pub fn from_scanned(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let Ok(payload) = serde_json::from_str::<ScannedPayload>(raw) else {
            return Ok(Self {
                code: Some(normalize_voucher_code(raw)),
                ..Default::default()
            });
        };

        let target = Self {
            code: non_empty(payload.code).map(|c| normalize_voucher_code(&c)),
            voucher_id: non_empty(payload.voucher_id),
            deal_id: non_empty(payload.deal_id),
            user_id: non_empty(payload.user_id),
        };
        if target.code.is_none() && target.voucher_id.is_none() {
            return Err(AppError::BadRequest(
                "Scanned payload does not identify a voucher".into(),
            ));
        }
        Ok(target)
    }

    /// Load the voucher. Disagreeing supporting ids are reported as not found
    /// so a forged payload learns nothing about other vouchers.
    pub fn find_voucher(&self, conn: &Connection) -> Result<Voucher> {
        let voucher = match (&self.code, &self.voucher_id) {
            (Some(code), _) => queries::get_voucher_by_code(conn, code)?,
            (None, Some(id)) => queries::get_voucher_by_id(conn, id)?,
            (None, None) => None,
        }
        .ok_or_else(|| AppError::NotFound(msg::VOUCHER_NOT_FOUND.into()))?;

        let agrees = |hint: &Option<String>, actual: &str| {
            hint.as_deref().is_none_or(|expected| expected == actual)
        };
        if !agrees(&self.voucher_id, &voucher.id)
            || !agrees(&self.deal_id, &voucher.deal_id)
            || !agrees(&self.user_id, &voucher.user_id)
        {
            tracing::warn!(
                "Scanned payload ids do not match voucher {}",
                voucher.id
            );
            return Err(AppError::NotFound(msg::VOUCHER_NOT_FOUND.into()));
        }

        Ok(voucher)
    }
}

/// POST /vouchers/redeem - consume a voucher at the till.
pub async fn redeem_voucher(
    State(state): State<AppState>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<VoucherResponse>> {
    let target = RedemptionTarget::from_request(req)?;
    let mut conn = state.db.get()?;

    let voucher = target.find_voucher(&conn)?;
    let now = state.clock.now();

    let redeemed = match queries::redeem_voucher_atomic(&mut conn, &voucher.id, now) {
        Ok(v) => v,
        Err(e) => {
            tracing::info!("Redemption of voucher {} refused: {}", voucher.id, e);
            return Err(e);
        }
    };

    tracing::info!(
        "Voucher {} redeemed on deal {}",
        redeemed.id,
        redeemed.deal_id
    );

    let details = queries::get_voucher_details(&conn, redeemed)?;
    Ok(Json(VoucherResponse { voucher: details }))
}

/// GET /vouchers/{code} - read-only preview for the scanner screen.
pub async fn get_voucher(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<VoucherResponse>> {
    let conn = state.db.get()?;
    let voucher = queries::get_voucher_by_code(&conn, &normalize_voucher_code(&code))?
        .ok_or_else(|| AppError::NotFound(msg::VOUCHER_NOT_FOUND.into()))?;
    let details = queries::get_voucher_details(&conn, voucher)?;
    Ok(Json(VoucherResponse { voucher: details }))
}
