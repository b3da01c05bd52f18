//! API route handlers.
//!
//! Thin adapters: decode the request, call the `BetService`, encode the
//! result. All endpoints speak JSON. Errors are rendered by the
//! `IntoResponse` impl for `BetError` below.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::{AgreeOutcome, BetService, Resolution};
use crate::types::{
    AgreementProgress, Bet, BetError, Evidence, EvidenceKind, NewBet, PaymentObligation,
};

pub type AppState = Arc<BetService>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub side: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub actor_id: String,
    pub winning_side: String,
}

#[derive(Debug, Deserialize)]
pub struct AgreeRequest {
    pub user_id: String,
    #[serde(default)]
    pub winning_side: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EvidenceRequest {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FeeQuery {
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct FeeResponse {
    pub amount: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ResolutionResponse {
    pub bet: Bet,
    pub obligations_created: usize,
    pub obligations_deferred: usize,
}

impl From<Resolution> for ResolutionResponse {
    fn from(r: Resolution) -> Self {
        Self {
            obligations_created: r.settlement.created.len(),
            obligations_deferred: r.settlement.deferred.len(),
            bet: r.bet,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AgreeResponse {
    pub resolved: bool,
    pub progress: AgreementProgress,
    #[serde(flatten)]
    pub resolution: ResolutionResponse,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

// ---------------------------------------------------------------------------
// Error rendering
// ---------------------------------------------------------------------------

impl BetError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BetError::NotFound { .. } => StatusCode::NOT_FOUND,
            BetError::Validation(_) => StatusCode::BAD_REQUEST,
            BetError::IllegalTransition { .. } | BetError::ConcurrencyConflict { .. } => {
                StatusCode::CONFLICT
            }
            BetError::DownstreamFailure { .. } => StatusCode::BAD_GATEWAY,
            BetError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, BetError>;

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/bets
pub async fn create_bet(
    State(service): State<AppState>,
    Json(req): Json<NewBet>,
) -> Result<(StatusCode, Json<Bet>), BetError> {
    let bet = service.create_bet(req).await?;
    Ok((StatusCode::CREATED, Json(bet)))
}

/// GET /api/bets/:id
pub async fn get_bet(State(service): State<AppState>, Path(id): Path<String>) -> ApiResult<Bet> {
    Ok(Json(service.get_bet(&id).await?))
}

/// POST /api/bets/:id/join
pub async fn join_bet(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<JoinRequest>,
) -> ApiResult<Bet> {
    let display_name = req.display_name.as_deref().unwrap_or(&req.user_id);
    let bet = service.join_bet(&id, &req.user_id, display_name, &req.side).await?;
    Ok(Json(bet))
}

/// POST /api/bets/:id/resolve
pub async fn resolve_bet(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<ResolutionResponse> {
    let resolution = service.resolve_bet(&id, &req.winning_side, &req.actor_id).await?;
    Ok(Json(resolution.into()))
}

/// POST /api/bets/:id/agree
pub async fn agree(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AgreeRequest>,
) -> ApiResult<AgreeResponse> {
    let outcome = service
        .agree_to_resolution(&id, &req.user_id, req.winning_side.as_deref())
        .await?;

    let response = match outcome {
        AgreeOutcome::Recorded { bet, progress } => AgreeResponse {
            resolved: false,
            progress,
            resolution: ResolutionResponse {
                bet,
                obligations_created: 0,
                obligations_deferred: 0,
            },
        },
        AgreeOutcome::Resolved(resolution) => AgreeResponse {
            resolved: true,
            progress: resolution.bet.agreement_progress(),
            resolution: resolution.into(),
        },
    };
    Ok(Json(response))
}

/// POST /api/bets/:id/evidence
pub async fn submit_evidence(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EvidenceRequest>,
) -> Result<(StatusCode, Json<Evidence>), BetError> {
    let evidence = service
        .submit_evidence(&id, &req.user_id, req.kind, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(evidence)))
}

/// POST /api/bets/:id/payments
pub async fn record_payment(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult<Bet> {
    Ok(Json(service.record_payment(&id, &req.user_id).await?))
}

/// GET /api/bets/:id/obligations
pub async fn get_obligations(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<PaymentObligation>> {
    Ok(Json(service.obligations_for_bet(&id).await?))
}

/// GET /api/users/:id/bets
pub async fn get_user_bets(
    State(service): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Bet>> {
    Ok(Json(service.bets_for_user(&user_id).await?))
}

/// GET /api/fees?amount=
pub async fn get_fee(
    State(service): State<AppState>,
    Query(q): Query<FeeQuery>,
) -> ApiResult<FeeResponse> {
    let fee = service.compute_facilitation_fee(q.amount)?;
    Ok(Json(FeeResponse { amount: q.amount, fee }))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
