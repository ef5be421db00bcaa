use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use roadwar_conquest::{
    AttackRequest, ClaimRequest, Contest, ContestFilter, ContestStatus, DefendRequest,
    ResolvedContest, StakeRequest, UnstakeRequest,
};
use roadwar_core::{ContestId, ConquestError, DiceType, ErrorKind, NationId, RoadId, StakeId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

use crate::state::AppState;

/// Error returned by every handler
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Conquest(#[from] ConquestError),

    /// Body or query string could not be decoded
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Conquest(e) => e.kind().as_str(),
            ApiError::BadRequest(_) => ErrorKind::Validation.as_str(),
            ApiError::Timeout(_) => "timeout",
            ApiError::Internal(_) => ErrorKind::Internal.as_str(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Conquest(e) => match e.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Authorization | ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::ExternalFailure => StatusCode::BAD_GATEWAY,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            warn!(kind = self.kind(), error = %self, "Request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}

/// Success envelope: `{success: true, ...data}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

fn respond<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope {
        success: true,
        data,
    }))
}

/// Run an engine operation on the blocking pool under the request timeout.
///
/// A timed out operation keeps running and may still commit.
async fn run<T, F>(state: &Arc<AppState>, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AppState, DateTime<Utc>) -> roadwar_core::Result<T> + Send + 'static,
{
    let now = Utc::now();
    let shared = state.clone();
    let task = tokio::task::spawn_blocking(move || op(&shared, now));

    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(result)) => result.map_err(ApiError::from),
        Ok(Err(e)) => Err(ApiError::Internal(format!("worker task failed: {}", e))),
        Err(_) => Err(ApiError::Timeout(state.request_timeout)),
    }
}

fn parse_road(raw: &str) -> Result<RoadId, ApiError> {
    Ok(raw.parse()?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBody {
    pub road_id: String,
    pub nation_id: u64,
    pub stake_amount: Option<u64>,
    pub wallet_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeBody {
    pub road_id: String,
    pub amount: u64,
    #[serde(default)]
    pub lock_days: u32,
    pub wallet_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnstakeBody {
    pub stake_id: u64,
    pub wallet_address: String,
    pub amount: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackBody {
    pub road_id: String,
    pub burn_amount: u64,
    pub wallet_address: String,
    pub dice_type: String,
    pub tx_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefendBody {
    pub contest_id: u64,
    pub burn_amount: Option<u64>,
    pub wallet_address: String,
    pub tx_signature: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBody {
    pub contest_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeQuery {
    pub road_id: Option<String>,
    pub wallet: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestQuery {
    pub status: Option<String>,
    pub nation_id: Option<u64>,
    pub wallet: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContestList {
    pub contests: Vec<Contest>,
}

#[derive(Debug, Serialize)]
pub struct ManualResolution {
    pub resolved: Option<ResolvedContest>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = Utc::now();
    Json(json!({
        "success": true,
        "status": "healthy",
        "service": "territory-api",
        "uptimeSecs": (now - state.started_at).num_seconds(),
        "timestamp": now.to_rfc3339(),
    }))
}

pub async fn map(State(state): State<Arc<AppState>>) -> ApiResult<impl Serialize> {
    respond(run(&state, |s, _| s.engine.map_snapshot()).await?)
}

pub async fn territory_detail(
    State(state): State<Arc<AppState>>,
    Path(road_id): Path<String>,
) -> ApiResult<impl Serialize> {
    respond(run(&state, move |s, _| s.engine.detail(&road_id)).await?)
}

pub async fn claim(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ClaimBody>, JsonRejection>,
) -> ApiResult<impl Serialize> {
    let Json(body) = body?;
    let request = ClaimRequest {
        road_id: parse_road(&body.road_id)?,
        nation_id: NationId(body.nation_id),
        stake_amount: body.stake_amount,
        wallet: body.wallet_address,
    };
    respond(run(&state, move |s, now| s.engine.claim(request, now)).await?)
}

pub async fn stake(
    State(state): State<Arc<AppState>>,
    body: Result<Json<StakeBody>, JsonRejection>,
) -> ApiResult<impl Serialize> {
    let Json(body) = body?;
    let request = StakeRequest {
        road_id: parse_road(&body.road_id)?,
        wallet: body.wallet_address,
        amount: body.amount,
        lock_days: body.lock_days,
    };
    respond(run(&state, move |s, now| s.engine.stake(request, now)).await?)
}

pub async fn list_stakes(
    State(state): State<Arc<AppState>>,
    query: Result<Query<StakeQuery>, QueryRejection>,
) -> ApiResult<impl Serialize> {
    let Query(query) = query?;
    let listing = match (query.road_id, query.wallet) {
        (Some(road_id), _) => {
            run(&state, move |s, now| s.engine.territory_stakes(&road_id, now)).await?
        }
        (None, Some(wallet)) => {
            run(&state, move |s, now| s.engine.wallet_stakes(&wallet, now)).await?
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "roadId or wallet is required".to_string(),
            ))
        }
    };
    respond(listing)
}

pub async fn unstake(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UnstakeBody>, JsonRejection>,
) -> ApiResult<impl Serialize> {
    let Json(body) = body?;
    let request = UnstakeRequest {
        stake_id: StakeId(body.stake_id),
        wallet: body.wallet_address,
        amount: body.amount,
    };
    respond(run(&state, move |s, now| s.engine.unstake(request, now)).await?)
}

pub async fn attack(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AttackBody>, JsonRejection>,
) -> ApiResult<impl Serialize> {
    let Json(body) = body?;
    let request = AttackRequest {
        road_id: parse_road(&body.road_id)?,
        wallet: body.wallet_address,
        burn_amount: body.burn_amount,
        dice_type: body.dice_type.parse::<DiceType>()?,
        tx_signature: body.tx_signature,
    };
    respond(run(&state, move |s, now| s.engine.attack(request, now)).await?)
}

pub async fn defend(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DefendBody>, JsonRejection>,
) -> ApiResult<impl Serialize> {
    let Json(body) = body?;
    let request = DefendRequest {
        contest_id: ContestId(body.contest_id),
        wallet: body.wallet_address,
        burn_amount: body.burn_amount,
        tx_signature: body.tx_signature,
    };
    respond(run(&state, move |s, now| s.engine.defend(request, now)).await?)
}

pub async fn list_contests(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ContestQuery>, QueryRejection>,
) -> ApiResult<impl Serialize> {
    let Query(query) = query?;
    let filter = ContestFilter {
        status: query
            .status
            .as_deref()
            .map(str::parse::<ContestStatus>)
            .transpose()?,
        nation_id: query.nation_id.map(NationId),
    };
    let wallet = query.wallet;
    let contests = run(&state, move |s, _| s.engine.contests(filter, wallet.as_deref())).await?;
    respond(ContestList { contests })
}

/// Resolve one contest, or sweep every expired one when no id is given
pub async fn resolve_contests(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ResolveBody>>,
) -> Result<Response, ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let response = match body.contest_id {
        Some(id) => {
            let resolved = run(&state, move |s, now| {
                s.sweeper.resolve_one(ContestId(id), now)
            })
            .await?;
            respond(ManualResolution { resolved })?.into_response()
        }
        None => {
            let report = run(&state, |s, now| s.sweeper.sweep(now)).await?;
            respond(report)?.into_response()
        }
    };
    Ok(response)
}

pub async fn expiring_contests(State(state): State<Arc<AppState>>) -> ApiResult<impl Serialize> {
    respond(run(&state, |s, now| s.sweeper.expiring(now)).await?)
}
