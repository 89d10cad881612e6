use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::Call,
    services::{
        auth::Claims,
        calls::{CallsService, InitiateCall, JoinOptions, RoomJoin},
        jitsi::JitsiService,
    },
    AppState,
};

use super::super::middleware::get_user_id;

fn calls_service(state: AppState) -> CallsService {
    let jitsi = JitsiService::new(state.config.jitsi.clone());
    CallsService::new(state.db, state.redis, jitsi, state.config.calls.clone())
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

impl PaginationQuery {
    fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit
    }
}

pub async fn initiate_call(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<InitiateCall>,
) -> AppResult<(StatusCode, Json<Call>)> {
    let user_id = get_user_id(&claims)?;

    let call = calls_service(state).initiate_call(user_id, req).await?;
    Ok((StatusCode::CREATED, Json(call)))
}

pub async fn get_calls(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PaginationQuery>,
) -> AppResult<Json<Vec<Call>>> {
    let user_id = get_user_id(&claims)?;

    let calls = calls_service(state)
        .list_calls(user_id, query.limit, query.offset())
        .await?;
    Ok(Json(calls))
}

pub async fn get_missed_calls(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PaginationQuery>,
) -> AppResult<Json<Vec<Call>>> {
    let user_id = get_user_id(&claims)?;

    let calls = calls_service(state)
        .list_missed(user_id, query.limit, query.offset())
        .await?;
    Ok(Json(calls))
}

pub async fn get_call(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(call_id): Path<Uuid>,
) -> AppResult<Json<Call>> {
    let user_id = get_user_id(&claims)?;

    let call = calls_service(state).get_call(call_id, user_id).await?;
    Ok(Json(call))
}

#[derive(Debug, Serialize)]
pub struct CallWithRoom {
    #[serde(flatten)]
    pub call: Call,
    pub room: RoomJoin,
}

pub async fn join_call(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(call_id): Path<Uuid>,
    Json(opts): Json<JoinOptions>,
) -> AppResult<Json<CallWithRoom>> {
    let user_id = get_user_id(&claims)?;

    let (call, room) = calls_service(state).join_call(call_id, user_id, opts).await?;
    Ok(Json(CallWithRoom { call, room }))
}

pub async fn accept_call(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(call_id): Path<Uuid>,
) -> AppResult<Json<CallWithRoom>> {
    let user_id = get_user_id(&claims)?;

    let (call, room) = calls_service(state).accept_call(call_id, user_id).await?;
    Ok(Json(CallWithRoom { call, room }))
}

pub async fn reject_call(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(call_id): Path<Uuid>,
) -> AppResult<Json<Call>> {
    let user_id = get_user_id(&claims)?;

    let call = calls_service(state).reject_call(call_id, user_id).await?;
    Ok(Json(call))
}

#[derive(Debug, Default, Deserialize)]
pub struct EndCallRequest {
    pub duration: Option<i32>,
}

pub async fn end_call(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(call_id): Path<Uuid>,
    Json(req): Json<EndCallRequest>,
) -> AppResult<Json<Call>> {
    let user_id = get_user_id(&claims)?;

    let call = calls_service(state)
        .end_call(call_id, user_id, req.duration)
        .await?;
    Ok(Json(call))
}

pub async fn mark_missed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(call_id): Path<Uuid>,
) -> AppResult<Json<Call>> {
    let user_id = get_user_id(&claims)?;

    let call = calls_service(state).mark_missed(call_id, user_id).await?;
    Ok(Json(call))
}

#[derive(Debug, Deserialize)]
pub struct AttachRecordingRequest {
    pub recording_url: String,
    pub metadata: Option<serde_json::Value>,
}

pub async fn attach_recording(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(call_id): Path<Uuid>,
    Json(req): Json<AttachRecordingRequest>,
) -> AppResult<Json<Call>> {
    let user_id = get_user_id(&claims)?;

    let call = calls_service(state)
        .attach_recording(call_id, user_id, &req.recording_url, req.metadata)
        .await?;
    Ok(Json(call))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_one_based() {
        let q = PaginationQuery { page: 1, limit: 20 };
        assert_eq!(q.offset(), 0);
        let q = PaginationQuery { page: 3, limit: 20 };
        assert_eq!(q.offset(), 40);
        // Degenerate page values clamp to the first page
        let q = PaginationQuery { page: 0, limit: 20 };
        assert_eq!(q.offset(), 0);
    }
}
