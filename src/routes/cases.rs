use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{require_admin, AuthenticatedUser};
use crate::db::run_in_transaction;
use crate::error::{AppError, AppResult};
use crate::models::{
    Case, CaseStatus, NewCase, NewCaseParticipant, Organization, ParticipantRole,
    ParticipantStatus, UserRole,
};
use crate::schema::{case_participants, cases, organizations};
use crate::state::AppState;

use super::participants::ensure_case_mediator;

#[derive(Deserialize)]
pub struct CreateCaseRequest {
    pub organization_id: Option<Uuid>,
    pub title: Option<String>,
}

#[derive(Deserialize)]
pub struct CaseFilters {
    pub organization_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct CaseResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub status: CaseStatus,
    pub mediator_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

pub async fn create_case(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCaseRequest>,
) -> AppResult<(StatusCode, Json<CaseResponse>)> {
    if user.role == UserRole::Divorcee {
        return Err(AppError::forbidden(
            "mediator or administrator access required",
        ));
    }

    let organization_id = payload
        .organization_id
        .ok_or_else(|| AppError::bad_request("organization_id is required"))?;
    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request("title must not be empty"))?
        .to_string();

    let case = run_in_transaction(&state.pool, |conn| {
        organizations::table
            .find(organization_id)
            .first::<Organization>(conn)
            .optional()?
            .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "organization not found"))?;

        let new_case = NewCase {
            id: Uuid::new_v4(),
            organization_id,
            title: title.clone(),
            status: CaseStatus::Intake,
            created_by: Some(user.user_id),
        };

        diesel::insert_into(cases::table)
            .values(&new_case)
            .execute(conn)?;

        // A mediator opening an intake staffs themselves on the case.
        if user.role == UserRole::Mediator {
            let membership = NewCaseParticipant {
                case_id: new_case.id,
                user_id: user.user_id,
                role: ParticipantRole::Mediator,
                status: Some(ParticipantStatus::Active),
                invited_by: None,
            };
            diesel::insert_into(case_participants::table)
                .values(&membership)
                .execute(conn)?;
        }

        let case: Case = cases::table.find(new_case.id).first(conn)?;
        Ok(case)
    })?;

    Ok((StatusCode::CREATED, Json(case_to_response(case))))
}

pub async fn get_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
) -> AppResult<Json<CaseResponse>> {
    let mut conn = state.db()?;

    let case = cases::table
        .find(case_id)
        .first::<Case>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "case not found"))?;

    Ok(Json(case_to_response(case)))
}

pub async fn list_cases(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<CaseFilters>,
) -> AppResult<Json<Vec<CaseResponse>>> {
    require_admin(&user)?;

    let status = filters
        .status
        .as_deref()
        .map(CaseStatus::parse)
        .transpose()
        .map_err(AppError::bad_request)?;

    let mut conn = state.db()?;

    let mut query = cases::table
        .into_boxed()
        .order(cases::created_at.desc());
    if let Some(organization_id) = filters.organization_id {
        query = query.filter(cases::organization_id.eq(organization_id));
    }
    if let Some(status) = status {
        query = query.filter(cases::status.eq(status));
    }

    let rows: Vec<Case> = query.load(&mut conn)?;
    Ok(Json(rows.into_iter().map(case_to_response).collect()))
}

pub async fn update_case_status(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<CaseResponse>> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::bad_request("status is required"))?;
    let status = CaseStatus::parse(status).map_err(AppError::bad_request)?;

    let mut conn = state.db()?;

    let case = cases::table
        .find(case_id)
        .first::<Case>(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "case not found"))?;

    if user.role != UserRole::Admin {
        ensure_case_mediator(&mut conn, &case, user.user_id)?;
    }

    diesel::update(cases::table.find(case_id))
        .set((
            cases::status.eq(status),
            cases::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Case = cases::table.find(case_id).first(&mut conn)?;
    Ok(Json(case_to_response(updated)))
}

/// Locks the case row for the rest of the transaction, so staffing
/// mutations of the same case serialize.
pub(super) fn lock_case(conn: &mut PgConnection, case_id: Uuid) -> AppResult<Case> {
    cases::table
        .find(case_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "case not found"))
}

pub(super) fn case_to_response(case: Case) -> CaseResponse {
    CaseResponse {
        id: case.id,
        organization_id: case.organization_id,
        title: case.title,
        status: case.status,
        mediator_id: case.mediator_id,
        created_by: case.created_by,
        created_at: to_iso(case.created_at),
        updated_at: to_iso(case.updated_at),
    }
}

pub(super) fn to_iso(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc).to_rfc3339()
}
