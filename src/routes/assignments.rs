use std::collections::HashMap;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use diesel::{
    dsl::{count_star, exists},
    prelude::*,
    PgConnection,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{require_admin, AuthenticatedUser};
use crate::db::run_in_transaction;
use crate::error::{AppError, AppResult};
use crate::models::{
    AssignmentStatus, Case, CaseAssignment, CaseStatus, NewCaseAssignment, Organization, User,
    UserRole,
};
use crate::schema::{case_assignments, cases, organizations, users};
use crate::state::AppState;

use super::cases::{case_to_response, lock_case, to_iso, CaseResponse};

#[derive(Deserialize)]
pub struct CreateAssignmentRequest {
    pub case_id: Option<Uuid>,
    pub mediator_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ReassignRequest {
    pub new_mediator_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignmentFilters {
    pub status: Option<String>,
    pub mediator_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct OrganizationFilter {
    pub organization_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub case_id: Uuid,
    pub mediator_id: Uuid,
    pub organization_id: Uuid,
    pub assigned_by: Uuid,
    pub status: AssignmentStatus,
    pub notes: Option<String>,
    pub assigned_at: String,
    pub unassigned_at: Option<String>,
}

#[derive(Serialize)]
pub struct MediatorWorkloadEntry {
    pub mediator_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub organization_id: Option<Uuid>,
    pub active_cases: i64,
    pub completed_cases: i64,
    pub available: bool,
}

pub async fn create_assignment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateAssignmentRequest>,
) -> AppResult<(StatusCode, Json<AssignmentResponse>)> {
    require_admin(&user)?;

    let (case_id, mediator_id) = match (payload.case_id, payload.mediator_id) {
        (Some(case_id), Some(mediator_id)) => (case_id, mediator_id),
        _ => {
            return Err(AppError::bad_request(
                "case_id and mediator_id are required",
            ))
        }
    };

    let assignment = run_in_transaction(&state.pool, |conn| {
        // Lock the case row so concurrent staffing of the same case
        // serializes here.
        let case = lock_case(conn, case_id)?;
        let mediator = load_mediator(conn, mediator_id, &case)?;

        let already_assigned: bool = diesel::select(exists(
            case_assignments::table
                .filter(case_assignments::case_id.eq(case_id))
                .filter(case_assignments::status.eq(AssignmentStatus::Active)),
        ))
        .get_result(conn)?;
        if already_assigned {
            return Err(AppError::bad_request(
                "case is already assigned to a mediator, use reassignment",
            ));
        }

        let row = insert_active_assignment(
            conn,
            &case,
            mediator.id,
            user.user_id,
            payload.notes.clone(),
        )?;
        set_case_mediator(conn, case_id, Some(mediator.id))?;
        Ok(row)
    })?;

    tracing::info!(
        case_id = %assignment.case_id,
        mediator_id = %assignment.mediator_id,
        assigned_by = %user.user_id,
        "mediator assigned to case"
    );

    Ok((
        StatusCode::CREATED,
        Json(assignment_to_response(assignment)),
    ))
}

pub async fn reassign_mediator(
    State(state): State<AppState>,
    Path(assignment_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<ReassignRequest>,
) -> AppResult<Json<AssignmentResponse>> {
    require_admin(&user)?;

    let new_mediator_id = payload
        .new_mediator_id
        .ok_or_else(|| AppError::bad_request("new_mediator_id is required"))?;

    let assignment = run_in_transaction(&state.pool, |conn| {
        let current = lock_assignment(conn, assignment_id)?;
        if current.status != AssignmentStatus::Active {
            return Err(AppError::bad_request("assignment is not active"));
        }

        let case = lock_case(conn, current.case_id)?;
        let mediator = load_mediator(conn, new_mediator_id, &case)?;

        diesel::update(case_assignments::table.find(current.id))
            .set((
                case_assignments::status.eq(AssignmentStatus::Reassigned),
                case_assignments::unassigned_at.eq(Some(Utc::now().naive_utc())),
            ))
            .execute(conn)?;

        let row = insert_active_assignment(
            conn,
            &case,
            mediator.id,
            user.user_id,
            payload.notes.clone(),
        )?;
        set_case_mediator(conn, case.id, Some(mediator.id))?;
        Ok(row)
    })?;

    tracing::info!(
        case_id = %assignment.case_id,
        mediator_id = %assignment.mediator_id,
        superseded_assignment = %assignment_id,
        "case reassigned"
    );

    Ok(Json(assignment_to_response(assignment)))
}

pub async fn unassign_mediator(
    State(state): State<AppState>,
    Path(assignment_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    require_admin(&user)?;

    let case_id = run_in_transaction(&state.pool, |conn| {
        let current = lock_assignment(conn, assignment_id)?;
        if current.status != AssignmentStatus::Active {
            return Err(AppError::new(
                StatusCode::NOT_FOUND,
                "active assignment not found",
            ));
        }

        lock_case(conn, current.case_id)?;

        diesel::update(case_assignments::table.find(current.id))
            .set((
                case_assignments::status.eq(AssignmentStatus::Unassigned),
                case_assignments::unassigned_at.eq(Some(Utc::now().naive_utc())),
            ))
            .execute(conn)?;

        set_case_mediator(conn, current.case_id, None)?;
        Ok(current.case_id)
    })?;

    tracing::info!(%case_id, assignment_id = %assignment_id, "mediator unassigned from case");

    Ok(Json(json!({
        "success": true,
        "message": "mediator unassigned from case"
    })))
}

pub async fn list_assignments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<AssignmentFilters>,
) -> AppResult<Json<Vec<AssignmentResponse>>> {
    require_admin(&user)?;

    let status = filters
        .status
        .as_deref()
        .map(AssignmentStatus::parse)
        .transpose()
        .map_err(AppError::bad_request)?;

    let mut conn = state.db()?;

    let mut query = case_assignments::table
        .into_boxed()
        .order(case_assignments::assigned_at.desc());
    if let Some(status) = status {
        query = query.filter(case_assignments::status.eq(status));
    }
    if let Some(mediator_id) = filters.mediator_id {
        query = query.filter(case_assignments::mediator_id.eq(mediator_id));
    }
    if let Some(organization_id) = filters.organization_id {
        query = query.filter(case_assignments::organization_id.eq(organization_id));
    }

    let rows: Vec<CaseAssignment> = query.load(&mut conn)?;
    Ok(Json(rows.into_iter().map(assignment_to_response).collect()))
}

pub async fn list_unassigned_cases(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<OrganizationFilter>,
) -> AppResult<Json<Vec<CaseResponse>>> {
    require_admin(&user)?;

    let mut conn = state.db()?;

    let mut query = cases::table
        .into_boxed()
        .filter(cases::mediator_id.is_null())
        .order(cases::created_at.asc());
    if let Some(organization_id) = filter.organization_id {
        query = query.filter(cases::organization_id.eq(organization_id));
    }

    let rows: Vec<Case> = query.load(&mut conn)?;
    Ok(Json(rows.into_iter().map(case_to_response).collect()))
}

pub async fn mediator_workload(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<OrganizationFilter>,
) -> AppResult<Json<Vec<MediatorWorkloadEntry>>> {
    require_admin(&user)?;

    let mut conn = state.db()?;

    let mut mediators_query = users::table
        .into_boxed()
        .filter(users::role.eq(UserRole::Mediator))
        .order(users::full_name.asc());
    if let Some(organization_id) = filter.organization_id {
        mediators_query = mediators_query.filter(users::organization_id.eq(organization_id));
    }
    let mediators: Vec<User> = mediators_query.load(&mut conn)?;

    let active_rows: Vec<(Uuid, i64)> = case_assignments::table
        .filter(case_assignments::status.eq(AssignmentStatus::Active))
        .group_by(case_assignments::mediator_id)
        .select((case_assignments::mediator_id, count_star()))
        .load(&mut conn)?;
    let active_counts: HashMap<Uuid, i64> = active_rows.into_iter().collect();

    let completed_rows: Vec<(Uuid, i64)> = case_assignments::table
        .inner_join(cases::table)
        .filter(cases::status.eq(CaseStatus::Completed))
        .group_by(case_assignments::mediator_id)
        .select((case_assignments::mediator_id, count_star()))
        .load(&mut conn)?;
    let completed_counts: HashMap<Uuid, i64> = completed_rows.into_iter().collect();

    let caps: HashMap<Uuid, i32> = organizations::table
        .load::<Organization>(&mut conn)?
        .into_iter()
        .map(|org| (org.id, org.max_active_cases))
        .collect();

    let entries = mediators
        .into_iter()
        .map(|mediator| {
            let active_cases = *active_counts.get(&mediator.id).unwrap_or(&0);
            let completed_cases = *completed_counts.get(&mediator.id).unwrap_or(&0);
            let cap = mediator
                .organization_id
                .and_then(|id| caps.get(&id).copied())
                .unwrap_or(state.config.default_mediator_case_cap);

            MediatorWorkloadEntry {
                mediator_id: mediator.id,
                full_name: mediator.full_name,
                email: mediator.email,
                organization_id: mediator.organization_id,
                active_cases,
                completed_cases,
                available: active_cases < i64::from(cap),
            }
        })
        .collect();

    Ok(Json(entries))
}

fn lock_assignment(conn: &mut PgConnection, assignment_id: Uuid) -> AppResult<CaseAssignment> {
    case_assignments::table
        .find(assignment_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "assignment not found"))
}

fn load_mediator(conn: &mut PgConnection, mediator_id: Uuid, case: &Case) -> AppResult<User> {
    let mediator: User = users::table
        .find(mediator_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "mediator not found"))?;

    if mediator.role != UserRole::Mediator {
        return Err(AppError::bad_request("user is not a mediator"));
    }
    if mediator.organization_id != Some(case.organization_id) {
        return Err(AppError::bad_request(
            "mediator belongs to a different organization",
        ));
    }

    Ok(mediator)
}

fn insert_active_assignment(
    conn: &mut PgConnection,
    case: &Case,
    mediator_id: Uuid,
    assigned_by: Uuid,
    notes: Option<String>,
) -> AppResult<CaseAssignment> {
    let new_assignment = NewCaseAssignment {
        id: Uuid::new_v4(),
        case_id: case.id,
        mediator_id,
        organization_id: case.organization_id,
        assigned_by,
        status: AssignmentStatus::Active,
        notes,
    };

    diesel::insert_into(case_assignments::table)
        .values(&new_assignment)
        .execute(conn)?;

    let row = case_assignments::table
        .find(new_assignment.id)
        .first(conn)?;
    Ok(row)
}

fn set_case_mediator(
    conn: &mut PgConnection,
    case_id: Uuid,
    mediator_id: Option<Uuid>,
) -> AppResult<()> {
    diesel::update(cases::table.find(case_id))
        .set((
            cases::mediator_id.eq(mediator_id),
            cases::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

fn assignment_to_response(row: CaseAssignment) -> AssignmentResponse {
    AssignmentResponse {
        id: row.id,
        case_id: row.case_id,
        mediator_id: row.mediator_id,
        organization_id: row.organization_id,
        assigned_by: row.assigned_by,
        status: row.status,
        notes: row.notes,
        assigned_at: to_iso(row.assigned_at),
        unassigned_at: row.unassigned_at.map(to_iso),
    }
}
