use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::Utc;
use diesel::{
    dsl::{count_star, exists},
    prelude::*,
    PgConnection,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::db::run_in_transaction;
use crate::error::{AppError, AppResult};
use crate::models::{
    Case, CaseParticipant, NewCaseParticipant, NotificationKind, ParticipantRole,
    ParticipantStatus, User,
};
use crate::schema::{case_participants, cases, users};
use crate::state::AppState;

use super::cases::{lock_case, to_iso};

#[derive(Deserialize)]
pub struct InviteParticipantRequest {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub role: String,
}

#[derive(Deserialize)]
pub struct UpdateParticipantRequest {
    pub role: Option<String>,
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct ParticipantResponse {
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub status: Option<ParticipantStatus>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct ParticipantListEntry {
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub status: Option<ParticipantStatus>,
    pub full_name: String,
    pub email: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct AcceptResponse {
    pub success: bool,
    pub status: ParticipantStatus,
}

#[derive(Serialize)]
pub struct RemoveResponse {
    pub success: bool,
}

pub async fn invite_participant(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<InviteParticipantRequest>,
) -> AppResult<Json<ParticipantResponse>> {
    let role = ParticipantRole::parse(&payload.role).map_err(AppError::bad_request)?;

    let mut conn = state.db()?;

    let case = load_case(&mut conn, case_id)?;
    ensure_case_mediator(&mut conn, &case, user.user_id)?;

    let target = resolve_target_user(&mut conn, payload.user_id, payload.email.as_deref())?;

    let existing: Option<CaseParticipant> = case_participants::table
        .find((case_id, target.id))
        .first(&mut conn)
        .optional()?;
    if existing.is_some() {
        return Err(AppError::conflict(
            "user is already a participant on this case",
        ));
    }

    // Mediators are pre-vetted and join active; divorcees must accept.
    let status = match role {
        ParticipantRole::Mediator => ParticipantStatus::Active,
        ParticipantRole::Divorcee => ParticipantStatus::Invited,
    };

    let new_participant = NewCaseParticipant {
        case_id,
        user_id: target.id,
        role,
        status: Some(status),
        invited_by: Some(user.user_id),
    };

    match diesel::insert_into(case_participants::table)
        .values(&new_participant)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict(
                "user is already a participant on this case",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let row: CaseParticipant = case_participants::table
        .find((case_id, target.id))
        .first(&mut conn)?;
    drop(conn);

    dispatch(
        &state,
        &[target.id],
        format!(
            "You have been invited to join case \"{}\" as {}",
            case.title, role
        ),
        NotificationKind::Participant,
    )
    .await;

    Ok(Json(participant_to_response(row)))
}

pub async fn accept_invite(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<AcceptResponse>> {
    let mut conn = state.db()?;

    let case = load_case(&mut conn, case_id)?;

    let row: CaseParticipant = case_participants::table
        .find((case_id, user.user_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "participant not found"))?;

    if row.role != ParticipantRole::Divorcee {
        return Err(AppError::forbidden(
            "only divorcee participants may accept an invitation",
        ));
    }

    // Idempotent: accepting an already-active membership is a no-op and
    // must not re-notify the mediators.
    if counts_as_active(row.status) {
        return Ok(Json(AcceptResponse {
            success: true,
            status: ParticipantStatus::Active,
        }));
    }

    diesel::update(case_participants::table.find((case_id, user.user_id)))
        .set((
            case_participants::status.eq(Some(ParticipantStatus::Active)),
            case_participants::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let mut mediator_ids: Vec<Uuid> = case_participants::table
        .filter(case_participants::case_id.eq(case_id))
        .filter(case_participants::role.eq(ParticipantRole::Mediator))
        .filter(
            case_participants::status
                .is_null()
                .or(case_participants::status.eq(ParticipantStatus::Active)),
        )
        .select(case_participants::user_id)
        .load(&mut conn)?;
    mediator_ids.extend(case.mediator_id);
    drop(conn);

    dispatch(
        &state,
        &mediator_ids,
        format!(
            "{} accepted their invitation to case \"{}\"",
            user.email, case.title
        ),
        NotificationKind::Participant,
    )
    .await;

    Ok(Json(AcceptResponse {
        success: true,
        status: ParticipantStatus::Active,
    }))
}

pub async fn list_participants(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
) -> AppResult<Json<Vec<ParticipantListEntry>>> {
    let mut conn = state.db()?;

    let rows: Vec<(CaseParticipant, User)> = case_participants::table
        .inner_join(users::table)
        .filter(case_participants::case_id.eq(case_id))
        .order(users::full_name.asc())
        .load(&mut conn)?;

    let entries = rows
        .into_iter()
        .map(|(participant, user)| ParticipantListEntry {
            case_id: participant.case_id,
            user_id: participant.user_id,
            role: participant.role,
            status: participant.status,
            full_name: user.full_name,
            email: user.email,
            created_at: to_iso(participant.created_at),
        })
        .collect();

    Ok(Json(entries))
}

pub async fn update_participant(
    State(state): State<AppState>,
    Path((case_id, target_user_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateParticipantRequest>,
) -> AppResult<Json<ParticipantResponse>> {
    let requested_role = payload
        .role
        .as_deref()
        .map(ParticipantRole::parse)
        .transpose()
        .map_err(AppError::bad_request)?;
    let requested_status = payload
        .status
        .as_deref()
        .map(ParticipantStatus::parse)
        .transpose()
        .map_err(AppError::bad_request)?;

    if requested_role.is_none() && requested_status.is_none() {
        return Err(AppError::bad_request("role or status is required"));
    }

    let mut conn = state.db()?;
    let case = load_case(&mut conn, case_id)?;
    ensure_case_mediator(&mut conn, &case, user.user_id)?;
    drop(conn);

    let updated = run_in_transaction(&state.pool, |conn| {
        // Case-level lock first: the mediator-floor count must not race a
        // concurrent demotion of a different participant on the same case.
        lock_case(conn, case_id)?;
        let row = lock_participant(conn, case_id, target_user_id)?;

        if would_demote_mediator(&row, requested_role, requested_status) {
            let message = if requested_status == Some(ParticipantStatus::Removed) {
                "Cannot remove last active mediator"
            } else {
                "Cannot demote last active mediator"
            };
            ensure_other_active_mediator(conn, case_id, target_user_id, message)?;
        }

        diesel::update(case_participants::table.find((case_id, target_user_id)))
            .set((
                &ParticipantChangeset {
                    role: requested_role,
                    status: requested_status,
                },
                case_participants::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        let updated: CaseParticipant = case_participants::table
            .find((case_id, target_user_id))
            .first(conn)?;
        Ok(updated)
    })?;

    let message = match requested_status {
        Some(status) => format!(
            "Your participation status on case \"{}\" is now {}",
            case.title, status
        ),
        None => format!("Your participation on case \"{}\" was updated", case.title),
    };
    dispatch(&state, &[target_user_id], message, NotificationKind::Participant).await;

    Ok(Json(participant_to_response(updated)))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Path((case_id, target_user_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<Json<RemoveResponse>> {
    let mut conn = state.db()?;
    let case = load_case(&mut conn, case_id)?;
    ensure_case_mediator(&mut conn, &case, user.user_id)?;
    drop(conn);

    run_in_transaction(&state.pool, |conn| {
        lock_case(conn, case_id)?;
        let row = lock_participant(conn, case_id, target_user_id)?;

        if row.role == ParticipantRole::Mediator && counts_as_active(row.status) {
            ensure_other_active_mediator(
                conn,
                case_id,
                target_user_id,
                "Cannot remove last active mediator",
            )?;
        }

        diesel::delete(case_participants::table.find((case_id, target_user_id)))
            .execute(conn)?;
        Ok(())
    })?;

    dispatch(
        &state,
        &[target_user_id],
        format!("You were removed from case \"{}\"", case.title),
        NotificationKind::Participant,
    )
    .await;

    Ok(Json(RemoveResponse { success: true }))
}

#[derive(AsChangeset)]
#[diesel(table_name = case_participants)]
struct ParticipantChangeset {
    role: Option<ParticipantRole>,
    status: Option<ParticipantStatus>,
}

/// A membership row with no recorded status predates status tracking and is
/// treated as active everywhere staffing decisions are made.
pub(crate) fn counts_as_active(status: Option<ParticipantStatus>) -> bool {
    status.map_or(true, |status| status == ParticipantStatus::Active)
}

fn would_demote_mediator(
    row: &CaseParticipant,
    requested_role: Option<ParticipantRole>,
    requested_status: Option<ParticipantStatus>,
) -> bool {
    if row.role != ParticipantRole::Mediator || !counts_as_active(row.status) {
        return false;
    }
    matches!(requested_role, Some(role) if role != ParticipantRole::Mediator)
        || matches!(requested_status, Some(status) if status != ParticipantStatus::Active)
}

fn lock_participant(
    conn: &mut PgConnection,
    case_id: Uuid,
    user_id: Uuid,
) -> AppResult<CaseParticipant> {
    case_participants::table
        .find((case_id, user_id))
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "participant not found"))
}

fn ensure_other_active_mediator(
    conn: &mut PgConnection,
    case_id: Uuid,
    excluded_user_id: Uuid,
    message: &str,
) -> AppResult<()> {
    let others: i64 = case_participants::table
        .filter(case_participants::case_id.eq(case_id))
        .filter(case_participants::user_id.ne(excluded_user_id))
        .filter(case_participants::role.eq(ParticipantRole::Mediator))
        .filter(
            case_participants::status
                .is_null()
                .or(case_participants::status.eq(ParticipantStatus::Active)),
        )
        .select(count_star())
        .first(conn)?;

    if others == 0 {
        return Err(AppError::bad_request(message));
    }
    Ok(())
}

pub(super) fn ensure_case_mediator(
    conn: &mut PgConnection,
    case: &Case,
    user_id: Uuid,
) -> AppResult<()> {
    if case.mediator_id == Some(user_id) {
        return Ok(());
    }

    let holds_role: bool = diesel::select(exists(
        case_participants::table
            .filter(case_participants::case_id.eq(case.id))
            .filter(case_participants::user_id.eq(user_id))
            .filter(case_participants::role.eq(ParticipantRole::Mediator))
            .filter(
                case_participants::status
                    .is_null()
                    .or(case_participants::status.eq(ParticipantStatus::Active)),
            ),
    ))
    .get_result(conn)?;

    if holds_role {
        Ok(())
    } else {
        Err(AppError::forbidden("mediator access to this case required"))
    }
}

fn load_case(conn: &mut PgConnection, case_id: Uuid) -> AppResult<Case> {
    cases::table
        .find(case_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "case not found"))
}

fn resolve_target_user(
    conn: &mut PgConnection,
    user_id: Option<Uuid>,
    email: Option<&str>,
) -> AppResult<User> {
    let email = email.map(str::trim).filter(|value| !value.is_empty());

    let by_id = match user_id {
        Some(id) => Some(
            users::table
                .find(id)
                .first::<User>(conn)
                .optional()?
                .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "user not found"))?,
        ),
        None => None,
    };

    let by_email = match email {
        Some(value) => Some(
            users::table
                .filter(users::email.eq(value))
                .first::<User>(conn)
                .optional()?
                .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "user not found"))?,
        ),
        None => None,
    };

    match (by_id, by_email) {
        (Some(a), Some(b)) if a.id != b.id => Err(AppError::bad_request(
            "user_id and email refer to different users",
        )),
        (Some(a), _) => Ok(a),
        (None, Some(b)) => Ok(b),
        (None, None) => Err(AppError::bad_request("user_id or email is required")),
    }
}

fn participant_to_response(row: CaseParticipant) -> ParticipantResponse {
    ParticipantResponse {
        case_id: row.case_id,
        user_id: row.user_id,
        role: row.role,
        status: row.status,
        created_at: to_iso(row.created_at),
        updated_at: to_iso(row.updated_at),
    }
}

async fn dispatch(state: &AppState, user_ids: &[Uuid], message: String, kind: NotificationKind) {
    if let Err(err) = state.notifier.notify(user_ids, &message, kind).await {
        tracing::warn!(error = %err, "notification dispatch failed");
    }
}
