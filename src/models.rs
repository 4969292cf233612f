use chrono::NaiveDateTime;
use diesel::deserialize::FromSqlRow;
use diesel::expression::AsExpression;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

/// Closed string-backed enums stored as text columns. Values are converted
/// exactly once at the boundary; unknown strings are rejected, both when
/// deserializing requests and when reading rows.
macro_rules! text_enum {
    ($name:ident, $label:literal { $($variant:ident => $value:literal),+ $(,)? }) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression,
            FromSqlRow,
        )]
        #[diesel(sql_type = diesel::sql_types::Text)]
        pub enum $name {
            $(#[serde(rename = $value)] $variant,)+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $value,)+
                }
            }

            pub fn parse(value: &str) -> Result<Self, String> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unrecognized ", $label, ": {}"), other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl diesel::serialize::ToSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn to_sql<'b>(
                &'b self,
                out: &mut diesel::serialize::Output<'b, '_, diesel::pg::Pg>,
            ) -> diesel::serialize::Result {
                std::io::Write::write_all(out, self.as_str().as_bytes())?;
                Ok(diesel::serialize::IsNull::No)
            }
        }

        impl diesel::deserialize::FromSql<diesel::sql_types::Text, diesel::pg::Pg> for $name {
            fn from_sql(value: diesel::pg::PgValue<'_>) -> diesel::deserialize::Result<Self> {
                let raw = std::str::from_utf8(value.as_bytes())?;
                Self::parse(raw).map_err(Into::into)
            }
        }
    };
}

text_enum!(UserRole, "user role" {
    Admin => "admin",
    Mediator => "mediator",
    Divorcee => "divorcee",
});

text_enum!(ParticipantRole, "participant role" {
    Mediator => "mediator",
    Divorcee => "divorcee",
});

text_enum!(ParticipantStatus, "participant status" {
    Invited => "invited",
    Active => "active",
    Removed => "removed",
});

text_enum!(AssignmentStatus, "assignment status" {
    Active => "active",
    Reassigned => "reassigned",
    Unassigned => "unassigned",
});

text_enum!(CaseStatus, "case status" {
    Intake => "intake",
    Active => "active",
    Completed => "completed",
    Closed => "closed",
});

text_enum!(NotificationKind, "notification kind" {
    Info => "info",
    Upload => "upload",
    Participant => "participant",
    Note => "note",
});

text_enum!(NotificationStatus, "notification status" {
    Unread => "unread",
    Read => "read",
});

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = organizations)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub max_active_cases: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organizations)]
pub struct NewOrganization {
    pub id: Uuid,
    pub name: String,
    pub max_active_cases: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub organization_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: UserRole,
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = cases)]
pub struct Case {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub status: CaseStatus,
    pub mediator_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = cases)]
pub struct NewCase {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub status: CaseStatus,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = case_participants)]
#[diesel(belongs_to(Case))]
#[diesel(belongs_to(User))]
#[diesel(primary_key(case_id, user_id))]
pub struct CaseParticipant {
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub status: Option<ParticipantStatus>,
    pub invited_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = case_participants)]
pub struct NewCaseParticipant {
    pub case_id: Uuid,
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub status: Option<ParticipantStatus>,
    pub invited_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = case_assignments)]
#[diesel(belongs_to(Case))]
pub struct CaseAssignment {
    pub id: Uuid,
    pub case_id: Uuid,
    pub mediator_id: Uuid,
    pub organization_id: Uuid,
    pub assigned_by: Uuid,
    pub status: AssignmentStatus,
    pub notes: Option<String>,
    pub assigned_at: NaiveDateTime,
    pub unassigned_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = case_assignments)]
pub struct NewCaseAssignment {
    pub id: Uuid,
    pub case_id: Uuid,
    pub mediator_id: Uuid,
    pub organization_id: Uuid,
    pub assigned_by: Uuid,
    pub status: AssignmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = notifications)]
#[diesel(belongs_to(User))]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub kind: NotificationKind,
    pub status: NotificationStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub kind: NotificationKind,
    pub status: NotificationStatus,
}
