use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use caseflow::auth::jwt::JwtService;
use caseflow::config::AppConfig;
use caseflow::db::{self, PgPool};
use caseflow::models::{
    CaseStatus, NewCase, NewCaseParticipant, NewOrganization, NewUser, Notification,
    NotificationKind, ParticipantRole, ParticipantStatus, UserRole,
};
use caseflow::notifications::{Notifier, NotifyResult};
use caseflow::routes;
use caseflow::state::AppState;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct RecordedNotification {
    pub user_ids: Vec<Uuid>,
    pub message: String,
    pub kind: NotificationKind,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<RecordedNotification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user_ids: &[Uuid],
        message: &str,
        kind: NotificationKind,
    ) -> NotifyResult<()> {
        let mut guard = self.sent.lock().await;
        guard.push(RecordedNotification {
            user_ids: user_ids.to_vec(),
            message: message.to_string(),
            kind,
        });
        Ok(())
    }
}

impl RecordingNotifier {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<RecordedNotification> {
        let guard = self.sent.lock().await;
        guard.clone()
    }

    #[allow(dead_code)]
    pub async fn sent_count(&self) -> usize {
        let guard = self.sent.lock().await;
        guard.len()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            default_mediator_case_cap: 2,
            cors_allowed_origin: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let notifier = Arc::new(RecordingNotifier::default());
        let notifier_for_state: Arc<dyn Notifier> = notifier.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, notifier_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            notifier,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn notifier(&self) -> Arc<RecordingNotifier> {
        self.notifier.clone()
    }

    pub fn token_for(&self, user_id: Uuid, email: &str, role: UserRole) -> Result<String> {
        self.state.jwt.generate_token(user_id, email, role)
    }

    pub async fn insert_organization(&self, name: &str, max_active_cases: i32) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let organization = NewOrganization {
                id: Uuid::new_v4(),
                name,
                max_active_cases,
            };
            diesel::insert_into(caseflow::schema::organizations::table)
                .values(&organization)
                .execute(conn)
                .context("failed to insert organization")?;
            Ok(organization.id)
        })
        .await
    }

    pub async fn insert_user(
        &self,
        email: &str,
        full_name: &str,
        role: UserRole,
        organization_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let email = email.to_string();
        let full_name = full_name.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                email,
                full_name,
                role,
                organization_id,
            };
            diesel::insert_into(caseflow::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn insert_case(
        &self,
        organization_id: Uuid,
        title: &str,
        status: CaseStatus,
    ) -> Result<Uuid> {
        let title = title.to_string();
        self.with_conn(move |conn| {
            let case = NewCase {
                id: Uuid::new_v4(),
                organization_id,
                title,
                status,
                created_by: None,
            };
            diesel::insert_into(caseflow::schema::cases::table)
                .values(&case)
                .execute(conn)
                .context("failed to insert case")?;
            Ok(case.id)
        })
        .await
    }

    pub async fn insert_participant(
        &self,
        case_id: Uuid,
        user_id: Uuid,
        role: ParticipantRole,
        status: Option<ParticipantStatus>,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            let participant = NewCaseParticipant {
                case_id,
                user_id,
                role,
                status,
                invited_by: None,
            };
            diesel::insert_into(caseflow::schema::case_participants::table)
                .values(&participant)
                .execute(conn)
                .context("failed to insert participant")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn notifications_for(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(move |conn| {
            use caseflow::schema::notifications::dsl;
            let rows = dsl::notifications
                .filter(dsl::user_id.eq(user_id))
                .load::<Notification>(conn)
                .context("failed to load notifications")?;
            Ok(rows)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn assert_error_body(body: Body, expected_fragment: &str) -> Result<()> {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: String,
    }
    let bytes = body_to_vec(body).await?;
    let parsed: ErrorBody = serde_json::from_slice(&bytes)?;
    anyhow::ensure!(
        parsed.error.contains(expected_fragment),
        "expected error containing {expected_fragment:?}, got {:?}",
        parsed.error
    );
    Ok(())
}

#[allow(dead_code)]
pub async fn expect_status(
    response: hyper::Response<Body>,
    expected: StatusCode,
) -> Result<Vec<u8>> {
    let status = response.status();
    let bytes = body_to_vec(response.into_body()).await?;
    anyhow::ensure!(
        status == expected,
        "expected {expected}, got {status}: {}",
        String::from_utf8_lossy(&bytes)
    );
    Ok(bytes)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE notifications, case_assignments, case_participants, cases, users, organizations RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
