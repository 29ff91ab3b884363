//! Database layer — migrations and queries for events, registrations and
//! admin sessions.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::changes::{Change, ChangeFeed, ChangeKind};
use crate::errors::{AppError, Result};
use crate::models::{
    Event, EventDraft, EventRef, EventRow, JoinedRow, NewRegistration, RegistrantRecord,
    Registration,
};

pub const REGISTRATIONS: &str = "registrations";

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Every connection to `:memory:` opens a fresh database.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&format!("{url}{}", create_flag(&url)))
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// Make sure the file is created if it doesn't exist yet.
fn create_flag(url: &str) -> &'static str {
    if url.contains(":memory:") || url.contains("mode=") {
        ""
    } else if url.contains('?') {
        "&mode=rwc"
    } else {
        "?mode=rwc"
    }
}

fn map_slug_conflict(err: sqlx::Error, slug: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("slug '{slug}' is already in use"))
        }
        _ => AppError::Database(err),
    }
}

// ─────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────

const EVENT_COLUMNS: &str = "id, title, slug, category, description, date_time, location, \
                             speakers, moderator, is_published, created_at";

/// Insert a new event. Events created from the admin console are published
/// immediately.
pub async fn insert_event(pool: &SqlitePool, draft: &EventDraft) -> Result<Event> {
    let id = Uuid::new_v4().to_string();
    let speakers = serde_json::to_string(&draft.speakers)?;
    let moderator = draft
        .moderator
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO events
            (id, title, slug, category, description, date_time, location,
             speakers, moderator, is_published, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)
        "#,
    )
    .bind(&id)
    .bind(&draft.title)
    .bind(&draft.slug)
    .bind(&draft.category)
    .bind(&draft.description)
    .bind(draft.date_time)
    .bind(&draft.location)
    .bind(&speakers)
    .bind(&moderator)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| map_slug_conflict(e, &draft.slug))?;

    get_event(pool, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {id}")))
}

/// Overwrite the editable fields of an event; the publication flag is left
/// as it is.
pub async fn update_event(pool: &SqlitePool, id: &str, draft: &EventDraft) -> Result<Event> {
    let speakers = serde_json::to_string(&draft.speakers)?;
    let moderator = draft
        .moderator
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let rows_affected = sqlx::query(
        r#"
        UPDATE events
        SET    title = ?2, slug = ?3, category = ?4, description = ?5, date_time = ?6,
               location = ?7, speakers = ?8, moderator = ?9
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .bind(&draft.title)
    .bind(&draft.slug)
    .bind(&draft.category)
    .bind(&draft.description)
    .bind(draft.date_time)
    .bind(&draft.location)
    .bind(&speakers)
    .bind(&moderator)
    .execute(pool)
    .await
    .map_err(|e| map_slug_conflict(e, &draft.slug))?
    .rows_affected();

    if rows_affected == 0 {
        return Err(AppError::NotFound(format!("Event {id}")));
    }

    get_event(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {id}")))
}

pub async fn get_event(pool: &SqlitePool, id: &str) -> Result<Option<Event>> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(EventRow::decode).transpose()
}

/// Public lookup: drafts are invisible.
pub async fn get_published_event_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Event>> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE slug = ?1 AND is_published = 1"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    row.map(EventRow::decode).transpose()
}

/// Fetch all events, newest first.
pub async fn list_events(pool: &SqlitePool) -> Result<Vec<Event>> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events ORDER BY created_at DESC, rowid DESC"
    ))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(EventRow::decode).collect()
}

/// Id, title and slug of every event.
pub async fn list_event_refs(pool: &SqlitePool) -> Result<Vec<(String, EventRef)>> {
    let rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT id, title, slug FROM events")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(id, title, slug)| (id, EventRef { title, slug }))
        .collect())
}

/// Publication flag toggle; events are never hard-deleted.
pub async fn set_event_published(pool: &SqlitePool, id: &str, published: bool) -> Result<()> {
    let rows_affected = sqlx::query("UPDATE events SET is_published = ?2 WHERE id = ?1")
        .bind(id)
        .bind(published)
        .execute(pool)
        .await?
        .rows_affected();
    if rows_affected == 0 {
        return Err(AppError::NotFound(format!("Event {id}")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Registrations
// ─────────────────────────────────────────────────────────

const REGISTRATION_COLUMNS: &str = "r.id, r.event_id, r.name, r.email, r.phone, r.domicile, \
                                    r.current_status, r.major, r.institution, r.amount, r.prayer, \
                                    r.status, r.payment_reference, r.created_at";

/// Record a registration awaiting payment.
pub async fn insert_registration(
    pool: &SqlitePool,
    feed: &ChangeFeed,
    new: &NewRegistration,
) -> Result<Registration> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO registrations
            (id, event_id, name, email, phone, domicile, current_status, major,
             institution, amount, prayer, status, payment_reference, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending', ?12, ?13)
        "#,
    )
    .bind(&id)
    .bind(&new.event_id)
    .bind(&new.name)
    .bind(&new.email)
    .bind(&new.phone)
    .bind(&new.domicile)
    .bind(&new.current_status)
    .bind(&new.major)
    .bind(&new.institution)
    .bind(new.amount.to_string())
    .bind(&new.prayer)
    .bind(&new.payment_reference)
    .bind(created_at)
    .execute(pool)
    .await?;

    feed.publish(Change {
        table: REGISTRATIONS,
        kind: ChangeKind::Insert,
        record_id: id.clone(),
    });

    let row = sqlx::query_as::<_, Registration>(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM registrations r WHERE r.id = ?1"
    ))
    .bind(&id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Apply a payment-status callback. Returns the ids of the updated rows.
pub async fn update_registration_status(
    pool: &SqlitePool,
    feed: &ChangeFeed,
    payment_reference: &str,
    status: &str,
) -> Result<Vec<String>> {
    let ids: Vec<(String,)> = sqlx::query_as(
        "UPDATE registrations SET status = ?2 WHERE payment_reference = ?1 OR id = ?1 RETURNING id",
    )
    .bind(payment_reference)
    .bind(status)
    .fetch_all(pool)
    .await?;

    let ids: Vec<String> = ids.into_iter().map(|(id,)| id).collect();
    for id in &ids {
        feed.publish(Change {
            table: REGISTRATIONS,
            kind: ChangeKind::Update,
            record_id: id.clone(),
        });
    }
    Ok(ids)
}

/// Registrations joined with their event's title and slug, newest first.
pub async fn list_registrants_joined(
    pool: &SqlitePool,
    event_id: Option<&str>,
) -> Result<Vec<RegistrantRecord>> {
    let rows = sqlx::query_as::<_, JoinedRow>(&format!(
        r#"
        SELECT {REGISTRATION_COLUMNS}, e.title AS event_title, e.slug AS event_slug
        FROM   registrations r
        LEFT JOIN events e ON e.id = r.event_id
        WHERE  ?1 IS NULL OR r.event_id = ?1
        ORDER  BY r.created_at DESC, r.rowid DESC
        "#
    ))
    .bind(event_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(RegistrantRecord::from).collect())
}

/// Registrations without the join, newest first.
pub async fn list_registrations(
    pool: &SqlitePool,
    event_id: Option<&str>,
) -> Result<Vec<Registration>> {
    let rows = sqlx::query_as::<_, Registration>(&format!(
        r#"
        SELECT {REGISTRATION_COLUMNS}
        FROM   registrations r
        WHERE  ?1 IS NULL OR r.event_id = ?1
        ORDER  BY r.created_at DESC, r.rowid DESC
        "#
    ))
    .bind(event_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// The owning event of every registration row (for client-side counting).
pub async fn registration_event_ids(pool: &SqlitePool) -> Result<Vec<Option<String>>> {
    let rows: Vec<(Option<String>,)> = sqlx::query_as("SELECT event_id FROM registrations")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// ─────────────────────────────────────────────────────────
// Admin users and sessions
// ─────────────────────────────────────────────────────────

pub async fn upsert_admin(pool: &SqlitePool, email: &str, salt: &str, hash: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO admin_users (email, password_salt, password_hash)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (email) DO UPDATE SET password_salt = ?2, password_hash = ?3
        "#,
    )
    .bind(email)
    .bind(salt)
    .bind(hash)
    .execute(pool)
    .await?;
    Ok(())
}

/// `(salt, hash)` of an admin account.
pub async fn get_admin_credentials(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<(String, String)>> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT password_salt, password_hash FROM admin_users WHERE email = ?1")
            .bind(email)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

pub async fn insert_session(
    pool: &SqlitePool,
    token: &str,
    email: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO admin_sessions (token, email, expires_at) VALUES (?1, ?2, ?3)")
        .bind(token)
        .bind(email)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// `(email, expires_at)` of a session token.
pub async fn get_session(
    pool: &SqlitePool,
    token: &str,
) -> Result<Option<(String, DateTime<Utc>)>> {
    let row: Option<(String, DateTime<Utc>)> =
        sqlx::query_as("SELECT email, expires_at FROM admin_sessions WHERE token = ?1")
            .bind(token)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

pub async fn delete_session(pool: &SqlitePool, token: &str) -> Result<bool> {
    let rows_affected = sqlx::query("DELETE FROM admin_sessions WHERE token = ?1")
        .bind(token)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows_affected > 0)
}

pub async fn delete_expired_sessions(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let rows_affected = sqlx::query("DELETE FROM admin_sessions WHERE expires_at <= ?1")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows_affected)
}
