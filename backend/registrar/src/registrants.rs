//! Registrant list: status buckets, search and filtering, totals, CSV export
//! and the live-refreshing feed behind the admin view.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::changes::{Change, ChangeFeed};
use crate::db;
use crate::errors::Result;
use crate::models::{EventRef, RegistrantRecord, Registration};

pub const CSV_HEADER: &str = "Date,Name,Email,Phone,Event,Amount,Status,Role,Institution,Message";

const SNAPSHOT_BUFFER: usize = 4;

// ─────────────────────────────────────────────────────────
// Status buckets
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBucket {
    Success,
    Pending,
    Failure,
}

impl StatusBucket {
    /// Map a raw payment status onto its bucket. Unknown and missing values
    /// are pending.
    pub fn classify(status: Option<&str>) -> Self {
        match status.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("paid" | "settlement" | "success") => Self::Success,
            Some("failed" | "expired") => Self::Failure,
            _ => Self::Pending,
        }
    }
}

/// CSS classes for the status badge of a raw status value.
pub fn badge_class(status: Option<&str>) -> &'static str {
    match status.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("paid" | "settlement" | "success") => "bg-green-100 text-green-800",
        Some("pending") => "bg-yellow-100 text-yellow-800",
        Some("failed" | "expired") => "bg-red-100 text-red-800",
        _ => "bg-gray-100 text-gray-800",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Success,
    Pending,
    Failed,
}

impl StatusFilter {
    pub const OPTIONS: [(StatusFilter, &'static str); 4] = [
        (StatusFilter::All, "All Status"),
        (StatusFilter::Success, "Success"),
        (StatusFilter::Pending, "Pending"),
        (StatusFilter::Failed, "Failed"),
    ];

    /// Unrecognised values show everything.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("success") => Self::Success,
            Some("pending") => Self::Pending,
            Some("failed") => Self::Failed,
            _ => Self::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Success => "success",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }

    pub fn admits(&self, bucket: StatusBucket) -> bool {
        match self {
            Self::All => true,
            Self::Success => bucket == StatusBucket::Success,
            Self::Pending => bucket == StatusBucket::Pending,
            Self::Failed => bucket == StatusBucket::Failure,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Query, totals and export
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrantQuery {
    pub event_id: Option<String>,
    pub search: String,
    pub status: StatusFilter,
}

impl RegistrantQuery {
    fn matches_search(&self, record: &RegistrantRecord) -> bool {
        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let registration = &record.registration;
        registration.name.to_lowercase().contains(&needle)
            || registration.email.to_lowercase().contains(&needle)
            || record
                .event
                .as_ref()
                .is_some_and(|e| e.title.to_lowercase().contains(&needle))
    }

    /// Search first, then the status bucket filter.
    pub fn apply(&self, records: Vec<RegistrantRecord>) -> Vec<RegistrantRecord> {
        records
            .into_iter()
            .filter(|r| self.matches_search(r))
            .filter(|r| {
                self.status
                    .admits(StatusBucket::classify(r.registration.status.as_deref()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub total_amount: i64,
    pub success_amount: i64,
}

impl Totals {
    pub fn of(records: &[RegistrantRecord]) -> Self {
        records.iter().fold(Self::default(), |mut totals, record| {
            let amount = record.registration.amount_value();
            totals.total_amount = totals.total_amount.saturating_add(amount);
            if StatusBucket::classify(record.registration.status.as_deref()) == StatusBucket::Success {
                totals.success_amount = totals.success_amount.saturating_add(amount);
            }
            totals
        })
    }
}

fn quoted(value: Option<&str>) -> String {
    format!("\"{}\"", value.unwrap_or_default().replace('"', "\"\""))
}

/// Numeric-looking fields go out bare unless they would break the row.
fn bare(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        quoted(Some(value))
    } else {
        value.to_string()
    }
}

fn local_timestamp(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Render rows as CSV, newline-separated with a header line.
pub fn to_csv(records: &[RegistrantRecord], offset: FixedOffset) -> String {
    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(CSV_HEADER.to_string());

    for record in records {
        let r = &record.registration;
        let fields = [
            quoted(Some(local_timestamp(r.created_at, offset).as_str())),
            quoted(Some(r.name.as_str())),
            quoted(Some(r.email.as_str())),
            quoted(Some(r.phone.as_str())),
            quoted(record.event.as_ref().map(|e| e.title.as_str())),
            bare(&r.amount),
            bare(r.status.as_deref().unwrap_or_default()),
            quoted(r.current_status.as_deref()),
            quoted(r.institution.as_deref()),
            quoted(r.prayer.as_deref()),
        ];
        lines.push(fields.join(","));
    }
    lines.join("\n")
}

pub fn export_file_name(date: NaiveDate) -> String {
    format!("registrants_export_{}.csv", date.format("%Y-%m-%d"))
}

// ─────────────────────────────────────────────────────────
// Fetching
// ─────────────────────────────────────────────────────────

/// Attach event title and slug to plain registration rows.
pub fn join_in_memory(
    registrations: Vec<Registration>,
    events: &HashMap<String, EventRef>,
) -> Vec<RegistrantRecord> {
    registrations
        .into_iter()
        .map(|registration| RegistrantRecord {
            event: registration
                .event_id
                .as_ref()
                .and_then(|id| events.get(id))
                .cloned(),
            registration,
        })
        .collect()
}

/// Registrations with their event, newest first. Falls back to two plain
/// queries joined here when the joined query fails.
pub async fn fetch_registrants(
    pool: &SqlitePool,
    event_id: Option<&str>,
) -> Result<Vec<RegistrantRecord>> {
    fetch_or_fall_back(pool, event_id, db::list_registrants_joined(pool, event_id)).await
}

async fn fetch_or_fall_back(
    pool: &SqlitePool,
    event_id: Option<&str>,
    joined: impl Future<Output = Result<Vec<RegistrantRecord>>>,
) -> Result<Vec<RegistrantRecord>> {
    match joined.await {
        Ok(rows) => Ok(rows),
        Err(e) => {
            warn!("Joined registrant query failed, falling back to separate queries: {e}");
            let registrations = db::list_registrations(pool, event_id).await?;
            let events: HashMap<String, EventRef> =
                db::list_event_refs(pool).await?.into_iter().collect();
            Ok(join_in_memory(registrations, &events))
        }
    }
}

// ─────────────────────────────────────────────────────────
// View
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrantRow {
    pub id: String,
    pub date: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub event: String,
    pub amount: String,
    pub status: String,
    pub badge: &'static str,
    pub role: String,
    pub institution: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOption {
    pub id: &'static str,
    pub label: &'static str,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrantView {
    pub heading: String,
    pub event_id: Option<String>,
    pub search: String,
    pub status_options: Vec<FilterOption>,
    pub rows: Vec<RegistrantRow>,
    pub totals: Totals,
    pub export_url: String,
}

fn or_dash(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "-".to_string(),
    }
}

impl RegistrantView {
    pub fn build(
        records: Vec<RegistrantRecord>,
        query: &RegistrantQuery,
        filter_title: Option<&str>,
        offset: FixedOffset,
    ) -> Self {
        let filtered = query.apply(records);
        let totals = Totals::of(&filtered);

        let rows = filtered
            .iter()
            .map(|record| {
                let r = &record.registration;
                RegistrantRow {
                    id: r.id.clone(),
                    date: local_timestamp(r.created_at, offset),
                    name: r.name.clone(),
                    email: r.email.clone(),
                    phone: r.phone.clone(),
                    event: or_dash(record.event.as_ref().map(|e| e.title.as_str())),
                    amount: r.amount.clone(),
                    status: r.status.clone().unwrap_or_else(|| "Pending".to_string()),
                    badge: badge_class(r.status.as_deref()),
                    role: or_dash(r.current_status.as_deref()),
                    institution: or_dash(r.institution.as_deref()),
                    message: or_dash(r.prayer.as_deref()),
                }
            })
            .collect();

        let mut export_params = url::form_urlencoded::Serializer::new(String::new());
        if let Some(id) = &query.event_id {
            export_params.append_pair("eventId", id);
        }
        if !query.search.is_empty() {
            export_params.append_pair("q", &query.search);
        }
        export_params.append_pair("status", query.status.as_str());

        Self {
            heading: match filter_title {
                Some(title) => format!("Registrants for: {title}"),
                None => "All Registrants".to_string(),
            },
            event_id: query.event_id.clone(),
            search: query.search.clone(),
            status_options: StatusFilter::OPTIONS
                .iter()
                .map(|(filter, label)| FilterOption {
                    id: filter.as_str(),
                    label: *label,
                    selected: *filter == query.status,
                })
                .collect(),
            rows,
            totals,
            export_url: format!("/admin/registrants/export?{}", export_params.finish()),
        }
    }
}

/// Title of the event the list is filtered by, if any.
pub async fn filter_title(pool: &SqlitePool, event_id: Option<&str>) -> Result<Option<String>> {
    let Some(id) = event_id else {
        return Ok(None);
    };
    Ok(db::get_event(pool, id).await?.map(|event| event.title))
}

pub async fn load_view(
    pool: &SqlitePool,
    query: &RegistrantQuery,
    offset: FixedOffset,
) -> Result<RegistrantView> {
    let records = fetch_registrants(pool, query.event_id.as_deref()).await?;
    let title = filter_title(pool, query.event_id.as_deref()).await?;
    Ok(RegistrantView::build(records, query, title.as_deref(), offset))
}

// ─────────────────────────────────────────────────────────
// Live feed
// ─────────────────────────────────────────────────────────

/// Re-fetches the registrant list whenever the registrations collection
/// changes, coalescing bursts of changes within the debounce window.
#[derive(Debug, Clone)]
pub struct RegistrantFeed {
    pool: SqlitePool,
    changes: ChangeFeed,
    debounce: Duration,
}

/// A live subscription. Dropping it stops the refresh task and releases its
/// change-channel receiver.
#[derive(Debug)]
pub struct Subscription {
    snapshots: mpsc::Receiver<Vec<RegistrantRecord>>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Next snapshot; the first one is the list at subscription time.
    pub async fn next(&mut self) -> Option<Vec<RegistrantRecord>> {
        self.snapshots.recv().await
    }

    /// Stop the refresh task and wait until it has released the channel.
    #[cfg(test)]
    pub async fn unsubscribe(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Wake {
    Changed,
    Closed,
}

async fn wait_for_change(rx: &mut broadcast::Receiver<Change>) -> Wake {
    loop {
        match rx.recv().await {
            Ok(change) if change.table != db::REGISTRATIONS => continue,
            Ok(_) => return Wake::Changed,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Registrant feed lagged by {skipped} changes");
                return Wake::Changed;
            }
            Err(broadcast::error::RecvError::Closed) => return Wake::Closed,
        }
    }
}

impl RegistrantFeed {
    pub fn new(pool: SqlitePool, changes: ChangeFeed, debounce: Duration) -> Self {
        Self {
            pool,
            changes,
            debounce,
        }
    }

    pub fn subscribe(&self, event_id: Option<String>) -> Subscription {
        let (tx, snapshots) = mpsc::channel(SNAPSHOT_BUFFER);
        // Subscribe before spawning so no change between now and the first
        // fetch is missed.
        let mut rx = self.changes.subscribe();
        let pool = self.pool.clone();
        let debounce = self.debounce;

        let task = tokio::spawn(async move {
            let mut closed = false;
            loop {
                match fetch_registrants(&pool, event_id.as_deref()).await {
                    Ok(rows) => {
                        if tx.send(rows).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Registrant refresh failed: {e}"),
                }
                if closed {
                    break;
                }

                if let Wake::Closed = wait_for_change(&mut rx).await {
                    break;
                }
                // Quiet period: keep absorbing changes until none arrive
                // for a full window.
                loop {
                    match tokio::time::timeout(debounce, wait_for_change(&mut rx)).await {
                        Err(_) => break,
                        Ok(Wake::Changed) => continue,
                        Ok(Wake::Closed) => {
                            closed = true;
                            break;
                        }
                    }
                }
            }
            debug!("Registrant feed task finished");
        });

        Subscription { snapshots, task }
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::db::test_support::{draft, memory_pool, registration};

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn record(name: &str, amount: &str, status: Option<&str>, event: Option<&str>) -> RegistrantRecord {
        RegistrantRecord {
            registration: Registration {
                id: format!("id-{name}"),
                event_id: event.map(|_| "ev-1".to_string()),
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                phone: "0812".to_string(),
                domicile: None,
                current_status: Some("student".to_string()),
                major: None,
                institution: None,
                amount: amount.to_string(),
                prayer: None,
                status: status.map(String::from),
                payment_reference: None,
                created_at: "2026-03-01T03:04:05Z".parse().unwrap(),
            },
            event: event.map(|title| EventRef {
                title: title.to_string(),
                slug: "slug".to_string(),
            }),
        }
    }

    #[test]
    fn buckets() {
        for status in ["paid", "SETTLEMENT", "Success"] {
            assert_eq!(StatusBucket::classify(Some(status)), StatusBucket::Success);
        }
        for status in ["failed", "Expired"] {
            assert_eq!(StatusBucket::classify(Some(status)), StatusBucket::Failure);
        }
        for status in [Some("pending"), Some("refunded"), Some(""), None] {
            assert_eq!(StatusBucket::classify(status), StatusBucket::Pending);
        }
    }

    #[test]
    fn badges() {
        assert_eq!(badge_class(Some("paid")), "bg-green-100 text-green-800");
        assert_eq!(badge_class(Some("pending")), "bg-yellow-100 text-yellow-800");
        assert_eq!(badge_class(Some("expired")), "bg-red-100 text-red-800");
        assert_eq!(badge_class(None), "bg-gray-100 text-gray-800");
    }

    #[test]
    fn search_then_filter() {
        let rows = vec![
            record("Ana", "1000", Some("paid"), Some("Cloud Day")),
            record("Budi", "2000", None, Some("Rust Meetup")),
            record("Citra", "3000", Some("expired"), Some("Cloud Day")),
        ];

        let query = RegistrantQuery {
            search: "cloud".to_string(),
            ..Default::default()
        };
        let names: Vec<_> = query
            .apply(rows.clone())
            .into_iter()
            .map(|r| r.registration.name)
            .collect();
        assert_eq!(names, ["Ana", "Citra"]);

        let query = RegistrantQuery {
            search: "CLOUD".to_string(),
            status: StatusFilter::Failed,
            ..Default::default()
        };
        assert_eq!(query.apply(rows.clone()).len(), 1);

        let query = RegistrantQuery {
            search: "budi@".to_string(),
            status: StatusFilter::Pending,
            ..Default::default()
        };
        assert_eq!(query.apply(rows).len(), 1);
    }

    #[test]
    fn totals_ignore_unparseable_amounts() {
        let rows = vec![
            record("A", "1000", Some("settlement"), None),
            record("B", "2000", Some("pending"), None),
            record("C", "abc", Some("paid"), None),
        ];
        let totals = Totals::of(&rows);
        assert_eq!(totals.total_amount, 3000);
        assert_eq!(totals.success_amount, 1000);
    }

    #[test]
    fn totals_saturate_on_huge_amounts() {
        let rows = vec![
            record("A", "9223372036854775807", Some("paid"), None),
            record("B", "1000", Some("paid"), None),
        ];
        let totals = Totals::of(&rows);
        assert_eq!(totals.total_amount, i64::MAX);
        assert_eq!(totals.success_amount, i64::MAX);
    }

    #[test]
    fn csv_escapes_quotes() {
        let mut row = record("O\"Brien", "1500", Some("paid"), Some("Cloud \"Day\""));
        row.registration.prayer = Some("hi, there".to_string());
        let csv = to_csv(&[row], offset());
        let mut lines = csv.lines();

        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(
            lines.next(),
            Some(
                "\"2026-03-01 10:04:05\",\"O\"\"Brien\",\"o\"\"brien@example.com\",\"0812\",\
                 \"Cloud \"\"Day\"\"\",1500,paid,\"student\",\"\",\"hi, there\""
            )
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn csv_quotes_bare_fields_with_separators() {
        let row = record("Ana", "1,000", Some("paid,\"late\""), None);
        let csv = to_csv(&[row], offset());
        let line = csv.lines().nth(1).unwrap();
        assert!(line.contains(",\"1,000\",\"paid,\"\"late\"\"\","));
        assert_eq!(
            line.strip_suffix(",\"student\",\"\",\"\""),
            Some("\"2026-03-01 10:04:05\",\"Ana\",\"ana@example.com\",\"0812\",\"\",\"1,000\",\"paid,\"\"late\"\"\"")
        );
    }

    #[test]
    fn file_name_uses_iso_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(export_file_name(date), "registrants_export_2026-10-19.csv");
    }

    #[test]
    fn in_memory_join() {
        let mut events = HashMap::new();
        events.insert(
            "ev-1".to_string(),
            EventRef {
                title: "Cloud Day".to_string(),
                slug: "cloud-day".to_string(),
            },
        );
        let mut orphan = record("B", "1", None, None).registration;
        orphan.event_id = Some("gone".to_string());
        let joined = join_in_memory(
            vec![record("A", "1", None, Some("x")).registration, orphan],
            &events,
        );
        assert_eq!(joined[0].event.as_ref().unwrap().title, "Cloud Day");
        assert!(joined[1].event.is_none());
    }

    #[test]
    fn view_rows_and_heading() {
        let query = RegistrantQuery {
            event_id: Some("ev-1".to_string()),
            status: StatusFilter::Success,
            ..Default::default()
        };
        let view = RegistrantView::build(
            vec![
                record("A", "1000", Some("paid"), Some("Cloud Day")),
                record("B", "500", None, Some("Cloud Day")),
            ],
            &query,
            Some("Cloud Day"),
            offset(),
        );
        assert_eq!(view.heading, "Registrants for: Cloud Day");
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].institution, "-");
        assert_eq!(view.totals.success_amount, 1000);
        assert_eq!(view.export_url, "/admin/registrants/export?eventId=ev-1&status=success");
        assert!(view.status_options.iter().any(|o| o.id == "success" && o.selected));
    }

    #[tokio::test]
    async fn fetch_joins_event_titles() {
        let pool = memory_pool().await;
        let feed = ChangeFeed::new();
        let event = db::insert_event(&pool, &draft("cloud-day")).await.unwrap();
        db::insert_registration(&pool, &feed, &registration(Some(event.id.as_str()), "Ana", 1000))
            .await
            .unwrap();
        db::insert_registration(&pool, &feed, &registration(None, "Budi", 2000))
            .await
            .unwrap();

        let all = fetch_registrants(&pool, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].registration.name, "Budi");
        assert_eq!(all[1].event.as_ref().unwrap().slug, "cloud-day");

        let filtered = fetch_registrants(&pool, Some(event.id.as_str())).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(
            filter_title(&pool, Some(event.id.as_str())).await.unwrap().as_deref(),
            Some("Event cloud-day")
        );
    }

    #[tokio::test]
    async fn failed_join_falls_back_to_plain_queries() {
        let pool = memory_pool().await;
        let feed = ChangeFeed::new();
        let cloud = db::insert_event(&pool, &draft("cloud-day")).await.unwrap();
        let other = db::insert_event(&pool, &draft("rust-day")).await.unwrap();
        for (event, name) in [(&cloud, "Ana"), (&other, "Budi"), (&cloud, "Citra")] {
            db::insert_registration(&pool, &feed, &registration(Some(event.id.as_str()), name, 1000))
                .await
                .unwrap();
        }
        let broken_join = || async { Err(AppError::BadRequest("join unavailable".to_string())) };

        let all = fetch_or_fall_back(&pool, None, broken_join()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|r| r.registration.name.as_str()).collect();
        assert_eq!(names, vec!["Citra", "Budi", "Ana"]);
        assert_eq!(all[1].event.as_ref().unwrap().slug, "rust-day");

        let filtered = fetch_or_fall_back(&pool, Some(cloud.id.as_str()), broken_join())
            .await
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|r| {
            r.registration.event_id.as_deref() == Some(cloud.id.as_str())
                && r.event.as_ref().map(|e| e.title.as_str()) == Some("Event cloud-day")
        }));
    }

    #[tokio::test]
    async fn feed_refreshes_after_changes() {
        let pool = memory_pool().await;
        let changes = ChangeFeed::new();
        let feed = RegistrantFeed::new(pool.clone(), changes.clone(), Duration::from_millis(20));
        let mut subscription = feed.subscribe(None);

        let initial = subscription.next().await.unwrap();
        assert!(initial.is_empty());

        for name in ["A", "B", "C"] {
            db::insert_registration(&pool, &changes, &registration(None, name, 1000))
                .await
                .unwrap();
        }

        let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let rows = subscription.next().await.unwrap();
                if rows.len() == 3 {
                    return rows;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(refreshed[0].registration.name, "C");

        db::update_registration_status(&pool, &changes, "pay-A", "settlement")
            .await
            .unwrap();
        // An earlier burst may still have a snapshot queued.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let rows = subscription.next().await.unwrap();
                let a = rows.iter().find(|r| r.registration.name == "A").unwrap();
                if a.registration.status.as_deref() == Some("settlement") {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_channel() {
        let pool = memory_pool().await;
        let changes = ChangeFeed::new();
        let feed = RegistrantFeed::new(pool, changes.clone(), Duration::from_millis(20));

        let subscription = feed.subscribe(None);
        assert_eq!(changes.subscriber_count(), 1);
        subscription.unsubscribe().await;
        assert_eq!(changes.subscriber_count(), 0);
    }
}
