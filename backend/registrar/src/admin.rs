//! Admin event management: create, edit and list events.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{Event, EventDraft, Person};
use crate::storage::{ImageStore, ImageUpload};
use crate::validation::FieldErrors;

/// Format of the editable local date-time field.
const LOCAL_INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonInput {
    pub name: String,
    pub title: String,
    pub photo_url: Option<String>,
}

/// The create / edit form as submitted by the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventForm {
    pub title: String,
    pub slug: String,
    pub category: String,
    pub description: String,
    /// Local wall-clock time, `YYYY-MM-DDTHH:MM`.
    pub date_time: String,
    pub location: String,
    pub speakers: Vec<PersonInput>,
    pub moderator: PersonInput,
}

impl Default for EventForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            slug: String::new(),
            category: String::new(),
            description: String::new(),
            date_time: String::new(),
            location: String::new(),
            speakers: vec![PersonInput::default()],
            moderator: PersonInput::default(),
        }
    }
}

/// Images attached to a form, keyed by speaker position.
#[derive(Debug, Clone, Default)]
pub struct Attachments {
    pub speakers: HashMap<usize, ImageUpload>,
    pub moderator: Option<ImageUpload>,
}

impl Attachments {
    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty() && self.moderator.is_none()
    }
}

/// An event loaded back into the edit form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditableEvent {
    pub id: String,
    pub is_published: bool,
    pub form: EventForm,
}

/// One row of the admin event list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub category: Option<String>,
    pub date: String,
    pub is_published: bool,
    pub status: &'static str,
    pub registrant_count: usize,
    pub registrants_url: String,
    pub public_url: String,
    pub edit_url: String,
}

fn slug_pattern() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$")
            .unwrap_or_else(|e| panic!("slug pattern must compile: {e}"))
    })
}

pub fn parse_local_datetime(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, LOCAL_INPUT_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

pub fn to_local_input(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format(LOCAL_INPUT_FORMAT).to_string()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn validate_event_form(
    form: &EventForm,
    attachments: &Attachments,
    offset: FixedOffset,
) -> std::result::Result<DateTime<Utc>, FieldErrors> {
    let mut errors = FieldErrors::new();

    if form.title.trim().is_empty() {
        errors.add("title", "Title is required");
    }
    if form.slug.is_empty() {
        errors.add("slug", "Slug is required");
    } else if !slug_pattern().is_match(&form.slug) {
        errors.add(
            "slug",
            "Slug may only contain lowercase letters, digits and single dashes",
        );
    }

    let at = parse_local_datetime(form.date_time.trim(), offset);
    if at.is_none() {
        errors.add("date_time", "Date and time are required (YYYY-MM-DDTHH:MM)");
    }

    if form.speakers.is_empty() {
        errors.add("speakers", "At least one speaker is required");
    } else if form.speakers.iter().any(|s| s.name.trim().is_empty()) {
        errors.add("speakers", "Every speaker needs a name");
    }
    if let Some(index) = attachments.speakers.keys().find(|i| **i >= form.speakers.len()) {
        errors.add("speakers", format!("Photo attached to unknown speaker #{}", index + 1));
    }

    if form.moderator.name.trim().is_empty()
        && (attachments.moderator.is_some() || form.moderator.photo_url.is_some())
    {
        errors.add("moderator", "Moderator needs a name");
    }

    match (errors.is_empty(), at) {
        (true, Some(at)) => Ok(at),
        _ => Err(errors),
    }
}

fn person_from_input(input: &PersonInput, photo_url: Option<String>) -> Person {
    Person {
        name: input.name.trim().to_string(),
        title: non_empty(&input.title),
        photo_url: photo_url.or_else(|| input.photo_url.clone()),
    }
}

/// Upload every attached image concurrently and merge the resulting URLs
/// into the speakers and moderator. If any upload fails the whole batch
/// fails; objects already written are left in the bucket.
async fn resolve_people(
    store: &ImageStore,
    form: &EventForm,
    attachments: &Attachments,
) -> Result<(Vec<Person>, Option<Person>)> {
    let mut targets: Vec<Option<usize>> = Vec::new();
    let mut uploads = Vec::new();
    for (index, image) in &attachments.speakers {
        targets.push(Some(*index));
        uploads.push(store.upload(image));
    }
    if let Some(image) = &attachments.moderator {
        targets.push(None);
        uploads.push(store.upload(image));
    }

    let results = join_all(uploads).await;

    let mut speaker_urls: HashMap<usize, String> = HashMap::new();
    let mut moderator_url = None;
    let mut first_error = None;
    let mut stored = Vec::new();
    for (target, result) in targets.into_iter().zip(results) {
        match result {
            Ok(url) => {
                stored.push(url.clone());
                match target {
                    Some(index) => {
                        speaker_urls.insert(index, url);
                    }
                    None => moderator_url = Some(url),
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        if !stored.is_empty() {
            warn!("Image batch failed; left behind: {}", stored.join(", "));
        }
        return Err(e);
    }

    let speakers = form
        .speakers
        .iter()
        .enumerate()
        .map(|(index, input)| person_from_input(input, speaker_urls.remove(&index)))
        .collect();
    let moderator = non_empty(&form.moderator.name)
        .map(|_| person_from_input(&form.moderator, moderator_url));

    Ok((speakers, moderator))
}

async fn build_draft(
    store: &ImageStore,
    form: &EventForm,
    attachments: &Attachments,
    offset: FixedOffset,
) -> Result<EventDraft> {
    let date_time = validate_event_form(form, attachments, offset).map_err(AppError::Validation)?;
    let (speakers, moderator) = resolve_people(store, form, attachments).await?;

    Ok(EventDraft {
        title: form.title.trim().to_string(),
        slug: form.slug.clone(),
        category: non_empty(&form.category),
        description: non_empty(&form.description),
        date_time,
        location: non_empty(&form.location),
        speakers,
        moderator,
    })
}

/// Upload attachments, then insert a published event.
pub async fn create_event(
    pool: &SqlitePool,
    store: &ImageStore,
    form: &EventForm,
    attachments: &Attachments,
    offset: FixedOffset,
) -> Result<Event> {
    let draft = build_draft(store, form, attachments, offset).await?;
    let event = db::insert_event(pool, &draft).await.map_err(|e| {
        if !attachments.is_empty() {
            warn!("Event insert failed after uploads for slug {}", draft.slug);
        }
        e
    })?;
    info!("Created event {} ({})", event.slug, event.id);
    Ok(event)
}

pub async fn load_for_edit(pool: &SqlitePool, id: &str, offset: FixedOffset) -> Result<EditableEvent> {
    let event = db::get_event(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {id}")))?;

    let to_input = |person: &Person| PersonInput {
        name: person.name.clone(),
        title: person.title.clone().unwrap_or_default(),
        photo_url: person.photo_url.clone(),
    };

    let mut speakers: Vec<PersonInput> = event.speakers.iter().map(to_input).collect();
    if speakers.is_empty() {
        speakers.push(PersonInput::default());
    }

    Ok(EditableEvent {
        id: event.id.clone(),
        is_published: event.is_published,
        form: EventForm {
            title: event.title.clone(),
            slug: event.slug.clone(),
            category: event.category.clone().unwrap_or_default(),
            description: event.description.clone().unwrap_or_default(),
            date_time: to_local_input(event.date_time, offset),
            location: event.location.clone().unwrap_or_default(),
            speakers,
            moderator: event.moderator.as_ref().map(to_input).unwrap_or_default(),
        },
    })
}

/// Upload attachments, then overwrite the event; the publication flag is
/// not touched.
pub async fn update_event(
    pool: &SqlitePool,
    store: &ImageStore,
    id: &str,
    form: &EventForm,
    attachments: &Attachments,
    offset: FixedOffset,
) -> Result<Event> {
    if db::get_event(pool, id).await?.is_none() {
        return Err(AppError::NotFound(format!("Event {id}")));
    }
    let draft = build_draft(store, form, attachments, offset).await?;
    let event = db::update_event(pool, id, &draft).await?;
    info!("Updated event {} ({})", event.slug, event.id);
    Ok(event)
}

/// Registrations per event id, counted from the raw event references.
pub fn count_by_event(event_ids: &[Option<String>]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for id in event_ids.iter().flatten() {
        *counts.entry(id.clone()).or_insert(0) += 1;
    }
    counts
}

/// All events, newest first, with their registrant counts.
pub async fn list_events(pool: &SqlitePool, offset: FixedOffset) -> Result<Vec<EventSummary>> {
    let events = db::list_events(pool).await?;
    let counts = count_by_event(&db::registration_event_ids(pool).await?);

    Ok(events
        .into_iter()
        .map(|event| EventSummary {
            registrant_count: counts.get(&event.id).copied().unwrap_or(0),
            registrants_url: format!("/admin/dashboard?tab=registrants&eventId={}", event.id),
            public_url: format!("/e/{}", event.slug),
            edit_url: format!("/admin/events/edit/{}", event.id),
            date: event
                .date_time
                .with_timezone(&offset)
                .format("%Y-%m-%d")
                .to_string(),
            status: if event.is_published { "Published" } else { "Draft" },
            is_published: event.is_published,
            category: event.category,
            id: event.id,
            title: event.title,
            slug: event.slug,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::ChangeFeed;
    use crate::db::test_support::{memory_pool, registration};

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn form(slug: &str) -> EventForm {
        EventForm {
            title: "Cloud Day".to_string(),
            slug: slug.to_string(),
            category: "Webinar".to_string(),
            description: String::new(),
            date_time: "2026-03-01T10:00".to_string(),
            location: "Zoom".to_string(),
            speakers: vec![
                PersonInput {
                    name: "Ahmad".to_string(),
                    title: "GDE".to_string(),
                    photo_url: None,
                },
                PersonInput {
                    name: "Siti".to_string(),
                    title: String::new(),
                    photo_url: Some("http://old/siti.png".to_string()),
                },
            ],
            moderator: PersonInput {
                name: "Budi".to_string(),
                ..PersonInput::default()
            },
        }
    }

    fn png(name: &str) -> ImageUpload {
        ImageUpload {
            file_name: name.to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    async fn store() -> (tempfile::TempDir, ImageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path(), "http://localhost:3001");
        store.ensure_bucket().await.unwrap();
        (dir, store)
    }

    #[test]
    fn local_time_round_trip() {
        let at = parse_local_datetime("2026-03-01T10:00", offset()).unwrap();
        assert_eq!(at.to_rfc3339(), "2026-03-01T03:00:00+00:00");
        assert_eq!(to_local_input(at, offset()), "2026-03-01T10:00");
        assert!(parse_local_datetime("tomorrow", offset()).is_none());
    }

    #[test]
    fn form_rules() {
        let mut bad = form("Not A Slug");
        bad.speakers.clear();
        bad.date_time = String::new();
        let errors = validate_event_form(&bad, &Attachments::default(), offset()).unwrap_err();
        assert!(errors.contains("slug"));
        assert!(errors.contains("speakers"));
        assert!(errors.contains("date_time"));

        let mut unnamed = form("ok");
        unnamed.speakers[1].name = "  ".to_string();
        assert!(validate_event_form(&unnamed, &Attachments::default(), offset())
            .unwrap_err()
            .contains("speakers"));

        assert!(validate_event_form(&form("my-event"), &Attachments::default(), offset()).is_ok());
    }

    #[tokio::test]
    async fn create_uploads_and_publishes() {
        let pool = memory_pool().await;
        let (_dir, store) = store().await;
        let mut attachments = Attachments::default();
        attachments.speakers.insert(0, png("ahmad.png"));
        attachments.moderator = Some(png("budi.JPG"));

        let event = create_event(&pool, &store, &form("cloud-day"), &attachments, offset())
            .await
            .unwrap();

        assert!(event.is_published);
        assert_eq!(event.date_time.to_rfc3339(), "2026-03-01T03:00:00+00:00");
        let ahmad = event.speakers[0].photo_url.as_deref().unwrap();
        assert!(ahmad.starts_with("http://localhost:3001/storage/event-images/"));
        assert!(ahmad.ends_with(".png"));
        assert_eq!(event.speakers[1].photo_url.as_deref(), Some("http://old/siti.png"));
        assert_eq!(event.speakers[1].title, None);
        assert!(event
            .moderator
            .unwrap()
            .photo_url
            .unwrap()
            .ends_with(".jpg"));

        let public = db::get_published_event_by_slug(&pool, "cloud-day")
            .await
            .unwrap();
        assert!(public.is_some());
    }

    #[tokio::test]
    async fn failed_upload_aborts_create() {
        let pool = memory_pool().await;
        let (_dir, store) = store().await;
        let mut attachments = Attachments::default();
        attachments.speakers.insert(0, png("ok.png"));
        attachments.speakers.insert(1, ImageUpload {
            file_name: "empty.png".to_string(),
            bytes: Vec::new(),
        });

        let err = create_event(&pool, &store, &form("broken"), &attachments, offset())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upload(_)));
        assert!(db::list_events(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn edit_round_trip_keeps_publication_flag() {
        let pool = memory_pool().await;
        let (_dir, store) = store().await;
        let created = create_event(&pool, &store, &form("edit-me"), &Attachments::default(), offset())
            .await
            .unwrap();
        db::set_event_published(&pool, &created.id, false).await.unwrap();

        let mut editable = load_for_edit(&pool, &created.id, offset()).await.unwrap();
        assert_eq!(editable.form.date_time, "2026-03-01T10:00");
        assert_eq!(editable.form.speakers.len(), 2);
        assert_eq!(editable.form.moderator.name, "Budi");
        assert!(!editable.is_published);

        editable.form.title = "Cloud Day II".to_string();
        editable.form.speakers.pop();
        let updated = update_event(
            &pool,
            &store,
            &created.id,
            &editable.form,
            &Attachments::default(),
            offset(),
        )
        .await
        .unwrap();

        assert_eq!(updated.title, "Cloud Day II");
        assert_eq!(updated.speakers.len(), 1);
        assert_eq!(updated.date_time, created.date_time);
        assert!(!updated.is_published);
    }

    #[tokio::test]
    async fn edit_unknown_event() {
        let pool = memory_pool().await;
        assert!(matches!(
            load_for_edit(&pool, "nope", offset()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_counts_registrants() {
        let pool = memory_pool().await;
        let (_dir, store) = store().await;
        let feed = ChangeFeed::new();
        let a = create_event(&pool, &store, &form("a"), &Attachments::default(), offset())
            .await
            .unwrap();
        let b = create_event(&pool, &store, &form("b"), &Attachments::default(), offset())
            .await
            .unwrap();
        for name in ["Ana", "Ani"] {
            db::insert_registration(&pool, &feed, &registration(Some(a.id.as_str()), name, 1000))
                .await
                .unwrap();
        }
        db::insert_registration(&pool, &feed, &registration(None, "Orphan", 1000))
            .await
            .unwrap();

        let summaries = list_events(&pool, offset()).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, b.id);
        assert_eq!(summaries[0].registrant_count, 0);
        assert_eq!(summaries[1].registrant_count, 2);
        assert_eq!(summaries[1].public_url, "/e/a");
        assert_eq!(
            summaries[1].registrants_url,
            format!("/admin/dashboard?tab=registrants&eventId={}", a.id)
        );
        assert_eq!(summaries[1].status, "Published");
    }

    #[test]
    fn counting_ignores_unowned_rows() {
        let counts = count_by_event(&[
            Some("x".to_string()),
            None,
            Some("x".to_string()),
            Some("y".to_string()),
        ]);
        assert_eq!(counts.get("x"), Some(&2));
        assert_eq!(counts.get("y"), Some(&1));
        assert_eq!(counts.len(), 2);
    }
}
