//! Records stored in the `events` and `registrations` collections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// A speaker or moderator embedded in an [`Event`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

/// A fully decoded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date_time: DateTime<Utc>,
    pub location: Option<String>,
    pub speakers: Vec<Person>,
    pub moderator: Option<Person>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

/// An event row as stored in the database; speakers and moderator are JSON text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date_time: DateTime<Utc>,
    pub location: Option<String>,
    pub speakers: String,
    pub moderator: Option<String>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

impl EventRow {
    pub fn decode(self) -> Result<Event> {
        let speakers: Vec<Person> = serde_json::from_str(&self.speakers)?;
        let moderator = match self.moderator.as_deref() {
            Some(raw) if !raw.is_empty() && raw != "null" => Some(serde_json::from_str(raw)?),
            _ => None,
        };
        Ok(Event {
            id: self.id,
            title: self.title,
            slug: self.slug,
            category: self.category,
            description: self.description,
            date_time: self.date_time,
            location: self.location,
            speakers,
            moderator,
            is_published: self.is_published,
            created_at: self.created_at,
        })
    }
}

/// Event fields written by the admin create and edit actions.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub title: String,
    pub slug: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date_time: DateTime<Utc>,
    pub location: Option<String>,
    pub speakers: Vec<Person>,
    pub moderator: Option<Person>,
}

/// A registration as read from the database.
///
/// `amount` and `status` are kept as free text: rows are also written by
/// payment callbacks, and readers must cope with values they don't recognise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Registration {
    pub id: String,
    pub event_id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub domicile: Option<String>,
    pub current_status: Option<String>,
    pub major: Option<String>,
    pub institution: Option<String>,
    pub amount: String,
    pub prayer: Option<String>,
    pub status: Option<String>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Registration {
    /// Numeric amount, `0` when the stored value does not parse.
    pub fn amount_value(&self) -> i64 {
        self.amount.trim().parse().unwrap_or(0)
    }
}

/// Fields recorded when a payment link is created for a form submission.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRegistration {
    pub event_id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub domicile: Option<String>,
    pub current_status: Option<String>,
    pub major: Option<String>,
    pub institution: Option<String>,
    pub amount: i64,
    pub prayer: Option<String>,
    pub payment_reference: Option<String>,
}

/// Title and slug of the event a registration belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub title: String,
    pub slug: String,
}

/// A registration joined with its owning event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrantRecord {
    #[serde(flatten)]
    pub registration: Registration,
    pub event: Option<EventRef>,
}

/// Row shape of the registrations ⋈ events query.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JoinedRow {
    #[sqlx(flatten)]
    pub registration: Registration,
    pub event_title: Option<String>,
    pub event_slug: Option<String>,
}

impl From<JoinedRow> for RegistrantRecord {
    fn from(row: JoinedRow) -> Self {
        let event = match (row.event_title, row.event_slug) {
            (Some(title), Some(slug)) => Some(EventRef { title, slug }),
            _ => None,
        };
        Self {
            registration: row.registration,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(speakers: &str, moderator: Option<&str>) -> EventRow {
        EventRow {
            id: "ev-1".to_string(),
            title: "Cloud Day".to_string(),
            slug: "cloud-day".to_string(),
            category: None,
            description: None,
            date_time: Utc::now(),
            location: None,
            speakers: speakers.to_string(),
            moderator: moderator.map(String::from),
            is_published: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn decode_embedded_people() {
        let event = row(
            r#"[{"name":"Ahmad","title":"GDE","photo_url":"http://img/a.png"},{"name":"Siti"}]"#,
            Some(r#"{"name":"Budi"}"#),
        )
        .decode()
        .unwrap();

        assert_eq!(event.speakers.len(), 2);
        assert_eq!(event.speakers[0].title.as_deref(), Some("GDE"));
        assert_eq!(event.speakers[1].photo_url, None);
        assert_eq!(event.moderator.unwrap().name, "Budi");
    }

    #[test]
    fn decode_null_moderator() {
        let event = row("[]", Some("null")).decode().unwrap();
        assert!(event.moderator.is_none());
        assert!(event.speakers.is_empty());
    }

    #[test]
    fn malformed_speakers_are_an_error() {
        assert!(row("not json", None).decode().is_err());
    }

    #[test]
    fn unparseable_amount_counts_as_zero() {
        let reg = Registration {
            id: "r".to_string(),
            event_id: None,
            name: "n".to_string(),
            email: "e".to_string(),
            phone: "p".to_string(),
            domicile: None,
            current_status: None,
            major: None,
            institution: None,
            amount: "abc".to_string(),
            prayer: None,
            status: None,
            payment_reference: None,
            created_at: Utc::now(),
        };
        assert_eq!(reg.amount_value(), 0);
    }
}
