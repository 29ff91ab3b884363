//! Read-only projection of an event for the public page's sidebar.

use chrono::FixedOffset;
use serde::Serialize;

use crate::models::{Event, Person};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonCard {
    pub name: String,
    pub title: Option<String>,
    pub photo_url: Option<String>,
}

impl From<&Person> for PersonCard {
    fn from(person: &Person) -> Self {
        Self {
            name: person.name.clone(),
            title: person.title.clone(),
            photo_url: person.photo_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSidebar {
    pub title: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date: String,
    pub time: String,
    pub location: Option<String>,
    pub speakers: Vec<PersonCard>,
    pub moderator: Option<PersonCard>,
    /// True when no event was bound and the sample content is shown.
    pub placeholder: bool,
}

impl EventSidebar {
    pub fn from_event(event: Option<&Event>, offset: FixedOffset) -> Self {
        let Some(event) = event else {
            return Self::placeholder();
        };

        let local = event.date_time.with_timezone(&offset);
        Self {
            title: event.title.clone(),
            category: event.category.clone(),
            description: event.description.clone(),
            date: local.format("%A, %-d %b %Y").to_string(),
            time: format!("{} (UTC{})", local.format("%H:%M"), offset),
            location: event.location.clone(),
            speakers: event.speakers.iter().map(PersonCard::from).collect(),
            moderator: event.moderator.as_ref().map(PersonCard::from),
            placeholder: false,
        }
    }

    pub fn placeholder() -> Self {
        let card = |name: &str, title: &str| PersonCard {
            name: name.to_string(),
            title: Some(title.to_string()),
            photo_url: None,
        };
        Self {
            title: "GenAI Google Cloud ML Optimization".to_string(),
            category: Some("Cloud".to_string()),
            description: Some(
                "Mastering serverless architecture with industry experts. \
                 Join us for a deep dive into modern cloud solutions."
                    .to_string(),
            ),
            date: "Saturday, 24 Oct 2024".to_string(),
            time: "10:00 - 14:00 (UTC+07:00)".to_string(),
            location: Some("Online / Zoom".to_string()),
            speakers: vec![
                card("Ahmad Fulan", "Google Developer Expert"),
                card("Siti Aminah", "Cloud Architect at Startup"),
            ],
            moderator: Some(card("Budi Setiawan", "Community Lead")),
            placeholder: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event() -> Event {
        Event {
            id: "ev-1".to_string(),
            title: "Rust Meetup".to_string(),
            slug: "rust-meetup".to_string(),
            category: Some("Meetup".to_string()),
            description: None,
            date_time: "2026-03-01T03:00:00Z".parse().unwrap(),
            location: Some("Bandung".to_string()),
            speakers: vec![Person {
                name: "Siti".to_string(),
                title: None,
                photo_url: Some("http://img/s.png".to_string()),
            }],
            moderator: None,
            is_published: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn projects_bound_event_in_local_time() {
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        let sidebar = EventSidebar::from_event(Some(&event()), offset);
        assert!(!sidebar.placeholder);
        assert_eq!(sidebar.title, "Rust Meetup");
        assert_eq!(sidebar.date, "Sunday, 1 Mar 2026");
        assert_eq!(sidebar.time, "10:00 (UTC+07:00)");
        assert_eq!(sidebar.speakers[0].photo_url.as_deref(), Some("http://img/s.png"));
        assert!(sidebar.moderator.is_none());
    }

    #[test]
    fn placeholder_without_event() {
        let sidebar = EventSidebar::from_event(None, FixedOffset::east_opt(0).unwrap());
        assert!(sidebar.placeholder);
        assert_eq!(sidebar.speakers.len(), 2);
        assert!(sidebar.moderator.is_some());
    }
}
