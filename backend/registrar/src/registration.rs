//! Multi-step registration form.
//!
//! A form moves between three phases:
//!
//! * `Collecting` — steps 1..N; "next" validates only the visible step,
//!   "back" never validates.
//! * `Submitting` — the payment-link request is in flight; a second submit
//!   is refused.
//! * `Terminal` — success or cancel, entered from the provider's redirect
//!   back to the page (`?payment=…`).
//!
//! Drafts live in [`FormSessions`], keyed by the visitor's form cookie and
//! the event slug, and are dropped after an idle period.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{Event, NewRegistration};
use crate::payment::{PaymentGateway, PaymentLink, PaymentRequest};
use crate::stepper::{StepMarker, Stepper};
use crate::validation::{
    validate_donation, validate_personal, validate_registration, Donation, FieldErrors,
    ParticipantStatus, PersonalInfo,
};

/// Query parameter the payment provider appends when sending the visitor back.
pub const PAYMENT_PARAM: &str = "payment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Collecting,
    Submitting,
    Terminal(Outcome),
}

/// The event a form registers for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBinding {
    pub id: String,
    pub title: String,
    pub slug: String,
}

impl From<&Event> for EventBinding {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            title: event.title.clone(),
            slug: event.slug.clone(),
        }
    }
}

/// Everything needed to leave the form: the payment call and the row to
/// record once the link exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub request: PaymentRequest,
    pub registration: NewRegistration,
}

/// Result of looking at the URL a form page was loaded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLoad {
    Unchanged,
    /// A payment outcome was consumed; show the page again at this URL.
    Redirect(String),
}

#[derive(Debug, Clone)]
pub struct RegistrationForm {
    stepper: Stepper,
    phase: Phase,
    personal: PersonalInfo,
    donation: Donation,
    errors: FieldErrors,
    notice: Option<String>,
    event: Option<EventBinding>,
}

impl RegistrationForm {
    pub fn new(event: Option<EventBinding>) -> Self {
        Self {
            stepper: Stepper::default(),
            phase: Phase::Collecting,
            personal: PersonalInfo::default(),
            donation: Donation::default(),
            errors: FieldErrors::new(),
            notice: None,
            event,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn step(&self) -> usize {
        self.stepper.current()
    }

    #[cfg(test)]
    pub fn personal(&self) -> &PersonalInfo {
        &self.personal
    }

    #[cfg(test)]
    pub fn donation(&self) -> &Donation {
        &self.donation
    }

    #[cfg(test)]
    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    fn ensure_collecting(&self) -> Result<()> {
        match self.phase {
            Phase::Collecting => Ok(()),
            Phase::Submitting => Err(AppError::Conflict(
                "a payment request is already in progress".to_string(),
            )),
            Phase::Terminal(_) => Err(AppError::BadRequest(
                "the form has already been completed".to_string(),
            )),
        }
    }

    pub fn update_personal(&mut self, personal: PersonalInfo) -> Result<()> {
        self.ensure_collecting()?;
        self.personal = personal;
        Ok(())
    }

    pub fn update_donation(&mut self, donation: Donation) -> Result<()> {
        self.ensure_collecting()?;
        self.donation = donation;
        Ok(())
    }

    fn validate_current_step(&self) -> std::result::Result<(), FieldErrors> {
        match self.stepper.current() {
            1 => validate_personal(&self.personal),
            _ => validate_donation(&self.donation),
        }
    }

    /// Validate the visible step and move forward on success. On failure the
    /// step stays put and the per-field errors are kept for display.
    pub fn next(&mut self) -> Result<()> {
        self.ensure_collecting()?;
        self.notice = None;
        match self.validate_current_step() {
            Ok(()) => {
                self.errors = FieldErrors::new();
                self.stepper.advance();
                Ok(())
            }
            Err(errors) => {
                self.errors = errors.clone();
                Err(AppError::Validation(errors))
            }
        }
    }

    pub fn back(&mut self) -> Result<()> {
        self.ensure_collecting()?;
        self.errors = FieldErrors::new();
        self.notice = None;
        self.stepper.retreat();
        Ok(())
    }

    /// Validate the donation group, then the whole record, and enter
    /// `Submitting`.
    pub fn begin_submit(&mut self) -> Result<Submission> {
        self.ensure_collecting()?;
        if !self.stepper.is_last() {
            return Err(AppError::BadRequest(
                "finish the earlier steps first".to_string(),
            ));
        }

        let checked = validate_donation(&self.donation)
            .and_then(|()| validate_registration(&self.personal, &self.donation));
        if let Err(errors) = checked {
            self.errors = errors.clone();
            return Err(AppError::Validation(errors));
        }

        let amount = self.donation.parsed_amount().unwrap_or_default();
        let message = self.donation.prayer.clone().filter(|p| !p.is_empty());
        let event = self.event.as_ref();

        let request = PaymentRequest {
            amount,
            name: self.personal.full_name.clone(),
            email: self.personal.email.clone(),
            phone: self.personal.whatsapp.clone(),
            message: message.clone(),
            event_id: event.map(|e| e.id.clone()),
            event_name: event.map(|e| e.title.clone()),
            event_slug: event.map(|e| e.slug.clone()),
        };
        let registration = NewRegistration {
            event_id: event.map(|e| e.id.clone()),
            name: self.personal.full_name.clone(),
            email: self.personal.email.clone(),
            phone: self.personal.whatsapp.clone(),
            domicile: Some(self.personal.domicile.clone()),
            current_status: self
                .personal
                .participant_status()
                .map(|s| s.as_str().to_string()),
            major: self.personal.major.clone().filter(|m| !m.is_empty()),
            institution: self.personal.institution.clone().filter(|i| !i.is_empty()),
            amount,
            prayer: message,
            payment_reference: None,
        };

        self.errors = FieldErrors::new();
        self.notice = None;
        self.phase = Phase::Submitting;
        Ok(Submission {
            request,
            registration,
        })
    }

    /// Leave `Submitting`. Either way the form is back on the last step with
    /// every field intact; on failure the message is kept for display.
    pub fn complete_submit(&mut self, outcome: &Result<PaymentLink>) {
        self.phase = Phase::Collecting;
        if let Err(e) = outcome {
            self.notice = Some(format!("Could not create the payment: {e}"));
        }
    }

    /// Consume a `payment` query parameter, if present. `success` enters the
    /// success view, any other value the cancel view; the returned URL is the
    /// page without that parameter.
    pub fn on_page_load(&mut self, path: &str, query: Option<&str>) -> PageLoad {
        let Some(query) = query else {
            return PageLoad::Unchanged;
        };

        let mut outcome = None;
        let mut kept = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == PAYMENT_PARAM {
                if outcome.is_none() {
                    outcome = Some(if value == "success" {
                        Outcome::Success
                    } else {
                        Outcome::Cancelled
                    });
                }
            } else {
                kept.append_pair(&key, &value);
            }
        }

        let Some(outcome) = outcome else {
            return PageLoad::Unchanged;
        };

        self.phase = Phase::Terminal(outcome);
        self.errors = FieldErrors::new();
        self.notice = None;

        let kept = kept.finish();
        if kept.is_empty() {
            PageLoad::Redirect(path.to_string())
        } else {
            PageLoad::Redirect(format!("{path}?{kept}"))
        }
    }

    /// From the success view: start over at step 1 with a fresh donation.
    /// Personal details are kept for repeat registrations.
    pub fn register_another(&mut self) -> Result<()> {
        if self.phase != Phase::Terminal(Outcome::Success) {
            return Err(AppError::BadRequest(
                "only available after a successful payment".to_string(),
            ));
        }
        self.stepper.reset();
        self.donation = Donation::default();
        self.errors = FieldErrors::new();
        self.notice = None;
        self.phase = Phase::Collecting;
        Ok(())
    }

    /// From the cancel view: back to the form, nothing cleared.
    pub fn retry(&mut self) -> Result<()> {
        if self.phase != Phase::Terminal(Outcome::Cancelled) {
            return Err(AppError::BadRequest(
                "only available after a cancelled payment".to_string(),
            ));
        }
        self.phase = Phase::Collecting;
        Ok(())
    }

    pub fn view(&self) -> FormView {
        let (phase, actions): (&'static str, &'static [&'static str]) = match self.phase {
            Phase::Collecting if self.stepper.is_last() => ("collecting", &["back", "submit"]),
            Phase::Collecting if self.stepper.current() > 1 => ("collecting", &["back", "next"]),
            Phase::Collecting => ("collecting", &["next"]),
            Phase::Submitting => ("submitting", &[]),
            Phase::Terminal(Outcome::Success) => ("success", &["register_another"]),
            Phase::Terminal(Outcome::Cancelled) => ("cancelled", &["retry"]),
        };

        let conditional_field = match self.personal.participant_status() {
            Some(ParticipantStatus::Student) => Some("major"),
            Some(ParticipantStatus::Professional) => Some("institution"),
            None => None,
        };

        FormView {
            phase,
            step: self.stepper.current(),
            steps: self.stepper.markers(),
            actions: actions.to_vec(),
            personal: self.personal.clone(),
            donation: self.donation.clone(),
            conditional_field,
            errors: self.errors.clone(),
            notice: self.notice.clone(),
            submit_enabled: self.phase == Phase::Collecting,
        }
    }
}

/// Serializable state of a form, one per rendered page.
#[derive(Debug, Clone, Serialize)]
pub struct FormView {
    pub phase: &'static str,
    pub step: usize,
    pub steps: Vec<StepMarker>,
    pub actions: Vec<&'static str>,
    pub personal: PersonalInfo,
    pub donation: Donation,
    /// Which of `major` / `institution` the chosen status asks for.
    pub conditional_field: Option<&'static str>,
    pub errors: FieldErrors,
    pub notice: Option<String>,
    pub submit_enabled: bool,
}

// ─────────────────────────────────────────────────────────
// Session store
// ─────────────────────────────────────────────────────────

struct Entry {
    form: RegistrationForm,
    touched: Instant,
}

pub struct FormSessions {
    entries: Mutex<HashMap<(Uuid, String), Entry>>,
    ttl: Duration,
}

impl FormSessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Uuid, String), Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the visitor's draft for `event`, creating it if needed.
    /// The store lock is never held across an await.
    pub async fn with_form<R>(
        &self,
        session: Uuid,
        event: &EventBinding,
        f: impl FnOnce(&mut RegistrationForm) -> R,
    ) -> R {
        let mut entries = self.lock();
        let now = Instant::now();
        let ttl = self.ttl;
        entries.retain(|_, entry| now.duration_since(entry.touched) < ttl);

        let entry = entries
            .entry((session, event.slug.clone()))
            .or_insert_with(|| Entry {
                form: RegistrationForm::new(Some(event.clone())),
                touched: now,
            });
        entry.touched = now;
        f(&mut entry.form)
    }

    /// Finalize the draft: validate, call the payment function without
    /// holding the store lock, then settle the form with the outcome.
    pub async fn submit<G: PaymentGateway>(
        &self,
        session: Uuid,
        event: &EventBinding,
        donation: Donation,
        gateway: &G,
    ) -> Result<(PaymentLink, NewRegistration)> {
        let submission = self
            .with_form(session, event, |form| {
                form.update_donation(donation)?;
                form.begin_submit()
            })
            .await?;

        // Settles the form even if this future is dropped mid-request.
        let mut pending = PendingSubmit {
            sessions: self,
            key: Some((session, event.slug.clone())),
        };

        info!(
            "Requesting payment link for event {} (amount {})",
            event.slug, submission.request.amount
        );
        let outcome = gateway.create_link(&submission.request).await;
        if let Err(e) = &outcome {
            warn!("Payment link creation failed for {}: {e}", event.slug);
        }

        pending.settle(&outcome);

        let link = outcome?;
        let mut registration = submission.registration;
        registration.payment_reference = link.reference.clone();
        Ok((link, registration))
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.lock().len()
    }
}

/// A form left in `Submitting` by [`FormSessions::submit`].
struct PendingSubmit<'a> {
    sessions: &'a FormSessions,
    key: Option<(Uuid, String)>,
}

impl PendingSubmit<'_> {
    fn settle(&mut self, outcome: &Result<PaymentLink>) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some(entry) = self.sessions.lock().get_mut(&key) {
            entry.form.complete_submit(outcome);
        }
    }
}

impl Drop for PendingSubmit<'_> {
    fn drop(&mut self) {
        if self.key.is_some() {
            warn!("Payment request abandoned before it finished");
            self.settle(&Err(AppError::Payment(
                "the payment request was interrupted".to_string(),
            )));
        }
    }
}
