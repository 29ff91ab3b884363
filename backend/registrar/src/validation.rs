//! Field constraints for the two groups of the registration form.
//!
//! Every check returns either `Ok(())` or a [`FieldErrors`] map from field
//! name to a message that can be shown next to the input.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Smallest accepted donation, in the currency's smallest display unit.
pub const MIN_DONATION: i64 = 1000;
pub const MAX_DONATION: i64 = 1_000_000_000_000;

const MIN_NAME_CHARS: usize = 3;
const MIN_PHONE_DIGITS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation; the first message for a field wins.
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    #[cfg(test)]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, message) in other.0 {
            self.add(field, message);
        }
    }

    fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Student,
    Professional,
}

impl ParticipantStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "student" => Some(Self::Student),
            "professional" => Some(Self::Professional),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Professional => "professional",
        }
    }
}

/// Step 1 of the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonalInfo {
    pub full_name: String,
    pub email: String,
    pub whatsapp: String,
    pub domicile: String,
    pub status: Option<String>,
    pub major: Option<String>,
    pub institution: Option<String>,
}

impl PersonalInfo {
    pub fn participant_status(&self) -> Option<ParticipantStatus> {
        self.status.as_deref().and_then(ParticipantStatus::parse)
    }
}

/// Step 2 of the form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Donation {
    pub amount: String,
    pub prayer: Option<String>,
}

impl Donation {
    /// The amount as an integer, read like a lenient form input: leading
    /// whitespace is skipped and trailing garbage after the digits ignored.
    pub fn parsed_amount(&self) -> Option<i64> {
        parse_leading_int(&self.amount)
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
            .unwrap_or_else(|e| panic!("email pattern must compile: {e}"))
    })
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.is_empty())
}

pub fn validate_personal(info: &PersonalInfo) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    if info.full_name.chars().count() < MIN_NAME_CHARS {
        errors.add("fullName", "Full name must be at least 3 characters");
    }

    if !email_pattern().is_match(&info.email) {
        errors.add("email", "Invalid email address");
    }

    if info.whatsapp.chars().count() < MIN_PHONE_DIGITS {
        errors.add("whatsapp", "WhatsApp number must be at least 10 digits");
    } else if !info.whatsapp.chars().all(|c| c.is_ascii_digit()) {
        errors.add("whatsapp", "Digits only");
    }

    if info.domicile.is_empty() {
        errors.add("domicile", "Domicile is required");
    }

    match info.participant_status() {
        None => errors.add("status", "Choose student or professional"),
        Some(ParticipantStatus::Student) if is_blank(info.major.as_deref()) => {
            errors.add("major", "Major is required for students");
        }
        Some(ParticipantStatus::Professional) if is_blank(info.institution.as_deref()) => {
            errors.add("institution", "Institution/company is required for professionals");
        }
        Some(_) => {}
    }

    errors.into_result()
}

pub fn validate_donation(donation: &Donation) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    if donation.amount.is_empty() {
        errors.add("amount", "Donation amount is required");
    } else {
        match donation.parsed_amount() {
            Some(amount) if amount > MAX_DONATION => {
                errors.add("amount", "Donation amount is too large")
            }
            Some(amount) if amount >= MIN_DONATION => {}
            _ => errors.add("amount", "Minimum donation is 1000"),
        }
    }

    errors.into_result()
}

/// Check the combined record before it leaves the form.
pub fn validate_registration(personal: &PersonalInfo, donation: &Donation) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    if let Err(e) = validate_personal(personal) {
        errors.merge(e);
    }
    if let Err(e) = validate_donation(donation) {
        errors.merge(e);
    }
    errors.into_result()
}

fn parse_leading_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> PersonalInfo {
        PersonalInfo {
            full_name: "Budi Santoso".to_string(),
            email: "budi@example.com".to_string(),
            whatsapp: "81234567890".to_string(),
            domicile: "Jakarta Selatan".to_string(),
            status: Some("student".to_string()),
            major: Some("Informatics".to_string()),
            institution: None,
        }
    }

    fn donation(amount: &str) -> Donation {
        Donation {
            amount: amount.to_string(),
            prayer: None,
        }
    }

    #[test]
    fn complete_student_is_valid() {
        assert!(validate_personal(&student()).is_ok());
    }

    #[test]
    fn student_requires_major() {
        let mut info = student();
        info.major = None;
        let errors = validate_personal(&info).unwrap_err();
        assert!(errors.contains("major"));
        assert!(!errors.contains("institution"));

        info.major = Some(String::new());
        assert!(validate_personal(&info).unwrap_err().contains("major"));

        info.major = Some("Physics".to_string());
        assert!(validate_personal(&info).is_ok());
    }

    #[test]
    fn professional_requires_institution() {
        let mut info = student();
        info.status = Some("professional".to_string());
        info.major = None;
        let errors = validate_personal(&info).unwrap_err();
        assert!(errors.contains("institution"));
        assert!(!errors.contains("major"));

        info.institution = Some("Acme".to_string());
        assert!(validate_personal(&info).is_ok());
    }

    #[test]
    fn status_outside_enum_is_rejected() {
        let mut info = student();
        info.status = Some("retired".to_string());
        assert!(validate_personal(&info).unwrap_err().contains("status"));

        info.status = None;
        assert!(validate_personal(&info).unwrap_err().contains("status"));
    }

    #[test]
    fn personal_field_rules() {
        let info = PersonalInfo {
            full_name: "Al".to_string(),
            email: "not-an-email".to_string(),
            whatsapp: "0812-345-678".to_string(),
            domicile: String::new(),
            status: Some("student".to_string()),
            major: Some("Math".to_string()),
            institution: None,
        };
        let errors = validate_personal(&info).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert_eq!(errors.get("whatsapp"), Some("Digits only"));
        assert!(errors.contains("fullName"));
        assert!(errors.contains("email"));
        assert!(errors.contains("domicile"));
    }

    #[test]
    fn short_phone_reports_length() {
        let mut info = student();
        info.whatsapp = "0812".to_string();
        assert_eq!(
            validate_personal(&info).unwrap_err().get("whatsapp"),
            Some("WhatsApp number must be at least 10 digits")
        );
    }

    #[test]
    fn donation_threshold() {
        assert!(validate_donation(&donation("1000")).is_ok());
        assert!(validate_donation(&donation("250000")).is_ok());
        assert!(validate_donation(&donation("999")).is_err());
        assert!(validate_donation(&donation("abc")).is_err());
        assert!(validate_donation(&donation("1000000000000")).is_ok());
        assert_eq!(
            validate_donation(&donation("9223372036854775807"))
                .unwrap_err()
                .get("amount"),
            Some("Donation amount is too large")
        );
        assert_eq!(
            validate_donation(&donation("")).unwrap_err().get("amount"),
            Some("Donation amount is required")
        );
    }

    #[test]
    fn amount_parses_leading_digits() {
        assert_eq!(donation(" 1500abc").parsed_amount(), Some(1500));
        assert_eq!(donation("-2000").parsed_amount(), Some(-2000));
        assert_eq!(donation("x1").parsed_amount(), None);
        assert!(validate_donation(&donation("-5000")).is_err());
    }

    #[test]
    fn prayer_is_unconstrained() {
        let d = Donation {
            amount: "1000".to_string(),
            prayer: Some("x".repeat(10_000)),
        };
        assert!(validate_donation(&d).is_ok());
    }

    #[test]
    fn full_record_collects_both_groups() {
        let mut info = student();
        info.email = "nope".to_string();
        let errors = validate_registration(&info, &donation("10")).unwrap_err();
        assert!(errors.contains("email"));
        assert!(errors.contains("amount"));
        assert!(validate_registration(&student(), &donation("1000")).is_ok());
    }
}
