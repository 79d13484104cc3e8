//! Contact records and normalization of loosely-typed contact rows.
//!
//! Uploaded lists arrive with whatever column names the author chose
//! ("Full Name", "Mobile No.", "DOB", ...). The normalizer maps them onto
//! [`Contact`] with an ordered table of case-insensitive match rules and keeps
//! every other column as a custom field.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A loosely-typed input row: column name to cell value.
pub type Row = Map<String, Value>;

/// A canonical campaign recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    /// Digits only, including the country code.
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Birthday as `MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, Value>,
}

impl Contact {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            email: None,
            birthday: None,
            custom_fields: BTreeMap::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

const NAME_COLUMNS: &[&str] = &["name", "full_name", "fullname", "contact_name"];
const PHONE_COLUMNS: &[&str] = &["phone", "mobile", "telephone", "cell", "whatsapp"];
const EMAIL_COLUMNS: &[&str] = &["email", "e-mail", "mail"];
const BIRTHDAY_COLUMNS: &[&str] = &["birthday", "dob", "date_of_birth", "birth_date"];

const KNOWN_COLUMNS: &[&[&str]] = &[NAME_COLUMNS, PHONE_COLUMNS, EMAIL_COLUMNS, BIRTHDAY_COLUMNS];

/// Turns heterogeneous rows into [`Contact`]s.
#[derive(Debug, Clone)]
pub struct ContactNormalizer {
    country_code: String,
}

impl Default for ContactNormalizer {
    fn default() -> Self {
        Self::new("234")
    }
}

impl ContactNormalizer {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
        }
    }

    /// Normalize every row, dropping rows without a name or phone.
    /// Output order follows input order.
    pub fn normalize(&self, rows: &[Row]) -> Vec<Contact> {
        let contacts: Vec<Contact> = rows
            .iter()
            .filter_map(|row| self.normalize_row(row))
            .collect();
        debug!(
            rows = rows.len(),
            contacts = contacts.len(),
            "Normalized contact rows"
        );
        contacts
    }

    /// Normalize a single row. Returns `None` when name or phone is missing.
    pub fn normalize_row(&self, row: &Row) -> Option<Contact> {
        let name = find_field(row, NAME_COLUMNS)?;
        let phone = self.normalize_phone(&find_field(row, PHONE_COLUMNS)?);
        if phone.is_empty() {
            return None;
        }

        let email = find_field(row, EMAIL_COLUMNS);
        let birthday = find_field(row, BIRTHDAY_COLUMNS).and_then(|raw| {
            let parsed = normalize_birthday(&raw);
            if parsed.is_none() {
                debug!(name = %name, birthday = %raw, "Ignoring unparseable birthday");
            }
            parsed
        });

        let custom_fields = row
            .iter()
            .filter(|(key, _)| !is_known_column(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(Contact {
            name,
            phone,
            email,
            birthday,
            custom_fields,
        })
    }

    /// Strip formatting and put the number in international digit form.
    ///
    /// `08012345678` and `8012345678` both become `2348012345678` for country
    /// code 234. Numbers of any other shape keep their digits unchanged.
    pub fn normalize_phone(&self, raw: &str) -> String {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.len() == 11 && digits.starts_with('0') {
            return format!("{}{}", self.country_code, &digits[1..]);
        }
        if digits.len() == 10 && !digits.starts_with(&self.country_code) {
            return format!("{}{}", self.country_code, digits);
        }
        digits
    }
}

/// First non-empty value whose column matches one of `candidates`, trying the
/// candidates in priority order. For each candidate an exact column match
/// beats a substring match.
fn find_field(row: &Row, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|candidate| {
        let exact = row.iter().filter(|(key, _)| column_equals(key, candidate));
        let partial = row.iter().filter(|(key, _)| column_matches(key, candidate));
        exact.chain(partial).find_map(|(_, value)| cell_text(value))
    })
}

fn column_equals(column: &str, candidate: &str) -> bool {
    let column = column.trim().to_lowercase();
    column == candidate || column.replace(' ', "_") == candidate
}

fn column_matches(column: &str, candidate: &str) -> bool {
    column_equals(column, candidate) || column.to_lowercase().contains(candidate)
}

fn is_known_column(column: &str) -> bool {
    KNOWN_COLUMNS
        .iter()
        .any(|candidates| candidates.iter().any(|c| column_matches(column, c)))
}

fn cell_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Reduce a birthday to `MM-DD`.
fn normalize_birthday(raw: &str) -> Option<String> {
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.format("%m-%d").to_string());
        }
    }

    // Month-day only; 2000 is a leap year so 02-29 is accepted.
    NaiveDate::parse_from_str(&format!("2000-{raw}"), "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%m-%d").to_string())
}
