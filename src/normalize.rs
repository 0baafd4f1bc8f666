//! Raw experts-API items → flat table records.
//!
//! Every nested path is optional. A field that is missing or shaped
//! unexpectedly becomes [`NOT_AVAILABLE`] instead of an error; the other
//! fields of the same item are kept.
//!
//! HTML cleanup is a tag-matching heuristic, not an HTML parser: text that
//! contains a literal `<` followed later by `>` loses whatever sits between.

use crate::models::{
    is_available, Article, AuthorList, AuthorRef, OrgUnit, Person, NOT_AVAILABLE,
    ORGANIZATION_DELIMITER,
};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, warn};

static PARAGRAPH_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?p(\s[^>]*)?>").expect("paragraph tag regex"));

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("html tag regex"));

// === Raw API shapes ===
//
// Leniency is per field: a field whose shape does not match becomes its
// default (`None` / empty) while the rest of the item, its `uuid` in
// particular, is still read.

/// A field of the wrong shape becomes `T::default()`.
fn lenient_field<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|e| {
        debug!(error = %e, "Unexpected field shape, using default");
        T::default()
    }))
}

/// A list where each malformed element is skipped; a non-list is empty.
fn lenient_items<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => return Ok(Vec::new()),
        other => {
            debug!(kind = json_kind(&other), "Expected a list, using empty");
            return Ok(Vec::new());
        }
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(error = %e, "Skipping malformed list element");
                None
            }
        })
        .collect())
}

/// Identifiers arrive as strings; numeric ids are kept as their decimal text.
fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Text that the API renders as a bare string, as `{"value": ..}`, as a
/// localized `{"text": [{"locale": .., "value": ..}]}` block, or as a
/// locale map `{"en_GB": ..}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawText {
    Plain(String),
    Value { value: String },
    Localized { text: Vec<RawLocalizedValue> },
    Locales(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawLocalizedValue {
    #[serde(default, deserialize_with = "lenient_field")]
    value: Option<String>,
}

impl RawText {
    fn as_text(&self) -> Option<&str> {
        let text = match self {
            RawText::Plain(s) => Some(s.as_str()),
            RawText::Value { value } => Some(value.as_str()),
            RawText::Localized { text } => text
                .iter()
                .filter_map(|t| t.value.as_deref())
                .find(|v| !v.trim().is_empty()),
            RawText::Locales(locales) => locales
                .values()
                .map(String::as_str)
                .find(|v| !v.trim().is_empty()),
        };
        text.map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawOrgUnit {
    #[serde(deserialize_with = "lenient_id")]
    uuid: Option<String>,
    #[serde(deserialize_with = "lenient_field")]
    name: Option<RawText>,
    #[serde(rename = "type", deserialize_with = "lenient_field")]
    unit_type: Option<RawTerm>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTerm {
    Term { term: RawText },
    Text(RawText),
}

impl RawTerm {
    fn as_text(&self) -> Option<&str> {
        match self {
            RawTerm::Term { term } => term.as_text(),
            RawTerm::Text(t) => t.as_text(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawName {
    #[serde(deserialize_with = "lenient_field")]
    first_name: Option<String>,
    #[serde(deserialize_with = "lenient_field")]
    last_name: Option<String>,
}

impl RawName {
    fn full(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEmail {
    Plain(String),
    Nested { value: RawText },
}

impl RawEmail {
    fn as_text(&self) -> Option<&str> {
        match self {
            RawEmail::Plain(s) => Some(s.trim()).filter(|s| !s.is_empty()),
            RawEmail::Nested { value } => value.as_text(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawStaffAssociation {
    #[serde(deserialize_with = "lenient_field")]
    organisational_unit: Option<RawOrgUnit>,
    #[serde(deserialize_with = "lenient_items")]
    emails: Vec<RawEmail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawProfileInformation {
    #[serde(deserialize_with = "lenient_field")]
    value: Option<RawText>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPerson {
    #[serde(deserialize_with = "lenient_id")]
    uuid: Option<String>,
    #[serde(deserialize_with = "lenient_field")]
    name: Option<RawName>,
    /// Single-string name used by some exports instead of `name`
    #[serde(deserialize_with = "lenient_field")]
    full_name: Option<String>,
    #[serde(deserialize_with = "lenient_items")]
    staff_organisation_associations: Vec<RawStaffAssociation>,
    #[serde(deserialize_with = "lenient_items")]
    profile_informations: Vec<RawProfileInformation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawResearchOutput {
    #[serde(deserialize_with = "lenient_id")]
    uuid: Option<String>,
    #[serde(deserialize_with = "lenient_field")]
    title: Option<RawText>,
    #[serde(deserialize_with = "lenient_field")]
    sub_title: Option<RawText>,
    #[serde(deserialize_with = "lenient_items")]
    publication_statuses: Vec<RawPublicationStatus>,
    #[serde(deserialize_with = "lenient_items")]
    electronic_versions: Vec<RawElectronicVersion>,
    #[serde(rename = "abstract", deserialize_with = "lenient_field")]
    abstract_text: Option<RawText>,
    #[serde(deserialize_with = "lenient_field")]
    journal_association: Option<RawJournalAssociation>,
    #[serde(deserialize_with = "lenient_items")]
    person_associations: Vec<RawPersonAssociation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPublicationStatus {
    #[serde(deserialize_with = "lenient_field")]
    current: Option<bool>,
    #[serde(deserialize_with = "lenient_field")]
    publication_date: Option<RawDate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDate {
    year: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawElectronicVersion {
    #[serde(deserialize_with = "lenient_field")]
    doi: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawJournalAssociation {
    #[serde(deserialize_with = "lenient_field")]
    title: Option<RawText>,
    #[serde(deserialize_with = "lenient_field")]
    issn: Option<RawText>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawPersonAssociation {
    #[serde(deserialize_with = "lenient_field")]
    name: Option<RawName>,
    #[serde(deserialize_with = "lenient_field")]
    person: Option<RawPersonRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPersonRef {
    #[serde(deserialize_with = "lenient_id")]
    uuid: Option<String>,
}

/// Deserialize an item. Field shapes are handled per field; only an item
/// that is not a JSON object at all ends up with every field missing.
fn lenient<T: DeserializeOwned + Default>(item: &serde_json::Value, kind: &str) -> T {
    match serde_json::from_value(item.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(kind = kind, item = json_kind(item), error = %e, "Item is not an object, defaulting all fields");
            T::default()
        }
    }
}

fn or_na(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NOT_AVAILABLE)
        .to_string()
}

// === Text helpers ===

/// Split a full name into (first, last).
///
/// Two or more tokens: first token is the first name, the rest is the last
/// name. One token: the token is the first name and the last name is the
/// [`NOT_AVAILABLE`] marker.
pub fn split_name(full_name: &str) -> (String, String) {
    let mut tokens = full_name.split_whitespace();
    match tokens.next() {
        None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
        Some(first) => {
            let rest: Vec<&str> = tokens.collect();
            if rest.is_empty() {
                (first.to_string(), NOT_AVAILABLE.to_string())
            } else {
                (first.to_string(), rest.join(" "))
            }
        }
    }
}

/// Remove `<p>` / `</p>` wrappers (abstracts).
pub fn strip_paragraph_tags(text: &str) -> String {
    PARAGRAPH_TAG.replace_all(text, "").trim().to_string()
}

/// Remove anything that looks like a tag (biographies).
pub fn strip_html_tags(text: &str) -> String {
    ANY_TAG.replace_all(text, "").trim().to_string()
}

// === Entity normalizers ===

pub fn normalize_org_unit(item: &serde_json::Value) -> OrgUnit {
    let raw: RawOrgUnit = lenient(item, "organisational-unit");
    OrgUnit {
        uuid: or_na(raw.uuid.as_deref()),
        name: or_na(raw.name.as_ref().and_then(RawText::as_text)),
        unit_type: or_na(raw.unit_type.as_ref().and_then(RawTerm::as_text)),
    }
}

pub fn normalize_person(item: &serde_json::Value) -> Person {
    let raw: RawPerson = lenient(item, "person");

    let structured = raw.name.as_ref().map(RawName::full).unwrap_or_default();
    let full_name = if structured.is_empty() {
        raw.full_name.as_deref().map(str::trim).unwrap_or_default().to_string()
    } else {
        structured
    };

    let (first_name, last_name) = match raw.name.as_ref() {
        Some(RawName {
            first_name: Some(first),
            last_name: Some(last),
        }) if !first.trim().is_empty() && !last.trim().is_empty() => {
            (first.trim().to_string(), last.trim().to_string())
        }
        _ => split_name(&full_name),
    };

    let organizations: BTreeSet<&str> = raw
        .staff_organisation_associations
        .iter()
        .filter_map(|a| a.organisational_unit.as_ref())
        .filter_map(|u| u.name.as_ref().and_then(RawText::as_text))
        .collect();
    let organization = if organizations.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        organizations.into_iter().collect::<Vec<_>>().join(ORGANIZATION_DELIMITER)
    };

    let email = raw
        .staff_organisation_associations
        .iter()
        .flat_map(|a| a.emails.iter())
        .find_map(RawEmail::as_text);

    let about = raw
        .profile_informations
        .iter()
        .filter_map(|p| p.value.as_ref().and_then(RawText::as_text))
        .map(strip_html_tags)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Person {
        uuid: or_na(raw.uuid.as_deref()),
        email: or_na(email.map(str::to_lowercase).as_deref()),
        name: or_na(Some(full_name.as_str())),
        first_name,
        last_name,
        organization,
        about: or_na(Some(about.as_str())),
    }
}

pub fn normalize_article(item: &serde_json::Value) -> Article {
    let raw: RawResearchOutput = lenient(item, "research-output");

    let title = raw.title.as_ref().and_then(RawText::as_text);
    let subtitle = raw.sub_title.as_ref().and_then(RawText::as_text);
    let title = match (title, subtitle) {
        (Some(t), Some(s)) => format!("{}: {}", t, s),
        (Some(t), None) => t.to_string(),
        (None, Some(s)) => s.to_string(),
        (None, None) => NOT_AVAILABLE.to_string(),
    };

    let status = raw
        .publication_statuses
        .iter()
        .find(|s| s.current == Some(true))
        .or_else(|| raw.publication_statuses.first());
    let publication_year = status
        .and_then(|s| s.publication_date.as_ref())
        .and_then(|d| d.year.as_ref())
        .and_then(|y| match y {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) => Some(s.clone()),
            _ => None,
        });

    let doi = raw
        .electronic_versions
        .iter()
        .filter_map(|v| v.doi.as_deref())
        .find(|d| !d.trim().is_empty())
        .map(|d| d.trim().trim_start_matches("https://doi.org/").to_string());

    let abstract_text = raw
        .abstract_text
        .as_ref()
        .and_then(RawText::as_text)
        .map(strip_paragraph_tags);

    let journal = raw.journal_association.as_ref();

    let authors = raw
        .person_associations
        .iter()
        .map(|a| {
            let name = a.name.as_ref().map(RawName::full).unwrap_or_default();
            AuthorRef {
                name: or_na(Some(name.as_str())),
                uuid: or_na(a.person.as_ref().and_then(|p| p.uuid.as_deref())),
            }
        })
        .collect();

    Article {
        article_uuid: or_na(raw.uuid.as_deref()),
        title,
        publication_year: or_na(publication_year.as_deref()),
        doi: or_na(doi.as_deref()),
        abstract_text: or_na(abstract_text.as_deref()),
        journal_title: or_na(journal.and_then(|j| j.title.as_ref()).and_then(RawText::as_text)),
        journal_issn: or_na(journal.and_then(|j| j.issn.as_ref()).and_then(RawText::as_text)),
        authors: AuthorList(authors),
    }
}

/// Make display names unique within one batch.
///
/// The first person seen with a name keeps it; later ones get ` (2)`,
/// ` (3)`, ... in first-seen order, skipping any candidate already taken.
pub fn disambiguate_names(people: Vec<Person>) -> Vec<Person> {
    let mut taken: HashSet<String> = HashSet::with_capacity(people.len());
    let mut next_index: HashMap<String, usize> = HashMap::new();

    people
        .into_iter()
        .map(|mut person| {
            if is_available(&person.name) && !taken.insert(person.name.clone()) {
                let base = person.name.clone();
                let counter = next_index.entry(base.clone()).or_insert(2);
                let mut candidate = format!("{} ({})", base, counter);
                while taken.contains(&candidate) {
                    *counter += 1;
                    candidate = format!("{} ({})", base, counter);
                }
                *counter += 1;
                taken.insert(candidate.clone());
                person.name = candidate;
            }
            person
        })
        .collect()
}

/// Normalize a fetched batch of persons, including name disambiguation.
pub fn normalize_people(items: &[serde_json::Value]) -> Vec<Person> {
    disambiguate_names(items.iter().map(normalize_person).collect())
}

pub fn normalize_articles(items: &[serde_json::Value]) -> Vec<Article> {
    items.iter().map(normalize_article).collect()
}

pub fn normalize_org_units(items: &[serde_json::Value]) -> Vec<OrgUnit> {
    items.iter().map(normalize_org_unit).collect()
}
