//! Flat record types persisted in the durable tables.
//!
//! Every struct here is one CSV row. Field order is column order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sentinel written for any field the source did not provide.
pub const NOT_AVAILABLE: &str = "N/A";

/// Delimiter between unit names in [`Person::organization`].
pub const ORGANIZATION_DELIMITER: &str = "; ";

/// Current version of the author-list cell encoding.
pub const AUTHOR_LIST_VERSION: u32 = 1;

/// Organisational unit (department, school, institute)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
    pub uuid: String,
    pub name: String,
    pub unit_type: String,
}

/// A researcher profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub uuid: String,
    pub email: String,
    /// Display name, unique within the fetch batch it arrived in
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    /// Affiliated unit names, sorted and joined by [`ORGANIZATION_DELIMITER`]
    pub organization: String,
    /// Biography with HTML tags stripped
    pub about: String,
}

impl Person {
    /// Key used by the people table.
    ///
    /// Email is stable across re-fetches; persons without one fall back to
    /// their uuid so they do not all collapse onto the sentinel.
    pub fn store_key(&self) -> &str {
        if is_available(&self.email) {
            &self.email
        } else {
            &self.uuid
        }
    }
}

/// One author reference on a research output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub name: String,
    /// Person uuid, or [`NOT_AVAILABLE`] for external co-authors
    pub uuid: String,
}

/// Ordered author list, stored in a single CSV cell as versioned JSON:
/// `{"version":1,"authors":[{"name":"..","uuid":".."}]}`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorList(pub Vec<AuthorRef>);

#[derive(Serialize, Deserialize)]
struct AuthorListCell {
    version: u32,
    authors: Vec<AuthorRef>,
}

impl AuthorList {
    pub fn iter(&self) -> impl Iterator<Item = &AuthorRef> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode as the JSON cell value.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&AuthorListCell {
            version: AUTHOR_LIST_VERSION,
            authors: self.0.clone(),
        })
    }

    /// Decode a JSON cell value. An empty cell is an empty list.
    pub fn decode(cell: &str) -> Result<Self, String> {
        if cell.trim().is_empty() {
            return Ok(Self::default());
        }
        let parsed: AuthorListCell =
            serde_json::from_str(cell).map_err(|e| format!("invalid author list: {}", e))?;
        if parsed.version != AUTHOR_LIST_VERSION {
            return Err(format!("unsupported author list version {}", parsed.version));
        }
        Ok(Self(parsed.authors))
    }
}

impl Serialize for AuthorList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let cell = self.encode().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&cell)
    }
}

impl<'de> Deserialize<'de> for AuthorList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cell = String::deserialize(deserializer)?;
        Self::decode(&cell).map_err(serde::de::Error::custom)
    }
}

/// A research output (article)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub article_uuid: String,
    /// Title with subtitle appended when present
    pub title: String,
    pub publication_year: String,
    pub doi: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub journal_title: String,
    pub journal_issn: String,
    pub authors: AuthorList,
}

/// One (article, resolved author) pair.
///
/// The article identifier is `article_id` so it cannot collide with the
/// person `uuid` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRow {
    pub article_id: String,
    pub title: String,
    pub publication_year: String,
    pub doi: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub journal_title: String,
    pub journal_issn: String,
    pub uuid: String,
    pub email: String,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub organization: String,
    pub about: String,
}

/// True when a field carries real data rather than the sentinel.
pub fn is_available(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != NOT_AVAILABLE
}
