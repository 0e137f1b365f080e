//! Declarative field mapping from upstream JSON into [`CanonicalTender`].
//!
//! Each connector declares one [`MappingTable`]: for every canonical field, an ordered
//! list of candidate paths into the raw item. The first candidate that yields a usable
//! value wins; later candidates only matter when earlier ones are absent or blank.

use serde_json::Value as JsonValue;
use tagg_core::{fallback_source_id, parse_day, CanonicalTender, Deadline, TenderError, FALLBACK_ID_PREFIX};

/// One step into a JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSeg {
    Key(&'static str),
    Index(usize),
    /// First value of an object, e.g. any language of a multilingual map.
    AnyValue,
    /// First array element whose `field` array (or string) contains `value`.
    WhereContains {
        field: &'static str,
        value: &'static str,
    },
}

pub type FieldPath = &'static [PathSeg];

/// Ordered candidates for one canonical field, with an optional constant fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub candidates: &'static [FieldPath],
    pub default: Option<&'static str>,
}

/// What a rule found in a raw item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Value(String),
    /// Some candidate exists but holds null, a blank string, or an empty array.
    Empty,
    Missing,
}

impl FieldRule {
    pub const NONE: FieldRule = FieldRule {
        candidates: &[],
        default: None,
    };

    pub const fn paths(candidates: &'static [FieldPath]) -> Self {
        Self {
            candidates,
            default: None,
        }
    }

    pub const fn or_default(self, default: &'static str) -> Self {
        Self {
            candidates: self.candidates,
            default: Some(default),
        }
    }

    pub fn resolve(&self, raw: &JsonValue) -> Resolved {
        let mut saw_empty = false;
        for path in self.candidates {
            if let Some(found) = resolve_path(raw, path) {
                match leaf_text(found) {
                    Some(text) => return Resolved::Value(text),
                    None => saw_empty = true,
                }
            }
        }
        if let Some(default) = self.default {
            return Resolved::Value(default.to_string());
        }
        if saw_empty {
            Resolved::Empty
        } else {
            Resolved::Missing
        }
    }

    pub fn text(&self, raw: &JsonValue) -> Option<String> {
        match self.resolve(raw) {
            Resolved::Value(text) => Some(text),
            Resolved::Empty | Resolved::Missing => None,
        }
    }
}

pub fn resolve_path<'a>(raw: &'a JsonValue, path: &[PathSeg]) -> Option<&'a JsonValue> {
    let mut cur = raw;
    for seg in path {
        cur = match seg {
            PathSeg::Key(key) => cur.get(*key)?,
            PathSeg::Index(idx) => cur.get(*idx)?,
            PathSeg::AnyValue => cur.as_object()?.values().next()?,
            PathSeg::WhereContains { field, value } => cur
                .as_array()?
                .iter()
                .find(|item| contains_value(item.get(*field), value))?,
        };
    }
    Some(cur)
}

fn contains_value(haystack: Option<&JsonValue>, needle: &str) -> bool {
    match haystack {
        Some(JsonValue::Array(items)) => items
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s.eq_ignore_ascii_case(needle))),
        Some(JsonValue::String(s)) => s.eq_ignore_ascii_case(needle),
        _ => false,
    }
}

/// Coerces a JSON leaf to trimmed text. Arrays yield their first usable element.
fn leaf_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Array(items) => items.iter().find_map(leaf_text),
        JsonValue::Object(_) | JsonValue::Null => None,
    }
}

/// Per-source declaration of where each canonical field lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingTable {
    pub source_id: FieldRule,
    pub title: FieldRule,
    pub description: FieldRule,
    pub buyer: FieldRule,
    pub country: FieldRule,
    pub publication_date: FieldRule,
    pub deadline: FieldRule,
    pub raw_url: FieldRule,
    /// Notice URL built from the upstream id when no link field is present.
    pub raw_url_template: Option<&'static str>,
}

impl MappingTable {
    pub const EMPTY: MappingTable = MappingTable {
        source_id: FieldRule::NONE,
        title: FieldRule::NONE,
        description: FieldRule::NONE,
        buyer: FieldRule::NONE,
        country: FieldRule::NONE,
        publication_date: FieldRule::NONE,
        deadline: FieldRule::NONE,
        raw_url: FieldRule::NONE,
        raw_url_template: None,
    };

    pub fn map(&self, source: &str, raw: &JsonValue) -> Result<CanonicalTender, TenderError> {
        if !raw.is_object() {
            return Err(TenderError::NotAnObject);
        }

        let source_id = self
            .source_id
            .text(raw)
            .unwrap_or_else(|| fallback_source_id(raw));
        let mut tender = CanonicalTender::new(source, source_id);

        if let Some(title) = self.title.text(raw) {
            tender.title = title;
        }
        tender.description = self.description.text(raw).unwrap_or_default();
        tender.buyer = self.buyer.text(raw);
        tender.country = self.country.text(raw);
        tender.publication_date = self
            .publication_date
            .text(raw)
            .and_then(|text| parse_day(&text));
        tender.deadline = match self.deadline.resolve(raw) {
            Resolved::Value(text) => parse_day(&text).map_or(Deadline::Unknown, Deadline::On),
            Resolved::Empty => Deadline::NoDeadline,
            Resolved::Missing => Deadline::Unknown,
        };
        tender.raw_url = self.raw_url.text(raw).or_else(|| {
            let template = self.raw_url_template?;
            if tender.source_id.starts_with(FALLBACK_ID_PREFIX) {
                return None;
            }
            Some(template.replace("{source_id}", &tender.source_id))
        });

        tender.validate()?;
        Ok(tender)
    }
}
