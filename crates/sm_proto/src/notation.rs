//! Notation: the `scheme://<record>/<kind>[/<name>][index][property]`
//! query language over the decrypted entity graph.
//!
//! Grammar (informal):
//!   notation := scheme "://" selector "/" kind ( "/" name )? index? property?
//!   selector := record UID | escaped record title
//!   kind     := type | title | notes | field | custom_field | file | totp
//!   index    := "[" ( digits | "*" | "" ) "]"
//!   property := "[" key "]"
//!
//! `/`, `[`, `]`, and `\` are escapable with a backslash inside titles and
//! names. A base64url-wrapped notation string is unwrapped transparently
//! when the input is not already in `scheme://` form. The grammar is
//! consumed by downstream integrations and must stay byte-for-byte stable.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;
use thiserror::Error;

use sm_crypto::totp::{TotpError, TotpParams};

use crate::record::SecretRecord;

pub const DEFAULT_SCHEME: &str = "keeper";

#[derive(Debug, Error)]
pub enum NotationError {
    #[error("malformed notation: {0}")]
    Malformed(String),

    #[error("record not found for selector '{0}'")]
    RecordNotFound(String),

    #[error("multiple records match title '{0}'")]
    AmbiguousTitle(String),

    #[error("field '{0}' not present on record")]
    FieldNotFound(String),

    #[error("value index {0} out of range")]
    IndexOutOfRange(usize),

    #[error("property '{0}' not present in field value")]
    PropertyNotFound(String),

    #[error("file '{0}' not attached to record")]
    FileNotFound(String),

    #[error("record has no one-time-code field")]
    TotpFieldMissing,

    #[error("totp: {0}")]
    Totp(#[from] TotpError),
}

/// Which part of a record a notation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Type,
    Title,
    Notes,
    Field,
    CustomField,
    File,
    Totp,
}

impl FieldKind {
    fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "type" => Self::Type,
            "title" => Self::Title,
            "notes" => Self::Notes,
            "field" => Self::Field,
            "custom_field" => Self::CustomField,
            "file" => Self::File,
            "totp" => Self::Totp,
            _ => return None,
        })
    }

    fn takes_name(self) -> bool {
        matches!(self, Self::Field | Self::CustomField | Self::File)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Type => "type",
            Self::Title => "title",
            Self::Notes => "notes",
            Self::Field => "field",
            Self::CustomField => "custom_field",
            Self::File => "file",
            Self::Totp => "totp",
        };
        f.write_str(text)
    }
}

/// Which value(s) of a multi-valued field the notation selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueIndex {
    /// No index given — the first value.
    First,
    /// `[]` or `[*]` — every value, as a list.
    All,
    /// `[n]` — the nth value.
    Nth(usize),
}

/// A parsed notation query. Parsing is pure: the same string always
/// yields the same query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotationQuery {
    pub record_selector: String,
    pub kind: FieldKind,
    pub name: Option<String>,
    pub index: ValueIndex,
    pub property: Option<String>,
}

impl NotationQuery {
    /// Parse a notation string, transparently unwrapping base64url input.
    pub fn parse(notation: &str) -> Result<Self, NotationError> {
        let text = unwrap_base64(notation);
        let text = text.as_ref();

        let rest = match text.find("://") {
            Some(at) => &text[at + 3..],
            None => {
                return Err(NotationError::Malformed(
                    "missing '<scheme>://' prefix".into(),
                ))
            }
        };

        let segments = split_unescaped(rest)?;
        if segments.len() < 2 || segments.len() > 3 {
            return Err(NotationError::Malformed(format!(
                "expected 2 or 3 segments, got {}",
                segments.len()
            )));
        }

        let record_selector = unescape(&segments[0])?;
        if record_selector.is_empty() {
            return Err(NotationError::Malformed("empty record selector".into()));
        }

        let kind_text = unescape(&segments[1])?;
        let kind = FieldKind::parse(&kind_text)
            .ok_or_else(|| NotationError::Malformed(format!("unknown selector '{kind_text}'")))?;

        let (name, index, property) = match segments.get(2) {
            Some(tail) => {
                if !kind.takes_name() {
                    return Err(NotationError::Malformed(format!(
                        "selector '{kind}' takes no field name"
                    )));
                }
                let (raw_name, brackets) = split_brackets(tail)?;
                let name = unescape(&raw_name)?;
                if name.is_empty() {
                    return Err(NotationError::Malformed("empty field name".into()));
                }
                let (index, property) = interpret_brackets(&brackets)?;
                (Some(name), index, property)
            }
            None => {
                if kind.takes_name() {
                    return Err(NotationError::Malformed(format!(
                        "selector '{kind}' requires a field name"
                    )));
                }
                (None, ValueIndex::First, None)
            }
        };

        Ok(Self {
            record_selector,
            kind,
            name,
            index,
            property,
        })
    }

    /// Evaluate against a fetched entity set. Read-only.
    pub fn resolve(&self, records: &[SecretRecord]) -> Result<Value, NotationError> {
        let record = self.select_record(records)?;
        match self.kind {
            FieldKind::Type => Ok(Value::String(record.record_type.clone())),
            FieldKind::Title => Ok(Value::String(record.title.clone())),
            FieldKind::Notes => Ok(Value::String(record.notes.clone())),
            FieldKind::Field | FieldKind::CustomField => self.resolve_field(record),
            FieldKind::File => self.resolve_file(record),
            FieldKind::Totp => resolve_totp(record),
        }
    }

    fn select_record<'a>(
        &self,
        records: &'a [SecretRecord],
    ) -> Result<&'a SecretRecord, NotationError> {
        // Exact UID match first, then exact title.
        if let Some(record) = records.iter().find(|r| r.uid == self.record_selector) {
            return Ok(record);
        }
        let mut by_title = records.iter().filter(|r| r.title == self.record_selector);
        match (by_title.next(), by_title.next()) {
            (Some(record), None) => Ok(record),
            (Some(_), Some(_)) => Err(NotationError::AmbiguousTitle(self.record_selector.clone())),
            (None, _) => Err(NotationError::RecordNotFound(self.record_selector.clone())),
        }
    }

    fn resolve_field(&self, record: &SecretRecord) -> Result<Value, NotationError> {
        let name = self.name.as_deref().unwrap_or_default();
        let field = match self.kind {
            FieldKind::Field => record.field(name),
            _ => record.custom_field(name),
        }
        .ok_or_else(|| NotationError::FieldNotFound(name.to_string()))?;

        let selected = match self.index {
            ValueIndex::All => {
                if self.property.is_some() {
                    return Err(NotationError::Malformed(
                        "property cannot follow a whole-list index".into(),
                    ));
                }
                return Ok(Value::Array(field.value.clone()));
            }
            ValueIndex::First => field
                .value
                .first()
                .ok_or(NotationError::IndexOutOfRange(0))?,
            ValueIndex::Nth(n) => field
                .value
                .get(n)
                .ok_or(NotationError::IndexOutOfRange(n))?,
        };

        match &self.property {
            None => Ok(selected.clone()),
            Some(key) => selected
                .get(key)
                .cloned()
                .ok_or_else(|| NotationError::PropertyNotFound(key.clone())),
        }
    }

    fn resolve_file(&self, record: &SecretRecord) -> Result<Value, NotationError> {
        let name = self.name.as_deref().unwrap_or_default();
        record
            .file(name)
            .map(|file| file.reference())
            .ok_or_else(|| NotationError::FileNotFound(name.to_string()))
    }
}

/// Parse and evaluate in one step.
pub fn resolve(notation: &str, records: &[SecretRecord]) -> Result<Value, NotationError> {
    NotationQuery::parse(notation)?.resolve(records)
}

fn resolve_totp(record: &SecretRecord) -> Result<Value, NotationError> {
    let field = record
        .field("oneTimeCode")
        .or_else(|| record.custom_field("oneTimeCode"))
        .ok_or(NotationError::TotpFieldMissing)?;
    let url = field
        .value
        .first()
        .and_then(|v| v.as_str())
        .ok_or(NotationError::TotpFieldMissing)?;

    let params = TotpParams::parse(url)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    Ok(Value::String(params.generate(now).code))
}

// ── Lexing helpers ───────────────────────────────────────────────────────────

/// If the input is not already `scheme://...`, try to unwrap it as a
/// base64url-encoded notation string; fall through on any failure.
fn unwrap_base64(notation: &str) -> std::borrow::Cow<'_, str> {
    if notation.contains("://") {
        return notation.into();
    }
    let decoded = URL_SAFE_NO_PAD
        .decode(notation.trim_end_matches('='))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    match decoded {
        Some(text) if text.contains("://") => text.into(),
        _ => notation.into(),
    }
}

/// Split on unescaped `/`, leaving escape sequences intact inside segments.
fn split_unescaped(text: &str) -> Result<Vec<String>, NotationError> {
    let mut segments = vec![String::new()];
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                let next = chars
                    .next()
                    .ok_or_else(|| NotationError::Malformed("dangling escape".into()))?;
                let last = segments.last_mut().expect("segments is never empty");
                last.push('\\');
                last.push(next);
            }
            '/' => segments.push(String::new()),
            _ => segments.last_mut().expect("segments is never empty").push(ch),
        }
    }
    Ok(segments)
}

/// Resolve escape sequences in one segment.
fn unescape(segment: &str) -> Result<String, NotationError> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some(next @ ('/' | '[' | ']' | '\\')) => out.push(next),
            Some(other) => {
                return Err(NotationError::Malformed(format!(
                    "unresolved escape sequence '\\{other}'"
                )))
            }
            None => return Err(NotationError::Malformed("dangling escape".into())),
        }
    }
    Ok(out)
}

/// Split a trailing segment into the name part and its bracket groups.
/// Escapes are honoured; brackets do not nest.
fn split_brackets(segment: &str) -> Result<(String, Vec<String>), NotationError> {
    let mut name = String::new();
    let mut groups: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    let mut chars = segment.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                let next = chars
                    .next()
                    .ok_or_else(|| NotationError::Malformed("dangling escape".into()))?;
                let target = current.as_mut().unwrap_or(&mut name);
                target.push('\\');
                target.push(next);
            }
            '[' => {
                if current.is_some() {
                    return Err(NotationError::Malformed("nested '[' in index".into()));
                }
                if groups.len() == 2 {
                    return Err(NotationError::Malformed("too many bracket groups".into()));
                }
                current = Some(String::new());
            }
            ']' => match current.take() {
                Some(group) => groups.push(group),
                None => return Err(NotationError::Malformed("unmatched ']'".into())),
            },
            _ => match current.as_mut() {
                Some(group) => group.push(ch),
                None => {
                    if !groups.is_empty() {
                        return Err(NotationError::Malformed(
                            "text after bracket group".into(),
                        ));
                    }
                    name.push(ch);
                }
            },
        }
    }
    if current.is_some() {
        return Err(NotationError::Malformed("unterminated '['".into()));
    }
    Ok((name, groups))
}

/// Interpret up to two bracket groups as (index, property).
fn interpret_brackets(
    groups: &[String],
) -> Result<(ValueIndex, Option<String>), NotationError> {
    match groups {
        [] => Ok((ValueIndex::First, None)),
        [single] => {
            let content = unescape(single)?;
            if content.is_empty() || content == "*" {
                Ok((ValueIndex::All, None))
            } else if let Ok(n) = content.parse::<usize>() {
                Ok((ValueIndex::Nth(n), None))
            } else {
                // A lone non-numeric group addresses a property of the
                // first value.
                Ok((ValueIndex::First, Some(content)))
            }
        }
        [first, second] => {
            let index_text = unescape(first)?;
            let index = if index_text.is_empty() || index_text == "*" {
                return Err(NotationError::Malformed(
                    "property cannot follow a whole-list index".into(),
                ));
            } else {
                index_text.parse::<usize>().map(ValueIndex::Nth).map_err(|_| {
                    NotationError::Malformed(format!("non-numeric index '{index_text}'"))
                })?
            };
            Ok((index, Some(unescape(second)?)))
        }
        _ => Err(NotationError::Malformed("too many bracket groups".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordField, SecretRecord};

    fn record(uid: &str, title: &str) -> SecretRecord {
        SecretRecord {
            uid: uid.into(),
            revision: 0,
            record_key: [0u8; 32],
            title: title.into(),
            record_type: "login".into(),
            notes: "some notes".into(),
            fields: vec![
                RecordField {
                    field_type: "login".into(),
                    label: None,
                    value: vec![Value::String("admin".into())],
                    required: None,
                },
                RecordField {
                    field_type: "url".into(),
                    label: None,
                    value: vec![
                        Value::String("https://a.example".into()),
                        Value::String("https://b.example".into()),
                    ],
                    required: None,
                },
                RecordField {
                    field_type: "phone".into(),
                    label: None,
                    value: vec![serde_json::json!({"region": "US", "number": "555-0100"})],
                    required: None,
                },
            ],
            custom: vec![RecordField {
                field_type: "text".into(),
                label: Some("my/label".into()),
                value: vec![Value::String("custom-value".into())],
                required: None,
            }],
            files: vec![],
            folder_uid: None,
        }
    }

    fn records() -> Vec<SecretRecord> {
        vec![record("AAAAAAAAAAAAAAAAAAAAAA", "Prod Login")]
    }

    #[test]
    fn parsing_is_idempotent() {
        let text = "keeper://AAAAAAAAAAAAAAAAAAAAAA/field/url[0]";
        assert_eq!(
            NotationQuery::parse(text).unwrap(),
            NotationQuery::parse(text).unwrap()
        );
    }

    #[test]
    fn scalar_selectors() {
        let set = records();
        assert_eq!(
            resolve("keeper://AAAAAAAAAAAAAAAAAAAAAA/type", &set).unwrap(),
            Value::String("login".into())
        );
        assert_eq!(
            resolve("keeper://Prod Login/title", &set).unwrap(),
            Value::String("Prod Login".into())
        );
        assert_eq!(
            resolve("keeper://Prod Login/notes", &set).unwrap(),
            Value::String("some notes".into())
        );
    }

    #[test]
    fn field_index_semantics() {
        let set = records();
        assert_eq!(
            resolve("keeper://AAAAAAAAAAAAAAAAAAAAAA/field/url", &set).unwrap(),
            Value::String("https://a.example".into())
        );
        assert_eq!(
            resolve("keeper://AAAAAAAAAAAAAAAAAAAAAA/field/url[0]", &set).unwrap(),
            Value::String("https://a.example".into())
        );
        assert_eq!(
            resolve("keeper://AAAAAAAAAAAAAAAAAAAAAA/field/url[1]", &set).unwrap(),
            Value::String("https://b.example".into())
        );
        let all = resolve("keeper://AAAAAAAAAAAAAAAAAAAAAA/field/url[]", &set).unwrap();
        assert_eq!(all.as_array().unwrap().len(), 2);
        let star = resolve("keeper://AAAAAAAAAAAAAAAAAAAAAA/field/url[*]", &set).unwrap();
        assert_eq!(all, star);
    }

    #[test]
    fn property_extraction() {
        let set = records();
        assert_eq!(
            resolve("keeper://Prod Login/field/phone[0][number]", &set).unwrap(),
            Value::String("555-0100".into())
        );
        // Lone non-numeric bracket is a property of the first value.
        assert_eq!(
            resolve("keeper://Prod Login/field/phone[number]", &set).unwrap(),
            Value::String("555-0100".into())
        );
    }

    #[test]
    fn custom_field_with_escaped_label() {
        let set = records();
        assert_eq!(
            resolve("keeper://Prod Login/custom_field/my\\/label", &set).unwrap(),
            Value::String("custom-value".into())
        );
    }

    #[test]
    fn base64_wrapped_notation_is_equivalent() {
        let set = records();
        let plain = "keeper://Prod Login/field/login";
        let wrapped = URL_SAFE_NO_PAD.encode(plain);
        assert_eq!(
            resolve(plain, &set).unwrap(),
            resolve(&wrapped, &set).unwrap()
        );
    }

    #[test]
    fn malformed_notation_is_rejected() {
        let set = records();
        for bad in [
            "",
            "keeper://",
            "keeper://uid",
            "keeper://uid/unknown_kind",
            "keeper://uid/field",           // missing name
            "keeper://uid/title/extra",     // scalar kind with a name
            "keeper://uid/field/url[x][y]", // non-numeric index before property
            "keeper://uid/field/url[0",     // unterminated bracket
            "keeper://uid/field/url\\q",    // unresolved escape
        ] {
            assert!(
                matches!(resolve(bad, &set), Err(NotationError::Malformed(_))),
                "expected malformed: {bad:?}"
            );
        }
    }

    #[test]
    fn out_of_range_and_missing() {
        let set = records();
        assert!(matches!(
            resolve("keeper://Prod Login/field/login[999]", &set),
            Err(NotationError::IndexOutOfRange(999))
        ));
        assert!(matches!(
            resolve("keeper://Prod Login/field/password", &set),
            Err(NotationError::FieldNotFound(_))
        ));
        assert!(matches!(
            resolve("keeper://nope/title", &set),
            Err(NotationError::RecordNotFound(_))
        ));
    }

    #[test]
    fn ambiguous_title_is_an_error() {
        let set = vec![record("uid-a", "Same"), record("uid-b", "Same")];
        assert!(matches!(
            resolve("keeper://Same/title", &set),
            Err(NotationError::AmbiguousTitle(_))
        ));
        // UID still resolves unambiguously.
        assert_eq!(
            resolve("keeper://uid-a/title", &set).unwrap(),
            Value::String("Same".into())
        );
    }

    #[test]
    fn totp_selector_generates_a_code() {
        let mut set = records();
        set[0].fields.push(RecordField {
            field_type: "oneTimeCode".into(),
            label: None,
            value: vec![Value::String(
                "otpauth://totp/x?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ".into(),
            )],
            required: None,
        });
        let code = resolve("keeper://Prod Login/totp", &set).unwrap();
        assert_eq!(code.as_str().unwrap().len(), 6);
    }
}
