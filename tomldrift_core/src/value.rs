use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while converting a decoder's success payload into a
/// [`CanonicalValue`].
///
/// These indicate a malformed payload from a decoder that claimed success.
/// They are harness-level failures, not findings about the decoder's TOML
/// handling, and callers treat them as fatal.
#[derive(Error, Debug)]
pub enum ValueError {
    /// A tagged scalar carried a `type` tag this harness does not know.
    #[error("unknown scalar type tag {0:?}")]
    UnknownTypeTag(String),

    /// A tagged scalar's `value` field could not be parsed for its tag.
    #[error("cannot parse {text:?} as {kind}: {detail}")]
    BadScalar {
        kind: &'static str,
        text: String,
        detail: String,
    },

    /// The interchange payload contained a JSON node that has no place in
    /// the tagged encoding (e.g. a bare JSON number or null).
    #[error("unexpected {0} node in tagged interchange payload")]
    UnexpectedNode(&'static str),
}

/// Sub-variant of a TOML date-time value.
///
/// Two date-times are only comparable when their sub-variants match; an
/// offset date-time is never equal to a local one even if the digits agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatetimeKind {
    /// Full date and time with a zone offset.
    Offset,
    /// Full date and time, no offset.
    LocalDatetime,
    /// Date only.
    LocalDate,
    /// Time only.
    LocalTime,
}

impl DatetimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatetimeKind::Offset => "datetime",
            DatetimeKind::LocalDatetime => "datetime-local",
            DatetimeKind::LocalDate => "date-local",
            DatetimeKind::LocalTime => "time-local",
        }
    }
}

/// The harness's format-agnostic tree representation of a decoded document.
///
/// Both decoders' outputs are converted into this type before comparison, so
/// the comparator never sees surface formatting (literal base, key order,
/// quoting style) — only resolved values.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    /// Normalized date-time text plus its sub-variant. Normalization
    /// uppercases the `T`/`Z` markers and replaces the space separator, so
    /// textual freedom the format allows does not show up as a divergence.
    Datetime {
        kind: DatetimeKind,
        text: String,
    },
    /// Order-significant sequence.
    Seq(Vec<CanonicalValue>),
    /// String-keyed mapping; key order is never significant, which the
    /// BTreeMap makes structural.
    Table(BTreeMap<String, CanonicalValue>),
}

impl CanonicalValue {
    /// Short kind name used in mismatch descriptions.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CanonicalValue::Bool(_) => "bool",
            CanonicalValue::Integer(_) => "integer",
            CanonicalValue::Float(_) => "float",
            CanonicalValue::Str(_) => "string",
            CanonicalValue::Datetime { kind, .. } => kind.as_str(),
            CanonicalValue::Seq(_) => "array",
            CanonicalValue::Table(_) => "table",
        }
    }

    /// Decodes the tagged interchange encoding used by toml-test style
    /// decoders: scalars are objects with exactly the string keys `type`
    /// and `value`, any other object is a table, arrays are sequences.
    pub fn from_tagged_json(json: &JsonValue) -> Result<Self, ValueError> {
        match json {
            JsonValue::Object(map) => {
                if let (Some(JsonValue::String(tag)), Some(JsonValue::String(text)), 2) =
                    (map.get("type"), map.get("value"), map.len())
                {
                    return Self::from_tagged_scalar(tag, text);
                }
                let mut table = BTreeMap::new();
                for (key, child) in map {
                    table.insert(key.clone(), Self::from_tagged_json(child)?);
                }
                Ok(CanonicalValue::Table(table))
            }
            JsonValue::Array(items) => {
                let seq = items
                    .iter()
                    .map(Self::from_tagged_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CanonicalValue::Seq(seq))
            }
            JsonValue::Null => Err(ValueError::UnexpectedNode("null")),
            JsonValue::Bool(_) => Err(ValueError::UnexpectedNode("bool")),
            JsonValue::Number(_) => Err(ValueError::UnexpectedNode("number")),
            // A bare string outside a tagged wrapper has no meaning in the
            // interchange encoding.
            JsonValue::String(_) => Err(ValueError::UnexpectedNode("string")),
        }
    }

    fn from_tagged_scalar(tag: &str, text: &str) -> Result<Self, ValueError> {
        match tag {
            "bool" => match text {
                "true" => Ok(CanonicalValue::Bool(true)),
                "false" => Ok(CanonicalValue::Bool(false)),
                other => Err(ValueError::BadScalar {
                    kind: "bool",
                    text: other.to_string(),
                    detail: "expected \"true\" or \"false\"".to_string(),
                }),
            },
            "integer" => text
                .parse::<i64>()
                .map(CanonicalValue::Integer)
                .map_err(|e| ValueError::BadScalar {
                    kind: "integer",
                    text: text.to_string(),
                    detail: e.to_string(),
                }),
            "float" => parse_float(text).map(CanonicalValue::Float).ok_or_else(|| {
                ValueError::BadScalar {
                    kind: "float",
                    text: text.to_string(),
                    detail: "not a valid float literal".to_string(),
                }
            }),
            "string" => Ok(CanonicalValue::Str(text.to_string())),
            "datetime" => Ok(Self::datetime(DatetimeKind::Offset, text)),
            "datetime-local" => Ok(Self::datetime(DatetimeKind::LocalDatetime, text)),
            "date-local" => Ok(Self::datetime(DatetimeKind::LocalDate, text)),
            "time-local" => Ok(Self::datetime(DatetimeKind::LocalTime, text)),
            other => Err(ValueError::UnknownTypeTag(other.to_string())),
        }
    }

    /// Converts a re-parsed native document (round-trip mode) into the
    /// canonical tree. Datetime sub-variants are classified by which
    /// components the parsed value carries.
    pub fn from_toml(value: &toml::Value) -> Self {
        match value {
            toml::Value::Boolean(b) => CanonicalValue::Bool(*b),
            toml::Value::Integer(i) => CanonicalValue::Integer(*i),
            toml::Value::Float(f) => CanonicalValue::Float(*f),
            toml::Value::String(s) => CanonicalValue::Str(s.clone()),
            toml::Value::Datetime(dt) => {
                let kind = match (dt.date.is_some(), dt.time.is_some(), dt.offset.is_some()) {
                    (true, _, true) => DatetimeKind::Offset,
                    (true, true, false) => DatetimeKind::LocalDatetime,
                    (true, false, false) => DatetimeKind::LocalDate,
                    _ => DatetimeKind::LocalTime,
                };
                Self::datetime(kind, &dt.to_string())
            }
            toml::Value::Array(items) => {
                CanonicalValue::Seq(items.iter().map(Self::from_toml).collect())
            }
            toml::Value::Table(table) => CanonicalValue::Table(
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_toml(v)))
                    .collect(),
            ),
        }
    }

    fn datetime(kind: DatetimeKind, text: &str) -> Self {
        CanonicalValue::Datetime {
            kind,
            text: normalize_datetime(text),
        }
    }
}

/// Parses a float in the format's literal vocabulary, including the special
/// keyword forms. Sign on `nan` is preserved by `f64` parsing but the
/// comparator ignores it.
fn parse_float(text: &str) -> Option<f64> {
    match text {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        other => other.parse::<f64>().ok(),
    }
}

/// Normalizes the representational freedom RFC 3339 / TOML allows in
/// date-time text: a space separator becomes `T`, and `t`/`z` markers are
/// uppercased. Numeric offsets are left untouched, so `+00:00` and `Z`
/// remain distinct: offsets denoting the same instant via different zone
/// notation compare unequal.
fn normalize_datetime(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            ' ' | 't' => 'T',
            'z' => 'Z',
            other => other,
        })
        .collect()
}
