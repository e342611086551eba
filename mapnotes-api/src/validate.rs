//! Schema validation of untrusted structured input.
//!
//! A [`Schema`] maps field names to either a regular-expression test or a
//! nested schema, each field marked required or optional. Validation walks
//! the fields in declaration order, depth-first, left-to-right, and
//! short-circuits at the first offending field with a human-readable error
//! string. On success it returns a stripped copy of the input holding only
//! the schema-declared fields.
//!
//! Both the request-response and the event entry points validate through
//! this module, so the whole system has a single validation semantics.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

/// A failed validation, carrying the exact message reported to the client.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    pub fn missing(field: &str) -> ValidationError {
        ValidationError(format!("Error: missing field: {field}"))
    }

    pub fn invalid(field: &str) -> ValidationError {
        ValidationError(format!("Error: Please provide a valid {field}"))
    }

    pub fn too_long(field: &str) -> ValidationError {
        ValidationError(format!("Error: {field} exceeds maximum character length."))
    }

    pub fn illegal_char(field: &str, c: char) -> ValidationError {
        ValidationError(format!("Error: illegal character \"{c}\" in {field}."))
    }

    /// Appends the 1-based position of the array element that failed.
    fn at_index(self, idx: usize) -> ValidationError {
        ValidationError(format!("{} (At index {})", self.0, idx + 1))
    }
}

/// One entry of a schema: a pattern test or a nested group of fields.
#[derive(Clone, Debug)]
pub enum SchemaNode {
    Pattern(Regex),
    Group(Schema),
}

impl SchemaNode {
    /// Builds a pattern node. `src` must not be anchored: the length check
    /// works by repeatedly re-applying the pattern from the front of the
    /// value, so `^...$` anchors would defeat it.
    pub fn pattern(src: &str) -> SchemaNode {
        // Counted repetition of a unicode class, as in the content pattern,
        // compiles past the crate's default 10 MB size limit
        let re = RegexBuilder::new(src)
            .size_limit(1 << 28)
            .build()
            .expect("schema pattern must be a valid regex");
        SchemaNode::Pattern(re)
    }

    pub fn group(schema: Schema) -> SchemaNode {
        SchemaNode::Group(schema)
    }

    /// Checks `value` against this node and returns the accepted (stripped,
    /// for groups) copy. Arrays are checked per element, 1-based index
    /// appended on failure at the level that caught it.
    fn accept(&self, name: &str, value: &Value) -> Result<Value, ValidationError> {
        match (self, value) {
            (SchemaNode::Group(schema), Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let fields = schema.validate(item).map_err(|e| e.at_index(i))?;
                    out.push(Value::Object(fields));
                }
                Ok(Value::Array(out))
            }
            (SchemaNode::Group(schema), v) => Ok(Value::Object(schema.validate(v)?)),
            (SchemaNode::Pattern(re), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    match_scalar(name, re, item).map_err(|e| e.at_index(i))?;
                }
                Ok(value.clone())
            }
            (SchemaNode::Pattern(re), v) => {
                match_scalar(name, re, v)?;
                Ok(value.clone())
            }
        }
    }
}

#[derive(Clone, Debug)]
struct SchemaField {
    name: String,
    required: bool,
    node: SchemaNode,
}

/// An ordered set of named field tests. Fields are validated in declaration
/// order; that order is stable and decides which field a failure names when
/// several are bad.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    fields: Vec<SchemaField>,
}

impl Schema {
    pub fn new() -> Schema {
        Schema { fields: Vec::new() }
    }

    pub fn required(mut self, name: &str, node: SchemaNode) -> Schema {
        self.fields.push(SchemaField {
            name: name.to_string(),
            required: true,
            node,
        });
        self
    }

    pub fn optional(mut self, name: &str, node: SchemaNode) -> Schema {
        self.fields.push(SchemaField {
            name: name.to_string(),
            required: false,
            node,
        });
        self
    }

    /// Validates `input`, returning the stripped-down trusted copy or the
    /// first failure. Pure function of its inputs.
    ///
    /// A field counts as absent when the key is missing, the value is JSON
    /// null, an empty string, or an empty array. Absent required fields
    /// fail; absent optional fields come back as the empty string and are
    /// not validated further.
    pub fn validate(&self, input: &Value) -> Result<Map<String, Value>, ValidationError> {
        let mut out = Map::new();
        for field in &self.fields {
            match input.get(&field.name) {
                Some(v) if !is_absent(v) => {
                    let accepted = field.node.accept(&field.name, v)?;
                    out.insert(field.name.clone(), accepted);
                }
                _ if field.required => return Err(ValidationError::missing(&field.name)),
                _ => {
                    out.insert(field.name.clone(), Value::String(String::new()));
                }
            }
        }
        Ok(out)
    }
}

fn is_absent(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Canonical text rendering of a scalar for pattern matching. Numbers and
/// booleans match through their usual rendering; objects and arrays have
/// none and never match a pattern.
fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::from("null")),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// The scalar match rule. Carves `value` from the front by repeated
/// application of the pattern:
/// - no piece matches at the front at all: not a valid `<name>`;
/// - the carving consumes the whole value in one piece: accepted;
/// - the whole value is consumed but in more than one piece: syntactically
///   valid in chunks, too long as a whole;
/// - the carving stops early: the first unconsumed character is illegal.
fn match_scalar(name: &str, re: &Regex, value: &Value) -> Result<(), ValidationError> {
    let text = match scalar_text(value) {
        Some(t) => t,
        None => return Err(ValidationError::invalid(name)),
    };
    let mut pos = 0;
    let mut pieces = 0usize;
    while pos < text.len() {
        match re.find(&text[pos..]) {
            Some(m) if m.start() == 0 && m.end() > 0 => {
                pos += m.end();
                pieces += 1;
            }
            _ => break,
        }
    }
    if pieces == 0 {
        return Err(ValidationError::invalid(name));
    }
    if pos < text.len() {
        // pos sits on a match boundary, so this is always a char boundary
        if let Some(c) = text[pos..].chars().next() {
            return Err(ValidationError::illegal_char(name, c));
        }
    }
    if pieces > 1 {
        return Err(ValidationError::too_long(name));
    }
    Ok(())
}

const TEXT_CLASS: &str = r#"[\w\s.,:;!?'"()\[\]/@&+*=-]"#;

lazy_static! {
    /// Wire schema for `postComment` payloads. Replies omit the canvas
    /// anchor, so `x` and `y` are optional; `replyId` admits the literal
    /// `null` for top-level comments.
    pub static ref COMMENT_SCHEMA: Schema = Schema::new()
        .required("content", SchemaNode::pattern(&format!("{TEXT_CLASS}{{1,500}}")))
        .optional("x", SchemaNode::pattern(r"\d{1,4}"))
        .optional("y", SchemaNode::pattern(r"\d{1,4}"))
        .required("userId", SchemaNode::pattern(r"\d{1,9}"))
        .required("commentsessionId", SchemaNode::pattern(r"\d{1,9}"))
        .optional("replyId", SchemaNode::pattern(r"-?\d{1,9}|null"));

    /// Wire schema for `saveSession` payloads. `id` may be the `-1`
    /// placeholder of a not-yet-persisted session.
    pub static ref SESSION_SCHEMA: Schema = Schema::new()
        .required("id", SchemaNode::pattern(r"-?\d{1,9}"))
        .required("mapId", SchemaNode::pattern(r"\d{1,9}"))
        .required("name", SchemaNode::pattern(&format!("{TEXT_CLASS}{{1,50}}")))
        .required("start", SchemaNode::pattern(DATE_TIME))
        .required("expires", SchemaNode::pattern(DATE_TIME));
}

const DATE_TIME: &str = r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(:\d{2}(\.\d{1,9})?)?(Z|[+-]\d{2}:?\d{2})?";
