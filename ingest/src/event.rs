//! Event normalization.
//!
//! Raw client payloads are loosely structured JSON that has drifted across
//! protocol versions: interfaces go by aliases, exceptions come in three
//! shapes, timestamps are epoch numbers or ISO-8601 strings. This module
//! folds all of that into one canonical form and derives the fields the
//! rest of the pipeline works with (title, location, culprit, tags).

use crate::errors::ValidationError;
use crate::security::CspReport;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use store::types::{GroupId, ProjectId, StoredEvent};
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

pub const MAX_TITLE_LENGTH: usize = 128;
pub const MAX_CULPRIT_LENGTH: usize = 200;
pub const MAX_MESSAGE_LENGTH: usize = 8192;
pub const MAX_TAG_KEY_LENGTH: usize = 32;
pub const MAX_TAG_VALUE_LENGTH: usize = 200;

const UNLABELED_TITLE: &str = "<unlabeled event>";

/// One stack frame. Unrecognized frame fields are dropped during
/// normalization.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abs_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_app: Option<bool>,
}

impl Frame {
    /// `module in function` with filename standing in for a missing module.
    fn culprit_string(&self) -> Option<String> {
        let fileloc = self.module.as_deref().or(self.filename.as_deref())?;
        match self.function.as_deref() {
            Some(function) => Some(format!("{fileloc} in {function}")),
            None => Some(fileloc.to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Stacktrace {
    #[serde(default)]
    pub frames: Vec<Frame>,
}

/// A single exception in a chain.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExceptionValue {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
}

/// The three accepted wire shapes: `{"values": [...]}`, a bare list, or a
/// single flat exception object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExceptionData {
    Wrapped { values: Vec<ExceptionValue> },
    List(Vec<ExceptionValue>),
    Single(ExceptionValue),
}

/// Normalized exception chain, ordered oldest cause first.
#[derive(Clone, Debug)]
pub struct Exception {
    pub values: Vec<ExceptionValue>,
}

impl Exception {
    /// The outermost exception, which names the failure.
    pub fn primary(&self) -> Option<&ExceptionValue> {
        self.values.last()
    }

    /// Frames of the nearest exception that carries any.
    pub fn frames(&self) -> &[Frame] {
        self.values
            .iter()
            .rev()
            .filter_map(|value| value.stacktrace.as_ref())
            .map(|stacktrace| stacktrace.frames.as_slice())
            .find(|frames| !frames.is_empty())
            .unwrap_or(&[])
    }

    pub fn title(&self) -> Option<String> {
        let primary = self.primary()?;
        match (primary.ty.as_deref(), primary.value.as_deref()) {
            (Some(ty), Some(value)) => Some(format!("{ty}: {value}")),
            (Some(ty), None) => Some(ty.to_string()),
            (None, Some(value)) => Some(value.to_string()),
            (None, None) => None,
        }
    }

    fn to_value(&self) -> Value {
        json!({ "values": self.values })
    }
}

/// An event after normalization, ready for grouping and storage.
#[derive(Clone, Debug)]
pub struct NormalizedEvent {
    pub event_id: Uuid,
    pub project_id: ProjectId,
    pub timestamp: OffsetDateTime,
    pub received_at: OffsetDateTime,
    pub platform: Option<String>,
    pub logentry: Option<String>,
    pub exception: Option<Exception>,
    pub csp: Option<CspReport>,
    pub title: String,
    pub location: Option<String>,
    pub culprit: Option<String>,
    /// Client-supplied tags, already bounds-checked.
    pub tags: IndexMap<String, String>,
    /// Top-level keys carried through untouched.
    pub extra: Map<String, Value>,
}

impl NormalizedEvent {
    /// Builds the canonical document persisted for this event.
    pub fn to_stored(&self, group_id: GroupId) -> StoredEvent {
        let mut data = self.extra.clone();
        data.insert(
            "event_id".to_string(),
            json!(self.event_id.simple().to_string()),
        );
        data.insert("timestamp".to_string(), json!(unix_secs(self.timestamp)));
        data.insert("received".to_string(), json!(unix_secs(self.received_at)));
        data.insert("title".to_string(), json!(self.title));
        if let Some(platform) = &self.platform {
            data.insert("platform".to_string(), json!(platform));
        }
        // Culprit and location are always present, null when underivable.
        data.insert("culprit".to_string(), json!(self.culprit));
        data.insert("location".to_string(), json!(self.location));
        if let Some(formatted) = &self.logentry {
            data.insert("logentry".to_string(), json!({ "formatted": formatted }));
        }
        if let Some(exception) = &self.exception {
            data.insert("exception".to_string(), exception.to_value());
        }
        if let Some(csp) = &self.csp {
            data.insert(
                "csp".to_string(),
                serde_json::to_value(csp).expect("csp report serializes to json"),
            );
        }
        if !self.tags.is_empty() {
            let tags: Map<String, Value> = self
                .tags
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect();
            data.insert("tags".to_string(), Value::Object(tags));
        }

        StoredEvent {
            event_id: self.event_id,
            project_id: self.project_id,
            group_id,
            timestamp: self.timestamp,
            message: self.logentry.clone().unwrap_or_else(|| self.title.clone()),
            data: Value::Object(data),
        }
    }
}

enum InterfaceKind {
    Message,
    Exception,
    Stacktrace,
    Csp,
}

fn interface_for_key(key: &str) -> Option<InterfaceKind> {
    match key {
        "message" | "logentry" | "sentry.interfaces.Message" => Some(InterfaceKind::Message),
        "exception" | "sentry.interfaces.Exception" => Some(InterfaceKind::Exception),
        "stacktrace" | "sentry.interfaces.Stacktrace" => Some(InterfaceKind::Stacktrace),
        "csp" | "sentry.interfaces.Csp" => Some(InterfaceKind::Csp),
        _ => None,
    }
}

/// Interfaces we store but do not interpret.
fn is_opaque_interface(key: &str) -> bool {
    matches!(
        key,
        "sentry.interfaces.Http"
            | "sentry.interfaces.User"
            | "sentry.interfaces.Template"
            | "sentry.interfaces.Query"
            | "sentry.interfaces.Breadcrumbs"
            | "sentry.interfaces.Threads"
    )
}

/// Normalizes one decoded payload. `received_at` stands in for a missing
/// client timestamp and is recorded either way.
pub fn normalize(
    project_id: ProjectId,
    mut payload: Map<String, Value>,
    received_at: OffsetDateTime,
) -> Result<NormalizedEvent, ValidationError> {
    let event_id = take_event_id(&mut payload)?;
    let timestamp = take_timestamp(&mut payload, received_at)?;
    let platform = take_string(&mut payload, "platform");
    let explicit_culprit = take_string(&mut payload, "culprit");
    let tags = take_tags(&mut payload);

    let mut logentry = None;
    let mut exception = None;
    let mut standalone_frames: Option<Vec<Frame>> = None;
    let mut csp = None;
    let mut extra = Map::new();

    for (key, value) in payload {
        match interface_for_key(&key) {
            Some(InterfaceKind::Message) => logentry = Some(parse_message(value)?),
            Some(InterfaceKind::Exception) => exception = Some(parse_exception(value)?),
            Some(InterfaceKind::Stacktrace) => standalone_frames = Some(parse_stacktrace(value)?),
            Some(InterfaceKind::Csp) => csp = Some(CspReport::from_value(value)?),
            None if key.starts_with("sentry.interfaces.") && !is_opaque_interface(&key) => {
                return Err(ValidationError::UnknownInterface(key));
            }
            None => {
                extra.insert(key, value);
            }
        }
    }

    // Security reports have no message of their own; the synthesized one
    // becomes the log entry so the event reads like any other.
    if logentry.is_none() {
        if let Some(csp) = &csp {
            logentry = Some(csp.message());
        }
    }

    let (frame_location, frame_culprit) = {
        let frames: &[Frame] = match (&exception, &standalone_frames) {
            (Some(exception), _) if !exception.frames().is_empty() => exception.frames(),
            (_, Some(frames)) => frames.as_slice(),
            _ => &[],
        };
        derive_frame_fields(frames)
    };

    let title = if let Some(title) = exception.as_ref().and_then(Exception::title) {
        title_from(&title)
    } else if let Some(csp) = &csp {
        title_from(&csp.message())
    } else if let Some(text) = &logentry {
        title_from(text)
    } else {
        UNLABELED_TITLE.to_string()
    };

    let location = frame_location.or_else(|| csp.as_ref().map(|c| c.document_uri.clone()));
    let culprit = explicit_culprit
        .or(frame_culprit)
        .or_else(|| csp.as_ref().and_then(CspReport::culprit))
        .map(|culprit| truncate_chars(&culprit, MAX_CULPRIT_LENGTH));

    Ok(NormalizedEvent {
        event_id,
        project_id,
        timestamp,
        received_at,
        platform,
        logentry,
        exception,
        csp,
        title,
        location,
        culprit,
        tags,
        extra,
    })
}

fn take_event_id(payload: &mut Map<String, Value>) -> Result<Uuid, ValidationError> {
    match payload.remove("event_id") {
        None | Some(Value::Null) => Ok(Uuid::new_v4()),
        Some(Value::String(raw)) => {
            Uuid::parse_str(raw.trim()).map_err(|_| ValidationError::InvalidType {
                field: "event_id",
                expected: "a 32-character hexadecimal string",
            })
        }
        Some(_) => Err(ValidationError::InvalidType {
            field: "event_id",
            expected: "a 32-character hexadecimal string",
        }),
    }
}

fn invalid_timestamp() -> ValidationError {
    ValidationError::InvalidType {
        field: "timestamp",
        expected: "unix epoch seconds or an ISO-8601 datetime",
    }
}

fn take_timestamp(
    payload: &mut Map<String, Value>,
    received_at: OffsetDateTime,
) -> Result<OffsetDateTime, ValidationError> {
    match payload.remove("timestamp") {
        None | Some(Value::Null) => Ok(received_at),
        Some(Value::Number(number)) => {
            let secs = number.as_f64().ok_or_else(invalid_timestamp)?;
            parse_epoch(secs)
        }
        Some(Value::String(raw)) => parse_iso8601(raw.trim()),
        Some(_) => Err(invalid_timestamp()),
    }
}

/// Epoch seconds are rounded to microseconds; beyond that an f64 cannot
/// hold current epoch values exactly anyway.
fn parse_epoch(secs: f64) -> Result<OffsetDateTime, ValidationError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid_timestamp());
    }
    let micros = (secs * 1_000_000.0).round() as i128;
    OffsetDateTime::from_unix_timestamp_nanos(micros * 1_000).map_err(|_| invalid_timestamp())
}

const ISO_WITH_SUBSECOND: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
const ISO_PLAIN: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// Accepts RFC 3339 plus the zone-less `%Y-%m-%dT%H:%M:%S(.%f)` form many
/// SDKs emit, which is taken as UTC.
fn parse_iso8601(raw: &str) -> Result<OffsetDateTime, ValidationError> {
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(parsed);
    }
    let naive = raw.trim_end_matches('Z');
    for format in [ISO_WITH_SUBSECOND, ISO_PLAIN] {
        if let Ok(parsed) = PrimitiveDateTime::parse(naive, format) {
            return Ok(parsed.assume_utc());
        }
    }
    Err(invalid_timestamp())
}

fn take_string(payload: &mut Map<String, Value>, key: &str) -> Option<String> {
    match payload.remove(key) {
        Some(Value::String(value)) if !value.is_empty() => Some(value),
        _ => None,
    }
}

/// Tags come as a map or a list of two-element pairs. Entries that are not
/// scalar or blow the length bounds are dropped, never fatal.
fn take_tags(payload: &mut Map<String, Value>) -> IndexMap<String, String> {
    let mut tags = IndexMap::new();
    let Some(raw) = payload.remove("tags") else {
        return tags;
    };
    match raw {
        Value::Object(entries) => {
            for (key, value) in entries {
                insert_tag(&mut tags, key, value);
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                match entry {
                    Value::Array(pair) if pair.len() == 2 => {
                        let mut pair = pair.into_iter();
                        let key = pair.next().and_then(scalar_to_string);
                        let value = pair.next();
                        if let (Some(key), Some(value)) = (key, value) {
                            insert_tag(&mut tags, key, value);
                        }
                    }
                    other => {
                        tracing::warn!(entry = %other, "discarding malformed tag entry");
                    }
                }
            }
        }
        other => {
            tracing::warn!(tags = %other, "discarding non-collection tags attribute");
        }
    }
    tags
}

fn insert_tag(tags: &mut IndexMap<String, String>, key: String, value: Value) {
    let Some(value) = scalar_to_string(value) else {
        tracing::warn!(%key, "discarding tag with non-scalar value");
        return;
    };
    if key.is_empty() || value.is_empty() {
        return;
    }
    if key.chars().count() > MAX_TAG_KEY_LENGTH {
        tracing::warn!(%key, "discarding oversized tag key");
        return;
    }
    if value.chars().count() > MAX_TAG_VALUE_LENGTH {
        tracing::warn!(%key, "discarding oversized tag value");
        return;
    }
    tags.insert(key, value);
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

fn parse_message(value: Value) -> Result<String, ValidationError> {
    let text = match value {
        Value::String(text) => text,
        Value::Object(entries) => entries
            .get("formatted")
            .or_else(|| entries.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ValidationError::MissingRequiredField("logentry.formatted"))?,
        _ => {
            return Err(ValidationError::InvalidType {
                field: "message",
                expected: "a string or a message object",
            });
        }
    };
    Ok(truncate_chars(&text, MAX_MESSAGE_LENGTH))
}

fn parse_exception(value: Value) -> Result<Exception, ValidationError> {
    let data: ExceptionData =
        serde_json::from_value(value).map_err(|_| ValidationError::InvalidType {
            field: "exception",
            expected: "an exception object or a list of them",
        })?;
    let values = match data {
        ExceptionData::Wrapped { values } => values,
        ExceptionData::List(values) => values,
        ExceptionData::Single(value) => vec![value],
    };
    if values.is_empty()
        || values
            .iter()
            .any(|value| value.ty.is_none() && value.value.is_none())
    {
        return Err(ValidationError::MissingRequiredField("exception.type"));
    }
    Ok(Exception { values })
}

fn parse_stacktrace(value: Value) -> Result<Vec<Frame>, ValidationError> {
    let stacktrace: Stacktrace =
        serde_json::from_value(value).map_err(|_| ValidationError::InvalidType {
            field: "stacktrace",
            expected: "an object with a frames list",
        })?;
    Ok(stacktrace.frames)
}

/// Location is the filename of the last frame; the culprit prefers the
/// last application frame and falls back to the last frame outright.
fn derive_frame_fields(frames: &[Frame]) -> (Option<String>, Option<String>) {
    let location = frames.last().and_then(|frame| frame.filename.clone());
    let culprit = frames
        .iter()
        .rev()
        .find(|frame| frame.in_app.unwrap_or(false))
        .or_else(|| frames.last())
        .and_then(Frame::culprit_string);
    (location, culprit)
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(limit.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

fn title_from(text: &str) -> String {
    truncate_chars(text.lines().next().unwrap_or(""), MAX_TITLE_LENGTH)
}

fn unix_secs(timestamp: OffsetDateTime) -> f64 {
    timestamp.unix_timestamp() as f64 + f64::from(timestamp.microsecond()) / 1_000_000.0
}
