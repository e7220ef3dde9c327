//! # event: trigger payload classification
//!
//! Turns the raw trigger payload into a [`ParsedEvent`]. Detection is ordered,
//! first match wins:
//!
//! 1. non-mapping payloads are parsed as JSON text, and anything that still is
//!    not a mapping is an unknown event;
//! 2. HTTP gateway requests (`httpMethod`), whose body is reclassified when it
//!    is JSON;
//! 3. dCache notifications (`event` + `subscription`);
//! 4. Rucio notifications (`event_type` + `payload.scope`);
//! 5. delegated envelopes (`event`), carrying an optional `storage_provider`
//!    hint;
//! 6. storage notifications (`Records[0].eventSource`);
//! 7. everything else is unknown.
//!
//! [`classify`] never fails: classification problems are logged as warnings and
//! the payload becomes an unknown event. [`try_classify`] surfaces them.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::auth::ProviderType;
use crate::error::{Result, SupervisorError};

/// Which producer dialect the payload was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    ApiGateway,
    S3,
    Minio,
    DCache,
    Rucio,
    Onedata,
    Unknown,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::ApiGateway => "APIGATEWAY",
            Provenance::S3 => "S3",
            Provenance::Minio => "MINIO",
            Provenance::DCache => "DCACHE",
            Provenance::Rucio => "RUCIO",
            Provenance::Onedata => "ONEDATA",
            Provenance::Unknown => "UNKNOWN",
        }
    }

    /// Storage provider that serves objects of this provenance, if any.
    pub fn provider_type(&self) -> Option<ProviderType> {
        match self {
            Provenance::S3 => Some(ProviderType::S3),
            Provenance::Minio => Some(ProviderType::Minio),
            Provenance::Onedata => Some(ProviderType::Onedata),
            Provenance::DCache => Some(ProviderType::Webdav),
            Provenance::ApiGateway | Provenance::Rucio | Provenance::Unknown => None,
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Provenance::S3 | Provenance::Minio | Provenance::Onedata | Provenance::DCache | Provenance::Rucio
        )
    }
}

impl Serialize for Provenance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The payload as received, kept for persisting non-storage events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "content", rename_all = "lowercase")]
pub enum RawPayload {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl RawPayload {
    /// Bytes written when the payload itself is the input file. Text and
    /// binary payloads are written byte for byte.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(match self {
            RawPayload::Json(value) => serde_json::to_vec(value)?,
            RawPayload::Text(text) => text.clone().into_bytes(),
            RawPayload::Binary(bytes) => bytes.clone(),
        })
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            RawPayload::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// A classified trigger. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedEvent {
    pub provenance: Provenance,
    pub raw: RawPayload,
    pub object_key: Option<String>,
    pub display_name: Option<String>,
    pub container_id: Option<String>,
    pub event_time: Option<String>,
    pub auth_hint: Option<String>,
    pub token: Option<String>,
}

impl ParsedEvent {
    pub fn unknown(raw: RawPayload) -> Self {
        Self {
            provenance: Provenance::Unknown,
            raw,
            object_key: None,
            display_name: None,
            container_id: None,
            event_time: None,
            auth_hint: None,
            token: None,
        }
    }

    fn storage(provenance: Provenance, raw: Value, object_key: String) -> Self {
        let display_name = Some(base_name(&object_key).to_string());
        Self {
            provenance,
            raw: RawPayload::Json(raw),
            object_key: Some(object_key),
            display_name,
            container_id: None,
            event_time: None,
            auth_hint: None,
            token: None,
        }
    }

    pub fn is_storage_event(&self) -> bool {
        self.provenance.is_storage() && self.object_key.is_some()
    }

    /// Copy of the event with `prefix` joined in front of the object key.
    pub fn rebased(&self, prefix: &str) -> ParsedEvent {
        let mut event = self.clone();
        if let Some(key) = &self.object_key {
            let prefix = prefix.trim_end_matches('/');
            let key = key.trim_start_matches('/');
            event.object_key = Some(if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}/{key}")
            });
        }
        event
    }

    /// Variables describing a storage trigger to the workload.
    pub fn workload_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if !self.is_storage_event() {
            return env;
        }
        if let Some(key) = &self.object_key {
            env.insert("STORAGE_OBJECT_KEY".to_string(), key.clone());
        }
        if let Some(time) = &self.event_time {
            env.insert("EVENT_TIME".to_string(), time.clone());
        }
        if let Some(envelope @ Value::Object(_)) = self.raw.as_json() {
            env.insert("EVENT".to_string(), envelope.to_string());
        }
        env
    }
}

/// Result of classifying one payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub event: ParsedEvent,
    /// Query parameters of an HTTP gateway request.
    pub request_params: BTreeMap<String, String>,
}

impl Classification {
    /// Variables exported to the workload: `CONT_VAR_<param>` for each request
    /// parameter plus the storage event variables.
    pub fn workload_env(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = self
            .request_params
            .iter()
            .map(|(k, v)| (format!("CONT_VAR_{k}"), v.clone()))
            .collect();
        env.extend(self.event.workload_env());
        env
    }
}

/// Classifies a payload, downgrading classification failures to an unknown
/// event. Gateway query parameters collected before the failure are kept.
pub fn classify(payload: Value) -> Classification {
    let mut request_params = BTreeMap::new();
    let event = match classify_into(payload.clone(), &mut request_params) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Event classification failed, treating payload as unknown");
            let raw = match payload {
                Value::String(text) => RawPayload::Text(text),
                other => RawPayload::Json(other),
            };
            ParsedEvent::unknown(raw)
        }
    };
    Classification {
        event,
        request_params,
    }
}

/// Classifies payload text. Text that is not JSON is an unknown event kept
/// verbatim.
pub fn classify_str(text: &str) -> Classification {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => classify(Value::Object(map)),
        _ => {
            info!("Payload is not a JSON object, treating it as an unknown event");
            Classification {
                event: ParsedEvent::unknown(RawPayload::Text(text.to_string())),
                request_params: BTreeMap::new(),
            }
        }
    }
}

/// Classifies a payload as received on the wire. Bytes that are not UTF-8
/// are an unknown event persisted byte for byte.
pub fn classify_bytes(bytes: &[u8]) -> Classification {
    match std::str::from_utf8(bytes) {
        Ok(text) => classify_str(text),
        Err(_) => {
            info!(len = bytes.len(), "Payload is not UTF-8, treating it as an unknown event");
            Classification {
                event: ParsedEvent::unknown(RawPayload::Binary(bytes.to_vec())),
                request_params: BTreeMap::new(),
            }
        }
    }
}

/// Strict classification: unknown `eventSource` tags and malformed dialect
/// payloads are returned as errors.
pub fn try_classify(payload: Value) -> Result<Classification> {
    let mut request_params = BTreeMap::new();
    let event = classify_into(payload, &mut request_params)?;
    Ok(Classification {
        event,
        request_params,
    })
}

fn classify_into(payload: Value, params: &mut BTreeMap<String, String>) -> Result<ParsedEvent> {
    let event = classify_value(payload, None, false, params)?;
    info!(
        provenance = event.provenance.as_str(),
        object_key = ?event.object_key,
        "Event classified"
    );
    Ok(event)
}

fn classify_value(
    payload: Value,
    hint: Option<String>,
    inside_gateway: bool,
    params: &mut BTreeMap<String, String>,
) -> Result<ParsedEvent> {
    let map = match payload {
        Value::Object(map) => map,
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => return Ok(ParsedEvent::unknown(RawPayload::Text(text))),
        },
        other => return Ok(ParsedEvent::unknown(RawPayload::Json(other))),
    };

    if !inside_gateway && map.contains_key("httpMethod") {
        debug!("Classifying HTTP gateway request");
        return classify_gateway(map, hint, params);
    }
    if map.contains_key("event") && map.contains_key("subscription") {
        return classify_dcache(map, hint);
    }
    if map.contains_key("event_type") && nested(&map, &["payload", "scope"]).is_some() {
        return classify_rucio(map, hint);
    }
    if map.contains_key("event") {
        let hint = map
            .get("storage_provider")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(hint);
        debug!(hint = ?hint, "Unwrapping delegated event");
        let inner = map.get("event").cloned().unwrap_or(Value::Null);
        return classify_value(inner, hint, inside_gateway, params);
    }
    if let Some(source) = nested(&map, &["Records", "0", "eventSource"]).and_then(Value::as_str) {
        let source = source.to_string();
        let mut event = match source.as_str() {
            "aws:s3" => classify_object_storage(Provenance::S3, map)?,
            "minio:s3" => classify_object_storage(Provenance::Minio, map)?,
            "OneTrigger" => classify_onedata(map)?,
            _ => {
                return Err(SupervisorError::UnknownStorageEvent { source_tag: source });
            }
        };
        event.auth_hint = hint;
        return Ok(event);
    }
    Ok(ParsedEvent::unknown(RawPayload::Json(Value::Object(map))))
}

fn classify_gateway(
    map: Map<String, Value>,
    hint: Option<String>,
    params: &mut BTreeMap<String, String>,
) -> Result<ParsedEvent> {
    if let Some(Value::Object(query)) = map.get("queryStringParameters") {
        for (k, v) in query {
            let value = match v {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            params.insert(k.clone(), value);
        }
    }
    let content_type = header(&map, "content-type");
    let is_base64 = map
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let raw = match map.get("body") {
        Some(Value::Object(body)) => {
            return classify_value(Value::Object(body.clone()), hint, true, params);
        }
        Some(Value::String(body)) => {
            let json_like = content_type.map_or(true, |ct| ct.contains("json"));
            if json_like && !is_base64 {
                if let Ok(Value::Object(body)) = serde_json::from_str::<Value>(body) {
                    return classify_value(Value::Object(body), hint, true, params);
                }
            }
            decode_gateway_body(body, is_base64, content_type)
        }
        Some(Value::Null) | None => RawPayload::Text(String::new()),
        Some(other) => RawPayload::Json(other.clone()),
    };
    Ok(ParsedEvent {
        provenance: Provenance::ApiGateway,
        raw,
        object_key: None,
        display_name: None,
        container_id: None,
        event_time: None,
        auth_hint: hint,
        token: None,
    })
}

/// Gateway bodies flagged `isBase64Encoded`, or bodies of a non-textual
/// content type that decode as base64, are persisted decoded.
fn decode_gateway_body(body: &str, is_base64: bool, content_type: Option<&str>) -> RawPayload {
    if is_base64 || !is_textual(content_type) {
        if let Ok(bytes) = STANDARD.decode(body.trim()) {
            return RawPayload::Binary(bytes);
        }
        if is_base64 {
            warn!("Body flagged as base64 does not decode, keeping it verbatim");
        }
    }
    RawPayload::Text(body.to_string())
}

fn is_textual(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let ct = ct.to_ascii_lowercase();
    ct.starts_with("text/")
        || ct.contains("json")
        || ct.contains("xml")
        || ct.contains("x-www-form-urlencoded")
}

fn header<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    let headers = map.get("headers")?.as_object()?;
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_str())
}

fn classify_dcache(map: Map<String, Value>, hint: Option<String>) -> Result<ParsedEvent> {
    let name = nested(&map, &["event", "name"])
        .and_then(Value::as_str)
        .ok_or_else(|| SupervisorError::malformed("dCache", "missing event.name"))?
        .to_string();
    let mut event = ParsedEvent::storage(Provenance::DCache, Value::Object(map), name);
    event.auth_hint = hint;
    Ok(event)
}

fn classify_rucio(map: Map<String, Value>, hint: Option<String>) -> Result<ParsedEvent> {
    let name = nested(&map, &["payload", "name"])
        .and_then(Value::as_str)
        .ok_or_else(|| SupervisorError::malformed("Rucio", "missing payload.name"))?
        .to_string();
    let scope = nested(&map, &["payload", "scope"])
        .and_then(Value::as_str)
        .map(str::to_string);
    let token = nested(&map, &["payload", "token"])
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut event = ParsedEvent::storage(Provenance::Rucio, Value::Object(map), name);
    event.container_id = scope;
    event.token = token;
    event.auth_hint = hint;
    Ok(event)
}

fn classify_object_storage(provenance: Provenance, map: Map<String, Value>) -> Result<ParsedEvent> {
    let dialect = provenance.as_str();
    let record = nested(&map, &["Records", "0"])
        .ok_or_else(|| SupervisorError::malformed(dialect, "empty Records"))?;
    let key = nested_value(record, &["s3", "object", "key"])
        .and_then(Value::as_str)
        .ok_or_else(|| SupervisorError::malformed(dialect, "missing s3.object.key"))?;
    let key = unquote_plus(key);
    let bucket = nested_value(record, &["s3", "bucket", "name"])
        .and_then(Value::as_str)
        .ok_or_else(|| SupervisorError::malformed(dialect, "missing s3.bucket.name"))?
        .to_string();
    let event_time = record
        .get("eventTime")
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut event = ParsedEvent::storage(provenance, Value::Object(map), key);
    event.container_id = Some(bucket);
    event.event_time = event_time;
    Ok(event)
}

fn classify_onedata(map: Map<String, Value>) -> Result<ParsedEvent> {
    let key = map
        .get("Key")
        .and_then(Value::as_str)
        .ok_or_else(|| SupervisorError::malformed("Onedata", "missing Key"))?
        .to_string();
    let display_name = nested(&map, &["Records", "0", "objectKey"])
        .and_then(Value::as_str)
        .map(str::to_string);
    let event_time = nested(&map, &["Records", "0", "eventTime"])
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut event = ParsedEvent::storage(Provenance::Onedata, Value::Object(map), key);
    if display_name.is_some() {
        event.display_name = display_name;
    }
    event.event_time = event_time;
    Ok(event)
}

/// Walks object keys and array indices.
fn nested<'a>(map: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    nested_value(map.get(*first)?, rest)
}

fn nested_value<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(obj) => obj.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// URL-decoding where `+` stands for a space.
pub fn unquote_plus(text: &str) -> String {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Final path segment of an object key.
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unquote_plus_decodes_spaces_and_escapes() {
        assert_eq!(unquote_plus("input/my+file%281%29.txt"), "input/my file(1).txt");
        assert_eq!(unquote_plus("plain.png"), "plain.png");
    }

    #[test]
    fn base_name_takes_last_segment() {
        assert_eq!(base_name("bucket/input/img.png"), "img.png");
        assert_eq!(base_name("img.png"), "img.png");
    }

    #[test]
    fn non_json_text_is_unknown_and_verbatim() {
        let c = classify_str("hello, world\n");
        assert_eq!(c.event.provenance, Provenance::Unknown);
        assert_eq!(c.event.raw, RawPayload::Text("hello, world\n".into()));
    }

    #[test]
    fn json_string_value_is_parsed() {
        let inner = json!({"Records": [{"eventSource": "minio:s3", "s3": {"object": {"key": "k"}, "bucket": {"name": "b"}}}]});
        let c = classify(Value::String(inner.to_string()));
        assert_eq!(c.event.provenance, Provenance::Minio);
        assert_eq!(c.event.container_id.as_deref(), Some("b"));
    }

    #[test]
    fn unknown_event_source_is_a_warning() {
        let payload = json!({"Records": [{"eventSource": "narnia:s3"}]});
        let err = try_classify(payload.clone()).unwrap_err();
        assert!(err.is_warning());
        let c = classify(payload.clone());
        assert_eq!(c.event.provenance, Provenance::Unknown);
        assert_eq!(c.event.raw, RawPayload::Json(payload));
    }

    #[test]
    fn gateway_query_params_become_container_vars() {
        let payload = json!({
            "httpMethod": "POST",
            "headers": {"Content-Type": "text/plain"},
            "queryStringParameters": {"mode": "fast", "n": 3, "skip": null},
            "body": "plain words"
        });
        let c = classify(payload);
        assert_eq!(c.event.provenance, Provenance::ApiGateway);
        assert_eq!(c.event.raw, RawPayload::Text("plain words".into()));
        let env = c.workload_env();
        assert_eq!(env.get("CONT_VAR_mode").map(String::as_str), Some("fast"));
        assert_eq!(env.get("CONT_VAR_n").map(String::as_str), Some("3"));
        assert!(!env.contains_key("CONT_VAR_skip"));
    }

    #[test]
    fn downgraded_gateway_keeps_query_params() {
        let payload = json!({
            "httpMethod": "POST",
            "queryStringParameters": {"mode": "fast"},
            "body": {"Records": [{"eventSource": "gcs:storage"}]}
        });
        assert!(try_classify(payload.clone()).is_err());
        let c = classify(payload);
        assert_eq!(c.event.provenance, Provenance::Unknown);
        assert_eq!(
            c.workload_env().get("CONT_VAR_mode").map(String::as_str),
            Some("fast")
        );
    }

    #[test]
    fn non_utf8_bytes_are_unknown_binary() {
        let bytes = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0xff, 0xfe];
        let c = classify_bytes(&bytes);
        assert_eq!(c.event.provenance, Provenance::Unknown);
        assert_eq!(c.event.raw.to_bytes().unwrap(), bytes.to_vec());

        let c = classify_bytes(br#"{"Records": [{"eventSource": "aws:s3", "s3": {"object": {"key": "k"}, "bucket": {"name": "b"}}}]}"#);
        assert_eq!(c.event.provenance, Provenance::S3);
    }

    #[test]
    fn gateway_binary_body_is_decoded() {
        let payload = json!({
            "httpMethod": "POST",
            "headers": {"content-type": "application/octet-stream"},
            "body": "aXQgd29ya3Mh"
        });
        let c = classify(payload);
        assert_eq!(c.event.raw, RawPayload::Binary(b"it works!".to_vec()));
    }

    #[test]
    fn rebased_joins_prefix() {
        let event = ParsedEvent::storage(Provenance::DCache, json!({}), "/file.txt".into());
        let rebased = event.rebased("/pnfs/data/");
        assert_eq!(rebased.object_key.as_deref(), Some("/pnfs/data/file.txt"));
        assert_eq!(event.object_key.as_deref(), Some("/file.txt"));
    }

    #[test]
    fn storage_events_export_key_and_time() {
        let payload = json!({"Records": [{
            "eventSource": "aws:s3",
            "eventTime": "2019-03-21T11:22:32.000Z",
            "s3": {"object": {"key": "input/a+b.jpg"}, "bucket": {"name": "bkt"}}
        }]});
        let env = classify(payload).workload_env();
        assert_eq!(env["STORAGE_OBJECT_KEY"], "input/a b.jpg");
        assert_eq!(env["EVENT_TIME"], "2019-03-21T11:22:32.000Z");
        assert!(env["EVENT"].contains("aws:s3"));
    }
}
