//! Classification of completed responses into [`ResponseBody`] variants.
//!
//! Precedence, first match wins:
//! 1. binary media type with streaming requested
//! 2. JSON object carrying a resource locator field
//! 3. any JSON document
//! 4. [`TranscodeError`]

use reqwest::header;
use serde_json::Value;

use crate::{
    BinaryPayload, RawResponse, RedirectTarget, ResponseBody, ResponseExpectation,
    TranscodeError, TranscodeOptions,
};

pub fn transcode(
    raw: &RawResponse,
    expectation: &ResponseExpectation,
    options: &TranscodeOptions,
) -> Result<ResponseBody, TranscodeError> {
    let media_type = raw.content_type().map(media_type);

    if expectation.stream_binary {
        if let Some(media_type) = media_type.as_deref() {
            if is_binary_type(media_type, options) {
                return Ok(ResponseBody::Binary(BinaryPayload {
                    bytes: raw.body.clone(),
                    content_type: media_type.to_owned(),
                    suggested_filename: suggested_filename(raw, expectation, media_type),
                    disposition: expectation.disposition,
                }));
            }
        }
    }

    if raw.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ResponseBody::Structured(Value::Null));
    }

    match serde_json::from_slice::<Value>(&raw.body) {
        Ok(value) => Ok(match find_locator(&value, options) {
            Some(locator) => ResponseBody::Redirect(RedirectTarget { locator }),
            None => ResponseBody::Structured(value),
        }),
        Err(_) => {
            let end = raw.body.len().min(options.preview_limit);
            Err(TranscodeError {
                preview: String::from_utf8_lossy(&raw.body[..end]).into_owned(),
            })
        }
    }
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_binary_type(media_type: &str, options: &TranscodeOptions) -> bool {
    options.binary_types.iter().any(|candidate| {
        match candidate.strip_suffix('*') {
            Some(prefix) => media_type.starts_with(&prefix.to_ascii_lowercase()),
            None => candidate.eq_ignore_ascii_case(media_type),
        }
    })
}

fn find_locator(value: &Value, options: &TranscodeOptions) -> Option<String> {
    let object = value.as_object()?;
    options.locator_fields.iter().find_map(|field| {
        object
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|locator| !locator.is_empty())
            .map(str::to_owned)
    })
}

fn suggested_filename(
    raw: &RawResponse,
    expectation: &ResponseExpectation,
    media_type: &str,
) -> String {
    let extension = extension_for(media_type);
    if let Some(id) = expectation
        .resource_id
        .as_deref()
        .map(sanitize_filename)
        .filter(|id| !id.is_empty())
    {
        return format!("{id}.{extension}");
    }
    if let Some(name) = disposition_filename(raw) {
        return name;
    }
    format!("download.{extension}")
}

fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/msword" => "doc",
        other if other.contains("wordprocessingml") => "docx",
        other if other.contains("spreadsheetml") => "xlsx",
        other if other.contains("presentationml") => "pptx",
        _ => "bin",
    }
}

fn disposition_filename(raw: &RawResponse) -> Option<String> {
    let value = raw.headers.get(header::CONTENT_DISPOSITION)?.to_str().ok()?;
    let name = value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?
        .trim_matches('"');
    let name = sanitize_filename(name);
    (!name.is_empty()).then_some(name)
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches('.').to_owned()
}
