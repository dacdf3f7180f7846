//! Early-embed resolution for streamed text.
//!
//! Markers look like `[[TYPE]]` or `[[TYPE:body]]`. Early types are resolved
//! here, before text leaves the agent:
//!
//! | type       | effect                                                  |
//! |------------|---------------------------------------------------------|
//! | `STATUS`   | removed from text, emitted as a status signal           |
//! | `ARTIFACT` | removed from text, emitted as an artifact-return signal |
//! | `UUID`     | replaced by a fresh v4 uuid                             |
//! | `DATETIME` | replaced by the current UTC time (strftime body)        |
//!
//! Anything else passes through verbatim. Text from the first unclosed `[[`
//! (or a trailing lone `[`) onwards is left unprocessed so a marker split
//! across chunks is never emitted half-resolved.

use chrono::format::{Item, StrftimeItems};
use chrono::Utc;
use uuid::Uuid;

use crate::domain::errors::EmbedError;
use crate::domain::models::ArtifactRef;

const OPEN: &str = "[[";
const CLOSE: &str = "]]";

/// Side-channel directive extracted from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedSignal {
    /// `[[STATUS:text]]`
    Status(String),
    /// `[[ARTIFACT:name:version]]`
    ArtifactReturn(ArtifactRef),
}

/// Outcome of resolving a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedResolution {
    /// Resolved text up to `processed_until`
    pub text: String,
    /// Byte index into the input where the unprocessed tail begins
    pub processed_until: usize,
    /// Signals in text order
    pub signals: Vec<EmbedSignal>,
}

impl EmbedResolution {
    /// Identity resolution: the whole input, no signals, no tail.
    pub fn passthrough(text: &str) -> Self {
        Self {
            text: text.to_string(),
            processed_until: text.len(),
            signals: Vec::new(),
        }
    }
}

enum Replacement {
    Text(String),
    Signal(EmbedSignal),
    Removed,
    Verbatim,
}

/// Resolve early embeds in `input`.
///
/// # Errors
/// Returns an [`EmbedError`] for a malformed artifact or datetime body.
pub fn resolve_early_embeds(input: &str) -> Result<EmbedResolution, EmbedError> {
    let mut text = String::with_capacity(input.len());
    let mut signals = Vec::new();
    let mut pos = 0;

    while let Some(offset) = input[pos..].find(OPEN) {
        let start = pos + offset;
        text.push_str(&input[pos..start]);

        let body_start = start + OPEN.len();
        let Some(body_len) = input[body_start..].find(CLOSE) else {
            return Ok(EmbedResolution {
                text,
                processed_until: start,
                signals,
            });
        };
        let end = body_start + body_len + CLOSE.len();

        match resolve_marker(&input[body_start..body_start + body_len])? {
            Replacement::Text(value) => text.push_str(&value),
            Replacement::Signal(signal) => signals.push(signal),
            Replacement::Removed => {}
            Replacement::Verbatim => text.push_str(&input[start..end]),
        }
        pos = end;
    }

    let rest = &input[pos..];
    let processed_until = if rest.ends_with('[') {
        input.len() - 1
    } else {
        input.len()
    };
    text.push_str(&input[pos..processed_until]);

    Ok(EmbedResolution {
        text,
        processed_until,
        signals,
    })
}

fn resolve_marker(body: &str) -> Result<Replacement, EmbedError> {
    let (kind, arg) = match body.split_once(':') {
        Some((kind, arg)) => (kind, Some(arg)),
        None => (body, None),
    };

    match kind.trim().to_ascii_uppercase().as_str() {
        "STATUS" => {
            let message = arg.map(str::trim).unwrap_or_default();
            if message.is_empty() {
                Ok(Replacement::Removed)
            } else {
                Ok(Replacement::Signal(EmbedSignal::Status(message.to_string())))
            }
        }
        "ARTIFACT" => parse_artifact(arg.unwrap_or_default())
            .map(|artifact| Replacement::Signal(EmbedSignal::ArtifactReturn(artifact))),
        "UUID" => Ok(Replacement::Text(Uuid::new_v4().to_string())),
        "DATETIME" => format_now(arg).map(Replacement::Text),
        _ => Ok(Replacement::Verbatim),
    }
}

/// `filename[:version]`, where version is digits or `latest`.
/// Filenames may contain colons (`user:report.csv`).
fn parse_artifact(body: &str) -> Result<ArtifactRef, EmbedError> {
    let body = body.trim();
    let (filename, version) = match body.rsplit_once(':') {
        Some((name, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => {
            let version = tail
                .parse::<u32>()
                .map_err(|_| EmbedError::InvalidArtifactVersion(tail.to_string()))?;
            (name, Some(version))
        }
        Some((name, tail)) if tail.eq_ignore_ascii_case("latest") => (name, None),
        Some((_, tail)) if tail.starts_with('-') => {
            return Err(EmbedError::InvalidArtifactVersion(tail.to_string()));
        }
        _ => (body, None),
    };

    let filename = filename.trim();
    if filename.is_empty() {
        return Err(EmbedError::EmptyArtifactName);
    }
    Ok(ArtifactRef::new(filename, version))
}

fn format_now(format: Option<&str>) -> Result<String, EmbedError> {
    let now = Utc::now();
    match format.map(str::trim).filter(|f| !f.is_empty()) {
        None => Ok(now.to_rfc3339()),
        Some(format) => {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(EmbedError::InvalidDateFormat(format.to_string()));
            }
            Ok(now.format(format).to_string())
        }
    }
}
