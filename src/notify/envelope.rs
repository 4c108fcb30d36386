//! Cross-session wire format.
//!
//! The envelope travels as one bitcode frame so its fields arrive together.
//! Text transports (storage slots) carry the same frame base64-encoded.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transport::TransportError;
use crate::document::{CaseId, Document, SessionId};
use crate::version::{VersionId, VersionRecord, VersionSource};

/// A committed version announced to other sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEnvelope {
    pub case_id: CaseId,
    pub version_id: VersionId,
    pub version: u64,
    pub is_current: bool,
    pub payload: Document,
    pub source: VersionSource,
    /// Commit time of the version.
    pub timestamp: DateTime<Utc>,
    /// Session that committed it, when the transport knows.
    pub origin: Option<SessionId>,
}

/// Flat frame with primitive fields only.
#[derive(Serialize, Deserialize)]
struct WireFrame {
    case_id: String,
    version_id: String,
    version: u64,
    is_current: bool,
    payload: String,
    source: String,
    timestamp_ms: i64,
    origin: Option<String>,
}

impl ChangeEnvelope {
    pub fn from_record(record: &VersionRecord, origin: Option<SessionId>) -> Self {
        Self {
            case_id: record.case_id.clone(),
            version_id: record.id,
            version: record.version,
            is_current: record.is_current,
            payload: record.payload.clone(),
            source: record.source,
            timestamp: record.created_at,
            origin,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let frame = WireFrame {
            case_id: self.case_id.to_string(),
            version_id: self.version_id.to_string(),
            version: self.version,
            is_current: self.is_current,
            payload: self.payload.to_json_string(),
            source: self.source.to_string(),
            timestamp_ms: self.timestamp.timestamp_millis(),
            origin: self.origin.as_ref().map(|o| o.to_string()),
        };
        bitcode::serialize(&frame).map_err(|e| TransportError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let frame: WireFrame =
            bitcode::deserialize(bytes).map_err(|e| TransportError::Codec(e.to_string()))?;

        let case_id =
            CaseId::new(&frame.case_id).map_err(|e| TransportError::Codec(e.to_string()))?;
        let version_id = VersionId::parse(&frame.version_id)
            .ok_or_else(|| TransportError::Codec(format!("bad version id {}", frame.version_id)))?;
        let payload = Document::from_json_str(&frame.payload)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        let source = parse_source(&frame.source)?;
        let timestamp = DateTime::from_timestamp_millis(frame.timestamp_ms)
            .ok_or_else(|| TransportError::Codec(format!("bad timestamp {}", frame.timestamp_ms)))?;

        Ok(Self {
            case_id,
            version_id,
            version: frame.version,
            is_current: frame.is_current,
            payload,
            source,
            timestamp,
            origin: frame.origin.map(SessionId::new),
        })
    }

    pub fn to_text(&self) -> Result<String, TransportError> {
        Ok(STANDARD.encode(self.encode()?))
    }

    pub fn from_text(text: &str) -> Result<Self, TransportError> {
        let bytes = STANDARD
            .decode(text)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        Self::decode(&bytes)
    }
}

fn parse_source(value: &str) -> Result<VersionSource, TransportError> {
    match value {
        "system" => Ok(VersionSource::System),
        "user_restore" => Ok(VersionSource::UserRestore),
        "external_import" => Ok(VersionSource::ExternalImport),
        other => Err(TransportError::Codec(format!("unknown source {other}"))),
    }
}
