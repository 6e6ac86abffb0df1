//! # Commit Payload Encoding and Decoding
//!
//! This module provides the codec for packing a commit's events into a single
//! blob and unpacking them on read. One commit maps to one blob; packing the
//! whole batch into one value keeps row overhead constant regardless of the
//! event count.
//!
//! ## Payload Format
//!
//! For each event, in append order:
//!
//! ```text
//! [headers_len: u32 LE][headers: JSON bytes]
//! [body_len:    u32 LE][body:    raw bytes]
//! ```
//!
//! Event headers are serialized as JSON objects; bodies are stored verbatim.
//! Commit-level metadata (bucket, stream, revision, sequence, stamp, commit
//! headers) lives in table columns, not in the blob, so queries never decode
//! payloads they don't return.
//!
//! ## Integrity
//!
//! Each stored blob carries an XXH3-64 checksum in its own column. Readers
//! verify it before decoding and surface a mismatch as a schema error rather
//! than yielding silently corrupted events.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::types::{EventMessage, Headers};

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a commit's events into a payload blob.
///
/// # Errors
///
/// Returns `Error::Schema` if an event's headers cannot be serialized as
/// JSON (only possible with non-string-keyed values smuggled in via raw
/// `serde_json::Value` maps).
pub fn encode_events(events: &[EventMessage]) -> Result<Vec<u8>> {
    let mut data = Vec::new();

    for event in events {
        let headers = serde_json::to_vec(&event.headers)
            .map_err(|e| Error::Schema(format!("unencodable event headers: {e}")))?;

        data.extend_from_slice(&(headers.len() as u32).to_le_bytes());
        data.extend_from_slice(&headers);
        data.extend_from_slice(&(event.body.len() as u32).to_le_bytes());
        data.extend_from_slice(&event.body);
    }

    Ok(data)
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a payload blob back into its events.
///
/// `expected_count` comes from the commit row's `event_count` column; a blob
/// that decodes to a different number of events is corrupt.
///
/// # Errors
///
/// Returns `Error::Schema` on truncated data, invalid header JSON, or an
/// event-count mismatch.
pub fn decode_events(data: &[u8], expected_count: usize) -> Result<Vec<EventMessage>> {
    let mut events = Vec::with_capacity(expected_count);
    let mut cursor = 0;

    while cursor < data.len() {
        let headers_len = read_u32(data, &mut cursor)? as usize;
        let headers_bytes = read_slice(data, &mut cursor, headers_len)?;
        let headers: Headers = serde_json::from_slice(headers_bytes)
            .map_err(|e| Error::Schema(format!("invalid event headers: {e}")))?;

        let body_len = read_u32(data, &mut cursor)? as usize;
        let body = read_slice(data, &mut cursor, body_len)?.to_vec();

        events.push(EventMessage { headers, body });
    }

    if events.len() != expected_count {
        return Err(Error::Schema(format!(
            "payload decoded to {} events, expected {}",
            events.len(),
            expected_count
        )));
    }

    Ok(events)
}

/// Reads a little-endian u32 and advances the cursor.
fn read_u32(data: &[u8], cursor: &mut usize) -> Result<u32> {
    let bytes: [u8; 4] = data
        .get(*cursor..*cursor + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::Schema("truncated commit payload".to_string()))?;
    *cursor += 4;
    Ok(u32::from_le_bytes(bytes))
}

/// Reads `len` bytes and advances the cursor.
fn read_slice<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let slice = data
        .get(*cursor..*cursor + len)
        .ok_or_else(|| Error::Schema("truncated commit payload".to_string()))?;
    *cursor += len;
    Ok(slice)
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Computes a checksum for payload data.
///
/// Uses XXH3-64: extremely fast, stable across platforms and versions, and
/// good enough distribution for integrity checking.
pub fn compute_checksum(data: &[u8]) -> Vec<u8> {
    let hash = xxhash_rust::xxh3::xxh3_64(data);
    hash.to_le_bytes().to_vec()
}

/// Verifies a payload against its stored checksum.
pub fn verify_checksum(data: &[u8], stored: &[u8]) -> Result<()> {
    if compute_checksum(data) != stored {
        return Err(Error::Schema(
            "commit payload checksum mismatch".to_string(),
        ));
    }
    Ok(())
}

/// Returns the current time in milliseconds since the Unix epoch.
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
