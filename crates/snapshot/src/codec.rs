//! Versioned CBOR envelope

use crate::SnapshotError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct Envelope<'a, T> {
    version: u32,
    kind: &'a str,
    body: &'a T,
}

/// Envelope fields checked before the body is decoded
#[derive(Deserialize)]
struct Header {
    version: u32,
    kind: String,
}

#[derive(Deserialize)]
struct Body<T> {
    body: T,
}

/// Encode `body` as a `kind` snapshot
pub fn encode<T: Serialize>(kind: &str, body: &T) -> Result<Vec<u8>, SnapshotError> {
    let envelope = Envelope {
        version: FORMAT_VERSION,
        kind,
        body,
    };
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&envelope, &mut bytes)
        .map_err(|e| SnapshotError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decode a `kind` snapshot, rejecting other kinds and versions
pub fn decode<T: DeserializeOwned>(kind: &str, bytes: &[u8]) -> Result<T, SnapshotError> {
    let header: Header =
        ciborium::de::from_reader(bytes).map_err(|e| SnapshotError::Decode(e.to_string()))?;

    if header.version != FORMAT_VERSION {
        return Err(SnapshotError::Version {
            found: header.version,
            expected: FORMAT_VERSION,
        });
    }
    if header.kind != kind {
        return Err(SnapshotError::Kind {
            expected: kind.to_string(),
            found: header.kind,
        });
    }

    let decoded: Body<T> =
        ciborium::de::from_reader(bytes).map_err(|e| SnapshotError::Decode(e.to_string()))?;
    Ok(decoded.body)
}
