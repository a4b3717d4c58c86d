//! Search result types and their peer-message wire encoding.

use crate::error::SearchError;
use slsk_core::framing;

/// One file offered by a peer in response to a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// The peer's full path for this file.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// File extension, reported separately from the filename on the wire.
    pub extension: String,
    /// `(attribute kind, value)` pairs — bitrate, duration, sample rate, etc.
    pub attributes: Vec<(u32, u32)>,
}

/// One peer's response to a search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// The responding peer's username.
    pub username: String,
    /// Files the peer is offering that matched the query.
    pub files: Vec<FileEntry>,
    /// Whether the peer currently has a free upload slot.
    pub has_free_slot: bool,
    /// The peer's advertised upload speed, bytes/sec.
    pub upload_speed: u32,
    /// The peer's current upload queue length.
    pub queue_length: u32,
}

/// Encode a `SearchResponse` peer-message payload: the originating search's
/// token followed by the result itself.
#[must_use]
pub fn encode_search_response(token: u32, result: &SearchResult) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&token.to_le_bytes());
    framing::write_string(&mut payload, &result.username);
    payload.extend_from_slice(&(result.files.len() as u32).to_le_bytes());
    for file in &result.files {
        framing::write_string(&mut payload, &file.filename);
        payload.extend_from_slice(&file.size.to_le_bytes());
        framing::write_string(&mut payload, &file.extension);
        payload.extend_from_slice(&(file.attributes.len() as u32).to_le_bytes());
        for (kind, value) in &file.attributes {
            payload.extend_from_slice(&kind.to_le_bytes());
            payload.extend_from_slice(&value.to_le_bytes());
        }
    }
    payload.push(u8::from(result.has_free_slot));
    payload.extend_from_slice(&result.upload_speed.to_le_bytes());
    payload.extend_from_slice(&result.queue_length.to_le_bytes());
    payload
}

/// Decode a `SearchResponse` peer-message payload into the search token it
/// correlates to and the result it carries.
///
/// # Errors
///
/// Returns [`SearchError::Frame`] if the payload is truncated or malformed.
pub fn decode_search_response(payload: &[u8]) -> Result<(u32, SearchResult), SearchError> {
    if payload.len() < 4 {
        return Err(slsk_core::FrameError::Truncated.into());
    }
    let token = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let (username, rest) = framing::read_string(&payload[4..])?;

    if rest.len() < 4 {
        return Err(slsk_core::FrameError::Truncated.into());
    }
    let file_count = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
    let mut rest = &rest[4..];

    let mut files = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        let (filename, after_name) = framing::read_string(rest)?;
        if after_name.len() < 8 {
            return Err(slsk_core::FrameError::Truncated.into());
        }
        let size = u64::from_le_bytes(after_name[..8].try_into().unwrap());
        let (extension, after_ext) = framing::read_string(&after_name[8..])?;
        if after_ext.len() < 4 {
            return Err(slsk_core::FrameError::Truncated.into());
        }
        let attr_count = u32::from_le_bytes(after_ext[..4].try_into().unwrap());
        let mut cursor = &after_ext[4..];
        let mut attributes = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            if cursor.len() < 8 {
                return Err(slsk_core::FrameError::Truncated.into());
            }
            let kind = u32::from_le_bytes(cursor[..4].try_into().unwrap());
            let value = u32::from_le_bytes(cursor[4..8].try_into().unwrap());
            attributes.push((kind, value));
            cursor = &cursor[8..];
        }
        files.push(FileEntry {
            filename,
            size,
            extension,
            attributes,
        });
        rest = cursor;
    }

    if rest.len() < 9 {
        return Err(slsk_core::FrameError::Truncated.into());
    }
    let has_free_slot = rest[0] != 0;
    let upload_speed = u32::from_le_bytes(rest[1..5].try_into().unwrap());
    let queue_length = u32::from_le_bytes(rest[5..9].try_into().unwrap());

    Ok((
        token,
        SearchResult {
            username,
            files,
            has_free_slot,
            upload_speed,
            queue_length,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_response_round_trips() {
        let result = SearchResult {
            username: "alice".into(),
            files: vec![FileEntry {
                filename: "song.flac".into(),
                size: 123_456,
                extension: "flac".into(),
                attributes: vec![(0, 320), (1, 210)],
            }],
            has_free_slot: true,
            upload_speed: 50_000,
            queue_length: 2,
        };
        let payload = encode_search_response(7, &result);
        let (token, decoded) = decode_search_response(&payload).unwrap();
        assert_eq!(token, 7);
        assert_eq!(decoded, result);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let err = decode_search_response(&[0, 0]).unwrap_err();
        assert!(matches!(err, SearchError::Frame(_)));
    }
}
