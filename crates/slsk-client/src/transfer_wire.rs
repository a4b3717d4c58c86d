//! Wire encoding for the `TransferRequest`/`TransferResponse` peer-message
//! exchange that precedes opening a raw transfer socket.

use slsk_core::framing;
use slsk_core::FrameError;

/// Which side is about to push bytes once the raw socket comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// The sender of this request wants to download `filename`.
    Download,
    /// The sender of this request is offering to upload `filename`.
    Upload,
}

impl TransferDirection {
    fn to_wire(self) -> u32 {
        match self {
            TransferDirection::Download => 0,
            TransferDirection::Upload => 1,
        }
    }

    fn from_wire(code: u32) -> Option<Self> {
        match code {
            0 => Some(TransferDirection::Download),
            1 => Some(TransferDirection::Upload),
            _ => None,
        }
    }
}

/// A decoded `TransferRequest` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Which side intends to push bytes.
    pub direction: TransferDirection,
    /// The correlation token this negotiation proceeds under.
    pub token: u32,
    /// The file being requested or offered.
    pub filename: String,
    /// Declared size, if known at request time (absent for a download
    /// request, since the requester does not yet know it).
    pub size: Option<u64>,
}

/// Encode a `TransferRequest` payload.
#[must_use]
pub fn encode_transfer_request(request: &TransferRequest) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&request.direction.to_wire().to_le_bytes());
    payload.extend_from_slice(&request.token.to_le_bytes());
    framing::write_string(&mut payload, &request.filename);
    if let Some(size) = request.size {
        payload.push(1);
        payload.extend_from_slice(&size.to_le_bytes());
    } else {
        payload.push(0);
    }
    payload
}

/// Decode a `TransferRequest` payload.
///
/// # Errors
///
/// Returns [`FrameError::Truncated`] if the payload is short or the
/// direction code is unrecognized.
pub fn decode_transfer_request(payload: &[u8]) -> Result<TransferRequest, FrameError> {
    if payload.len() < 8 {
        return Err(FrameError::Truncated);
    }
    let direction = u32::from_le_bytes(payload[0..4].try_into().unwrap());
    let direction = TransferDirection::from_wire(direction).ok_or(FrameError::Truncated)?;
    let token = u32::from_le_bytes(payload[4..8].try_into().unwrap());
    let (filename, rest) = framing::read_string(&payload[8..])?;
    if rest.is_empty() {
        return Err(FrameError::Truncated);
    }
    let size = if rest[0] != 0 {
        if rest.len() < 9 {
            return Err(FrameError::Truncated);
        }
        Some(u64::from_le_bytes(rest[1..9].try_into().unwrap()))
    } else {
        None
    };
    Ok(TransferRequest {
        direction,
        token,
        filename,
        size,
    })
}

/// A decoded `TransferResponse` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResponse {
    /// The token from the `TransferRequest` this responds to.
    pub token: u32,
    /// Whether the transfer is allowed to proceed.
    pub allowed: bool,
    /// Declared size, present only when `allowed`.
    pub size: Option<u64>,
    /// Rejection reason, present only when not `allowed`.
    pub reason: Option<String>,
}

/// Encode a `TransferResponse` payload.
#[must_use]
pub fn encode_transfer_response(response: &TransferResponse) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&response.token.to_le_bytes());
    payload.push(u8::from(response.allowed));
    if response.allowed {
        payload.extend_from_slice(&response.size.unwrap_or(0).to_le_bytes());
    } else {
        framing::write_string(&mut payload, response.reason.as_deref().unwrap_or("rejected"));
    }
    payload
}

/// Decode a `TransferResponse` payload.
///
/// # Errors
///
/// Returns [`FrameError::Truncated`] if the payload is short.
pub fn decode_transfer_response(payload: &[u8]) -> Result<TransferResponse, FrameError> {
    if payload.len() < 5 {
        return Err(FrameError::Truncated);
    }
    let token = u32::from_le_bytes(payload[0..4].try_into().unwrap());
    let allowed = payload[4] != 0;
    if allowed {
        if payload.len() < 13 {
            return Err(FrameError::Truncated);
        }
        let size = u64::from_le_bytes(payload[5..13].try_into().unwrap());
        Ok(TransferResponse {
            token,
            allowed,
            size: Some(size),
            reason: None,
        })
    } else {
        let (reason, _) = framing::read_string(&payload[5..])?;
        Ok(TransferResponse {
            token,
            allowed,
            size: None,
            reason: Some(reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_request_round_trips_with_size() {
        let request = TransferRequest {
            direction: TransferDirection::Upload,
            token: 7,
            filename: "song.flac".into(),
            size: Some(123_456),
        };
        let decoded = decode_transfer_request(&encode_transfer_request(&request)).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn transfer_request_round_trips_without_size() {
        let request = TransferRequest {
            direction: TransferDirection::Download,
            token: 9,
            filename: "song.flac".into(),
            size: None,
        };
        let decoded = decode_transfer_request(&encode_transfer_request(&request)).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn transfer_response_round_trips_allowed() {
        let response = TransferResponse {
            token: 3,
            allowed: true,
            size: Some(2048),
            reason: None,
        };
        let decoded = decode_transfer_response(&encode_transfer_response(&response)).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn transfer_response_round_trips_rejected() {
        let response = TransferResponse {
            token: 4,
            allowed: false,
            size: None,
            reason: Some("queue full".into()),
        };
        let decoded = decode_transfer_response(&encode_transfer_response(&response)).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn truncated_request_is_rejected() {
        let err = decode_transfer_request(&[0, 0]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated));
    }
}
