//! The wire codec for `/proxy` and `/answer` bodies: JSON via
//! `serde_json`, already a direct dependency of `webrtc-rs/webrtc`
//! itself.

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};
use crate::slot::{NatType, ProxyType};

#[derive(Deserialize)]
struct PollRequestWire {
    sid: String,
    #[serde(default, rename = "proxyType")]
    proxy_type: Option<String>,
    #[serde(default, rename = "natType")]
    nat_type: Option<String>,
}

#[derive(Serialize)]
struct PollResponseWire {
    sdp: String,
    #[serde(rename = "natType")]
    nat_type: String,
    matched: bool,
}

#[derive(Deserialize)]
struct AnswerRequestWire {
    id: String,
    #[serde(rename = "answerSdp")]
    answer_sdp: String,
}

#[derive(Serialize)]
struct AnswerResponseWire {
    success: bool,
}

/// `DecodePollRequest(bytes) -> (sid, proxyType, natType)`.
pub fn decode_poll_request(bytes: &[u8]) -> Result<(String, ProxyType, NatType)> {
    let wire: PollRequestWire = serde_json::from_slice(bytes)
        .map_err(|e| BrokerError::BadRequest(format!("malformed poll request: {e}")))?;
    if wire.sid.is_empty() {
        return Err(BrokerError::BadRequest("poll request missing sid".into()));
    }
    let proxy_type = wire
        .proxy_type
        .as_deref()
        .unwrap_or_default()
        .parse()
        .unwrap_or(ProxyType::Unknown);
    let nat_type = wire
        .nat_type
        .as_deref()
        .unwrap_or_default()
        .parse()
        .unwrap_or(NatType::Unknown);
    Ok((wire.sid, proxy_type, nat_type))
}

/// `EncodePollResponse(sdp, matched, natType) -> bytes`.
pub fn encode_poll_response(sdp: &[u8], matched: bool, nat_type: NatType) -> Result<Vec<u8>> {
    let sdp = String::from_utf8(sdp.to_vec())
        .map_err(|e| BrokerError::InternalEncodeFailure(format!("non-utf8 offer sdp: {e}")))?;
    let wire = PollResponseWire {
        sdp,
        nat_type: nat_type.to_string(),
        matched,
    };
    serde_json::to_vec(&wire)
        .map_err(|e| BrokerError::InternalEncodeFailure(format!("poll response: {e}")))
}

/// `DecodeAnswerRequest(bytes) -> (answer, id)`.
pub fn decode_answer_request(bytes: &[u8]) -> Result<(Vec<u8>, String)> {
    let wire: AnswerRequestWire = serde_json::from_slice(bytes)
        .map_err(|e| BrokerError::BadRequest(format!("malformed answer request: {e}")))?;
    if wire.answer_sdp.is_empty() {
        return Err(BrokerError::BadRequest("empty answer".into()));
    }
    Ok((wire.answer_sdp.into_bytes(), wire.id))
}

/// `EncodeAnswerResponse(success) -> bytes`.
pub fn encode_answer_response(success: bool) -> Result<Vec<u8>> {
    serde_json::to_vec(&AnswerResponseWire { success })
        .map_err(|e| BrokerError::InternalEncodeFailure(format!("answer response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_well_formed_poll_request() {
        let body = br#"{"sid":"p1","proxyType":"standalone","natType":"restricted"}"#;
        let (sid, proxy_type, nat_type) = decode_poll_request(body).unwrap();
        assert_eq!(sid, "p1");
        assert_eq!(proxy_type, ProxyType::Standalone);
        assert_eq!(nat_type, NatType::Restricted);
    }

    #[test]
    fn missing_sid_is_bad_request() {
        let body = br#"{"proxyType":"standalone"}"#;
        assert!(decode_poll_request(body).is_err());
    }

    #[test]
    fn unrecognized_nat_type_defaults_to_unknown_not_an_error() {
        let body = br#"{"sid":"p1","natType":"quantum-tunneling"}"#;
        let (_, _, nat_type) = decode_poll_request(body).unwrap();
        assert_eq!(nat_type, NatType::Unknown);
    }

    #[test]
    fn empty_answer_is_bad_request() {
        let body = br#"{"id":"p1","answerSdp":""}"#;
        assert!(decode_answer_request(body).is_err());
    }

    #[test]
    fn round_trips_answer_request() {
        let body = br#"{"id":"p1","answerSdp":"ANSWER-SDP"}"#;
        let (answer, id) = decode_answer_request(body).unwrap();
        assert_eq!(answer, b"ANSWER-SDP");
        assert_eq!(id, "p1");
    }
}
