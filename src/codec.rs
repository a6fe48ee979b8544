//! Binary codec for stored payloads.
//!
//! Recordings are persisted as a field-tagged, length-prefixed protobuf
//! message rather than a fixed-layout encoding: decoders skip tags they do not
//! know, so payloads written before a field was added stay readable, and
//! fields added later can be ignored by older readers. The wire shape is
//! internal; the only contract is that `decode(encode(p)) == p` and that
//! evolution stays additive.
//!
//! Header maps are encoded as a repeated `(name, values)` message so the
//! ordering of values under one name, and the exact spelling of names, survive
//! the round trip.

use prost::Message;

use crate::payload::{Headers, Payload, RequestDetails, ResponseDetails};

#[derive(Clone, PartialEq, Message)]
struct WireHeader {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(string, repeated, tag = "2")]
    values: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
struct WireRequest {
    #[prost(string, tag = "1")]
    path: String,
    #[prost(string, tag = "2")]
    method: String,
    #[prost(string, tag = "3")]
    destination: String,
    #[prost(string, tag = "4")]
    scheme: String,
    #[prost(string, tag = "5")]
    query: String,
    #[prost(string, tag = "6")]
    body: String,
    #[prost(string, tag = "7")]
    remote_addr: String,
    #[prost(message, repeated, tag = "8")]
    headers: Vec<WireHeader>,
}

#[derive(Clone, PartialEq, Message)]
struct WireResponse {
    #[prost(uint32, tag = "1")]
    status: u32,
    #[prost(string, tag = "2")]
    body: String,
    #[prost(message, repeated, tag = "3")]
    headers: Vec<WireHeader>,
}

#[derive(Clone, PartialEq, Message)]
struct WirePayload {
    #[prost(message, optional, tag = "1")]
    request: Option<WireRequest>,
    #[prost(message, optional, tag = "2")]
    response: Option<WireResponse>,
    #[prost(string, tag = "3")]
    id: String,
}

/// Why a stored byte blob could not be turned back into a payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("payload is missing its {0} record")]
    MissingRecord(&'static str),
    #[error("payload carries impossible status code {0}")]
    InvalidStatus(u32),
}

/// Serializes a payload into its stored form. Encoding cannot fail.
pub fn encode(payload: &Payload) -> Vec<u8> {
    let wire = WirePayload {
        request: Some(WireRequest {
            path: payload.request.path.clone(),
            method: payload.request.method.clone(),
            destination: payload.request.destination.clone(),
            scheme: payload.request.scheme.clone(),
            query: payload.request.query.clone(),
            body: payload.request.body.clone(),
            remote_addr: payload.request.remote_addr.clone(),
            headers: headers_to_wire(&payload.request.headers),
        }),
        response: Some(WireResponse {
            status: u32::from(payload.response.status),
            body: payload.response.body.clone(),
            headers: headers_to_wire(&payload.response.headers),
        }),
        id: payload.id.clone(),
    };
    wire.encode_to_vec()
}

/// Deserializes a stored blob back into a payload.
///
/// # Errors
///
/// Fails when the input is truncated or carries mismatched wire types, when
/// either the request or the response record is absent, or when the stored
/// status does not fit an HTTP status code.
pub fn decode(bytes: &[u8]) -> Result<Payload, DecodeError> {
    let wire = WirePayload::decode(bytes)?;
    let request = wire.request.ok_or(DecodeError::MissingRecord("request"))?;
    let response = wire.response.ok_or(DecodeError::MissingRecord("response"))?;
    let status =
        u16::try_from(response.status).map_err(|_| DecodeError::InvalidStatus(response.status))?;

    Ok(Payload {
        request: RequestDetails {
            path: request.path,
            method: request.method,
            destination: request.destination,
            scheme: request.scheme,
            query: request.query,
            body: request.body,
            remote_addr: request.remote_addr,
            headers: headers_from_wire(request.headers),
        },
        response: ResponseDetails {
            status,
            body: response.body,
            headers: headers_from_wire(response.headers),
        },
        id: wire.id,
    })
}

fn headers_to_wire(headers: &Headers) -> Vec<WireHeader> {
    headers
        .iter()
        .map(|(name, values)| WireHeader {
            name: name.clone(),
            values: values.clone(),
        })
        .collect()
}

fn headers_from_wire(headers: Vec<WireHeader>) -> Headers {
    headers
        .into_iter()
        .map(|header| (header.name, header.values))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Payload {
        Payload {
            response: ResponseDetails {
                status: 200,
                body: "pong".into(),
                headers: Headers::from([
                    ("content-type".to_string(), vec!["text/plain".to_string()]),
                    (
                        "set-cookie".to_string(),
                        vec!["a=1".to_string(), "b=2".to_string()],
                    ),
                ]),
            },
            request: RequestDetails {
                path: "/v1/ping".into(),
                method: "GET".into(),
                destination: "api.test".into(),
                scheme: "https".into(),
                query: "x=1".into(),
                body: "{\"n\":1}".into(),
                remote_addr: "127.0.0.1:4000".into(),
                headers: Headers::from([("X-Mixed-Case".to_string(), vec!["kept".to_string()])]),
            },
            id: "00112233445566778899aabbccddeeff".into(),
        }
    }

    #[test]
    fn round_trips_field_wise() {
        let original = payload();
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn preserves_multi_value_order_and_name_case() {
        let decoded = decode(&encode(&payload())).unwrap();
        assert_eq!(decoded.response.headers["set-cookie"], vec!["a=1", "b=2"]);
        assert_eq!(decoded.request.headers["X-Mixed-Case"], vec!["kept"]);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = encode(&payload());
        let err = decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn empty_input_is_missing_its_records() {
        assert!(matches!(
            decode(&[]).unwrap_err(),
            DecodeError::MissingRecord("request")
        ));
    }

    #[test]
    fn unknown_fields_from_newer_writers_are_skipped() {
        let mut bytes = encode(&payload());
        // Append a length-delimited field with an unused tag, as a future
        // version of the encoder would.
        bytes.extend_from_slice(&[0x7A, 0x03, b'n', b'e', b'w']);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, payload());
    }

    #[test]
    fn impossible_status_is_rejected() {
        let wire = WirePayload {
            request: Some(WireRequest::default()),
            response: Some(WireResponse {
                status: 70_000,
                ..WireResponse::default()
            }),
            id: String::new(),
        };
        assert!(matches!(
            decode(&wire.encode_to_vec()).unwrap_err(),
            DecodeError::InvalidStatus(70_000)
        ));
    }
}
