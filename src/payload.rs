//! Domain model for intercepted traffic.
//!
//! Every request the proxy touches is reduced to a [`RequestDetails`] value, and
//! every answer to a [`ResponseDetails`]. The pair, together with the content
//! fingerprint it was recorded under, forms a [`Payload`]: the unit of
//! persistence in the store and the unit of exchange with middleware programs.
//!
//! The serde derives on these types define the JSON document piped into and out
//! of middleware processes. Field names are part of that contract (note the
//! camelCase `remoteAddr`), and every field is defaulted on deserialization so a
//! middleware may emit only the parts it cares about, e.g.
//! `{"response": {"status": 418, "body": "teapot", "headers": {}}}`.

use std::collections::BTreeMap;

use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Header name mapped to its values, in the order they appeared.
///
/// Multi-value headers keep their per-name ordering. Names are stored as the
/// frontend handed them over; hyper normalizes inbound names to lowercase.
pub type Headers = BTreeMap<String, Vec<String>>;

/// One intercepted HTTP request, flattened to owned fields.
///
/// `destination`, `path`, `method`, `query` and `body` participate in the
/// request fingerprint; `scheme`, `remote_addr` and `headers` are carried for
/// reconstruction only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetails {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, rename = "remoteAddr")]
    pub remote_addr: String,
    #[serde(default)]
    pub headers: Headers,
}

impl RequestDetails {
    /// Flattens hyper request parts and an already-buffered body.
    ///
    /// The body is rendered as text; bytes that are not valid UTF-8 are
    /// replaced lossily. An absent body arrives here as an empty slice and is
    /// kept as an empty string, which still participates in fingerprinting.
    pub fn from_parts(
        parts: &http::request::Parts,
        body: &[u8],
        scheme: &str,
        destination: &str,
        remote_addr: &str,
    ) -> Self {
        Self {
            path: parts.uri.path().to_string(),
            method: parts.method.as_str().to_string(),
            destination: destination.to_string(),
            scheme: scheme.to_string(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            body: String::from_utf8_lossy(body).into_owned(),
            remote_addr: remote_addr.to_string(),
            headers: headers_from_map(&parts.headers),
        }
    }
}

/// One recorded HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDetails {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: Headers,
}

/// The persisted and middleware-exchanged record.
///
/// `id` is the fingerprint of `request` at the moment of capture. A payload
/// outlives its request only when written to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub response: ResponseDetails,
    #[serde(default)]
    pub request: RequestDetails,
    #[serde(default)]
    pub id: String,
}

/// Collects a hyper header map into the owned [`Headers`] shape.
///
/// Values that are not valid UTF-8 are replaced lossily; ordering of values
/// under a single name is preserved.
pub fn headers_from_map(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for name in map.keys() {
        let values = map
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect();
        headers.insert(name.as_str().to_string(), values);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Payload {
        Payload {
            response: ResponseDetails {
                status: 200,
                body: "pong".into(),
                headers: Headers::from([(
                    "content-type".to_string(),
                    vec!["text/plain".to_string()],
                )]),
            },
            request: RequestDetails {
                path: "/v1/ping".into(),
                method: "GET".into(),
                destination: "api.test".into(),
                scheme: "http".into(),
                query: "x=1".into(),
                body: String::new(),
                remote_addr: "127.0.0.1:4000".into(),
                headers: Headers::new(),
            },
            id: "deadbeef".into(),
        }
    }

    #[test]
    fn json_uses_contract_field_names() {
        let value = serde_json::to_value(sample_payload()).unwrap();
        assert!(value["request"]["remoteAddr"].is_string());
        assert_eq!(value["response"]["status"], 200);
        assert_eq!(value["request"]["query"], "x=1");
        assert_eq!(value["id"], "deadbeef");
    }

    #[test]
    fn json_round_trips() {
        let payload = sample_payload();
        let text = serde_json::to_string(&payload).unwrap();
        let back: Payload = serde_json::from_str(&text).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn partial_documents_deserialize_with_defaults() {
        let text = r#"{"response":{"status":418,"body":"teapot","headers":{}}}"#;
        let payload: Payload = serde_json::from_str(text).unwrap();
        assert_eq!(payload.response.status, 418);
        assert_eq!(payload.response.body, "teapot");
        assert_eq!(payload.request, RequestDetails::default());
        assert!(payload.id.is_empty());
    }

    #[test]
    fn header_map_keeps_multi_value_order() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", "a=1".parse().unwrap());
        map.append("set-cookie", "b=2".parse().unwrap());
        let headers = headers_from_map(&map);
        assert_eq!(headers["set-cookie"], vec!["a=1", "b=2"]);
    }

    #[test]
    fn from_parts_flattens_uri_and_body() {
        let req = http::Request::builder()
            .method("POST")
            .uri("http://api.test/echo?x=1&y=2")
            .header("x-trace", "1")
            .body(())
            .unwrap();
        let (parts, _) = req.into_parts();
        let details =
            RequestDetails::from_parts(&parts, b"{\"n\":1}", "http", "api.test", "10.0.0.1:5000");
        assert_eq!(details.path, "/echo");
        assert_eq!(details.query, "x=1&y=2");
        assert_eq!(details.method, "POST");
        assert_eq!(details.body, "{\"n\":1}");
        assert_eq!(details.headers["x-trace"], vec!["1"]);
    }
}
