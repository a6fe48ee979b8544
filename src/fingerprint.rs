//! Deterministic request identity.
//!
//! A request's fingerprint is the lowercase hex encoding of a 128-bit MD5
//! digest over five fields in a fixed order: destination, path, method, query,
//! body. The digest is a content key, not a MAC, so an unkeyed hash is
//! sufficient; what matters is that it is stable across hosts, restarts and
//! releases. The field ordering is frozen: changing it would orphan every
//! previously stored recording.
//!
//! Headers, scheme and remote address are deliberately excluded. Two requests
//! that differ only in those fields are considered the same recording.

use md5::{Digest, Md5};

use crate::payload::RequestDetails;

/// Computes the stable content hash identifying a request.
pub fn fingerprint(request: &RequestDetails) -> String {
    let mut hasher = Md5::new();
    hasher.update(request.destination.as_bytes());
    hasher.update(request.path.as_bytes());
    hasher.update(request.method.as_bytes());
    hasher.update(request.query.as_bytes());
    hasher.update(request.body.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Headers;

    fn request() -> RequestDetails {
        RequestDetails {
            path: "/v1/ping".into(),
            method: "GET".into(),
            destination: "api.test".into(),
            scheme: "http".into(),
            query: "x=1".into(),
            body: String::new(),
            remote_addr: "127.0.0.1:4000".into(),
            headers: Headers::new(),
        }
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(fingerprint(&request()), fingerprint(&request()));
    }

    #[test]
    fn is_lowercase_hex_of_128_bits() {
        let id = fingerprint(&request());
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn ignores_headers_scheme_and_remote_addr() {
        let base = fingerprint(&request());

        let mut with_header = request();
        with_header
            .headers
            .insert("x-trace".into(), vec!["2".into()]);
        with_header.scheme = "https".into();
        with_header.remote_addr = "10.1.1.1:9".into();

        assert_eq!(fingerprint(&with_header), base);
    }

    #[test]
    fn every_identity_field_is_significant() {
        let base = fingerprint(&request());

        let mut changed = request();
        changed.destination = "other.test".into();
        assert_ne!(fingerprint(&changed), base);

        let mut changed = request();
        changed.path = "/v2/ping".into();
        assert_ne!(fingerprint(&changed), base);

        let mut changed = request();
        changed.method = "POST".into();
        assert_ne!(fingerprint(&changed), base);

        let mut changed = request();
        changed.query = "x=2".into();
        assert_ne!(fingerprint(&changed), base);

        let mut changed = request();
        changed.body = "{\"n\":2}".into();
        assert_ne!(fingerprint(&changed), base);
    }

    #[test]
    fn empty_body_is_part_of_the_identity() {
        let mut with_body = request();
        with_body.body = "x".into();
        assert_ne!(fingerprint(&with_body), fingerprint(&request()));
    }
}
