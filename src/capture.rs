//! Capture path: turns an inbound HTTP request into event data
//!
//! Nothing here interprets the request. Repeated header names and query keys
//! keep their first value only.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::Bytes;
use hyper::header;
use hyper::http::request::Parts;
use hyper::HeaderMap;

use crate::recording::CapturedRequest;

/// Build event data from request parts, the collected body and the peer address
#[must_use]
pub fn capture_request(parts: &Parts, body: &Bytes, peer: SocketAddr) -> CapturedRequest {
    CapturedRequest {
        method: parts.method.to_string(),
        url: parts.uri.to_string(),
        headers: first_header_values(&parts.headers),
        query_params: first_query_values(parts.uri.query()),
        body: String::from_utf8_lossy(body).into_owned(),
        ip: client_ip(&parts.headers, peer),
    }
}

/// First value of each header, keyed by canonical name
///
/// `Host` is part of the request target, not a header, and is left out.
#[must_use]
pub fn first_header_values(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .filter(|name| **name != header::HOST)
        .filter_map(|name| {
            headers.get(name).map(|value| {
                (
                    canonical_header_name(name.as_str()),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
        })
        .collect()
}

/// First value of each query parameter
///
/// Keys and values are percent-decoded, with `+` read as a space. Pairs
/// containing `;` or a malformed escape are dropped.
#[must_use]
pub fn first_query_values(query: Option<&str>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    for pair in query.unwrap_or_default().split('&') {
        if pair.is_empty() || pair.contains(';') {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let (Some(key), Some(value)) = (decode_component(key), decode_component(value)) else {
            continue;
        };
        params.entry(key).or_insert(value);
    }

    params
}

fn decode_component(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let well_formed = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'%')
        .all(|(i, _)| {
            bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
        });
    if !well_formed {
        return None;
    }

    let spaced = raw.replace('+', " ");
    let decoded = urlencoding::decode_binary(spaced.as_bytes());
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

/// Canonical MIME form of a header name (`x-request-id` -> `X-Request-Id`)
#[must_use]
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;

    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }

    out
}

/// Client address, preferring proxy-supplied headers over the TCP peer
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map_or_else(|| peer.ip().to_string(), str::to_string)
}
