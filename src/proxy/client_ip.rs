//! Client-IP derivation: a prioritized list of extractors, each returning an
//! optional address; the first hit wins. The socket peer address outranks
//! every header, and headers are only consulted when the transport cannot
//! supply one (e.g. behind a unix-socket ingress).

use std::net::SocketAddr;

use hyper::header::HeaderMap;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// First element of a comma-separated forwarding chain.
fn first_hop(value: &str) -> Option<String> {
    value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parses an RFC 7239 `Forwarded` header, extracting the first `for=` node.
fn forwarded_for(value: &str) -> Option<String> {
    value
        .split(';')
        .flat_map(|part| part.split(','))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("for"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
}

/// Derives the client IP for `X-Forwarded-For` propagation.
pub fn derive_client_ip(remote: Option<SocketAddr>, headers: &HeaderMap) -> Option<String> {
    let extractors: [&dyn Fn() -> Option<String>; 6] = [
        &|| remote.map(|addr| addr.ip().to_string()),
        &|| header_str(headers, "x-forwarded-for").and_then(first_hop),
        &|| header_str(headers, "x-client-ip").map(str::to_string),
        &|| header_str(headers, "x-azure-forwarded-for").and_then(first_hop),
        &|| header_str(headers, "x-real-ip").map(str::to_string),
        &|| header_str(headers, "forwarded").and_then(forwarded_for),
    ];
    extractors.iter().find_map(|extract| extract())
}
