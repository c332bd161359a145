use http::header::{self, HeaderName, HeaderValue};
use http::HeaderMap;
use std::net::IpAddr;

pub mod forwarded {
    pub const FOR: &str = "x-forwarded-for";
    pub const HOST: &str = "x-forwarded-host";
    pub const PROTO: &str = "x-forwarded-proto";
}

/// Headers meaningful only for a single transport-level connection
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named in `Connection`.
///
/// Returns how many headers were removed.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) -> usize {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    let mut removed = 0usize;
    for name in listed.iter().map(HeaderName::as_str).chain(HOP_BY_HOP) {
        if headers.remove(name).is_some() {
            removed = removed.saturating_add(1);
        }
    }
    removed
}

/// Add X-Forwarded-* headers
///
/// 1. Appends the client IP to X-Forwarded-For (or creates it if missing)
/// 2. Sets X-Forwarded-Host from the Host header
/// 3. Sets X-Forwarded-Proto to "http"
pub fn add_forwarded_headers(headers: &mut HeaderMap, client_ip: IpAddr) {
    let client_ip = client_ip.to_string();
    let prior: Vec<&str> = headers
        .get_all(forwarded::FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        client_ip
    } else {
        format!("{}, {client_ip}", prior.join(", "))
    };
    if let Ok(hv) = HeaderValue::from_str(&value) {
        headers.insert(forwarded::FOR, hv);
    }

    if let Some(host) = headers.get(header::HOST).cloned() {
        headers.insert(forwarded::HOST, host);
    }

    headers.insert(forwarded::PROTO, HeaderValue::from_static("http"));
}

/// Set `name` to `value`, or remove it if `value` is not a legal header value.
///
/// Any client-supplied value is never left in place.
pub fn set_or_remove(headers: &mut HeaderMap, name: &HeaderName, value: &str) -> bool {
    match HeaderValue::from_str(value) {
        Ok(hv) => {
            headers.insert(name.clone(), hv);
            true
        }
        Err(_) => {
            headers.remove(name);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));

    #[test]
    fn forwarded_for_is_created() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("api.example"));
        add_forwarded_headers(&mut headers, CLIENT);
        assert_eq!(headers.get(forwarded::FOR), Some(&HeaderValue::from_static("192.0.2.7")));
        assert_eq!(headers.get(forwarded::HOST), Some(&HeaderValue::from_static("api.example")));
        assert_eq!(headers.get(forwarded::PROTO), Some(&HeaderValue::from_static("http")));
    }

    #[test]
    fn forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        headers.append(forwarded::FOR, HeaderValue::from_static("10.0.0.1"));
        headers.append(forwarded::FOR, HeaderValue::from_static("10.0.0.2"));
        add_forwarded_headers(&mut headers, CLIENT);
        assert_eq!(
            headers.get(forwarded::FOR),
            Some(&HeaderValue::from_static("10.0.0.1, 10.0.0.2, 192.0.2.7"))
        );
        assert_eq!(headers.get_all(forwarded::FOR).iter().count(), 1);
    }

    #[test]
    fn hop_by_hop_and_connection_listed_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-secret"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        assert_eq!(remove_hop_by_hop(&mut headers), 4);
        assert!(headers.get("x-secret").is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::ACCEPT).is_some());
    }

    #[test]
    fn invalid_value_removes_client_header() {
        let name = HeaderName::from_static("x-lb-uid");
        let mut headers = HeaderMap::new();
        headers.insert(name.clone(), HeaderValue::from_static("spoofed"));
        assert!(!set_or_remove(&mut headers, &name, "bad\nvalue"));
        assert!(headers.get(&name).is_none());

        assert!(set_or_remove(&mut headers, &name, "123"));
        assert_eq!(headers.get(&name), Some(&HeaderValue::from_static("123")));
    }
}
