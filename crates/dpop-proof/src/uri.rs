//! HTTP target helpers
//!
//! `htu` comparison ignores query and fragment, so both sides normalize the
//! request URI with [`create_htu`] before signing or comparing.

use url::{Origin, Url};

/// Strip the query and fragment from a request URI
///
/// Cuts at the first `?` or `#`, whichever comes first. Nothing else about
/// the URI is changed.
#[must_use]
pub fn create_htu(uri: &str) -> String {
    match uri.find(['?', '#']) {
        Some(index) => uri[..index].to_string(),
        None => uri.to_string(),
    }
}

/// Endpoint identity used to scope nonces
///
/// The lowercased origin of `htu` (scheme, host and non-default port). Falls
/// back to the lowercased `htu` itself when it has no tuple origin.
#[must_use]
pub fn endpoint_of(htu: &str) -> String {
    match Url::parse(htu).map(|url| url.origin()) {
        Ok(origin @ Origin::Tuple(..)) => origin.ascii_serialization().to_lowercase(),
        _ => htu.to_lowercase(),
    }
}

/// Whether `method` is a syntactically valid HTTP method token
#[must_use]
pub fn is_valid_http_method(method: &str) -> bool {
    !method.is_empty()
        && method.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

/// Whether `uri` is an absolute `http` or `https` URI with a host
#[must_use]
pub fn is_valid_http_uri(uri: &str) -> bool {
    Url::parse(uri)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}
