//! `DPoP`, `DPoP-Nonce` and `WWW-Authenticate` header helpers

use ::http::header::WWW_AUTHENTICATE;
use ::http::{HeaderMap, HeaderValue};

use crate::types::DpopAlgorithm;
use crate::{DPOP_HEADER, DPOP_NONCE_HEADER, DpopError, Result};

/// The single `DPoP` header of a request
///
/// # Errors
/// - [`DpopError::MissingProof`] if there is none
/// - [`DpopError::MultipleProofs`] if there is more than one
/// - [`DpopError::InvalidProofStructure`] if the value is not visible ASCII
pub fn extract_proof(headers: &HeaderMap) -> Result<&str> {
    let mut values = headers.get_all(DPOP_HEADER).iter();
    let Some(value) = values.next() else {
        return Err(DpopError::MissingProof);
    };

    let extra = values.count();
    if extra > 0 {
        return Err(DpopError::MultipleProofs { count: extra + 1 });
    }

    value
        .to_str()
        .map_err(|_| DpopError::structure("DPoP header is not valid ASCII"))
}

/// The `DPoP-Nonce` of a response, if present and readable
#[must_use]
pub fn nonce_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(DPOP_NONCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|nonce| !nonce.is_empty())
}

/// `DPoP algs="ES256 RS256"`
#[must_use]
pub fn format_algs_challenge(algorithms: &[DpopAlgorithm]) -> String {
    format!("DPoP algs=\"{}\"", join_algs(algorithms))
}

/// Algorithm names from the `algs` parameter of a `DPoP` challenge
///
/// The scheme and parameter names match case-insensitively. Returns `None`
/// when the header has no `DPoP` challenge or no quoted `algs` value.
#[must_use]
pub fn parse_algs_challenge(header: &str) -> Option<Vec<String>> {
    let lower = header.to_ascii_lowercase();
    let scheme = find_scheme(&lower)?;

    let params = &lower[scheme..];
    let start = scheme + params.find("algs=\"")? + "algs=\"".len();
    let end = start + header[start..].find('"')?;

    Some(
        header[start..end]
            .split_ascii_whitespace()
            .map(str::to_string)
            .collect(),
    )
}

/// Position just after the `dpop` auth-scheme token
fn find_scheme(lower: &str) -> Option<usize> {
    let bytes = lower.as_bytes();
    let mut from = 0;
    while let Some(found) = lower[from..].find("dpop") {
        let start = from + found;
        let end = start + "dpop".len();
        let starts_token = start == 0 || matches!(bytes[start - 1], b' ' | b'\t' | b',');
        let ends_token = bytes.get(end).map_or(true, |b| matches!(b, b' ' | b'\t'));
        if starts_token && ends_token {
            return Some(end);
        }
        from = end;
    }
    None
}

/// `WWW-Authenticate` value for a verification failure
///
/// Returns `None` for errors that are not the client's fault (cache and
/// configuration failures), which should surface as server errors instead.
#[must_use]
pub fn www_authenticate_for(error: &DpopError, algorithms: &[DpopAlgorithm]) -> Option<String> {
    let code = error.error_code()?;
    let description = if error.is_nonce_challenge() {
        "Resource server requires nonce in DPoP proof".to_string()
    } else {
        error.to_string()
    };

    let mut challenge = format!(
        "DPoP error=\"{code}\", error_description=\"{}\"",
        escape_quoted(&description)
    );
    if !algorithms.is_empty() {
        challenge.push_str(&format!(", algs=\"{}\"", join_algs(algorithms)));
    }
    Some(challenge)
}

/// Response headers for a verification failure
///
/// `WWW-Authenticate` per [`www_authenticate_for`] plus `DPoP-Nonce` for
/// nonce challenges.
///
/// # Errors
/// Returns [`DpopError::ConfigurationError`] if a value is not a valid header.
pub fn challenge_headers(error: &DpopError, algorithms: &[DpopAlgorithm]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(challenge) = www_authenticate_for(error, algorithms) {
        headers.insert(WWW_AUTHENTICATE, header_value(&challenge)?);
    }
    if let Some(nonce) = error.challenge_nonce() {
        headers.insert(DPOP_NONCE_HEADER, header_value(nonce)?);
    }
    Ok(headers)
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| DpopError::ConfigurationError {
        reason: format!("not a valid header value: {e}"),
    })
}

fn join_algs(algorithms: &[DpopAlgorithm]) -> String {
    algorithms
        .iter()
        .map(|algorithm| algorithm.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
