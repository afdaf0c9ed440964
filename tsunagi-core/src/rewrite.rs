//! Patient identifier substitution in request paths
//!
//! Identifiers are replaced only where they stand alone: as a whole path
//! segment, or as the whole value of a query parameter. Clinical ids often
//! appear inside longer ids and codes, so substring replacement is never
//! applied.

use std::borrow::Cow;

/// Replace `from_id` with `to_id` in `path` at exact token boundaries.
///
/// `path` is a relative request path with optional query string and
/// fragment, e.g. `Observation?patient=123&code=abc`. Query parameters that
/// are not replaced keep their original encoding.
pub fn rewrite(path: &str, from_id: &str, to_id: &str) -> String {
    if path.is_empty() || from_id.is_empty() {
        return path.to_string();
    }

    let (rest, fragment) = match path.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (path, None),
    };
    let (segments, query) = match rest.split_once('?') {
        Some((segments, query)) => (segments, Some(query)),
        None => (rest, None),
    };

    let mut rewritten = rewrite_segments(segments, from_id, to_id);
    if let Some(query) = query {
        rewritten.push('?');
        rewritten.push_str(&rewrite_query(query, from_id, to_id));
    }
    if let Some(fragment) = fragment {
        rewritten.push('#');
        rewritten.push_str(fragment);
    }
    rewritten
}

fn rewrite_segments(path: &str, from_id: &str, to_id: &str) -> String {
    path.split('/')
        .map(|segment| if segment == from_id { to_id } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

fn rewrite_query(query: &str, from_id: &str, to_id: &str) -> String {
    query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if decode_value(value) == from_id => {
                format!("{}={}", key, urlencoding::encode(to_id))
            }
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Form-decode a query value; undecodable input compares as-is.
fn decode_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['%', '+']) {
        return Cow::Borrowed(value);
    }
    let spaced = value.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => Cow::Owned(decoded.into_owned()),
        Err(_) => Cow::Borrowed(value),
    }
}
