//! Turns a user supplied chart link into a URL that answers with image bytes.

use crate::config::LinkRules;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error(
        "unsupported link ({url}): publish the chart to the web as an image and use that link"
    )]
    UnsupportedLinkKind { url: String },
}

/// `true` when `host` is `domain` or one of its subdomains.
pub(crate) fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.');
    host.eq_ignore_ascii_case(domain)
        || host
            .len()
            .checked_sub(domain.len() + 1)
            .and_then(|at| host.get(at..))
            .is_some_and(|tail| {
                tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(domain)
            })
}

pub fn normalize(input: &str, rules: &LinkRules) -> Result<String, NormalizeError> {
    let input = input.trim();
    let unsupported = || NormalizeError::UnsupportedLinkKind {
        url: input.to_owned(),
    };
    let parsed = url::Url::parse(input).map_err(|_| unsupported())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(unsupported());
    }
    let host = parsed.host_str().ok_or_else(unsupported)?;

    if rules
        .direct_image_hosts
        .iter()
        .any(|domain| host_matches(host, domain))
    {
        return Ok(input.to_owned());
    }
    if !input.contains(&rules.publish_marker) {
        return Err(unsupported());
    }
    Ok(set_query_param(
        input,
        &rules.format_param,
        &rules.format_value,
    ))
}

/// Sets `name=value` in the query of `url`, keeping every other parameter
/// verbatim and in order. Existing occurrences of `name`, compared without
/// regard to ASCII case, are overwritten in place; otherwise the pair is
/// appended.
pub fn set_query_param(url: &str, name: &str, value: &str) -> String {
    let (rest, fragment) = match url.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (url, None),
    };
    let (base, query) = match rest.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (rest, None),
    };

    let pair = format!("{name}={value}");
    let query = match query.filter(|query| !query.is_empty()) {
        None => pair,
        Some(query) => {
            let mut found = false;
            let mut params = query
                .split('&')
                .map(|param| {
                    let key = param.split_once('=').map_or(param, |(key, _)| key);
                    if key.eq_ignore_ascii_case(name) {
                        found = true;
                        pair.as_str()
                    } else {
                        param
                    }
                })
                .collect::<Vec<_>>();
            if !found {
                params.push(&pair);
            }
            params.join("&")
        }
    };

    match fragment {
        Some(fragment) => format!("{base}?{query}#{fragment}"),
        None => format!("{base}?{query}"),
    }
}

/// Appends a cache busting parameter to an already normalized URL.
pub fn append_cache_buster(url: &str, param: &str, token: &str) -> String {
    let (rest, fragment) = match url.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (url, None),
    };
    let separator = match rest.split_once('?') {
        Some((_, "")) => "",
        Some(_) => "&",
        None => "?",
    };
    match fragment {
        Some(fragment) => format!("{rest}{separator}{param}={token}#{fragment}"),
        None => format!("{rest}{separator}{param}={token}"),
    }
}
