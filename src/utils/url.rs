//! URL helpers for endpoint construction and credential hygiene.

/// Query parameter names that indicate a credential baked into a URL.
const CREDENTIAL_QUERY_KEYS: &[&str] = &[
    "key",
    "api_key",
    "apikey",
    "token",
    "access_token",
    "secret",
    "password",
    "ak",
    "sk",
];

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use ai_navigator::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.example.com/v1///"), "https://api.example.com/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path with exactly one slash.
///
/// ```
/// use ai_navigator::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.example.com/v1/", "/chat/completions"),
///     "https://api.example.com/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Returns the names of query parameters that look like embedded credentials.
///
/// Credentials belong in headers or protocol fields; a URL that carries one
/// is reported so callers can warn about it.
pub fn embedded_credential_params(url: &str) -> Vec<String> {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return Vec::new();
    };
    parsed
        .query_pairs()
        .map(|(name, _)| name.to_ascii_lowercase())
        .filter(|name| CREDENTIAL_QUERY_KEYS.contains(&name.as_str()))
        .collect()
}

/// Replaces credential query values with `***` for display.
pub fn redact_url(url: &str) -> String {
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query().is_none() {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| {
            let masked = if CREDENTIAL_QUERY_KEYS.contains(&name.to_ascii_lowercase().as_str()) {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (name.into_owned(), masked)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}
