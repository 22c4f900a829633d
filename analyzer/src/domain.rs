//! URL normalization for catalog lookups.
//!
//! The catalog is keyed by base domain (`shop.example.com/cart` and
//! `https://www.example.com/` both map to `example.com`).

/// Strip scheme, a leading `www.`, and trailing slashes.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);
    without_www.trim_end_matches('/').to_string()
}

/// Last two labels of the host, lowercased.
pub fn base_domain(url: &str) -> String {
    let normalized = normalize_url(url);
    let host = normalized
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default().to_lowercase();

    let labels: Vec<&str> = host.split('.').filter(|label| !label.is_empty()).collect();
    if labels.len() > 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        labels.join(".")
    }
}
