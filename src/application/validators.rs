use url::Url;
use validator::ValidateEmail;

/// Validates that the input looks like a valid email address
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email.validate_email()
}

/// A redirect target is accepted only when it is an http(s) URL on the
/// application's own origin (same scheme, host and port).
pub fn is_valid_return_url(url: &str, app_origin: &Url) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    parsed.origin() == app_origin.origin()
}

/// Processor ids are short ASCII tokens like `price_1Nx...` or `cus_...`.
pub fn is_valid_processor_id(id: &str, prefix: &str) -> bool {
    id.len() > prefix.len()
        && id.len() <= 255
        && id.starts_with(prefix)
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
