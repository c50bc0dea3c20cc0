//! Timestamp helper.

use chrono::{DateTime, Utc};

/// Current UTC time.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC time rendered as RFC 3339, for band metadata.
#[must_use]
pub fn now_rfc3339() -> String {
    now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_render_parseable_rfc3339() {
        let rendered = now_rfc3339();
        assert!(DateTime::parse_from_rfc3339(&rendered).is_ok());
    }
}
