// Minimal Accept-header negotiation.
//
// The fallback error handler needs one decision: render an error as JSON or
// as plain text. It looks at the response's own content type first and only
// falls back to the request's Accept header, so this module stays small:
// media types, quality values, and a preference query.

use std::cmp::Ordering;
use std::fmt;

/// A media type without parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub kind: String,
    pub subtype: String,
}

impl MediaType {
    pub fn new(kind: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subtype: subtype.into(),
        }
    }

    pub fn json() -> Self {
        Self::new("application", "json")
    }

    pub fn plain_text() -> Self {
        Self::new("text", "plain")
    }

    pub fn html() -> Self {
        Self::new("text", "html")
    }

    pub fn any() -> Self {
        Self::new("*", "*")
    }

    /// Parse `type/subtype`, ignoring any parameters after `;`.
    pub fn parse(s: &str) -> Option<Self> {
        let without_params = s.split(';').next()?.trim();
        let (kind, subtype) = without_params.split_once('/')?;
        let kind = kind.trim().to_ascii_lowercase();
        let subtype = subtype.trim().to_ascii_lowercase();
        if kind.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(Self { kind, subtype })
    }

    /// Wildcard-aware match.
    pub fn matches(&self, other: &MediaType) -> bool {
        let kind = self.kind == "*" || other.kind == "*" || self.kind == other.kind;
        let subtype = self.subtype == "*" || other.subtype == "*" || self.subtype == other.subtype;
        kind && subtype
    }

    fn specificity(&self) -> u8 {
        let mut score = 0u8;
        if self.kind != "*" {
            score += 2;
        }
        if self.subtype != "*" {
            score += 1;
        }
        score
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)
    }
}

/// A parsed `Accept` header, ordered by quality then specificity.
#[derive(Debug, Clone)]
pub struct Accept {
    entries: Vec<(MediaType, f32)>,
}

impl Accept {
    /// An absent header accepts anything.
    pub fn permissive() -> Self {
        Self {
            entries: vec![(MediaType::any(), 1.0)],
        }
    }

    pub fn parse(header: &str) -> Self {
        let mut entries: Vec<(MediaType, f32)> = header
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                let (media, quality) = split_quality(part);
                MediaType::parse(media).map(|mt| (mt, quality))
            })
            .collect();

        entries.sort_by(|a, b| match b.1.partial_cmp(&a.1) {
            Some(Ordering::Equal) | None => b.0.specificity().cmp(&a.0.specificity()),
            Some(ord) => ord,
        });

        Self { entries }
    }

    /// Quality of the first entry matching the given type, zero if none.
    pub fn quality_for(&self, media_type: &MediaType) -> f32 {
        for (mt, quality) in &self.entries {
            if mt.matches(media_type) {
                return *quality;
            }
        }
        0.0
    }

    pub fn accepts(&self, media_type: &MediaType) -> bool {
        self.quality_for(media_type) > 0.0
    }

    /// Whether JSON should win over a plain-text rendering.
    pub fn prefers_json(&self) -> bool {
        self.quality_for(&MediaType::json()) >= self.quality_for(&MediaType::plain_text())
            && self.accepts(&MediaType::json())
    }
}

impl Default for Accept {
    fn default() -> Self {
        Self::permissive()
    }
}

fn split_quality(s: &str) -> (&str, f32) {
    match s.to_ascii_lowercase().find(";q=") {
        Some(pos) => {
            let quality = s[pos + 3..]
                .split(';')
                .next()
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            (&s[..pos], quality)
        }
        None => (s, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_media_type() {
        assert_eq!(
            MediaType::parse("Application/JSON; charset=utf-8"),
            Some(MediaType::json())
        );
        assert_eq!(MediaType::parse("garbage"), None);
        assert_eq!(MediaType::parse("/json"), None);
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(MediaType::any().matches(&MediaType::json()));
        assert!(MediaType::new("text", "*").matches(&MediaType::plain_text()));
        assert!(!MediaType::new("text", "*").matches(&MediaType::json()));
    }

    #[test]
    fn test_accept_quality_ordering() {
        let accept = Accept::parse("text/plain;q=0.5, application/json, */*;q=0.1");
        assert_eq!(accept.quality_for(&MediaType::json()), 1.0);
        assert_eq!(accept.quality_for(&MediaType::plain_text()), 0.5);
        assert_eq!(accept.quality_for(&MediaType::html()), 0.1);
        assert!(accept.prefers_json());
    }

    #[test]
    fn test_accept_prefers_text() {
        let accept = Accept::parse("text/plain, application/json;q=0.2");
        assert!(!accept.prefers_json());
    }

    #[test]
    fn test_rejected_type() {
        let accept = Accept::parse("text/html");
        assert!(!accept.accepts(&MediaType::json()));
        assert!(!accept.prefers_json());
    }

    #[test]
    fn test_permissive_accepts_everything() {
        let accept = Accept::permissive();
        assert!(accept.accepts(&MediaType::json()));
        assert!(accept.prefers_json());
    }

    #[test]
    fn test_specificity_breaks_quality_ties() {
        let accept = Accept::parse("*/*, application/json");
        assert_eq!(accept.quality_for(&MediaType::json()), 1.0);
        assert!(accept.prefers_json());
    }
}
