//! Matching concrete request paths against OpenAPI path templates.
//!
//! A template like `/users/{id}` matches a request path when both split
//! into the same number of `/`-separated segments and every literal
//! segment is byte-equal; `{...}` segments match any single segment.

/// One segment of a parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Parameter segment; holds the name without braces.
    Param(String),
}

/// Parse a template path into segments.
pub fn parse_template(template: &str) -> Vec<Segment> {
    template
        .trim_start_matches('/')
        .split('/')
        .map(|part| {
            if part.starts_with('{') && part.ends_with('}') && part.len() > 2 {
                Segment::Param(part[1..part.len() - 1].to_string())
            } else {
                Segment::Literal(part.to_string())
            }
        })
        .collect()
}

/// Check whether parsed template segments match a concrete path.
pub fn segments_match(segments: &[Segment], path: &str) -> bool {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    if parts.len() != segments.len() {
        return false;
    }
    segments.iter().zip(parts).all(|(seg, part)| match seg {
        Segment::Param(_) => true,
        Segment::Literal(lit) => lit == part,
    })
}

pub fn template_matches(template: &str, path: &str) -> bool {
    segments_match(&parse_template(template), path)
}

/// Resolve a concrete path to the first matching template, if any.
/// Used for index lookups and diagnostics.
pub fn normalize_path<'a, I>(path: &str, templates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    templates
        .into_iter()
        .find(|template| template_matches(template, path))
}

/// Number of parameter segments in a parsed template. Paths with fewer
/// parameters are more specific and are tried first by the index.
pub fn param_count(segments: &[Segment]) -> usize {
    segments
        .iter()
        .filter(|s| matches!(s, Segment::Param(_)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(template_matches("/users", "/users"));
        assert!(!template_matches("/users", "/orders"));
    }

    #[test]
    fn test_param_matches_any_literal() {
        assert!(template_matches("/users/{id}", "/users/42"));
        assert!(template_matches("/users/{id}", "/users/abc-def"));
        assert!(template_matches("/users/{id}", "/users/{weird}"));
    }

    #[test]
    fn test_segment_count_must_match() {
        assert!(!template_matches("/users/{id}", "/users"));
        assert!(!template_matches("/users/{id}", "/users/42/posts"));
        assert!(!template_matches("/users", "/users/42"));
    }

    #[test]
    fn test_mixed_segments() {
        assert!(template_matches(
            "/users/{id}/posts/{post_id}",
            "/users/7/posts/99"
        ));
        assert!(!template_matches(
            "/users/{id}/posts/{post_id}",
            "/users/7/comments/99"
        ));
    }

    #[test]
    fn test_normalize_path_returns_template() {
        let templates = vec!["/users", "/users/{id}", "/orders/{id}"];
        assert_eq!(
            normalize_path("/users/42", templates.iter().copied()),
            Some("/users/{id}")
        );
        assert_eq!(
            normalize_path("/users", templates.iter().copied()),
            Some("/users")
        );
        assert_eq!(normalize_path("/nothing", templates.iter().copied()), None);
    }

    #[test]
    fn test_param_substitution_property() {
        // Any non-slash replacement of a parameter segment still matches.
        let template = "/v1/items/{item}/tags/{tag}";
        for item in ["1", "x", "%20", "very-long-segment", "{tag}"] {
            for tag in ["a", "0", "..", "~"] {
                let path = format!("/v1/items/{item}/tags/{tag}");
                assert!(template_matches(template, &path), "path {path}");
            }
        }
    }

    #[test]
    fn test_empty_braces_are_literal() {
        // "{}" carries no parameter name and is treated literally.
        assert!(template_matches("/x/{}", "/x/{}"));
        assert!(!template_matches("/x/{}", "/x/anything"));
    }

    #[test]
    fn test_param_count() {
        assert_eq!(param_count(&parse_template("/users/{id}")), 1);
        assert_eq!(param_count(&parse_template("/users/me")), 0);
        assert_eq!(param_count(&parse_template("/{a}/{b}/{c}")), 3);
    }
}
