//! `:name` placeholder substitution for target path templates.
use std::collections::HashMap;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace each `:name` token in `template` with the matching route parameter.
///
/// Single left-to-right pass: substituted values are never re-scanned, and a
/// token with no matching parameter is emitted unchanged.
pub fn substitute_path_params(template: &str, params: &HashMap<String, String>) -> String {
    if params.is_empty() || !template.contains(':') {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(colon) = rest.find(':') {
        out.push_str(&rest[..colon]);
        let after = &rest[colon + 1..];
        let name_len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        let name = &after[..name_len];

        match params.get(name) {
            Some(value) if !name.is_empty() => out.push_str(value),
            _ => {
                out.push(':');
                out.push_str(name);
            }
        }
        rest = &after[name_len..];
    }
    out.push_str(rest);
    out
}

/// Names captured by a template or route path (`:name` and `*name` tokens).
pub fn placeholders(template: &str) -> Vec<&str> {
    template
        .split('/')
        .flat_map(|segment| {
            segment
                .match_indices([':', '*'])
                .map(move |(i, _)| &segment[i + 1..])
        })
        .map(|tail| {
            let end = tail.find(|c: char| !is_name_char(c)).unwrap_or(tail.len());
            &tail[..end]
        })
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_single_parameter() {
        let out = substitute_path_params("/employees/:id", &params(&[("id", "42")]));
        assert_eq!(out, "/employees/42");
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let p = params(&[("id", "42")]);
        let once = substitute_path_params("/employees", &p);
        assert_eq!(once, "/employees");
        assert_eq!(substitute_path_params(&once, &p), once);
    }

    #[test]
    fn absent_parameter_stays_literal() {
        let out = substitute_path_params(
            "/teams/:team_id/members/:member_id",
            &params(&[("team_id", "7")]),
        );
        assert_eq!(out, "/teams/7/members/:member_id");
    }

    #[test]
    fn value_containing_token_is_not_rescanned() {
        let out = substitute_path_params(
            "/a/:first/:second",
            &params(&[("first", ":second"), ("second", "x")]),
        );
        assert_eq!(out, "/a/:second/x");
    }

    #[test]
    fn prefix_names_do_not_collide() {
        let out = substitute_path_params("/x/:id/:idx", &params(&[("id", "1"), ("idx", "2")]));
        assert_eq!(out, "/x/1/2");
    }

    #[test]
    fn repeated_placeholder_is_replaced_everywhere() {
        let out = substitute_path_params("/:id/copy/:id", &params(&[("id", "9")]));
        assert_eq!(out, "/9/copy/9");
    }

    #[test]
    fn wildcard_value_keeps_slashes() {
        let out = substitute_path_params(
            "/v2/:path",
            &params(&[("path", "library/nginx/manifests/latest")]),
        );
        assert_eq!(out, "/v2/library/nginx/manifests/latest");
    }

    #[test]
    fn bare_colon_is_preserved() {
        let out = substitute_path_params("/time/12:/:id", &params(&[("id", "3")]));
        assert_eq!(out, "/time/12:/3");
    }

    #[test]
    fn placeholders_lists_both_capture_styles() {
        assert_eq!(
            placeholders("/api/:team_id/files/*path"),
            vec!["team_id", "path"]
        );
        assert!(placeholders("/health").is_empty());
    }
}
