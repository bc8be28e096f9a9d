//! Template rendering
//!
//! Substitutes the placeholder tokens a template body may carry with the
//! recipient's own attributes. A token with no matching attribute is left
//! literally in the output.

use bw_common::ContactRecord;

/// Render a template body for one recipient.
///
/// Supported tokens: `@name` plus the three generic slots `@variable1`,
/// `@variable2`, `@variable3`.
pub fn render(body: &str, contact: &ContactRecord) -> String {
    let substitutions = [
        ("@variable1", contact.variable1.as_deref()),
        ("@variable2", contact.variable2.as_deref()),
        ("@variable3", contact.variable3.as_deref()),
        ("@name", contact.name.as_deref()),
    ];

    let mut out = body.to_string();
    for (token, value) in substitutions {
        if let Some(value) = value {
            out = out.replace(token, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: Option<&str>, v1: Option<&str>, v2: Option<&str>) -> ContactRecord {
        ContactRecord {
            contact_id: "c1".to_string(),
            name: name.map(str::to_string),
            phone: "111".to_string(),
            variable1: v1.map(str::to_string),
            variable2: v2.map(str::to_string),
            variable3: None,
        }
    }

    #[test]
    fn substitutes_matching_tokens() {
        let rendered = render(
            "@name, your code is @variable1",
            &contact(Some("Ana"), Some("123"), None),
        );
        assert_eq!(rendered, "Ana, your code is 123");
    }

    #[test]
    fn unmatched_token_stays_literal() {
        let rendered = render(
            "@name: @variable2 expires soon",
            &contact(Some("Ana"), Some("123"), None),
        );
        assert_eq!(rendered, "Ana: @variable2 expires soon");
    }

    #[test]
    fn missing_name_stays_literal() {
        let rendered = render("hello @name", &contact(None, None, None));
        assert_eq!(rendered, "hello @name");
    }

    #[test]
    fn body_without_tokens_passes_through() {
        let rendered = render("plain text", &contact(Some("Ana"), None, None));
        assert_eq!(rendered, "plain text");
    }

    #[test]
    fn repeated_tokens_all_substituted() {
        let rendered = render(
            "@name @name @variable2",
            &contact(Some("Ana"), None, Some("x")),
        );
        assert_eq!(rendered, "Ana Ana x");
    }
}
