//! Template personalization.

use std::collections::HashMap;

/// Replace every `{key}` in `template` with the mapped value.
///
/// Placeholders without a key stay in the output verbatim. Keys missing from
/// the template are ignored. Values are never re-scanned for placeholders, so
/// the result doesn't depend on map iteration order.
pub fn personalize(template: &str, values: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find(['{', '}']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let key = &after[..close];
                match values.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                // Unmatched or nested brace: emit it literally and keep scanning.
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_all_keys() {
        let out = personalize(
            "Hi {name}, from {company}",
            &values(&[("name", "A"), ("company", "B")]),
        );
        assert_eq!(out, "Hi A, from B");
    }

    #[test]
    fn unknown_placeholder_left_verbatim() {
        let out = personalize("Hi {name}, {missing}!", &values(&[("name", "A")]));
        assert_eq!(out, "Hi A, {missing}!");
    }

    #[test]
    fn extra_keys_ignored() {
        let out = personalize("Hello {name}", &values(&[("name", "A"), ("city", "Nairobi")]));
        assert_eq!(out, "Hello A");
    }

    #[test]
    fn repeated_placeholder() {
        let out = personalize("{name} {name}", &values(&[("name", "Zed")]));
        assert_eq!(out, "Zed Zed");
    }

    #[test]
    fn values_are_not_rescanned() {
        let out = personalize(
            "{a} and {b}",
            &values(&[("a", "{b}"), ("b", "two")]),
        );
        assert_eq!(out, "{b} and two");
    }

    #[test]
    fn stray_braces_survive() {
        let out = personalize("price {  and } {name", &values(&[("name", "A")]));
        assert_eq!(out, "price {  and } {name");
        let out = personalize("{{name}}", &values(&[("name", "A")]));
        assert_eq!(out, "{A}");
    }

    #[test]
    fn empty_template() {
        assert_eq!(personalize("", &values(&[("name", "A")])), "");
    }
}
