//! Placeholder substitution over raw template text.
//!
//! A template is plain text; placeholders are literal tokens. Rendering is a
//! single left-to-right pass where the longest token at the leftmost position
//! wins and inserted text is never scanned again, so a value that happens to
//! contain another token stays as written.

use crate::axis::Binding;
use crate::error::ExpandError;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Token bound to `field` unless the plan says otherwise: `<<FIELD>>`.
pub fn default_token(field: &str) -> String {
    format!("<<{}>>", field.to_ascii_uppercase())
}

fn leftover_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<<+[A-Za-z0-9_]+>>+").expect("leftover pattern"))
}

/// Anything in `document` that still looks like a placeholder.
pub fn leftover_tokens(document: &str) -> Vec<String> {
    leftover_pattern()
        .find_iter(document)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct Template {
    text: String,
    /// token -> field
    tokens: BTreeMap<String, String>,
    matcher: Option<Regex>,
}

impl Template {
    /// Binds the default token of every field, then applies `overrides`
    /// (token -> field). Overrides may only name known fields.
    pub fn new(
        text: impl Into<String>,
        fields: &[String],
        overrides: &BTreeMap<String, String>,
    ) -> Result<Self, ExpandError> {
        let text = text.into();
        let mut tokens: BTreeMap<String, String> = BTreeMap::new();
        for field in fields {
            let token = default_token(field);
            if tokens.insert(token.clone(), field.clone()).is_some() {
                return Err(ExpandError::DuplicateToken(token));
            }
        }
        for (token, field) in overrides {
            if !fields.iter().any(|f| f == field) {
                return Err(ExpandError::UnknownPlaceholderField {
                    token: token.clone(),
                    field: field.clone(),
                });
            }
            if token.is_empty() {
                return Err(ExpandError::EmptyPlaceholder(field.clone()));
            }
            tokens.insert(token.clone(), field.clone());
        }

        let matcher = if tokens.is_empty() {
            None
        } else {
            let mut ordered: Vec<&String> = tokens.keys().collect();
            ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            let alternation = ordered
                .iter()
                .map(|t| regex::escape(t))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&alternation)?)
        };

        let template = Template {
            text,
            tokens,
            matcher,
        };
        for token in template.inert_tokens() {
            debug!(token, "placeholder does not occur in template");
        }
        Ok(template)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tokens.iter().map(|(t, f)| (t.as_str(), f.as_str()))
    }

    /// Tokens that never occur in the text; binding them has no effect.
    pub fn inert_tokens(&self) -> Vec<&str> {
        self.tokens
            .keys()
            .filter(|t| !self.text.contains(t.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn render(&self, binding: &Binding) -> Result<String, ExpandError> {
        let Some(matcher) = &self.matcher else {
            return Ok(self.text.clone());
        };
        let mut values: HashMap<&str, String> = HashMap::with_capacity(self.tokens.len());
        for (token, field) in &self.tokens {
            let value = binding
                .encoded(field)
                .ok_or_else(|| ExpandError::UnknownPlaceholderField {
                    token: token.clone(),
                    field: field.clone(),
                })?;
            values.insert(token.as_str(), value);
        }

        let mut out = String::with_capacity(self.text.len());
        let mut last = 0;
        for m in matcher.find_iter(&self.text) {
            out.push_str(&self.text[last..m.start()]);
            match values.get(m.as_str()) {
                Some(value) => out.push_str(value),
                None => out.push_str(m.as_str()),
            }
            last = m.end();
        }
        out.push_str(&self.text[last..]);

        let leftovers = leftover_tokens(&out);
        if !leftovers.is_empty() {
            warn!(tokens = ?leftovers, "rendered document still contains placeholder-like tokens");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{combinations, Axis, AxisGroup, Encoding};

    fn binding_of(pairs: &[(&str, &str)]) -> Binding {
        let groups: Vec<AxisGroup> = pairs
            .iter()
            .map(|(k, v)| AxisGroup::Free(Axis::new(k, [*v])))
            .collect();
        combinations(&groups).expect("binding").remove(0)
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn renders_default_tokens() {
        let t = Template::new(
            r#"{"cache_dir": "./cache/<<DATASET>>-<<SEED>>", "post": "<<POSTPROCESSOR>>"}"#,
            &fields(&["dataset", "seed", "postprocessor"]),
            &BTreeMap::new(),
        )
        .expect("template");
        let out = t
            .render(&binding_of(&[
                ("dataset", "SMOS"),
                ("seed", "42"),
                ("postprocessor", "req2code"),
            ]))
            .expect("render");
        assert_eq!(out, r#"{"cache_dir": "./cache/SMOS-42", "post": "req2code"}"#);
        assert!(leftover_tokens(&out).is_empty());
    }

    #[test]
    fn longest_token_wins_at_same_position() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "<<<TARGET_ARTIFACT_PROVIDER>>>".to_string(),
            "provider_block".to_string(),
        );
        let t = Template::new(
            "a <<<TARGET_ARTIFACT_PROVIDER>>> b <<TARGET_ARTIFACT_PROVIDER>>",
            &fields(&["provider_block", "target_artifact_provider"]),
            &overrides,
        )
        .expect("template");
        let out = t
            .render(&binding_of(&[
                ("provider_block", "BLOCK"),
                ("target_artifact_provider", "short"),
            ]))
            .expect("render");
        assert_eq!(out, "a BLOCK b short");
    }

    #[test]
    fn inserted_text_is_not_rescanned() {
        let t = Template::new("<<A>>|<<B>>", &fields(&["a", "b"]), &BTreeMap::new())
            .expect("template");
        let out = t
            .render(&binding_of(&[("a", "<<B>>"), ("b", "x")]))
            .expect("render");
        assert_eq!(out, "<<B>>|x");
    }

    #[test]
    fn unused_placeholders_are_inert() {
        let t = Template::new("<<DATASET>>", &fields(&["dataset", "seed"]), &BTreeMap::new())
            .expect("template");
        assert_eq!(t.inert_tokens(), vec!["<<SEED>>"]);
        let out = t
            .render(&binding_of(&[("dataset", "WARC"), ("seed", "1")]))
            .expect("render");
        assert_eq!(out, "WARC");
    }

    #[test]
    fn override_must_name_known_field() {
        let mut overrides = BTreeMap::new();
        overrides.insert("{{X}}".to_string(), "nope".to_string());
        let err = Template::new("{{X}}", &fields(&["dataset"]), &overrides).expect_err("fail");
        assert!(matches!(err, ExpandError::UnknownPlaceholderField { .. }));
    }

    #[test]
    fn empty_override_token_is_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert(String::new(), "dataset".to_string());
        let err = Template::new("<<DATASET>>", &fields(&["dataset"]), &overrides).expect_err("fail");
        assert!(matches!(err, ExpandError::EmptyPlaceholder(f) if f == "dataset"));
    }

    #[test]
    fn fields_colliding_on_default_token_are_rejected() {
        let err = Template::new("", &fields(&["mode", "MODE"]), &BTreeMap::new())
            .expect_err("fail");
        assert!(matches!(err, ExpandError::DuplicateToken(t) if t == "<<MODE>>"));
    }

    #[test]
    fn json_encoded_values_keep_document_valid() {
        let groups = vec![AxisGroup::Free(
            Axis::new("prompt", ["Are they related?\n\nAnswer with 'yes' or \"no\"."])
                .with_encoding(Encoding::Json),
        )];
        let binding = combinations(&groups).expect("binding").remove(0);
        let t = Template::new(
            r#"{"args": {"prompt": <<PROMPT>>}}"#,
            &fields(&["prompt"]),
            &BTreeMap::new(),
        )
        .expect("template");
        let out = t.render(&binding).expect("render");
        let parsed: serde_json::Value = serde_json::from_str(&out).expect("valid json");
        assert_eq!(
            parsed["args"]["prompt"],
            "Are they related?\n\nAnswer with 'yes' or \"no\"."
        );
    }

    #[test]
    fn leftover_tokens_detects_unbound_markers() {
        assert_eq!(
            leftover_tokens(r#"{"a": "<<MISSING>>", "b": <<<BLOCK>>>}"#),
            vec!["<<MISSING>>".to_string(), "<<<BLOCK>>>".to_string()]
        );
        assert!(leftover_tokens("a << b >> c").is_empty());
    }
}
