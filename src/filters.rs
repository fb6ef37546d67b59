//! Value filters available inside `{{ ... | filter }}` expressions

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;
use sha1::{Digest, Sha1};

/// Maximum length of a DNS-1123 label
const DNS_LABEL_MAX: usize = 63;
/// Hex digits of the hash suffix used when a label is truncated
const DNS_HASH_LEN: usize = 8;

static DNS_INVALID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]+").unwrap());
static SLUG_INVALID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]+").unwrap());

/// Filters known to the expression parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// DNS-1123-ish label: lowercase alnum and dash, at most 63 chars
    Dns,
    /// Looser slug for params: keep letters, digits and `._-`
    Slug,
    ToJson,
    Lower,
    Upper,
    Trim,
    String,
    Length,
    Replace,
    Default,
}

impl Filter {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "dns" => Filter::Dns,
            "slug" => Filter::Slug,
            "tojson" => Filter::ToJson,
            "lower" => Filter::Lower,
            "upper" => Filter::Upper,
            "trim" => Filter::Trim,
            "string" => Filter::String,
            "length" | "count" => Filter::Length,
            "replace" => Filter::Replace,
            "default" | "d" => Filter::Default,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Filter::Dns => "dns",
            Filter::Slug => "slug",
            Filter::ToJson => "tojson",
            Filter::Lower => "lower",
            Filter::Upper => "upper",
            Filter::Trim => "trim",
            Filter::String => "string",
            Filter::Length => "length",
            Filter::Replace => "replace",
            Filter::Default => "default",
        }
    }

    /// Accepted argument counts (inclusive)
    pub fn arity(self) -> (usize, usize) {
        match self {
            Filter::Replace => (2, 2),
            Filter::Default => (0, 1),
            _ => (0, 0),
        }
    }

    /// Apply the filter to a defined value
    ///
    /// `default` is handled by the evaluator since it only acts on undefined
    /// operands; here it passes the value through.
    pub fn apply(self, value: Value, args: &[Value]) -> Value {
        match self {
            Filter::Dns => Value::String(dns(&display(&value))),
            Filter::Slug => Value::String(slug(&display(&value))),
            Filter::ToJson => Value::String(to_json(&value)),
            Filter::Lower => Value::String(display(&value).to_lowercase()),
            Filter::Upper => Value::String(display(&value).to_uppercase()),
            Filter::Trim => Value::String(display(&value).trim().to_string()),
            Filter::String => Value::String(display(&value)),
            Filter::Length => Value::from(length(&value) as u64),
            Filter::Replace => {
                let from = args.first().map(display).unwrap_or_default();
                let to = args.get(1).map(display).unwrap_or_default();
                Value::String(display(&value).replace(&from, &to))
            }
            Filter::Default => value,
        }
    }
}

/// DNS-1123-ish label
///
/// Lowercases, collapses runs of other characters to `-` and trims dashes.
/// Labels over 63 characters keep a 54-character prefix plus an 8-digit
/// SHA-1 suffix of the full label.
pub fn dns(s: &str) -> String {
    let lowered = s.to_lowercase();
    let label = DNS_INVALID.replace_all(&lowered, "-");
    let label = label.trim_matches('-');
    if label.len() <= DNS_LABEL_MAX {
        return label.to_string();
    }

    let digest = hex::encode(Sha1::digest(label.as_bytes()));
    // Only ASCII survives the replacement above, so byte slicing is safe.
    let prefix = &label[..DNS_LABEL_MAX - 1 - DNS_HASH_LEN];
    format!("{}-{}", prefix, &digest[..DNS_HASH_LEN])
        .trim_matches('-')
        .to_string()
}

/// Replace runs of characters outside `[A-Za-z0-9_.-]` with `-`
pub fn slug(s: &str) -> String {
    SLUG_INVALID.replace_all(s, "-").into_owned()
}

/// Text form of a value as it appears in rendered output
///
/// Booleans and null use the `True`/`False`/`None` spelling of Jinja
/// templates; collections render as compact JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Tagged(tagged) => display(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => to_json(value),
    }
}

fn to_json(value: &Value) -> String {
    // Mappings with non-string keys have no JSON form; fall back to YAML flow text.
    serde_json::to_string(value).unwrap_or_else(|_| {
        serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default()
    })
}

fn length(value: &Value) -> usize {
    match value {
        Value::Sequence(seq) => seq.len(),
        Value::Mapping(map) => map.len(),
        Value::Tagged(tagged) => length(&tagged.value),
        other => display(other).chars().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_lowercases_and_dashes() {
        assert_eq!(dns("Meta-Llama/Llama-3.1_8B"), "meta-llama-llama-3-1-8b");
        assert_eq!(dns("--Hello World--"), "hello-world");
    }

    #[test]
    fn test_dns_truncates_with_hash() {
        let long = "a".repeat(80);
        let out = dns(&long);
        assert_eq!(out.len(), DNS_LABEL_MAX);
        assert!(out.starts_with(&"a".repeat(54)));
        assert_eq!(&out[54..55], "-");

        // Deterministic
        assert_eq!(out, dns(&long));
    }

    #[test]
    fn test_dns_short_label_untouched() {
        let exact = "b".repeat(63);
        assert_eq!(dns(&exact), exact);
    }

    #[test]
    fn test_slug_keeps_safe_chars() {
        assert_eq!(slug("meta-llama/Llama-3.1_8B"), "meta-llama-Llama-3.1_8B");
        assert_eq!(slug("a  b::c"), "a-b-c");
    }

    #[test]
    fn test_display_spellings() {
        assert_eq!(display(&Value::Bool(true)), "True");
        assert_eq!(display(&Value::Null), "None");
        assert_eq!(display(&Value::from(3)), "3");
        let seq: Value = serde_yaml::from_str("[a, 1]").unwrap();
        assert_eq!(display(&seq), r#"["a",1]"#);
    }

    #[test]
    fn test_filter_lookup() {
        assert_eq!(Filter::from_name("dns"), Some(Filter::Dns));
        assert_eq!(Filter::from_name("d"), Some(Filter::Default));
        assert_eq!(Filter::from_name("nope"), None);
        assert_eq!(Filter::Replace.arity(), (2, 2));
    }

    #[test]
    fn test_replace_and_length() {
        let v = Value::String("a.b.c".into());
        let out = Filter::Replace.apply(v.clone(), &[Value::from("."), Value::from("-")]);
        assert_eq!(out, Value::String("a-b-c".into()));
        assert_eq!(Filter::Length.apply(v, &[]), Value::from(5u64));
    }
}
