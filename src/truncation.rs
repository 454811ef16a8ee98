//! Bounding of string results before they enter the conversation.
//!
//! A truncated result always ends with an explicit marker stating how many
//! characters were dropped, so a downstream model never receives an
//! incomplete-looking string without notice. Lengths are counted in
//! `char`s, never bytes, so the cut always lands on a character boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;

const MARKER_PREFIX: &str = "\n\n[truncated: ";
const MARKER_SUFFIX: &str = " characters omitted]";
/// Digits in `u64::MAX`
const MAX_COUNT_DIGITS: usize = 20;

/// Stateless size bound for tool results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncationPolicy {
    max_chars: Option<usize>,
}

impl TruncationPolicy {
    pub const DEFAULT_MAX_CHARS: usize = 10_000;

    /// Truncate anything longer than `max_chars` characters.
    #[must_use]
    pub const fn new(max_chars: usize) -> Self {
        Self {
            max_chars: Some(max_chars),
        }
    }

    /// Never truncate.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { max_chars: None }
    }

    /// The configured bound, `None` when unbounded.
    #[must_use]
    pub const fn max_chars(&self) -> Option<usize> {
        self.max_chars
    }

    /// The marker appended when `omitted` characters were dropped.
    #[must_use]
    pub fn marker_for(omitted: usize) -> String {
        format!("{MARKER_PREFIX}{omitted}{MARKER_SUFFIX}")
    }

    /// Whether `text` ends with a truncation marker.
    #[must_use]
    pub fn is_truncated(text: &str) -> bool {
        split_marker(text).is_some()
    }

    /// Bound `text` to the configured size.
    ///
    /// Text within the bound is returned unchanged. Longer text keeps its
    /// first `max_chars` characters followed by the marker, so the result
    /// never exceeds `max_chars + marker length`. Output of this policy is
    /// a fixed point: applying it again returns it unchanged.
    #[must_use]
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let Some(max_chars) = self.max_chars else {
            return Cow::Borrowed(text);
        };

        // A byte length within the bound implies a char count within it.
        if text.len() <= max_chars {
            return Cow::Borrowed(text);
        }

        let total = text.chars().count();
        if total <= max_chars {
            return Cow::Borrowed(text);
        }

        if let Some((kept, omitted)) = split_marker(text)
            && kept.chars().count() <= max_chars
            && total <= max_chars + Self::marker_for(omitted).chars().count()
        {
            return Cow::Borrowed(text);
        }

        let cut = text
            .char_indices()
            .nth(max_chars)
            .map_or(text.len(), |(index, _)| index);
        let omitted = total - max_chars;

        let mut truncated =
            String::with_capacity(cut + MARKER_PREFIX.len() + MARKER_SUFFIX.len() + 20);
        truncated.push_str(&text[..cut]);
        truncated.push_str(&Self::marker_for(omitted));
        Cow::Owned(truncated)
    }
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CHARS)
    }
}

/// Splits a well-formed trailing marker off `text`, returning the text
/// before it and the omitted count it states.
///
/// Only counts this policy could have written are accepted: a canonical
/// decimal that fits in a `usize`.
fn split_marker(text: &str) -> Option<(&str, usize)> {
    let body = text.strip_suffix(MARKER_SUFFIX)?;
    let start = body.rfind(MARKER_PREFIX)?;
    let count = &body[start + MARKER_PREFIX.len()..];
    if count.is_empty() || count.len() > MAX_COUNT_DIGITS {
        return None;
    }
    let canonical = count.len() == 1 || !count.starts_with('0');
    if !canonical || !count.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let omitted = count.parse().ok()?;
    Some((&text[..start], omitted))
}

/// Serialized as an integer, or the string `"unbounded"`.
impl Serialize for TruncationPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.max_chars {
            Some(max) => serializer.serialize_u64(max as u64),
            None => serializer.serialize_str("unbounded"),
        }
    }
}

impl<'de> Deserialize<'de> for TruncationPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Limit(usize),
            Keyword(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Limit(max) => Ok(Self::new(max)),
            Raw::Keyword(keyword) if keyword.eq_ignore_ascii_case("unbounded") => {
                Ok(Self::unbounded())
            }
            Raw::Keyword(other) => Err(serde::de::Error::custom(format!(
                "invalid max_chars '{other}': expected a positive integer or \"unbounded\""
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_text_unchanged() {
        let policy = TruncationPolicy::new(10);
        assert!(matches!(policy.apply("hello"), Cow::Borrowed("hello")));
        assert_eq!(policy.apply("0123456789"), "0123456789");
    }

    #[test]
    fn test_long_text_truncated_with_marker() {
        let policy = TruncationPolicy::new(5);
        let result = policy.apply("abcdefghij");
        assert_eq!(result, "abcde\n\n[truncated: 5 characters omitted]");
        assert!(TruncationPolicy::is_truncated(&result));
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let policy = TruncationPolicy::new(3);
        // Four chars, twelve bytes
        let result = policy.apply("日本語字");
        assert_eq!(result, format!("日本語{}", TruncationPolicy::marker_for(1)));

        // Within the char budget even though bytes exceed it
        assert_eq!(policy.apply("日本語"), "日本語");
    }

    #[test]
    fn test_unbounded_never_truncates() {
        let policy = TruncationPolicy::unbounded();
        let text = "x".repeat(100_000);
        assert_eq!(policy.apply(&text).len(), 100_000);
        assert_eq!(policy.max_chars(), None);
    }

    #[test]
    fn test_default_limit() {
        assert_eq!(TruncationPolicy::default().max_chars(), Some(10_000));
    }

    #[test]
    fn test_reapplying_is_idempotent() {
        let policy = TruncationPolicy::new(8);
        let once = policy.apply("a long tool result string").into_owned();
        let twice = policy.apply(&once);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_malformed_marker_is_not_trusted() {
        let policy = TruncationPolicy::new(4);
        let text = "abcdefgh\n\n[truncated: many characters omitted]";
        assert!(!TruncationPolicy::is_truncated(text));
        let result = policy.apply(text);
        assert!(result.starts_with("abcd\n\n[truncated: "));
    }

    #[test]
    fn test_oversized_marker_is_not_trusted() {
        let policy = TruncationPolicy::new(10);
        let text = format!("abc\n\n[truncated: {} characters omitted]", "9".repeat(5000));
        assert!(!TruncationPolicy::is_truncated(&text));

        let result = policy.apply(&text);

        let omitted = text.chars().count() - 10;
        let bound = 10 + TruncationPolicy::marker_for(omitted).chars().count();
        assert!(result.chars().count() <= bound);
        assert_eq!(
            result,
            format!("abc\n\n[trun{}", TruncationPolicy::marker_for(omitted))
        );
    }

    #[test]
    fn test_marker_with_leading_zeros_is_not_trusted() {
        assert!(!TruncationPolicy::is_truncated(
            "abc\n\n[truncated: 007 characters omitted]"
        ));
        assert!(TruncationPolicy::is_truncated(
            "abc\n\n[truncated: 0 characters omitted]"
        ));
    }

    #[test]
    fn test_deserialize_limit_or_unbounded() {
        let policy: TruncationPolicy = serde_json::from_str("2000").unwrap();
        assert_eq!(policy.max_chars(), Some(2000));

        let policy: TruncationPolicy = serde_json::from_str("\"unbounded\"").unwrap();
        assert_eq!(policy, TruncationPolicy::unbounded());

        assert!(serde_json::from_str::<TruncationPolicy>("\"lots\"").is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        assert_eq!(
            serde_json::to_string(&TruncationPolicy::new(42)).unwrap(),
            "42"
        );
        assert_eq!(
            serde_json::to_string(&TruncationPolicy::unbounded()).unwrap(),
            "\"unbounded\""
        );
    }

    proptest! {
        #[test]
        fn prop_within_budget_is_identity(text in "[a-zA-Zé ]{0,64}", extra in 0usize..32) {
            let max = text.chars().count() + extra;
            let policy = TruncationPolicy::new(max);
            prop_assert_eq!(policy.apply(&text), text.as_str());
        }

        #[test]
        fn prop_result_never_exceeds_budget_plus_marker(
            text in "[a-z0-9 \n]{0,400}",
            max in 0usize..200
        ) {
            let policy = TruncationPolicy::new(max);
            let result = policy.apply(&text);
            let total = text.chars().count();
            let bound = if total > max {
                max + TruncationPolicy::marker_for(total - max).chars().count()
            } else {
                max
            };
            prop_assert!(result.chars().count() <= bound);
        }

        #[test]
        fn prop_apply_is_fixed_point(text in "[a-z0-9 \n]{0,400}", max in 0usize..200) {
            let policy = TruncationPolicy::new(max);
            let once = policy.apply(&text).into_owned();
            let twice = policy.apply(&once).into_owned();
            prop_assert_eq!(once, twice);
        }
    }
}
