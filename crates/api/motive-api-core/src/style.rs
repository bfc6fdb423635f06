//! Style values and ordered style maps.
//!
//! A style map preserves declaration order (it is visible in emitted
//! keyframes), hence IndexMap rather than a hash map.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Sentinel meaning "resolve this property from computed style once the
/// animation lands" (the post-style bucket).
pub const AUTO_STYLE: &str = "*";

/// Sentinel meaning "capture the pre-existing value of this property before
/// the animation starts" (the pre-style bucket).
pub const PRE_STYLE: &str = "!";

/// One style property value. Numbers stay numeric so embedders can decide on
/// units; everything else is carried as text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleValue {
    Number(f32),
    Text(String),
}

impl StyleValue {
    #[inline]
    pub fn auto() -> Self {
        StyleValue::Text(AUTO_STYLE.to_string())
    }

    #[inline]
    pub fn pre() -> Self {
        StyleValue::Text(PRE_STYLE.to_string())
    }

    #[inline]
    pub fn is_auto(&self) -> bool {
        matches!(self, StyleValue::Text(s) if s == AUTO_STYLE)
    }

    #[inline]
    pub fn is_pre(&self) -> bool {
        matches!(self, StyleValue::Text(s) if s == PRE_STYLE)
    }

    /// Render the value the way a driver would receive it.
    pub fn as_text(&self) -> String {
        match self {
            StyleValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            StyleValue::Text(s) => s.clone(),
        }
    }
}

impl From<f32> for StyleValue {
    fn from(v: f32) -> Self {
        StyleValue::Number(v)
    }
}

impl From<&str> for StyleValue {
    fn from(v: &str) -> Self {
        StyleValue::Text(v.to_string())
    }
}

impl From<String> for StyleValue {
    fn from(v: String) -> Self {
        StyleValue::Text(v)
    }
}

/// Ordered property -> value map.
pub type StyleMap = IndexMap<String, StyleValue>;

/// Copy every entry of `from` into `into`, overwriting existing keys.
pub fn copy_into(from: &StyleMap, into: &mut StyleMap) {
    for (prop, value) in from {
        into.insert(prop.clone(), value.clone());
    }
}

/// Build a style map from literal pairs. Convenience for tests and fixtures.
pub fn style_map<I, K, V>(entries: I) -> StyleMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<StyleValue>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// it should keep declaration order and round-trip through serde
    #[test]
    fn ordered_and_serde() {
        let m = style_map([("width", 10.0), ("height", 20.0)]);
        let keys: Vec<_> = m.keys().cloned().collect();
        assert_eq!(keys, vec!["width".to_string(), "height".to_string()]);

        let s = serde_json::to_string(&m).unwrap();
        let back: StyleMap = serde_json::from_str(&s).unwrap();
        assert_eq!(m, back);
    }

    /// it should recognize the auto and pre sentinels
    #[test]
    fn sentinels() {
        assert!(StyleValue::auto().is_auto());
        assert!(StyleValue::pre().is_pre());
        assert!(!StyleValue::Number(1.0).is_auto());
    }
}
