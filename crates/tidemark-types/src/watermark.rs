//! Temporal-key watermarks.
//!
//! A watermark is the largest temporal-key tuple successfully persisted to
//! the analytics store. Composite keys compare lexicographically over the
//! tuple; a component backed by an integer column compares numerically,
//! everything else as text (temporal values are ISO-8601 UTC strings, so
//! text order is chronological).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Separator between components in the persisted single-string form.
const COMPONENT_SEP: char = '\u{1f}';

/// How one watermark component is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentOrder {
    /// Numeric comparison (integer-typed key column).
    Numeric,
    /// Plain text comparison (timestamps, strings, decimals-as-text).
    Text,
}

/// Ordered temporal-key tuple, one component per key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(Vec<String>);

impl Watermark {
    #[must_use]
    pub fn new(components: Vec<String>) -> Self {
        Self(components)
    }

    /// Single-component watermark, the common case.
    #[must_use]
    pub fn single(value: impl Into<String>) -> Self {
        Self(vec![value.into()])
    }

    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Persisted single-string form (`\u{1f}`-joined components).
    #[must_use]
    pub fn encode(&self) -> String {
        self.0.join(&COMPONENT_SEP.to_string())
    }

    /// Parse the persisted single-string form.
    #[must_use]
    pub fn decode(raw: &str) -> Self {
        Self(raw.split(COMPONENT_SEP).map(str::to_string).collect())
    }

    /// Lexicographic tuple comparison with per-component ordering rules.
    ///
    /// Missing `orders` entries default to [`ComponentOrder::Text`]. Tuples
    /// of unequal arity compare by shared prefix, then by length.
    #[must_use]
    pub fn compare(&self, other: &Self, orders: &[ComponentOrder]) -> Ordering {
        for (i, (a, b)) in self.0.iter().zip(&other.0).enumerate() {
            let order = orders.get(i).copied().unwrap_or(ComponentOrder::Text);
            let cmp = match order {
                ComponentOrder::Numeric => match (a.parse::<i64>(), b.parse::<i64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => a.cmp(b),
                },
                ComponentOrder::Text => a.cmp(b),
            };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        self.0.len().cmp(&other.0.len())
    }

    /// Pointwise maximum: returns whichever of the two compares greater.
    #[must_use]
    pub fn max(self, other: Self, orders: &[ComponentOrder]) -> Self {
        if self.compare(&other, orders) == Ordering::Less {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let wm = Watermark::new(vec!["2026-01-15T10:00:00Z".into(), "42".into()]);
        assert_eq!(Watermark::decode(&wm.encode()), wm);
    }

    #[test]
    fn single_component_roundtrip_has_no_separator() {
        let wm = Watermark::single("2026-01-15T10:00:00Z");
        assert_eq!(wm.encode(), "2026-01-15T10:00:00Z");
    }

    #[test]
    fn text_comparison_is_chronological_for_iso_timestamps() {
        let a = Watermark::single("2026-01-15T10:00:00Z");
        let b = Watermark::single("2026-02-01T00:00:00Z");
        assert_eq!(a.compare(&b, &[ComponentOrder::Text]), Ordering::Less);
    }

    #[test]
    fn numeric_components_compare_by_value() {
        let a = Watermark::single("9");
        let b = Watermark::single("10");
        assert_eq!(a.compare(&b, &[ComponentOrder::Numeric]), Ordering::Less);
        // Text ordering would invert this.
        assert_eq!(a.compare(&b, &[ComponentOrder::Text]), Ordering::Greater);
    }

    #[test]
    fn composite_ties_break_on_second_component() {
        let orders = [ComponentOrder::Text, ComponentOrder::Numeric];
        let a = Watermark::new(vec!["2026-01-15T10:00:00Z".into(), "7".into()]);
        let b = Watermark::new(vec!["2026-01-15T10:00:00Z".into(), "12".into()]);
        assert_eq!(a.compare(&b, &orders), Ordering::Less);
        assert_eq!(a.clone().max(b.clone(), &orders), b);
    }

    #[test]
    fn equal_tuples_compare_equal() {
        let orders = [ComponentOrder::Text];
        let a = Watermark::single("x");
        assert_eq!(a.compare(&a.clone(), &orders), Ordering::Equal);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn encode_decode_roundtrips(parts in proptest::collection::vec("[a-zA-Z0-9:TZ.-]{0,16}", 1..4)) {
                let wm = Watermark::new(parts);
                prop_assert_eq!(Watermark::decode(&wm.encode()), wm);
            }

            // compare() is antisymmetric, so max() always picks the same
            // winner regardless of argument order.
            #[test]
            fn max_is_order_insensitive(a in -500i64..500, b in -500i64..500) {
                let orders = [ComponentOrder::Numeric];
                let x = Watermark::single(a.to_string());
                let y = Watermark::single(b.to_string());
                let left = x.clone().max(y.clone(), &orders);
                let right = y.max(x, &orders);
                prop_assert_eq!(left, right);
            }
        }
    }
}
