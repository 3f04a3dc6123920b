//! Sorted label encoding for categorical strings

use serde::{Deserialize, Serialize};

/// Bijection between observed strings and `0..k`, in sorted order.
///
/// Values not seen during fit encode to `-1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut classes: Vec<String> = values.into_iter().map(str::to_string).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    /// Fitted classes in code order
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(value))
            .ok()
    }

    /// Code for `value`, or `-1` when unseen
    pub fn encode(&self, value: &str) -> i64 {
        self.index_of(value).map_or(-1, |i| i as i64)
    }

    pub fn decode(&self, code: usize) -> Option<&str> {
        self.classes.get(code).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_sorted_order() {
        let encoder = LabelEncoder::fit(["poor", "good", "fair", "good"]);
        assert_eq!(encoder.classes(), &["fair", "good", "poor"]);
        assert_eq!(encoder.encode("fair"), 0);
        assert_eq!(encoder.encode("poor"), 2);
        assert_eq!(encoder.decode(1), Some("good"));
    }

    #[test]
    fn test_unseen_value_is_minus_one() {
        let encoder = LabelEncoder::fit(["Samsung", "Apple"]);
        assert_eq!(encoder.encode("UnknownBrand"), -1);
        assert_eq!(encoder.decode(5), None);
    }

    #[test]
    fn test_persisted_encoder_is_identical() {
        let encoder = LabelEncoder::fit(["US", "EU", "ASIA"]);
        let json = serde_json::to_string(&encoder).unwrap();
        let restored: LabelEncoder = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, encoder);
        assert_eq!(restored.encode("EU"), encoder.encode("EU"));
    }
}
