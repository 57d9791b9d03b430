use futarb_core::ExpiryBucket;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Minimum percent premium, per expiry, for a contract to be alerted on.
///
/// Further expiries carry more cost of carry, so their thresholds are higher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub current: Decimal,
    pub near: Decimal,
    pub far: Decimal,
    /// Contracts named in an alert message before "and N more".
    pub max_listed: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self::dashboard()
    }
}

impl AlertThresholds {
    /// 1% / 2% / 3% for current / near / far, eight contracts listed.
    pub fn dashboard() -> Self {
        Self {
            current: dec!(1.0),
            near: dec!(2.0),
            far: dec!(3.0),
            max_listed: 8,
        }
    }

    /// The same threshold for every expiry.
    pub fn uniform(percent: Decimal) -> Self {
        Self {
            current: percent,
            near: percent,
            far: percent,
            ..Self::dashboard()
        }
    }

    pub fn for_bucket(&self, bucket: ExpiryBucket) -> Option<Decimal> {
        match bucket {
            ExpiryBucket::Current => Some(self.current),
            ExpiryBucket::Near => Some(self.near),
            ExpiryBucket::Far => Some(self.far),
            ExpiryBucket::Unknown => None,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_thresholds() {
        let t = AlertThresholds::default();
        assert_eq!(t.for_bucket(ExpiryBucket::Current), Some(dec!(1.0)));
        assert_eq!(t.for_bucket(ExpiryBucket::Near), Some(dec!(2.0)));
        assert_eq!(t.for_bucket(ExpiryBucket::Far), Some(dec!(3.0)));
        assert_eq!(t.for_bucket(ExpiryBucket::Unknown), None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let t = AlertThresholds::from_toml_str("far = 4.5\nmax_listed = 3\n").unwrap();
        assert_eq!(t.far, dec!(4.5));
        assert_eq!(t.current, dec!(1.0));
        assert_eq!(t.max_listed, 3);
    }
}
