//! Billing weight buckets and their rate-table rows.
//!
//! Rounding always goes up: a 15.2 oz parcel bills as 16 oz (the 1 lb
//! bucket), a 1.1 lb parcel bills as 2 lb.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Float noise tolerated before rounding up (1.0000000001 lb stays 1 lb).
const ROUNDING_EPSILON: f64 = 1e-9;

const OUNCES_PER_POUND: f64 = 16.0;

/// Discrete billing weight: sixteenths of a pound below 1 lb, whole pounds
/// from 1 to 20 lb.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WeightBucket {
    Ounces(u8),
    Pounds(u8),
}

impl WeightBucket {
    pub const MAX_OUNCES: u8 = 15;
    pub const MAX_POUNDS: u8 = 20;

    pub fn ounces(value: u8) -> Option<Self> {
        (1..=Self::MAX_OUNCES)
            .contains(&value)
            .then_some(Self::Ounces(value))
    }

    pub fn pounds(value: u8) -> Option<Self> {
        (1..=Self::MAX_POUNDS)
            .contains(&value)
            .then_some(Self::Pounds(value))
    }

    /// The bucket as a rational number of pounds: `(numerator, denominator)`.
    pub fn fraction(self) -> (u16, u16) {
        match self {
            Self::Ounces(oz) => (u16::from(oz), 16),
            Self::Pounds(lb) => (u16::from(lb), 1),
        }
    }

    pub fn as_pounds(self) -> f64 {
        let (num, den) = self.fraction();
        f64::from(num) / f64::from(den)
    }

    /// Every bucket, lightest first.
    pub fn all() -> impl Iterator<Item = WeightBucket> {
        (1..=Self::MAX_OUNCES)
            .map(Self::Ounces)
            .chain((1..=Self::MAX_POUNDS).map(Self::Pounds))
    }

    /// Buckets an observed weight. Ounces win over pounds when both are
    /// present; missing, non-positive or over-range weights yield `None`.
    pub fn for_weight(ounces: Option<f64>, pounds: Option<f64>) -> Option<Self> {
        let usable = |value: Option<f64>| value.filter(|v| v.is_finite() && *v > 0.0);

        if let Some(oz) = usable(ounces) {
            return Self::from_ounces(oz);
        }
        let lb = usable(pounds)?;
        if lb < 1.0 {
            Self::from_ounces(lb * OUNCES_PER_POUND)
        } else {
            Self::from_pounds(lb)
        }
    }

    fn from_ounces(oz: f64) -> Option<Self> {
        if oz < OUNCES_PER_POUND {
            let steps = round_up(oz);
            if steps < OUNCES_PER_POUND {
                return Self::ounces(steps as u8);
            }
            return Self::pounds(1);
        }
        Self::from_pounds(oz / OUNCES_PER_POUND)
    }

    fn from_pounds(lb: f64) -> Option<Self> {
        let whole = round_up(lb);
        if whole > f64::from(Self::MAX_POUNDS) {
            return None;
        }
        Self::pounds(whole as u8)
    }
}

fn round_up(value: f64) -> f64 {
    (value - ROUNDING_EPSILON).ceil().max(1.0)
}

impl fmt::Display for WeightBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ounces(oz) => write!(f, "{oz}oz"),
            Self::Pounds(lb) => write!(f, "{lb}lb"),
        }
    }
}

/// Row arithmetic for a rate table laid out as an ounce block followed by a
/// pound block, inside a fixed row window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RowMapping {
    /// Row of the 1 oz bucket is `ounce_base_row + 1`.
    pub ounce_base_row: u32,
    /// Row of the 1 lb bucket is `pound_base_row + 1`.
    pub pound_base_row: u32,
    pub first_row: u32,
    pub last_row: u32,
}

impl Default for RowMapping {
    fn default() -> Self {
        Self {
            ounce_base_row: 4,
            pound_base_row: 19,
            first_row: 5,
            last_row: 39,
        }
    }
}

impl RowMapping {
    /// Rate-table row for `bucket`, or `None` when it falls outside the window.
    pub fn row_for(&self, bucket: WeightBucket) -> Option<u32> {
        let row = match bucket {
            WeightBucket::Ounces(oz) => self.ounce_base_row + u32::from(oz),
            WeightBucket::Pounds(lb) => self.pound_base_row + u32::from(lb),
        };
        (self.first_row..=self.last_row).contains(&row).then_some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ounces_round_up_to_sixteenths() {
        assert_eq!(WeightBucket::for_weight(Some(15.0), None), WeightBucket::ounces(15));
        assert_eq!(WeightBucket::for_weight(Some(0.2), None), WeightBucket::ounces(1));
        assert_eq!(WeightBucket::for_weight(Some(4.01), None), WeightBucket::ounces(5));
        assert_eq!(WeightBucket::for_weight(Some(15.5), None), WeightBucket::pounds(1));
        assert_eq!(WeightBucket::for_weight(Some(16.0), None), WeightBucket::pounds(1));
        assert_eq!(WeightBucket::for_weight(Some(16.1), None), WeightBucket::pounds(2));
    }

    #[test]
    fn pounds_round_up_to_whole_pounds() {
        assert_eq!(WeightBucket::for_weight(None, Some(1.1)), WeightBucket::pounds(2));
        assert_eq!(WeightBucket::for_weight(None, Some(1.0)), WeightBucket::pounds(1));
        assert_eq!(WeightBucket::for_weight(None, Some(0.9375)), WeightBucket::ounces(15));
        assert_eq!(WeightBucket::for_weight(None, Some(20.0)), WeightBucket::pounds(20));
        assert_eq!(WeightBucket::for_weight(None, Some(20.01)), None);
    }

    #[test]
    fn ounces_take_precedence_over_pounds() {
        assert_eq!(WeightBucket::for_weight(Some(8.0), Some(3.0)), WeightBucket::ounces(8));
        assert_eq!(WeightBucket::for_weight(Some(0.0), Some(3.0)), WeightBucket::pounds(3));
        assert_eq!(WeightBucket::for_weight(None, None), None);
    }

    #[test]
    fn rounding_never_goes_down_across_the_grid() {
        for tenth in 1..=3200_u32 {
            let oz = f64::from(tenth) / 10.0;
            let bucket = WeightBucket::for_weight(Some(oz), None).expect("in range");
            assert!(bucket.as_pounds() * 16.0 + 1e-9 >= oz, "{oz}oz -> {bucket}");
        }
    }

    #[test]
    fn rows_follow_base_offsets_and_window() {
        let rows = RowMapping::default();
        assert_eq!(rows.row_for(WeightBucket::Ounces(1)), Some(5));
        assert_eq!(rows.row_for(WeightBucket::Ounces(15)), Some(19));
        assert_eq!(rows.row_for(WeightBucket::Pounds(1)), Some(20));
        assert_eq!(rows.row_for(WeightBucket::Pounds(20)), Some(39));

        let narrow = RowMapping {
            last_row: 30,
            ..RowMapping::default()
        };
        assert_eq!(narrow.row_for(WeightBucket::Pounds(12)), None);
    }

    #[test]
    fn bucket_set_is_closed() {
        assert_eq!(WeightBucket::all().count(), 35);
        assert_eq!(WeightBucket::ounces(16), None);
        assert_eq!(WeightBucket::pounds(0), None);
    }
}
