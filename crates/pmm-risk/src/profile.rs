//! Risk bands and profiles.

use crate::error::{RiskError, RiskResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One 2-D band over (distance to average price %, deposit usage %),
/// both intervals inclusive on both ends, naming the profile to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBand {
    pub distance_start: Decimal,
    pub distance_end: Decimal,
    pub usage_start: Decimal,
    pub usage_end: Decimal,
    pub profile_id: String,
}

impl RiskBand {
    pub fn contains(&self, distance_pct: Decimal, usage_pct: Decimal) -> bool {
        distance_pct >= self.distance_start
            && distance_pct <= self.distance_end
            && usage_pct >= self.usage_start
            && usage_pct <= self.usage_end
    }
}

/// Quoting parameters attached to one risk level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub id: String,
    pub risk_level: u32,
    /// ATR multiplier feeding the quoting interval.
    pub interval_atr_mult: Decimal,
    /// Ladder depth used to apportion the start size.
    pub max_number_dca_orders: u32,
    pub order_pairs: u32,
}

/// Linear scan over the band table; the first band containing the point
/// wins. A gap in the table is fatal.
pub fn resolve_profile<'a>(
    bands: &[RiskBand],
    profiles: &'a [RiskProfile],
    distance_pct: Decimal,
    usage_pct: Decimal,
) -> RiskResult<&'a RiskProfile> {
    for band in bands {
        if band.contains(distance_pct, usage_pct) {
            return profiles
                .iter()
                .find(|p| p.id == band.profile_id)
                .ok_or_else(|| RiskError::UnknownProfile(band.profile_id.clone()));
        }
    }
    Err(RiskError::NoMatchingBand {
        distance_pct,
        usage_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn band(ds: Decimal, de: Decimal, us: Decimal, ue: Decimal, id: &str) -> RiskBand {
        RiskBand {
            distance_start: ds,
            distance_end: de,
            usage_start: us,
            usage_end: ue,
            profile_id: id.to_string(),
        }
    }

    fn profile(id: &str, level: u32) -> RiskProfile {
        RiskProfile {
            id: id.to_string(),
            risk_level: level,
            interval_atr_mult: dec!(1),
            max_number_dca_orders: 10,
            order_pairs: 1,
        }
    }

    fn full_coverage() -> (Vec<RiskBand>, Vec<RiskProfile>) {
        let bands = vec![
            band(dec!(0), dec!(50), dec!(0), dec!(50), "low"),
            band(dec!(0), dec!(50), dec!(50), dec!(100), "mid"),
            band(dec!(50), dec!(100), dec!(0), dec!(100), "high"),
        ];
        let profiles = vec![profile("low", 1), profile("mid", 2), profile("high", 3)];
        (bands, profiles)
    }

    #[test]
    fn test_full_coverage_always_resolves() {
        let (bands, profiles) = full_coverage();
        for (d, u, expect) in [
            (dec!(0), dec!(0), "low"),
            (dec!(25), dec!(75), "mid"),
            (dec!(50), dec!(50), "low"),
            (dec!(75), dec!(10), "high"),
            (dec!(100), dec!(100), "high"),
        ] {
            let p = resolve_profile(&bands, &profiles, d, u).unwrap();
            assert_eq!(p.id, expect, "at ({d}, {u})");
        }
    }

    #[test]
    fn test_inclusive_band_edges() {
        let (bands, profiles) = full_coverage();
        // Both interval ends are members; the first matching band wins
        // on overlap.
        let p = resolve_profile(&bands, &profiles, dec!(50), dec!(100)).unwrap();
        assert_eq!(p.id, "mid");
    }

    #[test]
    fn test_gap_is_fatal() {
        let (bands, profiles) = full_coverage();
        let err = resolve_profile(&bands, &profiles, dec!(101), dec!(0)).unwrap_err();
        assert!(matches!(err, RiskError::NoMatchingBand { .. }));
    }

    #[test]
    fn test_unknown_profile_reference() {
        let bands = vec![band(dec!(0), dec!(100), dec!(0), dec!(100), "ghost")];
        let profiles = vec![profile("low", 1)];
        let err = resolve_profile(&bands, &profiles, dec!(1), dec!(1)).unwrap_err();
        assert!(matches!(err, RiskError::UnknownProfile(_)));
    }
}
