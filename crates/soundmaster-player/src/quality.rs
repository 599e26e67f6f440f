//! Quality selector: maps a listener-facing tier to engine hints.

use soundmaster_proto::protocol::{QualitySetting, QualityTier};

pub const STREAM_FORMAT: &str = "mp3";

/// Fixed bitrate table.  Quality and source selection are independent: a tier
/// applies to whichever source is currently active.
pub fn select_quality(tier: QualityTier) -> QualitySetting {
    let bitrate_kbps = match tier {
        QualityTier::Low => 64,
        QualityTier::Medium => 128,
        QualityTier::High => 320,
    };
    QualitySetting {
        tier,
        bitrate_kbps,
        format: STREAM_FORMAT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_tiers() {
        assert_eq!(select_quality(QualityTier::Low).bitrate_kbps, 64);
        assert_eq!(select_quality(QualityTier::Medium).bitrate_kbps, 128);
        assert_eq!(select_quality(QualityTier::High).bitrate_kbps, 320);
    }

    #[test]
    fn bitrate_increases_with_tier() {
        let rates: Vec<u32> = QualityTier::ALL
            .iter()
            .map(|t| select_quality(*t).bitrate_kbps)
            .collect();
        assert!(rates.windows(2).all(|w| w[0] < w[1]));
        assert!(QualityTier::ALL
            .iter()
            .all(|t| select_quality(*t).format == "mp3"));
    }
}
