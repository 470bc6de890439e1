use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Korea Standard Time has no daylight saving, so a fixed offset is exact.
pub const KST_OFFSET_HOURS: i64 = 9;

/// Source of the ledger's calendar day.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Day boundaries follow Korea Standard Time regardless of the machine's
/// local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct KoreaStandardClock;

impl KoreaStandardClock {
    pub fn date_at(instant: DateTime<Utc>) -> NaiveDate {
        (instant + Duration::hours(KST_OFFSET_HOURS)).date_naive()
    }
}

impl Clock for KoreaStandardClock {
    fn today(&self) -> NaiveDate {
        Self::date_at(Utc::now())
    }
}

#[cfg(test)]
pub use testing::FixedClock;


#[cfg(test)]
mod tests {
    use super::KoreaStandardClock;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn day_rolls_over_at_kst_midnight() {
        let before = Utc.with_ymd_and_hms(2024, 5, 31, 14, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 5, 31, 15, 0, 0).unwrap();

        assert_eq!(
            KoreaStandardClock::date_at(before),
            NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()
        );
        assert_eq!(
            KoreaStandardClock::date_at(after),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
    }
}
