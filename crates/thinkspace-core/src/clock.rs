use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Wall clock at the precision the row service stores (microseconds), so a
/// row read back compares equal to the copy that was written.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Next `updated_at` for a row last stamped at `prev`. Strictly increasing
/// even when the wall clock stalls or steps backwards.
pub fn advance(prev: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > prev { now } else { prev + Duration::microseconds(1) }
}
