use chrono::{Duration, TimeZone, Utc};

use sapi_settlement::scheduler::renewal_period;

#[test]
fn explicit_plan_duration_wins() {
    let now = Utc.with_ymd_and_hms(2024, 2, 10, 12, 0, 0).unwrap();
    assert_eq!(renewal_period(Some(30), now), Duration::days(30));
    assert_eq!(renewal_period(Some(7), now), Duration::days(7));
}

// тариф без длительности продлевается на длину текущего календарного
// месяца, а не на фиксированные 30 дней
#[test]
fn fallback_uses_current_month_length() {
    let leap_february = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
    assert_eq!(renewal_period(None, leap_february), Duration::days(29));

    let plain_february = Utc.with_ymd_and_hms(2023, 2, 10, 0, 0, 0).unwrap();
    assert_eq!(renewal_period(None, plain_february), Duration::days(28));

    let january = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
    assert_eq!(renewal_period(None, january), Duration::days(31));

    let december = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
    assert_eq!(renewal_period(None, december), Duration::days(31));
}
