//! Calendar helpers for guest code.
//!
//! Weeks run Monday to Sunday. Period ends are the last microsecond of
//! the period, so `start <= d <= end` works for any timestamp inside it.

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};

use super::Granularity;
use crate::error::SandboxError;
use crate::interp::value::{RelDelta, Value};
use crate::interp::{modules, ops, Namespace};

fn end_of_day(d: NaiveDate) -> NaiveDateTime {
    // 23:59:59.999999 always exists.
    d.and_time(NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN))
}

pub fn start_of_week(dt: NaiveDateTime) -> NaiveDateTime {
    let monday = dt.date() - Duration::days(i64::from(dt.weekday().num_days_from_monday()));
    ops::midnight(monday)
}

pub fn end_of_week(dt: NaiveDateTime) -> NaiveDateTime {
    let sunday = dt.date() + Duration::days(6 - i64::from(dt.weekday().num_days_from_monday()));
    end_of_day(sunday)
}

pub fn start_of_month(dt: NaiveDateTime) -> NaiveDateTime {
    ops::midnight(dt.date().with_day(1).unwrap_or(dt.date()))
}

pub fn end_of_month(dt: NaiveDateTime) -> NaiveDateTime {
    let last = ops::days_in_month(dt.year(), dt.month());
    end_of_day(dt.date().with_day(last).unwrap_or(dt.date()))
}

pub fn start_of_year(dt: NaiveDateTime) -> NaiveDateTime {
    ops::midnight(NaiveDate::from_ymd_opt(dt.year(), 1, 1).unwrap_or(dt.date()))
}

pub fn end_of_year(dt: NaiveDateTime) -> NaiveDateTime {
    end_of_day(NaiveDate::from_ymd_opt(dt.year(), 12, 31).unwrap_or(dt.date()))
}

/// Shifts `dt` by `count` periods. Month and year steps clamp the day to
/// the target month's length; the time of day is kept.
pub fn after_periods(
    dt: NaiveDateTime,
    count: i64,
    granularity: Granularity,
) -> Result<NaiveDateTime, SandboxError> {
    let overflow = || SandboxError::raised(crate::error::ErrorClass::OverflowError, "date value out of range");
    let shifted = match granularity {
        Granularity::Daily => Duration::try_days(count).and_then(|d| dt.checked_add_signed(d)),
        Granularity::Weekly => Duration::try_weeks(count).and_then(|d| dt.checked_add_signed(d)),
        Granularity::Monthly | Granularity::Yearly => {
            let delta = if granularity == Granularity::Monthly {
                RelDelta { months: count, ..RelDelta::default() }
            } else {
                RelDelta { years: count, ..RelDelta::default() }
            };
            Some(ops::add_reldelta(dt.date(), delta)?.and_time(dt.time()))
        }
    };
    shifted.ok_or_else(overflow)
}

/// Human phrase for how far `future` is from `now` ("3 days", "an hour").
pub fn delta_phrase(future: NaiveDateTime, now: NaiveDateTime) -> String {
    let delta = future - now;
    let days = delta.num_seconds().div_euclid(86_400);
    let seconds = delta.num_seconds();
    match days {
        1 => "a day".to_string(),
        d if d > 1 => format!("{d} days"),
        _ if seconds >= 3600 => match seconds / 3600 {
            1 => "an hour".to_string(),
            h => format!("{h} hours"),
        },
        _ if seconds >= 60 => match seconds / 60 {
            1 => "a minute".to_string(),
            m => format!("{m} minutes"),
        },
        _ => "soon".to_string(),
    }
}

fn as_datetime(value: &Value, what: &str) -> Result<NaiveDateTime, SandboxError> {
    match value {
        Value::DateTime(dt) => Ok(*dt),
        Value::Date(d) => Ok(ops::midnight(*d)),
        other => Err(SandboxError::type_error(format!(
            "{what} must be a date or datetime, not {}",
            other.kind()
        ))),
    }
}

fn period_fn(
    name: &'static str,
    f: fn(NaiveDateTime) -> NaiveDateTime,
) -> (&'static str, Value) {
    let value = Value::native(name, move |_, args| {
        let [date] = args.exact::<1>(name)?;
        Ok(Value::DateTime(f(as_datetime(&date, "date")?)))
    });
    (name, value)
}

/// Registers the calendar surface plus the pre-bound date classes.
pub fn install(ns: &mut Namespace) {
    ns.insert(
        "get_date",
        Value::native("get_date", |_, args| {
            let [year, month, day] = args.exact::<3>("get_date")?;
            let dt = modules::build_datetime(
                year.expect_int("year")?,
                month.expect_int("month")?,
                day.expect_int("day")?,
                0,
                0,
                0,
                0,
            )?;
            Ok(Value::DateTime(dt))
        }),
    );
    ns.insert(
        "get_today_date",
        Value::native("get_today_date", |_, args| {
            args.exact::<0>("get_today_date")?;
            Ok(Value::DateTime(Local::now().naive_local()))
        }),
    );
    for (name, value) in [
        period_fn("get_start_of_week", start_of_week),
        period_fn("get_end_of_week", end_of_week),
        period_fn("get_start_of_month", start_of_month),
        period_fn("get_end_of_month", end_of_month),
        period_fn("get_start_of_year", start_of_year),
        period_fn("get_end_of_year", end_of_year),
    ] {
        ns.insert(name, value);
    }
    ns.insert(
        "get_after_periods",
        Value::native("get_after_periods", |_, args| {
            let slots = args.bind("get_after_periods", &["date", "count", "granularity"], 3)?;
            let [date, count, granularity] = [0, 1, 2].map(|i| slots[i].clone().unwrap_or(Value::None));
            let name = granularity.expect_str("granularity")?.to_lowercase();
            let Some(granularity) = Granularity::parse(&name) else {
                return Err(SandboxError::value_error(format!(
                    "Invalid granularity: {name}. Must be one of: daily, weekly, monthly, yearly"
                )));
            };
            let shifted = after_periods(
                as_datetime(&date, "date")?,
                count.expect_int("count")?,
                granularity,
            )?;
            Ok(match date {
                Value::Date(_) => Value::Date(shifted.date()),
                _ => Value::DateTime(shifted),
            })
        }),
    );
    ns.insert(
        "get_date_string",
        Value::native("get_date_string", |_, args| {
            let [date] = args.exact::<1>("get_date_string")?;
            let dt = as_datetime(&date, "date")?;
            Ok(Value::str(dt.format("%Y-%m-%d").to_string()))
        }),
    );
    ns.insert(
        "utter_delta_from_now",
        Value::native("utter_delta_from_now", |_, args| {
            let [future] = args.exact::<1>("utter_delta_from_now")?;
            let future = as_datetime(&future, "future_time")?;
            Ok(Value::str(delta_phrase(future, Local::now().naive_local())))
        }),
    );

    ns.insert("datetime", modules::datetime_class());
    ns.insert("timedelta", modules::timedelta_class());
    ns.insert("relativedelta", modules::relativedelta_class());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{builtins, compile, Interpreter, Limits};

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        ops::midnight(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    // ── period bounds ───────────────────────────────────

    #[test]
    fn test_week_runs_monday_to_sunday() {
        // 2025-03-12 is a Wednesday.
        let wed = dt(2025, 3, 12);
        assert_eq!(start_of_week(wed), dt(2025, 3, 10));
        let end = end_of_week(wed);
        assert_eq!(end.date(), NaiveDate::from_ymd_opt(2025, 3, 16).unwrap());
        assert_eq!(end.format("%H:%M:%S%.6f").to_string(), "23:59:59.999999");
    }

    #[test]
    fn test_month_and_year_bounds() {
        let d = dt(2024, 2, 17);
        assert_eq!(start_of_month(d), dt(2024, 2, 1));
        assert_eq!(end_of_month(d).date(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(start_of_year(d), dt(2024, 1, 1));
        assert_eq!(end_of_year(d).date(), NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[test]
    fn test_after_periods_clamps_month_end() {
        let jan31 = dt(2025, 1, 31);
        assert_eq!(after_periods(jan31, 1, Granularity::Monthly).unwrap(), dt(2025, 2, 28));
        assert_eq!(after_periods(jan31, -2, Granularity::Weekly).unwrap(), dt(2025, 1, 17));
        assert_eq!(after_periods(dt(2024, 2, 29), 1, Granularity::Yearly).unwrap(), dt(2025, 2, 28));
        assert_eq!(after_periods(jan31, 3, Granularity::Daily).unwrap(), dt(2025, 2, 3));
    }

    #[test]
    fn test_delta_phrase() {
        let now = dt(2025, 1, 1);
        assert_eq!(delta_phrase(now + Duration::days(3), now), "3 days");
        assert_eq!(delta_phrase(now + Duration::hours(25), now), "a day");
        assert_eq!(delta_phrase(now + Duration::minutes(61), now), "an hour");
        assert_eq!(delta_phrase(now + Duration::minutes(5), now), "5 minutes");
        assert_eq!(delta_phrase(now + Duration::seconds(20), now), "soon");
    }

    // ── guest surface ───────────────────────────────────

    fn run(source: &str) -> Interpreter {
        let mut ns = Namespace::default();
        builtins::install(&mut ns);
        crate::sandbox::guard::install(&mut ns, &[]);
        install(&mut ns);
        let program = compile(source).unwrap();
        let mut interp = Interpreter::new(ns, Limits::default());
        interp.exec(&program).unwrap();
        interp
    }

    #[test]
    fn test_guest_calendar_calls() {
        let interp = run(concat!(
            "d = get_date(2025, 5, 20)\n",
            "s = get_date_string(get_start_of_month(d))\n",
            "n = get_date_string(get_after_periods(d, 1, 'Monthly'))\n",
        ));
        assert_eq!(interp.global("s"), Some(Value::str("2025-05-01")));
        assert_eq!(interp.global("n"), Some(Value::str("2025-06-20")));
    }

    #[test]
    fn test_guest_bad_date_and_granularity() {
        let mut ns = Namespace::default();
        builtins::install(&mut ns);
        install(&mut ns);
        let mut interp = Interpreter::new(ns, Limits::default());
        let err = interp
            .exec(&compile("get_date(2025, 2, 30)\n").unwrap())
            .unwrap_err();
        assert_eq!(err.to_string(), "ValueError: day is out of range for month");
        let err = interp
            .exec(&compile("get_after_periods(get_date(2025, 1, 1), 1, 'hourly')\n").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("Invalid granularity: hourly"));
    }
}
