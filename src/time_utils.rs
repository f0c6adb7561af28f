use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;

#[derive(Clone, Copy)]
enum ParsedTimezone {
    Named(Tz),
    Fixed(FixedOffset),
}

fn parse_fixed_offset(raw: &str) -> Option<FixedOffset> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (sign, rest) = match trimmed.chars().next()? {
        '+' => (1, &trimmed[1..]),
        '-' => (-1, &trimmed[1..]),
        _ => return None,
    };

    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    let (hours, minutes) = if let Some((h, m)) = rest.split_once(':') {
        (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?)
    } else if rest.len() > 2 {
        let (h, m) = rest.split_at(rest.len() - 2);
        (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?)
    } else {
        (rest.parse::<i32>().ok()?, 0)
    };

    if hours > 14 || minutes > 59 {
        return None;
    }

    let total_seconds = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(total_seconds)
}

fn parse_timezone(raw: &str) -> Option<ParsedTimezone> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("gmt") {
        return FixedOffset::east_opt(0).map(ParsedTimezone::Fixed);
    }

    let upper = trimmed.to_uppercase();
    if upper.starts_with("UTC") || upper.starts_with("GMT") {
        let offset = trimmed.trim_start_matches("UTC").trim_start_matches("GMT");
        if offset.is_empty() {
            return FixedOffset::east_opt(0).map(ParsedTimezone::Fixed);
        }
        if let Some(parsed) = parse_fixed_offset(offset) {
            return Some(ParsedTimezone::Fixed(parsed));
        }
    }

    trimmed.parse::<Tz>().ok().map(ParsedTimezone::Named)
}

/// Validates a timezone identifier, returning it in trimmed form.
/// Accepts IANA names plus UTC/GMT and fixed `UTC+H[:MM]` offsets.
pub fn normalize_timezone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_timezone(trimmed).map(|_| trimmed.to_string())
}

pub fn is_valid_timezone(raw: &str) -> bool {
    normalize_timezone(raw).is_some()
}

/// Local calendar date in the given zone; falls back to the UTC date when
/// the zone does not parse.
pub fn local_date(raw_tz: &str, utc_dt: DateTime<Utc>) -> NaiveDate {
    match parse_timezone(raw_tz) {
        Some(ParsedTimezone::Named(tz)) => utc_dt.with_timezone(&tz).date_naive(),
        Some(ParsedTimezone::Fixed(offset)) => utc_dt.with_timezone(&offset).date_naive(),
        None => utc_dt.date_naive(),
    }
}

/// Strict `YYYY-MM-DD` parse with real-calendar validation. Rejects short
/// forms like `2024-2-3` as well as impossible dates like `2024-02-30`.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let bytes = value.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    for (i, b) in bytes.iter().enumerate() {
        if i == 4 || i == 7 {
            continue;
        }
        if !b.is_ascii_digit() {
            return None;
        }
    }
    let year: i32 = value[0..4].parse().ok()?;
    let month: u32 = value[5..7].parse().ok()?;
    let day: u32 = value[8..10].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// The date of the next strictly-future Monday on the caller's local
/// calendar. A Monday maps 7 days ahead, never to itself.
pub fn compute_next_monday_week_start(now: DateTime<Utc>, timezone: &str) -> Option<NaiveDate> {
    parse_timezone(timezone)?;
    let today = local_date(timezone, now);
    let mut days_until = (7 - today.weekday().num_days_from_monday() as i64) % 7;
    if days_until == 0 {
        days_until = 7;
    }
    Some(today + Duration::days(days_until))
}

/// The 7 consecutive dates starting at `week_start`. Plain calendar
/// arithmetic on the date value, no timezone involved.
pub fn build_week_days(week_start: NaiveDate) -> Vec<NaiveDate> {
    (0..7).map(|i| week_start + Duration::days(i)).collect()
}

pub fn is_date_in_week(date: NaiveDate, week_start: NaiveDate) -> bool {
    let diff = (date - week_start).num_days();
    (0..=6).contains(&diff)
}
