//! Zero-argument "now" functions usable as `${NAME}` tokens.
//!
//! Plain names render in UTC. `KST_*` names and the date-formatting helpers
//! render in Korea Standard Time (UTC+9).

use chrono::{DateTime, Datelike, FixedOffset, Utc};

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Every recognised function name.
pub const FUNCTION_NAMES: &[&str] = &[
    "CURRENT_TIMESTAMP",
    "CURRENT_DATETIME",
    "NOW",
    "GETDATE",
    "CURRENT_DATE",
    "CURRENT_TIME",
    "ISO_TIMESTAMP",
    "UNIX_TIMESTAMP",
    "TIMESTAMP_MS",
    "KST_NOW",
    "KST_DATETIME",
    "KST_DATE",
    "KST_TIME",
    "KST_ISO_TIMESTAMP",
    "KOREAN_DATE",
    "KOREAN_DATETIME",
    "KOREAN_DATE_SHORT",
    "DATE_YYYYMMDD",
    "DATE_YYYY_MM_DD",
    "DATETIME_YYYYMMDD_HHMMSS",
    "WEEKDAY_EN",
    "WEEKDAY_KR",
    "MONTH_KR",
    "YEAR_KR",
];

const WEEKDAYS_EN: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const WEEKDAYS_KR: [&str; 7] = [
    "일요일", "월요일", "화요일", "수요일", "목요일", "금요일", "토요일",
];

pub fn is_timestamp_function(name: &str) -> bool {
    FUNCTION_NAMES.contains(&name)
}

fn kst(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    match FixedOffset::east_opt(KST_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset),
        None => now.fixed_offset(),
    }
}

/// Renders the function `name` at instant `now`, or `None` for unknown names.
pub fn render(name: &str, now: DateTime<Utc>) -> Option<String> {
    let local = kst(now);
    let weekday = local.weekday().num_days_from_sunday() as usize;

    let text = match name {
        "CURRENT_TIMESTAMP" | "CURRENT_DATETIME" | "NOW" | "GETDATE" => {
            now.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        "CURRENT_DATE" => now.format("%Y-%m-%d").to_string(),
        "CURRENT_TIME" => now.format("%H:%M:%S").to_string(),
        "ISO_TIMESTAMP" => now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "UNIX_TIMESTAMP" => now.timestamp().to_string(),
        "TIMESTAMP_MS" => now.timestamp_millis().to_string(),

        "KST_NOW" | "KST_DATETIME" => local.format("%Y-%m-%d %H:%M:%S").to_string(),
        "KST_DATE" | "DATE_YYYY_MM_DD" => local.format("%Y-%m-%d").to_string(),
        "KST_TIME" => local.format("%H:%M:%S").to_string(),
        "KST_ISO_TIMESTAMP" => local.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string(),

        "KOREAN_DATE" => local.format("%Y년 %-m월 %-d일").to_string(),
        "KOREAN_DATETIME" => local.format("%Y년 %-m월 %-d일 %H:%M:%S").to_string(),
        "KOREAN_DATE_SHORT" => local.format("%Y. %m. %d.").to_string(),
        "DATE_YYYYMMDD" => local.format("%Y%m%d").to_string(),
        "DATETIME_YYYYMMDD_HHMMSS" => local.format("%Y%m%d_%H%M%S").to_string(),

        "WEEKDAY_EN" => WEEKDAYS_EN[weekday].to_string(),
        "WEEKDAY_KR" => WEEKDAYS_KR[weekday].to_string(),
        "MONTH_KR" => format!("{}월", local.month()),
        "YEAR_KR" => format!("{}년", local.year()),
        _ => return None,
    };
    Some(text)
}
