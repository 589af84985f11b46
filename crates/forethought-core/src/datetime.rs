use std::fs;
use std::path::PathBuf;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

pub const STORAGE_FORMAT: &str =
  "%Y%m%dT%H%M%SZ";

const TIMEZONE_CONFIG_FILE: &str =
  "forethought-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "FORETHOUGHT_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "FORETHOUGHT_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Resolves the timezone that defines
/// "local midnight" for reset
/// boundaries.
///
/// Order: the configured value, the
/// `FORETHOUGHT_TIMEZONE` env var, the
/// TOML time file, `TZ`, then UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  if let Ok(raw) = std::env::var("TZ")
    && let Some(tz) =
      parse_timezone(&raw, "TZ")
  {
    return tz;
  }

  tracing::warn!(
    "no timezone configured; local \
     midnight is evaluated in UTC"
  );
  chrono_tz::UTC
}

#[must_use]
pub fn local_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  dt.with_timezone(&tz).date_naive()
}

#[must_use]
pub fn format_storage(
  dt: DateTime<Utc>
) -> String {
  dt.format(STORAGE_FORMAT).to_string()
}

/// First existing local instant of
/// `date` in `tz`, as UTC.
///
/// Midnight falls inside a DST gap in
/// a few zones; the day then starts at
/// the first valid quarter hour.
pub fn start_of_local_day(
  date: NaiveDate,
  tz: Tz
) -> Option<DateTime<Utc>> {
  let midnight =
    date.and_hms_opt(0, 0, 0)?;
  for step in 0..=12 {
    let candidate = midnight
      + Duration::minutes(step * 15);
    match tz
      .from_local_datetime(&candidate)
    {
      | LocalResult::Single(dt) => {
        return Some(
          dt.with_timezone(&Utc)
        );
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        let earliest = first.min(second);
        return Some(
          earliest.with_timezone(&Utc)
        );
      }
      | LocalResult::None => continue
    }
  }
  None
}

pub fn parse_weekday(
  token: &str
) -> Option<Weekday> {
  match token
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::debug!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      Ok(
        first
          .min(second)
          .with_timezone(&Utc)
      )
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in configured \
         timezone: {context}"
      ))
    }
  }
}

/// Parses the `--now` clock override.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" | "tomorrow"
    | "yesterday" => {
      let today = local_date(now, tz);
      let date = match lower.as_str() {
        | "tomorrow" => today.succ_opt(),
        | "yesterday" => today.pred_opt(),
        | _ => Some(today)
      };
      return date
        .and_then(|date| {
          start_of_local_day(date, tz)
        })
        .ok_or_else(|| {
          anyhow!(
            "failed to construct \
             midnight for {lower}"
          )
        });
    }
    | _ => {}
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let local = local_date(now, tz)
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct clock \
           time"
        )
      })?;
    return to_utc_from_local(
      local,
      tz,
      "clock-time"
    );
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let duration = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("d") => Duration::days(num),
      | Some("h") => {
        Duration::hours(num)
      }
      | Some("m") => {
        Duration::minutes(num)
      }
      | other => {
        return Err(anyhow!(
          "unknown relative unit: \
           {other:?}"
        ));
      }
    };

    return Ok(
      if sign == "-" {
        now - duration
      } else {
        now + duration
      }
    );
  }

  if let Ok(ndt) =
    NaiveDateTime::parse_from_str(
      token,
      STORAGE_FORMAT
    )
  {
    return Ok(
      DateTime::<Utc>::from_naive_utc_and_offset(
        ndt, Utc
      )
    );
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return start_of_local_day(date, tz)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct \
           midnight for date"
        )
      });
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        ndt, tz, fmt
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     clock times (e.g. 3:23pm or \
     15:23), +Nd/+Nh/+Nm, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM, YYYYMMDDTHHMMSSZ"
  })
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm_match
      .as_str()
      .to_ascii_lowercase()
      .as_str()
    {
      | "am" => raw_hour % 12,
      | "pm" => raw_hour % 12 + 12,
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

/// Compact UTC timestamps for stored
/// task records.
pub mod storage_date_serde {
  use chrono::{
    DateTime,
    NaiveDateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  use super::STORAGE_FORMAT;

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt
        .format(STORAGE_FORMAT)
        .to_string()
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    parse(&raw)
      .map_err(serde::de::Error::custom)
  }

  pub(crate) fn parse(
    raw: &str
  ) -> Result<DateTime<Utc>, chrono::ParseError>
  {
    NaiveDateTime::parse_from_str(
      raw,
      STORAGE_FORMAT
    )
    .map(|ndt| {
      DateTime::<Utc>::from_naive_utc_and_offset(
        ndt, Utc
      )
    })
  }

  /// Optional timestamp that never
  /// fails: malformed input becomes
  /// `None`.
  pub mod lenient_option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let value = Option::<
        serde_json::Value
      >::deserialize(
        deserializer
      )?;
      let Some(value) = value else {
        return Ok(None);
      };

      let parsed = value
        .as_str()
        .and_then(|raw| {
          super::parse(raw).ok().or_else(
            || {
              DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
            }
          )
        });
      if parsed.is_none() {
        tracing::warn!(
          value = %value,
          "ignoring malformed completion timestamp"
        );
      }
      Ok(parsed)
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    local_date,
    parse_date_expr,
    parse_weekday,
    start_of_local_day
  };

  #[test]
  fn parses_clock_time_on_same_local_day()
   {
    let tz = chrono_tz::Europe::Berlin;
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 6, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed =
      parse_date_expr("3:23pm", now, tz)
        .expect("parse clock time");
    assert_eq!(
      parsed
        .with_timezone(&tz)
        .format("%Y-%m-%d %H:%M")
        .to_string(),
      "2026-02-17 15:23"
    );
  }

  #[test]
  fn parses_relative_offsets() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed = parse_date_expr(
      "+2d",
      now,
      chrono_tz::UTC
    )
    .expect("parse relative");
    assert_eq!(
      local_date(parsed, chrono_tz::UTC),
      NaiveDate::from_ymd_opt(
        2026, 2, 19
      )
      .expect("valid date")
    );
  }

  #[test]
  fn today_is_local_midnight() {
    let tz = chrono_tz::America::New_York;
    let now = Utc
      .with_ymd_and_hms(
        2026, 7, 1, 3, 0, 0
      )
      .single()
      .expect("valid now");
    let today =
      parse_date_expr("today", now, tz)
        .expect("parse today");
    // 03:00Z is still June 30th in New York (UTC-4).
    assert_eq!(
      today,
      Utc
        .with_ymd_and_hms(
          2026, 6, 30, 4, 0, 0
        )
        .single()
        .expect("valid midnight")
    );
  }

  #[test]
  fn start_of_day_skips_dst_gap() {
    // Chile springs forward at local midnight.
    let tz = chrono_tz::America::Santiago;
    let date =
      NaiveDate::from_ymd_opt(
        2024, 9, 8
      )
      .expect("valid date");
    let start =
      start_of_local_day(date, tz)
        .expect("day has a start");
    assert_eq!(
      start
        .with_timezone(&tz)
        .date_naive(),
      date
    );
  }

  #[test]
  fn parses_weekday_abbreviations() {
    assert_eq!(
      parse_weekday("Sun"),
      Some(chrono::Weekday::Sun)
    );
    assert_eq!(parse_weekday("x"), None);
  }
}
