use anyhow::{Context, anyhow};
use chrono::{
  DateTime,
  Datelike,
  Days,
  Local,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use regex::Regex;

/// Parses a due-date expression relative to
/// `today`: `today`, `tomorrow`,
/// `yesterday`, a weekday name (next
/// occurrence, never today), `+Nd` /
/// `+Nw`, or `YYYY-MM-DD`.
pub fn parse_due_date(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return today
        .checked_add_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | "yesterday" => {
      return today
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| {
          anyhow!("date out of range")
        });
    }
    | _ => {}
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, weekday
    ));
  }

  let rel_re = Regex::new(r"^\+(?P<num>\d+)(?P<unit>[dw])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: u64 = caps["num"]
      .parse()
      .context(
        "invalid relative amount"
      )?;
    let days = match &caps["unit"] {
      | "w" => num.saturating_mul(7),
      | _ => num
    };
    return today
      .checked_add_days(Days::new(days))
      .ok_or_else(|| {
        anyhow!(
          "date out of range: {token}"
        )
      });
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .with_context(|| {
    format!(
      "unrecognized date: {token}"
    )
  })
}

/// Parses a reminder: RFC 3339, or
/// `YYYY-MM-DD HH:MM` in local time.
pub fn parse_reminder(
  input: &str
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  if let Ok(parsed) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(
      parsed.with_timezone(&Utc)
    );
  }

  let naive =
    NaiveDateTime::parse_from_str(
      token,
      "%Y-%m-%d %H:%M"
    )
    .with_context(|| {
      format!(
        "unrecognized reminder time: \
         {token}"
      )
    })?;

  Local
    .from_local_datetime(&naive)
    .earliest()
    .map(|local| {
      local.with_timezone(&Utc)
    })
    .ok_or_else(|| {
      anyhow!(
        "reminder time does not exist \
         locally: {token}"
      )
    })
}

fn parse_weekday_name(
  s: &str
) -> Option<Weekday> {
  match s {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" => {
      Some(Weekday::Thu)
    }
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

fn next_weekday_date(
  today: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let current = today
    .weekday()
    .num_days_from_monday();
  let wanted =
    target.num_days_from_monday();
  let mut delta =
    (7 + wanted - current) % 7;
  if delta == 0 {
    delta = 7;
  }
  today + Days::new(u64::from(delta))
}
