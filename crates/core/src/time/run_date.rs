use chrono::{DateTime, NaiveDate, Utc};

/// Date stamped on every record of a run. An explicit `YYYY-MM-DD` wins,
/// otherwise the UTC calendar date of `now_utc`.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|err| anyhow::anyhow!("invalid as-of date {s:?}: {err}"));
    }
    Ok(now_utc.date_naive())
}
