use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::{DateTime, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str = "tally-time.toml";
const TIMEZONE_ENV_VAR: &str = "TALLY_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str = "TALLY_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str = "America/Bogota";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
    timezone: Option<String>,
    time: Option<TimezoneSection>,
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
    timezone: Option<String>,
}

/// The fixed zone all day boundaries are computed in. Tasks belong to a
/// calendar day in this zone, not in UTC and not in the machine's local zone.
pub fn project_timezone() -> &'static Tz {
    static PROJECT_TZ: OnceLock<Tz> = OnceLock::new();
    PROJECT_TZ.get_or_init(resolve_project_timezone)
}

#[must_use]
pub fn to_project_date(dt: DateTime<Utc>) -> NaiveDate {
    dt.with_timezone(project_timezone()).date_naive()
}

/// 23:59:59.999 of `dt`'s calendar day in the project timezone, as UTC.
/// This is the cutoff a running timer is force-stopped at on day rollover.
pub fn end_of_day(dt: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let local_date = dt.with_timezone(project_timezone()).date_naive();
    let cutoff = local_date
        .and_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| anyhow!("failed to construct end-of-day for {local_date}"))?;

    match project_timezone().from_local_datetime(&cutoff) {
        LocalResult::Single(local_dt) => Ok(local_dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => {
            tracing::warn!(
                first = %first,
                second = %second,
                "ambiguous end-of-day; using earliest"
            );
            let chosen = if first <= second { first } else { second };
            Ok(chosen.with_timezone(&Utc))
        }
        LocalResult::None => Err(anyhow!(
            "end-of-day does not exist in configured timezone: {cutoff}"
        )),
    }
}

fn resolve_project_timezone() -> Tz {
    if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR) {
        if let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR) {
            return tz;
        }
    }

    if let Some(path) = timezone_config_path()
        && let Some(tz) = load_timezone_from_file(&path)
    {
        return tz;
    }

    parse_timezone(DEFAULT_PROJECT_TIMEZONE, "DEFAULT_PROJECT_TIMEZONE").unwrap_or_else(|| {
        tracing::error!("failed to parse fallback timezone; using UTC");
        chrono_tz::UTC
    })
}

fn timezone_config_path() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var(TIMEZONE_CONFIG_ENV_VAR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    std::env::current_dir()
        .ok()
        .map(|dir| dir.join(TIMEZONE_CONFIG_FILE))
}

fn load_timezone_from_file(path: &PathBuf) -> Option<Tz> {
    if !path.exists() {
        tracing::debug!(file = %path.display(), "timezone config file not found");
        return None;
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(
                file = %path.display(),
                error = %err,
                "failed reading timezone config file"
            );
            return None;
        }
    };

    let parsed = match toml::from_str::<TimezoneConfig>(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::error!(
                file = %path.display(),
                error = %err,
                "failed parsing timezone config file"
            );
            return None;
        }
    };

    let timezone = parsed
        .timezone
        .or_else(|| parsed.time.and_then(|section| section.timezone));
    let Some(timezone) = timezone else {
        tracing::warn!(
            file = %path.display(),
            "timezone config had no timezone field"
        );
        return None;
    };

    parse_timezone(timezone.as_str(), &format!("file:{}", path.display()))
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured project timezone");
            Some(tz)
        }
        Err(err) => {
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

pub mod compact_date_serde {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format("%Y%m%dT%H%M%SZ").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, "%Y%m%dT%H%M%SZ")
            .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike, Utc};

    use super::{end_of_day, project_timezone, to_project_date};

    #[test]
    fn cutoff_lands_at_end_of_local_day() {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 14, 15, 30, 0)
            .single()
            .expect("valid now");
        let cutoff = end_of_day(now).expect("cutoff");
        let local = cutoff.with_timezone(project_timezone());

        assert_eq!(local.hour(), 23);
        assert_eq!(local.minute(), 59);
        assert_eq!(local.second(), 59);
        assert_eq!(local.timestamp_subsec_millis(), 999);
        assert_eq!(local.date_naive(), to_project_date(now));
    }

    #[test]
    fn cutoff_independent_of_time_of_day() {
        let morning = Utc
            .with_ymd_and_hms(2026, 3, 14, 11, 0, 1)
            .single()
            .expect("valid morning");
        let evening = Utc
            .with_ymd_and_hms(2026, 3, 14, 23, 59, 59)
            .single()
            .expect("valid evening");

        // Same project-tz day, same cutoff.
        if to_project_date(morning) == to_project_date(evening) {
            assert_eq!(
                end_of_day(morning).expect("morning cutoff"),
                end_of_day(evening).expect("evening cutoff")
            );
        }
    }

    #[test]
    fn cutoff_is_after_input() {
        let now = Utc
            .with_ymd_and_hms(2026, 7, 1, 4, 0, 0)
            .single()
            .expect("valid now");
        assert!(end_of_day(now).expect("cutoff") > now);
    }
}
