use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{errors::Error, generator::IdRange, Result};

pub const DISTRIBUTION_CADENCE_RANGE: (u32, u32) = (1, 60);
pub const DISTRIBUTION_BATCH_RANGE: (u32, u32) = (1, 50);
pub const GENERATION_BATCH_MAX: u32 = 500;

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram adapter (only required by the binary)
    pub telegram_bot_token: Option<String>,
    pub admin_chat_id: Option<i64>,

    // Schedulers
    pub generation_cadence_minutes: u32,
    pub generation_batch_size: u32,
    pub distribution_cadence_minutes: u32,
    pub distribution_batch_size: u32,
    pub retry_threshold: u32,

    // Generation shape
    pub id_range: IdRange,
    pub leading_digits: Vec<u8>,
    pub min_digits: usize,
    pub max_digits: usize,

    // Remote pacing
    pub verify_delay: Duration,
    pub delivery_delay: Duration,
    pub probe_enabled: bool,
    pub invite_link_expiry: Duration,

    // Internal
    pub pool_lock_timeout: Duration,
    pub groups_file: Option<PathBuf>,
    /// Groups registered at startup (`ROSTER_GROUP_IDS`, comma separated).
    pub seed_group_ids: Vec<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            admin_chat_id: None,
            generation_cadence_minutes: 10,
            generation_batch_size: 20,
            distribution_cadence_minutes: 2,
            distribution_batch_size: 5,
            retry_threshold: 3,
            id_range: IdRange {
                min: 1_000_000_000,
                max: 9_999_999_999,
            },
            leading_digits: vec![1, 2, 5, 6, 7],
            min_digits: 5,
            max_digits: 10,
            verify_delay: Duration::from_millis(1000),
            delivery_delay: Duration::from_millis(2000),
            probe_enabled: false,
            invite_link_expiry: Duration::from_secs(24 * 3600),
            pool_lock_timeout: Duration::from_millis(5000),
            groups_file: None,
            seed_group_ids: Vec::new(),
        }
    }
}

impl Config {
    /// Load from process env, falling back to defaults. Validates before returning.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let d = Self::default();
        let cfg = Self {
            telegram_bot_token: env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty),
            admin_chat_id: env_parse("ROSTER_ADMIN_CHAT_ID")?,
            generation_cadence_minutes: env_parse("GENERATION_CADENCE_MINUTES")?
                .unwrap_or(d.generation_cadence_minutes),
            generation_batch_size: env_parse("GENERATION_BATCH_SIZE")?
                .unwrap_or(d.generation_batch_size),
            distribution_cadence_minutes: env_parse("DISTRIBUTION_CADENCE_MINUTES")?
                .unwrap_or(d.distribution_cadence_minutes),
            distribution_batch_size: env_parse("DISTRIBUTION_BATCH_SIZE")?
                .unwrap_or(d.distribution_batch_size),
            retry_threshold: env_parse("RETRY_THRESHOLD")?.unwrap_or(d.retry_threshold),
            id_range: IdRange {
                min: env_parse("ID_RANGE_MIN")?.unwrap_or(d.id_range.min),
                max: env_parse("ID_RANGE_MAX")?.unwrap_or(d.id_range.max),
            },
            leading_digits: match env_str("ID_LEADING_DIGITS") {
                Some(raw) => parse_digit_list(&raw)?,
                None => d.leading_digits,
            },
            min_digits: env_parse("ID_MIN_DIGITS")?.unwrap_or(d.min_digits),
            max_digits: env_parse("ID_MAX_DIGITS")?.unwrap_or(d.max_digits),
            verify_delay: env_parse("VERIFY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.verify_delay),
            delivery_delay: env_parse("DELIVERY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.delivery_delay),
            probe_enabled: env_bool("PROBE_ENABLED").unwrap_or(d.probe_enabled),
            invite_link_expiry: env_parse::<u64>("INVITE_LINK_EXPIRY_HOURS")?
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(d.invite_link_expiry),
            pool_lock_timeout: env_parse("POOL_LOCK_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(d.pool_lock_timeout),
            groups_file: env::var_os("GROUPS_FILE").map(PathBuf::from),
            seed_group_ids: parse_csv_i64(env_str("ROSTER_GROUP_IDS")),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.generation_cadence_minutes < 1 {
            return Err(Error::Config(
                "GENERATION_CADENCE_MINUTES must be at least 1".to_string(),
            ));
        }
        if !(1..=GENERATION_BATCH_MAX).contains(&self.generation_batch_size) {
            return Err(Error::Config(format!(
                "GENERATION_BATCH_SIZE must be within 1..={GENERATION_BATCH_MAX}"
            )));
        }
        validate_distribution(self.distribution_cadence_minutes, self.distribution_batch_size)?;
        if self.retry_threshold < 1 {
            return Err(Error::Config("RETRY_THRESHOLD must be at least 1".to_string()));
        }
        self.id_range.validate()?;
        if self.leading_digits.iter().any(|d| !(1..=9).contains(d)) {
            return Err(Error::Config(
                "ID_LEADING_DIGITS entries must be within 1..=9".to_string(),
            ));
        }
        if self.min_digits < 1 || self.min_digits > self.max_digits {
            return Err(Error::Config(
                "ID_MIN_DIGITS must be >= 1 and <= ID_MAX_DIGITS".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounds shared by config loading and the operator `set_timer` control.
pub fn validate_distribution(cadence_minutes: u32, batch_size: u32) -> Result<()> {
    let (cmin, cmax) = DISTRIBUTION_CADENCE_RANGE;
    if !(cmin..=cmax).contains(&cadence_minutes) {
        return Err(Error::Config(format!(
            "distribution cadence must be within {cmin}..={cmax} minutes, got {cadence_minutes}"
        )));
    }
    let (bmin, bmax) = DISTRIBUTION_BATCH_RANGE;
    if !(bmin..=bmax).contains(&batch_size) {
        return Err(Error::Config(format!(
            "distribution batch size must be within {bmin}..={bmax}, got {batch_size}"
        )));
    }
    Ok(())
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    let Some(raw) = env_str(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}")))
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_digit_list(raw: &str) -> Result<Vec<u8>> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u8>()
                .map_err(|_| Error::Config(format!("ID_LEADING_DIGITS has an invalid entry: {s}")))
        })
        .collect()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
