use std::env;
use std::path::PathBuf;

use chrono::{FixedOffset, Offset, Utc};

/// Runtime settings for the farmbook server
///
/// Every field can be overridden from the environment (or a `.env` file picked up by
/// [`Config::from_env`]). Unset or unparsable values fall back to the defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Directory holding the JSON record files
    pub data_dir: PathBuf,

    /// Directory served under `/static`
    pub static_dir: PathBuf,

    /// Lifetime of a login session in seconds
    pub session_ttl_secs: u64,

    /// Offset from UTC, in minutes, used for human-readable timestamps in exports
    pub utc_offset_minutes: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            data_dir: PathBuf::from("database"),
            static_dir: PathBuf::from("static"),
            session_ttl_secs: 24 * 60 * 60,
            utc_offset_minutes: 0,
        }
    }
}

impl Config {
    /// Build a configuration from `FARMBOOK_*` environment variables
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        Self {
            bind_addr: env::var("FARMBOOK_BIND").unwrap_or(defaults.bind_addr),
            data_dir: env::var("FARMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            static_dir: env::var("FARMBOOK_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            session_ttl_secs: parse_var("FARMBOOK_SESSION_TTL_SECS")
                .unwrap_or(defaults.session_ttl_secs),
            utc_offset_minutes: parse_var("FARMBOOK_UTC_OFFSET_MINUTES")
                .unwrap_or(defaults.utc_offset_minutes),
        }
    }

    /// Config rooted at a specific data directory, everything else default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Config::default()
        }
    }

    /// The export timezone as a chrono offset (UTC when out of range)
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn payroll_file(&self) -> PathBuf {
        self.data_dir.join("payroll.json")
    }

    pub fn agronomy_file(&self) -> PathBuf {
        self.data_dir.join("agronomy.json")
    }

    pub fn farm_report_file(&self) -> PathBuf {
        self.data_dir.join("farm_reports.json")
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring unparsable {}={:?}", key, raw);
                None
            }
        },
        Err(_) => None,
    }
}
