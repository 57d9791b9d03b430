//! `futarb.toml` settings.
//!
//! Every field has a default, so a missing file is a working configuration
//! (the hosted algo quote service, calendar rolled from today,
//! built-in lot sizes). The simulated source must be asked for by name.

use chrono::NaiveDate;
use futarb_api::FeedMode;
use futarb_board::AlertThresholds;
use futarb_core::{ExpiryBucket, ExpiryCalendar, DEFAULT_LOT_SIZE};
use futarb_sources_algo::AlgoConfig;
use futarb_sources_kite::KiteConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const KITE_API_KEY_ENV: &str = "KITE_API_KEY";
pub const KITE_ACCESS_TOKEN_ENV: &str = "KITE_ACCESS_TOKEN";

/// Shortest allowed polling interval.
const MIN_INTERVAL_SECS: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Simulated,
    #[default]
    Algo,
    Kite,
    Csv,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub kind: SourceKind,
    pub algo: AlgoConfig,
    pub kite: KiteConfig,
    /// Directory holding `spot.csv` and the per-expiry futures files.
    pub csv_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    pub interval_secs: u64,
    pub mode: FeedMode,
    pub buckets: Vec<ExpiryBucket>,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            mode: FeedMode::Poll,
            buckets: ExpiryBucket::TRACKED.to_vec(),
        }
    }
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(MIN_INTERVAL_SECS))
    }
}

/// Contract months in expiry order; empty means roll from today.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    pub months: Vec<String>,
}

impl CalendarSettings {
    pub fn calendar(&self, today: NaiveDate) -> ExpiryCalendar {
        if self.months.is_empty() {
            ExpiryCalendar::rolling_from(today)
        } else {
            ExpiryCalendar::from_months(&self.months[..])
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LotSizeSettings {
    /// Optional `symbol,lot_size` CSV layered over the built-in table.
    pub file: Option<PathBuf>,
    pub default: u32,
}

impl Default for LotSizeSettings {
    fn default() -> Self {
        Self {
            file: None,
            default: DEFAULT_LOT_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub source: SourceSettings,
    pub refresh: RefreshSettings,
    pub calendar: CalendarSettings,
    pub lot_sizes: LotSizeSettings,
    pub alerts: AlertThresholds,
    pub server: ServerSettings,
}

impl Settings {
    /// Read settings from a file; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(s)?)
    }

    /// Brokerage credentials from the environment win over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(KITE_API_KEY_ENV) {
            self.source.kite.api_key = key;
        }
        if let Some(token) = non_empty(KITE_ACCESS_TOKEN_ENV) {
            self.source.kite.access_token = token;
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.refresh.buckets.iter().all(|b| !b.is_tracked()) {
            return Err(SettingsError::Invalid(
                "refresh.buckets must name at least one of current, near, far".into(),
            ));
        }
        if self.lot_sizes.default == 0 {
            return Err(SettingsError::Invalid("lot_sizes.default must be positive".into()));
        }
        if self.source.kind == SourceKind::Csv && self.source.csv_dir.is_none() {
            return Err(SettingsError::Invalid("source.csv_dir is required for csv".into()));
        }
        if self.source.kind == SourceKind::Kite
            && (self.source.kite.api_key.is_empty() || self.source.kite.access_token.is_empty())
        {
            return Err(SettingsError::Invalid(format!(
                "kite needs source.kite.api_key/access_token or {} and {}",
                KITE_API_KEY_ENV, KITE_ACCESS_TOKEN_ENV
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_working_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.source.kind, SourceKind::Algo);
        assert_eq!(settings.refresh.interval(), Duration::from_secs(10));
        assert_eq!(settings.refresh.buckets.len(), 3);
        assert_eq!(settings.lot_sizes.default, 100);
        assert_eq!(settings.alerts.far, dec!(3.0));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_full_file() {
        let settings = Settings::from_toml_str(
            r#"
            [source]
            kind = "algo"

            [source.algo]
            base_url = "http://localhost:7860"
            use_combined = true

            [refresh]
            interval_secs = 5
            mode = "stream"
            buckets = ["current", "next"]

            [calendar]
            months = ["NOV", "DEC", "JAN"]

            [alerts]
            current = 0.75

            [server]
            bind = "127.0.0.1:8080"
            "#,
        )
        .unwrap();

        assert_eq!(settings.source.kind, SourceKind::Algo);
        assert!(settings.source.algo.use_combined);
        assert_eq!(settings.source.algo.timeout_secs, 10);
        assert_eq!(settings.refresh.mode, FeedMode::Stream);
        assert_eq!(settings.refresh.buckets, vec![ExpiryBucket::Current, ExpiryBucket::Near]);
        assert_eq!(settings.alerts.current, dec!(0.75));
        assert_eq!(settings.alerts.near, dec!(2.0));
        assert_eq!(settings.server.bind, "127.0.0.1:8080");

        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let calendar = settings.calendar.calendar(today);
        assert_eq!(calendar.month_for(ExpiryBucket::Far), Some("JAN"));
    }

    #[test]
    fn test_calendar_rolls_when_unset() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        let calendar = CalendarSettings::default().calendar(today);
        assert_eq!(calendar.month_for(ExpiryBucket::Current), Some("NOV"));
        assert_eq!(calendar.month_for(ExpiryBucket::Far), Some("JAN"));
    }

    #[test]
    fn test_env_credentials_enable_kite() {
        let mut settings = Settings::from_toml_str("[source]\nkind = \"kite\"\n").unwrap();
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));

        settings.apply_env(|key| match key {
            KITE_API_KEY_ENV => Some("key".into()),
            KITE_ACCESS_TOKEN_ENV => Some("token".into()),
            _ => None,
        });
        assert_eq!(settings.source.kite.api_key, "key");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_reports_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[refresh]\ninterval_secs = \"soon\"").unwrap();
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(SettingsError::Parse(_))
        ));

        let missing = Settings::load(Some(Path::new("/nonexistent/futarb.toml")));
        assert!(matches!(missing, Err(SettingsError::Io { .. })));
    }

    #[test]
    fn test_demo_prices_only_on_request() {
        assert_eq!(Settings::default().source.kind, SourceKind::Algo);
        let settings = Settings::from_toml_str("[source]\nkind = \"simulated\"\n").unwrap();
        assert_eq!(settings.source.kind, SourceKind::Simulated);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_csv_requires_directory() {
        let settings = Settings::from_toml_str("[source]\nkind = \"csv\"\n").unwrap();
        assert!(settings.validate().is_err());
    }
}
