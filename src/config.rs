use std::env::VarError;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use thiserror::Error;

use crate::services::crypto::CryptoService;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("incomplete {target} configuration, missing: {}", missing.join(", "))]
    Incomplete {
        target: &'static str,
        missing: Vec<String>,
    },

    #[error("no dispatch target configured (set TEMPO_*, ARMADO_API_KEY or SPREADSHEET_*)")]
    NoTarget,
}

#[derive(Debug, Clone)]
pub struct PennylaneSettings {
    pub api_key: String,
    pub base_url: String,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct TempoSettings {
    pub base_url: String,
    pub dossier: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ArmadoSettings {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub payment_mode: String,
    /// Extra `mode=code` pairs registered on the mapper at start.
    pub extra_modes: Vec<(String, i32)>,
}

#[derive(Debug, Clone)]
pub struct SheetsSettings {
    pub base_url: String,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub access_token: String,
    pub write_delay: Duration,
    pub client_column: String,
    pub reference_column: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub pennylane: PennylaneSettings,
    pub tempo: Option<TempoSettings>,
    pub armado: Option<ArmadoSettings>,
    pub sheets: Option<SheetsSettings>,
    pub state_path: PathBuf,
    pub invoice_delay: Duration,
    pub http_timeout: Duration,
    pub schedule_at: NaiveTime,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load settings through a variable reader so tests never touch the process environment.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let get = |key: &str| -> Option<String> {
            reader(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secret = |key: &str| -> Result<Option<String>, ConfigError> {
            match get(key) {
                Some(value) => CryptoService::reveal_secret(&value)
                    .map(Some)
                    .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
                None => Ok(None),
            }
        };

        let pennylane = PennylaneSettings {
            api_key: secret("PENNYLANE_API_KEY")?
                .ok_or_else(|| ConfigError::MissingVar("PENNYLANE_API_KEY".into()))?,
            base_url: trim_url(
                get("PENNYLANE_BASE_URL")
                    .unwrap_or_else(|| "https://app.pennylane.com/api/external/v2".to_string()),
            ),
            page_size: parse_or("PENNYLANE_PAGE_SIZE", get("PENNYLANE_PAGE_SIZE"), 100)?,
        };

        let tempo_vars = ["TEMPO_BASE_URL", "TEMPO_DOSSIER", "TEMPO_USERNAME"];
        let tempo = match all_or_none(
            "Tempo",
            tempo_vars
                .iter()
                .map(|key| (*key, get(key)))
                .chain(std::iter::once(("TEMPO_PASSWORD", secret("TEMPO_PASSWORD")?)))
                .collect(),
        )? {
            Some(mut values) => Some(TempoSettings {
                base_url: trim_url(values.remove(0)),
                dossier: values.remove(0),
                username: values.remove(0),
                password: values.remove(0),
            }),
            None => None,
        };

        let armado = match secret("ARMADO_API_KEY")? {
            Some(api_key) => Some(ArmadoSettings {
                api_key,
                base_url: trim_url(
                    get("ARMADO_BASE_URL").unwrap_or_else(|| "https://api.myarmado.fr".to_string()),
                ),
                timeout: Duration::from_secs(parse_or("ARMADO_TIMEOUT", get("ARMADO_TIMEOUT"), 10)?),
                payment_mode: get("ARMADO_PAYMENT_MODE").unwrap_or_else(|| "virement".to_string()),
                extra_modes: parse_modes(get("ARMADO_PAYMENT_MODES"))?,
            }),
            None => None,
        };

        let sheets = match all_or_none(
            "Sheets",
            vec![
                ("SPREADSHEET_ID", get("SPREADSHEET_ID")),
                ("SPREADSHEET_NAME", get("SPREADSHEET_NAME")),
                ("GOOGLE_SHEETS_ACCESS_TOKEN", secret("GOOGLE_SHEETS_ACCESS_TOKEN")?),
            ],
        )? {
            Some(mut values) => Some(SheetsSettings {
                base_url: trim_url(
                    get("GOOGLE_SHEETS_BASE_URL")
                        .unwrap_or_else(|| "https://sheets.googleapis.com".to_string()),
                ),
                spreadsheet_id: values.remove(0),
                sheet_name: values.remove(0),
                access_token: values.remove(0),
                write_delay: Duration::from_millis(parse_or(
                    "SHEETS_WRITE_DELAY_MS",
                    get("SHEETS_WRITE_DELAY_MS"),
                    1000,
                )?),
                client_column: column("SHEETS_CLIENT_COLUMN", get("SHEETS_CLIENT_COLUMN"), "J")?,
                reference_column: column(
                    "SHEETS_REFERENCE_COLUMN",
                    get("SHEETS_REFERENCE_COLUMN"),
                    "L",
                )?,
            }),
            None => None,
        };

        if tempo.is_none() && armado.is_none() && sheets.is_none() {
            return Err(ConfigError::NoTarget);
        }

        let schedule_at = match get("SCHEDULE_AT") {
            Some(raw) => NaiveTime::parse_from_str(&raw, "%H:%M")
                .map_err(|e| ConfigError::InvalidValue("SCHEDULE_AT".into(), e.to_string()))?,
            None => NaiveTime::from_hms_opt(12, 0, 0).ok_or_else(|| {
                ConfigError::InvalidValue("SCHEDULE_AT".into(), "12:00".to_string())
            })?,
        };

        Ok(Settings {
            pennylane,
            tempo,
            armado,
            sheets,
            state_path: PathBuf::from(
                get("STATE_PATH").unwrap_or_else(|| "processed_payments.json".to_string()),
            ),
            invoice_delay: Duration::from_millis(parse_or(
                "INVOICE_DELAY_MS",
                get("INVOICE_DELAY_MS"),
                1000,
            )?),
            http_timeout: Duration::from_secs(parse_or(
                "HTTP_TIMEOUT_SECS",
                get("HTTP_TIMEOUT_SECS"),
                30,
            )?),
            schedule_at,
        })
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn all_or_none(
    target: &'static str,
    values: Vec<(&str, Option<String>)>,
) -> Result<Option<Vec<String>>, ConfigError> {
    let missing: Vec<String> = values
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| k.to_string())
        .collect();
    if missing.len() == values.len() {
        return Ok(None);
    }
    if !missing.is_empty() {
        return Err(ConfigError::Incomplete { target, missing });
    }
    Ok(Some(values.into_iter().filter_map(|(_, v)| v).collect()))
}

fn parse_modes(raw: Option<String>) -> Result<Vec<(String, i32)>, ConfigError> {
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(Vec::new()),
    };
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let invalid = || ConfigError::InvalidValue("ARMADO_PAYMENT_MODES".into(), pair.to_string());
            let (mode, code) = pair.split_once('=').ok_or_else(invalid)?;
            let code = code.trim().parse::<i32>().map_err(|_| invalid())?;
            Ok((mode.trim().to_string(), code))
        })
        .collect()
}

fn column(key: &str, raw: Option<String>, default: &str) -> Result<String, ConfigError> {
    let value = raw.unwrap_or_else(|| default.to_string()).to_ascii_uppercase();
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ConfigError::InvalidValue(key.to_string(), value));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_reader(vars: HashMap<&str, &str>) -> impl Fn(&str) -> Result<String, VarError> {
        let owned: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| owned.get(key).cloned().ok_or(VarError::NotPresent)
    }

    fn tempo_only() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("PENNYLANE_API_KEY", "pl-key"),
            ("TEMPO_BASE_URL", "https://tempo.example/api/"),
            ("TEMPO_DOSSIER", "D01"),
            ("TEMPO_USERNAME", "sync"),
            ("TEMPO_PASSWORD", "secret"),
        ])
    }

    #[test]
    fn test_missing_pennylane_key() {
        let err = Settings::from_reader(make_reader(HashMap::new())).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(_)));
        assert!(err.to_string().contains("PENNYLANE_API_KEY"));
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_reader(make_reader(tempo_only())).unwrap();
        let tempo = settings.tempo.unwrap();
        assert_eq!(tempo.base_url, "https://tempo.example/api");
        assert_eq!(tempo.password, "secret");
        assert!(settings.armado.is_none());
        assert!(settings.sheets.is_none());
        assert_eq!(settings.pennylane.page_size, 100);
        assert_eq!(settings.invoice_delay, Duration::from_secs(1));
        assert_eq!(settings.state_path, PathBuf::from("processed_payments.json"));
        assert_eq!(settings.schedule_at, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
    }

    #[test]
    fn test_partial_tempo_is_rejected() {
        let mut vars = tempo_only();
        vars.remove("TEMPO_DOSSIER");
        let err = Settings::from_reader(make_reader(vars)).unwrap_err();
        match err {
            ConfigError::Incomplete { target, missing } => {
                assert_eq!(target, "Tempo");
                assert_eq!(missing, vec!["TEMPO_DOSSIER".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_requires_a_target() {
        let vars = HashMap::from([("PENNYLANE_API_KEY", "pl-key")]);
        let err = Settings::from_reader(make_reader(vars)).unwrap_err();
        assert!(matches!(err, ConfigError::NoTarget));
    }

    #[test]
    fn test_armado_extra_modes() {
        let vars = HashMap::from([
            ("PENNYLANE_API_KEY", "pl-key"),
            ("ARMADO_API_KEY", "ar-key"),
            ("ARMADO_PAYMENT_MODES", "lydia=9, Crypto = 10"),
        ]);
        let armado = Settings::from_reader(make_reader(vars)).unwrap().armado.unwrap();
        assert_eq!(armado.payment_mode, "virement");
        assert_eq!(
            armado.extra_modes,
            vec![("lydia".to_string(), 9), ("Crypto".to_string(), 10)]
        );
    }

    #[test]
    fn test_invalid_mode_pair() {
        let vars = HashMap::from([
            ("PENNYLANE_API_KEY", "pl-key"),
            ("ARMADO_API_KEY", "ar-key"),
            ("ARMADO_PAYMENT_MODES", "lydia"),
        ]);
        let err = Settings::from_reader(make_reader(vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_, _)));
    }

    #[test]
    fn test_sheets_columns() {
        let vars = HashMap::from([
            ("PENNYLANE_API_KEY", "pl-key"),
            ("SPREADSHEET_ID", "sheet-1"),
            ("SPREADSHEET_NAME", "Suivi"),
            ("GOOGLE_SHEETS_ACCESS_TOKEN", "token"),
            ("SHEETS_CLIENT_COLUMN", "k"),
        ]);
        let sheets = Settings::from_reader(make_reader(vars)).unwrap().sheets.unwrap();
        assert_eq!(sheets.client_column, "K");
        assert_eq!(sheets.reference_column, "L");
        assert_eq!(sheets.write_delay, Duration::from_millis(1000));
    }
}
