//! Settings-store backend over SQLite.
//!
//! Reads a `settings` table of typed key/value rows:
//!
//! | column       | meaning                                   |
//! |--------------|-------------------------------------------|
//! | `key`        | dotted key, nested when `nest` is enabled |
//! | `value`      | text, interpreted according to `type`     |
//! | `type`       | [`SettingType`] code                      |
//! | `updated_at` | change stamp used for freshness           |
//!
//! A missing table or missing columns degrade to an empty mapping with a
//! warning, and freshness is then always reported so the store is not probed
//! again until the next explicit reload.

use super::Backend;
use super::nest::nest_keys;
use chrono::{DateTime, NaiveDateTime};
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Columns the `settings` table must have.
pub const REQUIRED_COLUMNS: [&str; 4] = ["key", "value", "type", "updated_at"];

/// Schema for a settings table this backend can read.
pub const SETTINGS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    type INTEGER NOT NULL DEFAULT 0,
    value TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
";

/// Default separator used when nesting setting keys.
pub const DEFAULT_SETTINGS_SEPARATOR: &str = ".";

/// How long after a probe the store is assumed unchanged.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

const MISSING_TABLE_WARNING: &str =
    "Settings table not found. Create it with the schema in SETTINGS_SCHEMA.";

const MISSING_COLUMNS_WARNING: &str = "Settings table is missing required columns";

/// Options for [`SettingsStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsOptions {
    /// Split keys on the separator into nested maps.
    #[serde(default)]
    pub nest: bool,

    /// Separator for `nest` (default `.`).
    #[serde(default)]
    pub nest_separator: Option<String>,

    /// Log schema problems at debug level instead of warning.
    #[serde(default)]
    pub silence_warnings: bool,
}

/// Value type of a settings row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingType {
    Section = 0,
    String = 1,
    Integer = 2,
    Boolean = 3,
    Json = 4,
    Selection = 5,
    Set = 6,
}

impl SettingType {
    /// Unknown codes read as plain strings.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Section,
            2 => Self::Integer,
            3 => Self::Boolean,
            4 => Self::Json,
            5 => Self::Selection,
            6 => Self::Set,
            _ => Self::String,
        }
    }

    /// Interpret a raw column value.
    pub fn parse(self, raw: Option<&str>) -> Value {
        let Some(raw) = raw else {
            return Value::Null;
        };
        match self {
            Self::Integer => Value::from(leading_integer(raw)),
            Self::Boolean => Value::Bool(matches!(
                raw.trim().to_lowercase().as_str(),
                "true" | "t" | "yes" | "y" | "1" | "on"
            )),
            Self::Json | Self::Set => serde_json::from_str(raw).unwrap_or(Value::Null),
            Self::Section | Self::String | Self::Selection => Value::String(raw.to_string()),
        }
    }
}

/// Leading integer of `raw`, or 0 when there is none.
fn leading_integer(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let sign_len = usize::from(trimmed.starts_with(['-', '+']));
    let digits = trimmed[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(trimmed.len(), |end| end + sign_len);
    trimmed[..digits].parse().unwrap_or(0)
}

#[derive(Debug, Default)]
struct ProbeState {
    configured: bool,
    updated_at: Option<String>,
    last_checked: Option<Instant>,
}

/// Backend reading a SQLite `settings` table.
#[derive(Clone)]
pub struct SettingsStore {
    conn: Arc<Mutex<Connection>>,
    options: SettingsOptions,
    check_interval: Duration,
    state: Arc<Mutex<ProbeState>>,
}

impl SettingsStore {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P, options: SettingsOptions) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        Ok(Self::from_connection(conn, options))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory(options: SettingsOptions) -> rusqlite::Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?, options))
    }

    pub fn from_connection(conn: Connection, options: SettingsOptions) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            options,
            check_interval: DEFAULT_CHECK_INTERVAL,
            state: Arc::new(Mutex::new(ProbeState {
                configured: true,
                ..Default::default()
            })),
        }
    }

    /// Override the window during which a probe is skipped.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Create the settings table if it does not exist.
    pub fn create_schema(&self) -> rusqlite::Result<()> {
        self.with_conn(|conn| conn.execute_batch(SETTINGS_SCHEMA))
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Connection) -> T,
    {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, message: &str) {
        if self.options.silence_warnings {
            debug!("{}", message);
        } else {
            warn!("{}", message);
        }
    }

    /// Columns of [`REQUIRED_COLUMNS`] the table lacks; all of them when the
    /// table does not exist.
    fn missing_columns(conn: &Connection) -> rusqlite::Result<Vec<&'static str>> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('settings')")?;
        let present: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(REQUIRED_COLUMNS
            .into_iter()
            .filter(|column| !present.iter().any(|p| p == column))
            .collect())
    }

    fn latest_update(conn: &Connection) -> rusqlite::Result<Option<String>> {
        let latest: SqlValue =
            conn.query_row("SELECT MAX(updated_at) FROM settings", [], |row| row.get(0))?;
        Ok(normalize_stamp(latest))
    }

    fn read_rows(conn: &Connection) -> rusqlite::Result<Map<String, Value>> {
        let mut stmt = conn.prepare("SELECT key, value, type FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let value: SqlValue = row.get(1)?;
            let code: Option<i64> = row.get(2)?;
            Ok((key, value, code))
        })?;

        let mut data = Map::new();
        for row in rows {
            let (key, value, code) = row?;
            let kind = SettingType::from_code(code.unwrap_or(0));
            data.insert(key, kind.parse(column_text(&value).as_deref()));
        }
        Ok(data)
    }

    fn load(&self) -> rusqlite::Result<Option<(Map<String, Value>, Option<String>)>> {
        self.with_conn(|conn| {
            let missing = Self::missing_columns(conn)?;
            if missing.len() == REQUIRED_COLUMNS.len() {
                self.report(MISSING_TABLE_WARNING);
                return Ok(None);
            }
            if !missing.is_empty() {
                self.report(&format!("{}: {}", MISSING_COLUMNS_WARNING, missing.join(", ")));
                return Ok(None);
            }
            let updated_at = Self::latest_update(conn)?;
            Ok(Some((Self::read_rows(conn)?, updated_at)))
        })
    }
}

/// Text form of a column, whatever its storage class.
fn column_text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Bring an `updated_at` value into a form that compares chronologically as a
/// string. Date-time text becomes zero-padded epoch microseconds, as do
/// integer stamps.
fn normalize_stamp(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Null | SqlValue::Blob(_) => None,
        SqlValue::Integer(i) => Some(format!("{:020}", i)),
        SqlValue::Real(f) => Some(format!("{:020}", f as i64)),
        SqlValue::Text(text) => {
            let micros = DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.timestamp_micros())
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
                        .map(|dt| dt.and_utc().timestamp_micros())
                });
            Some(match micros {
                Ok(micros) => format!("{:020}", micros),
                Err(_) => text,
            })
        }
    }
}

impl Backend for SettingsStore {
    fn load_keys(&self) -> anyhow::Result<Map<String, Value>> {
        self.state().configured = true;

        let loaded = match self.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                self.report(&format!("Failed to load settings from database: {}", e));
                None
            }
        };
        let Some((data, updated_at)) = loaded else {
            self.state().configured = false;
            return Ok(Map::new());
        };
        self.state().updated_at = updated_at;

        if !self.options.nest {
            return Ok(data);
        }
        let separator = self
            .options
            .nest_separator
            .as_deref()
            .unwrap_or(DEFAULT_SETTINGS_SEPARATOR);
        Ok(nest_keys(data, separator))
    }

    fn source(&self) -> String {
        "settings".to_string()
    }

    fn is_fresh(&self) -> bool {
        let seen = {
            let mut state = self.state();
            if !state.configured {
                return true;
            }
            if let Some(at) = state.last_checked
                && at.elapsed() < self.check_interval
            {
                return true;
            }
            state.last_checked = Some(Instant::now());
            state.updated_at.clone()
        };

        let latest = match self.with_conn(Self::latest_update) {
            Ok(Some(latest)) => latest,
            Ok(None) => return true,
            Err(e) => {
                debug!("Settings freshness probe failed: {}", e);
                return true;
            }
        };
        seen.is_some_and(|seen| seen >= latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(options: SettingsOptions) -> SettingsStore {
        let store = SettingsStore::open_in_memory(options)
            .unwrap()
            .with_check_interval(Duration::ZERO);
        store.create_schema().unwrap();
        store
    }

    fn insert(store: &SettingsStore, key: &str, kind: SettingType, value: &str, at: &str) {
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO settings (key, type, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(key) DO UPDATE SET value = ?3, updated_at = ?4",
                    rusqlite::params![key, kind as i64, value, at],
                )
            })
            .unwrap();
    }

    fn seeded(options: SettingsOptions) -> SettingsStore {
        let store = store(options);
        insert(&store, "foo", SettingType::String, "bar", "2024-01-01 10:00:00");
        insert(&store, "x", SettingType::Integer, "1", "2024-01-01 10:00:00");
        insert(&store, "a.b", SettingType::String, "1", "2024-01-01 10:00:00");
        store
    }

    #[test]
    fn test_loads_all_keys() {
        let keys = seeded(SettingsOptions::default()).load_keys().unwrap();
        assert_eq!(
            Value::Object(keys),
            json!({"foo": "bar", "a.b": "1", "x": 1})
        );
    }

    #[test]
    fn test_loads_nested_keys() {
        let keys = seeded(SettingsOptions {
            nest: true,
            ..Default::default()
        })
        .load_keys()
        .unwrap();
        assert_eq!(
            Value::Object(keys),
            json!({"foo": "bar", "a": {"b": "1"}, "x": 1})
        );
    }

    #[test]
    fn test_setting_type_parse() {
        assert_eq!(SettingType::Integer.parse(Some("42abc")), json!(42));
        assert_eq!(SettingType::Integer.parse(Some("-7")), json!(-7));
        assert_eq!(SettingType::Integer.parse(Some("abc")), json!(0));
        assert_eq!(SettingType::Boolean.parse(Some("yes")), json!(true));
        assert_eq!(SettingType::Boolean.parse(Some("0")), json!(false));
        assert_eq!(SettingType::Json.parse(Some(r#"{"a":[1]}"#)), json!({"a": [1]}));
        assert_eq!(SettingType::Set.parse(Some("not json")), Value::Null);
        assert_eq!(SettingType::Selection.parse(Some("red")), json!("red"));
        assert_eq!(SettingType::String.parse(None), Value::Null);
        assert_eq!(SettingType::from_code(99), SettingType::String);
    }

    #[test]
    fn test_missing_table_degrades() {
        let store = SettingsStore::open_in_memory(SettingsOptions {
            silence_warnings: true,
            ..Default::default()
        })
        .unwrap();
        assert!(store.load_keys().unwrap().is_empty());
        assert!(store.is_fresh(), "unconfigured store is never probed");
    }

    #[test]
    fn test_missing_columns_degrades() {
        let store = SettingsStore::open_in_memory(SettingsOptions::default()).unwrap();
        store
            .with_conn(|conn| conn.execute_batch("CREATE TABLE settings (key TEXT, value TEXT);"))
            .unwrap();
        assert!(store.load_keys().unwrap().is_empty());
        assert!(store.is_fresh());
    }

    #[test]
    fn test_freshness_tracks_updated_at() {
        let store = seeded(SettingsOptions::default());
        store.load_keys().unwrap();
        assert!(store.is_fresh());

        insert(&store, "foo", SettingType::String, "baz", "2024-01-02 10:00:00");
        assert!(!store.is_fresh());

        let keys = store.load_keys().unwrap();
        assert_eq!(keys.get("foo"), Some(&json!("baz")));
        assert!(store.is_fresh());
    }

    #[test]
    fn test_empty_table_is_fresh() {
        let store = store(SettingsOptions::default());
        assert!(store.load_keys().unwrap().is_empty());
        assert!(store.is_fresh());
    }

    #[test]
    fn test_probe_window() {
        let store = seeded(SettingsOptions::default()).with_check_interval(Duration::from_secs(60));
        store.load_keys().unwrap();
        assert!(store.is_fresh());

        insert(&store, "foo", SettingType::String, "baz", "2024-01-02 10:00:00");
        assert!(store.is_fresh(), "probe skipped inside the window");
    }

    #[test]
    fn test_normalize_stamp_orders_chronologically() {
        let earlier = normalize_stamp(SqlValue::Text("2024-01-01 09:00:00".into())).unwrap();
        let later = normalize_stamp(SqlValue::Text("2024-01-01T10:00:00+00:00".into())).unwrap();
        assert!(earlier < later);
        assert!(
            normalize_stamp(SqlValue::Integer(9)).unwrap()
                < normalize_stamp(SqlValue::Integer(10)).unwrap()
        );
        assert_eq!(normalize_stamp(SqlValue::Null), None);
    }
}
