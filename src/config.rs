use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "schemashift")]
#[command(about = "schemashift - versioned, tracked schema migrations", long_about = None)]
pub struct Config {
    #[arg(short, long, default_value = "sqlite.db", env = "SCHEMASHIFT_DATABASE")]
    pub database: String,

    #[arg(short, long, default_value = "changelog.json", env = "SCHEMASHIFT_CHANGELOG")]
    pub changelog: PathBuf,

    #[arg(long, value_delimiter = ',', env = "SCHEMASHIFT_CONTEXTS", help = "Only run change sets matching one of these contexts")]
    pub contexts: Vec<String>,

    #[arg(long, value_delimiter = ',', env = "SCHEMASHIFT_LABELS", help = "Only run change sets matching one of these labels")]
    pub labels: Vec<String>,

    #[arg(long, default_value = "info", env = "SCHEMASHIFT_LOG_LEVEL")]
    pub log_level: String,

    // Lock configuration
    #[arg(long, default_value = "300", env = "SCHEMASHIFT_LOCK_WAIT_TIME", help = "Seconds to wait for the changelog lock before giving up")]
    pub lock_wait_time: u64,

    #[arg(long, default_value = "10", env = "SCHEMASHIFT_LOCK_RECHECK_TIME", help = "Seconds between attempts to take the changelog lock")]
    pub lock_recheck_time: u64,

    #[arg(long, env = "SCHEMASHIFT_LOCK_HOLDER", help = "Identity written into the lock row (default: host-pid:uuid)")]
    pub lock_holder: Option<String>,

    // Bookkeeping tables
    #[arg(long, default_value = "schemashift_changelog", env = "SCHEMASHIFT_LEDGER_TABLE")]
    pub ledger_table: String,

    #[arg(long, default_value = "schemashift_changelog_lock", env = "SCHEMASHIFT_LOCK_TABLE")]
    pub lock_table: String,

    #[arg(long, default_value = "main", env = "SCHEMASHIFT_SCHEMA", help = "Schema holding the bookkeeping tables")]
    pub schema: String,

    #[arg(long, env = "SCHEMASHIFT_IGNORE_CHECKSUMS", help = "Do not fail validation on checksum drift")]
    pub ignore_checksums: bool,

    // SQLite PRAGMA settings
    #[arg(long, default_value = "WAL", env = "SCHEMASHIFT_JOURNAL_MODE", help = "SQLite journal mode (WAL, DELETE, TRUNCATE, etc.)")]
    pub pragma_journal_mode: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply pending change sets
    Update {
        #[arg(long, help = "Apply at most this many change sets")]
        count: Option<usize>,
    },
    /// Print the SQL an update would run, without running it
    UpdateSql {
        #[arg(long)]
        count: Option<usize>,
    },
    /// Undo applied change sets
    #[command(group(ArgGroup::new("target").required(true).args(["tag", "date", "count"])))]
    Rollback {
        #[arg(long, help = "Undo everything applied after this tag")]
        tag: Option<String>,
        #[arg(long, value_parser = parse_date, help = "Undo everything applied after this time")]
        date: Option<DateTime<Utc>>,
        #[arg(long, help = "Undo this many change sets")]
        count: Option<usize>,
    },
    /// Mark pending change sets as applied without running them
    Sync,
    /// List pending change sets
    Status,
    /// Check the changelog against the ledger
    Validate,
    /// Tag the most recently applied change set
    Tag { tag: String },
    /// Show applied change sets
    History,
    /// Forget stored checksums; they are recomputed on the next update
    ClearChecksums,
    /// Release the changelog lock, whoever holds it
    ReleaseLocks,
    /// Show who holds the changelog lock
    ListLocks,
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`, all taken as UTC.
pub fn parse_date(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Ok(date.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Ok(date.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
        .ok_or_else(|| format!("invalid date '{}'", text))
}

impl Config {
    /// Get a configuration instance with all values resolved from CLI args and environment variables
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn lock_wait_duration(&self) -> Duration {
        Duration::from_secs(self.lock_wait_time)
    }

    pub fn lock_recheck_duration(&self) -> Duration {
        Duration::from_secs(self.lock_recheck_time)
    }

    pub fn settings(&self) -> MigratorSettings {
        MigratorSettings {
            schema: self.schema.clone(),
            ledger_table: self.ledger_table.clone(),
            lock_table: self.lock_table.clone(),
            lock_wait_time: self.lock_wait_duration(),
            lock_recheck_time: self.lock_recheck_duration(),
            lock_holder: self.lock_holder.clone(),
            ignore_checksums: self.ignore_checksums,
            journal_mode: Some(self.pragma_journal_mode.clone()),
        }
    }
}

/// Settings of one migrator instance. Passed explicitly; nothing is global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorSettings {
    pub schema: String,
    pub ledger_table: String,
    pub lock_table: String,
    pub lock_wait_time: Duration,
    pub lock_recheck_time: Duration,
    pub lock_holder: Option<String>,
    pub ignore_checksums: bool,
    pub journal_mode: Option<String>,
}

impl Default for MigratorSettings {
    fn default() -> Self {
        Self {
            schema: "main".to_string(),
            ledger_table: "schemashift_changelog".to_string(),
            lock_table: "schemashift_changelog_lock".to_string(),
            lock_wait_time: Duration::from_secs(300),
            lock_recheck_time: Duration::from_secs(10),
            lock_holder: None,
            ignore_checksums: false,
            journal_mode: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults_match_settings_defaults() {
        let config = Config::try_parse_from(["schemashift", "update"]).unwrap();
        let mut settings = config.settings();
        assert_eq!(settings.journal_mode.as_deref(), Some("WAL"));
        settings.journal_mode = None;
        assert_eq!(settings, MigratorSettings::default());
        assert_eq!(config.command, Command::Update { count: None });
    }

    #[test]
    fn test_rollback_requires_a_target() {
        assert!(Config::try_parse_from(["schemashift", "rollback"]).is_err());
        assert!(Config::try_parse_from(["schemashift", "rollback", "--tag", "v1", "--count", "2"]).is_err());
        let config = Config::try_parse_from(["schemashift", "rollback", "--date", "2024-03-01"]).unwrap();
        match config.command {
            Command::Rollback { date, .. } => {
                assert_eq!(date, Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()))
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_list_arguments() {
        let config = Config::try_parse_from([
            "schemashift",
            "--contexts",
            "test,prod",
            "--lock-wait-time",
            "5",
            "status",
        ])
        .unwrap();
        assert_eq!(config.contexts, vec!["test", "prod"]);
        assert_eq!(config.settings().lock_wait_time, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_date("2024-03-01T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_date("2024-03-01 12:30:00").unwrap(), expected);
        assert!(parse_date("yesterday").is_err());
    }
}
