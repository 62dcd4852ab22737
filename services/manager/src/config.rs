//! Manager settings.
//!
//! Process knobs come from the environment. The depth job itself is described
//! by an INI file with three sections:
//!
//! ```ini
//! [DatabaseParameters]
//! PCDatabaseIp=10.0.0.5
//! PCDatabaseName=pointcloud
//! KGMDatabaseIp=10.0.0.6
//! ...
//! [WorkParameters]
//! AnkRootPath=/mnt/ank
//! OutputRootPath=/mnt/depth
//! InputRootDirs=2019_06_12,2019_06_13
//! [WorkSchedule]
//! ScheduledWork=1
//! StartWorkTime=20:00:00
//! StopWorkTime=06:00:00
//! ```
//!
//! Section and key names are matched case-insensitively.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use ankadepth_proto::{split_list, DbEndpoint, DepthConfig, WorkSchedule};
use chrono::NaiveTime;
use config::{File, FileFormat, Source, Value};
use tracing::warn;

use crate::error::ConfigError;

/// Manager process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the INI job configuration.
    pub config_path: PathBuf,

    /// Ledger of completed task ids.
    pub completed_log: PathBuf,

    /// Ledger of failed task ids.
    pub failed_log: PathBuf,

    /// Interval of the scheduling loop.
    pub tick_interval: Duration,

    /// Age after which an assignment is reclaimed.
    pub task_timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let config_path = std::env::var("ANKA_CONFIG")
            .unwrap_or_else(|_| "ankadepth-manager_config.ini".to_string())
            .into();

        let completed_log = std::env::var("ANKA_COMPLETED_LOG")
            .unwrap_or_else(|_| "completed.txt".to_string())
            .into();

        let failed_log = std::env::var("ANKA_FAILED_LOG")
            .unwrap_or_else(|_| "failed.txt".to_string())
            .into();

        let tick_ms = std::env::var("ANKA_TICK_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50);

        let timeout_secs = std::env::var("ANKA_TASK_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(600);

        let log_level = std::env::var("ANKA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            config_path,
            completed_log,
            failed_log,
            tick_interval: Duration::from_millis(tick_ms),
            task_timeout: Duration::from_secs(timeout_secs),
            log_level,
        })
    }
}

const DATABASE: &str = "databaseparameters";
const WORK: &str = "workparameters";
const SCHEDULE: &str = "workschedule";

/// Load the depth job configuration from an INI file.
pub fn load_depth_config(path: &Path) -> Result<DepthConfig, ConfigError> {
    let read_error = |source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    };

    let settings = config::Config::builder()
        .add_source(File::new(&path.to_string_lossy(), FileFormat::Ini))
        .build()
        .map_err(read_error)?;
    let root = settings.collect().map_err(read_error)?;

    IniSections::from_root(root).depth_config()
}

/// INI contents with lower-cased section and key names.
struct IniSections(HashMap<String, HashMap<String, String>>);

impl IniSections {
    fn from_root(root: config::Map<String, Value>) -> Self {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (name, value) in root {
            // Keys outside a section carry no job settings.
            let Ok(table) = value.into_table() else {
                continue;
            };
            let entries = sections.entry(name.to_lowercase()).or_default();
            for (key, value) in table {
                if let Ok(text) = value.into_string() {
                    entries.insert(key.to_lowercase(), text);
                }
            }
        }
        Self(sections)
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.0
            .get(section)
            .and_then(|entries| entries.get(&key.to_lowercase()))
            .map(|value| value.trim())
    }

    fn string(&self, section: &str, key: &str) -> String {
        self.get(section, key).unwrap_or_default().to_string()
    }

    fn number<T: std::str::FromStr>(
        &self,
        section: &'static str,
        key: &'static str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.get(section, key) {
            None | Some("") => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key,
                value: value.to_string(),
            }),
        }
    }

    /// Flags are positive integers or `true`.
    fn flag(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some_and(|value| {
            value.eq_ignore_ascii_case("true") || value.parse::<i64>().is_ok_and(|v| v > 0)
        })
    }

    fn time(&self, section: &str, key: &str) -> NaiveTime {
        let Some(value) = self.get(section, key).filter(|v| !v.is_empty()) else {
            return NaiveTime::MIN;
        };
        NaiveTime::parse_from_str(value, "%H:%M:%S").unwrap_or_else(|_| {
            warn!(key, value, "Invalid time of day, using 00:00:00");
            NaiveTime::MIN
        })
    }

    fn endpoint(&self, prefix: &'static str, port_key: &'static str) -> Result<DbEndpoint, ConfigError> {
        let key = |suffix: &str| format!("{prefix}{suffix}");
        Ok(DbEndpoint {
            host: self.string(DATABASE, &key("Ip")),
            database: self.string(DATABASE, &key("Name")),
            user: self.string(DATABASE, &key("UserName")),
            password: self.string(DATABASE, &key("Password")),
            options: self.string(DATABASE, &key("Options")),
            port: self.number(DATABASE, port_key, 5432)?,
        })
    }

    fn depth_config(&self) -> Result<DepthConfig, ConfigError> {
        let defaults = DepthConfig::default();
        Ok(DepthConfig {
            point_cloud_db: self.endpoint("PCDatabase", "PCDatabasePort")?,
            region_db: self.endpoint("KGMDatabase", "KGMDatabasePort")?,
            ank_root: self.string(WORK, "AnkRootPath"),
            output_root: self.string(WORK, "OutputRootPath"),
            patch_limit: self.number(WORK, "PatchLimit", defaults.patch_limit)?,
            patch_threshold: self.number(WORK, "PatchThreshold", defaults.patch_threshold)?,
            manager_auto_start: self.flag(WORK, "ManagerAutoStart"),
            manager_reprocess: self.flag(WORK, "ManagerReprocess"),
            worker_reprocess: self.flag(WORK, "WorkerReprocess"),
            input_root_dirs: split_list(&self.string(WORK, "InputRootDirs")),
            input_sub_dirs: split_list(&self.string(WORK, "InputSubDirs")),
            schedule: WorkSchedule {
                enabled: self.flag(SCHEDULE, "ScheduledWork"),
                full_day_saturday: self.flag(SCHEDULE, "FullDayWorkAtSaturday"),
                full_day_sunday: self.flag(SCHEDULE, "FullDayWorkAtSunday"),
                start: self.time(SCHEDULE, "StartWorkTime"),
                stop: self.time(SCHEDULE, "StopWorkTime"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ini(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ankadepth-manager_config.ini");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_full_file() {
        let (_dir, path) = write_ini(
            "[DatabaseParameters]
PCDatabaseIp=10.0.0.5
PCDatabaseName=pointcloud
PCDatabaseUserName=lidar
PCDatabasePassword=secret
PCDatabaseOptions=connect_timeout=10
PCDatabasePort=5433
KGMDatabaseIp=10.0.0.6
KGMDatabaseName=regions
KGMDatabaseUserName=kgm
KGMDatabasePassword=hunter2

[WorkParameters]
AnkRootPath=/mnt/ank
OutputRootPath=/mnt/depth
PatchLimit=120
PatchThreshold=12
ManagerAutoStart=1
ManagerReprocess=0
WorkerReprocess=2
InputRootDirs=2019_06_12, 2019_06_13,
InputSubDirs=

[WorkSchedule]
ScheduledWork=true
FullDayWorkAtSaturday=1
StartWorkTime=20:00:00
StopWorkTime=06:30:00
",
        );

        let config = load_depth_config(&path).unwrap();

        assert_eq!(config.point_cloud_db.host, "10.0.0.5");
        assert_eq!(config.point_cloud_db.options, "connect_timeout=10");
        assert_eq!(config.point_cloud_db.port, 5433);
        assert_eq!(config.region_db.database, "regions");
        assert_eq!(config.region_db.password, "hunter2");
        assert_eq!(config.region_db.port, 5432);
        assert_eq!(config.ank_root, "/mnt/ank");
        assert_eq!(config.patch_limit, 120);
        assert_eq!(config.patch_threshold, 12);
        assert!(config.manager_auto_start);
        assert!(!config.manager_reprocess);
        assert!(config.worker_reprocess);
        assert_eq!(config.input_root_dirs, vec!["2019_06_12", "2019_06_13"]);
        assert!(config.input_sub_dirs.is_empty());
        assert!(config.schedule.enabled);
        assert!(config.schedule.full_day_saturday);
        assert!(!config.schedule.full_day_sunday);
        assert_eq!(config.schedule.start, NaiveTime::from_hms_opt(20, 0, 0).unwrap());
        assert_eq!(config.schedule.stop, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
    }

    #[test]
    fn test_defaults_for_missing_keys() {
        let (_dir, path) = write_ini("[WorkParameters]\nInputRootDirs=a\n");

        let config = load_depth_config(&path).unwrap();

        assert_eq!(config.patch_limit, 250);
        assert_eq!(config.patch_threshold, 50);
        assert_eq!(config.point_cloud_db.port, 5432);
        assert!(!config.manager_auto_start);
        assert_eq!(config.schedule, WorkSchedule::default());
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let (_dir, path) = write_ini("[WorkParameters]\nPatchLimit=many\n");

        assert!(matches!(
            load_depth_config(&path).unwrap_err(),
            ConfigError::InvalidValue { key: "PatchLimit", .. }
        ));
    }

    #[test]
    fn test_invalid_time_reads_midnight() {
        let (_dir, path) = write_ini("[WorkSchedule]\nStartWorkTime=8pm\n");

        assert_eq!(load_depth_config(&path).unwrap().schedule.start, NaiveTime::MIN);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_depth_config(&dir.path().join("absent.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
