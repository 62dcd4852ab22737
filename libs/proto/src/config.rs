//! Job configuration shared by the manager and every worker.
//!
//! The manager loads it once at startup and pushes it to each worker that
//! joins (TASK_CONFIG). The wire form is a fixed, ordered item list joined by
//! the data separator.

use chrono::NaiveTime;

use crate::{ProtoError, DATA_SEPARATOR};

const CONFIG_FIELDS: usize = 26;
const TIME_FORMAT: &str = "%H:%M:%S";

/// Connection parameters for one Postgres database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbEndpoint {
    pub host: String,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Extra libpq-style connection options, passed through as-is.
    pub options: String,
    pub port: u16,
}

impl Default for DbEndpoint {
    fn default() -> Self {
        Self {
            host: String::new(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            options: String::new(),
            port: 5432,
        }
    }
}

/// Time window in which the manager is allowed to hand out work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSchedule {
    /// When false the window is ignored and work is always permitted.
    pub enabled: bool,
    pub full_day_saturday: bool,
    pub full_day_sunday: bool,
    pub start: NaiveTime,
    pub stop: NaiveTime,
}

impl Default for WorkSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            full_day_saturday: false,
            full_day_sunday: false,
            start: NaiveTime::MIN,
            stop: NaiveTime::MIN,
        }
    }
}

/// The depth job configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthConfig {
    /// Point-cloud store (patches).
    pub point_cloud_db: DbEndpoint,
    /// Region store (tasks).
    pub region_db: DbEndpoint,
    /// Root of the per-capture calibration files.
    pub ank_root: String,
    /// Root of the encoded depth images.
    pub output_root: String,
    /// Maximum patches retrieved per task; also scales the patch cache.
    pub patch_limit: u32,
    /// Minimum patches a task needs to be reconstructed.
    pub patch_threshold: u32,
    pub manager_auto_start: bool,
    pub manager_reprocess: bool,
    pub worker_reprocess: bool,
    pub input_root_dirs: Vec<String>,
    pub input_sub_dirs: Vec<String>,
    pub schedule: WorkSchedule,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            point_cloud_db: DbEndpoint::default(),
            region_db: DbEndpoint::default(),
            ank_root: String::new(),
            output_root: String::new(),
            patch_limit: 250,
            patch_threshold: 50,
            manager_auto_start: false,
            manager_reprocess: false,
            worker_reprocess: false,
            input_root_dirs: Vec::new(),
            input_sub_dirs: Vec::new(),
            schedule: WorkSchedule::default(),
        }
    }
}

impl DepthConfig {
    /// Serialize to the representation carried by TASK_CONFIG.
    pub fn encode(&self) -> String {
        let mut items = Vec::with_capacity(CONFIG_FIELDS);
        for db in [&self.point_cloud_db, &self.region_db] {
            items.push(db.host.clone());
            items.push(db.database.clone());
            items.push(db.user.clone());
            items.push(db.password.clone());
            items.push(db.options.clone());
            items.push(db.port.to_string());
        }
        items.push(self.ank_root.clone());
        items.push(self.output_root.clone());
        items.push(self.patch_limit.to_string());
        items.push(self.patch_threshold.to_string());
        items.push(flag(self.manager_auto_start));
        items.push(flag(self.manager_reprocess));
        items.push(flag(self.worker_reprocess));
        items.push(self.input_root_dirs.join(","));
        items.push(self.input_sub_dirs.join(","));
        items.push(flag(self.schedule.enabled));
        items.push(flag(self.schedule.full_day_saturday));
        items.push(flag(self.schedule.full_day_sunday));
        items.push(self.schedule.start.format(TIME_FORMAT).to_string());
        items.push(self.schedule.stop.format(TIME_FORMAT).to_string());
        items.join(&DATA_SEPARATOR.to_string())
    }

    /// Parse the representation produced by [`DepthConfig::encode`].
    pub fn decode(s: &str) -> Result<Self, ProtoError> {
        let items: Vec<&str> = s.split(DATA_SEPARATOR).collect();
        if items.len() != CONFIG_FIELDS {
            return Err(ProtoError::FieldCount {
                message: "configuration",
                expected: CONFIG_FIELDS,
                actual: items.len(),
            });
        }
        decode_items(&items)
    }
}

fn decode_items(items: &[&str]) -> Result<DepthConfig, ProtoError> {
    let endpoint = |at: usize| -> Result<DbEndpoint, ProtoError> {
        Ok(DbEndpoint {
            host: items[at].to_string(),
            database: items[at + 1].to_string(),
            user: items[at + 2].to_string(),
            password: items[at + 3].to_string(),
            options: items[at + 4].to_string(),
            port: parse_num("port", items[at + 5])?,
        })
    };

    Ok(DepthConfig {
        point_cloud_db: endpoint(0)?,
        region_db: endpoint(6)?,
        ank_root: items[12].to_string(),
        output_root: items[13].to_string(),
        patch_limit: parse_num("patch limit", items[14])?,
        patch_threshold: parse_num("patch threshold", items[15])?,
        manager_auto_start: parse_flag("manager auto start", items[16])?,
        manager_reprocess: parse_flag("manager reprocess", items[17])?,
        worker_reprocess: parse_flag("worker reprocess", items[18])?,
        input_root_dirs: split_list(items[19]),
        input_sub_dirs: split_list(items[20]),
        schedule: WorkSchedule {
            enabled: parse_flag("scheduled work", items[21])?,
            full_day_saturday: parse_flag("full day saturday", items[22])?,
            full_day_sunday: parse_flag("full day sunday", items[23])?,
            start: parse_time("start work time", items[24])?,
            stop: parse_time("stop work time", items[25])?,
        },
    })
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn parse_flag(field: &'static str, value: &str) -> Result<bool, ProtoError> {
    value
        .trim()
        .parse::<i64>()
        .map(|v| v > 0)
        .map_err(|_| ProtoError::invalid(field, value))
}

fn parse_num<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ProtoError> {
    value
        .trim()
        .parse()
        .map_err(|_| ProtoError::invalid(field, value))
}

fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime, ProtoError> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).map_err(|_| ProtoError::invalid(field, value))
}

/// Split a comma-joined directory list, dropping empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_config() -> DepthConfig {
        DepthConfig {
            point_cloud_db: DbEndpoint {
                host: "10.0.0.5".to_string(),
                database: "pointcloud".to_string(),
                user: "lidar".to_string(),
                password: "secret".to_string(),
                options: "connect_timeout=10".to_string(),
                port: 5433,
            },
            region_db: DbEndpoint {
                host: "10.0.0.6".to_string(),
                database: "regions".to_string(),
                user: "kgm".to_string(),
                password: "hunter2".to_string(),
                options: String::new(),
                port: 5432,
            },
            ank_root: "/mnt/ank/".to_string(),
            output_root: "/mnt/depth/".to_string(),
            patch_limit: 120,
            patch_threshold: 12,
            manager_auto_start: true,
            manager_reprocess: false,
            worker_reprocess: true,
            input_root_dirs: vec!["2019_06_12".to_string(), "2019_06_13".to_string()],
            input_sub_dirs: vec![],
            schedule: WorkSchedule {
                enabled: true,
                full_day_saturday: true,
                full_day_sunday: false,
                start: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                stop: NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
            },
        }
    }

    #[test]
    fn test_round_trip() {
        let config = sample_config();
        let encoded = config.encode();
        assert_eq!(encoded.split(DATA_SEPARATOR).count(), CONFIG_FIELDS);
        assert_eq!(DepthConfig::decode(&encoded).unwrap(), config);
    }

    #[test]
    fn test_round_trip_defaults() {
        let config = DepthConfig::default();
        assert_eq!(DepthConfig::decode(&config.encode()).unwrap(), config);
    }

    #[test]
    fn test_times_use_clock_format() {
        let encoded = sample_config().encode();
        assert!(encoded.ends_with(";20:00:00;06:30:00"));
    }

    #[test]
    fn test_decode_wrong_field_count() {
        assert!(matches!(
            DepthConfig::decode("a;b;c").unwrap_err(),
            ProtoError::FieldCount { expected: CONFIG_FIELDS, actual: 3, .. }
        ));
    }

    #[test]
    fn test_decode_invalid_port() {
        let encoded = sample_config().encode().replacen("5433", "port", 1);
        assert!(matches!(
            DepthConfig::decode(&encoded).unwrap_err(),
            ProtoError::InvalidField { field: "port", .. }
        ));
    }

    #[rstest]
    #[case("", vec![])]
    #[case("a", vec!["a"])]
    #[case("a,,b, ", vec!["a", "b"])]
    fn test_split_list(#[case] input: &str, #[case] expected: Vec<&str>) {
        assert_eq!(split_list(input), expected);
    }
}
