use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Flat `name -> value` view of one activity, ready to become a parameter
/// map.
pub type ActivityDescriptor = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ActivityFileError {
    #[error("failed to read activity file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in activity file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid json in activity file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("activity file declares no activities")]
    Empty,
}

/// Optional scenario-level settings carried next to the activities.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScenarioSettings {
    pub duration_secs: Option<u64>,
}

/// A set of activity descriptors loaded from YAML or JSON.
///
/// ```yaml
/// activities:
///   - alias: co_cycle_delay_bursty
///     driver: diag
///     cycles: 0..1000000
///     threads: 10
///     cyclerate: 1000,1.5
///     op:
///       log: { level: info, modulo: 1000 }
///       diagrate: { diagrate: "500" }
/// ```
///
/// Scalar values are kept verbatim; nested maps and lists are re-encoded as
/// JSON so the `op` field can be written natively.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActivityFile {
    pub activities: Vec<ActivityDescriptor>,
    pub scenario: ScenarioSettings,
}

#[derive(Deserialize)]
struct RawActivityFile {
    #[serde(default)]
    activities: Vec<BTreeMap<String, Value>>,
    #[serde(default)]
    scenario: ScenarioSettings,
}

impl ActivityFile {
    /// Loads a file, picking JSON for `.json` and YAML for everything else.
    pub fn load_from_file(path: &Path) -> Result<Self, ActivityFileError> {
        let raw = fs::read_to_string(path).map_err(|source| ActivityFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        debug!(path = %path.display(), is_json, "loading activity file");

        if is_json {
            Self::from_json_str(&raw)
        } else {
            Self::from_yaml_str(&raw)
        }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ActivityFileError> {
        let parsed: RawActivityFile = serde_yaml::from_str(raw)?;
        Self::from_raw(parsed)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ActivityFileError> {
        let parsed: RawActivityFile = serde_json::from_str(raw)?;
        Self::from_raw(parsed)
    }

    fn from_raw(raw: RawActivityFile) -> Result<Self, ActivityFileError> {
        if raw.activities.is_empty() {
            return Err(ActivityFileError::Empty);
        }

        let activities = raw
            .activities
            .into_iter()
            .map(|entry| {
                entry
                    .into_iter()
                    .filter_map(|(key, value)| flatten_value(value).map(|value| (key, value)))
                    .collect()
            })
            .collect();

        Ok(Self {
            activities,
            scenario: raw.scenario,
        })
    }
}

fn flatten_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        nested @ (Value::Array(_) | Value::Object(_)) => Some(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    const BURSTY_YAML: &str = r#"
scenario:
  duration_secs: 30
activities:
  - alias: co_cycle_delay_bursty
    driver: diag
    cycles: 0..1000000
    threads: 10
    cyclerate: 1000,1.5
    op:
      log: { level: info, modulo: 1000 }
      diagrate: { diagrate: "500" }
"#;

    #[test]
    fn yaml_scalars_are_kept_and_maps_become_json() {
        let file = ActivityFile::from_yaml_str(BURSTY_YAML).expect("valid yaml");
        assert_eq!(file.scenario.duration_secs, Some(30));

        let activity = &file.activities[0];
        assert_eq!(activity["alias"], "co_cycle_delay_bursty");
        assert_eq!(activity["threads"], "10");
        assert_eq!(activity["cyclerate"], "1000,1.5");
        assert_eq!(
            activity["op"],
            r#"{"log":{"level":"info","modulo":1000},"diagrate":{"diagrate":"500"}}"#
        );
    }

    #[test]
    fn empty_activity_list_is_rejected() {
        let err = ActivityFile::from_yaml_str("activities: []").unwrap_err();
        assert!(matches!(err, ActivityFileError::Empty));
    }

    #[test]
    fn json_files_are_detected_by_extension() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("temp file");
        write!(
            file,
            r#"{{"activities":[{{"alias":"a","driver":"diag","cycles":10,"verbose":true,"unset":null}}]}}"#
        )
        .expect("write json");

        let loaded = ActivityFile::load_from_file(file.path()).expect("valid json file");
        let activity = &loaded.activities[0];
        assert_eq!(activity["cycles"], "10");
        assert_eq!(activity["verbose"], "true");
        assert!(!activity.contains_key("unset"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ActivityFile::load_from_file(Path::new("/nonexistent/activities.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/activities.yaml"));
    }
}
