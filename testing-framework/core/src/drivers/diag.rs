use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{Level, debug, error, info, trace, warn};

use super::{DriverAdapter, DriverError, OpDispenser, OpError};
use crate::{
    activity::{def::ActivityDef, rate::RateSpec},
    ratelimit::LimiterSlot,
};

const DRIVER: &str = "diag";
pub const DIAGRATE_PARAM: &str = "diagrate";

/// Diagnostic driver. Its op template is a JSON object whose keys are task
/// types run in order on every cycle, e.g.
/// `{"log":{"level":"info","modulo":1000},"diagrate":{"diagrate":"500"}}`.
/// A bare word such as `noop` names a single task with default settings.
///
/// The driver owns one `diagrate` limiter shared by every thread of the
/// activity; the activity parameter `diagrate` overrides the op's value and
/// re-rates the limiter while running.
#[derive(Debug, Default)]
pub struct DiagDriver {
    diag_limiter: LimiterSlot,
}

impl DiagDriver {
    #[must_use]
    pub fn diag_limiter(&self) -> &LimiterSlot {
        &self.diag_limiter
    }

    fn install_rate(&self, raw: &str) -> Result<(), DriverError> {
        let spec = raw
            .parse::<RateSpec>()
            .map_err(|_| DriverError::InvalidSetting {
                task: DIAGRATE_PARAM.to_owned(),
                field: DIAGRATE_PARAM,
                value: raw.to_owned(),
            })?;
        self.diag_limiter.create_or_update(DIAGRATE_PARAM, spec);
        Ok(())
    }
}

impl DriverAdapter for DiagDriver {
    fn name(&self) -> &'static str {
        DRIVER
    }

    fn op_dispenser(&self, def: &ActivityDef) -> Result<Arc<dyn OpDispenser>, DriverError> {
        let op = def.op().unwrap_or_else(|| "noop".to_owned());
        let tasks = parse_tasks(&op)?;

        let op_rate = tasks.iter().find_map(|task| match task {
            DiagTask::DiagRate { rate } => rate.clone(),
            _ => None,
        });
        let uses_limiter = tasks
            .iter()
            .any(|task| matches!(task, DiagTask::DiagRate { .. }));

        if let Some(rate) = def.params().get(DIAGRATE_PARAM).or(op_rate) {
            self.install_rate(&rate)?;
            def.params().set_silently(DIAGRATE_PARAM, rate);
        } else if uses_limiter {
            return Err(DriverError::InvalidSetting {
                task: DIAGRATE_PARAM.to_owned(),
                field: DIAGRATE_PARAM,
                value: String::new(),
            });
        }

        debug!(alias = %def.alias(), tasks = tasks.len(), "mapped diag op");
        Ok(Arc::new(DiagOp {
            tasks,
            limiter: self.diag_limiter.clone(),
        }))
    }

    fn on_activity_def_update(&self, def: &ActivityDef) -> Result<(), DriverError> {
        let Some(raw) = def.params().get(DIAGRATE_PARAM) else {
            return Ok(());
        };
        let current = self.diag_limiter.get().map(|limiter| limiter.spec());
        if current.is_some_and(|spec| raw.parse::<RateSpec>().is_ok_and(|new| new == spec)) {
            return Ok(());
        }
        info!(alias = %def.alias(), diagrate = %raw, "applying diagrate update");
        self.install_rate(&raw)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum DiagTask {
    Noop,
    Log { level: Level, modulo: u64 },
    DiagRate { rate: Option<String> },
    Delay { delay: Duration },
    ErrorOnCycle { cycle: u64 },
}

struct DiagOp {
    tasks: Vec<DiagTask>,
    limiter: LimiterSlot,
}

#[async_trait]
impl OpDispenser for DiagOp {
    async fn run_cycle(&self, cycle: u64) -> Result<(), OpError> {
        for task in &self.tasks {
            match task {
                DiagTask::Noop => {}
                DiagTask::Log { level, modulo } => {
                    if cycle % modulo == 0 {
                        log_cycle(*level, cycle);
                    }
                }
                DiagTask::DiagRate { .. } => {
                    if let Some(limiter) = self.limiter.get() {
                        limiter.acquire().await;
                    }
                }
                DiagTask::Delay { delay } => tokio::time::sleep(*delay).await,
                DiagTask::ErrorOnCycle { cycle: target } => {
                    if cycle == *target {
                        return Err(OpError::Injected { cycle });
                    }
                }
            }
        }
        Ok(())
    }
}

fn log_cycle(level: Level, cycle: u64) {
    match level {
        Level::ERROR => error!(cycle, "diag cycle"),
        Level::WARN => warn!(cycle, "diag cycle"),
        Level::INFO => info!(cycle, "diag cycle"),
        Level::DEBUG => debug!(cycle, "diag cycle"),
        _ => trace!(cycle, "diag cycle"),
    }
}

fn parse_tasks(op: &str) -> Result<Vec<DiagTask>, DriverError> {
    let trimmed = op.trim();
    if trimmed.starts_with('{') {
        let map: Map<String, Value> =
            serde_json::from_str(trimmed).map_err(|err| DriverError::InvalidOp {
                op: op.to_owned(),
                message: err.to_string(),
            })?;
        return map
            .into_iter()
            .map(|(name, settings)| parse_task(&name, &settings))
            .collect();
    }

    let tasks: Vec<DiagTask> = trimmed
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| parse_task(word, &Value::Null))
        .collect::<Result<_, _>>()?;
    if tasks.is_empty() {
        return Ok(vec![DiagTask::Noop]);
    }
    Ok(tasks)
}

/// A task's settings may be an object, or a scalar standing for the task's
/// main field (`"diagrate": "500"`).
fn parse_task(name: &str, settings: &Value) -> Result<DiagTask, DriverError> {
    let field = |field: &'static str| -> Option<Value> {
        match settings {
            Value::Object(map) => map.get(field).cloned(),
            Value::Null => None,
            scalar => Some(scalar.clone()),
        }
    };

    match name {
        "noop" => Ok(DiagTask::Noop),
        "log" => {
            let level = match settings {
                Value::Object(map) => map.get("level").cloned(),
                Value::String(_) => Some(settings.clone()),
                _ => None,
            };
            let level = level
                .map(|value| {
                    scalar_text(&value)
                        .parse::<Level>()
                        .map_err(|_| invalid(name, "level", &value))
                })
                .transpose()?
                .unwrap_or(Level::INFO);
            let modulo = match settings {
                Value::Object(map) => map
                    .get("modulo")
                    .map(|value| positive_u64(name, "modulo", value))
                    .transpose()?,
                _ => None,
            }
            .unwrap_or(1);
            Ok(DiagTask::Log { level, modulo })
        }
        "diagrate" => Ok(DiagTask::DiagRate {
            rate: field("diagrate").map(|value| scalar_text(&value)),
        }),
        "delay" => {
            let millis = field("delay_ms")
                .map(|value| u64_setting(name, "delay_ms", &value))
                .transpose()?
                .unwrap_or(0);
            Ok(DiagTask::Delay {
                delay: Duration::from_millis(millis),
            })
        }
        "erroroncycle" => {
            let cycle = field("erroroncycle")
                .ok_or_else(|| invalid(name, "erroroncycle", &Value::Null))
                .and_then(|value| u64_setting(name, "erroroncycle", &value))?;
            Ok(DiagTask::ErrorOnCycle { cycle })
        }
        other => Err(DriverError::UnknownTask {
            driver: DRIVER,
            task: other.to_owned(),
        }),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn u64_setting(task: &str, field: &'static str, value: &Value) -> Result<u64, DriverError> {
    scalar_text(value)
        .trim()
        .parse::<u64>()
        .map_err(|_| invalid(task, field, value))
}

fn positive_u64(task: &str, field: &'static str, value: &Value) -> Result<u64, DriverError> {
    u64_setting(task, field, value).and_then(|n| {
        if n == 0 {
            Err(invalid(task, field, value))
        } else {
            Ok(n)
        }
    })
}

fn invalid(task: &str, field: &'static str, value: &Value) -> DriverError {
    DriverError::InvalidSetting {
        task: task.to_owned(),
        field,
        value: scalar_text(value),
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    const BURSTY_OP: &str = r#"{"log":{"level":"info","modulo":1000},"diagrate":{"diagrate":"500"}}"#;

    #[test]
    fn parses_tasks_in_declaration_order() {
        let tasks = parse_tasks(BURSTY_OP).unwrap();
        assert_eq!(
            tasks,
            vec![
                DiagTask::Log {
                    level: Level::INFO,
                    modulo: 1000
                },
                DiagTask::DiagRate {
                    rate: Some("500".into())
                },
            ]
        );
    }

    #[test]
    fn bare_words_and_scalar_settings() {
        assert_eq!(
            parse_tasks("noop, log").unwrap(),
            vec![
                DiagTask::Noop,
                DiagTask::Log {
                    level: Level::INFO,
                    modulo: 1
                }
            ]
        );
        assert_eq!(
            parse_tasks(r#"{"erroroncycle": 7, "delay": {"delay_ms": "3"}}"#).unwrap(),
            vec![
                DiagTask::ErrorOnCycle { cycle: 7 },
                DiagTask::Delay {
                    delay: Duration::from_millis(3)
                }
            ]
        );
        assert_eq!(parse_tasks("  ").unwrap(), vec![DiagTask::Noop]);
    }

    #[test]
    fn rejects_unknown_tasks_and_bad_settings() {
        assert!(matches!(
            parse_tasks("explode").unwrap_err(),
            DriverError::UnknownTask { .. }
        ));
        assert!(matches!(
            parse_tasks(r#"{"log":{"modulo":0}}"#).unwrap_err(),
            DriverError::InvalidSetting { field: "modulo", .. }
        ));
        assert!(matches!(
            parse_tasks(r#"{"log":"loud"}"#).unwrap_err(),
            DriverError::InvalidSetting { field: "level", .. }
        ));
        assert!(matches!(
            parse_tasks("{not json").unwrap_err(),
            DriverError::InvalidOp { .. }
        ));
    }

    #[test]
    fn activity_param_overrides_op_diagrate() {
        let driver = DiagDriver::default();
        let def = ActivityDef::from_pairs([("op", BURSTY_OP), ("diagrate", "250")]);
        driver.op_dispenser(&def).unwrap();

        let spec = driver.diag_limiter().get().expect("limiter installed").spec();
        assert!((spec.ops_per_sec() - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn op_diagrate_is_published_as_activity_param() {
        let driver = DiagDriver::default();
        let def = ActivityDef::from_pairs([("op", BURSTY_OP)]);
        driver.op_dispenser(&def).unwrap();
        assert_eq!(def.params().get(DIAGRATE_PARAM).as_deref(), Some("500"));
    }

    #[test]
    fn diagrate_task_without_rate_is_rejected() {
        let driver = DiagDriver::default();
        let def = ActivityDef::from_pairs([("op", "diagrate")]);
        assert!(driver.op_dispenser(&def).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn live_update_rerates_the_shared_limiter() {
        let driver = DiagDriver::default();
        let def = ActivityDef::from_pairs([("op", r#"{"diagrate":"100"}"#)]);
        let op = driver.op_dispenser(&def).unwrap();

        let start = Instant::now();
        for cycle in 0..3 {
            op.run_cycle(cycle).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::from_millis(20));

        def.params().set(DIAGRATE_PARAM, "10000");
        driver.on_activity_def_update(&def).unwrap();
        let spec = driver.diag_limiter().get().unwrap().spec();
        assert!((spec.ops_per_sec() - 10_000.0).abs() < f64::EPSILON);

        def.params().set(DIAGRATE_PARAM, "fast");
        assert!(driver.on_activity_def_update(&def).is_err());
    }

    #[tokio::test]
    async fn error_on_cycle_fails_only_that_cycle() {
        let driver = DiagDriver::default();
        let def = ActivityDef::from_pairs([("op", r#"{"erroroncycle":"2"}"#)]);
        let op = driver.op_dispenser(&def).unwrap();

        assert!(op.run_cycle(1).await.is_ok());
        let err = op.run_cycle(2).await.unwrap_err();
        assert_eq!(err.name(), "Injected");
        assert!(op.run_cycle(3).await.is_ok());
    }
}
