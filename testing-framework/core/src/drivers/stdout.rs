use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use super::{DriverAdapter, DriverError, OpDispenser, OpError};
use crate::activity::def::ActivityDef;

const CYCLE_BINDING: &str = "{cycle}";

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes one line per cycle: the `op` template with `{cycle}` bound, or the
/// bare cycle number when no template is given.
pub struct StdoutDriver {
    sink: Sink,
}

impl Default for StdoutDriver {
    fn default() -> Self {
        Self::with_sink(std::io::stdout())
    }
}

impl StdoutDriver {
    /// Directs output somewhere other than the process stdout.
    #[must_use]
    pub fn with_sink(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }
}

impl DriverAdapter for StdoutDriver {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn op_dispenser(&self, def: &ActivityDef) -> Result<Arc<dyn OpDispenser>, DriverError> {
        Ok(Arc::new(StdoutOp {
            template: def.op(),
            sink: Arc::clone(&self.sink),
        }))
    }
}

struct StdoutOp {
    template: Option<String>,
    sink: Sink,
}

impl StdoutOp {
    fn render(&self, cycle: u64) -> String {
        self.template.as_deref().map_or_else(
            || cycle.to_string(),
            |template| template.replace(CYCLE_BINDING, &cycle.to_string()),
        )
    }
}

#[async_trait]
impl OpDispenser for StdoutOp {
    async fn run_cycle(&self, cycle: u64) -> Result<(), OpError> {
        let line = self.render(cycle);
        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(sink, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn binds_cycle_into_template() {
        let captured = Captured::default();
        let driver = StdoutDriver::with_sink(captured.clone());
        let def = ActivityDef::from_pairs([("op", "select {cycle} from t")]);
        let op = driver.op_dispenser(&def).unwrap();

        op.run_cycle(4).await.unwrap();
        op.run_cycle(5).await.unwrap();

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out, "select 4 from t\nselect 5 from t\n");
    }

    #[tokio::test]
    async fn prints_cycle_without_template() {
        let captured = Captured::default();
        let driver = StdoutDriver::with_sink(captured.clone());
        let op = driver.op_dispenser(&ActivityDef::default()).unwrap();

        op.run_cycle(9).await.unwrap();

        assert_eq!(captured.0.lock().unwrap().as_slice(), b"9\n");
    }
}
