use super::Renderer;
use crate::{module::Module, outcome::Status, suite::Summary, test::Test};

/// A renderer that forwards progress to the `log` facade.
#[derive(Debug, Clone)]
pub struct LogRenderer {
    _p: (),
}

impl LogRenderer {
    #[allow(missing_docs, clippy::new_without_default)]
    pub fn new() -> Self {
        Self { _p: () }
    }
}

impl Renderer for LogRenderer {
    fn before_run(&self, _: &Summary) {
        log::info!("starting test run");
    }

    fn after_run(&self, summary: &Summary) {
        if summary.fails() == 0 {
            log::info!(
                "test status: ok ({} passed, {} skipped)",
                summary.passes(),
                summary.skips()
            );
        } else {
            log::error!(
                "test status: FAILED ({} failed, {} errors, {} passed, {} skipped)",
                summary.fails(),
                summary.errors(),
                summary.passes(),
                summary.skips()
            );
        }
    }

    fn before_module(&self, module: &Module, _: &Summary) {
        log::info!("module: {}", module.name());
    }

    fn before_test(&self, test: &Test, module: &Module, _: &Summary) {
        log::debug!("start: {}::{}", module.name(), test.name());
    }

    fn after_test(&self, test: &Test, module: &Module, _: &Summary) {
        match test.status() {
            Some(Status::Pass) => log::info!("{}::{}: ok", module.name(), test.name()),
            Some(Status::Fail) => log::error!(
                "{}::{}: {}",
                module.name(),
                test.name(),
                test.status_message()
            ),
            Some(Status::Skip) => log::info!(
                "{}::{}: {}",
                module.name(),
                test.name(),
                test.status_message()
            ),
            None => {}
        }
    }
}
