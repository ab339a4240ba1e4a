use crate::{
    assert::Assertions,
    context::ExecContext,
    exit_status::ExitStatus,
    module::{Env, Module, Stats},
    params::Params,
    renderer::{NullRenderer, Renderer},
};
use chrono::{DateTime, Utc};
use std::{
    fmt,
    rc::Rc,
    time::{Duration, Instant},
};
use terrapin_runtime::{default_runtime, Runtime, Scheduler};

/// How a name filter is resolved when the suite is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Take the filter from the run parameters, if any.
    Inherit,
    /// Run everything regardless of the run parameters.
    Disabled,
    /// Run only what has exactly this name.
    Exact(String),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Inherit
    }
}

impl Filter {
    fn resolve(self, inherited: Option<&String>) -> Option<String> {
        match self {
            Filter::Inherit => inherited.cloned(),
            Filter::Disabled => None,
            Filter::Exact(name) => Some(name),
        }
    }
}

/// Construction options of a [`Suite`].
#[derive(Default)]
pub struct Options {
    callback: Option<Box<dyn FnMut()>>,
    mod_filter: Filter,
    test_filter: Filter,
    timeout: Option<Duration>,
    params: Option<Params>,
}

impl Options {
    /// Invoke `f` once at the very end of every run.
    pub fn callback<F>(mut self, f: F) -> Self
    where
        F: FnMut() + 'static,
    {
        self.callback = Some(Box::new(f));
        self
    }

    /// Restrict the run to modules matching the filter.
    pub fn mod_filter(mut self, filter: Filter) -> Self {
        self.mod_filter = filter;
        self
    }

    /// Restrict the run to tests matching the filter, across all modules.
    pub fn test_filter(mut self, filter: Filter) -> Self {
        self.test_filter = filter;
        self
    }

    /// Set the default timeout of asynchronous tests and hooks, in
    /// milliseconds. Zero disables it.
    pub fn timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(Duration::from_millis(millis));
        self
    }

    /// Use `params` as the source of inherited settings.
    pub fn params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .field("mod_filter", &self.mod_filter)
            .field("test_filter", &self.test_filter)
            .field("timeout", &self.timeout)
            .field("params", &self.params)
            .finish()
    }
}

/// The aggregate results of a run.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub(crate) stats: Stats,
    started_at: Option<DateTime<Utc>>,
    run_time: Option<Duration>,
}

impl Summary {
    /// The counters accumulated over every module run so far.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[allow(missing_docs)]
    pub fn passes(&self) -> usize {
        self.stats.passes
    }

    #[allow(missing_docs)]
    pub fn fails(&self) -> usize {
        self.stats.fails
    }

    #[allow(missing_docs)]
    pub fn errors(&self) -> usize {
        self.stats.errors
    }

    #[allow(missing_docs)]
    pub fn skips(&self) -> usize {
        self.stats.skips
    }

    /// When the last run started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// How long the last run took. `None` while the run is in progress.
    pub fn run_time(&self) -> Option<Duration> {
        self.run_time
    }
}

/// The collection of modules and the driver running them.
pub struct Suite {
    modules: Vec<Module>,
    summary: Summary,
    mod_filter: Option<String>,
    test_filter: Option<String>,
    timeout: Option<Duration>,
    callback: Option<Box<dyn FnMut()>>,
    cx: Rc<ExecContext>,
}

impl Suite {
    /// Create an empty suite.
    ///
    /// Filters and the default timeout are resolved here and stay fixed
    /// for the lifetime of the suite.
    pub fn new(options: Options) -> Self {
        let Options {
            callback,
            mod_filter,
            test_filter,
            timeout,
            params,
        } = options;
        let params = params.unwrap_or_default();
        Self {
            modules: vec![],
            summary: Summary::default(),
            mod_filter: mod_filter.resolve(params.mod_filter.as_ref()),
            test_filter: test_filter.resolve(params.test_filter.as_ref()),
            timeout: timeout
                .or(params.timeout)
                .filter(|d| *d > Duration::from_millis(0)),
            callback,
            cx: ExecContext::new(Rc::new(NullRenderer::default())),
        }
    }

    /// Register a module, calling `body` to declare its contents.
    pub fn module<F>(&mut self, name: &str, body: F) -> &mut Module
    where
        F: FnOnce(&mut Module),
    {
        self.add_module(Module::new(name, body))
    }

    /// Register a module built elsewhere.
    pub fn add_module(&mut self, module: Module) -> &mut Module {
        self.modules.push(module);
        let last = self.modules.len() - 1;
        &mut self.modules[last]
    }

    /// Register a module for each `(name, body)` pair, in iteration order.
    pub fn modules<'a, I, F>(&mut self, bodies: I)
    where
        I: IntoIterator<Item = (&'a str, F)>,
        F: FnOnce(&mut Module),
    {
        for (name, body) in bodies {
            self.module(name, body);
        }
    }

    /// Replace the renderer notified of the progress of the run.
    pub fn set_renderer<R>(&mut self, renderer: R)
    where
        R: Renderer + 'static,
    {
        self.cx.set_renderer(Rc::new(renderer));
    }

    /// Add assertions visible to every module.
    pub fn add_assertions(&mut self, assertions: Assertions) {
        self.cx.add_assertions(assertions);
    }

    /// Whether a suite-wide custom assertion is registered under `name`.
    pub fn has_assertion(&self, name: &str) -> bool {
        self.cx.has_assertion(name)
    }

    /// Remove a suite-wide custom assertion. Returns whether it existed.
    pub fn remove_assertion(&mut self, name: &str) -> bool {
        self.cx.remove_assertion(name)
    }

    /// The registered modules, in registration order.
    pub fn registered_modules(&self) -> &[Module] {
        &self.modules
    }

    /// Find the position of a test by module and test name.
    pub fn find_test(&self, module: &str, test: &str) -> Option<(usize, usize)> {
        let i = self.modules.iter().position(|m| m.name() == module)?;
        let j = self.modules[i].tests().iter().position(|t| t.name() == test)?;
        Some((i, j))
    }

    /// The results of the last run.
    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    #[allow(missing_docs)]
    pub fn passes(&self) -> usize {
        self.summary.passes()
    }

    #[allow(missing_docs)]
    pub fn fails(&self) -> usize {
        self.summary.fails()
    }

    #[allow(missing_docs)]
    pub fn errors(&self) -> usize {
        self.summary.errors()
    }

    #[allow(missing_docs)]
    pub fn skips(&self) -> usize {
        self.summary.skips()
    }

    /// The exit status corresponding to the last run.
    pub fn exit_status(&self) -> ExitStatus {
        if self.summary.fails() > 0 {
            ExitStatus::FAILED
        } else {
            ExitStatus::OK
        }
    }

    /// Run every selected module in registration order.
    pub async fn run(&mut self, scheduler: &dyn Scheduler) {
        let Suite {
            modules,
            summary,
            mod_filter,
            test_filter,
            timeout,
            callback,
            cx,
        } = self;

        *summary = Summary {
            started_at: Some(Utc::now()),
            ..Summary::default()
        };
        let started = Instant::now();
        let renderer = cx.renderer();
        renderer.before_run(summary);

        let env = Env {
            cx: &*cx,
            scheduler,
            test_filter: test_filter.as_deref(),
            timeout: *timeout,
        };
        for module in modules.iter_mut() {
            if let Some(name) = mod_filter.as_deref() {
                if module.name() != name {
                    log::debug!("module `{}` filtered out", module.name());
                    continue;
                }
            }
            renderer.before_module(module, summary);
            module.run(&env, summary).await;
            summary.stats.absorb(module.stats());
            renderer.after_module(module, summary);
            scheduler.yield_now().await;
        }

        summary.run_time = Some(started.elapsed());
        renderer.after_run(summary);
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Run the suite to completion on `rt`.
    pub fn run_with<R>(&mut self, rt: &mut R)
    where
        R: Runtime,
    {
        let scheduler = rt.scheduler();
        rt.block_on(self.run(&scheduler));
    }

    /// Run the suite to completion on the default runtime.
    pub fn run_blocking(&mut self) {
        self.run_with(&mut default_runtime());
    }

    /// Run a single test again, replacing its previous contribution to
    /// the counters.
    ///
    /// The module's `before_all` and `after_all` hooks run around the test.
    pub async fn rerun_test(
        &mut self,
        module_index: usize,
        test_index: usize,
        scheduler: &dyn Scheduler,
    ) -> anyhow::Result<()> {
        let Suite {
            modules,
            summary,
            timeout,
            cx,
            ..
        } = self;
        let module = modules
            .get_mut(module_index)
            .ok_or_else(|| anyhow::anyhow!("no module at index {}", module_index))?;
        if test_index >= module.tests().len() {
            anyhow::bail!(
                "module `{}` has no test at index {}",
                module.name(),
                test_index
            );
        }

        let env = Env {
            cx: &*cx,
            scheduler,
            test_filter: None,
            timeout: *timeout,
        };
        module.rerun_test(test_index, &env, summary).await;
        Ok(())
    }

    /// Run a single test again on `rt`.
    pub fn rerun_with<R>(
        &mut self,
        rt: &mut R,
        module_index: usize,
        test_index: usize,
    ) -> anyhow::Result<()>
    where
        R: Runtime,
    {
        let scheduler = rt.scheduler();
        rt.block_on(self.rerun_test(module_index, test_index, &scheduler))
    }

    /// Run a single test again on the default runtime.
    pub fn rerun_blocking(&mut self, module_index: usize, test_index: usize) -> anyhow::Result<()> {
        self.rerun_with(&mut default_runtime(), module_index, test_index)
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("modules", &self.modules)
            .field("summary", &self.summary)
            .field("mod_filter", &self.mod_filter)
            .field("test_filter", &self.test_filter)
            .field("timeout", &self.timeout)
            .finish()
    }
}
