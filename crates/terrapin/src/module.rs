use crate::{
    assert::Assertions,
    context::ExecContext,
    outcome::{Failure, Skip, Status},
    suite::Summary,
    termination::Termination,
    test::{wait_done, Done, Test, TestScope, Vars},
    Assert,
};
use futures_core::future::{Future, LocalBoxFuture};
use maybe_unwind::maybe_unwind;
use std::{fmt, panic::AssertUnwindSafe, rc::Rc, time::Duration};
use terrapin_runtime::Scheduler;

/// Pass/fail/error/skip counters.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Stats {
    /// The number of passed tests.
    pub passes: usize,
    /// The number of failed tests, including errored ones.
    pub fails: usize,
    /// The number of failed tests whose failure was not an assertion failure.
    pub errors: usize,
    /// The number of skipped tests.
    pub skips: usize,
}

impl Stats {
    /// The number of tests counted.
    pub fn total(&self) -> usize {
        self.passes + self.fails + self.skips
    }

    pub(crate) fn record(&mut self, test: &Test) {
        match test.status() {
            Some(Status::Pass) => self.passes += 1,
            Some(Status::Fail) => {
                self.fails += 1;
                if test.error().is_some() {
                    self.errors += 1;
                }
            }
            Some(Status::Skip) => self.skips += 1,
            None => {}
        }
    }

    pub(crate) fn unrecord(&mut self, test: &Test) {
        match test.status() {
            Some(Status::Pass) => self.passes = self.passes.saturating_sub(1),
            Some(Status::Fail) => {
                self.fails = self.fails.saturating_sub(1);
                if test.error().is_some() {
                    self.errors = self.errors.saturating_sub(1);
                }
            }
            Some(Status::Skip) => self.skips = self.skips.saturating_sub(1),
            None => {}
        }
    }

    pub(crate) fn absorb(&mut self, other: &Stats) {
        self.passes += other.passes;
        self.fails += other.fails;
        self.errors += other.errors;
        self.skips += other.skips;
    }
}

type SyncHook = Box<dyn FnMut() -> Result<(), Failure>>;
type AsyncHook = Box<dyn FnMut(Done) -> LocalBoxFuture<'static, Result<(), Failure>>>;

enum Hook {
    Sync(SyncHook),
    Async(AsyncHook),
}

impl Hook {
    fn sync<F, R>(mut f: F) -> Self
    where
        F: FnMut() -> R + 'static,
        R: Termination,
    {
        Hook::Sync(Box::new(move || f().into_result()))
    }

    fn async_<F, Fut, R>(mut f: F) -> Self
    where
        F: FnMut(Done) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Termination,
    {
        Hook::Async(Box::new(move |done: Done| {
            let fut = f(done);
            Box::pin(async move { fut.await.into_result() })
                as LocalBoxFuture<'static, Result<(), Failure>>
        }))
    }

    async fn invoke(
        &mut self,
        scheduler: &dyn Scheduler,
        timeout: Option<Duration>,
    ) -> Result<(), Failure> {
        match self {
            Hook::Sync(f) => match maybe_unwind(AssertUnwindSafe(|| f())) {
                Ok(result) => result,
                Err(unwind) => Err(Failure::panicked(unwind)),
            },
            Hook::Async(f) => {
                let (done, completion) = Done::channel();
                let fut = match maybe_unwind(AssertUnwindSafe(|| f(done))) {
                    Ok(fut) => fut,
                    Err(unwind) => return Err(Failure::panicked(unwind)),
                };
                wait_done(scheduler, timeout, fut, completion).await.map(drop)
            }
        }
    }
}

#[derive(Default)]
struct Hooks {
    before: Vec<Hook>,
    after: Vec<Hook>,
    before_all: Vec<Hook>,
    after_all: Vec<Hook>,
}

async fn run_hooks(
    hooks: &mut [Hook],
    kind: &str,
    scheduler: &dyn Scheduler,
    timeout: Option<Duration>,
) -> Result<(), Rc<anyhow::Error>> {
    for hook in hooks.iter_mut() {
        if let Err(failure) = hook.invoke(scheduler, timeout).await {
            let err = failure.into_error();
            log::debug!("{} hook failed: {}", kind, err);
            return Err(Rc::new(err));
        }
    }
    Ok(())
}

/// What a module needs from the suite running it.
pub(crate) struct Env<'a> {
    pub(crate) cx: &'a Rc<ExecContext>,
    pub(crate) scheduler: &'a dyn Scheduler,
    pub(crate) test_filter: Option<&'a str>,
    pub(crate) timeout: Option<Duration>,
}

impl Env<'_> {
    fn selects(&self, test: &Test) -> bool {
        self.test_filter.map_or(true, |name| test.name() == name)
    }
}

/// A named group of tests sharing hooks and custom assertions.
pub struct Module {
    name: String,
    tests: Vec<Test>,
    hooks: Hooks,
    assertions: Rc<Assertions>,
    skip: Option<Skip>,
    stats: Stats,
    timeout: Option<Duration>,
}

impl Module {
    /// Create a module, calling `body` to declare its contents.
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: FnOnce(&mut Module),
    {
        let mut module = Self {
            name: name.into(),
            tests: vec![],
            hooks: Hooks::default(),
            assertions: Rc::new(Assertions::new()),
            skip: None,
            stats: Stats::default(),
            timeout: None,
        };
        body(&mut module);
        module
    }

    /// Add a synchronous test.
    pub fn test<F, R>(&mut self, name: &str, body: F) -> &mut Test
    where
        F: FnMut(&mut TestScope<'_>, &Assert) -> R + 'static,
        R: Termination,
    {
        self.push(Test::new_sync(name, body))
    }

    /// Add an asynchronous test.
    ///
    /// The body signals completion through its [`Done`] handle. The
    /// assertions then run in `continuation` with the variables passed on
    /// completion.
    pub fn test_async<F, Fut, S, C, R>(&mut self, name: &str, body: F, continuation: C) -> &mut Test
    where
        F: FnMut(&mut TestScope<'_>, Done) -> Fut + 'static,
        Fut: Future<Output = S> + 'static,
        S: Termination,
        C: FnMut(&Vars, &Assert) -> R + 'static,
        R: Termination,
    {
        self.push(Test::new_async(name, body, continuation))
    }

    fn push(&mut self, test: Test) -> &mut Test {
        self.tests.push(test);
        let last = self.tests.len() - 1;
        &mut self.tests[last]
    }

    /// Add a hook run before each test.
    pub fn before<F, R>(&mut self, f: F)
    where
        F: FnMut() -> R + 'static,
        R: Termination,
    {
        self.hooks.before.push(Hook::sync(f));
    }

    /// Add an asynchronous hook run before each test.
    pub fn before_async<F, Fut, R>(&mut self, f: F)
    where
        F: FnMut(Done) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Termination,
    {
        self.hooks.before.push(Hook::async_(f));
    }

    /// Add a hook run after each test.
    pub fn after<F, R>(&mut self, f: F)
    where
        F: FnMut() -> R + 'static,
        R: Termination,
    {
        self.hooks.after.push(Hook::sync(f));
    }

    /// Add an asynchronous hook run after each test.
    pub fn after_async<F, Fut, R>(&mut self, f: F)
    where
        F: FnMut(Done) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Termination,
    {
        self.hooks.after.push(Hook::async_(f));
    }

    /// Add a hook run once before the first test.
    pub fn before_all<F, R>(&mut self, f: F)
    where
        F: FnMut() -> R + 'static,
        R: Termination,
    {
        self.hooks.before_all.push(Hook::sync(f));
    }

    /// Add an asynchronous hook run once before the first test.
    pub fn before_all_async<F, Fut, R>(&mut self, f: F)
    where
        F: FnMut(Done) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Termination,
    {
        self.hooks.before_all.push(Hook::async_(f));
    }

    /// Add a hook run once after the last test.
    pub fn after_all<F, R>(&mut self, f: F)
    where
        F: FnMut() -> R + 'static,
        R: Termination,
    {
        self.hooks.after_all.push(Hook::sync(f));
    }

    /// Add an asynchronous hook run once after the last test.
    pub fn after_all_async<F, Fut, R>(&mut self, f: F)
    where
        F: FnMut(Done) -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: Termination,
    {
        self.hooks.after_all.push(Hook::async_(f));
    }

    /// Add assertions visible only to the tests of this module.
    ///
    /// They shadow suite-wide and built-in assertions of the same name.
    pub fn add_assertions(&mut self, assertions: Assertions) {
        Rc::make_mut(&mut self.assertions).extend(assertions);
    }

    /// Skip every test in this module.
    pub fn skip(&mut self, reason: impl fmt::Display) {
        self.skip = Some(Skip::new(reason));
    }

    /// Skip every test in this module if `condition` holds.
    pub fn skip_if(&mut self, condition: bool, reason: impl fmt::Display) {
        if condition {
            self.skip = Some(Skip::new(reason));
        }
    }

    /// Override the timeout of the asynchronous tests and hooks of this
    /// module, in milliseconds.
    pub fn set_timeout(&mut self, millis: u64) {
        self.timeout = Some(Duration::from_millis(millis));
    }

    /// The name of this module.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tests of this module, in registration order.
    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    /// Whether the whole module is skipped.
    pub fn is_skipped(&self) -> bool {
        self.skip.is_some()
    }

    /// The counters of the last run.
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

    fn timeout(&self, env: &Env<'_>) -> Option<Duration> {
        self.timeout
            .filter(|d| *d > Duration::from_millis(0))
            .or(env.timeout)
    }

    pub(crate) async fn run(&mut self, env: &Env<'_>, summary: &Summary) {
        log::debug!("running module `{}`", self.name);
        let renderer = env.cx.renderer();
        self.stats = Stats::default();
        for test in &mut self.tests {
            test.reset();
        }
        let selected: Vec<usize> = (0..self.tests.len())
            .filter(|&i| env.selects(&self.tests[i]))
            .collect();

        if let Some(skip) = self.skip.clone() {
            log::debug!("module `{}`: {}", self.name, skip);
            for &i in &selected {
                renderer.before_test(&self.tests[i], self, summary);
                self.tests[i].mark_skipped(&skip);
                self.stats.record(&self.tests[i]);
                renderer.after_test(&self.tests[i], self, summary);
            }
            return;
        }

        env.cx.enter_scope(self.assertions.clone());
        let timeout = self.timeout(env);
        let mut last = None;

        match run_hooks(&mut self.hooks.before_all, "beforeAll", env.scheduler, timeout).await {
            Ok(()) => {
                for &i in &selected {
                    self.run_test(i, env, summary, timeout).await;
                    self.stats.record(&self.tests[i]);
                    renderer.after_test(&self.tests[i], self, summary);
                    last = Some(i);
                    env.scheduler.yield_now().await;
                }
            }
            Err(err) => {
                for &i in &selected {
                    renderer.before_test(&self.tests[i], self, summary);
                    self.tests[i].mark_hook_failed("beforeAll", err.clone(), true);
                    self.stats.record(&self.tests[i]);
                    renderer.after_test(&self.tests[i], self, summary);
                    last = Some(i);
                }
            }
        }

        if let Err(err) =
            run_hooks(&mut self.hooks.after_all, "afterAll", env.scheduler, timeout).await
        {
            match last {
                Some(i) => {
                    self.stats.unrecord(&self.tests[i]);
                    self.tests[i].mark_hook_failed("afterAll", err, false);
                    self.stats.record(&self.tests[i]);
                }
                None => log::debug!("module `{}` has no test to report the afterAll failure on", self.name),
            }
        }

        env.cx.leave_scope();
    }

    async fn run_test(
        &mut self,
        index: usize,
        env: &Env<'_>,
        summary: &Summary,
        timeout: Option<Duration>,
    ) {
        self.tests[index].reset();
        env.cx
            .renderer()
            .before_test(&self.tests[index], self, summary);

        let Module { tests, hooks, .. } = self;
        let test = &mut tests[index];
        match run_hooks(&mut hooks.before, "before", env.scheduler, timeout).await {
            Ok(()) => test.run(env.cx, env.scheduler, timeout).await,
            Err(err) => test.mark_hook_failed("before", err, true),
        }
        if let Err(err) = run_hooks(&mut hooks.after, "after", env.scheduler, timeout).await {
            test.mark_hook_failed("after", err, false);
        }
    }

    /// Run a single test again, adjusting the counters of this module and
    /// the suite totals.
    pub(crate) async fn rerun_test(&mut self, index: usize, env: &Env<'_>, summary: &mut Summary) {
        log::debug!("rerunning `{}` in module `{}`", self.tests[index].name(), self.name);
        self.stats.unrecord(&self.tests[index]);
        summary.stats.unrecord(&self.tests[index]);

        env.cx.enter_scope(self.assertions.clone());
        let timeout = self.timeout(env);

        match run_hooks(&mut self.hooks.before_all, "beforeAll", env.scheduler, timeout).await {
            Ok(()) => self.run_test(index, env, summary, timeout).await,
            Err(err) => {
                self.tests[index].reset();
                env.cx
                    .renderer()
                    .before_test(&self.tests[index], self, summary);
                self.tests[index].mark_hook_failed("beforeAll", err, true);
            }
        }
        if let Err(err) =
            run_hooks(&mut self.hooks.after_all, "afterAll", env.scheduler, timeout).await
        {
            self.tests[index].mark_hook_failed("afterAll", err, true);
        }
        env.cx.leave_scope();

        self.stats.record(&self.tests[index]);
        summary.stats.record(&self.tests[index]);

        let renderer = env.cx.renderer();
        renderer.after_test(&self.tests[index], self, summary);
        renderer.after_module(self, summary);
        renderer.after_run(summary);
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("tests", &self.tests)
            .field("assertions", &self.assertions)
            .field("skip", &self.skip)
            .field("stats", &self.stats)
            .finish()
    }
}
