use crate::{
    assert::{self, Assert},
    context::{ExecContext, TestWindow},
    outcome::{Exception, Failure, Skip, Status},
    termination::Termination,
    value::Value,
};
use futures_channel::oneshot;
use futures_core::{
    future::{Future, LocalBoxFuture},
    task::{self, Poll},
};
use indexmap::IndexMap;
use maybe_unwind::{maybe_unwind, FutureMaybeUnwindExt as _, Unwind};
use pin_project::pin_project;
use std::{
    cell::RefCell,
    fmt,
    panic::AssertUnwindSafe,
    pin::Pin,
    rc::Rc,
    time::{Duration, Instant},
};
use terrapin_runtime::Scheduler;

type SyncBody = Box<dyn FnMut(&mut TestScope<'_>, &Assert) -> Result<(), Failure>>;
type AsyncBody =
    Box<dyn FnMut(&mut TestScope<'_>, Done) -> LocalBoxFuture<'static, Result<(), Failure>>>;
type Continuation = Box<dyn FnMut(&Vars, &Assert) -> Result<(), Failure>>;

enum TestBody {
    Sync(SyncBody),
    Async {
        body: AsyncBody,
        continuation: Continuation,
    },
}

#[derive(Debug, Default)]
struct Settings {
    expected: Option<usize>,
    timeout: Option<Duration>,
}

/// A single named test case.
pub struct Test {
    name: String,
    body: TestBody,
    settings: Settings,
    status: Option<Status>,
    status_message: String,
    exception: Option<Exception>,
    error: Option<Rc<anyhow::Error>>,
    run_time: Option<Duration>,
    assertion_count: usize,
}

impl Test {
    pub(crate) fn new_sync<F, R>(name: &str, mut f: F) -> Self
    where
        F: FnMut(&mut TestScope<'_>, &Assert) -> R + 'static,
        R: Termination,
    {
        Self::new(
            name,
            TestBody::Sync(Box::new(move |scope: &mut TestScope<'_>, assert: &Assert| {
                f(scope, assert).into_result()
            })),
        )
    }

    pub(crate) fn new_async<F, Fut, C, R, S>(name: &str, mut f: F, mut continuation: C) -> Self
    where
        F: FnMut(&mut TestScope<'_>, Done) -> Fut + 'static,
        Fut: Future<Output = S> + 'static,
        S: Termination,
        C: FnMut(&Vars, &Assert) -> R + 'static,
        R: Termination,
    {
        Self::new(
            name,
            TestBody::Async {
                body: Box::new(move |scope: &mut TestScope<'_>, done: Done| {
                    let fut = f(scope, done);
                    Box::pin(async move { fut.await.into_result() })
                        as LocalBoxFuture<'static, Result<(), Failure>>
                }),
                continuation: Box::new(move |vars: &Vars, assert: &Assert| {
                    continuation(vars, assert).into_result()
                }),
            },
        )
    }

    fn new(name: &str, body: TestBody) -> Self {
        Self {
            name: name.into(),
            body,
            settings: Settings::default(),
            status: None,
            status_message: String::new(),
            exception: None,
            error: None,
            run_time: None,
            assertion_count: 0,
        }
    }

    /// Require the test to execute exactly `count` assertions.
    pub fn expect(&mut self, count: usize) -> &mut Self {
        self.settings.expected = Some(count);
        self
    }

    /// Override the timeout of this test, in milliseconds.
    ///
    /// Only asynchronous tests are affected.
    pub fn set_timeout(&mut self, millis: u64) -> &mut Self {
        self.settings.timeout = Some(Duration::from_millis(millis));
        self
    }

    /// The name of this test.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the body is asynchronous.
    pub fn is_async(&self) -> bool {
        matches!(self.body, TestBody::Async { .. })
    }

    /// The status of the last run, or `None` if the test has not run.
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// A human readable description of the status.
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// The failure recorded by the last run.
    pub fn exception(&self) -> Option<&Exception> {
        self.exception.as_ref()
    }

    /// The error recorded by the last run, if the failure was not an
    /// assertion failure.
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_deref()
    }

    /// How long the last run took.
    pub fn run_time(&self) -> Option<Duration> {
        self.run_time
    }

    /// The number of assertions executed by the last run.
    pub fn assertion_count(&self) -> usize {
        self.assertion_count
    }

    /// The number of assertions this test must execute, if constrained.
    pub fn expected_assertions(&self) -> Option<usize> {
        self.settings.expected
    }

    pub(crate) fn reset(&mut self) {
        self.status = None;
        self.status_message.clear();
        self.exception = None;
        self.error = None;
        self.run_time = None;
        self.assertion_count = 0;
    }

    pub(crate) async fn run(
        &mut self,
        cx: &Rc<ExecContext>,
        scheduler: &dyn Scheduler,
        inherited: Option<Duration>,
    ) {
        log::debug!("running test `{}`", self.name);
        let assert = Assert::new(cx.clone());
        let window = cx.start_test();
        let started = Instant::now();

        let Test { body, settings, .. } = self;
        let result = match body {
            TestBody::Sync(f) => {
                let mut scope = TestScope::new(settings);
                let result = maybe_unwind(AssertUnwindSafe(|| f(&mut scope, &assert)));
                scope.check_outcome(result)
            }
            TestBody::Async { body, continuation } => {
                run_async(body, continuation, settings, &assert, scheduler, inherited).await
            }
        };
        let result = result.and_then(|()| self.verify(cx, &window));

        self.assertion_count = cx.executed();
        cx.close_test(window);
        self.run_time = Some(started.elapsed());
        self.settle(result);
    }

    fn verify(&self, cx: &Rc<ExecContext>, window: &TestWindow) -> Result<(), Failure> {
        if let Some(expected) = self.settings.expected {
            assert::verify_count(cx, cx.executed(), expected)?;
        }
        if cx.has_unexecuted(window) {
            return Err(Failure::error(
                "This test defines assertions which are never executed",
            ));
        }
        Ok(())
    }

    fn settle(&mut self, result: Result<(), Failure>) {
        match result {
            Ok(()) => {
                self.status = Some(Status::Pass);
                self.status_message = "Passed".into();
            }
            Err(Failure::Skip(skip)) => self.mark_skipped(&skip),
            Err(Failure::Assertion(err)) => {
                self.status = Some(Status::Fail);
                self.status_message = failed_message(err.message());
                self.exception = Some(Exception::Assertion(err));
            }
            Err(Failure::Error(err)) => {
                self.status = Some(Status::Fail);
                self.status_message = failed_message(&err.to_string());
                let err = Rc::new(err);
                self.exception = Some(Exception::Error(err.clone()));
                self.error = Some(err);
            }
        }
        log::debug!("test `{}`: {}", self.name, self.status_message);
    }

    pub(crate) fn mark_skipped(&mut self, skip: &Skip) {
        self.status = Some(Status::Skip);
        self.status_message = skip.status_message();
    }

    /// Record a failure of a hook running around this test.
    ///
    /// With `overwrite` unset, an error already recorded on the test is kept.
    pub(crate) fn mark_hook_failed(&mut self, hook: &str, err: Rc<anyhow::Error>, overwrite: bool) {
        self.status = Some(Status::Fail);
        if self.error.is_some() && !overwrite {
            return;
        }
        self.status_message = format!("Error in the {} helper: {}", hook, err);
        self.exception = Some(Exception::Error(err.clone()));
        self.error = Some(err);
    }
}

fn failed_message(message: &str) -> String {
    if message.is_empty() {
        "Failed".into()
    } else {
        format!("Failed: {}", message)
    }
}

impl fmt::Debug for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Test")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("status_message", &self.status_message)
            .field("assertion_count", &self.assertion_count)
            .finish()
    }
}

async fn run_async(
    body: &mut AsyncBody,
    continuation: &mut Continuation,
    settings: &mut Settings,
    assert: &Assert,
    scheduler: &dyn Scheduler,
    inherited: Option<Duration>,
) -> Result<(), Failure> {
    let (done, completion) = Done::channel();
    let fut = {
        let mut scope = TestScope::new(settings);
        match maybe_unwind(AssertUnwindSafe(|| body(&mut scope, done))) {
            Ok(fut) => match scope.termination.take() {
                Some(failure) => return Err(failure),
                None => fut,
            },
            Err(unwind) => return Err(Failure::panicked(unwind)),
        }
    };

    let timeout = settings.timeout.filter(|d| *d > Duration::from_millis(0)).or(inherited);
    let vars = wait_done(scheduler, timeout, fut, completion).await?;

    match maybe_unwind(AssertUnwindSafe(|| continuation(&vars, assert))) {
        Ok(result) => result,
        Err(unwind) => Err(Failure::panicked(unwind)),
    }
}

/// Drive `fut` until a `Done` handle fires, bounded by `timeout`.
pub(crate) async fn wait_done(
    scheduler: &dyn Scheduler,
    timeout: Option<Duration>,
    fut: LocalBoxFuture<'static, Result<(), Failure>>,
    completion: oneshot::Receiver<Vars>,
) -> Result<Vars, Failure> {
    let body = AssertUnwindSafe(fut).maybe_unwind();
    match terrapin_runtime::timeout(scheduler, timeout, WaitDone::new(body, completion)).await {
        Ok(result) => result,
        Err(timed_out) => {
            log::debug!("gave up waiting: {}", timed_out);
            Err(Failure::Error(anyhow::Error::new(timed_out)))
        }
    }
}

/// Polls the body until it finishes, then keeps waiting for the completion
/// signal. The completion may also fire while the body is still running.
#[pin_project]
struct WaitDone<Fut> {
    #[pin]
    body: Fut,
    finished: bool,
    completion: oneshot::Receiver<Vars>,
}

impl<Fut> WaitDone<Fut> {
    fn new(body: Fut, completion: oneshot::Receiver<Vars>) -> Self {
        Self {
            body,
            finished: false,
            completion,
        }
    }
}

impl<Fut> Future for WaitDone<Fut>
where
    Fut: Future<Output = Result<Result<(), Failure>, Unwind>>,
{
    type Output = Result<Vars, Failure>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let me = self.project();
        if !*me.finished {
            if let Poll::Ready(result) = me.body.poll(cx) {
                *me.finished = true;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(failure)) => return Poll::Ready(Err(failure)),
                    Err(unwind) => return Poll::Ready(Err(Failure::panicked(unwind))),
                }
            }
        }
        match Pin::new(me.completion).poll(cx) {
            Poll::Ready(Ok(vars)) => Poll::Ready(Ok(vars)),
            // A running body may still finish late, so only a finished one
            // settles the test. The body has registered the waker by now.
            Poll::Ready(Err(oneshot::Canceled)) if *me.finished => Poll::Ready(Err(
                Failure::error("every completion handle was dropped without signalling completion"),
            )),
            Poll::Ready(Err(oneshot::Canceled)) | Poll::Pending => Poll::Pending,
        }
    }
}

/// The test's own handle, passed to its body.
pub struct TestScope<'a> {
    settings: &'a mut Settings,
    termination: Option<Failure>,
}

impl<'a> TestScope<'a> {
    fn new(settings: &'a mut Settings) -> Self {
        Self {
            settings,
            termination: None,
        }
    }

    fn check_outcome(
        &mut self,
        result: Result<Result<(), Failure>, Unwind>,
    ) -> Result<(), Failure> {
        match result {
            Ok(Ok(())) => match self.termination.take() {
                Some(failure) => Err(failure),
                None => Ok(()),
            },
            Ok(Err(failure)) => Err(failure),
            Err(unwind) => Err(Failure::panicked(unwind)),
        }
    }

    /// Mark the test as skipped.
    ///
    /// The returned value should be returned from the body immediately. An
    /// empty reason is treated as no reason.
    #[inline(never)]
    pub fn skip<T>(&mut self, reason: impl fmt::Display) -> T
    where
        T: Termination,
    {
        debug_assert!(self.termination.is_none());
        self.termination = Some(Failure::Skip(Skip::new(reason)));
        T::exit()
    }

    /// Mark the test as skipped if `condition` holds.
    ///
    /// The skip is recorded on the scope and also returned as an error, so
    /// the body can leave with `?`.
    pub fn skip_if(&mut self, condition: bool, reason: impl fmt::Display) -> Result<(), Failure> {
        if condition {
            let skip = Skip::new(reason);
            self.termination = Some(Failure::Skip(skip.clone()));
            return Err(Failure::Skip(skip));
        }
        Ok(())
    }

    /// Mark the test as failed with a generic error.
    #[inline(never)]
    pub fn fail<T>(&mut self, reason: impl fmt::Display) -> T
    where
        T: Termination,
    {
        debug_assert!(self.termination.is_none());
        self.termination = Some(Failure::error(reason.to_string()));
        T::exit()
    }

    /// Require the test to execute exactly `count` assertions.
    pub fn expect(&mut self, count: usize) {
        self.settings.expected = Some(count);
    }

    /// Override the timeout of this test, in milliseconds.
    pub fn set_timeout(&mut self, millis: u64) {
        self.settings.timeout = Some(Duration::from_millis(millis));
    }
}

impl fmt::Debug for TestScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestScope")
            .field("expected", &self.settings.expected)
            .field("timeout", &self.settings.timeout)
            .finish()
    }
}

/// The completion handle of an asynchronous test or hook.
///
/// Only the first completion through any clone has an effect.
#[derive(Clone)]
pub struct Done {
    inner: Rc<RefCell<Option<oneshot::Sender<Vars>>>>,
}

impl Done {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Vars>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner: Rc::new(RefCell::new(Some(tx))),
            },
            rx,
        )
    }

    /// Signal completion. Returns whether this call had an effect.
    pub fn complete(&self) -> bool {
        self.complete_with(Vars::new())
    }

    /// Signal completion, passing variables to the assertion continuation.
    /// Returns whether this call had an effect.
    pub fn complete_with(&self, vars: Vars) -> bool {
        let tx = match self.inner.borrow_mut().take() {
            Some(tx) => tx,
            None => {
                log::debug!("ignoring repeated completion");
                return false;
            }
        };
        if tx.send(vars).is_err() {
            log::warn!("completion signalled after the waiting side gave up");
            return false;
        }
        true
    }

    /// Whether completion has already been signalled.
    pub fn is_completed(&self) -> bool {
        self.inner.borrow().is_none()
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Variables handed from an asynchronous body to its continuation.
#[derive(Clone, Debug, Default)]
pub struct Vars {
    map: IndexMap<String, Value>,
}

impl Vars {
    /// Create an empty set of variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, returning the set.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace a variable.
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.map.insert(name.into(), value.into());
    }

    /// Return a variable, or `Undefined` if it is not set.
    pub fn get(&self, name: &str) -> Value {
        self.map.get(name).cloned().unwrap_or(Value::Undefined)
    }

    /// Whether a variable is set.
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Iterate over the variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.map.iter().map(|(k, v)| (&k[..], v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::NullRenderer;
    use futures::executor::block_on;
    use futures_test::future::FutureTestExt as _;
    use terrapin_runtime::DefaultScheduler;

    fn context() -> Rc<ExecContext> {
        ExecContext::new(Rc::new(NullRenderer::default()))
    }

    fn run(test: &mut Test) {
        let cx = context();
        block_on(test.run(&cx, &DefaultScheduler::new(), None));
    }

    #[test]
    fn passing_sync_test() {
        let mut test = Test::new_sync("adds", |_, assert| {
            assert.that(1 + 1).is(2).check()?;
            assert.that("ab").starts_with("a").check()
        });
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Pass));
        assert_eq!(test.status_message(), "Passed");
        assert_eq!(test.assertion_count(), 2);
        assert!(test.run_time().is_some());
    }

    #[test]
    fn assertion_failure_is_not_an_error() {
        let mut test = Test::new_sync("fails", |_, assert| assert.that(1).is(2).check());
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Fail));
        assert_eq!(
            test.status_message(),
            "Failed: Actual value 1 did not match expected value 2"
        );
        assert!(matches!(test.exception(), Some(Exception::Assertion(..))));
        assert!(test.error().is_none());
    }

    #[test]
    fn panics_are_errors() {
        let mut test = Test::new_sync("panics", |_, _| {
            if true {
                panic!("boom");
            }
        });
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Fail));
        assert!(test.error().is_some());
    }

    #[test]
    fn skipping() {
        let mut test = Test::new_sync("skips", |t, _| -> anyhow::Result<()> {
            crate::skip!(t, "it is {}", "late");
        });
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Skip));
        assert_eq!(test.status_message(), "Skipped because it is late");

        let mut test = Test::new_sync("skips silently", |t, _| -> Result<(), Failure> {
            t.skip_if(true, "")?;
            unreachable!()
        });
        run(&mut test);
        assert_eq!(test.status_message(), "Skipped");
    }

    #[test]
    fn explicit_failure() {
        let mut test = Test::new_sync("fails", |t, _| -> anyhow::Result<()> {
            crate::fail!(t, "nope");
        });
        run(&mut test);
        assert_eq!(test.status_message(), "Failed: nope");
        assert!(test.error().is_some());
    }

    #[test]
    fn expected_count_mismatch() {
        let mut test = Test::new_sync("counts", |t, assert| {
            t.expect(2);
            assert.that(true).ok().check()
        });
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Fail));
        assert!(test.status_message().contains("1 did not match expected value 2"));
        assert!(test
            .status_message()
            .contains("This test should have executed the expected number of assertions"));
        assert_eq!(test.expected_assertions(), Some(2));
    }

    #[test]
    fn unexecuted_assertions() {
        let mut test = Test::new_sync("forgets", |_, assert| {
            let _forgotten = assert.that(1).is(1);
        });
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Fail));
        assert_eq!(
            test.status_message(),
            "Failed: This test defines assertions which are never executed"
        );
        assert!(test.error().is_some());
    }

    #[test]
    fn async_test_with_continuation() {
        let mut test = Test::new_async(
            "waits",
            |_, done| {
                async move {
                    done.complete_with(Vars::new().with("x", 3));
                }
                .pending_once()
            },
            |vars, assert| assert.that(vars.get("x")).is(3).check(),
        );
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Pass), "{}", test.status_message());
        assert_eq!(test.assertion_count(), 1);
    }

    #[test]
    fn async_completion_before_body_finishes() {
        let mut test = Test::new_async(
            "early",
            |_, done| {
                done.complete();
                futures::future::pending::<()>()
            },
            |_, _| (),
        );
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Pass), "{}", test.status_message());
    }

    #[test]
    fn async_dropped_handle() {
        let mut test = Test::new_async("forgets", |_, _done| async {}, |_, _| ());
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Fail));
        assert!(test.error().is_some());
    }

    #[test]
    fn async_dropped_handle_waits_for_the_body() {
        let mut test = Test::new_async(
            "forgets late",
            |_, done| {
                drop(done);
                async {}.pending_once()
            },
            |_, _| (),
        );
        run(&mut test);
        assert_eq!(test.status(), Some(Status::Fail));
        assert!(
            test.status_message().contains("every completion handle was dropped"),
            "{}",
            test.status_message()
        );
    }

    #[test]
    fn async_dropped_handle_still_times_out() {
        let mut test = Test::new_async(
            "never signals",
            |_, done| {
                drop(done);
                DefaultScheduler::new().delay(Duration::from_millis(500))
            },
            |_, _| (),
        );
        let cx = context();
        block_on(test.run(&cx, &DefaultScheduler::new(), Some(Duration::from_millis(20))));
        assert_eq!(test.status(), Some(Status::Fail));
        assert!(
            test.status_message().contains("Timeout"),
            "{}",
            test.status_message()
        );
    }

    #[test]
    fn async_skip_before_starting() {
        let mut test = Test::new_async(
            "skips",
            |t, _| {
                t.skip::<()>("not today");
                async {}
            },
            |_, _| (),
        );
        run(&mut test);
        assert_eq!(test.status_message(), "Skipped because not today");
    }

    #[test]
    fn done_is_idempotent() {
        let (done, mut completion) = Done::channel();
        let other = done.clone();
        assert!(done.complete_with(Vars::new().with("a", 1)));
        assert!(!other.complete());
        assert!(other.is_completed());
        let vars = completion.try_recv().unwrap().unwrap();
        assert_eq!(vars.get("a").as_number(), Some(1.0));
        assert!(matches!(vars.get("b"), Value::Undefined));
    }
}
