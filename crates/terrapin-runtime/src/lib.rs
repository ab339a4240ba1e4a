/*!
Scheduling primitives used by the terrapin test engine.

The engine runs every test sequentially on a single logical thread of control.
The only places where it suspends are asynchronous hooks, asynchronous test
bodies and the mandatory yield between two tests (or two modules). A
[`Scheduler`] provides exactly those two capabilities: a timer and a
yield-to-scheduler point.
!*/

#![deny(missing_docs)]

mod timer;

use futures_core::{
    future::{Future, LocalBoxFuture},
    task::{self, Poll},
};
use futures_executor::LocalPool;
use futures_util::future::{self, Either};
use std::{fmt, pin::Pin, rc::Rc, time::Duration};

/// The suspension points available to the test engine.
pub trait Scheduler {
    /// Create a future that completes after the specified duration.
    ///
    /// When no timer is available the future completes at once, so a
    /// deadline built on it fires early rather than never.
    fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;

    /// Create a future that gives other tasks and timers a chance to run
    /// before it completes.
    fn yield_now(&self) -> LocalBoxFuture<'static, ()>;
}

macro_rules! impl_scheduler_body {
    () => {
        #[inline]
        fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
            (**self).delay(duration)
        }

        #[inline]
        fn yield_now(&self) -> LocalBoxFuture<'static, ()> {
            (**self).yield_now()
        }
    };
}

impl<T: ?Sized> Scheduler for &T
where
    T: Scheduler,
{
    impl_scheduler_body!();
}

impl<T: ?Sized> Scheduler for Box<T>
where
    T: Scheduler,
{
    impl_scheduler_body!();
}

impl<T: ?Sized> Scheduler for Rc<T>
where
    T: Scheduler,
{
    impl_scheduler_body!();
}

/// The runtime for driving a test suite.
pub trait Runtime {
    /// The scheduler handed to the test engine.
    type Scheduler: Scheduler;

    /// Create the instance of `Scheduler`.
    fn scheduler(&self) -> Self::Scheduler;

    /// Run a future and wait for its result.
    fn block_on<Fut>(&mut self, fut: Fut) -> Fut::Output
    where
        Fut: Future;
}

impl<T: ?Sized> Runtime for &mut T
where
    T: Runtime,
{
    type Scheduler = T::Scheduler;

    #[inline]
    fn scheduler(&self) -> Self::Scheduler {
        (**self).scheduler()
    }

    #[inline]
    fn block_on<Fut>(&mut self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        (**self).block_on(fut)
    }
}

impl<T: ?Sized> Runtime for Box<T>
where
    T: Runtime,
{
    type Scheduler = T::Scheduler;

    #[inline]
    fn scheduler(&self) -> Self::Scheduler {
        (**self).scheduler()
    }

    #[inline]
    fn block_on<Fut>(&mut self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        (**self).block_on(fut)
    }
}

/// The error value returned when an operation exceeded its deadline.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimedOut {
    duration: Duration,
}

impl TimedOut {
    /// Return the deadline that was exceeded.
    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timeout after {}ms", self.duration.as_millis())
    }
}

impl std::error::Error for TimedOut {}

/// Await a future, giving up once the deadline expires.
///
/// A missing or zero duration disables the deadline. Whichever completes
/// first wins; the losing future is dropped.
pub async fn timeout<S: ?Sized, Fut>(
    scheduler: &S,
    duration: Option<Duration>,
    fut: Fut,
) -> Result<Fut::Output, TimedOut>
where
    S: Scheduler,
    Fut: Future,
{
    let duration = match duration.filter(|d| *d > Duration::from_millis(0)) {
        Some(duration) => duration,
        None => return Ok(fut.await),
    };

    let delay = scheduler.delay(duration);
    futures_util::pin_mut!(fut);
    match future::select(fut, delay).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(((), _)) => Err(TimedOut { duration }),
    }
}

/// A future that returns `Pending` exactly once.
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless polled"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Create an instance of `Runtime` used by the default test driver.
pub fn default_runtime() -> impl Runtime {
    DefaultRuntime {
        pool: LocalPool::new(),
    }
}

struct DefaultRuntime {
    pool: LocalPool,
}

impl Runtime for DefaultRuntime {
    type Scheduler = DefaultScheduler;

    #[inline]
    fn scheduler(&self) -> Self::Scheduler {
        DefaultScheduler { _p: () }
    }

    #[inline]
    fn block_on<Fut>(&mut self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        self.pool.run_until(fut)
    }
}

/// The scheduler of the default runtime.
///
/// Every delay is served by one shared timer thread. A delay dropped before
/// its deadline is removed from the timer.
#[derive(Debug, Clone)]
pub struct DefaultScheduler {
    _p: (),
}

impl DefaultScheduler {
    /// Create a new `DefaultScheduler`.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self { _p: () }
    }
}

impl Scheduler for DefaultScheduler {
    fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        match timer::delay(duration) {
            Ok(delay) => Box::pin(delay),
            Err(err) => {
                log::error!("failed to start the timer thread: {}", err);
                Box::pin(future::ready(()))
            }
        }
    }

    fn yield_now(&self) -> LocalBoxFuture<'static, ()> {
        Box::pin(YieldNow::default())
    }
}
