/*!
A terrapin runtime backed by a current-thread Tokio runtime.
!*/

use futures_core::future::{Future, LocalBoxFuture};
use std::{io, time::Duration};
use terrapin_runtime::{Runtime, Scheduler};
use tokio::runtime::Builder;

/// Create a runtime driving the suite on a current-thread Tokio runtime.
pub fn runtime() -> io::Result<impl Runtime> {
    let rt = Builder::new_current_thread().enable_time().build()?;
    Ok(TokioRuntime { rt })
}

struct TokioRuntime {
    rt: tokio::runtime::Runtime,
}

impl Runtime for TokioRuntime {
    type Scheduler = TokioScheduler;

    fn scheduler(&self) -> Self::Scheduler {
        TokioScheduler { _p: () }
    }

    fn block_on<Fut>(&mut self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        self.rt.block_on(fut)
    }
}

/// Tokio timers and cooperative yielding.
///
/// The returned futures must be polled from within the Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    _p: (),
}

impl Scheduler for TokioScheduler {
    fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn yield_now(&self) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::task::yield_now())
    }
}
