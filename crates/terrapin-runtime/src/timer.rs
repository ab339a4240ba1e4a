//! A single background thread serving every delay of the default scheduler.

use futures_core::{
    future::Future,
    task::{self, Poll},
};
use futures_util::task::AtomicWaker;
use once_cell::sync::OnceCell;
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    io,
    pin::Pin,
    sync::{
        atomic::{self, AtomicBool},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak,
    },
    thread,
    time::{Duration, Instant},
};

static TIMER: OnceCell<Timer> = OnceCell::new();

/// Arm a delay on the process-wide timer, starting its thread on first use.
pub(crate) fn delay(duration: Duration) -> io::Result<Delay> {
    let timer = TIMER.get_or_try_init(Timer::start)?;
    Ok(timer.delay(duration))
}

#[derive(Debug)]
pub(crate) struct Timer {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<BinaryHeap<Entry>>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct Slot {
    fired: AtomicBool,
    waker: AtomicWaker,
}

impl Slot {
    fn fire(&self) {
        self.fired.store(true, atomic::Ordering::Release);
        self.waker.wake();
    }

    fn is_fired(&self) -> bool {
        self.fired.load(atomic::Ordering::Acquire)
    }
}

/// Min-heap entry keyed by deadline.
#[derive(Debug)]
struct Entry {
    deadline: Instant,
    slot: Weak<Slot>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

impl Timer {
    pub(crate) fn start() -> io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let driver = shared.clone();
        thread::Builder::new()
            .name("terrapin-timer".into())
            .spawn(move || driver.run())?;
        log::trace!("timer thread started");
        Ok(Self { shared })
    }

    pub(crate) fn delay(&self, duration: Duration) -> Delay {
        let slot = Arc::new(Slot::default());
        let deadline = Instant::now() + duration;

        let mut queue = self.shared.lock();
        let earliest = queue.peek().map_or(true, |entry| deadline < entry.deadline);
        queue.push(Entry {
            deadline,
            slot: Arc::downgrade(&slot),
        });
        drop(queue);
        if earliest {
            self.shared.condvar.notify_one();
        }

        Delay {
            shared: self.shared.clone(),
            slot,
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.shared.lock().len()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BinaryHeap<Entry>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self) {
        let mut queue = self.lock();
        loop {
            let now = Instant::now();
            while queue.peek().map_or(false, |entry| entry.deadline <= now) {
                if let Some(slot) = queue.pop().and_then(|entry| entry.slot.upgrade()) {
                    slot.fire();
                }
            }

            queue = match queue.peek().map(|entry| entry.deadline) {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(now);
                    match self.condvar.wait_timeout(queue, wait) {
                        Ok((queue, _)) => queue,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => self
                    .condvar
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

/// A future completing once its deadline passes.
///
/// Dropping it before then removes the deadline from the timer.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub(crate) struct Delay {
    shared: Arc<Shared>,
    slot: Arc<Slot>,
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        if self.slot.is_fired() {
            return Poll::Ready(());
        }
        self.slot.waker.register(cx.waker());
        if self.slot.is_fired() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if self.slot.is_fired() {
            return;
        }
        let slot = Arc::as_ptr(&self.slot);
        self.shared
            .lock()
            .retain(|entry| !std::ptr::eq(entry.slot.as_ptr(), slot));
    }
}
