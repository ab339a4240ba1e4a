use crate::{
    assert::{Assertions, Condition},
    renderer::Renderer,
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

/// Coordination state shared by a suite and every assertion handle it
/// gives out.
///
/// The custom-assertion scope is owned by the running module. The counters
/// are scoped to the execution window of a single test.
pub(crate) struct ExecContext {
    renderer: RefCell<Rc<dyn Renderer>>,
    global: RefCell<Assertions>,
    local: RefCell<Option<Rc<Assertions>>>,
    outstanding: Cell<usize>,
    executed: Cell<usize>,
    depth: Cell<usize>,
}

/// Counter values captured when a test started.
#[derive(Debug)]
pub(crate) struct TestWindow {
    outstanding: usize,
}

impl ExecContext {
    pub(crate) fn new(renderer: Rc<dyn Renderer>) -> Rc<Self> {
        Rc::new(Self {
            renderer: RefCell::new(renderer),
            global: RefCell::new(Assertions::new()),
            local: RefCell::new(None),
            outstanding: Cell::new(0),
            executed: Cell::new(0),
            depth: Cell::new(0),
        })
    }

    pub(crate) fn renderer(&self) -> Rc<dyn Renderer> {
        self.renderer.borrow().clone()
    }

    pub(crate) fn set_renderer(&self, renderer: Rc<dyn Renderer>) {
        *self.renderer.borrow_mut() = renderer;
    }

    pub(crate) fn add_assertions(&self, assertions: Assertions) {
        self.global.borrow_mut().extend(assertions);
    }

    pub(crate) fn has_assertion(&self, name: &str) -> bool {
        self.global.borrow().contains(name)
    }

    pub(crate) fn remove_assertion(&self, name: &str) -> bool {
        self.global.borrow_mut().remove(name)
    }

    pub(crate) fn enter_scope(&self, assertions: Rc<Assertions>) {
        log::trace!("installing {} module-local assertions", assertions.len());
        *self.local.borrow_mut() = Some(assertions);
    }

    pub(crate) fn leave_scope(&self) {
        self.local.borrow_mut().take();
    }

    /// Look up a custom assertion, module-local first.
    pub(crate) fn resolve(&self, name: &str) -> Option<Condition> {
        if let Some(ref local) = *self.local.borrow() {
            if let Some(condition) = local.get(name) {
                return Some(condition);
            }
        }
        self.global.borrow().get(name)
    }

    pub(crate) fn assertion_built(&self) {
        self.outstanding.set(self.outstanding.get() + 1);
    }

    /// Record the first invocation of an assertion.
    pub(crate) fn assertion_invoked(&self) {
        self.outstanding
            .set(self.outstanding.get().saturating_sub(1));
        if self.depth.get() == 0 {
            self.executed.set(self.executed.get() + 1);
        }
    }

    pub(crate) fn nest(&self) -> Nested<'_> {
        self.depth.set(self.depth.get() + 1);
        Nested { cx: self }
    }

    pub(crate) fn start_test(&self) -> TestWindow {
        self.executed.set(0);
        self.depth.set(0);
        TestWindow {
            outstanding: self.outstanding.get(),
        }
    }

    pub(crate) fn executed(&self) -> usize {
        self.executed.get()
    }

    pub(crate) fn has_unexecuted(&self, window: &TestWindow) -> bool {
        self.outstanding.get() != window.outstanding
    }

    pub(crate) fn close_test(&self, window: TestWindow) {
        let leaked = self.outstanding.get().saturating_sub(window.outstanding);
        if leaked > 0 {
            log::trace!("discarding {} unexecuted assertion(s)", leaked);
        }
        self.outstanding.set(window.outstanding);
    }
}

/// Marks an assertion evaluation in progress.
pub(crate) struct Nested<'a> {
    cx: &'a ExecContext,
}

impl Drop for Nested<'_> {
    fn drop(&mut self) {
        self.cx.depth.set(self.cx.depth.get().saturating_sub(1));
    }
}
