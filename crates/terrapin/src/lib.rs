/*!
An in-process unit testing framework.

Tests are grouped into modules with `before`/`after`/`before_all`/`after_all`
hooks, run strictly one after another on a cooperative scheduler, and check
their expectations through a fluent, extensible assertion language.

```no_run
use terrapin::{Options, Suite, Vars};

let mut suite = Suite::new(Options::default());
suite.module("arithmetic", |m| {
    m.test("adds", |_, assert| assert.that(1 + 1).is(2).check());

    m.test_async(
        "eventually adds",
        |_, done| async move {
            done.complete_with(Vars::new().with("sum", 2));
        },
        |vars, assert| assert.that(vars.get("sum")).is(2).check(),
    );
});
suite.run_blocking();
assert_eq!(suite.fails(), 0);
```
!*/

#![doc(html_root_url = "https://docs.rs/terrapin/0.1.0-dev")]
#![deny(missing_docs)]
#![forbid(clippy::unimplemented, clippy::todo)]

#[macro_use]
mod macros;

mod assert;
mod context;
mod exit_status;
mod module;
mod outcome;
mod params;
pub mod renderer;
mod suite;
mod termination;
mod test;
mod value;

pub use crate::{
    assert::{Assert, Assertion, Assertions, Condition, Expected, Negated, Subject, Verdict},
    exit_status::ExitStatus,
    module::{Module, Stats},
    outcome::{AssertionError, Exception, Failure, Skip, Status},
    params::{ColorConfig, Params},
    renderer::Renderer,
    suite::{Filter, Options, Suite, Summary},
    termination::Termination,
    test::{Done, Test, TestScope, Vars},
    value::{Func, HostObject, Value},
};

use crate::renderer::ConsoleRenderer;
use maybe_unwind::capture_panic_info;
use std::{panic, sync::Once};

static INSTALL_PANIC_HOOK: Once = Once::new();

/// Route panics raised inside a test body to the test's status instead of
/// stderr. Panics elsewhere still reach the previously installed hook.
pub(crate) fn install_panic_hook() {
    INSTALL_PANIC_HOOK.call_once(|| {
        let prev_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !capture_panic_info(info) {
                prev_hook(info);
            }
        }));
    });
}

/// Build a suite from the command line arguments, run it with the console
/// renderer and exit the process.
///
/// `--help` and malformed arguments terminate the process before `f` is
/// called.
pub fn main<F>(f: F) -> !
where
    F: FnOnce(&mut Suite),
{
    let params = Params::from_env().unwrap_or_else(|st| st.exit());

    install_panic_hook();

    let mut suite = Suite::new(Options::default().params(params.clone()));
    suite.set_renderer(ConsoleRenderer::from_params(&params));
    f(&mut suite);
    suite.run_blocking();
    suite.exit_status().exit()
}
