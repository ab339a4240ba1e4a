//! Progress reporting and message formatting.

mod console;
mod log;

pub use self::{console::ConsoleRenderer, log::LogRenderer};

use crate::{module::Module, suite::Summary, test::Test, value::Value};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::{rc::Rc, sync::Arc};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([1-9][0-9]*|0)\}").expect("invalid placeholder pattern"));

/// The observer of a test run.
///
/// Every hook defaults to doing nothing. `template_string` also formats
/// assertion failure messages, so replacing the renderer changes how
/// failures read.
pub trait Renderer {
    /// Called once before the first module runs.
    fn before_run(&self, _summary: &Summary) {}

    /// Called once after the last module finished.
    fn after_run(&self, _summary: &Summary) {}

    /// Called before the module starts.
    fn before_module(&self, _module: &Module, _summary: &Summary) {}

    /// Called after every test of the module has finished.
    fn after_module(&self, _module: &Module, _summary: &Summary) {}

    /// Called before the test starts.
    fn before_test(&self, _test: &Test, _module: &Module, _summary: &Summary) {}

    /// Called after the test finished and the counters were updated.
    fn after_test(&self, _test: &Test, _module: &Module, _summary: &Summary) {}

    /// Substitute `{N}` placeholders in `message` with the corresponding
    /// argument.
    fn template_string(&self, message: &str, args: &[Value]) -> String {
        template_string(message, args)
    }
}

/// The default placeholder substitution.
///
/// `{N}` becomes the display form of `args[N]`. `Null` renders as `NULL`;
/// `Undefined` and missing arguments render as `UNDEFINED`. Other braces are
/// left untouched.
pub fn template_string(message: &str, args: &[Value]) -> String {
    substitute(message, args, |value| match value {
        Value::Null => "NULL".into(),
        Value::Undefined => "UNDEFINED".into(),
        value => value.to_string(),
    })
}

pub(crate) fn substitute<F>(message: &str, args: &[Value], render: F) -> String
where
    F: Fn(&Value) -> String,
{
    PLACEHOLDER
        .replace_all(message, |caps: &Captures<'_>| {
            match caps[1].parse::<usize>().ok().and_then(|i| args.get(i)) {
                Some(value) => render(value),
                None => render(&Value::Undefined),
            }
        })
        .into_owned()
}

/// A renderer that ignores every notification.
#[derive(Debug, Clone, Default)]
pub struct NullRenderer {
    _p: (),
}

impl Renderer for NullRenderer {}

macro_rules! impl_renderer_body {
    () => {
        #[inline]
        fn before_run(&self, summary: &Summary) {
            (**self).before_run(summary)
        }

        #[inline]
        fn after_run(&self, summary: &Summary) {
            (**self).after_run(summary)
        }

        #[inline]
        fn before_module(&self, module: &Module, summary: &Summary) {
            (**self).before_module(module, summary)
        }

        #[inline]
        fn after_module(&self, module: &Module, summary: &Summary) {
            (**self).after_module(module, summary)
        }

        #[inline]
        fn before_test(&self, test: &Test, module: &Module, summary: &Summary) {
            (**self).before_test(test, module, summary)
        }

        #[inline]
        fn after_test(&self, test: &Test, module: &Module, summary: &Summary) {
            (**self).after_test(test, module, summary)
        }

        #[inline]
        fn template_string(&self, message: &str, args: &[Value]) -> String {
            (**self).template_string(message, args)
        }
    };
}

impl<R: ?Sized> Renderer for &R
where
    R: Renderer,
{
    impl_renderer_body!();
}

impl<R: ?Sized> Renderer for Box<R>
where
    R: Renderer,
{
    impl_renderer_body!();
}

impl<R: ?Sized> Renderer for Rc<R>
where
    R: Renderer,
{
    impl_renderer_body!();
}

impl<R: ?Sized> Renderer for Arc<R>
where
    R: Renderer,
{
    impl_renderer_body!();
}
