//! The fluent assertion engine.
//!
//! `assert.that(subject)` selects a subject. Each catalog method on the
//! returned [`Subject`] builds a deferred [`Assertion`] which does nothing
//! until [`Assertion::check`] or [`Assertion::since`] is called.
//!
//! ```ignore
//! assert.that(3).is(3).check()?;
//! assert.that("abc").negate().starts_with("x").since("no x prefix")?;
//! ```

mod catalog;

pub use self::catalog::Expected;

use self::catalog::Builtin;
use crate::{
    context::ExecContext,
    outcome::{AssertionError, Failure},
    value::Value,
};
use indexmap::IndexMap;
use regex::Regex;
use std::{borrow::Cow, cell::Cell, fmt, rc::Rc};

/// The condition function of a custom assertion.
///
/// It receives the assertion handle, so it may invoke other assertions, the
/// subject and the arguments given to the assertion.
pub type Condition = Rc<dyn Fn(&Assert, &Value, &[Value]) -> Result<Verdict, Failure>>;

/// The result of evaluating a condition.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// The condition holds.
    Pass,
    /// The condition does not hold; use the default message.
    Fail,
    /// The condition does not hold; use this message.
    ///
    /// `%1` is replaced with the default message.
    Message(String),
    /// Like `Message`, with additional arguments appended for templating.
    Detailed(String, Vec<Value>),
}

impl Verdict {
    pub(crate) fn message(message: impl Into<String>) -> Self {
        Verdict::Message(message.into())
    }

    pub(crate) fn detailed(message: impl Into<String>, extra: Vec<Value>) -> Self {
        Verdict::Detailed(message.into(), extra)
    }
}

impl From<bool> for Verdict {
    fn from(ok: bool) -> Self {
        if ok {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

impl From<()> for Verdict {
    fn from(_: ()) -> Self {
        Verdict::Pass
    }
}

impl From<&str> for Verdict {
    fn from(message: &str) -> Self {
        Verdict::Message(message.into())
    }
}

impl From<String> for Verdict {
    fn from(message: String) -> Self {
        Verdict::Message(message)
    }
}

/// A named collection of custom assertions.
#[derive(Clone, Default)]
pub struct Assertions {
    map: IndexMap<String, Condition>,
}

impl Assertions {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an assertion, returning the collection.
    pub fn with<F, V>(mut self, name: &str, condition: F) -> Self
    where
        F: Fn(&Assert, &Value, &[Value]) -> Result<V, Failure> + 'static,
        V: Into<Verdict>,
    {
        self.insert(name, condition);
        self
    }

    /// Add or replace an assertion.
    pub fn insert<F, V>(&mut self, name: &str, condition: F)
    where
        F: Fn(&Assert, &Value, &[Value]) -> Result<V, Failure> + 'static,
        V: Into<Verdict>,
    {
        let condition: Condition = Rc::new(move |assert: &Assert, subject: &Value, args: &[Value]| {
            condition(assert, subject, args).map(Into::into)
        });
        self.map.insert(name.into(), condition);
    }

    /// Remove an assertion. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.map.shift_remove(name).is_some()
    }

    /// Whether an assertion with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// The number of assertions.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The names of the assertions, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.map.keys().map(|k| &k[..])
    }

    /// Merge another collection into this one. Later entries win.
    pub fn extend(&mut self, other: Assertions) {
        self.map.extend(other.map);
    }

    pub(crate) fn get(&self, name: &str) -> Option<Condition> {
        self.map.get(name).cloned()
    }
}

impl fmt::Debug for Assertions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}

#[derive(Clone)]
enum Check {
    Builtin(Builtin),
    Throws(Rc<Expected>),
    Custom(Condition),
}

#[derive(Clone)]
struct Definition {
    check: Check,
    message: &'static str,
}

impl Definition {
    fn builtin(builtin: Builtin) -> Self {
        Self {
            check: Check::Builtin(builtin),
            message: builtin.message(),
        }
    }

    fn throws(expected: Expected) -> Self {
        Self {
            check: Check::Throws(Rc::new(expected)),
            message: Builtin::WillThrow.message(),
        }
    }

    fn custom(condition: Condition) -> Self {
        Self {
            check: Check::Custom(condition),
            message: "",
        }
    }

    fn run(&self, assert: &Assert, subject: &Value, args: &[Value]) -> Result<Verdict, Failure> {
        match self.check {
            Check::Builtin(builtin) => catalog::evaluate(builtin, subject, args),
            Check::Throws(ref expected) => catalog::will_throw(subject, expected),
            Check::Custom(ref condition) => condition(assert, subject, args),
        }
    }
}

/// The entry point of the assertion language handed to every test.
#[derive(Clone)]
pub struct Assert {
    cx: Rc<ExecContext>,
}

impl Assert {
    pub(crate) fn new(cx: Rc<ExecContext>) -> Self {
        Self { cx }
    }

    /// Select the subject of an assertion.
    pub fn that(&self, subject: impl Into<Value>) -> Subject {
        Subject {
            assert: self.clone(),
            value: subject.into(),
        }
    }

    /// Whether an assertion of this name is visible in the active scope.
    pub fn has(&self, name: &str) -> bool {
        self.cx.resolve(name).is_some() || Builtin::from_name(name).is_some()
    }
}

impl fmt::Debug for Assert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assert").finish()
    }
}

/// A value selected by [`Assert::that`], offering the assertion catalog.
#[derive(Clone, Debug)]
pub struct Subject {
    assert: Assert,
    value: Value,
}

/// The negated mirror of a [`Subject`].
///
/// Each assertion built from it passes exactly when the plain one fails.
#[derive(Clone, Debug)]
pub struct Negated {
    subject: Subject,
}

impl Subject {
    /// Return the subject value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Switch to the negated catalog.
    pub fn negate(&self) -> Negated {
        Negated {
            subject: self.clone(),
        }
    }

    fn build(&self, name: &str, args: Vec<Value>, fallback: Definition, negated: bool) -> Assertion {
        let definition = match self.assert.cx.resolve(name) {
            Some(condition) => Definition::custom(condition),
            None => fallback,
        };
        Assertion::new(
            self.assert.clone(),
            name,
            definition,
            self.value.clone(),
            args,
            negated,
        )
    }

    fn lookup(&self, name: &str, args: Vec<Value>, negated: bool) -> Option<Assertion> {
        let fallback = match Builtin::from_name(name)? {
            Builtin::WillThrow => Definition::throws(Expected::from_value(args.get(0))),
            builtin => Definition::builtin(builtin),
        };
        Some(self.build(name, args, fallback, negated))
    }

    fn lookup_any(&self, name: &str, args: Vec<Value>, negated: bool) -> Option<Assertion> {
        match self.assert.cx.resolve(name) {
            Some(condition) => Some(Assertion::new(
                self.assert.clone(),
                name,
                Definition::custom(condition),
                self.value.clone(),
                args,
                negated,
            )),
            None => self.lookup(name, args, negated),
        }
    }
}

macro_rules! catalog_methods {
    ($negated:expr) => {
        /// Strict equality. `NaN` is considered equal to `NaN`.
        pub fn is(&self, expected: impl Into<Value>) -> Assertion {
            self.make("is", vec![expected.into()], Builtin::Is)
        }

        /// Strict inequality. Two `NaN`s are considered equal.
        pub fn not(&self, unexpected: impl Into<Value>) -> Assertion {
            self.make("not", vec![unexpected.into()], Builtin::Not)
        }

        /// The subject is truthy.
        pub fn ok(&self) -> Assertion {
            self.make("ok", vec![], Builtin::Ok)
        }

        /// The subject is `Null` or `Undefined`.
        pub fn nullish(&self) -> Assertion {
            self.make("nullish", vec![], Builtin::Nullish)
        }

        /// The subject has the given type name.
        ///
        /// Besides the primitive type names, `array`, `date` and `regexp`
        /// are accepted.
        pub fn of_type(&self, name: &str) -> Assertion {
            self.make("of_type", vec![name.into()], Builtin::OfType)
        }

        /// The display form of the subject matches the pattern.
        pub fn matches(&self, pattern: Regex) -> Assertion {
            self.make("matches", vec![pattern.into()], Builtin::Matches)
        }

        /// The subject is a string starting with `prefix`.
        pub fn starts_with(&self, prefix: impl Into<Value>) -> Assertion {
            self.make("starts_with", vec![prefix.into()], Builtin::StartsWith)
        }

        /// The subject is a string ending with `suffix`.
        pub fn ends_with(&self, suffix: impl Into<Value>) -> Assertion {
            self.make("ends_with", vec![suffix.into()], Builtin::EndsWith)
        }

        /// The subject string or array contains `needle`.
        pub fn contains(&self, needle: impl Into<Value>) -> Assertion {
            self.make("contains", vec![needle.into()], Builtin::Contains)
        }

        /// The subject is a function that raises an error when called.
        pub fn will_throw(&self, expected: impl Into<Expected>) -> Assertion {
            let expected = expected.into();
            self.subject()
                .build("will_throw", vec![expected.to_value()], Definition::throws(expected), $negated)
        }

        /// The subject is a function that returns without raising an error.
        pub fn wont_throw(&self) -> Assertion {
            self.make("wont_throw", vec![], Builtin::WontThrow)
        }

        /// Deep structural equality.
        pub fn equals(&self, other: impl Into<Value>) -> Assertion {
            self.make("equals", vec![other.into()], Builtin::Equals)
        }

        /// The subject is a spy handle called exactly `times` times, or at
        /// least once if `times` is `None`.
        pub fn called(&self, times: impl Into<Option<usize>>) -> Assertion {
            let times: Option<usize> = times.into();
            self.make("called", vec![times.into()], Builtin::Called)
        }

        /// Build any visible assertion by name.
        ///
        /// Returns `None` if no assertion of this name is visible in the
        /// active scope.
        pub fn custom<I>(&self, name: &str, args: I) -> Option<Assertion>
        where
            I: IntoIterator,
            I::Item: Into<Value>,
        {
            self.subject()
                .lookup_any(name, args.into_iter().map(Into::into).collect(), $negated)
        }

        fn make(&self, name: &str, args: Vec<Value>, builtin: Builtin) -> Assertion {
            self.subject()
                .build(name, args, Definition::builtin(builtin), $negated)
        }
    };
}

impl Subject {
    fn subject(&self) -> &Subject {
        self
    }

    catalog_methods!(false);
}

impl Negated {
    fn subject(&self) -> &Subject {
        &self.subject
    }

    catalog_methods!(true);
}

/// A deferred check.
///
/// Building an assertion registers it as outstanding. The first call to
/// [`check`](Assertion::check) or [`since`](Assertion::since) counts it
/// towards the enclosing test; later calls re-evaluate without counting.
#[must_use = "assertions do nothing until `check` or `since` is called"]
pub struct Assertion {
    assert: Assert,
    name: String,
    definition: Definition,
    subject: Value,
    args: Vec<Value>,
    negated: bool,
    executed: Cell<bool>,
    tracked: bool,
}

impl Assertion {
    fn new(
        assert: Assert,
        name: &str,
        definition: Definition,
        subject: Value,
        args: Vec<Value>,
        negated: bool,
    ) -> Self {
        assert.cx.assertion_built();
        Self {
            assert,
            name: name.into(),
            definition,
            subject,
            args,
            negated,
            executed: Cell::new(false),
            tracked: true,
        }
    }

    /// Evaluate the assertion.
    pub fn check(&self) -> Result<(), Failure> {
        self.invoke(None)
    }

    /// Evaluate the assertion, appending `message` to the failure message.
    pub fn since(&self, message: impl fmt::Display) -> Result<(), Failure> {
        let message = message.to_string();
        self.invoke(Some(&message[..]).filter(|m| !m.is_empty()))
    }

    fn invoke(&self, user: Option<&str>) -> Result<(), Failure> {
        let cx = &self.assert.cx;
        if self.tracked && !self.executed.replace(true) {
            cx.assertion_invoked();
        }
        let _nested = cx.nest();
        if self.negated {
            self.evaluate_negated(user)
        } else {
            self.evaluate(user)
        }
    }

    fn evaluate(&self, user: Option<&str>) -> Result<(), Failure> {
        let default = self.definition.message;
        let verdict = self.definition.run(&self.assert, &self.subject, &self.args)?;
        let (message, extra) = match verdict {
            Verdict::Pass => return Ok(()),
            Verdict::Fail => (Cow::Borrowed(default), vec![]),
            Verdict::Message(message) => (Cow::Owned(message.replacen("%1", default, 1)), vec![]),
            Verdict::Detailed(message, extra) => {
                (Cow::Owned(message.replacen("%1", default, 1)), extra)
            }
        };
        Err(self.reject(&message, user, extra))
    }

    fn evaluate_negated(&self, user: Option<&str>) -> Result<(), Failure> {
        match self.evaluate(user) {
            Ok(()) => Err(self.reject(
                "The assertion passed when it was not supposed to",
                user,
                vec![],
            )),
            Err(Failure::Assertion(err)) => {
                log::trace!("negated `{}` held: {}", self.name, err);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    fn reject(&self, message: &str, user: Option<&str>, extra: Vec<Value>) -> Failure {
        let template = match user {
            Some(user) if !message.is_empty() => format!("{}: {}", message, user),
            Some(user) => user.to_owned(),
            None => message.to_owned(),
        };
        let mut args = Vec::with_capacity(1 + self.args.len() + extra.len());
        args.push(self.subject.clone());
        args.extend(self.args.iter().cloned());
        args.extend(extra);

        let rendered = self.assert.cx.renderer().template_string(&template, &args);
        log::trace!("`{}` failed: {}", self.name, rendered);
        Failure::Assertion(AssertionError::new(rendered))
    }
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assertion")
            .field("name", &self.name)
            .field("subject", &self.subject)
            .field("args", &self.args)
            .field("negated", &self.negated)
            .finish()
    }
}

/// Check the number of assertions a test executed.
///
/// The check goes through the regular failure machinery but is not itself
/// counted.
pub(crate) fn verify_count(
    cx: &Rc<ExecContext>,
    actual: usize,
    expected: usize,
) -> Result<(), Failure> {
    let assertion = Assertion {
        assert: Assert::new(cx.clone()),
        name: "is".into(),
        definition: Definition::builtin(Builtin::Is),
        subject: actual.into(),
        args: vec![expected.into()],
        negated: false,
        executed: Cell::new(true),
        tracked: false,
    };
    assertion.evaluate(Some(
        "This test should have executed the expected number of assertions",
    ))
}
