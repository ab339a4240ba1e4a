use maybe_unwind::Unwind;
use std::{error, fmt, rc::Rc};

/// The final status of a test.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    /// The test passed.
    Pass,
    /// The test failed or raised an error.
    Fail,
    /// The test was skipped.
    Skip,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Skip => "SKIP",
        })
    }
}

/// A request to skip the current test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Skip {
    reason: Option<String>,
}

impl Skip {
    /// Create a skip request with an optional reason.
    ///
    /// An empty reason is treated as no reason at all.
    pub fn new(reason: impl fmt::Display) -> Self {
        let reason = reason.to_string();
        Self {
            reason: Some(reason).filter(|r| !r.is_empty()),
        }
    }

    /// Return the reason for skipping, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub(crate) fn status_message(&self) -> String {
        match self.reason {
            Some(ref reason) => format!("Skipped because {}", reason),
            None => "Skipped".into(),
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_message())
    }
}

impl error::Error for Skip {}

/// A failed check produced by the assertion engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionError {
    message: String,
}

impl AssertionError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The fully rendered failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AssertionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl error::Error for AssertionError {}

/// The ways a test body, a hook or an assertion condition can stop early.
///
/// Skips are not failures of the test but travel the same path so that `?`
/// can be used everywhere.
#[derive(Debug)]
pub enum Failure {
    /// The test asked to be skipped.
    Skip(Skip),
    /// An assertion did not hold.
    Assertion(AssertionError),
    /// Any other error.
    Error(anyhow::Error),
}

impl Failure {
    /// Create a generic failure from a message.
    pub fn error<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Failure::Error(anyhow::Error::msg(message))
    }

    /// Whether this failure came from the assertion engine.
    pub fn is_assertion(&self) -> bool {
        matches!(self, Failure::Assertion(..))
    }

    pub(crate) fn into_error(self) -> anyhow::Error {
        match self {
            Failure::Skip(skip) => anyhow::Error::new(skip),
            Failure::Assertion(err) => anyhow::Error::new(err),
            Failure::Error(err) => err,
        }
    }

    pub(crate) fn panicked(unwind: Unwind) -> Self {
        Failure::Error(anyhow::anyhow!("{}", unwind))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Skip(skip) => fmt::Display::fmt(skip, f),
            Failure::Assertion(err) => fmt::Display::fmt(err, f),
            Failure::Error(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl From<Skip> for Failure {
    fn from(skip: Skip) -> Self {
        Failure::Skip(skip)
    }
}

impl From<AssertionError> for Failure {
    fn from(err: AssertionError) -> Self {
        Failure::Assertion(err)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Error(err)
    }
}

/// The failure recorded on a test.
#[derive(Debug, Clone)]
pub enum Exception {
    /// An assertion did not hold.
    Assertion(AssertionError),
    /// An error was raised by the body or by a hook.
    Error(Rc<anyhow::Error>),
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::Assertion(err) => fmt::Display::fmt(err, f),
            Exception::Error(err) => fmt::Display::fmt(&**err, f),
        }
    }
}
