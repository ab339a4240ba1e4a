use super::Verdict;
use crate::{outcome::Failure, value::Value};
use maybe_unwind::maybe_unwind;
use regex::Regex;
use std::{any, fmt, panic::AssertUnwindSafe, rc::Rc};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Builtin {
    Is,
    Not,
    Ok,
    Nullish,
    OfType,
    Matches,
    StartsWith,
    EndsWith,
    Contains,
    WillThrow,
    WontThrow,
    Equals,
    Called,
}

impl Builtin {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "is" => Builtin::Is,
            "not" => Builtin::Not,
            "ok" => Builtin::Ok,
            "nullish" => Builtin::Nullish,
            "of_type" => Builtin::OfType,
            "matches" => Builtin::Matches,
            "starts_with" => Builtin::StartsWith,
            "ends_with" => Builtin::EndsWith,
            "contains" => Builtin::Contains,
            "will_throw" => Builtin::WillThrow,
            "wont_throw" => Builtin::WontThrow,
            "equals" => Builtin::Equals,
            "called" => Builtin::Called,
            _ => return None,
        })
    }

    pub(crate) fn message(self) -> &'static str {
        match self {
            Builtin::Is => "Actual value {0} did not match expected value {1}",
            Builtin::Not => "Actual value was the same as the unexpected value {0}",
            Builtin::Ok => "Actual value {0} was not truthy as expected",
            Builtin::Nullish => "Actual value {0} was not null or undefined as expected",
            Builtin::OfType => "Type of value {0} was not {1} as expected",
            Builtin::Matches => "{0} does not match the expected {1}",
            Builtin::StartsWith => "Actual value {0} does not begin with {1} as expected",
            Builtin::EndsWith => "Actual value {0} does not end with {1} as expected",
            Builtin::Contains => "Actual value {0} does not contain the expected",
            Builtin::WillThrow => "",
            Builtin::WontThrow => "Function unexpectedly raised an error",
            Builtin::Equals => {
                "Actual value {0} did not match expected value {1} with object comparison."
            }
            Builtin::Called => "Function call count is {2} when a value of {1} was expected",
        }
    }
}

/// What a function is expected to raise, for `will_throw`.
pub enum Expected {
    /// Any error.
    Any,
    /// An error with exactly this message.
    Message(String),
    /// An error whose message matches the pattern.
    Pattern(Regex),
    /// An error of a specific type.
    Kind {
        /// The name of the type, used in failure messages.
        name: &'static str,
        /// Whether the raised error is of this type.
        matches: fn(&anyhow::Error) -> bool,
    },
}

fn is_kind<E>(err: &anyhow::Error) -> bool
where
    E: fmt::Display + fmt::Debug + Send + Sync + 'static,
{
    err.is::<E>()
}

impl Expected {
    /// Expect an error of type `E`.
    pub fn kind<E>() -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Expected::Kind {
            name: any::type_name::<E>(),
            matches: is_kind::<E>,
        }
    }

    pub(crate) fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(message)) => Expected::Message(message.clone()),
            Some(Value::Pattern(re)) => Expected::Pattern((**re).clone()),
            _ => Expected::Any,
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Expected::Any => Value::Undefined,
            Expected::Message(message) => Value::String(message.clone()),
            Expected::Pattern(re) => Value::Pattern(Rc::new(re.clone())),
            Expected::Kind { name, .. } => Value::String((*name).into()),
        }
    }
}

impl fmt::Debug for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Any => f.write_str("Any"),
            Expected::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Expected::Pattern(re) => f.debug_tuple("Pattern").field(re).finish(),
            Expected::Kind { name, .. } => f.debug_struct("Kind").field("name", name).finish(),
        }
    }
}

impl From<()> for Expected {
    fn from(_: ()) -> Self {
        Expected::Any
    }
}

impl From<&str> for Expected {
    fn from(message: &str) -> Self {
        Expected::Message(message.into())
    }
}

impl From<String> for Expected {
    fn from(message: String) -> Self {
        Expected::Message(message)
    }
}

impl From<Regex> for Expected {
    fn from(re: Regex) -> Self {
        Expected::Pattern(re)
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        value => value.to_string(),
    }
}

pub(crate) fn evaluate(builtin: Builtin, subject: &Value, args: &[Value]) -> Result<Verdict, Failure> {
    let verdict = match builtin {
        Builtin::Is => {
            let expected = arg(args, 0);
            if subject.is_nan() {
                expected.is_nan().into()
            } else {
                subject.strict_equals(&expected).into()
            }
        }
        Builtin::Not => {
            let unexpected = arg(args, 0);
            if subject.is_nan() && unexpected.is_nan() {
                Verdict::Fail
            } else {
                (!subject.strict_equals(&unexpected)).into()
            }
        }
        Builtin::Ok => subject.is_truthy().into(),
        Builtin::Nullish => subject.is_nullish().into(),
        Builtin::OfType => of_type(subject, &arg(args, 0))?,
        Builtin::Matches => match arg(args, 0) {
            Value::Pattern(re) => re.is_match(&text(subject)).into(),
            other => return Err(Failure::error(format!("{} is not a pattern", other))),
        },
        Builtin::StartsWith => boundary(subject, &arg(args, 0), "start", |s, n| s.starts_with(n)),
        Builtin::EndsWith => boundary(subject, &arg(args, 0), "end", |s, n| s.ends_with(n)),
        Builtin::Contains => contains(subject, &arg(args, 0))?,
        Builtin::WillThrow => will_throw(subject, &Expected::from_value(args.get(0)))?,
        Builtin::WontThrow => match call(subject)? {
            Ok(..) => Verdict::Pass,
            Err(thrown) => Verdict::detailed("%1 {1}", vec![thrown.message.into()]),
        },
        Builtin::Equals => subject.deep_equals(&arg(args, 0)).into(),
        Builtin::Called => called(subject, &arg(args, 0)),
    };
    Ok(verdict)
}

fn of_type(subject: &Value, name: &Value) -> Result<Verdict, Failure> {
    let name = match name {
        Value::String(name) => name,
        other => {
            return Err(Failure::error(format!(
                "the type name must be a string, not {}",
                other.type_name()
            )))
        }
    };
    let matched = match &name.to_lowercase()[..] {
        "array" => matches!(subject, Value::Array(..)),
        "date" => matches!(subject, Value::Date(..)),
        "regexp" => matches!(subject, Value::Pattern(..)),
        _ => subject.type_name() == name.as_str(),
    };
    Ok(matched.into())
}

fn boundary<F>(subject: &Value, needle: &Value, side: &str, test: F) -> Verdict
where
    F: Fn(&str, &str) -> bool,
{
    match subject {
        Value::String(s) => test(s, &text(needle)).into(),
        other => Verdict::detailed(
            format!(
                "Actual value {{0}} is of type {{2}}, therefore it can not {} with {{1}} as expected",
                side
            ),
            vec![other.type_name().into()],
        ),
    }
}

fn contains(subject: &Value, needle: &Value) -> Result<Verdict, Failure> {
    match subject {
        Value::String(s) => Ok(if s.contains(&text(needle)[..]) {
            Verdict::Pass
        } else {
            Verdict::message("%1 substring {1}")
        }),
        Value::Array(items) => Ok(if items.iter().any(|item| item.strict_equals(needle)) {
            Verdict::Pass
        } else {
            Verdict::message("%1 element {1}")
        }),
        other => Err(Failure::error(format!(
            "a value of type {} can not be searched",
            other.type_name()
        ))),
    }
}

struct Thrown {
    message: String,
    error: Option<anyhow::Error>,
}

/// Invoke the subject as a function, capturing both errors and panics.
fn call(subject: &Value) -> Result<Result<Value, Thrown>, Failure> {
    let func = match subject {
        Value::Function(func) => func,
        other => return Err(Failure::error(format!("{} is not a function", other))),
    };
    Ok(match maybe_unwind(AssertUnwindSafe(|| func.call())) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Thrown {
            message: err.to_string(),
            error: Some(err),
        }),
        Err(unwind) => Err(Thrown {
            message: unwind.to_string(),
            error: None,
        }),
    })
}

pub(crate) fn will_throw(subject: &Value, expected: &Expected) -> Result<Verdict, Failure> {
    let thrown = match call(subject)? {
        Ok(..) => return Ok(Verdict::message("The function unexpectedly threw no errors")),
        Err(thrown) => thrown,
    };
    let mismatch = |message: &str| Verdict::detailed(message, vec![thrown.message.clone().into()]);
    Ok(match expected {
        Expected::Any => Verdict::Pass,
        Expected::Message(message) if *message == thrown.message => Verdict::Pass,
        Expected::Pattern(re) if re.is_match(&thrown.message) => Verdict::Pass,
        Expected::Message(..) | Expected::Pattern(..) => {
            mismatch("An error {2} was thrown, but it did not match the expected error {1}")
        }
        Expected::Kind { matches, .. } => match thrown.error {
            Some(ref err) if matches(err) => Verdict::Pass,
            _ => mismatch("An error {2} was thrown, but it was not an instance of {1} as expected"),
        },
    })
}

fn called(subject: &Value, times: &Value) -> Verdict {
    let count = match subject {
        Value::Host(host) => host.call_count(),
        _ => None,
    };
    let count = match count {
        Some(count) => count,
        None => return Verdict::message("Object is not a spy handle"),
    };
    match times.as_number() {
        Some(times) if count as f64 == times => Verdict::Pass,
        Some(..) => Verdict::detailed("%1", vec![count.into()]),
        None if count > 0 => Verdict::Pass,
        None => Verdict::message("Function was not called"),
    }
}
