//! Assertions for test bodies
//!
//! `expect(actual).to_be(expected)` returns `Result<(), TestError>`, so an
//! assertion is the last expression of a body or is propagated with `?`.

use std::borrow::Borrow;
use std::fmt::Debug;

use otter_test_mock::{MockFn, Thrown, Value};
use serde::Serialize;

use crate::error::TestError;

/// Start an assertion about `actual`.
pub fn expect<T>(actual: T) -> Expect<T> {
    Expect {
        actual,
        negated: false,
    }
}

/// A pending assertion.
#[must_use = "an expectation does nothing until a matcher is called"]
pub struct Expect<T> {
    actual: T,
    negated: bool,
}

impl<T> Expect<T> {
    /// Invert the next matcher.
    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    fn verdict(
        &self,
        pass: bool,
        matcher: &str,
        expected: Option<String>,
        actual: String,
    ) -> Result<(), TestError> {
        if pass != self.negated {
            return Ok(());
        }
        let not = if self.negated { "not " } else { "" };
        let message = match &expected {
            Some(expected) => format!("expected {actual} {not}{matcher} {expected}"),
            None => format!("expected {actual} {not}{matcher}"),
        };
        Err(TestError::Assertion {
            message,
            expected,
            actual: Some(actual),
        })
    }
}

impl<T: PartialEq + Debug> Expect<T> {
    /// Strict equality.
    pub fn to_be(self, expected: T) -> Result<(), TestError> {
        let pass = self.actual == expected;
        self.verdict(pass, "to be", Some(format!("{expected:?}")), format!("{:?}", self.actual))
    }
}

impl<T: Serialize> Expect<T> {
    /// Structural equality through the values' serialized form.
    pub fn to_equal<U: Serialize>(self, expected: &U) -> Result<(), TestError> {
        let actual = serde_json::to_value(&self.actual)
            .map_err(|e| TestError::assertion(format!("cannot compare actual value: {e}")))?;
        let expected = serde_json::to_value(expected)
            .map_err(|e| TestError::assertion(format!("cannot compare expected value: {e}")))?;
        let pass = actual == expected;
        self.verdict(pass, "to deeply equal", Some(expected.to_string()), actual.to_string())
    }
}

impl Expect<Value> {
    pub fn to_be_truthy(self) -> Result<(), TestError> {
        let pass = self.actual.truthy();
        self.verdict(pass, "to be truthy", None, self.actual.to_string())
    }

    pub fn to_be_falsy(self) -> Result<(), TestError> {
        let pass = !self.actual.truthy();
        self.verdict(pass, "to be falsy", None, self.actual.to_string())
    }

    pub fn to_be_undefined(self) -> Result<(), TestError> {
        let pass = self.actual.is_undefined();
        self.verdict(pass, "to be undefined", None, self.actual.to_string())
    }
}

impl<S: AsRef<str>> Expect<S> {
    pub fn to_contain(self, needle: &str) -> Result<(), TestError> {
        let haystack = self.actual.as_ref();
        let pass = haystack.contains(needle);
        self.verdict(pass, "to contain", Some(format!("{needle:?}")), format!("{haystack:?}"))
    }
}

impl<M: Borrow<MockFn>> Expect<M> {
    fn mock(&self) -> &MockFn {
        self.actual.borrow()
    }

    fn describe(&self) -> String {
        format!("\"{}\"", self.mock().name())
    }

    pub fn to_have_been_called(self) -> Result<(), TestError> {
        let pass = self.mock().was_called();
        self.verdict(pass, "to be called at least once", None, self.describe())
    }

    pub fn to_have_been_called_times(self, times: usize) -> Result<(), TestError> {
        let calls = self.mock().call_count();
        let pass = calls == times;
        self.verdict(
            pass,
            "to be called",
            Some(format!("{times} times, but got {calls} times")),
            self.describe(),
        )
    }

    pub fn to_have_been_called_with(self, args: &[Value]) -> Result<(), TestError> {
        let pass = self.mock().was_called_with(args);
        self.verdict(pass, "to be called with arguments", Some(format_args(args)), self.describe())
    }

    pub fn to_have_been_last_called_with(self, args: &[Value]) -> Result<(), TestError> {
        let pass = self
            .mock()
            .last_call_args()
            .is_some_and(|last| last.as_slice() == args);
        self.verdict(pass, "to be last called with", Some(format_args(args)), self.describe())
    }
}

impl<F, R> Expect<F>
where
    F: FnOnce() -> Result<R, Thrown>,
{
    /// The closure throws, and when `fragment` is given, the message contains it.
    pub fn to_throw(self, fragment: Option<&str>) -> Result<(), TestError> {
        let negated = self.negated;
        let outcome = (self.actual)();
        let (pass, actual) = match &outcome {
            Ok(_) => (false, "function".to_string()),
            Err(thrown) => (
                fragment.is_none_or(|f| thrown.message.contains(f)),
                format!("function that threw {thrown}"),
            ),
        };
        let matcher = Expect {
            actual: (),
            negated,
        };
        matcher.verdict(pass, "to throw", fragment.map(|f| format!("{f:?}")), actual)
    }
}

fn format_args(args: &[Value]) -> String {
    let parts: Vec<String> = args.iter().map(Value::to_string).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_be() {
        assert!(expect(1 + 1).to_be(2).is_ok());
        let err = expect(1).to_be(2).unwrap_err();
        assert_eq!(err.to_string(), "expected 1 to be 2");
        assert!(expect("a").not().to_be("b").is_ok());
        assert_eq!(expect(3).not().to_be(3).unwrap_err().to_string(), "expected 3 not to be 3");
    }

    #[test]
    fn test_to_equal_is_structural() {
        #[derive(Serialize)]
        struct Point {
            x: i32,
            y: i32,
        }
        assert!(expect(Point { x: 1, y: 2 }).to_equal(&serde_json::json!({"x": 1, "y": 2})).is_ok());
        assert!(expect(vec![1, 2]).to_equal(&vec![2, 1]).is_err());
    }

    #[test]
    fn test_value_matchers() {
        assert!(expect(Value::from(1)).to_be_truthy().is_ok());
        assert!(expect(Value::from("")).to_be_falsy().is_ok());
        assert!(expect(Value::Undefined).to_be_undefined().is_ok());
        assert!(expect(Value::Null).to_be_undefined().is_err());
    }

    #[test]
    fn test_mock_matchers() {
        let mock = MockFn::with_name("send");
        assert!(expect(&mock).not().to_have_been_called().is_ok());
        mock.call(&[Value::from(1)]).unwrap();
        mock.call(&[Value::from("x")]).unwrap();

        assert!(expect(&mock).to_have_been_called().is_ok());
        assert!(expect(&mock).to_have_been_called_times(2).is_ok());
        assert!(expect(&mock).to_have_been_called_with(&[Value::from(1)]).is_ok());
        assert!(expect(&mock).to_have_been_last_called_with(&[Value::from("x")]).is_ok());

        let err = expect(&mock).to_have_been_called_times(1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected \"send\" to be called 1 times, but got 2 times"
        );
    }

    #[test]
    fn test_to_throw() {
        assert!(expect(|| Err::<(), _>(Thrown::error("boom"))).to_throw(Some("boom")).is_ok());
        assert!(expect(|| Ok::<_, Thrown>(1)).to_throw(None).is_err());
        assert!(expect(|| Ok::<_, Thrown>(1)).not().to_throw(None).is_ok());
    }

    #[test]
    fn test_to_contain() {
        assert!(expect("hello world").to_contain("world").is_ok());
        assert!(expect(String::from("hello")).to_contain("bye").is_err());
    }
}
