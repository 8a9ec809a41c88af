//! Registry entries: values, methods and chain steps.
//!
//! Every name on a module's public surface maps to an [`Entry`]:
//!
//! | Variant | Invoked as | Produces |
//! |---------|------------|----------|
//! | [`Entry::Value`] | not callable | - |
//! | [`Entry::Method`] | `Fn(Value) -> Result<Value, MethodError>` | value or error |
//! | [`Entry::Step`] | `Fn(Value) -> Outcome` | success or failure variant |
//!
//! Steps are the building blocks of `chain`: two steps compose through
//! [`Result::and_then`], so a failing step skips every later step.

use core::fmt;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::MethodError;

/// The two-variant result algebra used by chain steps.
///
/// `Ok` holds the success value, `Err` the failure value. Neither variant is
/// an error of the runtime itself.
pub type Outcome = Result<Value, Value>;

/// Renders an outcome as a tagged value: `{"Ok": v}` or `{"Err": e}`.
#[must_use]
pub fn outcome_to_value(outcome: Outcome) -> Value {
    match outcome {
        Ok(value) => json!({ "Ok": value }),
        Err(failure) => json!({ "Err": failure }),
    }
}

type MethodFn = dyn Fn(Value) -> Result<Value, MethodError> + Send + Sync;
type StepFn = dyn Fn(Value) -> Outcome + Send + Sync;

// ─────────────────────────────────────────────────────────────────────────────
// Method
// ─────────────────────────────────────────────────────────────────────────────

/// A callable registry entry.
///
/// Cloning is cheap and yields the same implementation.
#[derive(Clone)]
pub struct Method(Arc<MethodFn>);

impl Method {
    /// Wraps a function as a method.
    pub fn new(f: impl Fn(Value) -> Result<Value, MethodError> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Invokes the method.
    ///
    /// # Errors
    ///
    /// Returns whatever error the method body produces.
    pub fn call(&self, arg: Value) -> Result<Value, MethodError> {
        (self.0)(arg)
    }

    /// Returns true if both methods share one implementation.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Method(..)")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Step
// ─────────────────────────────────────────────────────────────────────────────

/// A result-returning callable, composable through [`then()`](Step::then).
///
/// # Example
///
/// ```
/// use ensemble_module::entry::Step;
/// use serde_json::json;
///
/// let validate = Step::new(|input| match input.as_i64() {
///     Some(n) if n >= 0 => Ok(input),
///     _ => Err(json!("negative")),
/// });
/// let double = Step::new(|input| Ok(json!(input.as_i64().unwrap_or(0) * 2)));
///
/// let pipeline = validate.then(double);
/// assert_eq!(pipeline.run(json!(4)), Ok(json!(8)));
/// assert_eq!(pipeline.run(json!(-1)), Err(json!("negative")));
/// ```
#[derive(Clone)]
pub struct Step(Arc<StepFn>);

impl Step {
    /// Wraps a function as a chain step.
    pub fn new(f: impl Fn(Value) -> Outcome + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Runs the step.
    #[must_use]
    pub fn run(&self, input: Value) -> Outcome {
        (self.0)(input)
    }

    /// Binds `next` after this step.
    ///
    /// `next` only runs on the success value of this step; a failure is
    /// returned untouched.
    #[must_use]
    pub fn then(&self, next: Step) -> Step {
        let first = self.clone();
        Step::new(move |input| first.run(input).and_then(|value| next.run(value)))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Step(..)")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry
// ─────────────────────────────────────────────────────────────────────────────

/// A named member of a module's public surface.
#[derive(Debug, Clone)]
pub enum Entry {
    /// A plain value.
    Value(Value),
    /// A callable returning a value or a [`MethodError`].
    Method(Method),
    /// A callable returning an [`Outcome`].
    Step(Step),
}

impl Entry {
    /// Returns true for methods and steps.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        !matches!(self, Entry::Value(_))
    }

    /// Names the variant for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Entry::Value(_) => "value",
            Entry::Method(_) => "method",
            Entry::Step(_) => "step",
        }
    }

    /// Returns the plain value, if this entry is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the method, if this entry is one.
    #[must_use]
    pub fn as_method(&self) -> Option<&Method> {
        match self {
            Entry::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Returns the step, if this entry is one.
    #[must_use]
    pub fn as_step(&self) -> Option<&Step> {
        match self {
            Entry::Step(step) => Some(step),
            _ => None,
        }
    }

    /// Invokes the entry as `module.name(arg)`.
    ///
    /// Steps are rendered through [`outcome_to_value`], so a failing step is a
    /// successful call returning the failure variant.
    ///
    /// # Errors
    ///
    /// - [`MethodError::NotCallable`] if the entry is a plain value
    /// - any error produced by the method body
    pub fn invoke(&self, module: &str, name: &str, arg: Value) -> Result<Value, MethodError> {
        match self {
            Entry::Method(method) => method.call(arg),
            Entry::Step(step) => Ok(outcome_to_value(step.run(arg))),
            Entry::Value(_) => Err(MethodError::NotCallable {
                module: module.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Runs the entry as a chain step.
    ///
    /// # Errors
    ///
    /// Returns [`MethodError::NotChainable`] if the entry is not a step.
    pub fn invoke_chain(&self, module: &str, name: &str, arg: Value) -> Result<Outcome, MethodError> {
        match self {
            Entry::Step(step) => Ok(step.run(arg)),
            _ => Err(MethodError::NotChainable {
                module: module.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Turns a callable entry into a [`Method`].
    ///
    /// Steps are adapted through [`outcome_to_value`].
    #[must_use]
    pub fn into_method(self) -> Option<Method> {
        match self {
            Entry::Method(method) => Some(method),
            Entry::Step(step) => Some(Method::new(move |arg| Ok(outcome_to_value(step.run(arg))))),
            Entry::Value(_) => None,
        }
    }
}

impl From<Value> for Entry {
    fn from(value: Value) -> Self {
        Entry::Value(value)
    }
}

impl From<Method> for Entry {
    fn from(method: Method) -> Self {
        Entry::Method(method)
    }
}

impl From<Step> for Entry {
    fn from(step: Step) -> Self {
        Entry::Step(step)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered set of named entries returned by a `derive` function.
///
/// Entries are merged into the registry in insertion order, so a later entry
/// with the same name wins.
///
/// # Example
///
/// ```
/// use ensemble_module::entry::Record;
/// use serde_json::json;
///
/// let record = Record::new()
///     .value("version", json!(3))
///     .method("double", |x| Ok(json!(x.as_i64().unwrap_or(0) * 2)));
///
/// assert_eq!(record.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Record {
    entries: Vec<(String, Entry)>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry of any kind.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, entry: impl Into<Entry>) -> Self {
        self.entries.push((name.into(), entry.into()));
        self
    }

    /// Adds a plain value.
    #[must_use]
    pub fn value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(name, Entry::Value(value.into()))
    }

    /// Adds a method.
    #[must_use]
    pub fn method(
        self,
        name: impl Into<String>,
        f: impl Fn(Value) -> Result<Value, MethodError> + Send + Sync + 'static,
    ) -> Self {
        self.with(name, Method::new(f))
    }

    /// Adds a chain step.
    #[must_use]
    pub fn step(
        self,
        name: impl Into<String>,
        f: impl Fn(Value) -> Outcome + Send + Sync + 'static,
    ) -> Self {
        self.with(name, Step::new(f))
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the record holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Record {
    type Item = (String, Entry);
    type IntoIter = std::vec::IntoIter<(String, Entry)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, E: Into<Entry>> FromIterator<(K, E)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, E)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, entry)| (name.into(), entry.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_entry_is_not_callable() {
        let entry = Entry::from(json!(1));
        assert!(!entry.is_callable());
        assert_eq!(entry.kind(), "value");

        let err = entry.invoke("m", "x", Value::Null).unwrap_err();
        assert!(matches!(err, MethodError::NotCallable { .. }));
    }

    #[test]
    fn method_entry_invokes_body() {
        let entry = Entry::from(Method::new(|x| Ok(json!(x.as_i64().unwrap_or(0) + 1))));
        assert_eq!(entry.invoke("m", "inc", json!(1)).unwrap(), json!(2));
    }

    #[test]
    fn method_errors_pass_through() {
        let entry = Entry::from(Method::new(|_| Err(MethodError::failed("boom"))));
        let err = entry.invoke("m", "explode", Value::Null).unwrap_err();
        assert!(matches!(err, MethodError::Failed(ref msg) if msg == "boom"));
    }

    #[test]
    fn step_entry_renders_tagged_outcome() {
        let entry = Entry::from(Step::new(|x| if x.is_null() { Err(json!("empty")) } else { Ok(x) }));

        assert_eq!(entry.invoke("m", "s", json!(5)).unwrap(), json!({ "Ok": 5 }));
        assert_eq!(
            entry.invoke("m", "s", Value::Null).unwrap(),
            json!({ "Err": "empty" })
        );
    }

    #[test]
    fn invoke_chain_requires_step() {
        let method = Entry::from(Method::new(Ok));
        let err = method.invoke_chain("m", "f", Value::Null).unwrap_err();
        assert!(matches!(err, MethodError::NotChainable { .. }));
    }

    #[test]
    fn step_then_short_circuits() {
        let calls = Arc::new(parking_lot::Mutex::new(0));
        let counter = Arc::clone(&calls);

        let fail = Step::new(|_| Err(json!("stop")));
        let count = Step::new(move |x| {
            *counter.lock() += 1;
            Ok(x)
        });

        assert_eq!(fail.then(count).run(json!(1)), Err(json!("stop")));
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn record_preserves_insertion_order() {
        let record = Record::new()
            .value("a", 1)
            .value("b", 2)
            .value("a", 3);

        let names: Vec<String> = record.into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b", "a"]);
    }

    #[test]
    fn into_method_adapts_steps() {
        let step = Entry::from(Step::new(|_| Err(json!(false))));
        let method = step.into_method().unwrap();
        assert_eq!(method.call(Value::Null).unwrap(), json!({ "Err": false }));

        assert!(Entry::from(json!(0)).into_method().is_none());
    }
}
