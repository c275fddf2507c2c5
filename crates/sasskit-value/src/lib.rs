//! Host-side representations of stylesheet values.
//!
//! These are the values custom functions receive and return. The driver
//! crate maps them to and from their wire mirrors at the session boundary;
//! nothing in here knows about the protocol.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Error type callbacks may fail with; the text is what ends up in the
/// compiler's error output.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Result of a custom function invocation.
pub type FunctionResult = Result<Value, BoxError>;

/// A custom function body, shared between the registry and any function
/// values passed across the wire.
pub type FunctionCallback = Arc<dyn Fn(&[Value]) -> FunctionResult + Send + Sync>;

/// A stylesheet value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(SassString),
    Number(SassNumber),
    Color(SassColor),
    List(SassList),
    Map(SassMap),
    ArgumentList(SassArgumentList),
    Function(SassFunction),
    Calculation(SassCalculation),
    Bool(bool),
    Null,
}

impl Value {
    /// A quoted string value.
    pub fn string(text: impl Into<String>) -> Self {
        Value::String(SassString {
            text: text.into(),
            quoted: true,
        })
    }

    /// An unquoted string value (an identifier in stylesheet terms).
    pub fn unquoted_string(text: impl Into<String>) -> Self {
        Value::String(SassString {
            text: text.into(),
            quoted: false,
        })
    }

    /// A unitless number.
    pub fn number(value: f64) -> Self {
        Value::Number(SassNumber::unitless(value))
    }

    /// Everything except `false` and `null` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SassString {
    pub text: String,
    pub quoted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SassNumber {
    pub value: f64,
    pub numerator_units: Vec<String>,
    pub denominator_units: Vec<String>,
}

impl SassNumber {
    pub fn unitless(value: f64) -> Self {
        Self {
            value,
            numerator_units: Vec::new(),
            denominator_units: Vec::new(),
        }
    }

    pub fn with_unit(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            numerator_units: vec![unit.into()],
            denominator_units: Vec::new(),
        }
    }

    pub fn is_unitless(&self) -> bool {
        self.numerator_units.is_empty() && self.denominator_units.is_empty()
    }
}

/// An RGB color with channels in `0..=255` and alpha in `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SassColor {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl SassColor {
    pub fn rgb(red: f64, green: f64, blue: f64) -> Self {
        Self::rgba(red, green, blue, 1.0)
    }

    pub fn rgba(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red: red.clamp(0.0, 255.0),
            green: green.clamp(0.0, 255.0),
            blue: blue.clamp(0.0, 255.0),
            alpha: alpha.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSeparator {
    #[default]
    Comma,
    Space,
    Slash,
    /// A separator not yet observable, e.g. for empty or single-element
    /// lists.
    Undecided,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SassList {
    pub contents: Vec<Value>,
    pub separator: ListSeparator,
    pub bracketed: bool,
}

impl SassList {
    pub fn new(contents: Vec<Value>, separator: ListSeparator) -> Self {
        Self {
            contents,
            separator,
            bracketed: false,
        }
    }
}

/// An insertion-ordered value map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SassMap {
    entries: Vec<(Value, Value)>,
}

impl SassMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `key`, preserving first-insertion
    /// order on replacement.
    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<(Value, Value)> {
        self.entries
    }
}

impl FromIterator<(Value, Value)> for SassMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = SassMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

/// Positional arguments plus a keyword mapping; distinguishable from a
/// plain list at the type level.
#[derive(Debug, Clone, PartialEq)]
pub struct SassArgumentList {
    /// Wire correlation id when this list crossed the protocol boundary;
    /// zero for host-constructed lists.
    pub id: u32,
    pub contents: Vec<Value>,
    pub keywords: BTreeMap<String, Value>,
    pub separator: ListSeparator,
}

impl SassArgumentList {
    pub fn new(contents: Vec<Value>, keywords: BTreeMap<String, Value>) -> Self {
        Self {
            id: 0,
            contents,
            keywords,
            separator: ListSeparator::Comma,
        }
    }
}

/// A first-class function reference.
#[derive(Clone)]
pub enum SassFunction {
    /// A function defined by the compiler; the host can only pass the
    /// handle back, never invoke it.
    Compiler { id: u32 },
    /// A function defined on the host, invocable by the compiler through
    /// a function-call request.
    Host {
        signature: String,
        callback: FunctionCallback,
    },
}

impl fmt::Debug for SassFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SassFunction::Compiler { id } => {
                f.debug_struct("Compiler").field("id", id).finish()
            }
            SassFunction::Host { signature, .. } => f
                .debug_struct("Host")
                .field("signature", signature)
                .finish_non_exhaustive(),
        }
    }
}

impl PartialEq for SassFunction {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SassFunction::Compiler { id: a }, SassFunction::Compiler { id: b }) => a == b,
            (
                SassFunction::Host {
                    signature: a,
                    callback: ca,
                },
                SassFunction::Host {
                    signature: b,
                    callback: cb,
                },
            ) => a == b && Arc::ptr_eq(ca, cb),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SassCalculation {
    pub name: String,
    pub arguments: Vec<CalculationArg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalculationArg {
    Number(SassNumber),
    String(String),
    Interpolation(String),
    Operation {
        operator: CalculationOperator,
        left: Box<CalculationArg>,
        right: Box<CalculationArg>,
    },
    Calculation(SassCalculation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculationOperator {
    Plus,
    Minus,
    Times,
    Divide,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_stylesheet_rules() {
        assert!(Value::string("x").is_truthy());
        assert!(Value::number(0.0).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn map_preserves_insertion_order_and_replaces_in_place() {
        let mut map = SassMap::new();
        map.insert(Value::string("b"), Value::number(1.0));
        map.insert(Value::string("a"), Value::number(2.0));
        map.insert(Value::string("b"), Value::number(3.0));

        let keys: Vec<_> = map.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Value::string("b"), Value::string("a")]);
        assert_eq!(map.get(&Value::string("b")), Some(&Value::number(3.0)));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn argument_list_is_distinct_from_plain_list() {
        let args = SassArgumentList::new(
            vec![Value::number(1.0)],
            BTreeMap::from([("name".to_string(), Value::string("x"))]),
        );
        let list = SassList::new(vec![Value::number(1.0)], ListSeparator::Comma);
        assert_ne!(Value::ArgumentList(args), Value::List(list));
    }

    #[test]
    fn host_functions_compare_by_callback_identity() {
        let callback: FunctionCallback = Arc::new(|_| Ok(Value::Null));
        let a = SassFunction::Host {
            signature: "f()".into(),
            callback: Arc::clone(&callback),
        };
        let b = SassFunction::Host {
            signature: "f()".into(),
            callback,
        };
        let c = SassFunction::Host {
            signature: "f()".into(),
            callback: Arc::new(|_| Ok(Value::Null)),
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
