//! Custom-function registration and lookup.
//!
//! Signatures are parsed once, at registration, into their name and
//! parameter list; invalid signatures fail the compile call before any
//! work reaches the compiler. Lookup is by dash-normalized name, so a
//! function registered as `foo_bar($x)` answers calls spelled `foo-bar`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sasskit_value::{FunctionCallback, FunctionResult, Value};

use crate::error::Error;
use crate::lock;

/// A host function the compiler may call during a compilation.
///
/// The signature uses stylesheet declaration syntax, e.g.
/// `"grid-width($n, $gutter: 8px)"`.
#[derive(Clone)]
pub struct CustomFunction {
    pub(crate) signature: String,
    pub(crate) callback: FunctionCallback,
}

impl CustomFunction {
    pub fn new<F>(signature: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&[Value]) -> FunctionResult + Send + Sync + 'static,
    {
        Self {
            signature: signature.into(),
            callback: Arc::new(callback),
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// `_` and `-` are interchangeable when matching identifier names; the
/// original spelling is preserved everywhere else.
pub(crate) fn canonicalize_identifier(name: &str) -> String {
    name.replace('_', "-")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Signature {
    pub name: String,
    pub canonical: String,
    pub parameters: Vec<Parameter>,
    pub rest_parameter: Option<String>,
}

impl Signature {
    /// Checks an evaluated, positional argument count against the
    /// declared parameters.
    pub fn check_arity(&self, count: usize) -> Result<(), String> {
        let required = self
            .parameters
            .iter()
            .filter(|p| p.default.is_none())
            .count();
        if count < required {
            let missing = self
                .parameters
                .iter()
                .skip(count)
                .find(|p| p.default.is_none());
            return Err(match missing {
                Some(parameter) => {
                    format!("missing argument ${} for {}()", parameter.name, self.name)
                }
                None => format!("not enough arguments for {}()", self.name),
            });
        }
        if self.rest_parameter.is_none() && count > self.parameters.len() {
            return Err(format!(
                "{}() takes {} arguments but {} were passed",
                self.name,
                self.parameters.len(),
                count
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Parameter {
    pub name: String,
    pub default: Option<String>,
}

fn invalid(signature: &str, reason: &str) -> Error {
    Error::Host(format!("invalid function signature {signature:?}: {reason}"))
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Parses a registration signature of the form `name(params)`.
pub(crate) fn parse_signature(signature: &str) -> Result<Signature, Error> {
    if signature != signature.trim() {
        return Err(invalid(signature, "leading or trailing whitespace"));
    }
    let Some(open) = signature.find('(') else {
        return Err(invalid(signature, "missing parameter list"));
    };
    if !signature.ends_with(')') {
        return Err(invalid(signature, "unterminated parameter list"));
    }
    let name = &signature[..open];
    if name.starts_with('$') {
        return Err(invalid(signature, "name must not start with `$`"));
    }
    if !is_identifier(name) {
        return Err(invalid(signature, "name is not an identifier"));
    }

    let params = &signature[open + 1..signature.len() - 1];
    let mut parameters = Vec::new();
    let mut rest_parameter = None;
    for raw in split_parameters(params) {
        if rest_parameter.is_some() {
            return Err(invalid(signature, "rest parameter must come last"));
        }
        let raw = raw.trim();
        let Some(param) = raw.strip_prefix('$') else {
            return Err(invalid(signature, "parameters must start with `$`"));
        };
        if let Some(rest) = param.strip_suffix("...") {
            if !is_identifier(rest) {
                return Err(invalid(signature, "rest parameter is not an identifier"));
            }
            rest_parameter = Some(rest.to_string());
            continue;
        }
        let (param_name, default) = match param.split_once(':') {
            Some((name, default)) => (name.trim_end(), Some(default.trim().to_string())),
            None => (param, None),
        };
        if !is_identifier(param_name) {
            return Err(invalid(signature, "parameter name is not an identifier"));
        }
        if parameters
            .iter()
            .any(|p: &Parameter| canonicalize_identifier(&p.name) == canonicalize_identifier(param_name))
        {
            return Err(invalid(signature, "duplicate parameter name"));
        }
        parameters.push(Parameter {
            name: param_name.to_string(),
            default,
        });
    }

    Ok(Signature {
        name: name.to_string(),
        canonical: canonicalize_identifier(name),
        parameters,
        rest_parameter,
    })
}

/// Splits a parameter list on top-level commas; default expressions may
/// themselves contain commas inside parentheses, brackets, or quotes.
fn split_parameters(params: &str) -> Vec<&str> {
    if params.trim().is_empty() {
        return Vec::new();
    }
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (index, c) in params.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    pieces.push(&params[start..index]);
                    start = index + 1;
                }
                _ => {}
            },
        }
    }
    pieces.push(&params[start..]);
    pieces
}

pub(crate) struct RegisteredFunction {
    pub signature: Signature,
    pub callback: FunctionCallback,
}

/// Per-compilation function table: the registered custom functions, plus
/// ids handed out for first-class host functions passed across the wire.
pub(crate) struct FunctionStore {
    by_name: HashMap<String, Arc<RegisteredFunction>>,
    signatures: Vec<String>,
    by_id: Mutex<HashMap<u32, FunctionCallback>>,
    next_id: Mutex<u32>,
}

impl std::fmt::Debug for FunctionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionStore")
            .field("signatures", &self.signatures)
            .finish()
    }
}

impl FunctionStore {
    pub fn build(functions: &[CustomFunction]) -> Result<Self, Error> {
        let mut by_name = HashMap::with_capacity(functions.len());
        let mut signatures = Vec::with_capacity(functions.len());
        for function in functions {
            let parsed = parse_signature(&function.signature)?;
            let name = parsed.name.clone();
            if by_name
                .insert(
                    parsed.canonical.clone(),
                    Arc::new(RegisteredFunction {
                        signature: parsed,
                        callback: Arc::clone(&function.callback),
                    }),
                )
                .is_some()
            {
                return Err(Error::Host(format!(
                    "a function named \"{name}\" is already registered"
                )));
            }
            signatures.push(function.signature.clone());
        }
        Ok(Self {
            by_name,
            signatures,
            by_id: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        })
    }

    /// Registration-order signatures, original spelling, for the compile
    /// request.
    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<RegisteredFunction>, String> {
        self.by_name
            .get(&canonicalize_identifier(name))
            .map(Arc::clone)
            .ok_or_else(|| format!("no custom function named \"{name}\" is registered"))
    }

    pub fn by_id(&self, id: u32) -> Result<FunctionCallback, String> {
        lock(&self.by_id)
            .get(&id)
            .map(Arc::clone)
            .ok_or_else(|| format!("no host function with id {id}"))
    }

    /// Assigns a wire id to a first-class host function value.
    pub fn register_value_function(&self, callback: FunctionCallback) -> u32 {
        let mut next = lock(&self.next_id);
        let id = *next;
        *next += 1;
        lock(&self.by_id).insert(id, callback);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(signature: &str) -> Signature {
        parse_signature(signature).expect(signature)
    }

    fn rejected(signature: &str) {
        assert!(
            parse_signature(signature).is_err(),
            "{signature:?} should be rejected"
        );
    }

    #[test]
    fn parses_plain_signatures() {
        let parsed = ok("foo($arg)");
        assert_eq!(parsed.name, "foo");
        assert_eq!(parsed.canonical, "foo");
        assert_eq!(parsed.parameters.len(), 1);
        assert_eq!(parsed.parameters[0].name, "arg");
        assert_eq!(parsed.rest_parameter, None);

        let parsed = ok("bar()");
        assert!(parsed.parameters.is_empty());
    }

    #[test]
    fn parses_defaults_and_rest() {
        let parsed = ok("grid-width($n, $gutter: 8px, $extra...)");
        assert_eq!(parsed.parameters.len(), 2);
        assert_eq!(parsed.parameters[1].default.as_deref(), Some("8px"));
        assert_eq!(parsed.rest_parameter.as_deref(), Some("extra"));
    }

    #[test]
    fn default_expressions_may_contain_commas() {
        let parsed = ok("pick($items: (1, 2, 3), $sep: ', ')");
        assert_eq!(parsed.parameters.len(), 2);
        assert_eq!(parsed.parameters[0].default.as_deref(), Some("(1, 2, 3)"));
        assert_eq!(parsed.parameters[1].default.as_deref(), Some("', '"));
    }

    #[test]
    fn rejects_malformed_signatures() {
        rejected("$foo()");
        rejected("foo() ");
        rejected(" foo()");
        rejected("foo ()");
        rejected("foo");
        rejected("foo(");
        rejected("1foo()");
        rejected("foo(arg)");
        rejected("foo($a, $a)");
        rejected("foo($a..., $b)");
    }

    #[test]
    fn arity_is_checked_against_the_declared_parameters() {
        let signature = ok("grid-width($n, $gutter: 8px)");
        assert!(signature.check_arity(1).is_ok());
        assert!(signature.check_arity(2).is_ok());
        let err = signature.check_arity(0).unwrap_err();
        assert!(err.contains("$n"), "unhelpful error: {err}");
        assert!(signature.check_arity(3).is_err());

        let rest = ok("join($items...)");
        assert!(rest.check_arity(0).is_ok());
        assert!(rest.check_arity(9).is_ok());
    }

    #[test]
    fn underscores_and_hyphens_are_interchangeable_for_lookup() {
        let store = FunctionStore::build(&[CustomFunction::new("foo_bar($x)", |_| {
            Ok(Value::Null)
        })])
        .expect("build");
        assert!(store.by_name("foo-bar").is_ok());
        assert!(store.by_name("foo_bar").is_ok());
        assert!(store.by_name("foobar").is_err());
    }

    #[test]
    fn duplicate_normalized_names_are_rejected_eagerly() {
        let err = FunctionStore::build(&[
            CustomFunction::new("foo-bar()", |_| Ok(Value::Null)),
            CustomFunction::new("foo_bar()", |_| Ok(Value::Null)),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Host(_)));
    }

    #[test]
    fn value_function_ids_are_unique_while_registered() {
        let store = FunctionStore::build(&[]).expect("build");
        let a = store.register_value_function(Arc::new(|_| Ok(Value::Null)));
        let b = store.register_value_function(Arc::new(|_| Ok(Value::Null)));
        assert_ne!(a, b);
        assert!(store.by_id(a).is_ok());
        assert!(store.by_id(b).is_ok());
        assert!(store.by_id(b + 1).is_err());
    }
}
