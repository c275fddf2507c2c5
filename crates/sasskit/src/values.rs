//! Mapping between host values and their wire mirrors.
//!
//! The mapping is bijective for every value a callback can legitimately
//! produce. Errors here are returned to the compiler as error responses,
//! which it converts into a compile error at the call site; they never
//! panic the host.

use std::collections::BTreeMap;

use sasskit_protocol::proto;
use sasskit_value::{
    CalculationArg, CalculationOperator, ListSeparator, SassArgumentList, SassCalculation,
    SassColor, SassFunction, SassList, SassMap, SassNumber, SassString, Value,
};

use crate::functions::FunctionStore;

fn separator_to_wire(separator: ListSeparator) -> proto::WireSeparator {
    match separator {
        ListSeparator::Comma => proto::WireSeparator::Comma,
        ListSeparator::Space => proto::WireSeparator::Space,
        ListSeparator::Slash => proto::WireSeparator::Slash,
        ListSeparator::Undecided => proto::WireSeparator::Undecided,
    }
}

fn separator_to_host(separator: proto::WireSeparator) -> ListSeparator {
    match separator {
        proto::WireSeparator::Comma => ListSeparator::Comma,
        proto::WireSeparator::Space => ListSeparator::Space,
        proto::WireSeparator::Slash => ListSeparator::Slash,
        proto::WireSeparator::Undecided => ListSeparator::Undecided,
    }
}

fn operator_to_wire(operator: CalculationOperator) -> proto::CalcOperator {
    match operator {
        CalculationOperator::Plus => proto::CalcOperator::Plus,
        CalculationOperator::Minus => proto::CalcOperator::Minus,
        CalculationOperator::Times => proto::CalcOperator::Times,
        CalculationOperator::Divide => proto::CalcOperator::Divide,
    }
}

fn operator_to_host(operator: proto::CalcOperator) -> CalculationOperator {
    match operator {
        proto::CalcOperator::Plus => CalculationOperator::Plus,
        proto::CalcOperator::Minus => CalculationOperator::Minus,
        proto::CalcOperator::Times => CalculationOperator::Times,
        proto::CalcOperator::Divide => CalculationOperator::Divide,
    }
}

fn number_to_wire(number: &SassNumber) -> proto::ValNumber {
    proto::ValNumber {
        value: number.value,
        numerators: number.numerator_units.clone(),
        denominators: number.denominator_units.clone(),
    }
}

fn number_to_host(number: &proto::ValNumber) -> SassNumber {
    SassNumber {
        value: number.value,
        numerator_units: number.numerators.clone(),
        denominator_units: number.denominators.clone(),
    }
}

fn calc_arg_to_wire(arg: &CalculationArg) -> Result<proto::CalcValue, String> {
    Ok(match arg {
        CalculationArg::Number(number) => proto::CalcValue::Number(number_to_wire(number)),
        CalculationArg::String(text) => proto::CalcValue::String(text.clone()),
        CalculationArg::Interpolation(text) => proto::CalcValue::Interpolation(text.clone()),
        CalculationArg::Operation {
            operator,
            left,
            right,
        } => proto::CalcValue::Operation(Box::new(proto::CalcOperation {
            operator: operator_to_wire(*operator),
            left: calc_arg_to_wire(left)?,
            right: calc_arg_to_wire(right)?,
        })),
        CalculationArg::Calculation(calculation) => {
            proto::CalcValue::Calculation(calculation_to_wire(calculation)?)
        }
    })
}

fn calc_arg_to_host(arg: &proto::CalcValue) -> Result<CalculationArg, String> {
    Ok(match arg {
        proto::CalcValue::Number(number) => CalculationArg::Number(number_to_host(number)),
        proto::CalcValue::String(text) => CalculationArg::String(text.clone()),
        proto::CalcValue::Interpolation(text) => CalculationArg::Interpolation(text.clone()),
        proto::CalcValue::Operation(operation) => CalculationArg::Operation {
            operator: operator_to_host(operation.operator),
            left: Box::new(calc_arg_to_host(&operation.left)?),
            right: Box::new(calc_arg_to_host(&operation.right)?),
        },
        proto::CalcValue::Calculation(calculation) => {
            CalculationArg::Calculation(calculation_to_host(calculation)?)
        }
    })
}

fn calculation_to_wire(calculation: &SassCalculation) -> Result<proto::ValCalculation, String> {
    if calculation.name.is_empty() {
        return Err("a calculation must have a name".to_string());
    }
    let mut arguments = Vec::with_capacity(calculation.arguments.len());
    for arg in &calculation.arguments {
        arguments.push(calc_arg_to_wire(arg)?);
    }
    Ok(proto::ValCalculation {
        name: calculation.name.clone(),
        arguments,
    })
}

fn calculation_to_host(calculation: &proto::ValCalculation) -> Result<SassCalculation, String> {
    let mut arguments = Vec::with_capacity(calculation.arguments.len());
    for arg in &calculation.arguments {
        arguments.push(calc_arg_to_host(arg)?);
    }
    Ok(SassCalculation {
        name: calculation.name.clone(),
        arguments,
    })
}

/// Converts a callback's return value into its wire form. First-class
/// host functions are assigned a wire id in `functions` as they cross.
pub(crate) fn to_wire(value: &Value, functions: &FunctionStore) -> Result<proto::Value, String> {
    Ok(match value {
        Value::String(SassString { text, quoted }) => proto::Value::String(proto::ValString {
            text: text.clone(),
            quoted: *quoted,
        }),
        Value::Number(number) => proto::Value::Number(number_to_wire(number)),
        Value::Color(SassColor {
            red,
            green,
            blue,
            alpha,
        }) => proto::Value::RgbColor(proto::ValColor {
            red: *red,
            green: *green,
            blue: *blue,
            alpha: *alpha,
        }),
        Value::List(list) => {
            let mut contents = Vec::with_capacity(list.contents.len());
            for item in &list.contents {
                contents.push(to_wire(item, functions)?);
            }
            proto::Value::List(proto::ValList {
                separator: separator_to_wire(list.separator),
                has_brackets: list.bracketed,
                contents,
            })
        }
        Value::Map(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (key, val) in map.iter() {
                entries.push((to_wire(key, functions)?, to_wire(val, functions)?));
            }
            proto::Value::Map(proto::ValMap { entries })
        }
        Value::ArgumentList(list) => {
            let mut contents = Vec::with_capacity(list.contents.len());
            for item in &list.contents {
                contents.push(to_wire(item, functions)?);
            }
            let mut keywords = Vec::with_capacity(list.keywords.len());
            for (name, val) in &list.keywords {
                keywords.push((name.clone(), to_wire(val, functions)?));
            }
            proto::Value::ArgumentList(proto::ValArgumentList {
                id: list.id,
                separator: separator_to_wire(list.separator),
                contents,
                keywords,
            })
        }
        Value::Function(SassFunction::Compiler { id }) => proto::Value::CompilerFunction(*id),
        Value::Function(SassFunction::Host {
            signature,
            callback,
        }) => {
            crate::functions::parse_signature(signature)
                .map_err(|err| err.to_string())?;
            let id = functions.register_value_function(callback.clone());
            proto::Value::HostFunction(proto::ValHostFunction {
                id,
                signature: signature.clone(),
            })
        }
        Value::Calculation(calculation) => {
            proto::Value::Calculation(calculation_to_wire(calculation)?)
        }
        Value::Bool(true) => proto::Value::Singleton(proto::SingletonValue::True),
        Value::Bool(false) => proto::Value::Singleton(proto::SingletonValue::False),
        Value::Null => proto::Value::Singleton(proto::SingletonValue::Null),
    })
}

/// Converts a wire value received from the compiler into its host form.
pub(crate) fn to_host(value: &proto::Value) -> Result<Value, String> {
    Ok(match value {
        proto::Value::String(string) => Value::String(SassString {
            text: string.text.clone(),
            quoted: string.quoted,
        }),
        proto::Value::Number(number) => Value::Number(number_to_host(number)),
        proto::Value::RgbColor(color) => Value::Color(SassColor {
            red: color.red,
            green: color.green,
            blue: color.blue,
            alpha: color.alpha,
        }),
        proto::Value::List(list) => {
            let mut contents = Vec::with_capacity(list.contents.len());
            for item in &list.contents {
                contents.push(to_host(item)?);
            }
            Value::List(SassList {
                contents,
                separator: separator_to_host(list.separator),
                bracketed: list.has_brackets,
            })
        }
        proto::Value::Map(map) => {
            let mut out = SassMap::new();
            for (key, val) in &map.entries {
                out.insert(to_host(key)?, to_host(val)?);
            }
            Value::Map(out)
        }
        proto::Value::Singleton(proto::SingletonValue::True) => Value::Bool(true),
        proto::Value::Singleton(proto::SingletonValue::False) => Value::Bool(false),
        proto::Value::Singleton(proto::SingletonValue::Null) => Value::Null,
        proto::Value::CompilerFunction(id) => Value::Function(SassFunction::Compiler { id: *id }),
        proto::Value::HostFunction(_) => {
            return Err(
                "the compiler may not send a host function value; only compiler function handles cross this direction"
                    .to_string(),
            )
        }
        proto::Value::ArgumentList(list) => {
            let mut contents = Vec::with_capacity(list.contents.len());
            for item in &list.contents {
                contents.push(to_host(item)?);
            }
            let mut keywords = BTreeMap::new();
            for (name, val) in &list.keywords {
                keywords.insert(name.clone(), to_host(val)?);
            }
            Value::ArgumentList(SassArgumentList {
                id: list.id,
                contents,
                keywords,
                separator: separator_to_host(list.separator),
            })
        }
        proto::Value::Calculation(calculation) => {
            Value::Calculation(calculation_to_host(calculation)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn empty_store() -> FunctionStore {
        FunctionStore::build(&[]).expect("empty store")
    }

    fn round_trip(value: Value) {
        let store = empty_store();
        let wire = to_wire(&value, &store).expect("to wire");
        let back = to_host(&wire).expect("to host");
        assert_eq!(back, value);
    }

    #[test]
    fn scalar_values_round_trip() {
        round_trip(Value::string("quoted"));
        round_trip(Value::unquoted_string("ident"));
        round_trip(Value::Number(SassNumber::with_unit(1.5, "px")));
        round_trip(Value::Color(SassColor::rgba(255.0, 165.0, 0.0, 0.5)));
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::Null);
        round_trip(Value::Function(SassFunction::Compiler { id: 9 }));
    }

    #[test]
    fn collection_values_round_trip() {
        let mut map = SassMap::new();
        map.insert(Value::string("a"), Value::number(1.0));
        map.insert(Value::string("b"), Value::number(2.0));
        round_trip(Value::Map(map));

        let mut list = SassList::new(
            vec![Value::string("x"), Value::Null],
            ListSeparator::Slash,
        );
        list.bracketed = true;
        round_trip(Value::List(list));

        round_trip(Value::ArgumentList(SassArgumentList::new(
            vec![Value::number(4.0)],
            BTreeMap::from([("gutter".to_string(), Value::string("8px"))]),
        )));

        round_trip(Value::Calculation(SassCalculation {
            name: "calc".into(),
            arguments: vec![CalculationArg::Operation {
                operator: CalculationOperator::Plus,
                left: Box::new(CalculationArg::Number(SassNumber::with_unit(1.0, "rem"))),
                right: Box::new(CalculationArg::Interpolation("var(--gap)".into())),
            }],
        }));
    }

    #[test]
    fn host_functions_are_assigned_wire_ids() {
        let store = empty_store();
        let value = Value::Function(SassFunction::Host {
            signature: "lighten-all($args...)".into(),
            callback: Arc::new(|_| Ok(Value::Null)),
        });
        let wire = to_wire(&value, &store).expect("to wire");
        let proto::Value::HostFunction(function) = wire else {
            panic!("expected a host function, got {wire:?}");
        };
        assert_eq!(function.signature, "lighten-all($args...)");
        assert!(store.by_id(function.id).is_ok());
    }

    #[test]
    fn host_function_with_bad_signature_is_an_error() {
        let store = empty_store();
        let value = Value::Function(SassFunction::Host {
            signature: "$oops()".into(),
            callback: Arc::new(|_| Ok(Value::Null)),
        });
        assert!(to_wire(&value, &store).is_err());
    }

    #[test]
    fn inbound_host_function_values_are_rejected() {
        let wire = proto::Value::HostFunction(proto::ValHostFunction {
            id: 1,
            signature: "f()".into(),
        });
        assert!(to_host(&wire).is_err());
    }

    #[test]
    fn nameless_calculation_is_an_error() {
        let store = empty_store();
        let value = Value::Calculation(SassCalculation {
            name: String::new(),
            arguments: Vec::new(),
        });
        assert!(to_wire(&value, &store).is_err());
    }
}
