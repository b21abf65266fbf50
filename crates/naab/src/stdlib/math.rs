//! Implementation of the `math` module.
//!
//! Constants: PI, E. Functions: abs, floor, ceil, sqrt, pow, min, max.

use std::str::FromStr;

use strum::EnumString;

use crate::{
    arith,
    exception::{ErrorKind, RunError, RunResult},
    resource::ResourceTracker,
    stdlib::{MemberKind, StdlibCtx, StdlibModule, arg_num, expect_arity},
    value::Value,
};

/// Math module functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum MathFunctions {
    Abs,
    Floor,
    Ceil,
    Sqrt,
    Pow,
    Min,
    Max,
}

const CONSTANTS: &[&str] = &["PI", "E"];

pub(crate) fn member_kind(name: &str) -> Option<MemberKind> {
    if CONSTANTS.contains(&name) {
        return Some(MemberKind::Constant);
    }
    MathFunctions::from_str(name).ok().map(|_| MemberKind::Function)
}

pub(crate) fn call<T: ResourceTracker>(
    name: &str,
    args: &[Value],
    _ctx: &mut StdlibCtx<'_, T>,
) -> RunResult<Value> {
    match name {
        "PI" => {
            expect_arity(StdlibModule::Math, name, args, 0)?;
            return Ok(Value::Float(std::f64::consts::PI));
        }
        "E" => {
            expect_arity(StdlibModule::Math, name, args, 0)?;
            return Ok(Value::Float(std::f64::consts::E));
        }
        _ => {}
    }

    let func = MathFunctions::from_str(name)
        .map_err(|_| RunError::err(ErrorKind::UndefinedName, format!("math has no member {name}")))?;
    match func {
        MathFunctions::Abs => {
            expect_arity(StdlibModule::Math, name, args, 1)?;
            match args[0] {
                Value::Int(i) => Ok(Value::Int(if i < 0 { arith::safe_neg(i)? } else { i })),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                _ => Err(RunError::err(ErrorKind::TypeError, "math.abs: expected a number")),
            }
        }
        MathFunctions::Floor => {
            expect_arity(StdlibModule::Math, name, args, 1)?;
            Ok(Value::Float(arg_num(args, 0, "math.floor")?.floor()))
        }
        MathFunctions::Ceil => {
            expect_arity(StdlibModule::Math, name, args, 1)?;
            Ok(Value::Float(arg_num(args, 0, "math.ceil")?.ceil()))
        }
        MathFunctions::Sqrt => {
            expect_arity(StdlibModule::Math, name, args, 1)?;
            Ok(Value::Float(arg_num(args, 0, "math.sqrt")?.sqrt()))
        }
        MathFunctions::Pow => {
            expect_arity(StdlibModule::Math, name, args, 2)?;
            if let (Value::Int(base), Value::Int(exp)) = (&args[0], &args[1]) {
                if *exp >= 0 {
                    let exp = u32::try_from(*exp).map_err(|_| {
                        RunError::err(ErrorKind::ArithmeticError, "math.pow: exponent too large")
                    })?;
                    let result = base.checked_pow(exp).ok_or_else(|| {
                        RunError::err(ErrorKind::ArithmeticError, "integer overflow in math.pow")
                    })?;
                    return Ok(Value::Int(result));
                }
                return Ok(Value::Float((*base as f64).powi(*exp as i32)));
            }
            let base = arg_num(args, 0, "math.pow")?;
            let exp = arg_num(args, 1, "math.pow")?;
            Ok(Value::Float(base.powf(exp)))
        }
        MathFunctions::Min | MathFunctions::Max => {
            expect_arity(StdlibModule::Math, name, args, 2)?;
            if let (Value::Int(a), Value::Int(b)) = (&args[0], &args[1]) {
                let result = if func == MathFunctions::Min { *a.min(b) } else { *a.max(b) };
                return Ok(Value::Int(result));
            }
            let a = arg_num(args, 0, "math.min")?;
            let b = arg_num(args, 1, "math.min")?;
            Ok(Value::Float(if func == MathFunctions::Min { a.min(b) } else { a.max(b) }))
        }
    }
}
