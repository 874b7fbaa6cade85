//! Arithmetic, comparison, length, and concatenation semantics (spec §6
//! "Operators and coercion"). Each operation tries the raw numeric/string
//! rule first and falls back to the matching metamethod exactly once
//! (spec §5 "A metamethod invocation is itself subject to the normal
//! call protocol").

use crate::error::{LuaError, LuaResult};
use crate::value::Value;
use crate::vm::call;
use crate::vm::opcode::OpCode;
use crate::vm::state::LuaState;

/// Parse a value as a number the way arithmetic coercion does: numbers
/// pass through, strings are parsed with Lua's numeral grammar (spec §6.1
/// "a string that looks like a number coerces in arithmetic context"),
/// everything else fails.
pub fn coerce_number(state: &LuaState, v: Value) -> Option<f64> {
    match v {
        Value::Number(n) => Some(n),
        Value::String(s) => {
            let text = state.gc.allocator.strings.get(s.0)?.as_str();
            parse_lua_number(text)
        }
        _ => None,
    }
}

fn parse_lua_number(text: &str) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().map(|i| i as f64);
    }
    if let Some(rest) = t.strip_prefix("-0x").or_else(|| t.strip_prefix("-0X")) {
        return i64::from_str_radix(rest, 16).ok().map(|i| -(i as f64));
    }
    t.parse::<f64>().ok()
}

fn meta_name_for(state: &LuaState, op: OpCode) -> Option<crate::value::StringId> {
    match op {
        OpCode::Add => Some(state.meta.add),
        OpCode::Sub => Some(state.meta.sub),
        OpCode::Mul => Some(state.meta.mul),
        OpCode::Div => Some(state.meta.div),
        OpCode::Mod => Some(state.meta.modulo),
        OpCode::Pow => Some(state.meta.pow),
        _ => None,
    }
}

fn raw_binop(op: OpCode, a: f64, b: f64) -> f64 {
    match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Mod => {
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        OpCode::Pow => a.powf(b),
        _ => unreachable!("raw_binop called with non-arithmetic opcode"),
    }
}

/// Apply a binary arithmetic operator, falling back to its metamethod.
/// `op` must be one of `Add, Sub, Mul, Div, Mod, Pow`.
pub fn binary_arith(state: &mut LuaState, op: OpCode, a: Value, b: Value) -> LuaResult<Value> {
    if let (Some(x), Some(y)) = (coerce_number(state, a), coerce_number(state, b)) {
        return Ok(Value::Number(raw_binop(op, x, y)));
    }
    let name = meta_name_for(state, op).expect("binary_arith called with non-arithmetic opcode");
    if let Some(h) = crate::vm::metamethod::get_metamethod(state, a, name)
        .or_else(|| crate::vm::metamethod::get_metamethod(state, b, name))
    {
        return call::call_for_value(state, h, &[a, b]);
    }
    let bad = if coerce_number(state, a).is_none() { a } else { b };
    Err(state.runtime_error(LuaError::ArithError, format!("attempt to perform arithmetic on a {} value", bad.type_name())))
}

pub fn unary_minus(state: &mut LuaState, v: Value) -> LuaResult<Value> {
    if let Some(n) = coerce_number(state, v) {
        return Ok(Value::Number(-n));
    }
    if let Some(h) = crate::vm::metamethod::get_metamethod(state, v, state.meta.unm) {
        return call::call_for_value(state, h, &[v, v]);
    }
    Err(state.runtime_error(LuaError::ArithError, format!("attempt to perform arithmetic on a {} value", v.type_name())))
}

pub fn length(state: &mut LuaState, v: Value) -> LuaResult<Value> {
    match v {
        Value::String(s) => {
            let len = state.gc.allocator.strings.get(s.0).map(|s| s.len()).unwrap_or(0);
            Ok(Value::Number(len as f64))
        }
        Value::Table(t) => {
            if let Some(h) = crate::vm::metamethod::get_metamethod(state, v, state.meta.len) {
                return call::call_for_value(state, h, &[v]);
            }
            let len = state.gc.allocator.tables.get(t.0).map(|t| t.length()).unwrap_or(0);
            Ok(Value::Number(len as f64))
        }
        _ => Err(state.runtime_error(LuaError::TypeError, format!("attempt to get length of a {} value", v.type_name()))),
    }
}

fn coerce_concat_str(state: &mut LuaState, v: Value) -> Option<String> {
    match v {
        Value::String(s) => state.gc.allocator.strings.get(s.0).map(|s| s.as_str().to_string()),
        Value::Number(n) => Some(format_number(n)),
        _ => None,
    }
}

/// Render a number the way Lua's `tostring`/concat coercion does: integral
/// floats print without a trailing `.0` (spec §6.3 "numbers coerce to
/// their shortest round-tripping decimal form").
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    format!("{}", n)
}

/// Concatenate `R[b..=c]` (spec §6.2 "concatenation folds right to left
/// over a contiguous register range"), falling back to `__concat` pairwise
/// from the right when a raw coercion fails.
pub fn concat(state: &mut LuaState, values: &[Value]) -> LuaResult<Value> {
    let mut acc = *values.last().expect("concat requires at least one operand");
    for &v in values[..values.len() - 1].iter().rev() {
        acc = concat_pair(state, v, acc)?;
    }
    Ok(acc)
}

fn concat_pair(state: &mut LuaState, a: Value, b: Value) -> LuaResult<Value> {
    if let (Some(sa), Some(sb)) = (coerce_concat_str(state, a), coerce_concat_str(state, b)) {
        return Ok(state.intern_value(&(sa + &sb)));
    }
    if let Some(h) = crate::vm::metamethod::get_metamethod(state, a, state.meta.concat)
        .or_else(|| crate::vm::metamethod::get_metamethod(state, b, state.meta.concat))
    {
        return call::call_for_value(state, h, &[a, b]);
    }
    let bad = if coerce_concat_str(state, a).is_none() { a } else { b };
    Err(state.runtime_error(LuaError::ConcatError, format!("attempt to concatenate a {} value", bad.type_name())))
}

pub fn raw_equals(_state: &LuaState, a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Table(x), Value::Table(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => x == y,
        (Value::Userdata(x), Value::Userdata(y)) => x == y,
        (Value::Thread(x), Value::Thread(y)) => x == y,
        _ => false,
    }
}

pub fn equals(state: &mut LuaState, a: Value, b: Value) -> LuaResult<bool> {
    if raw_equals(state, a, b) {
        return Ok(true);
    }
    let both_tables = matches!((a, b), (Value::Table(_), Value::Table(_)));
    let both_userdata = matches!((a, b), (Value::Userdata(_), Value::Userdata(_)));
    if both_tables || both_userdata {
        if let Some(h) = crate::vm::metamethod::get_metamethod(state, a, state.meta.eq)
            .or_else(|| crate::vm::metamethod::get_metamethod(state, b, state.meta.eq))
        {
            let r = call::call_for_value(state, h, &[a, b])?;
            return Ok(r.is_truthy());
        }
    }
    Ok(false)
}

pub fn less_than(state: &mut LuaState, a: Value, b: Value) -> LuaResult<bool> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x < y),
        (Value::String(x), Value::String(y)) => Ok(lua_str(state, x) < lua_str(state, y)),
        _ => {
            if let Some(h) = crate::vm::metamethod::get_metamethod(state, a, state.meta.lt)
                .or_else(|| crate::vm::metamethod::get_metamethod(state, b, state.meta.lt))
            {
                let r = call::call_for_value(state, h, &[a, b])?;
                return Ok(r.is_truthy());
            }
            Err(state.runtime_error(LuaError::TypeError, format!("attempt to compare {} with {}", a.type_name(), b.type_name())))
        }
    }
}

pub fn less_equal(state: &mut LuaState, a: Value, b: Value) -> LuaResult<bool> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x <= y),
        (Value::String(x), Value::String(y)) => Ok(lua_str(state, x) <= lua_str(state, y)),
        _ => {
            if let Some(h) = crate::vm::metamethod::get_metamethod(state, a, state.meta.le)
                .or_else(|| crate::vm::metamethod::get_metamethod(state, b, state.meta.le))
            {
                let r = call::call_for_value(state, h, &[a, b])?;
                return Ok(r.is_truthy());
            }
            Err(state.runtime_error(LuaError::TypeError, format!("attempt to compare {} with {}", a.type_name(), b.type_name())))
        }
    }
}

fn lua_str(state: &LuaState, id: crate::value::StringId) -> String {
    state.gc.allocator.strings.get(id.0).map(|s| s.as_str().to_string()).unwrap_or_default()
}

/// Coerce a numeric-`for` control value (spec §4.3.1 numeric `for`: "the
/// initial value, limit, and step must each be a number or a string
/// coercible to one").
pub fn as_for_number(state: &mut LuaState, v: Value, what: &str) -> LuaResult<f64> {
    coerce_number(state, v).ok_or_else(|| state.runtime_error(LuaError::TypeError, format!("'for' {} must be a number", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcParams;

    fn state() -> LuaState {
        LuaState::new(GcParams::default())
    }

    #[test]
    fn format_number_drops_trailing_zero_for_integral_floats() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-12.0), "-12");
    }

    #[test]
    fn format_number_keeps_fractional_digits() {
        assert_eq!(format_number(3.5), "3.5");
    }

    #[test]
    fn format_number_handles_non_finite_values() {
        assert_eq!(format_number(f64::NAN), "nan");
        assert_eq!(format_number(f64::INFINITY), "inf");
        assert_eq!(format_number(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn parse_lua_number_accepts_decimal_and_hex() {
        assert_eq!(parse_lua_number("  42  "), Some(42.0));
        assert_eq!(parse_lua_number("0x1F"), Some(31.0));
        assert_eq!(parse_lua_number("-0x10"), Some(-16.0));
        assert_eq!(parse_lua_number("not a number"), None);
    }

    #[test]
    fn raw_equals_compares_by_value_for_scalars_and_by_id_for_objects() {
        let st = state();
        assert!(raw_equals(&st, Value::Number(1.0), Value::Number(1.0)));
        assert!(!raw_equals(&st, Value::Number(1.0), Value::Number(2.0)));
        assert!(!raw_equals(&st, Value::Nil, Value::Boolean(false)));
    }

    #[test]
    fn binary_arith_computes_raw_numeric_result_without_a_metamethod() {
        let mut st = state();
        let r = binary_arith(&mut st, OpCode::Add, Value::Number(2.0), Value::Number(3.0)).unwrap();
        assert_eq!(r, Value::Number(5.0));
    }

    #[test]
    fn binary_arith_on_non_numbers_without_metatables_raises_an_error() {
        let mut st = state();
        let err = binary_arith(&mut st, OpCode::Add, Value::Nil, Value::Number(1.0));
        assert!(err.is_err());
    }

    #[test]
    fn string_concat_coerces_numbers_and_interns_the_result() {
        let mut st = state();
        let x = st.intern_value("x");
        let v = concat(&mut st, &[Value::Number(1.0), x]).unwrap();
        assert_eq!(v, st.intern_value("1x"));
    }

    #[test]
    fn less_than_orders_strings_lexicographically() {
        let mut st = state();
        let a = st.intern_value("abc");
        let b = st.intern_value("abd");
        assert!(less_than(&mut st, a, b).unwrap());
        assert!(!less_than(&mut st, b, a).unwrap());
    }
}
