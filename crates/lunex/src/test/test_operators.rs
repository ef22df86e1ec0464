// Arithmetic, comparison, bitwise, and concatenation semantics.

use super::{first, run, run_err};
use crate::lua_value::LuaValue;

#[test]
fn test_integer_float_subtypes() {
    let vals = run("return 1 + 2, 1 + 2.0, 7 / 2, 7 // 2, 7 % 3, 2 ^ 10");
    assert!(matches!(vals[0], LuaValue::Integer(3)));
    assert!(matches!(vals[1], LuaValue::Float(f) if f == 3.0));
    assert!(matches!(vals[2], LuaValue::Float(f) if f == 3.5));
    assert!(matches!(vals[3], LuaValue::Integer(3)));
    assert!(matches!(vals[4], LuaValue::Integer(1)));
    assert!(matches!(vals[5], LuaValue::Float(f) if f == 1024.0));
}

#[test]
fn test_integer_wraparound() {
    let v = first("return math.maxinteger + 1 == math.mininteger");
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_floor_division_and_modulo_signs() {
    let vals = run("return -7 // 2, -7 % 2, 7 % -2, -7.5 % 2");
    assert!(matches!(vals[0], LuaValue::Integer(-4)));
    assert!(matches!(vals[1], LuaValue::Integer(1)));
    assert!(matches!(vals[2], LuaValue::Integer(-1)));
    assert!(matches!(vals[3], LuaValue::Float(f) if f == 0.5));
}

#[test]
fn test_integer_division_by_zero_errors() {
    let msg = run_err("return 1 // 0");
    assert!(msg.contains("n//0"), "got: {}", msg);
    let msg = run_err("return 1 % 0");
    assert!(msg.contains("n%%0"), "got: {}", msg);
}

#[test]
fn test_float_division_by_zero_is_inf() {
    let v = first("return 1 / 0 == math.huge");
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_string_arith_coercion() {
    let vals = run(r#"return "10" + 5, "0x10" + 0"#);
    assert!(matches!(vals[0], LuaValue::Integer(15)));
    assert!(matches!(vals[1], LuaValue::Integer(16)));
}

#[test]
fn test_bitwise_ops() {
    let vals = run("return 0xF0 & 0x3C, 0xF0 | 0x0F, 0xFF ~ 0x0F, ~0, 1 << 4, 256 >> 4");
    assert!(matches!(vals[0], LuaValue::Integer(0x30)));
    assert!(matches!(vals[1], LuaValue::Integer(0xFF)));
    assert!(matches!(vals[2], LuaValue::Integer(0xF0)));
    assert!(matches!(vals[3], LuaValue::Integer(-1)));
    assert!(matches!(vals[4], LuaValue::Integer(16)));
    assert!(matches!(vals[5], LuaValue::Integer(16)));
}

#[test]
fn test_shift_out_of_range_is_zero() {
    let vals = run("return 1 << 64, 1 << -64, 8 >> 100");
    assert!(matches!(vals[0], LuaValue::Integer(0)));
    assert!(matches!(vals[1], LuaValue::Integer(0)));
    assert!(matches!(vals[2], LuaValue::Integer(0)));
}

#[test]
fn test_bitwise_requires_integer_representation() {
    let msg = run_err("return 1.5 & 2");
    assert!(msg.contains("no integer representation"), "got: {}", msg);
}

#[test]
fn test_comparisons_across_subtypes() {
    let v = first("return 1 < 1.5 and 2.0 <= 2 and 3 > 2.9 and 1 == 1.0");
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_nan_comparisons() {
    let vals = run("local nan = 0/0 return nan == nan, nan ~= nan, nan < nan");
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert_eq!(vals[1], LuaValue::Boolean(true));
    assert_eq!(vals[2], LuaValue::Boolean(false));
}

#[test]
fn test_string_comparison_is_bytewise() {
    let v = first(r#"return "abc" < "abd" and "a" < "ab" and not ("b" < "a")"#);
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_comparing_mixed_types_errors() {
    let msg = run_err(r#"return 1 < "2""#);
    assert!(msg.contains("attempt to compare"), "got: {}", msg);
}

#[test]
fn test_concat() {
    let vals = run(r#"return "a" .. "b" .. "c", 1 .. 2, "x=" .. 1.5"#);
    assert_eq!(vals[0], LuaValue::string("abc"));
    assert_eq!(vals[1], LuaValue::string("12"));
    assert_eq!(vals[2], LuaValue::string("x=1.5"));
}

#[test]
fn test_concat_non_string_errors() {
    let msg = run_err(r#"return "x" .. {}"#);
    assert!(msg.contains("attempt to concatenate"), "got: {}", msg);
}

#[test]
fn test_short_circuit_and_or() {
    let vals = run(
        r#"
        local called = false
        local function boom() called = true; return true end
        local a = false and boom()
        local b = true or boom()
        return a, b, called, nil or "default", false or nil
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert_eq!(vals[1], LuaValue::Boolean(true));
    assert_eq!(vals[2], LuaValue::Boolean(false));
    assert_eq!(vals[3], LuaValue::string("default"));
    assert!(vals[4].is_nil());
}

#[test]
fn test_unary_operators() {
    let vals = run(r#"return -5, not nil, #"hello", #({1,2,3}), ~0xFF"#);
    assert!(matches!(vals[0], LuaValue::Integer(-5)));
    assert_eq!(vals[1], LuaValue::Boolean(true));
    assert!(matches!(vals[2], LuaValue::Integer(5)));
    assert!(matches!(vals[3], LuaValue::Integer(3)));
    assert!(matches!(vals[4], LuaValue::Integer(-256)));
}

#[test]
fn test_precedence() {
    let vals = run("return 1 + 2 * 3, (1 + 2) * 3, -2 ^ 2, 2 ^ 3 ^ 2");
    assert!(matches!(vals[0], LuaValue::Integer(7)));
    assert!(matches!(vals[1], LuaValue::Integer(9)));
    assert!(matches!(vals[2], LuaValue::Float(f) if f == -4.0));
    assert!(matches!(vals[3], LuaValue::Float(f) if f == 512.0));
}

#[test]
fn test_arith_on_nil_errors_with_hint() {
    let msg = run_err("local x\nreturn x + 1");
    assert!(
        msg.contains("attempt to perform arithmetic on a nil value"),
        "got: {}",
        msg
    );
    assert!(msg.contains("local 'x'"), "got: {}", msg);
}
