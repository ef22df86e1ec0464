// Lexer-level behavior, observed through full chunks.

use super::{first, run, run_err};
use crate::lua_value::LuaValue;

#[test]
fn test_numeric_literal_shapes() {
    let vals = run("return 10, 3.5, 0xFF, 0x1p4, 1e2, .5");
    assert!(matches!(vals[0], LuaValue::Integer(10)));
    assert!(matches!(vals[1], LuaValue::Float(f) if f == 3.5));
    assert!(matches!(vals[2], LuaValue::Integer(255)));
    assert!(matches!(vals[3], LuaValue::Float(f) if f == 16.0));
    assert!(matches!(vals[4], LuaValue::Float(f) if f == 100.0));
    assert!(matches!(vals[5], LuaValue::Float(f) if f == 0.5));
}

#[test]
fn test_integer_overflow_becomes_float() {
    let v = first("return 99999999999999999999");
    assert!(matches!(v, LuaValue::Float(_)));
}

#[test]
fn test_hex_literal_wraps_to_low_bits() {
    // more than 16 hex digits: only the low 64 bits survive
    let v = first("return 0x10000000000000000");
    assert!(matches!(v, LuaValue::Integer(0)));
    let v = first("return 0xFFFFFFFFFFFFFFFF");
    assert!(matches!(v, LuaValue::Integer(-1)));
}

#[test]
fn test_string_escapes() {
    let vals = run(r#"return "a\tb", "\65\66\67", "\x41", "\u{48}\u{49}""#);
    assert_eq!(vals[0], LuaValue::string("a\tb"));
    assert_eq!(vals[1], LuaValue::string("ABC"));
    assert_eq!(vals[2], LuaValue::string("A"));
    assert_eq!(vals[3], LuaValue::string("HI"));
}

#[test]
fn test_decimal_escape_too_large() {
    let msg = run_err(r#"return "\256""#);
    assert!(msg.contains("decimal escape too large"), "got: {}", msg);
}

#[test]
fn test_z_escape_skips_whitespace() {
    let v = first("return \"a\\z  \n   b\"");
    assert_eq!(v, LuaValue::string("ab"));
}

#[test]
fn test_long_strings() {
    let v = first("return [[hello\nworld]]");
    assert_eq!(v, LuaValue::string("hello\nworld"));
    // leading newline after the opener is skipped
    let v = first("return [==[\nline]==]");
    assert_eq!(v, LuaValue::string("line"));
    let v = first("return [=[contains ]] inside]=]");
    assert_eq!(v, LuaValue::string("contains ]] inside"));
}

#[test]
fn test_long_comments() {
    let v = first("--[[ a comment\nwith lines ]] return 1");
    assert!(matches!(v, LuaValue::Integer(1)));
}

#[test]
fn test_malformed_number() {
    let msg = run_err("return 3..2");
    assert!(msg.contains("malformed number"), "got: {}", msg);
}

#[test]
fn test_shebang_skipped() {
    let v = first("#!/usr/bin/env lua\nreturn 7");
    assert!(matches!(v, LuaValue::Integer(7)));
}

#[test]
fn test_error_position_reports_line() {
    let msg = run_err("local a = 1\nlocal b = ((\nreturn a");
    assert!(msg.contains(":3:") || msg.contains(":2:"), "got: {}", msg);
}
