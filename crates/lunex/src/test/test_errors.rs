// The error pipeline: pcall/xpcall, error values, levels, name hints,
// tracebacks.

use super::{first, run, run_err};
use crate::lua_value::LuaValue;

#[test]
fn test_pcall_success() {
    let vals = run("return pcall(function() return 1, 2 end)");
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert!(matches!(vals[1], LuaValue::Integer(1)));
    assert!(matches!(vals[2], LuaValue::Integer(2)));
}

#[test]
fn test_pcall_preserves_error_value_identity() {
    // a table error value comes back reference-identical
    let v = first(
        r#"
        local marker = {code = 42}
        local ok, err = pcall(function() error(marker) end)
        return not ok and err == marker and err.code
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(42)));
}

#[test]
fn test_error_nil_value() {
    let vals = run(
        r#"
        local ok, err = pcall(function() error() end)
        return ok, err == nil
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert_eq!(vals[1], LuaValue::Boolean(true));
}

#[test]
fn test_error_level_zero_no_prefix() {
    // spec seed: error("boom", 0) comes back exactly as "boom"
    let v = first(
        r#"
        local ok, err = pcall(function() error("boom", 0) end)
        return err
    "#,
    );
    assert_eq!(v, LuaValue::string("boom"));
}

#[test]
fn test_error_level_one_prefixes_position() {
    let v = first(
        r#"
        local ok, err = pcall(function() error("boom") end)
        return err
    "#,
    );
    let msg = v.to_string();
    assert!(msg.ends_with("boom"), "got: {}", msg);
    assert!(msg.contains(":"), "got: {}", msg);
    assert_ne!(msg, "boom");
}

#[test]
fn test_error_number_value_untouched() {
    let v = first(
        r#"
        local ok, err = pcall(function() error(4) end)
        return err
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(4)));
}

#[test]
fn test_index_nil_local_hint() {
    // spec seed scenario 6: exact message shape
    let vals = run(
        r#"
        local ok, err = pcall(function() local x = nil; return x.y end)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    let msg = vals[1].to_string();
    assert!(
        msg.contains("attempt to index a nil value (local 'x')"),
        "got: {}",
        msg
    );
    assert!(msg.contains(":"), "got: {}", msg);
}

#[test]
fn test_assert_message_and_value() {
    let msg = run_err("assert(false)");
    assert!(msg.contains("assertion failed!"), "got: {}", msg);
    let v = first(
        r#"
        local ok, err = pcall(function() assert(nil, {custom = true}) end)
        return err.custom
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_assert_passes_values_through() {
    let vals = run("return assert(1, 2, 3)");
    assert!(matches!(vals[0], LuaValue::Integer(1)));
    assert!(matches!(vals[1], LuaValue::Integer(2)));
    assert!(matches!(vals[2], LuaValue::Integer(3)));
}

#[test]
fn test_xpcall_handler_transforms() {
    let vals = run(
        r#"
        local ok, err = xpcall(function() error("raw") end, function(e)
            return "handled: " .. e
        end)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(vals[1].to_string().starts_with("handled: "));
}

#[test]
fn test_xpcall_handler_error() {
    let vals = run(
        r#"
        local ok, err = xpcall(function() error("x") end, function() error("handler boom") end)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert_eq!(vals[1], LuaValue::string("error in error handling"));
}

#[test]
fn test_xpcall_passes_arguments() {
    let vals = run(
        r#"
        local ok, sum = xpcall(function(a, b) return a + b end, print, 3, 4)
        return ok, sum
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert!(matches!(vals[1], LuaValue::Integer(7)));
}

#[test]
fn test_nested_pcall() {
    let vals = run(
        r#"
        local ok_outer, ok_inner, err = pcall(function()
            return pcall(function() error("deep") end)
        end)
        return ok_outer, ok_inner, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::Boolean(false));
    assert!(vals[2].to_string().contains("deep"));
}

#[test]
fn test_pcall_of_pcall_directly() {
    let vals = run(
        r#"
        return pcall(pcall, function() error("nested") end)
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::Boolean(false));
    assert!(vals[2].to_string().contains("nested"));
}

#[test]
fn test_bad_argument_message() {
    let vals = run(
        r#"
        local ok, err = pcall(string.rep)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    let msg = vals[1].to_string();
    assert!(msg.contains("bad argument #1 to 'rep'"), "got: {}", msg);
    assert!(msg.contains("no value"), "got: {}", msg);
}

#[test]
fn test_traceback_contains_stack() {
    let v = first(
        r#"
        local function level3() return debug.traceback("the message") end
        local function level2() return level3() end
        local function level1() return level2() end
        return level1()
    "#,
    );
    let text = v.to_string();
    assert!(text.starts_with("the message\nstack traceback:"), "got: {}", text);
    assert!(text.contains("\t"), "got: {}", text);
    assert!(text.contains("in function"), "got: {}", text);
}

#[test]
fn test_traceback_non_string_message_passthrough() {
    let v = first(
        r#"
        local t = {}
        return debug.traceback(t) == t
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_uncaught_error_renders_traceback() {
    let mut vm = crate::lua_vm::LuaVM::new();
    vm.open_libs();
    let err = vm
        .execute("local function f() error(\"fatal\") end\nf()")
        .unwrap_err();
    let rendered = vm.render_error(&err);
    assert!(rendered.contains("fatal"), "got: {}", rendered);
    assert!(rendered.contains("stack traceback:"), "got: {}", rendered);
    assert!(rendered.contains("[C]: in ?"), "got: {}", rendered);
}

#[test]
fn test_error_in_error_value_projection() {
    let mut vm = crate::lua_vm::LuaVM::new();
    vm.open_libs();
    let err = vm.execute("error({})").unwrap_err();
    let rendered = err.to_string();
    assert!(
        rendered.contains("error object is a table value"),
        "got: {}",
        rendered
    );
}
