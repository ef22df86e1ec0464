// Calls, returns, varargs, tail calls.

use super::{first, run, run_err};
use crate::lua_value::LuaValue;

#[test]
fn test_multiple_returns_and_adjustment() {
    let vals = run(
        r#"
        local function three() return 1, 2, 3 end
        local a, b = three()
        local c, d, e, f = three()
        return a, b, c, d, e, f
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(1)));
    assert!(matches!(vals[1], LuaValue::Integer(2)));
    assert!(matches!(vals[2], LuaValue::Integer(1)));
    assert!(matches!(vals[3], LuaValue::Integer(2)));
    assert!(matches!(vals[4], LuaValue::Integer(3)));
    assert!(vals[5].is_nil());
}

#[test]
fn test_call_in_middle_truncates() {
    let vals = run(
        r#"
        local function two() return 1, 2 end
        return two(), 9
    "#,
    );
    assert_eq!(vals.len(), 2);
    assert!(matches!(vals[0], LuaValue::Integer(1)));
    assert!(matches!(vals[1], LuaValue::Integer(9)));
}

#[test]
fn test_call_in_tail_spreads() {
    let vals = run(
        r#"
        local function two() return 1, 2 end
        return 9, two()
    "#,
    );
    assert_eq!(vals.len(), 3);
}

#[test]
fn test_varargs() {
    let vals = run(
        r#"
        local function count(...) return select('#', ...) end
        local function second(...) return (select(2, ...)) end
        local function all(...) return ... end
        return count(), count(1, nil, 3), second("a", "b", "c"), all(7, 8)
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(0)));
    assert!(matches!(vals[1], LuaValue::Integer(3)));
    assert_eq!(vals[2], LuaValue::string("b"));
    assert!(matches!(vals[3], LuaValue::Integer(7)));
    assert!(matches!(vals[4], LuaValue::Integer(8)));
}

#[test]
fn test_vararg_in_table_constructor() {
    let v = first(
        r#"
        local function pack3(...) return {...} end
        return #pack3("a", "b", "c")
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(3)));
}

#[test]
fn test_vararg_outside_vararg_function() {
    let msg = run_err("local function f() return ... end return f()");
    assert!(msg.contains("outside a vararg function"), "got: {}", msg);
}

#[test]
fn test_tail_call_depth() {
    // a non-tail recursion this deep would overflow the frame limit
    let v = first(
        r#"
        local function loop(n)
            if n == 0 then return "done" end
            return loop(n - 1)
        end
        return loop(100000)
    "#,
    );
    assert_eq!(v, LuaValue::string("done"));
}

#[test]
fn test_deep_recursion_overflows() {
    let msg = run_err(
        r#"
        local function f(n) return 1 + f(n + 1) end
        return f(1)
    "#,
    );
    assert!(msg.contains("stack overflow"), "got: {}", msg);
}

#[test]
fn test_method_calls() {
    let v = first(
        r#"
        local obj = { n = 10 }
        function obj:double() return self.n * 2 end
        return obj:double()
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(20)));
}

#[test]
fn test_string_method_sugar() {
    let v = first(r#"return ("hello"):upper()"#);
    assert_eq!(v, LuaValue::string("HELLO"));
}

#[test]
fn test_call_nil_with_global_hint() {
    let msg = run_err("return no_such_function()");
    assert!(
        msg.contains("attempt to call a nil value"),
        "got: {}",
        msg
    );
    assert!(msg.contains("global 'no_such_function'"), "got: {}", msg);
}

#[test]
fn test_call_string_argument_sugar() {
    let v = first(
        r#"
        local function id(x) return x end
        return id"literal"
    "#,
    );
    assert_eq!(v, LuaValue::string("literal"));
}

#[test]
fn test_recursive_local_function() {
    let v = first(
        r#"
        local function fib(n)
            if n < 2 then return n end
            return fib(n - 1) + fib(n - 2)
        end
        return fib(12)
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(144)));
}
