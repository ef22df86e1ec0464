// Closures and the upvalue model: capture, aliasing, close-on-exit.

use super::{first, run};
use crate::lua_value::LuaValue;

#[test]
fn test_counter_closure() {
    let vals = run(
        r#"
        local function make()
            local n = 0
            return function() n = n + 1 return n end
        end
        local c = make()
        return c(), c(), c()
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(1)));
    assert!(matches!(vals[1], LuaValue::Integer(2)));
    assert!(matches!(vals[2], LuaValue::Integer(3)));
}

#[test]
fn test_shared_upvalue_between_closures() {
    let vals = run(
        r#"
        local function make()
            local n = 0
            local function inc() n = n + 1 end
            local function get() return n end
            return inc, get
        end
        local inc, get = make()
        inc(); inc()
        return get()
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(2)));
}

#[test]
fn test_open_upvalue_aliases_register() {
    // while the frame is live, writes through the register are seen
    // through the closure and vice versa
    let v = first(
        r#"
        local x = 1
        local function get() return x end
        x = 2
        local seen = get()
        x = 3
        return seen + get()
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(5)));
}

#[test]
fn test_loop_variable_captured_per_iteration() {
    let vals = run(
        r#"
        local fns = {}
        for i = 1, 3 do
            fns[i] = function() return i end
        end
        return fns[1](), fns[2](), fns[3]()
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(1)));
    assert!(matches!(vals[1], LuaValue::Integer(2)));
    assert!(matches!(vals[2], LuaValue::Integer(3)));
}

#[test]
fn test_block_locals_close_per_iteration() {
    let vals = run(
        r#"
        local fns = {}
        local i = 1
        while i <= 3 do
            local v = i * 10
            fns[i] = function() return v end
            i = i + 1
        end
        return fns[1](), fns[3]()
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(10)));
    assert!(matches!(vals[1], LuaValue::Integer(30)));
}

#[test]
fn test_upvalue_of_upvalue() {
    let v = first(
        r#"
        local function outer()
            local n = 5
            return function()
                return function() return n end
            end
        end
        return outer()()()
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(5)));
}

#[test]
fn test_closure_survives_frame_exit() {
    let v = first(
        r#"
        local function make(v)
            return function() return v end
        end
        local a, b = make("a"), make("b")
        return a() .. b()
    "#,
    );
    assert_eq!(v, LuaValue::string("ab"));
}

#[test]
fn test_env_is_an_upvalue() {
    let v = first(
        r#"
        some_global = 11
        local function read() return some_global end
        return read()
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(11)));
}
