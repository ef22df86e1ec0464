// To-be-closed variables: ordered close on every way out of a scope,
// error chaining through __close, and suspension inside handlers.

use super::{first, run};
use crate::lua_value::LuaValue;

#[test]
fn test_close_on_normal_scope_exit() {
    let v = first(
        r#"
        local log = {}
        do
            local x <close> = setmetatable({}, {__close = function() log[#log + 1] = "x" end})
            local y <close> = setmetatable({}, {__close = function() log[#log + 1] = "y" end})
        end
        return table.concat(log, ",")
    "#,
    );
    // LIFO: y closes before x
    assert_eq!(v, LuaValue::string("y,x"));
}

#[test]
fn test_close_on_return() {
    let v = first(
        r#"
        local closed = false
        local function f()
            local x <close> = setmetatable({}, {__close = function() closed = true end})
            return "result"
        end
        local r = f()
        return closed and r
    "#,
    );
    assert_eq!(v, LuaValue::string("result"));
}

#[test]
fn test_close_on_break() {
    let v = first(
        r#"
        local count = 0
        for i = 1, 5 do
            local x <close> = setmetatable({}, {__close = function() count = count + 1 end})
            if i == 2 then break end
        end
        return count
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(2)));
}

#[test]
fn test_close_on_goto_out_of_scope() {
    let v = first(
        r#"
        local closed = false
        do
            local x <close> = setmetatable({}, {__close = function() closed = true end})
            goto out
        end
        ::out::
        return closed
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_close_receives_error_value() {
    // spec seed scenario: handler sees the in-flight error and replaces it
    let v = first(
        r#"
        local function foo()
            local x <close> = setmetatable({}, {__close = function(_, m)
                assert(m == 4)
                error("@z")
            end})
            error(4)
        end
        local ok, msg = pcall(foo)
        return string.find(msg, "@z") ~= nil
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_close_receives_nil_without_error() {
    let v = first(
        r#"
        local seen = "unset"
        do
            local x <close> = setmetatable({}, {__close = function(_, e) seen = e end})
        end
        return seen == nil
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_error_preserved_when_handler_does_not_raise() {
    let vals = run(
        r#"
        local function f()
            local x <close> = setmetatable({}, {__close = function() end})
            error("original")
        end
        local ok, err = pcall(f)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(vals[1].to_string().contains("original"));
}

#[test]
fn test_later_handlers_see_replacement_error() {
    let v = first(
        r#"
        local second_saw
        local function f()
            local outer <close> = setmetatable({}, {__close = function(_, e)
                second_saw = e
            end})
            local inner <close> = setmetatable({}, {__close = function()
                error("replaced")
            end})
            error("original")
        end
        pcall(f)
        return string.find(tostring(second_saw), "replaced") ~= nil
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_handler_receives_the_registered_value() {
    let v = first(
        r#"
        local which
        do
            local x <close> = setmetatable({tag = "first"}, {__close = function(self)
                which = self.tag
            end})
        end
        return which
    "#,
    );
    assert_eq!(v, LuaValue::string("first"));
}

#[test]
fn test_assignment_to_close_variable_rejected() {
    let msg = super::run_err(
        r#"
        local x <close> = nil
        x = 1
    "#,
    );
    assert!(msg.contains("const"), "got: {}", msg);
}

#[test]
fn test_non_closable_value_raises_at_close() {
    let vals = run(
        r#"
        local ok, err = pcall(function()
            local x <close> = 42
        end)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(
        vals[1].to_string().contains("non-closable value"),
        "got: {}",
        vals[1]
    );
}

#[test]
fn test_nil_and_false_are_silently_closable() {
    let v = first(
        r#"
        do
            local a <close> = nil
            local b <close> = false
        end
        return "ok"
    "#,
    );
    assert_eq!(v, LuaValue::string("ok"));
}

#[test]
fn test_generic_for_fourth_value_is_closed() {
    // spec seed scenario: the 4th value of the explist closes on loop exit
    let v = first(
        r#"
        local flag = false
        local x = setmetatable({}, {__close = function() flag = true end})
        for k in (function() return function() end, nil, nil, x end)() do end
        return flag
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_yield_inside_close_handler() {
    // suspension in the middle of a close chain resumes mid-chain
    let vals = run(
        r#"
        local order = {}
        local co = coroutine.create(function()
            do
                local a <close> = setmetatable({}, {__close = function()
                    order[#order + 1] = "a-start"
                    coroutine.yield("from-close")
                    order[#order + 1] = "a-end"
                end})
                order[#order + 1] = "body"
            end
            return "done"
        end)
        local ok1, v1 = coroutine.resume(co)
        local ok2, v2 = coroutine.resume(co)
        return ok1, v1, ok2, v2, table.concat(order, ",")
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::string("from-close"));
    assert_eq!(vals[2], LuaValue::Boolean(true));
    assert_eq!(vals[3], LuaValue::string("done"));
    assert_eq!(vals[4], LuaValue::string("body,a-start,a-end"));
}

#[test]
fn test_yield_inside_close_during_return() {
    let vals = run(
        r#"
        local co = coroutine.create(function()
            local a <close> = setmetatable({}, {__close = function()
                coroutine.yield("closing")
            end})
            return "value"
        end)
        local _, first_v = coroutine.resume(co)
        local _, second_v = coroutine.resume(co)
        return first_v, second_v, coroutine.status(co)
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("closing"));
    assert_eq!(vals[1], LuaValue::string("value"));
    assert_eq!(vals[2], LuaValue::string("dead"));
}

#[test]
fn test_coroutine_close_runs_pending_tbc() {
    let vals = run(
        r#"
        local closed = false
        local co = coroutine.create(function()
            local x <close> = setmetatable({}, {__close = function() closed = true end})
            coroutine.yield()
            return "never"
        end)
        coroutine.resume(co)
        local ok = coroutine.close(co)
        return ok, closed, coroutine.status(co)
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::Boolean(true));
    assert_eq!(vals[2], LuaValue::string("dead"));
}

#[test]
fn test_multiple_frames_close_outermost_last() {
    let v = first(
        r#"
        local log = {}
        local function tagged(t)
            return setmetatable({}, {__close = function() log[#log + 1] = t end})
        end
        local function inner()
            local b <close> = tagged("inner")
            error("boom")
        end
        local function outer()
            local a <close> = tagged("outer")
            inner()
        end
        pcall(outer)
        return table.concat(log, ",")
    "#,
    );
    assert_eq!(v, LuaValue::string("inner,outer"));
}
