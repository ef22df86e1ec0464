// Coroutine scheduling: create/resume/yield/status/wrap, transfer
// values, error propagation.

use super::{first, run};
use crate::lua_value::LuaValue;

#[test]
fn test_yield_then_return() {
    // spec seed scenario
    let vals = run(
        r#"
        local co = coroutine.create(function() coroutine.yield(10); return 20 end)
        local _, a = coroutine.resume(co)
        local _, b = coroutine.resume(co)
        return a, b, coroutine.status(co)
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(10)));
    assert!(matches!(vals[1], LuaValue::Integer(20)));
    assert_eq!(vals[2], LuaValue::string("dead"));
}

#[test]
fn test_resume_passes_arguments() {
    let vals = run(
        r#"
        local co = coroutine.create(function(a, b)
            local c = coroutine.yield(a + b)
            return c * 2
        end)
        local _, sum = coroutine.resume(co, 3, 4)
        local _, doubled = coroutine.resume(co, 10)
        return sum, doubled
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(7)));
    assert!(matches!(vals[1], LuaValue::Integer(20)));
}

#[test]
fn test_yield_multiple_values() {
    let vals = run(
        r#"
        local co = coroutine.create(function() coroutine.yield(1, 2, 3) end)
        local ok, a, b, c = coroutine.resume(co)
        return ok, a, b, c
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert!(matches!(vals[1], LuaValue::Integer(1)));
    assert!(matches!(vals[2], LuaValue::Integer(2)));
    assert!(matches!(vals[3], LuaValue::Integer(3)));
}

#[test]
fn test_status_transitions() {
    let vals = run(
        r#"
        local co
        co = coroutine.create(function()
            return coroutine.status(co)
        end)
        local before = coroutine.status(co)
        local _, inside = coroutine.resume(co)
        local after = coroutine.status(co)
        return before, inside, after
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("suspended"));
    assert_eq!(vals[1], LuaValue::string("running"));
    assert_eq!(vals[2], LuaValue::string("dead"));
}

#[test]
fn test_normal_status_of_parent() {
    let vals = run(
        r#"
        local outer
        local inner = coroutine.create(function()
            return coroutine.status(outer)
        end)
        outer = coroutine.create(function()
            local _, status = coroutine.resume(inner)
            return status
        end)
        local _, status = coroutine.resume(outer)
        return status
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("normal"));
}

#[test]
fn test_resume_dead_coroutine() {
    let vals = run(
        r#"
        local co = coroutine.create(function() end)
        coroutine.resume(co)
        local ok, err = coroutine.resume(co)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert_eq!(vals[1], LuaValue::string("cannot resume dead coroutine"));
}

#[test]
fn test_resume_running_coroutine() {
    let vals = run(
        r#"
        local co
        co = coroutine.create(function()
            return coroutine.resume(co)
        end)
        local _, ok, err = coroutine.resume(co)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert_eq!(
        vals[1],
        LuaValue::string("cannot resume non-suspended coroutine")
    );
}

#[test]
fn test_yield_from_main_errors() {
    let vals = run(
        r#"
        local ok, err = pcall(coroutine.yield, 1)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    let msg = vals[1].to_string();
    assert!(msg.contains("outside a coroutine"), "got: {}", msg);
}

#[test]
fn test_error_inside_coroutine() {
    let vals = run(
        r#"
        local co = coroutine.create(function() error("inner failure") end)
        local ok, err = coroutine.resume(co)
        return ok, err, coroutine.status(co)
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(vals[1].to_string().contains("inner failure"));
    assert_eq!(vals[2], LuaValue::string("dead"));
}

#[test]
fn test_wrap() {
    let vals = run(
        r#"
        local f = coroutine.wrap(function()
            coroutine.yield(1)
            coroutine.yield(2)
            return 3
        end)
        return f(), f(), f()
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(1)));
    assert!(matches!(vals[1], LuaValue::Integer(2)));
    assert!(matches!(vals[2], LuaValue::Integer(3)));
}

#[test]
fn test_wrap_rethrows_errors() {
    let vals = run(
        r#"
        local f = coroutine.wrap(function() error("wrapped") end)
        local ok, err = pcall(f)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(vals[1].to_string().contains("wrapped"));
}

#[test]
fn test_pcall_inside_coroutine_can_yield() {
    // the pcall boundary is a frame, not a host-stack boundary
    let vals = run(
        r#"
        local co = coroutine.create(function()
            local ok, v = pcall(function()
                local got = coroutine.yield("suspended inside pcall")
                return got .. "!"
            end)
            return ok, v
        end)
        local _, msg = coroutine.resume(co)
        local _, ok, v = coroutine.resume(co, "resumed")
        return msg, ok, v
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("suspended inside pcall"));
    assert_eq!(vals[1], LuaValue::Boolean(true));
    assert_eq!(vals[2], LuaValue::string("resumed!"));
}

#[test]
fn test_isyieldable() {
    let vals = run(
        r#"
        local main = coroutine.isyieldable()
        local co = coroutine.create(function() return coroutine.isyieldable() end)
        local _, inside = coroutine.resume(co)
        return main, inside
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert_eq!(vals[1], LuaValue::Boolean(true));
}

#[test]
fn test_running() {
    let vals = run(
        r#"
        local main, is_main = coroutine.running()
        local co = coroutine.create(function()
            local this, m = coroutine.running()
            return m
        end)
        local _, inner_is_main = coroutine.resume(co)
        return is_main, inner_is_main, type(main)
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::Boolean(false));
    assert_eq!(vals[2], LuaValue::string("thread"));
}

#[test]
fn test_yield_across_sync_boundary_fails() {
    // table.sort comparators run on the host stack; yielding there is a
    // C-boundary violation
    let vals = run(
        r#"
        local co = coroutine.create(function()
            table.sort({2, 1}, function(a, b)
                coroutine.yield()
                return a < b
            end)
        end)
        local ok, err = coroutine.resume(co)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(
        vals[1].to_string().contains("C-call boundary"),
        "got: {}",
        vals[1]
    );
}

#[test]
fn test_generic_for_over_wrap() {
    let v = first(
        r#"
        local function range(n)
            return coroutine.wrap(function()
                for i = 1, n do coroutine.yield(i) end
            end)
        end
        local sum = 0
        for i in range(5) do sum = sum + i end
        return sum
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(15)));
}
