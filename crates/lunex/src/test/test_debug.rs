// Debug library: getinfo, locals, upvalues, hooks.

use super::{first, run};
use crate::lua_value::LuaValue;

#[test]
fn test_getinfo_on_function() {
    let vals = run(
        r#"
        local function f(a, b) return a + b end
        local info = debug.getinfo(f)
        return info.what, info.nparams, info.isvararg, info.linedefined > 0
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("Lua"));
    assert!(matches!(vals[1], LuaValue::Integer(2)));
    assert_eq!(vals[2], LuaValue::Boolean(false));
    assert_eq!(vals[3], LuaValue::Boolean(true));
}

#[test]
fn test_getinfo_on_native() {
    let vals = run(
        r#"
        local info = debug.getinfo(print)
        return info.what, info.short_src
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("C"));
    assert_eq!(vals[1], LuaValue::string("[C]"));
}

#[test]
fn test_getinfo_level() {
    let vals = run(
        r#"
        local function inner()
            local info = debug.getinfo(1)
            return info.currentline, info.what
        end
        local line, what = inner()
        return line > 0, what
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::string("Lua"));
}

#[test]
fn test_getlocal_setlocal() {
    let vals = run(
        r#"
        local function probe()
            local alpha = 10
            local beta = 20
            local n1, v1 = debug.getlocal(1, 1)
            local n2, v2 = debug.getlocal(1, 2)
            debug.setlocal(1, 1, 99)
            return n1, v1, n2, v2, alpha
        end
        return probe()
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("alpha"));
    assert!(matches!(vals[1], LuaValue::Integer(10)));
    assert_eq!(vals[2], LuaValue::string("beta"));
    assert!(matches!(vals[3], LuaValue::Integer(20)));
    assert!(matches!(vals[4], LuaValue::Integer(99)));
}

#[test]
fn test_getupvalue_setupvalue() {
    let vals = run(
        r#"
        local captured = "before"
        local function reader() return captured end
        local name, value = debug.getupvalue(reader, 1)
        debug.setupvalue(reader, 1, "after")
        return name, value, reader(), captured
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("captured"));
    assert_eq!(vals[1], LuaValue::string("before"));
    assert_eq!(vals[2], LuaValue::string("after"));
    // the upvalue is open: writes are visible through the register too
    assert_eq!(vals[3], LuaValue::string("after"));
}

#[test]
fn test_call_and_return_hooks() {
    let vals = run(
        r#"
        local events = {}
        debug.sethook(function(e) events[#events + 1] = e end, "cr")
        local function noop() end
        noop()
        debug.sethook()
        local calls, returns = 0, 0
        for _, e in ipairs(events) do
            if e == "call" then calls = calls + 1 end
            if e == "return" then returns = returns + 1 end
        end
        return calls > 0, returns > 0
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::Boolean(true));
}

#[test]
fn test_line_hook_fires() {
    let v = first(
        r#"
        local lines = 0
        debug.sethook(function(e) lines = lines + 1 end, "l")
        local a = 1
        local b = 2
        local c = a + b
        debug.sethook()
        return lines > 0
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_count_hook_fires() {
    let v = first(
        r#"
        local ticks = 0
        debug.sethook(function() ticks = ticks + 1 end, "", 10)
        for _ = 1, 200 do end
        debug.sethook()
        return ticks > 0
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_gethook_reports_registration() {
    let vals = run(
        r#"
        local f = function() end
        debug.sethook(f, "cl", 5)
        local hf, mask, count = debug.gethook()
        debug.sethook()
        local cleared = debug.gethook()
        return hf == f, mask, count, cleared
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::string("cl"));
    assert!(matches!(vals[2], LuaValue::Integer(5)));
    assert!(vals[3].is_nil());
}

#[test]
fn test_hook_can_abort_execution() {
    let vals = run(
        r#"
        local ok, err = pcall(function()
            debug.sethook(function() error("aborted by hook") end, "", 20)
            for _ = 1, 1000 do end
        end)
        debug.sethook()
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(vals[1].to_string().contains("aborted by hook"), "got: {}", vals[1]);
}
