// Metamethod dispatch: index chains, arithmetic, comparison, call,
// tostring, len.

use super::{first, run, run_err};
use crate::lua_value::LuaValue;

#[test]
fn test_index_function_and_table() {
    // spec seed: __index as a function, synthesizing values
    let v = first(
        r#"
        local t = {}
        setmetatable(t, {__index = function(_, k) return "[" .. k .. "]" end})
        return t.foo .. t[1]
    "#,
    );
    assert_eq!(v, LuaValue::string("[foo][1]"));
}

#[test]
fn test_index_table_chain() {
    let v = first(
        r#"
        local base = { greet = "hi" }
        local mid = setmetatable({}, {__index = base})
        local leaf = setmetatable({}, {__index = mid})
        return leaf.greet
    "#,
    );
    assert_eq!(v, LuaValue::string("hi"));
}

#[test]
fn test_index_only_on_missing_keys() {
    let v = first(
        r#"
        local hits = 0
        local t = setmetatable({present = 1}, {__index = function() hits = hits + 1 return 0 end})
        local _ = t.present
        local _ = t.absent
        return hits
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(1)));
}

#[test]
fn test_newindex_function() {
    let vals = run(
        r#"
        local log = {}
        local t = setmetatable({}, {__newindex = function(t, k, v)
            log[#log + 1] = k
            rawset(t, k, v * 2)
        end})
        t.a = 5
        t.a = 7
        return t.a, #log
    "#,
    );
    // second write finds the raw key, so no metamethod
    assert!(matches!(vals[0], LuaValue::Integer(14)));
    assert!(matches!(vals[1], LuaValue::Integer(1)));
}

#[test]
fn test_newindex_table_redirect() {
    let vals = run(
        r#"
        local store = {}
        local t = setmetatable({}, {__newindex = store})
        t.x = 42
        return rawget(t, "x"), store.x
    "#,
    );
    assert!(vals[0].is_nil());
    assert!(matches!(vals[1], LuaValue::Integer(42)));
}

#[test]
fn test_arith_metamethods() {
    let vals = run(
        r#"
        local mt = {
            __add = function(a, b) return a.v + b.v end,
            __mul = function(a, b) return a.v * b.v end,
            __unm = function(a) return -a.v end,
        }
        local function box(v) return setmetatable({v = v}, mt) end
        return box(3) + box(4), box(3) * box(4), -box(9)
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(7)));
    assert!(matches!(vals[1], LuaValue::Integer(12)));
    assert!(matches!(vals[2], LuaValue::Integer(-9)));
}

#[test]
fn test_arith_meta_right_operand() {
    let v = first(
        r#"
        local mt = {__add = function(a, b) return "added" end}
        local boxed = setmetatable({}, mt)
        return 1 + boxed
    "#,
    );
    assert_eq!(v, LuaValue::string("added"));
}

#[test]
fn test_eq_metamethod() {
    let vals = run(
        r#"
        local mt = {__eq = function(a, b) return a.id == b.id end}
        local a = setmetatable({id = 1}, mt)
        local b = setmetatable({id = 1}, mt)
        local c = setmetatable({id = 2}, mt)
        return a == b, a == c, a ~= c
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::Boolean(false));
    assert_eq!(vals[2], LuaValue::Boolean(true));
}

#[test]
fn test_eq_not_tried_for_mixed_types() {
    let v = first(
        r#"
        local t = setmetatable({}, {__eq = function() return true end})
        return t == 1
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(false));
}

#[test]
fn test_lt_le_metamethods() {
    let vals = run(
        r#"
        local mt = {
            __lt = function(a, b) return a.v < b.v end,
            __le = function(a, b) return a.v <= b.v end,
        }
        local function box(v) return setmetatable({v = v}, mt) end
        return box(1) < box(2), box(2) <= box(2), box(3) > box(2)
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::Boolean(true));
    assert_eq!(vals[2], LuaValue::Boolean(true));
}

#[test]
fn test_call_metamethod() {
    let v = first(
        r#"
        local callable = setmetatable({}, {__call = function(self, a, b) return a + b end})
        return callable(2, 3)
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(5)));
}

#[test]
fn test_tostring_metamethod() {
    let v = first(
        r#"
        local t = setmetatable({}, {__tostring = function() return "custom" end})
        return tostring(t)
    "#,
    );
    assert_eq!(v, LuaValue::string("custom"));
}

#[test]
fn test_name_metafield() {
    let v = first(
        r#"
        local t = setmetatable({}, {__name = "Widget"})
        return tostring(t):sub(1, 7)
    "#,
    );
    assert_eq!(v, LuaValue::string("Widget:"));
}

#[test]
fn test_len_metamethod() {
    let v = first(
        r#"
        local t = setmetatable({}, {__len = function() return 99 end})
        return #t
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(99)));
}

#[test]
fn test_concat_metamethod() {
    let v = first(
        r#"
        local mt = {__concat = function(a, b)
            local av = type(a) == "table" and a.v or a
            local bv = type(b) == "table" and b.v or b
            return av .. "|" .. bv
        end}
        local boxed = setmetatable({v = "B"}, mt)
        return "A" .. boxed
    "#,
    );
    assert_eq!(v, LuaValue::string("A|B"));
}

#[test]
fn test_metatable_protection() {
    let msg = run_err(
        r#"
        local t = setmetatable({}, {__metatable = "locked"})
        setmetatable(t, {})
    "#,
    );
    assert!(msg.contains("protected metatable"), "got: {}", msg);
    let v = first(
        r#"
        local t = setmetatable({}, {__metatable = "locked"})
        return getmetatable(t)
    "#,
    );
    assert_eq!(v, LuaValue::string("locked"));
}

#[test]
fn test_pairs_metamethod() {
    let v = first(
        r#"
        local t = setmetatable({}, {__pairs = function(self)
            local n = 0
            return function()
                n = n + 1
                if n <= 3 then return n, n * 100 end
            end, self, nil
        end})
        local sum = 0
        for _, v in pairs(t) do sum = sum + v end
        return sum
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(600)));
}

#[test]
fn test_index_metamethod_can_yield() {
    // metamethods run as frames, so a coroutine can suspend inside one
    let vals = run(
        r#"
        local t = setmetatable({}, {__index = function(_, k)
            coroutine.yield("looking up " .. k)
            return k .. "!"
        end})
        local co = coroutine.create(function() return t.abc end)
        local ok1, msg = coroutine.resume(co)
        local ok2, result = coroutine.resume(co)
        return ok1, msg, ok2, result
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(true));
    assert_eq!(vals[1], LuaValue::string("looking up abc"));
    assert_eq!(vals[2], LuaValue::Boolean(true));
    assert_eq!(vals[3], LuaValue::string("abc!"));
}
