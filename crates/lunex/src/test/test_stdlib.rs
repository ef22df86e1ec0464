// Library surface: table, math, select, load, require plumbing.

use super::{first, run, run_err};
use crate::lua_value::LuaValue;

#[test]
fn test_table_insert_remove() {
    let vals = run(
        r#"
        local t = {1, 2, 3}
        table.insert(t, 4)
        table.insert(t, 1, 0)
        local popped = table.remove(t)
        local shifted = table.remove(t, 1)
        return #t, popped, shifted, t[1]
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(3)));
    assert!(matches!(vals[1], LuaValue::Integer(4)));
    assert!(matches!(vals[2], LuaValue::Integer(0)));
    assert!(matches!(vals[3], LuaValue::Integer(1)));
}

#[test]
fn test_table_concat() {
    let vals = run(
        r#"
        local t = {"a", "b", "c"}
        return table.concat(t), table.concat(t, ","), table.concat(t, "-", 2, 3)
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("abc"));
    assert_eq!(vals[1], LuaValue::string("a,b,c"));
    assert_eq!(vals[2], LuaValue::string("b-c"));
}

#[test]
fn test_table_unpack_pack() {
    let vals = run(
        r#"
        local a, b, c = table.unpack({10, 20, 30})
        local packed = table.pack(1, nil, 3)
        return a, b, c, packed.n
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(10)));
    assert!(matches!(vals[1], LuaValue::Integer(20)));
    assert!(matches!(vals[2], LuaValue::Integer(30)));
    assert!(matches!(vals[3], LuaValue::Integer(3)));
}

#[test]
fn test_table_sort() {
    let vals = run(
        r#"
        local t = {5, 2, 8, 1, 9}
        table.sort(t)
        local asc = table.concat(t, ",")
        table.sort(t, function(a, b) return a > b end)
        local desc = table.concat(t, ",")
        return asc, desc
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("1,2,5,8,9"));
    assert_eq!(vals[1], LuaValue::string("9,8,5,2,1"));
}

#[test]
fn test_table_move() {
    let v = first(
        r#"
        local t = {1, 2, 3, 4, 5}
        table.move(t, 1, 3, 3)
        return table.concat(t, ",")
    "#,
    );
    assert_eq!(v, LuaValue::string("1,2,1,2,3"));
}

#[test]
fn test_math_surface() {
    let vals = run(
        r#"
        return math.floor(3.7), math.ceil(3.2), math.abs(-5),
               math.max(1, 9, 4), math.min(1, 9, 4), math.fmod(7, 3),
               math.type(1), math.type(1.0), math.type("x")
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(3)));
    assert!(matches!(vals[1], LuaValue::Integer(4)));
    assert!(matches!(vals[2], LuaValue::Integer(5)));
    assert!(matches!(vals[3], LuaValue::Integer(9)));
    assert!(matches!(vals[4], LuaValue::Integer(1)));
    assert!(matches!(vals[5], LuaValue::Integer(1)));
    assert_eq!(vals[6], LuaValue::string("integer"));
    assert_eq!(vals[7], LuaValue::string("float"));
    assert!(vals[8].is_nil());
}

#[test]
fn test_math_tointeger_and_ult() {
    let vals = run(
        r#"
        return math.tointeger(3.0), math.tointeger(3.5), math.ult(1, -1), math.ult(-1, 1)
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(3)));
    assert!(vals[1].is_nil());
    assert_eq!(vals[2], LuaValue::Boolean(true));
    assert_eq!(vals[3], LuaValue::Boolean(false));
}

#[test]
fn test_math_random_range() {
    let v = first(
        r#"
        math.randomseed(42)
        for _ = 1, 50 do
            local r = math.random(1, 6)
            if r < 1 or r > 6 then return false end
        end
        return true
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_select_forms() {
    let vals = run(
        r#"
        return select('#', 'a', 'b', 'c'), select(2, 'a', 'b', 'c'), select(-1, 'a', 'b', 'c')
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(3)));
    assert_eq!(vals[1], LuaValue::string("b"));
    assert_eq!(vals[2], LuaValue::string("c"));
    assert_eq!(vals[3], LuaValue::string("c"));
}

#[test]
fn test_load_text_chunk() {
    let vals = run(
        r#"
        local f = load("return 1 + 1")
        local bad, msg = load("syntax ((")
        return f(), bad, msg ~= nil
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(2)));
    assert!(vals[1].is_nil());
    assert_eq!(vals[2], LuaValue::Boolean(true));
}

#[test]
fn test_load_with_env() {
    let v = first(
        r#"
        local env = {value = 10}
        local f = load("return value", "chunk", "t", env)
        return f()
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(10)));
}

#[test]
fn test_load_reader_function() {
    let v = first(
        r#"
        local parts = {"return ", "40", " + 2"}
        local i = 0
        local f = load(function()
            i = i + 1
            return parts[i]
        end)
        return f()
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(42)));
}

#[test]
fn test_load_reader_bad_return() {
    let vals = run(
        r#"
        local ok, err = pcall(load, function() return 7 end)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(
        vals[1].to_string().contains("reader function must return a string"),
        "got: {}",
        vals[1]
    );
}

#[test]
fn test_load_mode_rejects_binary_as_text() {
    let vals = run(
        r#"
        local dumped = string.dump(function() return 1 end)
        local f, err = load(dumped, "bin", "t")
        return f, err
    "#,
    );
    assert!(vals[0].is_nil());
    assert!(
        vals[1].to_string().contains("attempt to load a binary chunk"),
        "got: {}",
        vals[1]
    );
}

#[test]
fn test_rawops() {
    let vals = run(
        r#"
        local t = setmetatable({}, {__index = function() return "meta" end,
                                    __newindex = function() error("trap") end,
                                    __len = function() return 99 end})
        rawset(t, "k", 1)
        return rawget(t, "k"), t.missing, rawlen({1, 2}), rawequal(t, t), rawlen("abc")
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(1)));
    assert_eq!(vals[1], LuaValue::string("meta"));
    assert!(matches!(vals[2], LuaValue::Integer(2)));
    assert_eq!(vals[3], LuaValue::Boolean(true));
    assert!(matches!(vals[4], LuaValue::Integer(3)));
}

#[test]
fn test_collectgarbage_protocol() {
    let vals = run(
        r#"
        return collectgarbage("collect"), collectgarbage("count") >= 0, collectgarbage("isrunning")
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(0)));
    assert_eq!(vals[1], LuaValue::Boolean(true));
    assert_eq!(vals[2], LuaValue::Boolean(true));
}

#[test]
fn test_package_config_shape() {
    let v = first("return package.config");
    assert_eq!(v, LuaValue::string("/\n;\n?\n!\n-\n"));
}

#[test]
fn test_require_uses_preload() {
    let vals = run(
        r#"
        package.preload.mymod = function(name)
            return {name = name, value = 7}
        end
        local m = require("mymod")
        local again = require("mymod")
        return m.value, m.name, m == again
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(7)));
    assert_eq!(vals[1], LuaValue::string("mymod"));
    assert_eq!(vals[2], LuaValue::Boolean(true));
}

#[test]
fn test_require_missing_module() {
    let msg = run_err(r#"require("definitely_not_a_module_xyz")"#);
    assert!(msg.contains("not found"), "got: {}", msg);
}

#[test]
fn test_version_global() {
    let v = first("return _VERSION");
    assert_eq!(v, LuaValue::string("Lua 5.4"));
}

#[test]
fn test_g_table() {
    let v = first(
        r#"
        marker = "present"
        return _G.marker
    "#,
    );
    assert_eq!(v, LuaValue::string("present"));
}
