// string.dump / load round trips within this implementation.

use super::{first, run};
use crate::lua_value::LuaValue;

#[test]
fn test_dump_load_round_trip() {
    let vals = run(
        r#"
        local function adder(a, b) return a + b end
        local dumped = string.dump(adder)
        local reloaded = load(dumped)
        return reloaded(2, 3), dumped:byte(1)
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(5)));
    // the chunk starts with the ESC "Lua" signature
    assert!(matches!(vals[1], LuaValue::Integer(27)));
}

#[test]
fn test_dump_preserves_observable_behavior() {
    let v = first(
        r#"
        local function program(x)
            local acc = 0
            for i = 1, x do
                if i % 2 == 0 then acc = acc + i end
            end
            return "sum=" .. acc
        end
        local reloaded = load(string.dump(program))
        return (program(10) == reloaded(10)) and reloaded(10)
    "#,
    );
    assert_eq!(v, LuaValue::string("sum=30"));
}

#[test]
fn test_dump_loses_upvalue_values() {
    // descriptors survive, values reload as nil
    let vals = run(
        r#"
        local captured = 42
        local function get() return captured end
        local reloaded = load(string.dump(get))
        local name = debug.getupvalue(reloaded, 1)
        return get(), reloaded(), name
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(42)));
    assert!(vals[1].is_nil());
    assert_eq!(vals[2], LuaValue::string("captured"));
}

#[test]
fn test_dump_nested_functions() {
    let v = first(
        r#"
        local function outer()
            local function inner(n) return n * 2 end
            return inner(21)
        end
        return load(string.dump(outer))()
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(42)));
}

#[test]
fn test_binary_chunk_accepted_by_mode_b() {
    let vals = run(
        r#"
        local dumped = string.dump(function() return "bin ok" end)
        local f = load(dumped, "chunk", "b")
        return f()
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("bin ok"));
}

#[test]
fn test_text_chunk_rejected_by_mode_b() {
    let vals = run(
        r#"
        local f, err = load("return 1", "chunk", "b")
        return f, err
    "#,
    );
    assert!(vals[0].is_nil());
    assert!(
        vals[1].to_string().contains("attempt to load a text chunk"),
        "got: {}",
        vals[1]
    );
}

#[test]
fn test_corrupted_chunk_rejected() {
    let vals = run(
        r#"
        local dumped = string.dump(function() end)
        local broken = "\27Lua" .. "garbage"
        local f, err = load(broken, "chunk", "b")
        return f, err ~= nil, #dumped > 5
    "#,
    );
    assert!(vals[0].is_nil());
    assert_eq!(vals[1], LuaValue::Boolean(true));
    assert_eq!(vals[2], LuaValue::Boolean(true));
}
