// Parser and code-generator level behavior.

use super::{first, run, run_err};
use crate::lua_value::LuaValue;

#[test]
fn test_if_elseif_else() {
    let v = first(
        r#"
        local function grade(n)
            if n >= 90 then return "A"
            elseif n >= 80 then return "B"
            else return "C" end
        end
        return grade(95) .. grade(85) .. grade(10)
    "#,
    );
    assert_eq!(v, LuaValue::string("ABC"));
}

#[test]
fn test_while_and_repeat() {
    let vals = run(
        r#"
        local i, total = 1, 0
        while i <= 5 do total = total + i; i = i + 1 end
        local j = 0
        repeat j = j + 1 until j >= 3
        return total, j
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(15)));
    assert!(matches!(vals[1], LuaValue::Integer(3)));
}

#[test]
fn test_repeat_condition_sees_body_locals() {
    let v = first(
        r#"
        local n = 0
        repeat
            local done = true
            n = n + 1
        until done
        return n
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(1)));
}

#[test]
fn test_numeric_for() {
    let vals = run(
        r#"
        local sum = 0
        for i = 1, 10 do sum = sum + i end
        local down = {}
        for i = 3, 1, -1 do down[#down + 1] = i end
        return sum, down[1], down[3]
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(55)));
    assert!(matches!(vals[1], LuaValue::Integer(3)));
    assert!(matches!(vals[2], LuaValue::Integer(1)));
}

#[test]
fn test_numeric_for_float_and_zero_trip() {
    let vals = run(
        r#"
        local count = 0
        for _ = 1.0, 2.0, 0.5 do count = count + 1 end
        local never = 0
        for _ = 10, 1 do never = never + 1 end
        return count, never
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(3)));
    assert!(matches!(vals[1], LuaValue::Integer(0)));
}

#[test]
fn test_for_step_zero_errors() {
    let msg = run_err("for i = 1, 10, 0 do end");
    assert!(msg.contains("'for' step is zero"), "got: {}", msg);
}

#[test]
fn test_generic_for_over_ipairs() {
    let v = first(
        r#"
        local t = {10, 20, 30}
        local sum = 0
        for _, v in ipairs(t) do sum = sum + v end
        return sum
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(60)));
}

#[test]
fn test_goto_and_labels() {
    let v = first(
        r#"
        local n = 0
        ::top::
        n = n + 1
        if n < 3 then goto top end
        return n
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(3)));
}

#[test]
fn test_goto_forward_skips() {
    let v = first(
        r#"
        local hit = false
        goto done
        hit = true
        ::done::
        return hit
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(false));
}

#[test]
fn test_goto_into_local_scope_rejected() {
    let msg = run_err(
        r#"
        goto inside
        local x = 1
        ::inside::
        return x
    "#,
    );
    assert!(msg.contains("jumps into the scope"), "got: {}", msg);
}

#[test]
fn test_goto_without_label() {
    let msg = run_err("goto nowhere");
    assert!(msg.contains("no visible label"), "got: {}", msg);
}

#[test]
fn test_const_attribute_blocks_assignment() {
    let msg = run_err("local x <const> = 1\nx = 2");
    assert!(msg.contains("const"), "got: {}", msg);
}

#[test]
fn test_unknown_attribute_rejected() {
    let msg = run_err("local x <weird> = 1");
    assert!(msg.contains("unknown attribute"), "got: {}", msg);
}

#[test]
fn test_break_outside_loop_rejected() {
    let msg = run_err("break");
    assert!(msg.contains("break"), "got: {}", msg);
}

#[test]
fn test_break_leaves_innermost_loop() {
    let v = first(
        r#"
        local hits = 0
        for i = 1, 3 do
            for j = 1, 10 do
                if j == 2 then break end
                hits = hits + 1
            end
        end
        return hits
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(3)));
}

#[test]
fn test_method_definition_sugar() {
    let v = first(
        r#"
        local account = { balance = 0 }
        function account:deposit(n) self.balance = self.balance + n end
        account:deposit(42)
        return account.balance
    "#,
    );
    assert!(matches!(v, LuaValue::Integer(42)));
}

#[test]
fn test_nested_function_path_assignment() {
    let v = first(
        r#"
        local a = { b = {} }
        function a.b.f() return "deep" end
        return a.b.f()
    "#,
    );
    assert_eq!(v, LuaValue::string("deep"));
}

#[test]
fn test_parse_error_shape() {
    let msg = run_err("local = 5");
    assert!(msg.contains("<name> expected"), "got: {}", msg);
    assert!(msg.contains("[string \""), "got: {}", msg);
}

#[test]
fn test_paren_truncates_multiple_values() {
    let vals = run(
        r#"
        local function two() return 1, 2 end
        return (two())
    "#,
    );
    assert_eq!(vals.len(), 1);
    assert!(matches!(vals[0], LuaValue::Integer(1)));
}
