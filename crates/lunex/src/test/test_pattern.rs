// Pattern engine through the string library surface.

use super::{first, run};
use crate::lua_value::LuaValue;

#[test]
fn test_find_returns_inclusive_range() {
    let vals = run(r#"return string.find("hello world", "world")"#);
    assert!(matches!(vals[0], LuaValue::Integer(7)));
    assert!(matches!(vals[1], LuaValue::Integer(11)));
}

#[test]
fn test_find_with_init_and_plain() {
    let vals = run(
        r#"
        local a = string.find("aXa", "X", 3)
        local b, c = string.find("a.b", ".", 1, true)
        return a, b, c
    "#,
    );
    assert!(vals[0].is_nil());
    assert!(matches!(vals[1], LuaValue::Integer(2)));
    assert!(matches!(vals[2], LuaValue::Integer(2)));
}

#[test]
fn test_find_returns_captures_after_range() {
    let vals = run(r#"return string.find("key=val", "(%w+)=(%w+)")"#);
    assert!(matches!(vals[0], LuaValue::Integer(1)));
    assert!(matches!(vals[1], LuaValue::Integer(7)));
    assert_eq!(vals[2], LuaValue::string("key"));
    assert_eq!(vals[3], LuaValue::string("val"));
}

#[test]
fn test_match_whole_and_captures() {
    let vals = run(
        r#"
        return string.match("hello 42", "%d+"),
               string.match("2026-08-01", "(%d+)-(%d+)-(%d+)")
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("42"));
    assert_eq!(vals[1], LuaValue::string("2026"));
}

#[test]
fn test_gmatch_iteration() {
    // spec seed scenario 5
    let vals = run(
        r#"
        local s = "abc123def456"
        local out = {}
        for n in string.gmatch(s, "%d+") do out[#out + 1] = n end
        return out[1], out[2], #out
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("123"));
    assert_eq!(vals[1], LuaValue::string("456"));
    assert!(matches!(vals[2], LuaValue::Integer(2)));
}

#[test]
fn test_gmatch_with_captures() {
    let v = first(
        r#"
        local pairs_found = {}
        for k, v in string.gmatch("a=1,b=2", "(%w+)=(%w+)") do
            pairs_found[k] = v
        end
        return pairs_found.a .. pairs_found.b
    "#,
    );
    assert_eq!(v, LuaValue::string("12"));
}

#[test]
fn test_gsub_string_replacement() {
    let vals = run(
        r#"
        local s, n = string.gsub("hello world", "o", "0")
        return s, n
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("hell0 w0rld"));
    assert!(matches!(vals[1], LuaValue::Integer(2)));
}

#[test]
fn test_gsub_backreferences() {
    let v = first(r#"return (string.gsub("hello", "(l+)", "<%1>"))"#);
    assert_eq!(v, LuaValue::string("he<ll>o"));
}

#[test]
fn test_gsub_limit() {
    let v = first(r#"return (string.gsub("aaa", "a", "b", 2))"#);
    assert_eq!(v, LuaValue::string("bba"));
}

#[test]
fn test_gsub_function_replacement() {
    let v = first(
        r#"
        return (string.gsub("1 2 3", "%d", function(d) return tostring(tonumber(d) * 2) end))
    "#,
    );
    assert_eq!(v, LuaValue::string("2 4 6"));
}

#[test]
fn test_gsub_table_replacement() {
    let v = first(
        r#"
        return (string.gsub("$name is $job", "%$(%w+)", {name = "ada", job = "engineer"}))
    "#,
    );
    assert_eq!(v, LuaValue::string("ada is engineer"));
}

#[test]
fn test_gsub_nil_replacement_keeps_match() {
    let v = first(r#"return (string.gsub("abc", "%a", function() return nil end))"#);
    assert_eq!(v, LuaValue::string("abc"));
}

#[test]
fn test_gsub_invalid_replacement_type_errors() {
    let vals = run(
        r#"
        local ok, err = pcall(string.gsub, "abc", "%a", function() return {} end)
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(
        vals[1].to_string().contains("invalid replacement value"),
        "got: {}",
        vals[1]
    );
}

#[test]
fn test_anchors() {
    let vals = run(
        r#"
        return string.match("hello", "^he"), string.match("hello", "lo$"),
               string.match("hello", "^hello$"), string.match("hello", "^ell")
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("he"));
    assert_eq!(vals[1], LuaValue::string("lo"));
    assert_eq!(vals[2], LuaValue::string("hello"));
    assert!(vals[3].is_nil());
}

#[test]
fn test_character_sets_and_ranges() {
    let vals = run(
        r#"
        return string.match("x9y", "[0-9]"), string.match("x9y", "[^0-9]"),
               string.match("hello-world", "[%a-]+")
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("9"));
    assert_eq!(vals[1], LuaValue::string("x"));
    assert_eq!(vals[2], LuaValue::string("hello-world"));
}

#[test]
fn test_balanced_match() {
    let v = first(r#"return string.match("fn(a, b(c)) rest", "%b()")"#);
    assert_eq!(v, LuaValue::string("(a, b(c))"));
}

#[test]
fn test_frontier() {
    let v = first(r#"return (string.gsub("THE (quick) fox", "%f[%a]%u+", "X"))"#);
    assert_eq!(v, LuaValue::string("X (quick) fox"));
}

#[test]
fn test_position_capture() {
    let v = first(r#"return string.match("abc", "b()")"#);
    assert!(matches!(v, LuaValue::Integer(3)));
}

#[test]
fn test_lazy_vs_greedy() {
    let vals = run(
        r#"
        return string.match("<a><b>", "<(.-)>"), string.match("<a><b>", "<(.*)>")
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("a"));
    assert_eq!(vals[1], LuaValue::string("a><b"));
}

#[test]
fn test_optional_and_plus() {
    let vals = run(
        r#"
        return string.match("color", "colou?r"), string.match("colour", "colou?r"),
               string.match("aaa", "a+")
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("color"));
    assert_eq!(vals[1], LuaValue::string("colour"));
    assert_eq!(vals[2], LuaValue::string("aaa"));
}

#[test]
fn test_escaped_magic_characters() {
    let v = first(r#"return string.match("3.14", "%d%.%d+")"#);
    assert_eq!(v, LuaValue::string("3.14"));
}
