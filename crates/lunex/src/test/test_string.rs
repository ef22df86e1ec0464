// String library: slicing, format, pack.

use super::{first, run, run_err};
use crate::lua_value::LuaValue;

#[test]
fn test_len_sub_rep() {
    let vals = run(
        r#"
        return string.len("hello"), ("hello"):sub(2, 4), ("ab"):rep(3), ("ab"):rep(3, "-")
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(5)));
    assert_eq!(vals[1], LuaValue::string("ell"));
    assert_eq!(vals[2], LuaValue::string("ababab"));
    assert_eq!(vals[3], LuaValue::string("ab-ab-ab"));
}

#[test]
fn test_sub_negative_indices() {
    let vals = run(r#"return ("hello"):sub(-3), ("hello"):sub(2, -2), ("hello"):sub(10)"#);
    assert_eq!(vals[0], LuaValue::string("llo"));
    assert_eq!(vals[1], LuaValue::string("ell"));
    assert_eq!(vals[2], LuaValue::string(""));
}

#[test]
fn test_byte_char_reverse() {
    let vals = run(
        r#"
        return string.byte("A"), string.byte("ABC", 1, 3), string.char(72, 105), ("abc"):reverse()
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(65)));
    assert!(matches!(vals[1], LuaValue::Integer(65)));
    assert!(matches!(vals[2], LuaValue::Integer(66)));
    assert!(matches!(vals[3], LuaValue::Integer(67)));
    assert_eq!(vals[4], LuaValue::string("Hi"));
    assert_eq!(vals[5], LuaValue::string("cba"));
}

#[test]
fn test_format_basic() {
    let v = first(r#"return string.format("%d|%5d|%-5d|%05d|%x|%X|%o", 42, 42, 42, 42, 255, 255, 8)"#);
    assert_eq!(v, LuaValue::string("42|   42|42   |00042|ff|FF|10"));
}

#[test]
fn test_format_string_and_precision() {
    let v = first(r#"return string.format("[%10s][%-10s][%.3s]", "ab", "ab", "abcdef")"#);
    assert_eq!(v, LuaValue::string("[        ab][ab        ][abc]"));
}

#[test]
fn test_format_float_shapes() {
    let v = first(r#"return string.format("%.2f|%e|%g|%g", 3.14159, 120.0, 0.00001, 100000)"#);
    let text = v.to_string();
    assert!(text.starts_with("3.14|1.200000e+02|1e-05|100000"), "got: {}", text);
}

#[test]
fn test_format_c_and_percent() {
    let v = first(r#"return string.format("%c%c%c %d%%", 76, 117, 97, 100)"#);
    assert_eq!(v, LuaValue::string("Lua 100%"));
}

#[test]
fn test_format_q_round_trips() {
    // spec seed scenario 8
    let v = first(r#"return string.format("%q", math.mininteger)"#);
    assert_eq!(v, LuaValue::string("0x8000000000000000"));
    let v = first(
        r#"
        local function round_trip(x)
            return load("return " .. string.format("%q", x))()
        end
        local nan = 0/0
        local rt_nan = round_trip(nan)
        return round_trip(math.mininteger) == math.mininteger,
               round_trip(1/0) == 1/0,
               round_trip(-1/0) == -1/0,
               rt_nan ~= rt_nan
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_format_q_strings() {
    let v = first(
        r#"
        local s = "line\nwith \"quotes\" and \\ backslash"
        return load("return " .. string.format("%q", s))() == s
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_format_q_control_byte_before_digit() {
    // a control byte followed by a digit must not merge into one decimal
    // escape on reload
    let v = first(
        r#"
        local s = "\5" .. "3"
        local reloaded = load("return " .. string.format("%q", s))()
        return reloaded == s and #reloaded == 2 and reloaded:byte(1) == 5
            and reloaded:byte(2) == 51
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_format_q_nul_bytes() {
    let v = first(
        r#"
        local s = "\0" .. "7" .. "\0"
        local reloaded = load("return " .. string.format("%q", s))()
        return reloaded == s and #reloaded == 3
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_format_q_rejects_modifiers() {
    let msg = run_err(r#"return string.format("%10q", "x")"#);
    assert!(msg.contains("cannot have modifiers"), "got: {}", msg);
}

#[test]
fn test_format_plus_and_space_flags() {
    let v = first(r#"return string.format("%+d|% d|%+d", 5, 5, -5)"#);
    assert_eq!(v, LuaValue::string("+5| 5|-5"));
}

#[test]
fn test_tostring_number_forms() {
    let vals = run("return tostring(10), tostring(10.0), tostring(0.5), tostring(1/0), tostring(-1/0)");
    assert_eq!(vals[0], LuaValue::string("10"));
    assert_eq!(vals[1], LuaValue::string("10.0"));
    assert_eq!(vals[2], LuaValue::string("0.5"));
    assert_eq!(vals[3], LuaValue::string("inf"));
    assert_eq!(vals[4], LuaValue::string("-inf"));
}

#[test]
fn test_tonumber_forms() {
    let vals = run(
        r#"
        return tonumber("10"), tonumber("  3.5  "), tonumber("0x1F"),
               tonumber("ff", 16), tonumber("z"), tonumber("10", 2)
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(10)));
    assert!(matches!(vals[1], LuaValue::Float(f) if f == 3.5));
    assert!(matches!(vals[2], LuaValue::Integer(31)));
    assert!(matches!(vals[3], LuaValue::Integer(255)));
    assert!(vals[4].is_nil());
    assert!(matches!(vals[5], LuaValue::Integer(2)));
}

#[test]
fn test_pack_unpack_round_trip() {
    let vals = run(
        r#"
        local data = string.pack("<i4i4", 100, -200)
        local a, b, pos = string.unpack("<i4i4", data)
        return #data, a, b, pos
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(8)));
    assert!(matches!(vals[1], LuaValue::Integer(100)));
    assert!(matches!(vals[2], LuaValue::Integer(-200)));
    assert!(matches!(vals[3], LuaValue::Integer(9)));
}

#[test]
fn test_pack_endianness() {
    let vals = run(
        r#"
        local le = string.pack("<I2", 0x0102)
        local be = string.pack(">I2", 0x0102)
        return le:byte(1), le:byte(2), be:byte(1), be:byte(2)
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(2)));
    assert!(matches!(vals[1], LuaValue::Integer(1)));
    assert!(matches!(vals[2], LuaValue::Integer(1)));
    assert!(matches!(vals[3], LuaValue::Integer(2)));
}

#[test]
fn test_pack_strings_and_floats() {
    let vals = run(
        r#"
        local data = string.pack("<zs1d", "zero", "pfx", 1.5)
        local z, s, d = string.unpack("<zs1d", data)
        return z, s, d
    "#,
    );
    assert_eq!(vals[0], LuaValue::string("zero"));
    assert_eq!(vals[1], LuaValue::string("pfx"));
    assert!(matches!(vals[2], LuaValue::Float(f) if f == 1.5));
}

#[test]
fn test_packsize() {
    let vals = run(r#"return string.packsize("<i4i8"), string.packsize("c10x")"#);
    assert!(matches!(vals[0], LuaValue::Integer(12)));
    assert!(matches!(vals[1], LuaValue::Integer(11)));
}

#[test]
fn test_pack_alignment() {
    // with "!4", the i4 aligns to a 4-byte boundary after the i1
    let vals = run(
        r#"
        local fmt = "!4i1i4"
        local size = string.packsize(fmt)
        local data = string.pack(fmt, 7, -9)
        local a, b, pos = string.unpack(fmt, data)
        return size, #data, data:byte(2), a, b, pos
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(8)));
    assert!(matches!(vals[1], LuaValue::Integer(8)));
    assert!(matches!(vals[2], LuaValue::Integer(0)));
    assert!(matches!(vals[3], LuaValue::Integer(7)));
    assert!(matches!(vals[4], LuaValue::Integer(-9)));
    assert!(matches!(vals[5], LuaValue::Integer(9)));
}

#[test]
fn test_pack_alignment_round_trip_law() {
    let v = first(
        r#"
        local fmt = "!8i2i8i1"
        local data = string.pack(fmt, 3, 4, 5)
        return string.pack(fmt, string.unpack(fmt, data)) == data
    "#,
    );
    assert_eq!(v, LuaValue::Boolean(true));
}

#[test]
fn test_pack_default_layout_is_packed() {
    // without "!", alignment never applies and X pads nothing
    let vals = run(
        r#"
        return string.packsize("i1i4"), string.packsize("i1Xi4")
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(5)));
    assert!(matches!(vals[1], LuaValue::Integer(1)));
}

#[test]
fn test_pack_x_pads_to_following_option() {
    // X consumes the option after it, contributing only its padding
    let vals = run(
        r#"
        local size = string.packsize("!4i1Xi4")
        local data = string.pack("!4i1Xi4", 1)
        return size, #data
    "#,
    );
    assert!(matches!(vals[0], LuaValue::Integer(4)));
    assert!(matches!(vals[1], LuaValue::Integer(4)));
}

#[test]
fn test_pack_x_requires_following_option() {
    let vals = run(
        r#"
        local ok, err = pcall(string.packsize, "i1X")
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(
        vals[1].to_string().contains("invalid next option for option 'X'"),
        "got: {}",
        vals[1]
    );
}

#[test]
fn test_pack_alignment_must_be_power_of_two() {
    let vals = run(
        r#"
        local ok, err = pcall(string.packsize, "!16i3")
        return ok, err
    "#,
    );
    assert_eq!(vals[0], LuaValue::Boolean(false));
    assert!(
        vals[1].to_string().contains("not power of 2"),
        "got: {}",
        vals[1]
    );
}

#[test]
fn test_packsize_rejects_variable() {
    let msg = run_err(r#"return string.packsize("z")"#);
    assert!(msg.contains("variable-size"), "got: {}", msg);
}

#[test]
fn test_pack_integer_overflow_check() {
    let msg = run_err(r#"return string.pack("i1", 300)"#);
    assert!(msg.contains("integer overflow"), "got: {}", msg);
}

#[test]
fn test_dump_rejects_native() {
    let msg = run_err("return string.dump(print)");
    assert!(msg.contains("unable to dump"), "got: {}", msg);
}
