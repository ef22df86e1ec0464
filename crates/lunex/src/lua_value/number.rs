// Numeric conversion rules shared by the lexer, `tonumber`, string
// coercion in arithmetic, and `tostring`.

use super::LuaValue;

/// Lua 5.4 float-to-integer conversion: exact values only.
pub fn float_to_integer(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= -9_223_372_036_854_775_808.0 && f < 9_223_372_036_854_775_808.0 {
        Some(f as i64)
    } else {
        None
    }
}

/// Exact mathematical equality between an integer and a float.
pub fn int_eq_float(i: i64, f: f64) -> bool {
    if !f.is_finite() {
        return false;
    }
    match float_to_integer(f) {
        Some(fi) => fi == i,
        None => false,
    }
}

/// `i < f` without precision loss on large magnitudes.
pub fn int_lt_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        return false;
    }
    if f >= 9_223_372_036_854_775_808.0 {
        return true;
    }
    if f < -9_223_372_036_854_775_808.0 {
        return false;
    }
    // f is within i64 range: compare against its floor exactly
    let ff = f.floor();
    let fi = ff as i64;
    i < fi || (i == fi && ff < f)
}

/// `i <= f` without precision loss on large magnitudes.
pub fn int_le_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        return false;
    }
    if f >= 9_223_372_036_854_775_808.0 {
        return true;
    }
    if f < -9_223_372_036_854_775_808.0 {
        return false;
    }
    let ff = f.floor();
    let fi = ff as i64;
    i < fi || (i == fi && ff <= f)
}

/// `f < i` without precision loss on large magnitudes.
pub fn float_lt_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        return false;
    }
    !int_le_float(i, f)
}

/// `f <= i` without precision loss on large magnitudes.
pub fn float_le_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        return false;
    }
    !int_lt_float(i, f)
}

/// Render a float the way `tostring` does: `%.14g`, with a `.0` suffix on
/// integral values so the subtype stays visible.
pub fn float_to_lua_string(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let s = format_g14(f);
    if s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        format!("{}.0", s)
    } else {
        s
    }
}

/// `%.14g` formatting (C printf semantics) for a finite float.
fn format_g14(f: f64) -> String {
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{:.13e}", f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= 14 {
        let mantissa = trim_fraction_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = 13 - exp;
        let fixed = if decimals <= 0 {
            format!("{:.0}", f)
        } else {
            format!("{:.*}", decimals as usize, f)
        };
        trim_fraction_zeros(&fixed).to_string()
    }
}

fn trim_fraction_zeros(s: &str) -> &str {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.')
}

/// Parse a numeric literal the way the lexer and `tonumber` do. The input
/// must already be trimmed. Returns `Integer` or `Float`, or `None` when
/// the text is not a number.
pub fn parse_number(s: &str) -> Option<LuaValue> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if body.is_empty() {
        return None;
    }
    if let Some(hex) = strip_hex_prefix(body) {
        parse_hex(hex, negative)
    } else {
        parse_decimal(body, negative)
    }
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    if let Some(rest) = s.strip_prefix("0x") {
        return Some(rest);
    }
    s.strip_prefix("0X")
}

fn parse_decimal(body: &str, negative: bool) -> Option<LuaValue> {
    let bytes = body.as_bytes();
    let mut saw_digit = false;
    let mut saw_dot = false;
    let mut saw_exp = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => saw_digit = true,
            b'.' if !saw_dot && !saw_exp => saw_dot = true,
            b'e' | b'E' if saw_digit && !saw_exp => {
                saw_exp = true;
                if i + 1 < bytes.len() && (bytes[i + 1] == b'+' || bytes[i + 1] == b'-') {
                    i += 1;
                }
                if i + 1 >= bytes.len() || !bytes[i + 1].is_ascii_digit() {
                    return None;
                }
            }
            _ => return None,
        }
        i += 1;
    }
    if !saw_digit {
        return None;
    }
    if !saw_dot && !saw_exp {
        // integer literal: decimal overflow demotes to float
        let mut acc: i128 = 0;
        let mut overflow = false;
        for &b in bytes {
            acc = match acc.checked_mul(10).and_then(|a| a.checked_add((b - b'0') as i128)) {
                Some(a) => a,
                None => {
                    overflow = true;
                    break;
                }
            };
        }
        if !overflow {
            let signed = if negative { -acc } else { acc };
            if signed >= i64::MIN as i128 && signed <= i64::MAX as i128 {
                return Some(LuaValue::Integer(signed as i64));
            }
        }
    }
    let f: f64 = body.parse().ok()?;
    Some(LuaValue::Float(if negative { -f } else { f }))
}

fn parse_hex(body: &str, negative: bool) -> Option<LuaValue> {
    let bytes = body.as_bytes();
    let mut mantissa: f64 = 0.0;
    let mut int_acc: u64 = 0;
    let mut saw_digit = false;
    let mut frac_scale = 1.0f64;
    let mut in_fraction = false;
    let mut exponent: i32 = 0;
    let mut has_exp = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                let d = (b as char).to_digit(16)? as u64;
                saw_digit = true;
                if in_fraction {
                    frac_scale /= 16.0;
                    mantissa += d as f64 * frac_scale;
                } else {
                    // wraps past 16 digits: only the low 64 bits survive
                    int_acc = int_acc.wrapping_mul(16).wrapping_add(d);
                    mantissa = mantissa * 16.0 + d as f64;
                }
            }
            b'.' if !in_fraction && !has_exp => in_fraction = true,
            b'p' | b'P' if saw_digit => {
                has_exp = true;
                let mut j = i + 1;
                let mut exp_neg = false;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    exp_neg = bytes[j] == b'-';
                    j += 1;
                }
                if j >= bytes.len() {
                    return None;
                }
                let mut e: i32 = 0;
                while j < bytes.len() {
                    if !bytes[j].is_ascii_digit() {
                        return None;
                    }
                    e = e.saturating_mul(10).saturating_add((bytes[j] - b'0') as i32);
                    j += 1;
                }
                exponent = if exp_neg { -e } else { e };
                i = j;
                continue;
            }
            _ => return None,
        }
        i += 1;
    }
    if !saw_digit {
        return None;
    }
    if !in_fraction && !has_exp {
        let v = int_acc as i64;
        return Some(LuaValue::Integer(if negative { v.wrapping_neg() } else { v }));
    }
    let f = mantissa * (2.0f64).powi(exponent);
    Some(LuaValue::Float(if negative { -f } else { f }))
}

/// `tonumber(s, base)` digit parsing for bases 2..=36; wraps on overflow
/// the way the reference manual's unsigned accumulation does.
pub fn parse_integer_with_base(s: &str, base: u32) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() || !(2..=36).contains(&base) {
        return None;
    }
    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if body.is_empty() {
        return None;
    }
    let mut acc: u64 = 0;
    for c in body.chars() {
        let d = c.to_digit(36)?;
        if d >= base {
            return None;
        }
        acc = acc.wrapping_mul(base as u64).wrapping_add(d as u64);
    }
    let v = acc as i64;
    Some(if negative { v.wrapping_neg() } else { v })
}
