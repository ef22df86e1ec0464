// string.format: printf-style formatting with the C flag/width/precision
// grammar and Lua's %q round-trippable quoting.

use std::rc::Rc;

use crate::lua_value::{number, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM, NativeReturn};

#[derive(Default, Clone, Copy)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
}

struct Spec {
    flags: Flags,
    width: Option<usize>,
    precision: Option<usize>,
    conv: u8,
    /// raw text of the whole specifier, for error messages
    raw: String,
}

pub fn str_format(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let fmt = vm.check_string(1)?;
    let fmt = fmt.as_bytes().to_vec();
    let mut out: Vec<u8> = Vec::with_capacity(fmt.len());
    let mut argn = 1usize;
    let mut i = 0usize;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        if fmt.get(i + 1) == Some(&b'%') {
            out.push(b'%');
            i += 2;
            continue;
        }
        let (spec, next) = parse_spec(vm, &fmt, i)?;
        i = next;
        argn += 1;
        format_one(vm, &spec, argn, &mut out)?;
    }
    Ok(NativeReturn::one(vm.new_string_bytes(out)))
}

fn parse_spec(vm: &mut LuaVM, fmt: &[u8], start: usize) -> LuaResult<(Spec, usize)> {
    let mut i = start + 1;
    let mut flags = Flags::default();
    loop {
        match fmt.get(i) {
            Some(b'-') => flags.left = true,
            Some(b'+') => flags.plus = true,
            Some(b' ') => flags.space = true,
            Some(b'#') => flags.alt = true,
            Some(b'0') => flags.zero = true,
            _ => break,
        }
        i += 1;
    }
    let mut width = None;
    while matches!(fmt.get(i), Some(c) if c.is_ascii_digit()) {
        width = Some(width.unwrap_or(0) * 10 + (fmt[i] - b'0') as usize);
        i += 1;
    }
    let mut precision = None;
    if fmt.get(i) == Some(&b'.') {
        i += 1;
        precision = Some(0);
        while matches!(fmt.get(i), Some(c) if c.is_ascii_digit()) {
            precision = Some(precision.unwrap_or(0) * 10 + (fmt[i] - b'0') as usize);
            i += 1;
        }
    }
    let conv = match fmt.get(i) {
        Some(c) => *c,
        None => {
            return Err(vm.runtime_error("invalid conversion '%' to 'format'"));
        }
    };
    i += 1;
    let raw = String::from_utf8_lossy(&fmt[start..i]).into_owned();
    let has_modifiers =
        flags.left || flags.plus || flags.space || flags.alt || flags.zero || width.is_some() || precision.is_some();
    match conv {
        b'd' | b'i' | b'u' | b'o' | b'x' | b'X' | b'c' | b's' | b'q' | b'p' | b'f' | b'e'
        | b'E' | b'g' | b'G' | b'a' | b'A' => {}
        _ => {
            return Err(vm.runtime_error(format!("invalid conversion '{}' to 'format'", raw)));
        }
    }
    if conv == b'q' && has_modifiers {
        return Err(vm.runtime_error("specifier '%q' cannot have modifiers"));
    }
    if conv == b'c' && precision.is_some() {
        return Err(vm.runtime_error(format!("invalid conversion '{}' to 'format'", raw)));
    }
    Ok((
        Spec {
            flags,
            width,
            precision,
            conv,
            raw,
        },
        i,
    ))
}

fn format_one(vm: &mut LuaVM, spec: &Spec, argn: usize, out: &mut Vec<u8>) -> LuaResult<()> {
    match spec.conv {
        b'd' | b'i' => {
            let v = vm.check_integer(argn)?;
            let body = v.unsigned_abs().to_string();
            push_numeric(out, spec, v < 0, &body, "");
        }
        b'u' => {
            let v = vm.check_integer(argn)? as u64;
            push_numeric(out, spec, false, &v.to_string(), "");
        }
        b'o' => {
            let v = vm.check_integer(argn)? as u64;
            push_numeric(out, spec, false, &format!("{:o}", v), "");
        }
        b'x' => {
            let v = vm.check_integer(argn)? as u64;
            let prefix = if spec.flags.alt && v != 0 { "0x" } else { "" };
            push_numeric(out, spec, false, &format!("{:x}", v), prefix);
        }
        b'X' => {
            let v = vm.check_integer(argn)? as u64;
            let prefix = if spec.flags.alt && v != 0 { "0X" } else { "" };
            push_numeric(out, spec, false, &format!("{:X}", v), prefix);
        }
        b'c' => {
            let v = vm.check_integer(argn)?;
            push_padded(out, spec, &[(v as u8) as char as u8], false);
        }
        b's' => {
            let v = vm.check_any(argn)?;
            let s = vm.tostring_value(&v)?;
            let bytes = match &s {
                LuaValue::String(s) => s.as_bytes().to_vec(),
                other => other.to_string().into_bytes(),
            };
            let bytes = match spec.precision {
                Some(p) if p < bytes.len() => bytes[..p].to_vec(),
                _ => bytes,
            };
            push_padded(out, spec, &bytes, false);
        }
        b'q' => {
            let v = vm.check_any(argn)?;
            quote_value(vm, &v, out)?;
        }
        b'p' => {
            let v = vm.check_any(argn)?;
            let text = match &v {
                LuaValue::Table(t) => format!("{:p}", Rc::as_ptr(t)),
                LuaValue::Function(f) => format!("{:p}", Rc::as_ptr(f)),
                LuaValue::Coroutine(t) => format!("{:p}", Rc::as_ptr(t)),
                LuaValue::Userdata(u) => format!("{:p}", Rc::as_ptr(u)),
                LuaValue::String(s) => format!("{:p}", Rc::as_ptr(s)),
                _ => "(null)".to_string(),
            };
            push_padded(out, spec, text.as_bytes(), false);
        }
        b'f' | b'F' => {
            let v = vm.check_number(argn)?;
            let prec = spec.precision.unwrap_or(6);
            let body = if v.is_finite() {
                format!("{:.*}", prec, v.abs())
            } else {
                nonfinite_body(v)
            };
            push_numeric(out, spec, v.is_sign_negative() && !v.is_nan(), &body, "");
        }
        b'e' | b'E' => {
            let v = vm.check_number(argn)?;
            let prec = spec.precision.unwrap_or(6);
            let body = if v.is_finite() {
                let s = c_style_exp(v.abs(), prec);
                if spec.conv == b'E' {
                    s.to_uppercase()
                } else {
                    s
                }
            } else {
                nonfinite_body(v)
            };
            push_numeric(out, spec, v.is_sign_negative() && !v.is_nan(), &body, "");
        }
        b'g' | b'G' => {
            let v = vm.check_number(argn)?;
            let prec = spec.precision.unwrap_or(6).max(1);
            let body = if v.is_finite() {
                let s = c_style_g(v.abs(), prec, spec.flags.alt);
                if spec.conv == b'G' {
                    s.to_uppercase()
                } else {
                    s
                }
            } else {
                nonfinite_body(v)
            };
            push_numeric(out, spec, v.is_sign_negative() && !v.is_nan(), &body, "");
        }
        b'a' | b'A' => {
            let v = vm.check_number(argn)?;
            let body = if v.is_finite() {
                hex_float(v.abs())
            } else {
                nonfinite_body(v)
            };
            let body = if spec.conv == b'A' {
                body.to_uppercase().replace("0X", "0X")
            } else {
                body
            };
            push_numeric(out, spec, v.is_sign_negative() && !v.is_nan(), &body, "");
        }
        _ => {
            return Err(vm.runtime_error(format!(
                "invalid conversion '{}' to 'format'",
                spec.raw
            )));
        }
    }
    Ok(())
}

fn nonfinite_body(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else {
        "inf".to_string()
    }
}

/// Numeric padding: sign, optional prefix, zero fill inside, space fill
/// outside, left alignment.
fn push_numeric(out: &mut Vec<u8>, spec: &Spec, negative: bool, body: &str, prefix: &str) {
    let sign = if negative {
        "-"
    } else if spec.flags.plus {
        "+"
    } else if spec.flags.space {
        " "
    } else {
        ""
    };
    let body = match spec.precision {
        // integer precision: minimum digit count
        Some(p) if spec.conv_is_integer() && body.len() < p => {
            format!("{}{}", "0".repeat(p - body.len()), body)
        }
        _ => body.to_string(),
    };
    let content_len = sign.len() + prefix.len() + body.len();
    let width = spec.width.unwrap_or(0);
    if spec.flags.left {
        out.extend_from_slice(sign.as_bytes());
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(body.as_bytes());
        for _ in content_len..width {
            out.push(b' ');
        }
    } else if spec.flags.zero && spec.precision.is_none() && !body.starts_with("nan") && !body.starts_with("inf") {
        out.extend_from_slice(sign.as_bytes());
        out.extend_from_slice(prefix.as_bytes());
        for _ in content_len..width {
            out.push(b'0');
        }
        out.extend_from_slice(body.as_bytes());
    } else {
        for _ in content_len..width {
            out.push(b' ');
        }
        out.extend_from_slice(sign.as_bytes());
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(body.as_bytes());
    }
}

impl Spec {
    fn conv_is_integer(&self) -> bool {
        matches!(self.conv, b'd' | b'i' | b'u' | b'o' | b'x' | b'X')
    }
}

fn push_padded(out: &mut Vec<u8>, spec: &Spec, bytes: &[u8], _numeric: bool) {
    let width = spec.width.unwrap_or(0);
    if spec.flags.left {
        out.extend_from_slice(bytes);
        for _ in bytes.len()..width {
            out.push(b' ');
        }
    } else {
        for _ in bytes.len()..width {
            out.push(b' ');
        }
        out.extend_from_slice(bytes);
    }
}

/// C `%e`: two-digit exponent minimum.
fn c_style_exp(v: f64, prec: usize) -> String {
    let s = format!("{:.*e}", prec, v);
    match s.split_once('e') {
        Some((mant, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            format!("{}e{}{:02}", mant, if exp < 0 { '-' } else { '+' }, exp.abs())
        }
        None => s,
    }
}

/// C `%g`: significant-digit driven fixed/exponent choice with trailing
/// zero stripping (kept with '#').
fn c_style_g(v: f64, prec: usize, keep_zeros: bool) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    let exp = v.abs().log10().floor() as i32;
    let s = if exp < -4 || exp >= prec as i32 {
        let body = c_style_exp(v, prec.saturating_sub(1));
        if keep_zeros {
            return body;
        }
        // strip zeros in the mantissa
        match body.split_once('e') {
            Some((mant, exp)) => {
                let mant = if mant.contains('.') {
                    mant.trim_end_matches('0').trim_end_matches('.')
                } else {
                    mant
                };
                format!("{}e{}", mant, exp)
            }
            None => body,
        }
    } else {
        let decimals = (prec as i32 - 1 - exp).max(0) as usize;
        let body = format!("{:.*}", decimals, v);
        if keep_zeros {
            return body;
        }
        if body.contains('.') {
            body.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            body
        }
    };
    s
}

/// C `%a` for a non-negative finite float.
fn hex_float(v: f64) -> String {
    if v == 0.0 {
        return "0x0p+0".to_string();
    }
    let bits = v.to_bits();
    let raw_exp = ((bits >> 52) & 0x7FF) as i64;
    let mantissa = bits & 0x000F_FFFF_FFFF_FFFF;
    let (lead, exp, mant) = if raw_exp == 0 {
        // subnormal: 0.<mant> * 2^-1022
        (0u8, -1022i64, mantissa)
    } else {
        (1u8, raw_exp - 1023, mantissa)
    };
    let mut digits = format!("{:013x}", mant);
    while digits.ends_with('0') && digits.len() > 0 {
        digits.pop();
    }
    if digits.is_empty() {
        format!("0x{}p{}{}", lead, if exp < 0 { '-' } else { '+' }, exp.abs())
    } else {
        format!(
            "0x{}.{}p{}{}",
            lead,
            digits,
            if exp < 0 { '-' } else { '+' },
            exp.abs()
        )
    }
}

/// %q: a literal that reads back as the same value.
fn quote_value(vm: &mut LuaVM, v: &LuaValue, out: &mut Vec<u8>) -> LuaResult<()> {
    match v {
        LuaValue::Nil => out.extend_from_slice(b"nil"),
        LuaValue::Boolean(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        LuaValue::Integer(i) => {
            if *i == i64::MIN {
                // mininteger has no negatable literal
                out.extend_from_slice(b"0x8000000000000000");
            } else {
                out.extend_from_slice(i.to_string().as_bytes());
            }
        }
        LuaValue::Float(f) => {
            if f.is_nan() {
                out.extend_from_slice(b"(0/0)");
            } else if f.is_infinite() {
                out.extend_from_slice(if *f < 0.0 { b"-1e9999" } else { b"1e9999" });
            } else if f.fract() == 0.0 && number::float_to_integer(*f).is_some() {
                // keep the float subtype visible after reload
                out.extend_from_slice(format!("{:.1}", f).as_bytes());
            } else {
                // shortest round-trippable form, parseable as a Lua literal
                out.extend_from_slice(format!("{:?}", f).as_bytes());
            }
        }
        LuaValue::String(s) => {
            let bytes = s.as_bytes();
            out.push(b'"');
            for (i, &b) in bytes.iter().enumerate() {
                match b {
                    b'"' => out.extend_from_slice(b"\\\""),
                    b'\\' => out.extend_from_slice(b"\\\\"),
                    b'\n' => out.extend_from_slice(b"\\n"),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    b if b < 32 || b == 127 => {
                        // a digit right after a short decimal escape would be
                        // absorbed into it on reload; pad to three digits then
                        let next_is_digit = bytes
                            .get(i + 1)
                            .map(|n| n.is_ascii_digit())
                            .unwrap_or(false);
                        if next_is_digit {
                            out.extend_from_slice(format!("\\{:03}", b).as_bytes());
                        } else {
                            out.extend_from_slice(format!("\\{}", b).as_bytes());
                        }
                    }
                    b => out.push(b),
                }
            }
            out.push(b'"');
        }
        other => {
            return Err(vm.runtime_error(format!(
                "value has no literal form (a {})",
                other.type_name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_float_one() {
        assert_eq!(hex_float(1.0), "0x1p+0");
        assert_eq!(hex_float(2.0), "0x1p+1");
        assert_eq!(hex_float(1.5), "0x1.8p+0");
    }

    #[test]
    fn test_c_style_exp() {
        assert_eq!(c_style_exp(1.0, 2), "1.00e+00");
        assert_eq!(c_style_exp(0.015, 1), "1.5e-02");
    }
}
