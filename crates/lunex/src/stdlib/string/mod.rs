// String library: slicing, case, iteration, pattern entry points
// (find/match/gmatch/gsub), format, pack, dump. All indices follow the
// 1-based, negative-from-end convention.

pub mod pack;
pub mod pattern;
pub mod string_format;

use std::rc::Rc;

use crate::lib_registry;
use crate::lua_value::{LuaFunction, LuaString, LuaTable, LuaValue};
use crate::lua_vm::{dump_proto, LuaResult, LuaVM, NativeReturn};
use pattern::{find_match, find_plain, match_at, CaptureValue};

pub fn open(vm: &mut LuaVM) {
    let module = crate::lib_module!("string", {
        "len" => str_len,
        "sub" => str_sub,
        "upper" => str_upper,
        "lower" => str_lower,
        "rep" => str_rep,
        "reverse" => str_reverse,
        "byte" => str_byte,
        "char" => str_char,
        "find" => str_find,
        "match" => str_match,
        "gmatch" => str_gmatch,
        "gsub" => str_gsub,
        "format" => string_format::str_format,
        "dump" => str_dump,
        "pack" => pack::str_pack,
        "unpack" => pack::str_unpack,
        "packsize" => pack::str_packsize,
    });
    let table = lib_registry::load_module(vm, &module);

    // every string shares one metatable whose __index is the library,
    // enabling s:upper() style calls
    let mt = LuaTable::new();
    let mt = std::rc::Rc::new(std::cell::RefCell::new(mt));
    let index_key = vm.new_string("__index");
    let _ = mt.borrow_mut().raw_set(index_key, table);
    vm.set_string_metatable(mt);
}

/// Relative string position: 1-based, negative counts from the end.
/// Returns a 0-based offset, clamping per the reference rules.
fn pos_relative(pos: i64, len: usize) -> i64 {
    if pos >= 0 {
        pos
    } else if (-pos) as u64 > len as u64 {
        0
    } else {
        len as i64 + pos + 1
    }
}

fn str_len(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    Ok(NativeReturn::one(LuaValue::Integer(s.len() as i64)))
}

fn str_sub(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let len = s.len();
    let mut start = pos_relative(vm.opt_integer(2, 1)?, len);
    let mut end = pos_relative(vm.opt_integer(3, -1)?, len);
    if start < 1 {
        start = 1;
    }
    if end > len as i64 {
        end = len as i64;
    }
    if start > end {
        return Ok(NativeReturn::one(vm.new_string("")));
    }
    let bytes = s.as_bytes()[(start - 1) as usize..end as usize].to_vec();
    Ok(NativeReturn::one(vm.new_string_bytes(bytes)))
}

fn str_upper(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let bytes = s.as_bytes().iter().map(|b| b.to_ascii_uppercase()).collect();
    Ok(NativeReturn::one(vm.new_string_bytes(bytes)))
}

fn str_lower(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let bytes = s.as_bytes().iter().map(|b| b.to_ascii_lowercase()).collect();
    Ok(NativeReturn::one(vm.new_string_bytes(bytes)))
}

fn str_rep(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let n = vm.check_integer(2)?;
    let sep = vm.opt_string(3, "")?;
    if n <= 0 {
        return Ok(NativeReturn::one(vm.new_string("")));
    }
    let total = (s.len() + sep.len())
        .checked_mul(n as usize)
        .unwrap_or(usize::MAX);
    if total > (1 << 30) {
        return Err(vm.runtime_error("resulting string too large"));
    }
    let mut bytes = Vec::with_capacity(total);
    for i in 0..n {
        if i > 0 {
            bytes.extend_from_slice(sep.as_bytes());
        }
        bytes.extend_from_slice(s.as_bytes());
    }
    Ok(NativeReturn::one(vm.new_string_bytes(bytes)))
}

fn str_reverse(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.reverse();
    Ok(NativeReturn::one(vm.new_string_bytes(bytes)))
}

fn str_byte(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let len = s.len();
    let i = pos_relative(vm.opt_integer(2, 1)?, len).max(1);
    let j = pos_relative(vm.opt_integer(3, i)?, len).min(len as i64);
    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        out.push(LuaValue::Integer(s.as_bytes()[(k - 1) as usize] as i64));
        k += 1;
    }
    Ok(NativeReturn::Values(out))
}

fn str_char(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let n = vm.arg_count();
    let mut bytes = Vec::with_capacity(n);
    for i in 1..=n {
        let code = vm.check_integer(i)?;
        if !(0..=255).contains(&code) {
            let name = vm.native_name();
            return Err(vm.runtime_error(format!(
                "bad argument #{} to '{}' (value out of range)",
                i, name
            )));
        }
        bytes.push(code as u8);
    }
    Ok(NativeReturn::one(vm.new_string_bytes(bytes)))
}

fn capture_to_value(vm: &mut LuaVM, cap: CaptureValue) -> LuaValue {
    match cap {
        CaptureValue::Bytes(bytes) => vm.new_string_bytes(bytes),
        CaptureValue::Position(pos) => LuaValue::Integer(pos as i64),
    }
}

/// find's init argument: 0-based search start, or None when past the end.
fn search_start(vm: &mut LuaVM, arg: usize, len: usize) -> LuaResult<Option<usize>> {
    let init = pos_relative(vm.opt_integer(arg, 1)?, len);
    let init = if init < 1 { 1 } else { init };
    if init as usize > len + 1 {
        return Ok(None);
    }
    Ok(Some(init as usize - 1))
}

fn str_find(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let pat = vm.check_string(2)?;
    let init = match search_start(vm, 3, s.len())? {
        Some(init) => init,
        None => return Ok(NativeReturn::one(LuaValue::Nil)),
    };
    let plain = vm.arg(4).is_truthy();
    if plain {
        return Ok(match find_plain(s.as_bytes(), pat.as_bytes(), init) {
            Some((start, end)) => NativeReturn::Values(vec![
                LuaValue::Integer(start as i64 + 1),
                LuaValue::Integer(end as i64),
            ]),
            None => NativeReturn::one(LuaValue::Nil),
        });
    }
    match find_match(s.as_bytes(), pat.as_bytes(), init) {
        Ok(Some(m)) => {
            let mut out = vec![
                LuaValue::Integer(m.start as i64 + 1),
                LuaValue::Integer(m.end as i64),
            ];
            for cap in m.captures {
                out.push(capture_to_value(vm, cap));
            }
            Ok(NativeReturn::Values(out))
        }
        Ok(None) => Ok(NativeReturn::one(LuaValue::Nil)),
        Err(e) => Err(vm.runtime_error(e)),
    }
}

fn str_match(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let pat = vm.check_string(2)?;
    let init = match search_start(vm, 3, s.len())? {
        Some(init) => init,
        None => return Ok(NativeReturn::one(LuaValue::Nil)),
    };
    match find_match(s.as_bytes(), pat.as_bytes(), init) {
        Ok(Some(m)) => {
            let caps = m.captures_or_whole(s.as_bytes());
            let out = caps
                .into_iter()
                .map(|c| capture_to_value(vm, c))
                .collect();
            Ok(NativeReturn::Values(out))
        }
        Ok(None) => Ok(NativeReturn::one(LuaValue::Nil)),
        Err(e) => Err(vm.runtime_error(e)),
    }
}

/// gmatch iterator state lives in the closure's upvalues:
/// [0] subject, [1] pattern, [2] next search position.
fn gmatch_iter(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = match vm.native_upvalue(0).as_lua_string() {
        Some(s) => s,
        None => return Ok(NativeReturn::one(LuaValue::Nil)),
    };
    let pat = match vm.native_upvalue(1).as_lua_string() {
        Some(p) => p,
        None => return Ok(NativeReturn::one(LuaValue::Nil)),
    };
    let pos = vm.native_upvalue(2).as_integer_strict().unwrap_or(0) as usize;
    if pos > s.len() {
        return Ok(NativeReturn::one(LuaValue::Nil));
    }
    match find_match(s.as_bytes(), pat.as_bytes(), pos) {
        Ok(Some(m)) => {
            // empty matches advance by one so iteration terminates
            let next = if m.end > m.start { m.end } else { m.end + 1 };
            vm.set_native_upvalue(2, LuaValue::Integer(next as i64));
            let caps = m.captures_or_whole(s.as_bytes());
            let out = caps
                .into_iter()
                .map(|c| capture_to_value(vm, c))
                .collect();
            Ok(NativeReturn::Values(out))
        }
        Ok(None) => Ok(NativeReturn::one(LuaValue::Nil)),
        Err(e) => Err(vm.runtime_error(e)),
    }
}

fn str_gmatch(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let pat = vm.check_string(2)?;
    let iter = LuaFunction::native_with_upvalues(
        "gmatch_iterator",
        gmatch_iter,
        vec![
            LuaValue::String(s),
            LuaValue::String(pat),
            LuaValue::Integer(0),
        ],
    );
    Ok(NativeReturn::one(LuaValue::function(iter)))
}

enum Replacement {
    Text(Rc<LuaString>),
    Table(LuaValue),
    Function(LuaValue),
}

fn str_gsub(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let s = vm.check_string(1)?;
    let pat = vm.check_string(2)?;
    let repl_arg = vm.check_any(3)?;
    let max = if vm.arg(4).is_nil() {
        i64::MAX
    } else {
        vm.check_integer(4)?
    };
    let repl = match &repl_arg {
        LuaValue::String(r) => Replacement::Text(Rc::clone(r)),
        LuaValue::Integer(_) | LuaValue::Float(_) => {
            Replacement::Text(Rc::new(LuaString::from(repl_arg.to_string())))
        }
        LuaValue::Table(_) => Replacement::Table(repl_arg.clone()),
        LuaValue::Function(_) => Replacement::Function(repl_arg.clone()),
        other => {
            let name = vm.native_name();
            return Err(vm.runtime_error(format!(
                "bad argument #3 to '{}' (string/function/table expected, got {})",
                name,
                other.type_name()
            )));
        }
    };
    let src = s.as_bytes();
    let pattern = pat.as_bytes();
    let anchored = pattern.first() == Some(&b'^');
    let mut out: Vec<u8> = Vec::with_capacity(src.len());
    let mut pos = 0usize;
    let mut count: i64 = 0;
    while count < max {
        let matched = match match_at(src, pattern, pos) {
            Ok(m) => m,
            Err(e) => return Err(vm.runtime_error(e)),
        };
        if let Some(m) = matched {
            count += 1;
            let whole = &src[m.start..m.end];
            let caps = m.captures_or_whole(src);
            apply_replacement(vm, &repl, whole, &caps, &mut out)?;
            if m.end > pos {
                pos = m.end;
            } else {
                // empty match: copy one byte and move on
                if pos < src.len() {
                    out.push(src[pos]);
                }
                pos += 1;
            }
        } else {
            if pos < src.len() {
                out.push(src[pos]);
            }
            pos += 1;
        }
        if anchored || pos > src.len() {
            break;
        }
    }
    if pos < src.len() {
        out.extend_from_slice(&src[pos..]);
    }
    let result = vm.new_string_bytes(out);
    Ok(NativeReturn::Values(vec![result, LuaValue::Integer(count)]))
}

fn apply_replacement(
    vm: &mut LuaVM,
    repl: &Replacement,
    whole: &[u8],
    caps: &[CaptureValue],
    out: &mut Vec<u8>,
) -> LuaResult<()> {
    let cap_bytes = |i: usize| -> Vec<u8> {
        match caps.get(i) {
            Some(CaptureValue::Bytes(b)) => b.clone(),
            Some(CaptureValue::Position(p)) => p.to_string().into_bytes(),
            None => Vec::new(),
        }
    };
    match repl {
        Replacement::Text(text) => {
            let bytes = text.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                if bytes[i] == b'%' && i + 1 < bytes.len() {
                    let d = bytes[i + 1];
                    match d {
                        b'%' => out.push(b'%'),
                        b'0' => out.extend_from_slice(whole),
                        b'1'..=b'9' => {
                            out.extend_from_slice(&cap_bytes((d - b'1') as usize));
                        }
                        _ => {
                            return Err(vm.runtime_error(
                                "invalid use of '%' in replacement string",
                            ));
                        }
                    }
                    i += 2;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            Ok(())
        }
        Replacement::Table(t) => {
            let key = capture_value(vm, &caps[0]);
            let value = vm.index_value(t, &key)?;
            push_replacement_value(vm, value, whole, out)
        }
        Replacement::Function(f) => {
            let args: Vec<LuaValue> = caps
                .iter()
                .map(|c| capture_value(vm, c))
                .collect();
            let vals = vm.call_value(f.clone(), args)?;
            let value = vals.into_iter().next().unwrap_or(LuaValue::Nil);
            push_replacement_value(vm, value, whole, out)
        }
    }
}

fn capture_value(vm: &mut LuaVM, cap: &CaptureValue) -> LuaValue {
    match cap {
        CaptureValue::Bytes(bytes) => vm.new_string_bytes(bytes.clone()),
        CaptureValue::Position(pos) => LuaValue::Integer(*pos as i64),
    }
}

fn push_replacement_value(
    vm: &mut LuaVM,
    value: LuaValue,
    whole: &[u8],
    out: &mut Vec<u8>,
) -> LuaResult<()> {
    match value {
        LuaValue::Nil | LuaValue::Boolean(false) => {
            out.extend_from_slice(whole);
            Ok(())
        }
        LuaValue::String(s) => {
            out.extend_from_slice(s.as_bytes());
            Ok(())
        }
        LuaValue::Integer(_) | LuaValue::Float(_) => {
            out.extend_from_slice(value.to_string().as_bytes());
            Ok(())
        }
        other => Err(vm.runtime_error(format!(
            "invalid replacement value (a {})",
            other.type_name()
        ))),
    }
}

fn str_dump(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_function(1)?;
    let func = match f.as_function() {
        Some(func) => func,
        None => return Err(vm.runtime_error("unable to dump given function")),
    };
    match func.as_lua() {
        Some(closure) => {
            let bytes = dump_proto(&closure.proto);
            Ok(NativeReturn::one(vm.new_string_bytes(bytes)))
        }
        None => Err(vm.runtime_error("unable to dump given function")),
    }
}
