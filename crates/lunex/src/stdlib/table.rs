// Table library.

use crate::lib_registry;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM, NativeReturn};

pub fn open(vm: &mut LuaVM) {
    let module = crate::lib_module!("table", {
        "insert" => tbl_insert,
        "remove" => tbl_remove,
        "concat" => tbl_concat,
        "unpack" => tbl_unpack,
        "pack" => tbl_pack,
        "sort" => tbl_sort,
        "move" => tbl_move,
    });
    lib_registry::load_module(vm, &module);
}

fn tbl_insert(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t = vm.check_table(1)?;
    let len = t.borrow().length();
    match vm.arg_count() {
        2 => {
            let value = vm.arg(2);
            t.borrow_mut().raw_set_int(len + 1, value);
        }
        3 => {
            let pos = vm.check_integer(2)?;
            if pos < 1 || pos > len + 1 {
                let name = vm.native_name();
                return Err(vm.runtime_error(format!(
                    "bad argument #2 to '{}' (position out of bounds)",
                    name
                )));
            }
            let value = vm.arg(3);
            let mut i = len;
            let mut table = t.borrow_mut();
            while i >= pos {
                let v = table.raw_get_int(i);
                table.raw_set_int(i + 1, v);
                i -= 1;
            }
            table.raw_set_int(pos, value);
        }
        _ => {
            return Err(vm.error_plain("wrong number of arguments to 'insert'"));
        }
    }
    Ok(NativeReturn::none())
}

fn tbl_remove(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t = vm.check_table(1)?;
    let len = t.borrow().length();
    let pos = vm.opt_integer(2, len)?;
    if len == 0 && vm.arg(2).is_nil() {
        return Ok(NativeReturn::one(LuaValue::Nil));
    }
    if len + 1 == pos {
        let v = t.borrow().raw_get_int(pos);
        t.borrow_mut().raw_set_int(pos, LuaValue::Nil);
        return Ok(NativeReturn::one(v));
    }
    if pos < 1 || pos > len + 1 {
        let name = vm.native_name();
        return Err(vm.runtime_error(format!(
            "bad argument #2 to '{}' (position out of bounds)",
            name
        )));
    }
    let removed = {
        let mut table = t.borrow_mut();
        let removed = table.raw_get_int(pos);
        let mut i = pos;
        while i < len {
            let v = table.raw_get_int(i + 1);
            table.raw_set_int(i, v);
            i += 1;
        }
        table.raw_set_int(len, LuaValue::Nil);
        removed
    };
    Ok(NativeReturn::one(removed))
}

fn tbl_concat(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t = vm.check_table(1)?;
    let sep = vm.opt_string(2, "")?;
    let first = vm.opt_integer(3, 1)?;
    let default_last = t.borrow().length();
    let last = vm.opt_integer(4, default_last)?;
    let mut out: Vec<u8> = Vec::new();
    let mut i = first;
    while i <= last {
        let v = t.borrow().raw_get_int(i);
        match &v {
            LuaValue::String(s) => out.extend_from_slice(s.as_bytes()),
            LuaValue::Integer(_) | LuaValue::Float(_) => {
                out.extend_from_slice(v.to_string().as_bytes());
            }
            _ => {
                let name = vm.native_name();
                return Err(vm.runtime_error(format!(
                    "invalid value (at index {}) in table for '{}'",
                    i, name
                )));
            }
        }
        if i < last {
            out.extend_from_slice(sep.as_bytes());
        }
        i += 1;
    }
    Ok(NativeReturn::one(vm.new_string_bytes(out)))
}

fn tbl_unpack(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t = vm.check_table(1)?;
    let first = vm.opt_integer(2, 1)?;
    let default_last = t.borrow().length();
    let last = vm.opt_integer(3, default_last)?;
    if first > last {
        return Ok(NativeReturn::none());
    }
    let count = (last - first + 1) as usize;
    if count > 1_000_000 {
        return Err(vm.runtime_error("too many results to unpack"));
    }
    let mut out = Vec::with_capacity(count);
    let mut i = first;
    while i <= last {
        out.push(t.borrow().raw_get_int(i));
        i += 1;
    }
    Ok(NativeReturn::Values(out))
}

fn tbl_pack(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let args = vm.args_vec();
    let mut t = crate::lua_value::LuaTable::with_capacity(args.len(), 1);
    for (i, v) in args.iter().enumerate() {
        t.raw_set_int(i as i64 + 1, v.clone());
    }
    let n_key = vm.new_string("n");
    let _ = t.raw_set(n_key, LuaValue::Integer(args.len() as i64));
    Ok(NativeReturn::one(LuaValue::table(t)))
}

fn tbl_move(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let a1 = vm.check_table(1)?;
    let f = vm.check_integer(2)?;
    let e = vm.check_integer(3)?;
    let t = vm.check_integer(4)?;
    let a2 = if vm.arg(5).is_nil() {
        a1.clone()
    } else {
        vm.check_table(5)?
    };
    if e >= f {
        if t > f && t <= e && std::rc::Rc::ptr_eq(&a1, &a2) {
            // overlapping move within one table: copy backwards
            let mut i = e;
            while i >= f {
                let v = a1.borrow().raw_get_int(i);
                a2.borrow_mut().raw_set_int(t + (i - f), v);
                i -= 1;
            }
        } else {
            let mut i = f;
            while i <= e {
                let v = a1.borrow().raw_get_int(i);
                a2.borrow_mut().raw_set_int(t + (i - f), v);
                i += 1;
            }
        }
    }
    Ok(NativeReturn::one(LuaValue::Table(a2)))
}

fn tbl_sort(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t = vm.check_table(1)?;
    let comparator = if vm.arg(2).is_nil() {
        None
    } else {
        Some(vm.check_function(2)?)
    };
    let len = t.borrow().length();
    let mut values: Vec<LuaValue> = Vec::with_capacity(len.max(0) as usize);
    for i in 1..=len {
        values.push(t.borrow().raw_get_int(i));
    }
    let sorted = merge_sort(vm, values, &comparator)?;
    for (i, v) in sorted.into_iter().enumerate() {
        t.borrow_mut().raw_set_int(i as i64 + 1, v);
    }
    Ok(NativeReturn::none())
}

fn less_than(
    vm: &mut LuaVM,
    comparator: &Option<LuaValue>,
    a: &LuaValue,
    b: &LuaValue,
) -> LuaResult<bool> {
    match comparator {
        Some(f) => {
            let vals = vm.call_value(f.clone(), vec![a.clone(), b.clone()])?;
            Ok(vals.first().map(|v| v.is_truthy()).unwrap_or(false))
        }
        None => vm.lt_values(a, b),
    }
}

/// Stable merge sort; comparator calls can error, so the whole sort is
/// fallible. A comparator claiming a < b and b < a is reported rather
/// than looping.
fn merge_sort(
    vm: &mut LuaVM,
    values: Vec<LuaValue>,
    comparator: &Option<LuaValue>,
) -> LuaResult<Vec<LuaValue>> {
    if values.len() <= 1 {
        return Ok(values);
    }
    let mid = values.len() / 2;
    let mut right = values;
    let left = right.drain(..mid).collect::<Vec<_>>();
    let left = merge_sort(vm, left, comparator)?;
    let right = merge_sort(vm, right, comparator)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut li = 0;
    let mut ri = 0;
    while li < left.len() && ri < right.len() {
        if less_than(vm, comparator, &right[ri], &left[li])? {
            if less_than(vm, comparator, &left[li], &right[ri])? {
                return Err(vm.runtime_error("invalid order function for sorting"));
            }
            out.push(right[ri].clone());
            ri += 1;
        } else {
            out.push(left[li].clone());
            li += 1;
        }
    }
    out.extend_from_slice(&left[li..]);
    out.extend_from_slice(&right[ri..]);
    Ok(out)
}
