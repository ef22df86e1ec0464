// Coroutine library over the VM scheduler.

use crate::lib_registry;
use crate::lua_value::{LuaFunction, LuaValue, ThreadStatus};
use crate::lua_vm::{LuaResult, LuaVM, NativeReturn};

pub fn open(vm: &mut LuaVM) {
    let module = crate::lib_module!("coroutine", {
        "create" => co_create,
        "resume" => co_resume,
        "yield" => co_yield,
        "status" => co_status,
        "running" => co_running,
        "isyieldable" => co_isyieldable,
        "wrap" => co_wrap,
        "close" => co_close,
    });
    lib_registry::load_module(vm, &module);
}

fn co_create(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_function(1)?;
    Ok(NativeReturn::one(vm.create_coroutine(f)))
}

fn co_resume(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let co = vm.check_thread(1)?;
    let args = vm.args_from(2);
    match vm.resume_coroutine(co, args) {
        Ok(mut vals) => {
            let mut results = Vec::with_capacity(vals.len() + 1);
            results.push(LuaValue::Boolean(true));
            results.append(&mut vals);
            Ok(NativeReturn::Values(results))
        }
        Err(err) => Ok(NativeReturn::Values(vec![
            LuaValue::Boolean(false),
            err.value(),
        ])),
    }
}

fn co_yield(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let vals = vm.args_vec();
    Err(vm.do_yield(vals))
}

fn co_status(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let co = vm.check_thread(1)?;
    let status = co.borrow().status;
    Ok(NativeReturn::one(vm.new_string(status.as_str())))
}

fn co_running(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    match vm.current_coroutine() {
        Some(co) => Ok(NativeReturn::Values(vec![
            LuaValue::Coroutine(co),
            LuaValue::Boolean(false),
        ])),
        None => {
            let main = vm.main_thread();
            Ok(NativeReturn::Values(vec![
                LuaValue::Coroutine(main),
                LuaValue::Boolean(true),
            ]))
        }
    }
}

fn co_isyieldable(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    Ok(NativeReturn::one(LuaValue::Boolean(vm.is_yieldable())))
}

/// coroutine.wrap: resume through a bound coroutine, re-raising errors in
/// the caller.
fn wrap_call(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let co = match vm.native_upvalue(0).as_thread() {
        Some(co) => co,
        None => return Err(vm.error_plain("wrapped coroutine is gone")),
    };
    let args = vm.args_vec();
    match vm.resume_coroutine(co, args) {
        Ok(vals) => Ok(NativeReturn::Values(vals)),
        Err(err) => Err(err),
    }
}

fn co_wrap(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_function(1)?;
    let co = vm.create_coroutine(f);
    let wrapper = LuaFunction::native_with_upvalues("wrap", wrap_call, vec![co]);
    Ok(NativeReturn::one(LuaValue::function(wrapper)))
}

fn co_close(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let co = vm.check_thread(1)?;
    {
        let status = co.borrow().status;
        if status == ThreadStatus::Running || status == ThreadStatus::Normal {
            return Err(vm.error_plain("cannot close a running coroutine"));
        }
    }
    match vm.close_coroutine(co)? {
        None => Ok(NativeReturn::one(LuaValue::Boolean(true))),
        Some(err) => Ok(NativeReturn::Values(vec![LuaValue::Boolean(false), err])),
    }
}
