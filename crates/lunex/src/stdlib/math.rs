// Math library, with the integer/float split surface of 5.4
// (math.type, tointeger, ult, maxinteger/mininteger).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;

use crate::lib_registry;
use crate::lua_value::{number, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM, NativeReturn};

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0x2545F4914F6CDD1D));
}

pub fn open(vm: &mut LuaVM) {
    let module = crate::lib_module!("math", {
        "floor" => math_floor,
        "ceil" => math_ceil,
        "abs" => math_abs,
        "sqrt" => math_sqrt,
        "exp" => math_exp,
        "log" => math_log,
        "sin" => math_sin,
        "cos" => math_cos,
        "tan" => math_tan,
        "max" => math_max,
        "min" => math_min,
        "fmod" => math_fmod,
        "modf" => math_modf,
        "tointeger" => math_tointeger,
        "type" => math_type,
        "ult" => math_ult,
        "random" => math_random,
        "randomseed" => math_randomseed,
    });
    let table = lib_registry::load_module(vm, &module);
    if let LuaValue::Table(t) = &table {
        let mut t = t.borrow_mut();
        let _ = t.raw_set(LuaValue::string("pi"), LuaValue::Float(std::f64::consts::PI));
        let _ = t.raw_set(LuaValue::string("huge"), LuaValue::Float(f64::INFINITY));
        let _ = t.raw_set(
            LuaValue::string("maxinteger"),
            LuaValue::Integer(i64::MAX),
        );
        let _ = t.raw_set(
            LuaValue::string("mininteger"),
            LuaValue::Integer(i64::MIN),
        );
    }
}

fn math_floor(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    if let Some(i) = vm.arg(1).as_integer_strict() {
        return Ok(NativeReturn::one(LuaValue::Integer(i)));
    }
    let f = vm.check_number(1)?.floor();
    Ok(NativeReturn::one(match number::float_to_integer(f) {
        Some(i) => LuaValue::Integer(i),
        None => LuaValue::Float(f),
    }))
}

fn math_ceil(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    if let Some(i) = vm.arg(1).as_integer_strict() {
        return Ok(NativeReturn::one(LuaValue::Integer(i)));
    }
    let f = vm.check_number(1)?.ceil();
    Ok(NativeReturn::one(match number::float_to_integer(f) {
        Some(i) => LuaValue::Integer(i),
        None => LuaValue::Float(f),
    }))
}

fn math_abs(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    match vm.check_any(1)? {
        LuaValue::Integer(i) => Ok(NativeReturn::one(LuaValue::Integer(i.wrapping_abs()))),
        LuaValue::Float(f) => Ok(NativeReturn::one(LuaValue::Float(f.abs()))),
        _ => {
            let f = vm.check_number(1)?;
            Ok(NativeReturn::one(LuaValue::Float(f.abs())))
        }
    }
}

fn math_sqrt(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_number(1)?;
    Ok(NativeReturn::one(LuaValue::Float(f.sqrt())))
}

fn math_exp(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_number(1)?;
    Ok(NativeReturn::one(LuaValue::Float(f.exp())))
}

fn math_log(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let x = vm.check_number(1)?;
    let result = if vm.arg(2).is_nil() {
        x.ln()
    } else {
        let base = vm.check_number(2)?;
        if base == 2.0 {
            x.log2()
        } else if base == 10.0 {
            x.log10()
        } else {
            x.ln() / base.ln()
        }
    };
    Ok(NativeReturn::one(LuaValue::Float(result)))
}

fn math_sin(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_number(1)?;
    Ok(NativeReturn::one(LuaValue::Float(f.sin())))
}

fn math_cos(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_number(1)?;
    Ok(NativeReturn::one(LuaValue::Float(f.cos())))
}

fn math_tan(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_number(1)?;
    Ok(NativeReturn::one(LuaValue::Float(f.tan())))
}

fn math_max(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let mut best = vm.check_any(1)?;
    for i in 2..=vm.arg_count() {
        let v = vm.check_any(i)?;
        if vm.lt_values(&best, &v)? {
            best = v;
        }
    }
    Ok(NativeReturn::one(best))
}

fn math_min(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let mut best = vm.check_any(1)?;
    for i in 2..=vm.arg_count() {
        let v = vm.check_any(i)?;
        if vm.lt_values(&v, &best)? {
            best = v;
        }
    }
    Ok(NativeReturn::one(best))
}

fn math_fmod(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let a = vm.arg(1);
    let b = vm.arg(2);
    if let (LuaValue::Integer(x), LuaValue::Integer(y)) = (&a, &b) {
        if *y == 0 {
            let name = vm.native_name();
            return Err(vm.runtime_error(format!(
                "bad argument #2 to '{}' (zero)",
                name
            )));
        }
        return Ok(NativeReturn::one(LuaValue::Integer(x.wrapping_rem(*y))));
    }
    let x = vm.check_number(1)?;
    let y = vm.check_number(2)?;
    Ok(NativeReturn::one(LuaValue::Float(x % y)))
}

fn math_modf(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_number(1)?;
    let whole = f.trunc();
    let frac = if f.is_infinite() { 0.0 } else { f - whole };
    let whole_value = match number::float_to_integer(whole) {
        Some(i) => LuaValue::Float(i as f64),
        None => LuaValue::Float(whole),
    };
    Ok(NativeReturn::Values(vec![whole_value, LuaValue::Float(frac)]))
}

fn math_tointeger(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    Ok(NativeReturn::one(match v.as_integer() {
        Some(i) => LuaValue::Integer(i),
        None => LuaValue::Nil,
    }))
}

fn math_type(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    Ok(NativeReturn::one(match v {
        LuaValue::Integer(_) => vm.new_string("integer"),
        LuaValue::Float(_) => vm.new_string("float"),
        _ => LuaValue::Nil,
    }))
}

fn math_ult(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let a = vm.check_integer(1)? as u64;
    let b = vm.check_integer(2)? as u64;
    Ok(NativeReturn::one(LuaValue::Boolean(a < b)))
}

fn math_random(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    match vm.arg_count() {
        0 => {
            let f: f64 = RNG.with(|rng| rng.borrow_mut().gen_range(0.0..1.0));
            Ok(NativeReturn::one(LuaValue::Float(f)))
        }
        1 => {
            let upper = vm.check_integer(1)?;
            if upper < 1 {
                let name = vm.native_name();
                return Err(vm.runtime_error(format!(
                    "bad argument #1 to '{}' (interval is empty)",
                    name
                )));
            }
            let v: i64 = RNG.with(|rng| rng.borrow_mut().gen_range(1..=upper));
            Ok(NativeReturn::one(LuaValue::Integer(v)))
        }
        _ => {
            let lower = vm.check_integer(1)?;
            let upper = vm.check_integer(2)?;
            if lower > upper {
                let name = vm.native_name();
                return Err(vm.runtime_error(format!(
                    "bad argument #2 to '{}' (interval is empty)",
                    name
                )));
            }
            let v: i64 = RNG.with(|rng| rng.borrow_mut().gen_range(lower..=upper));
            Ok(NativeReturn::one(LuaValue::Integer(v)))
        }
    }
}

fn math_randomseed(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let seed = vm.opt_integer(1, 0)?;
    RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed as u64));
    Ok(NativeReturn::none())
}
