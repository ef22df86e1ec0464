// OS library: time/date via chrono, environment access, file
// remove/rename through the filesystem protocol.

use chrono::{Datelike, Local, TimeZone, Timelike, Utc};

use crate::lib_registry;
use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM, NativeReturn};

pub fn open(vm: &mut LuaVM) {
    let module = crate::lib_module!("os", {
        "time" => os_time,
        "clock" => os_clock,
        "date" => os_date,
        "difftime" => os_difftime,
        "getenv" => os_getenv,
        "remove" => os_remove,
        "rename" => os_rename,
        "exit" => os_exit,
    });
    lib_registry::load_module(vm, &module);
}

fn os_time(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    if let Some(t) = vm.arg(1).as_table() {
        let field = |vm: &mut LuaVM, name: &str, default: Option<i64>| -> LuaResult<i64> {
            let v = t.borrow().raw_get_str(name);
            match v.as_integer() {
                Some(i) => Ok(i),
                None => match default {
                    Some(d) => Ok(d),
                    None => Err(vm.error_plain(format!(
                        "field '{}' missing in date table",
                        name
                    ))),
                },
            }
        };
        let year = field(vm, "year", None)?;
        let month = field(vm, "month", None)?;
        let day = field(vm, "day", None)?;
        let hour = field(vm, "hour", Some(12))?;
        let min = field(vm, "min", Some(0))?;
        let sec = field(vm, "sec", Some(0))?;
        let when = Local
            .with_ymd_and_hms(
                year as i32,
                month as u32,
                day as u32,
                hour as u32,
                min as u32,
                sec as u32,
            )
            .single();
        return match when {
            Some(dt) => Ok(NativeReturn::one(LuaValue::Integer(dt.timestamp()))),
            None => Ok(NativeReturn::one(LuaValue::Nil)),
        };
    }
    Ok(NativeReturn::one(LuaValue::Integer(Utc::now().timestamp())))
}

fn os_clock(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let _ = vm;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(NativeReturn::one(LuaValue::Float(now)))
}

fn os_difftime(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t2 = vm.check_number(1)?;
    let t1 = vm.check_number(2)?;
    Ok(NativeReturn::one(LuaValue::Float(t2 - t1)))
}

/// strftime subset: %Y %m %d %H %M %S %y %p %A %B %c %x %X %%, plus the
/// `*t` table form.
fn os_date(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let fmt = vm.opt_string(1, "%c")?.as_str_lossy().into_owned();
    let when = if vm.arg(2).is_nil() {
        Utc::now().timestamp()
    } else {
        vm.check_integer(2)?
    };
    let (fmt, utc) = match fmt.strip_prefix('!') {
        Some(rest) => (rest.to_string(), true),
        None => (fmt, false),
    };
    let render = |fmt: &str| -> String {
        if utc {
            match Utc.timestamp_opt(when, 0).single() {
                Some(dt) => dt.format(fmt).to_string(),
                None => String::new(),
            }
        } else {
            match Local.timestamp_opt(when, 0).single() {
                Some(dt) => dt.format(fmt).to_string(),
                None => String::new(),
            }
        }
    };
    if fmt == "*t" || fmt == "!*t" {
        let dt = match Local.timestamp_opt(when, 0).single() {
            Some(dt) => dt,
            None => return Ok(NativeReturn::one(LuaValue::Nil)),
        };
        let mut t = LuaTable::new();
        let mut set = |name: &str, v: i64| {
            let _ = t.raw_set(LuaValue::string(name), LuaValue::Integer(v));
        };
        set("year", dt.year() as i64);
        set("month", dt.month() as i64);
        set("day", dt.day() as i64);
        set("hour", dt.hour() as i64);
        set("min", dt.minute() as i64);
        set("sec", dt.second() as i64);
        set("wday", dt.weekday().number_from_sunday() as i64);
        set("yday", dt.ordinal() as i64);
        let _ = t.raw_set(LuaValue::string("isdst"), LuaValue::Boolean(false));
        return Ok(NativeReturn::one(LuaValue::table(t)));
    }
    let rendered = render(&fmt);
    Ok(NativeReturn::one(vm.new_string(rendered)))
}

fn os_getenv(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let name = vm.check_string(1)?.as_str_lossy().into_owned();
    match std::env::var(&name) {
        Ok(value) => Ok(NativeReturn::one(vm.new_string(value))),
        Err(_) => Ok(NativeReturn::one(LuaValue::Nil)),
    }
}

fn os_remove(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let path = vm.check_string(1)?.as_str_lossy().into_owned();
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(NativeReturn::one(LuaValue::Boolean(true))),
        Err(e) => Ok(NativeReturn::Values(vec![
            LuaValue::Nil,
            vm.new_string(format!("{}: {}", path, e)),
        ])),
    }
}

fn os_rename(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let from = vm.check_string(1)?.as_str_lossy().into_owned();
    let to = vm.check_string(2)?.as_str_lossy().into_owned();
    match std::fs::rename(&from, &to) {
        Ok(()) => Ok(NativeReturn::one(LuaValue::Boolean(true))),
        Err(e) => Ok(NativeReturn::Values(vec![
            LuaValue::Nil,
            vm.new_string(format!("{} -> {}: {}", from, to, e)),
        ])),
    }
}

fn os_exit(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let code = match vm.arg(1) {
        LuaValue::Nil | LuaValue::Boolean(true) => 0,
        LuaValue::Boolean(false) => 1,
        _ => vm.check_integer(1)? as i32,
    };
    std::process::exit(code);
}
