// Indexing with metamethod chains. The opcode-level entry points push a
// frame when the handler is a function, so `__index` handlers can yield;
// the `_value` variants are synchronous for library use.

use super::frame::ResultSink;
use super::lua_error::LuaResult;
use super::metamethod::MetaEvent;
use super::LuaVM;
use crate::lua_value::LuaValue;

const CHAIN_LIMIT: usize = 100;

impl LuaVM {
    /// GETTABLE/GETTABUP/SELF: read `obj[key]` into register `dest`.
    pub(crate) fn index_op(
        &mut self,
        dest: u32,
        obj: LuaValue,
        key: LuaValue,
        hint: Option<String>,
    ) -> LuaResult<()> {
        let mut cur = obj;
        for _ in 0..CHAIN_LIMIT {
            if let LuaValue::Table(t) = &cur {
                let raw = t.borrow().raw_get(&key);
                if !raw.is_nil() {
                    self.set_reg(dest, raw);
                    return Ok(());
                }
                match self.get_metamethod(&cur, MetaEvent::Index) {
                    None => {
                        self.set_reg(dest, LuaValue::Nil);
                        return Ok(());
                    }
                    Some(handler) if handler.is_function() => {
                        let sink = ResultSink::Registers { dest, nresults: 1 };
                        self.prepare_call(handler, vec![cur, key], sink, None, None)?;
                        return Ok(());
                    }
                    Some(next) => {
                        cur = next;
                        continue;
                    }
                }
            }
            match self.get_metamethod(&cur, MetaEvent::Index) {
                None => {
                    let hint = hint.map(|h| format!(" ({})", h)).unwrap_or_default();
                    return Err(self.runtime_error(format!(
                        "attempt to index a {} value{}",
                        cur.type_name(),
                        hint
                    )));
                }
                Some(handler) if handler.is_function() => {
                    let sink = ResultSink::Registers { dest, nresults: 1 };
                    self.prepare_call(handler, vec![cur, key], sink, None, None)?;
                    return Ok(());
                }
                Some(next) => {
                    cur = next;
                }
            }
        }
        Err(self.runtime_error("'__index' chain too long; possible loop"))
    }

    /// SETTABLE/SETTABUP: write `obj[key] = value` with `__newindex`.
    pub(crate) fn newindex_op(
        &mut self,
        obj: LuaValue,
        key: LuaValue,
        value: LuaValue,
        hint: Option<String>,
    ) -> LuaResult<()> {
        let mut cur = obj;
        for _ in 0..CHAIN_LIMIT {
            if let LuaValue::Table(t) = &cur {
                let present = !t.borrow().raw_get(&key).is_nil();
                if present {
                    // key already there: raw assignment, no metamethod
                    if let Err(e) = t.borrow_mut().raw_set(key, value) {
                        return Err(self.runtime_error(e.message()));
                    }
                    return Ok(());
                }
                match self.get_metamethod(&cur, MetaEvent::NewIndex) {
                    None => {
                        if let Err(e) = t.borrow_mut().raw_set(key, value) {
                            return Err(self.runtime_error(e.message()));
                        }
                        return Ok(());
                    }
                    Some(handler) if handler.is_function() => {
                        let sink = ResultSink::Registers {
                            dest: 0,
                            nresults: 0,
                        };
                        self.prepare_call(handler, vec![cur, key, value], sink, None, None)?;
                        return Ok(());
                    }
                    Some(next) => {
                        cur = next;
                        continue;
                    }
                }
            }
            match self.get_metamethod(&cur, MetaEvent::NewIndex) {
                None => {
                    let hint = hint.map(|h| format!(" ({})", h)).unwrap_or_default();
                    return Err(self.runtime_error(format!(
                        "attempt to index a {} value{}",
                        cur.type_name(),
                        hint
                    )));
                }
                Some(handler) if handler.is_function() => {
                    let sink = ResultSink::Registers {
                        dest: 0,
                        nresults: 0,
                    };
                    self.prepare_call(handler, vec![cur, key, value], sink, None, None)?;
                    return Ok(());
                }
                Some(next) => {
                    cur = next;
                }
            }
        }
        Err(self.runtime_error("'__newindex' chain too long; possible loop"))
    }

    /// Synchronous `obj[key]` for library code.
    pub fn index_value(&mut self, obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
        let mut cur = obj.clone();
        for _ in 0..CHAIN_LIMIT {
            if let LuaValue::Table(t) = &cur {
                let raw = t.borrow().raw_get(key);
                if !raw.is_nil() {
                    return Ok(raw);
                }
                match self.get_metamethod(&cur, MetaEvent::Index) {
                    None => return Ok(LuaValue::Nil),
                    Some(handler) if handler.is_function() => {
                        let vals = self.call_value(handler, vec![cur, key.clone()])?;
                        return Ok(vals.into_iter().next().unwrap_or(LuaValue::Nil));
                    }
                    Some(next) => {
                        cur = next;
                        continue;
                    }
                }
            }
            match self.get_metamethod(&cur, MetaEvent::Index) {
                None => {
                    return Err(self.runtime_error(format!(
                        "attempt to index a {} value",
                        cur.type_name()
                    )));
                }
                Some(handler) if handler.is_function() => {
                    let vals = self.call_value(handler, vec![cur, key.clone()])?;
                    return Ok(vals.into_iter().next().unwrap_or(LuaValue::Nil));
                }
                Some(next) => {
                    cur = next;
                }
            }
        }
        Err(self.runtime_error("'__index' chain too long; possible loop"))
    }

    /// Synchronous `obj[key] = value` for library code.
    pub fn setindex_value(
        &mut self,
        obj: &LuaValue,
        key: LuaValue,
        value: LuaValue,
    ) -> LuaResult<()> {
        let mut cur = obj.clone();
        let mut key = key;
        let mut value = value;
        for _ in 0..CHAIN_LIMIT {
            if let LuaValue::Table(t) = &cur {
                let present = !t.borrow().raw_get(&key).is_nil();
                let handler = if present {
                    None
                } else {
                    self.get_metamethod(&cur, MetaEvent::NewIndex)
                };
                match handler {
                    None => {
                        if let Err(e) = t.borrow_mut().raw_set(key, value) {
                            return Err(self.runtime_error(e.message()));
                        }
                        return Ok(());
                    }
                    Some(h) if h.is_function() => {
                        self.call_value(h, vec![cur, key, value])?;
                        return Ok(());
                    }
                    Some(next) => {
                        cur = next;
                        continue;
                    }
                }
            }
            match self.get_metamethod(&cur, MetaEvent::NewIndex) {
                None => {
                    return Err(self.runtime_error(format!(
                        "attempt to index a {} value",
                        cur.type_name()
                    )));
                }
                Some(h) if h.is_function() => {
                    self.call_value(h, vec![cur, key, value])?;
                    return Ok(());
                }
                Some(next) => {
                    cur = next;
                }
            }
        }
        Err(self.runtime_error("'__newindex' chain too long; possible loop"))
    }
}
