// Metamethod resolution: event-keyed lookup on metatables, plus the
// shared helpers (tostring, metatable access with __metatable guard).

use std::cell::RefCell;
use std::rc::Rc;

use super::lua_error::LuaResult;
use super::LuaVM;
use crate::lua_value::{LuaTable, LuaValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaEvent {
    Index,
    NewIndex,
    Call,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    IDiv,
    BAnd,
    BOr,
    BXor,
    BNot,
    Shl,
    Shr,
    Concat,
    Len,
    Eq,
    Lt,
    Le,
    Close,
    Gc,
    ToString,
    Pairs,
    Name,
    Metatable,
}

impl MetaEvent {
    pub fn name(self) -> &'static str {
        match self {
            MetaEvent::Index => "__index",
            MetaEvent::NewIndex => "__newindex",
            MetaEvent::Call => "__call",
            MetaEvent::Add => "__add",
            MetaEvent::Sub => "__sub",
            MetaEvent::Mul => "__mul",
            MetaEvent::Div => "__div",
            MetaEvent::Mod => "__mod",
            MetaEvent::Pow => "__pow",
            MetaEvent::Unm => "__unm",
            MetaEvent::IDiv => "__idiv",
            MetaEvent::BAnd => "__band",
            MetaEvent::BOr => "__bor",
            MetaEvent::BXor => "__bxor",
            MetaEvent::BNot => "__bnot",
            MetaEvent::Shl => "__shl",
            MetaEvent::Shr => "__shr",
            MetaEvent::Concat => "__concat",
            MetaEvent::Len => "__len",
            MetaEvent::Eq => "__eq",
            MetaEvent::Lt => "__lt",
            MetaEvent::Le => "__le",
            MetaEvent::Close => "__close",
            MetaEvent::Gc => "__gc",
            MetaEvent::ToString => "__tostring",
            MetaEvent::Pairs => "__pairs",
            MetaEvent::Name => "__name",
            MetaEvent::Metatable => "__metatable",
        }
    }
}

impl LuaVM {
    /// Metatable of any value: tables and userdata carry their own;
    /// strings share the VM-wide string metatable.
    pub fn get_metatable(&self, v: &LuaValue) -> Option<Rc<RefCell<LuaTable>>> {
        match v {
            LuaValue::Table(_) | LuaValue::Userdata(_) => v.own_metatable(),
            LuaValue::String(_) => self.string_metatable.clone(),
            _ => None,
        }
    }

    /// Raw event lookup on a value's metatable.
    pub fn get_metamethod(&self, v: &LuaValue, event: MetaEvent) -> Option<LuaValue> {
        let mt = self.get_metatable(v)?;
        let handler = mt.borrow().raw_get_str(event.name());
        if handler.is_nil() {
            None
        } else {
            Some(handler)
        }
    }

    pub fn set_string_metatable(&mut self, mt: Rc<RefCell<LuaTable>>) {
        self.string_metatable = Some(mt);
    }

    /// tostring with `__tostring`/`__name` honored; used by print,
    /// string.format %s, and error display.
    pub fn tostring_value(&mut self, v: &LuaValue) -> LuaResult<LuaValue> {
        if let Some(handler) = self.get_metamethod(v, MetaEvent::ToString) {
            let vals = self.call_value(handler, vec![v.clone()])?;
            let result = vals.into_iter().next().unwrap_or(LuaValue::Nil);
            return match result {
                LuaValue::String(_) => Ok(result),
                LuaValue::Integer(_) | LuaValue::Float(_) => {
                    Ok(self.new_string(result.to_string()))
                }
                _ => Err(self.runtime_error("'__tostring' must return a string")),
            };
        }
        if let Some(name) = self.get_metamethod(v, MetaEvent::Name) {
            if let LuaValue::String(name) = name {
                let rendered = match v {
                    LuaValue::Table(t) => format!("{}: {:p}", name, Rc::as_ptr(t)),
                    LuaValue::Userdata(u) => format!("{}: {:p}", name, Rc::as_ptr(u)),
                    other => format!("{}: {}", name, other),
                };
                return Ok(self.new_string(rendered));
            }
        }
        Ok(self.new_string(v.to_string()))
    }
}
