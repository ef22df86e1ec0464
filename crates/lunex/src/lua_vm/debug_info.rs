// Frame introspection for the debug library: stack levels, local slots,
// and closure upvalues.

use super::LuaVM;
use crate::lua_value::{LuaFunction, LuaValue};

impl LuaVM {
    /// Number of Lua frames on the current context.
    pub fn stack_depth(&self) -> usize {
        self.context().frames.len()
    }

    /// Frame index for a debug level: level 1 is the innermost Lua frame.
    pub(crate) fn lua_frame_index(&self, level: usize) -> Option<usize> {
        let frames = &self.context().frames;
        if level == 0 || level > frames.len() {
            None
        } else {
            Some(frames.len() - level)
        }
    }

    /// debug.getlocal: the n-th active local of the frame at `level`.
    pub fn frame_local_get(&self, level: usize, n: usize) -> Option<(String, LuaValue)> {
        let idx = self.lua_frame_index(level)?;
        let frame = &self.context().frames[idx];
        let local = frame.proto.active_local(n, frame.pc as u32)?;
        let value = frame.reg(local.register);
        Some((local.name.to_string(), value))
    }

    /// debug.setlocal: write the n-th active local; returns its name.
    pub fn frame_local_set(&mut self, level: usize, n: usize, value: LuaValue) -> Option<String> {
        let idx = self.lua_frame_index(level)?;
        let frame = &mut self.contexts.last_mut()?.frames[idx];
        let (name, register) = {
            let local = frame.proto.active_local(n, frame.pc as u32)?;
            (local.name.to_string(), local.register)
        };
        frame.set_reg(register, value);
        Some(name)
    }

    /// debug.getupvalue.
    pub fn closure_upvalue_get(&self, func: &LuaValue, n: usize) -> Option<(String, LuaValue)> {
        let f = func.as_function()?;
        match f.as_ref() {
            LuaFunction::Lua(closure) => {
                let cell = closure.upvalues.get(n.checked_sub(1)?)?;
                let name = closure
                    .proto
                    .upvalues
                    .get(n - 1)
                    .map(|u| u.name.to_string())
                    .unwrap_or_default();
                Some((name, self.upvalue_get(cell)))
            }
            LuaFunction::Native(native) => {
                let value = native.upvalues.borrow().get(n.checked_sub(1)?).cloned()?;
                Some((String::new(), value))
            }
        }
    }

    /// debug.setupvalue; returns the upvalue name on success.
    pub fn closure_upvalue_set(&mut self, func: &LuaValue, n: usize, value: LuaValue) -> Option<String> {
        let f = func.as_function()?;
        match f.as_ref() {
            LuaFunction::Lua(closure) => {
                let cell = closure.upvalues.get(n.checked_sub(1)?)?.clone();
                let name = closure
                    .proto
                    .upvalues
                    .get(n - 1)
                    .map(|u| u.name.to_string())
                    .unwrap_or_default();
                self.upvalue_set(&cell, value);
                Some(name)
            }
            LuaFunction::Native(native) => {
                let mut upvalues = native.upvalues.borrow_mut();
                let slot = upvalues.get_mut(n.checked_sub(1)?)?;
                *slot = value;
                Some(String::new())
            }
        }
    }
}
