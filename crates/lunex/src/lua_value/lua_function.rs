// Function objects: compiled prototypes, Lua closures, native functions.

use smol_str::SmolStr;
use std::cell::RefCell;
use std::rc::Rc;

use super::{LuaUpvalue, LuaValue};
use crate::lua_vm::{CFunction, Instruction};

/// Upvalue descriptor of a prototype: where the enclosing function finds
/// the captured variable when instantiating a closure.
#[derive(Debug, Clone)]
pub struct UpvalDesc {
    pub name: SmolStr,
    /// true: captures a register of the enclosing frame; false: re-captures
    /// one of the enclosing closure's own upvalues
    pub in_stack: bool,
    pub index: u8,
}

/// Debug record for one local variable slot.
#[derive(Debug, Clone)]
pub struct LocalVar {
    pub name: SmolStr,
    /// first pc where the variable is active
    pub start_pc: u32,
    /// first pc where the variable is dead
    pub end_pc: u32,
    pub register: u32,
}

/// The compiled representation of a single Lua function.
pub struct Proto {
    pub code: Vec<Instruction>,
    pub constants: Vec<LuaValue>,
    pub protos: Vec<Rc<Proto>>,
    pub upvalues: Vec<UpvalDesc>,
    pub locals: Vec<LocalVar>,
    /// source line per instruction, parallel to `code`
    pub line_info: Vec<u32>,
    pub source: String,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u32,
    pub line_defined: u32,
    pub last_line_defined: u32,
}

impl Proto {
    pub fn line_at(&self, pc: usize) -> u32 {
        match self.line_info.get(pc) {
            Some(line) => *line,
            None => self.line_info.last().copied().unwrap_or(0),
        }
    }

    /// Name of the local occupying `register` while `pc` is live, if any.
    pub fn local_name_at(&self, register: u32, pc: u32) -> Option<&str> {
        self.locals
            .iter()
            .find(|l| l.register == register && l.start_pc <= pc && pc < l.end_pc)
            .map(|l| l.name.as_str())
    }

    /// The n-th active local (1-based) at `pc`, for debug.getlocal.
    pub fn active_local(&self, n: usize, pc: u32) -> Option<&LocalVar> {
        self.locals
            .iter()
            .filter(|l| l.start_pc <= pc && pc < l.end_pc)
            .nth(n.checked_sub(1)?)
    }

    pub fn is_main_chunk(&self) -> bool {
        self.line_defined == 0
    }
}

/// A Lua closure: a prototype plus its captured upvalues.
pub struct LuaClosure {
    pub proto: Rc<Proto>,
    pub upvalues: Vec<Rc<LuaUpvalue>>,
}

/// A function implemented in Rust, callable from Lua.
pub struct NativeFunction {
    pub name: String,
    pub func: CFunction,
    /// bound upvalues, e.g. the iteration state of gmatch
    pub upvalues: RefCell<Vec<LuaValue>>,
}

pub enum LuaFunction {
    Lua(LuaClosure),
    Native(NativeFunction),
}

impl LuaFunction {
    pub fn native(name: impl Into<String>, func: CFunction) -> Self {
        LuaFunction::Native(NativeFunction {
            name: name.into(),
            func,
            upvalues: RefCell::new(Vec::new()),
        })
    }

    pub fn native_with_upvalues(
        name: impl Into<String>,
        func: CFunction,
        upvalues: Vec<LuaValue>,
    ) -> Self {
        LuaFunction::Native(NativeFunction {
            name: name.into(),
            func,
            upvalues: RefCell::new(upvalues),
        })
    }

    pub fn is_native(&self) -> bool {
        matches!(self, LuaFunction::Native(_))
    }

    pub fn as_lua(&self) -> Option<&LuaClosure> {
        match self {
            LuaFunction::Lua(c) => Some(c),
            LuaFunction::Native(_) => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeFunction> {
        match self {
            LuaFunction::Native(n) => Some(n),
            LuaFunction::Lua(_) => None,
        }
    }
}
