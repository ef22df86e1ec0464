// Name-hint resolver: a bounded backward scan over the current
// prototype's bytecode to describe where a faulting value came from,
// e.g. "local 'x'", "global 'print'", "field 'y'", "method 'run'".

use super::frame::CallFrame;
use super::opcode::{rk_is_const, Instruction, OpCode, RK_CONST_BASE};
use super::LuaVM;
use crate::lua_value::{LuaValue, Proto};

/// How far back the resolver looks for the write that produced a value.
const SCAN_WINDOW: usize = 20;

impl LuaVM {
    /// Hint for the value currently in `reg` of the top frame.
    pub(crate) fn operand_hint(&self, reg: u32) -> Option<String> {
        let frame = self.context().frames.last()?;
        register_hint(frame, reg)
    }

    /// Hint for an object read straight out of an upvalue (GETTABUP).
    pub(crate) fn upvalue_obj_hint(&self, upval_index: usize) -> Option<String> {
        let frame = self.context().frames.last()?;
        let name = frame.proto.upvalues.get(upval_index)?.name.clone();
        if name == "_ENV" {
            None
        } else {
            Some(format!("upvalue '{}'", name))
        }
    }

    /// Hint for the callee register of a CALL, also used as the frame's
    /// display name in tracebacks.
    pub(crate) fn callee_name(&self, reg: u32) -> Option<String> {
        self.operand_hint(reg)
    }
}

pub(crate) fn register_hint(frame: &CallFrame, reg: u32) -> Option<String> {
    let pc = frame.pc.saturating_sub(1);
    if let Some(name) = frame.proto.local_name_at(reg, pc as u32) {
        return Some(format!("local '{}'", name));
    }
    scan_back(&frame.proto, pc, reg, SCAN_WINDOW)
}

fn scan_back(proto: &Proto, from_pc: usize, reg: u32, window: usize) -> Option<String> {
    let start = from_pc.saturating_sub(window);
    let mut write_at: Option<usize> = None;
    for i in (start..from_pc.min(proto.code.len())).rev() {
        if writes_register(&proto.code[i], reg) {
            write_at = Some(i);
            break;
        }
    }
    let write_pc = write_at?;
    // a TEST/TESTSET between the write and the fault means the value may
    // have been chosen by short-circuit; no reliable name then
    for i in write_pc + 1..from_pc {
        let t = proto.code[i];
        let tested = match t.op {
            OpCode::Test => t.a == reg,
            OpCode::TestSet => t.a == reg || t.b == reg as i32,
            _ => false,
        };
        if tested {
            return None;
        }
    }
    let ins = proto.code[write_pc];
    match ins.op {
        OpCode::GetUpval => {
            let name = proto.upvalues.get(ins.b as usize)?.name.clone();
            Some(format!("upvalue '{}'", name))
        }
        OpCode::GetTabUp => {
            let key = const_str(proto, ins.c)?;
            let env = proto
                .upvalues
                .get(ins.b as usize)
                .map(|u| u.name.as_str() == "_ENV")
                .unwrap_or(false);
            if env {
                Some(format!("global '{}'", key))
            } else {
                Some(format!("field '{}'", key))
            }
        }
        OpCode::GetTable => {
            let key = const_str(proto, ins.c)?;
            Some(format!("field '{}'", key))
        }
        OpCode::GetMethod => {
            let key = const_str(proto, ins.c)?;
            Some(format!("method '{}'", key))
        }
        OpCode::Move => scan_back(proto, write_pc, ins.b as u32, window),
        _ => None,
    }
}

fn const_str(proto: &Proto, operand: i32) -> Option<String> {
    if !rk_is_const(operand) {
        return None;
    }
    match proto.constants.get((operand - RK_CONST_BASE) as usize) {
        Some(LuaValue::String(s)) => Some(s.as_str_lossy().into_owned()),
        _ => None,
    }
}

fn writes_register(ins: &Instruction, reg: u32) -> bool {
    match ins.op {
        OpCode::Move
        | OpCode::LoadK
        | OpCode::LoadBool
        | OpCode::GetUpval
        | OpCode::GetTabUp
        | OpCode::GetTable
        | OpCode::NewTable
        | OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Mod
        | OpCode::Pow
        | OpCode::Div
        | OpCode::IDiv
        | OpCode::BAnd
        | OpCode::BOr
        | OpCode::BXor
        | OpCode::Shl
        | OpCode::Shr
        | OpCode::Unm
        | OpCode::BNot
        | OpCode::Not
        | OpCode::Len
        | OpCode::Concat
        | OpCode::TestSet
        | OpCode::Closure => ins.a == reg,
        OpCode::GetMethod => ins.a == reg || ins.a + 1 == reg,
        OpCode::LoadNil => reg >= ins.a && reg <= ins.a + ins.b.max(0) as u32,
        OpCode::Vararg | OpCode::Call => reg >= ins.a,
        OpCode::TForCall => reg >= ins.a + 4,
        OpCode::ForPrep | OpCode::ForLoop => reg >= ins.a && reg <= ins.a + 3,
        _ => false,
    }
}
