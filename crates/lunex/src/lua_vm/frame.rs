// Call frames. Each frame owns a register window; open upvalues and
// to-be-closed registrations are per frame and die with it.

use std::rc::Rc;

use crate::lua_value::{LuaFunction, LuaUpvalue, LuaValue, Proto};

/// Where a callee's results go when its frame is popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSink {
    /// write into the caller's registers at `dest`; nresults < 0 means all
    /// results, adjusting the caller's top
    Registers { dest: u32, nresults: i32 },
    /// single result feeds a comparison metamethod: the caller skips its
    /// pending jump when truthiness differs from `expect`
    Compare { expect: bool },
    /// one step of a to-be-closed chain in the caller; results discarded
    CloseStep,
    /// results leave the dispatch loop (entry frame of a run)
    Final,
}

/// One `<close>` registration: the register and the value captured at
/// declaration time (used even if the register is later overwritten).
#[derive(Clone)]
pub struct TbcEntry {
    pub register: u32,
    pub value: LuaValue,
}

/// What to do once a frame's close chain has drained.
pub enum CloseAction {
    /// finish the interrupted RETURN with these values
    Return(Vec<LuaValue>),
    /// explicit CLOSE opcode: fall back into the dispatch loop
    Continue,
    /// keep propagating the in-flight error
    Propagate,
}

/// In-progress traversal of a frame's TBC list. Saved with the frame, so a
/// coroutine suspended inside a `__close` handler resumes mid-chain.
pub struct CloseState {
    /// remaining entries, closed from the back (LIFO)
    pub pending: Vec<TbcEntry>,
    /// current in-flight error, threaded through every handler
    pub error: Option<LuaValue>,
    pub action: CloseAction,
}

pub struct CallFrame {
    pub frame_id: u64,
    /// always the Lua variant; native calls never get a frame
    pub closure: Rc<LuaFunction>,
    pub proto: Rc<Proto>,
    pub pc: usize,
    pub registers: Vec<LuaValue>,
    /// live register count, tracked across multi-value operations
    pub top: usize,
    pub varargs: Vec<LuaValue>,
    /// open upvalues pointing into this frame, sorted by register
    pub open_upvalues: Vec<(u32, Rc<LuaUpvalue>)>,
    /// to-be-closed registrations in registration order
    pub tbc: Vec<TbcEntry>,
    pub sink: ResultSink,
    /// protection boundaries carried by this call: None entries are pcall,
    /// Some(msgh) entries are xpcall; the last entry is the innermost
    pub protected: Vec<Option<LuaValue>>,
    pub is_tail_call: bool,
    /// true while this frame runs a __close metamethod
    pub is_close_frame: bool,
    pub closing: Option<CloseState>,
    /// name the call site used, for tracebacks and error hints
    pub call_name: Option<String>,
    /// last line reported to the line hook
    pub hook_line: u32,
}

impl CallFrame {
    pub fn new(
        frame_id: u64,
        closure: Rc<LuaFunction>,
        proto: Rc<Proto>,
        args: Vec<LuaValue>,
        sink: ResultSink,
    ) -> Self {
        let nparams = proto.num_params as usize;
        let mut registers = vec![LuaValue::Nil; (proto.max_stack_size as usize).max(nparams)];
        let mut varargs = Vec::new();
        for (i, arg) in args.into_iter().enumerate() {
            if i < nparams {
                registers[i] = arg;
            } else if proto.is_vararg {
                varargs.push(arg);
            }
        }
        let top = registers.len();
        CallFrame {
            frame_id,
            closure,
            proto,
            pc: 0,
            registers,
            top,
            varargs,
            open_upvalues: Vec::new(),
            tbc: Vec::new(),
            sink,
            protected: Vec::new(),
            is_tail_call: false,
            is_close_frame: false,
            closing: None,
            call_name: None,
            hook_line: 0,
        }
    }

    #[inline(always)]
    pub fn reg(&self, i: u32) -> LuaValue {
        self.registers.get(i as usize).cloned().unwrap_or(LuaValue::Nil)
    }

    #[inline(always)]
    pub fn set_reg(&mut self, i: u32, value: LuaValue) {
        let i = i as usize;
        if i >= self.registers.len() {
            self.registers.resize(i + 1, LuaValue::Nil);
        }
        self.registers[i] = value;
    }

    /// Upvalues of the underlying closure.
    pub fn upvalue(&self, i: usize) -> Option<Rc<LuaUpvalue>> {
        self.closure.as_lua()?.upvalues.get(i).cloned()
    }

    /// Find or create the open upvalue cell for `register`.
    pub fn open_upvalue_at(&mut self, register: u32) -> Rc<LuaUpvalue> {
        match self.open_upvalues.binary_search_by_key(&register, |(r, _)| *r) {
            Ok(pos) => Rc::clone(&self.open_upvalues[pos].1),
            Err(pos) => {
                let cell = Rc::new(LuaUpvalue::open(self.frame_id, register));
                self.open_upvalues.insert(pos, (register, Rc::clone(&cell)));
                cell
            }
        }
    }

    /// Close every open upvalue with register >= `from`, copying the
    /// current register values into the cells.
    pub fn close_upvalues_from(&mut self, from: u32) {
        let split = self
            .open_upvalues
            .binary_search_by_key(&from, |(r, _)| *r)
            .unwrap_or_else(|pos| pos);
        for (register, cell) in self.open_upvalues.split_off(split) {
            cell.close(self.reg(register));
        }
    }

    /// Take the TBC entries with register >= `from`, preserving LIFO order
    /// for the close chain.
    pub fn take_tbc_from(&mut self, from: u32) -> Vec<TbcEntry> {
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        for entry in self.tbc.drain(..) {
            if entry.register >= from {
                taken.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.tbc = kept;
        taken
    }

    pub fn current_line(&self) -> u32 {
        // pc has usually advanced past the faulting instruction
        self.proto.line_at(self.pc.saturating_sub(1))
    }
}
