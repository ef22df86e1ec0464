// The dispatch loop: fetch/decode/execute over the current context's
// frame stack. Calls push frames instead of recursing into the host
// stack, which is what keeps pcall bodies and metamethods yieldable.

use super::call::CloseOutcome;
use super::frame::{CloseAction, ResultSink};
use super::lua_error::{LuaError, LuaResult};
use super::metamethod::MetaEvent;
use super::opcode::{Instruction, OpCode, SETLIST_BATCH};
use super::LuaVM;
use crate::lua_value::{LuaClosure, LuaFunction, LuaTable, LuaUpvalue, LuaValue};
use std::rc::Rc;

pub(crate) enum Flow {
    Continue,
    Return(Vec<LuaValue>),
}

impl LuaVM {
    /// Run the dispatch loop until the entry frame (at index `floor`)
    /// returns. `yieldable` marks whether a Yield may pass through this
    /// run; synchronous host calls convert it into the C-boundary error.
    pub(crate) fn run(&mut self, floor: usize, yieldable: bool) -> LuaResult<Vec<LuaValue>> {
        loop {
            if self.frames_len() <= floor {
                return Ok(Vec::new());
            }
            // resume a to-be-closed chain before fetching instructions
            if self.cf().closing.is_some() {
                match self.advance_close_chain() {
                    Ok(CloseOutcome::Pushed) => continue,
                    Ok(CloseOutcome::FinishedContinue) => {}
                    Ok(CloseOutcome::FinishedReturn(vals)) => {
                        match self.pop_frame_with(vals)? {
                            Some(final_vals) => return Ok(final_vals),
                            None => continue,
                        }
                    }
                    Ok(CloseOutcome::FinishedError(err)) => {
                        match self.unwind_error(err, floor)? {
                            Some(final_vals) => return Ok(final_vals),
                            None => continue,
                        }
                    }
                    Err(err) => {
                        match self.dispatch_error(err, floor, yieldable)? {
                            Some(final_vals) => return Ok(final_vals),
                            None => continue,
                        }
                    }
                }
            }
            if let Err(err) = self.run_instruction_hooks() {
                match self.dispatch_error(err, floor, yieldable)? {
                    Some(final_vals) => return Ok(final_vals),
                    None => continue,
                }
            }
            let (pc, past_end) = {
                let frame = self.cf();
                (frame.pc, frame.pc >= frame.proto.code.len())
            };
            if past_end {
                match self.do_return(Vec::new())? {
                    Some(final_vals) => return Ok(final_vals),
                    None => continue,
                }
            }
            let instr = self.cf().proto.code[pc];
            self.cf_mut().pc = pc + 1;
            match self.exec_instr(instr) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(vals)) => return Ok(vals),
                Err(err) => match self.dispatch_error(err, floor, yieldable)? {
                    Some(final_vals) => return Ok(final_vals),
                    None => {}
                },
            }
        }
    }

    /// Route an instruction-level failure: yields pass through or become
    /// C-boundary errors; runtime errors unwind.
    fn dispatch_error(
        &mut self,
        err: LuaError,
        floor: usize,
        yieldable: bool,
    ) -> LuaResult<Option<Vec<LuaValue>>> {
        if err.is_yield() {
            if yieldable {
                return Err(err);
            }
            // frames above the floor cannot survive a failed suspension
            while self.frames_len() > floor {
                if let Some(mut frame) = self.context_mut().frames.pop() {
                    frame.close_upvalues_from(0);
                }
            }
            let boundary = self.error_plain("attempt to yield across a C-call boundary");
            return Err(boundary);
        }
        self.unwind_error(err, floor)
    }

    fn run_instruction_hooks(&mut self) -> LuaResult<()> {
        if !self.hook.active() {
            return Ok(());
        }
        if self.hook.count > 0 {
            self.hook.counter = self.hook.counter.saturating_sub(1);
            if self.hook.counter == 0 {
                self.hook.counter = self.hook.count;
                self.fire_hook("count", LuaValue::Nil)?;
            }
        }
        if self.hook.on_line {
            let frame = self.cf();
            let line = frame.proto.line_at(frame.pc);
            if line != frame.hook_line {
                self.cf_mut().hook_line = line;
                self.fire_hook("line", LuaValue::Integer(line as i64))?;
            }
        }
        Ok(())
    }

    fn exec_instr(&mut self, instr: Instruction) -> LuaResult<Flow> {
        let a = instr.a;
        let b = instr.b;
        let c = instr.c;
        match instr.op {
            OpCode::Move => {
                let v = self.reg(b as u32);
                self.set_reg(a, v);
            }
            OpCode::LoadK => {
                let v = self
                    .cf()
                    .proto
                    .constants
                    .get(b as usize)
                    .cloned()
                    .unwrap_or(LuaValue::Nil);
                self.set_reg(a, v);
            }
            OpCode::LoadBool => {
                self.set_reg(a, LuaValue::Boolean(b != 0));
                if c != 0 {
                    self.cf_mut().pc += 1;
                }
            }
            OpCode::LoadNil => {
                for i in 0..=b.max(0) as u32 {
                    self.set_reg(a + i, LuaValue::Nil);
                }
            }
            OpCode::GetUpval => {
                let cell = self.cf().upvalue(b as usize);
                let v = match cell {
                    Some(cell) => self.upvalue_get(&cell),
                    None => LuaValue::Nil,
                };
                self.set_reg(a, v);
            }
            OpCode::SetUpval => {
                let v = self.reg(a);
                if let Some(cell) = self.cf().upvalue(b as usize) {
                    self.upvalue_set(&cell, v);
                }
            }
            OpCode::GetTabUp => {
                let table = match self.cf().upvalue(b as usize) {
                    Some(cell) => self.upvalue_get(&cell),
                    None => LuaValue::Nil,
                };
                let key = self.rk(c);
                let hint = self.upvalue_obj_hint(b as usize);
                self.index_op(a, table, key, hint)?;
            }
            OpCode::GetTable => {
                let obj = self.reg(b as u32);
                let key = self.rk(c);
                let hint = self.operand_hint(b as u32);
                self.index_op(a, obj, key, hint)?;
            }
            OpCode::SetTabUp => {
                let table = match self.cf().upvalue(a as usize) {
                    Some(cell) => self.upvalue_get(&cell),
                    None => LuaValue::Nil,
                };
                let key = self.rk(b);
                let value = self.rk(c);
                let hint = self.upvalue_obj_hint(a as usize);
                self.newindex_op(table, key, value, hint)?;
            }
            OpCode::SetTable => {
                let obj = self.reg(a);
                let key = self.rk(b);
                let value = self.rk(c);
                let hint = self.operand_hint(a);
                self.newindex_op(obj, key, value, hint)?;
            }
            OpCode::NewTable => {
                let t = LuaTable::with_capacity(b.max(0) as usize, c.max(0) as usize);
                self.set_reg(a, LuaValue::table(t));
            }
            OpCode::GetMethod => {
                let obj = self.reg(b as u32);
                let key = self.rk(c);
                self.set_reg(a + 1, obj.clone());
                let hint = self.operand_hint(b as u32);
                self.index_op(a, obj, key, hint)?;
            }
            OpCode::Add
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
            | OpCode::Shr => {
                let vb = self.rk(b);
                let vc = self.rk(c);
                self.arith_binary(instr.op, a, vb, vc, b, c)?;
            }
            OpCode::Unm => {
                let v = self.reg(b as u32);
                self.arith_unary_minus(a, v, b as u32)?;
            }
            OpCode::BNot => {
                let v = self.reg(b as u32);
                self.bitwise_not(a, v, b as u32)?;
            }
            OpCode::Not => {
                let v = self.reg(b as u32);
                self.set_reg(a, LuaValue::Boolean(v.is_falsy()));
            }
            OpCode::Len => {
                let v = self.reg(b as u32);
                self.length_op(a, v, b as u32)?;
            }
            OpCode::Concat => {
                self.concat_op(a, b as u32, c as u32)?;
            }
            OpCode::Jmp => {
                let frame = self.cf_mut();
                frame.pc = (frame.pc as i64 + instr.sbx() as i64) as usize;
            }
            OpCode::Eq => {
                let vb = self.rk(b);
                let vc = self.rk(c);
                self.compare_eq(a != 0, vb, vc)?;
            }
            OpCode::Lt => {
                let vb = self.rk(b);
                let vc = self.rk(c);
                self.compare_order(OpCode::Lt, a != 0, vb, vc)?;
            }
            OpCode::Le => {
                let vb = self.rk(b);
                let vc = self.rk(c);
                self.compare_order(OpCode::Le, a != 0, vb, vc)?;
            }
            OpCode::Test => {
                let truthy = self.reg(a).is_truthy();
                if truthy != (c != 0) {
                    self.cf_mut().pc += 1;
                }
            }
            OpCode::TestSet => {
                let vb = self.reg(b as u32);
                if vb.is_truthy() == (c != 0) {
                    self.set_reg(a, vb);
                } else {
                    self.cf_mut().pc += 1;
                }
            }
            OpCode::Call => {
                let func = self.reg(a);
                let args = self.collect_args(a, b);
                let sink = ResultSink::Registers {
                    dest: a,
                    nresults: c - 1,
                };
                let call_name = self.callee_name(a);
                self.prepare_call(func, args, sink, None, call_name)?;
            }
            OpCode::TailCall => {
                return self.exec_tailcall(a, b);
            }
            OpCode::Return => {
                let vals = self.collect_returns(a, b);
                match self.do_return(vals)? {
                    Some(final_vals) => return Ok(Flow::Return(final_vals)),
                    None => {}
                }
            }
            OpCode::ForPrep => {
                self.exec_forprep(a, instr.sbx())?;
            }
            OpCode::ForLoop => {
                self.exec_forloop(a, instr.sbx())?;
            }
            OpCode::TForCall => {
                let func = self.reg(a);
                let args = vec![self.reg(a + 1), self.reg(a + 2)];
                let sink = ResultSink::Registers {
                    dest: a + 4,
                    nresults: c.max(1),
                };
                self.prepare_call(func, args, sink, None, Some("for iterator".to_string()))?;
            }
            OpCode::TForLoop => {
                let control = self.reg(a + 4);
                if !control.is_nil() {
                    self.set_reg(a + 2, control);
                    let frame = self.cf_mut();
                    frame.pc = (frame.pc as i64 + instr.sbx() as i64) as usize;
                }
            }
            OpCode::SetList => {
                self.exec_setlist(a, b, c)?;
            }
            OpCode::Closure => {
                self.exec_closure(a, b as usize)?;
            }
            OpCode::Vararg => {
                self.exec_vararg(a, b);
            }
            OpCode::Close => {
                let frame = self.cf_mut();
                frame.close_upvalues_from(a);
                if frame.tbc.iter().any(|e| e.register >= a) {
                    self.begin_close(a, None, CloseAction::Continue);
                }
            }
            OpCode::Tbc => {
                self.exec_tbc(a)?;
            }
        }
        Ok(Flow::Continue)
    }

    fn collect_args(&mut self, a: u32, b: i32) -> Vec<LuaValue> {
        if b > 0 {
            (1..b as u32).map(|i| self.reg(a + i)).collect()
        } else {
            let top = self.cf().top;
            ((a + 1) as usize..top).map(|i| self.reg(i as u32)).collect()
        }
    }

    fn collect_returns(&mut self, a: u32, b: i32) -> Vec<LuaValue> {
        if b > 0 {
            (0..(b - 1) as u32).map(|i| self.reg(a + i)).collect()
        } else {
            let top = self.cf().top;
            (a as usize..top).map(|i| self.reg(i as u32)).collect()
        }
    }

    fn exec_tailcall(&mut self, a: u32, b: i32) -> LuaResult<Flow> {
        let func = self.reg(a);
        let args = self.collect_args(a, b);
        if !self.cf().tbc.is_empty() {
            // close scopes still pending: degrade to a regular call; the
            // following Return completes the frame
            let sink = ResultSink::Registers {
                dest: a,
                nresults: -1,
            };
            self.prepare_call(func, args, sink, None, None)?;
            return Ok(Flow::Continue);
        }
        let mut frame = self
            .context_mut()
            .frames
            .pop()
            .expect("tailcall requires a frame");
        frame.close_upvalues_from(0);
        let sink = frame.sink;
        let protects = std::mem::take(&mut frame.protected);
        drop(frame);
        self.fire_call_hook("tail call")?;
        let depth_after_pop = self.frames_len();
        match self.prepare_call_carrying(func, args, sink, protects, None)? {
            Some(vals) => Ok(Flow::Return(vals)),
            None => {
                // a native callee routed its results below; only a pushed
                // Lua frame is marked as tail-called
                if self.frames_len() > depth_after_pop {
                    self.cf_mut().is_tail_call = true;
                }
                Ok(Flow::Continue)
            }
        }
    }

    fn exec_setlist(&mut self, a: u32, b: i32, c: i32) -> LuaResult<()> {
        let table = self.reg(a);
        let t = match table.as_table() {
            Some(t) => t,
            None => return Err(self.runtime_error("attempt to index a non-table in constructor")),
        };
        let count = if b > 0 {
            b as usize
        } else {
            self.cf().top.saturating_sub(a as usize + 1)
        };
        let start = (c as i64 - 1) * SETLIST_BATCH;
        for i in 1..=count {
            let v = self.reg(a + i as u32);
            t.borrow_mut().raw_set_int(start + i as i64, v);
        }
        Ok(())
    }

    fn exec_closure(&mut self, a: u32, proto_index: usize) -> LuaResult<()> {
        let proto = match self.cf().proto.protos.get(proto_index) {
            Some(p) => Rc::clone(p),
            None => return Err(self.runtime_error("bad closure prototype index")),
        };
        let mut upvalues = Vec::with_capacity(proto.upvalues.len());
        for desc in &proto.upvalues {
            if desc.in_stack {
                let cell = self.cf_mut().open_upvalue_at(desc.index as u32);
                upvalues.push(cell);
            } else {
                let cell = self
                    .cf()
                    .upvalue(desc.index as usize)
                    .unwrap_or_else(|| Rc::new(LuaUpvalue::closed(LuaValue::Nil)));
                upvalues.push(cell);
            }
        }
        let closure = LuaFunction::Lua(LuaClosure { proto, upvalues });
        self.set_reg(a, LuaValue::Function(Rc::new(closure)));
        Ok(())
    }

    fn exec_vararg(&mut self, a: u32, b: i32) {
        let varargs = self.cf().varargs.clone();
        if b > 0 {
            for i in 0..(b - 1) as usize {
                let v = varargs.get(i).cloned().unwrap_or(LuaValue::Nil);
                self.set_reg(a + i as u32, v);
            }
        } else {
            for (i, v) in varargs.iter().enumerate() {
                self.set_reg(a + i as u32, v.clone());
            }
            self.cf_mut().top = a as usize + varargs.len();
        }
    }

    fn exec_tbc(&mut self, a: u32) -> LuaResult<()> {
        let value = self.reg(a);
        if matches!(value, LuaValue::Nil | LuaValue::Boolean(false)) {
            return Ok(());
        }
        let frame = self.cf_mut();
        frame.tbc.push(super::frame::TbcEntry { register: a, value });
        Ok(())
    }

    // upvalue cells

    pub(crate) fn upvalue_get(&self, cell: &LuaUpvalue) -> LuaValue {
        use crate::lua_value::UpvalueState;
        let state = cell.state.borrow();
        match &*state {
            UpvalueState::Closed(v) => v.clone(),
            UpvalueState::Open { frame, register } => self.read_open_register(*frame, *register),
        }
    }

    pub(crate) fn upvalue_set(&mut self, cell: &LuaUpvalue, value: LuaValue) {
        use crate::lua_value::UpvalueState;
        let open_target = match &*cell.state.borrow() {
            UpvalueState::Open { frame, register } => Some((*frame, *register)),
            UpvalueState::Closed(_) => None,
        };
        match open_target {
            Some((frame, register)) => self.write_open_register(frame, register, value),
            None => {
                if let UpvalueState::Closed(v) = &mut *cell.state.borrow_mut() {
                    *v = value;
                }
            }
        }
    }

    /// Find a live frame by id: current and outer contexts first, then
    /// suspended coroutine stacks.
    fn read_open_register(&self, frame_id: u64, register: u32) -> LuaValue {
        for ctx in self.contexts.iter().rev() {
            for frame in ctx.frames.iter().rev() {
                if frame.frame_id == frame_id {
                    return frame.reg(register);
                }
            }
        }
        for weak in &self.known_threads {
            if let Some(thread) = weak.upgrade() {
                let thread = thread.borrow();
                for frame in thread.frames.iter().rev() {
                    if frame.frame_id == frame_id {
                        return frame.reg(register);
                    }
                }
            }
        }
        LuaValue::Nil
    }

    fn write_open_register(&mut self, frame_id: u64, register: u32, value: LuaValue) {
        for ctx in self.contexts.iter_mut().rev() {
            for frame in ctx.frames.iter_mut().rev() {
                if frame.frame_id == frame_id {
                    frame.set_reg(register, value);
                    return;
                }
            }
        }
        for weak in &self.known_threads {
            if let Some(thread) = weak.upgrade() {
                let mut thread = thread.borrow_mut();
                for frame in thread.frames.iter_mut().rev() {
                    if frame.frame_id == frame_id {
                        frame.set_reg(register, value);
                        return;
                    }
                }
            }
        }
    }
}
