// Arithmetic, bitwise, comparison and length semantics, including the
// Lua 5.4 integer/float rules and metamethod fallbacks.

use super::frame::ResultSink;
use super::lua_error::LuaResult;
use super::metamethod::MetaEvent;
use super::opcode::{rk_is_const, OpCode};
use super::LuaVM;
use crate::lua_value::number;
use crate::lua_value::LuaValue;

impl LuaVM {
    pub(crate) fn arith_binary(
        &mut self,
        op: OpCode,
        dest: u32,
        vb: LuaValue,
        vc: LuaValue,
        b_operand: i32,
        c_operand: i32,
    ) -> LuaResult<()> {
        if is_bitwise(op) {
            return self.bitwise_binary(op, dest, vb, vc, b_operand, c_operand);
        }
        let nb = vb.coerce_number();
        let nc = vc.coerce_number();
        if let (Some(nb), Some(nc)) = (nb, nc) {
            let result = arith_numeric(op, &nb, &nc, self)?;
            self.set_reg(dest, result);
            return Ok(());
        }
        self.arith_meta_fallback(op, dest, vb, vc, b_operand, c_operand)
    }

    fn arith_meta_fallback(
        &mut self,
        op: OpCode,
        dest: u32,
        vb: LuaValue,
        vc: LuaValue,
        b_operand: i32,
        c_operand: i32,
    ) -> LuaResult<()> {
        let event = arith_event(op);
        let handler = self
            .get_metamethod(&vb, event)
            .or_else(|| self.get_metamethod(&vc, event));
        match handler {
            Some(handler) => {
                let sink = ResultSink::Registers { dest, nresults: 1 };
                self.prepare_call(handler, vec![vb, vc], sink, None, None)?;
                Ok(())
            }
            None => {
                let (culprit, operand) = if vb.coerce_number().is_none() {
                    (vb, b_operand)
                } else {
                    (vc, c_operand)
                };
                let hint = if rk_is_const(operand) {
                    None
                } else {
                    self.operand_hint(operand as u32)
                };
                let hint = hint.map(|h| format!(" ({})", h)).unwrap_or_default();
                let verb = if is_bitwise(op) {
                    "perform bitwise operation on"
                } else {
                    "perform arithmetic on"
                };
                Err(self.runtime_error(format!(
                    "attempt to {} a {} value{}",
                    verb,
                    culprit.type_name(),
                    hint
                )))
            }
        }
    }

    fn bitwise_binary(
        &mut self,
        op: OpCode,
        dest: u32,
        vb: LuaValue,
        vc: LuaValue,
        b_operand: i32,
        c_operand: i32,
    ) -> LuaResult<()> {
        let ib = bitwise_operand(&vb);
        let ic = bitwise_operand(&vc);
        if let (Some(ib), Some(ic)) = (ib, ic) {
            let result = match op {
                OpCode::BAnd => ib & ic,
                OpCode::BOr => ib | ic,
                OpCode::BXor => ib ^ ic,
                OpCode::Shl => shift_left(ib, ic),
                OpCode::Shr => shift_left(ib, ic.wrapping_neg()),
                _ => unreachable!("bitwise opcode"),
            };
            self.set_reg(dest, LuaValue::Integer(result));
            return Ok(());
        }
        // numbers without an exact integer image fail before metamethods
        if (vb.is_number() && ib.is_none()) || (vc.is_number() && ic.is_none()) {
            return Err(self.runtime_error("number has no integer representation"));
        }
        self.arith_meta_fallback(op, dest, vb, vc, b_operand, c_operand)
    }

    pub(crate) fn arith_unary_minus(&mut self, dest: u32, v: LuaValue, reg: u32) -> LuaResult<()> {
        match v.coerce_number() {
            Some(LuaValue::Integer(i)) => {
                self.set_reg(dest, LuaValue::Integer(i.wrapping_neg()));
                Ok(())
            }
            Some(LuaValue::Float(f)) => {
                self.set_reg(dest, LuaValue::Float(-f));
                Ok(())
            }
            _ => match self.get_metamethod(&v, MetaEvent::Unm) {
                Some(handler) => {
                    let sink = ResultSink::Registers { dest, nresults: 1 };
                    self.prepare_call(handler, vec![v.clone(), v], sink, None, None)?;
                    Ok(())
                }
                None => {
                    let hint = self
                        .operand_hint(reg)
                        .map(|h| format!(" ({})", h))
                        .unwrap_or_default();
                    Err(self.runtime_error(format!(
                        "attempt to perform arithmetic on a {} value{}",
                        v.type_name(),
                        hint
                    )))
                }
            },
        }
    }

    pub(crate) fn bitwise_not(&mut self, dest: u32, v: LuaValue, reg: u32) -> LuaResult<()> {
        match bitwise_operand(&v) {
            Some(i) => {
                self.set_reg(dest, LuaValue::Integer(!i));
                Ok(())
            }
            None => {
                if v.is_number() {
                    return Err(self.runtime_error("number has no integer representation"));
                }
                match self.get_metamethod(&v, MetaEvent::BNot) {
                    Some(handler) => {
                        let sink = ResultSink::Registers { dest, nresults: 1 };
                        self.prepare_call(handler, vec![v.clone(), v], sink, None, None)?;
                        Ok(())
                    }
                    None => {
                        let hint = self
                            .operand_hint(reg)
                            .map(|h| format!(" ({})", h))
                            .unwrap_or_default();
                        Err(self.runtime_error(format!(
                            "attempt to perform bitwise operation on a {} value{}",
                            v.type_name(),
                            hint
                        )))
                    }
                }
            }
        }
    }

    pub(crate) fn length_op(&mut self, dest: u32, v: LuaValue, reg: u32) -> LuaResult<()> {
        match &v {
            LuaValue::String(s) => {
                self.set_reg(dest, LuaValue::Integer(s.len() as i64));
                Ok(())
            }
            LuaValue::Table(t) => {
                if let Some(handler) = self.get_metamethod(&v, MetaEvent::Len) {
                    let sink = ResultSink::Registers { dest, nresults: 1 };
                    self.prepare_call(handler, vec![v.clone()], sink, None, None)?;
                    return Ok(());
                }
                let len = t.borrow().length();
                self.set_reg(dest, LuaValue::Integer(len));
                Ok(())
            }
            _ => match self.get_metamethod(&v, MetaEvent::Len) {
                Some(handler) => {
                    let sink = ResultSink::Registers { dest, nresults: 1 };
                    self.prepare_call(handler, vec![v.clone()], sink, None, None)?;
                    Ok(())
                }
                None => {
                    let hint = self
                        .operand_hint(reg)
                        .map(|h| format!(" ({})", h))
                        .unwrap_or_default();
                    Err(self.runtime_error(format!(
                        "attempt to get length of a {} value{}",
                        v.type_name(),
                        hint
                    )))
                }
            },
        }
    }

    /// CONCAT folds right-to-left; `__concat` handlers run to completion
    /// on the current stack.
    pub(crate) fn concat_op(&mut self, dest: u32, first: u32, last: u32) -> LuaResult<()> {
        let mut acc = self.reg(last);
        let mut i = last;
        while i > first {
            i -= 1;
            let lhs = self.reg(i);
            acc = self.concat_pair(lhs, acc)?;
        }
        self.set_reg(dest, acc);
        Ok(())
    }

    pub(crate) fn concat_pair(&mut self, lhs: LuaValue, rhs: LuaValue) -> LuaResult<LuaValue> {
        if concatable(&lhs) && concatable(&rhs) {
            let mut bytes = concat_bytes(&lhs);
            bytes.extend_from_slice(&concat_bytes(&rhs));
            return Ok(self.new_string_bytes(bytes));
        }
        let handler = self
            .get_metamethod(&lhs, MetaEvent::Concat)
            .or_else(|| self.get_metamethod(&rhs, MetaEvent::Concat));
        match handler {
            Some(handler) => {
                let vals = self.call_value(handler, vec![lhs, rhs])?;
                Ok(vals.into_iter().next().unwrap_or(LuaValue::Nil))
            }
            None => {
                let culprit = if concatable(&lhs) { rhs } else { lhs };
                Err(self.runtime_error(format!(
                    "attempt to concatenate a {} value",
                    culprit.type_name()
                )))
            }
        }
    }

    // comparisons

    pub(crate) fn compare_eq(&mut self, expect: bool, vb: LuaValue, vc: LuaValue) -> LuaResult<()> {
        if vb.raw_equal(&vc) {
            if !expect {
                self.cf_mut().pc += 1;
            }
            return Ok(());
        }
        // __eq only applies between two tables or two userdata
        let meta_applies = matches!(
            (&vb, &vc),
            (LuaValue::Table(_), LuaValue::Table(_))
                | (LuaValue::Userdata(_), LuaValue::Userdata(_))
        );
        if meta_applies {
            let handler = self
                .get_metamethod(&vb, MetaEvent::Eq)
                .or_else(|| self.get_metamethod(&vc, MetaEvent::Eq));
            if let Some(handler) = handler {
                let sink = ResultSink::Compare { expect };
                self.prepare_call(handler, vec![vb, vc], sink, None, None)?;
                return Ok(());
            }
        }
        if expect {
            self.cf_mut().pc += 1;
        }
        Ok(())
    }

    pub(crate) fn compare_order(
        &mut self,
        op: OpCode,
        expect: bool,
        vb: LuaValue,
        vc: LuaValue,
    ) -> LuaResult<()> {
        if let Some(result) = raw_order(op, &vb, &vc) {
            if result != expect {
                self.cf_mut().pc += 1;
            }
            return Ok(());
        }
        let event = if op == OpCode::Lt {
            MetaEvent::Lt
        } else {
            MetaEvent::Le
        };
        let handler = self
            .get_metamethod(&vb, event)
            .or_else(|| self.get_metamethod(&vc, event));
        match handler {
            Some(handler) => {
                let sink = ResultSink::Compare { expect };
                self.prepare_call(handler, vec![vb, vc], sink, None, None)?;
                Ok(())
            }
            None => {
                let msg = if vb.type_name() == vc.type_name() {
                    format!("attempt to compare two {} values", vb.type_name())
                } else {
                    format!(
                        "attempt to compare {} with {}",
                        vb.type_name(),
                        vc.type_name()
                    )
                };
                Err(self.runtime_error(msg))
            }
        }
    }

    /// Ordering for use by library code (table.sort, math.min): same
    /// semantics as the Lt opcode with synchronous metamethods.
    pub(crate) fn lt_values(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if let Some(result) = raw_order(OpCode::Lt, a, b) {
            return Ok(result);
        }
        let handler = self
            .get_metamethod(a, MetaEvent::Lt)
            .or_else(|| self.get_metamethod(b, MetaEvent::Lt));
        match handler {
            Some(handler) => {
                let vals = self.call_value(handler, vec![a.clone(), b.clone()])?;
                Ok(vals.first().map(|v| v.is_truthy()).unwrap_or(false))
            }
            None => {
                let msg = if a.type_name() == b.type_name() {
                    format!("attempt to compare two {} values", a.type_name())
                } else {
                    format!("attempt to compare {} with {}", a.type_name(), b.type_name())
                };
                Err(self.runtime_error(msg))
            }
        }
    }

    // numeric for

    pub(crate) fn exec_forprep(&mut self, a: u32, sbx: i32) -> LuaResult<()> {
        let init = self.reg(a);
        let limit = self.reg(a + 1);
        let step = self.reg(a + 2);
        let all_int = matches!(
            (&init, &limit, &step),
            (
                LuaValue::Integer(_),
                LuaValue::Integer(_),
                LuaValue::Integer(_)
            )
        );
        if all_int {
            let init = init.as_integer_strict().unwrap_or(0);
            let limit = limit.as_integer_strict().unwrap_or(0);
            let step = step.as_integer_strict().unwrap_or(0);
            if step == 0 {
                return Err(self.runtime_error("'for' step is zero"));
            }
            let zero_trip = if step > 0 { init > limit } else { init < limit };
            if zero_trip {
                let frame = self.cf_mut();
                frame.pc = (frame.pc as i64 + sbx as i64) as usize;
                return Ok(());
            }
            // remaining iterations after the first, in unsigned space so
            // extreme ranges cannot overflow
            let count = if step > 0 {
                (limit as u64).wrapping_sub(init as u64) / (step as u64)
            } else {
                (init as u64).wrapping_sub(limit as u64) / (step.unsigned_abs())
            };
            self.set_reg(a, LuaValue::Integer(init));
            self.set_reg(a + 1, LuaValue::Integer(count as i64));
            self.set_reg(a + 3, LuaValue::Integer(init));
            return Ok(());
        }
        // float loop: every control value must be a number
        let init = match init.coerce_number().and_then(|v| v.as_float()) {
            Some(f) => f,
            None => return Err(self.runtime_error("'for' initial value must be a number")),
        };
        let limit = match limit.coerce_number().and_then(|v| v.as_float()) {
            Some(f) => f,
            None => return Err(self.runtime_error("'for' limit must be a number")),
        };
        let step = match step.coerce_number().and_then(|v| v.as_float()) {
            Some(f) => f,
            None => return Err(self.runtime_error("'for' step must be a number")),
        };
        if step == 0.0 {
            return Err(self.runtime_error("'for' step is zero"));
        }
        let zero_trip = if step > 0.0 { init > limit } else { init < limit };
        if zero_trip {
            let frame = self.cf_mut();
            frame.pc = (frame.pc as i64 + sbx as i64) as usize;
            return Ok(());
        }
        self.set_reg(a, LuaValue::Float(init));
        self.set_reg(a + 1, LuaValue::Float(limit));
        self.set_reg(a + 2, LuaValue::Float(step));
        self.set_reg(a + 3, LuaValue::Float(init));
        Ok(())
    }

    pub(crate) fn exec_forloop(&mut self, a: u32, sbx: i32) -> LuaResult<()> {
        let step = self.reg(a + 2);
        match step {
            LuaValue::Integer(step) => {
                let count = self.reg(a + 1).as_integer_strict().unwrap_or(0) as u64;
                if count == 0 {
                    return Ok(());
                }
                let current = self.reg(a).as_integer_strict().unwrap_or(0);
                let next = current.wrapping_add(step);
                self.set_reg(a, LuaValue::Integer(next));
                self.set_reg(a + 1, LuaValue::Integer((count - 1) as i64));
                self.set_reg(a + 3, LuaValue::Integer(next));
                let frame = self.cf_mut();
                frame.pc = (frame.pc as i64 + sbx as i64) as usize;
                Ok(())
            }
            LuaValue::Float(step) => {
                let limit = self.reg(a + 1).as_float().unwrap_or(0.0);
                let current = self.reg(a).as_float().unwrap_or(0.0);
                let next = current + step;
                let continues = if step > 0.0 { next <= limit } else { next >= limit };
                if continues {
                    self.set_reg(a, LuaValue::Float(next));
                    self.set_reg(a + 3, LuaValue::Float(next));
                    let frame = self.cf_mut();
                    frame.pc = (frame.pc as i64 + sbx as i64) as usize;
                }
                Ok(())
            }
            _ => Err(self.runtime_error("'for' step must be a number")),
        }
    }
}

fn is_bitwise(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::BAnd | OpCode::BOr | OpCode::BXor | OpCode::Shl | OpCode::Shr
    )
}

fn arith_event(op: OpCode) -> MetaEvent {
    match op {
        OpCode::Add => MetaEvent::Add,
        OpCode::Sub => MetaEvent::Sub,
        OpCode::Mul => MetaEvent::Mul,
        OpCode::Mod => MetaEvent::Mod,
        OpCode::Pow => MetaEvent::Pow,
        OpCode::Div => MetaEvent::Div,
        OpCode::IDiv => MetaEvent::IDiv,
        OpCode::BAnd => MetaEvent::BAnd,
        OpCode::BOr => MetaEvent::BOr,
        OpCode::BXor => MetaEvent::BXor,
        OpCode::Shl => MetaEvent::Shl,
        OpCode::Shr => MetaEvent::Shr,
        _ => MetaEvent::Add,
    }
}

/// Arithmetic on two numeric operands, following the integer/float result
/// rules of the manual.
fn arith_numeric(
    op: OpCode,
    nb: &LuaValue,
    nc: &LuaValue,
    vm: &mut LuaVM,
) -> LuaResult<LuaValue> {
    let both_int = matches!((nb, nc), (LuaValue::Integer(_), LuaValue::Integer(_)));
    if both_int && !matches!(op, OpCode::Div | OpCode::Pow) {
        let ib = nb.as_integer_strict().unwrap_or(0);
        let ic = nc.as_integer_strict().unwrap_or(0);
        return match op {
            OpCode::Add => Ok(LuaValue::Integer(ib.wrapping_add(ic))),
            OpCode::Sub => Ok(LuaValue::Integer(ib.wrapping_sub(ic))),
            OpCode::Mul => Ok(LuaValue::Integer(ib.wrapping_mul(ic))),
            OpCode::IDiv => {
                if ic == 0 {
                    Err(vm.runtime_error("attempt to perform 'n//0'"))
                } else {
                    let mut q = ib.wrapping_div(ic);
                    if ib % ic != 0 && ((ib < 0) != (ic < 0)) {
                        q -= 1;
                    }
                    Ok(LuaValue::Integer(q))
                }
            }
            OpCode::Mod => {
                if ic == 0 {
                    Err(vm.runtime_error("attempt to perform 'n%%0'"))
                } else {
                    let mut r = ib.wrapping_rem(ic);
                    if r != 0 && ((r < 0) != (ic < 0)) {
                        r += ic;
                    }
                    Ok(LuaValue::Integer(r))
                }
            }
            _ => unreachable!("integer arithmetic opcode"),
        };
    }
    let fb = nb.as_float().unwrap_or(0.0);
    let fc = nc.as_float().unwrap_or(0.0);
    let result = match op {
        OpCode::Add => fb + fc,
        OpCode::Sub => fb - fc,
        OpCode::Mul => fb * fc,
        OpCode::Div => fb / fc,
        OpCode::Pow => fb.powf(fc),
        OpCode::IDiv => (fb / fc).floor(),
        OpCode::Mod => {
            let m = fb % fc;
            if m != 0.0 && ((m < 0.0) != (fc < 0.0)) {
                m + fc
            } else {
                m
            }
        }
        _ => unreachable!("float arithmetic opcode"),
    };
    Ok(LuaValue::Float(result))
}

/// Loss-free integer image of a value for bitwise operations.
fn bitwise_operand(v: &LuaValue) -> Option<i64> {
    match v {
        LuaValue::Integer(i) => Some(*i),
        LuaValue::Float(f) => number::float_to_integer(*f),
        LuaValue::String(_) => v.coerce_integer(),
        _ => None,
    }
}

fn shift_left(value: i64, shift: i64) -> i64 {
    if shift <= -64 || shift >= 64 {
        0
    } else if shift >= 0 {
        ((value as u64) << shift) as i64
    } else {
        ((value as u64) >> (-shift)) as i64
    }
}

fn concatable(v: &LuaValue) -> bool {
    matches!(
        v,
        LuaValue::String(_) | LuaValue::Integer(_) | LuaValue::Float(_)
    )
}

fn concat_bytes(v: &LuaValue) -> Vec<u8> {
    match v {
        LuaValue::String(s) => s.as_bytes().to_vec(),
        LuaValue::Integer(i) => {
            let mut buf = itoa::Buffer::new();
            buf.format(*i).as_bytes().to_vec()
        }
        LuaValue::Float(f) => number::float_to_lua_string(*f).into_bytes(),
        _ => Vec::new(),
    }
}

/// Raw ordering for numbers and strings; None defers to metamethods.
fn raw_order(op: OpCode, a: &LuaValue, b: &LuaValue) -> Option<bool> {
    let lt = op == OpCode::Lt;
    match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => {
            Some(if lt { x < y } else { x <= y })
        }
        (LuaValue::Float(x), LuaValue::Float(y)) => Some(if lt { x < y } else { x <= y }),
        (LuaValue::Integer(x), LuaValue::Float(y)) => Some(if lt {
            number::int_lt_float(*x, *y)
        } else {
            number::int_le_float(*x, *y)
        }),
        (LuaValue::Float(x), LuaValue::Integer(y)) => Some(if lt {
            number::float_lt_int(*x, *y)
        } else {
            number::float_le_int(*x, *y)
        }),
        (LuaValue::String(x), LuaValue::String(y)) => {
            Some(if lt {
                x.as_bytes() < y.as_bytes()
            } else {
                x.as_bytes() <= y.as_bytes()
            })
        }
        _ => None,
    }
}
