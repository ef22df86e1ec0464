// Expression compilation: values into registers, RK operand selection,
// short-circuit TestSet chains, and multi-value expansion for calls and
// varargs.

use super::ast::*;
use super::codegen::{Access, CodeGen, ConstKey};
use super::SyntaxError;
use crate::lua_value::{LuaString, LuaValue};
use crate::lua_vm::opcode::{Instruction, OpCode};

impl CodeGen {
    /// Evaluate into some register: existing locals are used in place,
    /// everything else lands in a fresh temporary.
    pub(crate) fn expr_to_any_reg(&mut self, e: &Expr) -> Result<u32, SyntaxError> {
        if let Expr::Name(name, _) = e {
            if let Access::Local(reg) = self.resolve(name) {
                return Ok(reg);
            }
        }
        self.expr_to_next_reg(e)
    }

    pub(crate) fn expr_to_next_reg(&mut self, e: &Expr) -> Result<u32, SyntaxError> {
        let reg = self.reserve_regs(1);
        self.expr_to_reg(e, reg)?;
        Ok(reg)
    }

    /// Evaluate into a specific register, reserving it if still free.
    pub(crate) fn expr_to_reg_at(&mut self, e: &Expr, reg: u32) -> Result<(), SyntaxError> {
        if reg >= self.fs().freereg {
            let needed = reg + 1 - self.fs().freereg;
            self.reserve_regs(needed);
        }
        self.expr_to_reg(e, reg)
    }

    /// RK operand: literal constants inline as pool references when the
    /// pool index fits below 256, otherwise the value goes through a
    /// register like any other expression.
    pub(crate) fn expr_to_rk(&mut self, e: &Expr) -> Result<i32, SyntaxError> {
        let key = match e {
            Expr::Nil(_) => Some((ConstKey::Nil, LuaValue::Nil)),
            Expr::True(_) => Some((ConstKey::True, LuaValue::Boolean(true))),
            Expr::False(_) => Some((ConstKey::False, LuaValue::Boolean(false))),
            Expr::Integer(i, _) => Some((ConstKey::Int(*i), LuaValue::Integer(*i))),
            Expr::Float(f, _) => Some((ConstKey::Float(f.to_bits()), LuaValue::Float(*f))),
            Expr::Str(bytes, _) => Some((
                ConstKey::Str(bytes.clone()),
                LuaValue::string(LuaString::from_bytes(bytes.clone())),
            )),
            _ => None,
        };
        if let Some((key, value)) = key {
            let idx = self.const_index(key, value);
            if idx < 256 {
                return Ok(idx as i32 + 256);
            }
        }
        Ok(self.expr_to_any_reg(e)? as i32)
    }

    pub(crate) fn expr_to_reg(&mut self, e: &Expr, dest: u32) -> Result<(), SyntaxError> {
        match e {
            Expr::Nil(line) => {
                self.set_line(*line);
                self.emit(Instruction::abc(OpCode::LoadNil, dest, 0, 0));
            }
            Expr::True(line) => {
                self.set_line(*line);
                self.emit(Instruction::abc(OpCode::LoadBool, dest, 1, 0));
            }
            Expr::False(line) => {
                self.set_line(*line);
                self.emit(Instruction::abc(OpCode::LoadBool, dest, 0, 0));
            }
            Expr::Integer(i, line) => {
                self.set_line(*line);
                let k = self.const_index(ConstKey::Int(*i), LuaValue::Integer(*i)) as i32;
                self.emit(Instruction::abx(OpCode::LoadK, dest, k));
            }
            Expr::Float(f, line) => {
                self.set_line(*line);
                let k =
                    self.const_index(ConstKey::Float(f.to_bits()), LuaValue::Float(*f)) as i32;
                self.emit(Instruction::abx(OpCode::LoadK, dest, k));
            }
            Expr::Str(bytes, line) => {
                self.set_line(*line);
                let k = self.string_const(bytes) as i32;
                self.emit(Instruction::abx(OpCode::LoadK, dest, k));
            }
            Expr::Vararg(line) => {
                self.set_line(*line);
                if !self.fs().is_vararg {
                    return Err(SyntaxError {
                        message: "cannot use '...' outside a vararg function".to_string(),
                        near: "'...'".to_string(),
                        line: *line,
                    });
                }
                self.emit(Instruction::abc(OpCode::Vararg, dest, 2, 0));
            }
            Expr::Function(body) => {
                self.set_line(body.line);
                self.compile_closure(body, dest)?;
            }
            Expr::Name(name, line) => {
                self.set_line(*line);
                match self.resolve(name) {
                    Access::Local(reg) => {
                        if reg != dest {
                            self.emit(Instruction::abc(OpCode::Move, dest, reg as i32, 0));
                        }
                    }
                    Access::Upvalue(idx) => {
                        self.emit(Instruction::abc(OpCode::GetUpval, dest, idx as i32, 0));
                    }
                    Access::Global => {
                        let key = self.string_const(name.as_bytes()) as i32 + 256;
                        match self.resolve("_ENV") {
                            Access::Upvalue(env) => {
                                self.emit(Instruction::abc(
                                    OpCode::GetTabUp,
                                    dest,
                                    env as i32,
                                    key,
                                ));
                            }
                            Access::Local(env_reg) => {
                                self.emit(Instruction::abc(
                                    OpCode::GetTable,
                                    dest,
                                    env_reg as i32,
                                    key,
                                ));
                            }
                            Access::Global => unreachable!("_ENV always resolves"),
                        }
                    }
                }
            }
            Expr::Paren(inner) => self.expr_to_reg(inner, dest)?,
            Expr::Index { obj, key, line } => {
                self.set_line(*line);
                let mark = self.fs().freereg;
                let obj_reg = self.expr_to_any_reg(obj)?;
                let key_rk = self.expr_to_rk(key)?;
                self.emit(Instruction::abc(OpCode::GetTable, dest, obj_reg as i32, key_rk));
                self.free_to(mark);
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => {
                let mark = self.fs().freereg;
                let base = mark;
                self.compile_call(e, 1)?;
                if base != dest {
                    self.emit(Instruction::abc(OpCode::Move, dest, base as i32, 0));
                }
                self.free_to(mark);
            }
            Expr::BinOp { op, lhs, rhs, line } => {
                self.compile_binop(*op, lhs, rhs, dest, *line)?;
            }
            Expr::UnOp { op, operand, line } => {
                self.set_line(*line);
                let mark = self.fs().freereg;
                let operand_reg = self.expr_to_any_reg(operand)?;
                let opcode = match op {
                    UnOp::Neg => OpCode::Unm,
                    UnOp::Not => OpCode::Not,
                    UnOp::Len => OpCode::Len,
                    UnOp::BNot => OpCode::BNot,
                };
                self.emit(Instruction::abc(opcode, dest, operand_reg as i32, 0));
                self.free_to(mark);
            }
            Expr::Table { items, line } => {
                self.compile_table(items, dest, *line)?;
            }
        }
        Ok(())
    }

    fn compile_binop(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        dest: u32,
        line: u32,
    ) -> Result<(), SyntaxError> {
        match op {
            BinOp::And | BinOp::Or => {
                self.set_line(line);
                let mark = self.fs().freereg;
                let lhs_reg = self.expr_to_any_reg(lhs)?;
                let expect = if op == BinOp::And { 0 } else { 1 };
                self.emit(Instruction::abc(
                    OpCode::TestSet,
                    dest,
                    lhs_reg as i32,
                    expect,
                ));
                let done = self.emit_jump();
                self.free_to(mark);
                self.expr_to_reg(rhs, dest)?;
                self.patch_jump_here(done);
                Ok(())
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.set_line(line);
                let mark = self.fs().freereg;
                let mut b = self.expr_to_rk(lhs)?;
                let mut c = self.expr_to_rk(rhs)?;
                let (opcode, expect) = match op {
                    BinOp::Eq => (OpCode::Eq, 1),
                    BinOp::Ne => (OpCode::Eq, 0),
                    BinOp::Lt => (OpCode::Lt, 1),
                    BinOp::Le => (OpCode::Le, 1),
                    // a > b  <=>  b < a
                    BinOp::Gt => {
                        std::mem::swap(&mut b, &mut c);
                        (OpCode::Lt, 1)
                    }
                    BinOp::Ge => {
                        std::mem::swap(&mut b, &mut c);
                        (OpCode::Le, 1)
                    }
                    _ => unreachable!(),
                };
                self.emit(Instruction::abc(opcode, expect, b, c));
                let to_true = self.emit_jump();
                self.emit(Instruction::abc(OpCode::LoadBool, dest, 0, 1));
                let true_pc = self.emit(Instruction::abc(OpCode::LoadBool, dest, 1, 0));
                self.patch_jump_to(to_true, true_pc);
                self.free_to(mark);
                Ok(())
            }
            BinOp::Concat => {
                self.set_line(line);
                // flatten the right-leaning chain into consecutive registers
                let mut parts = Vec::new();
                flatten_concat(lhs, rhs, &mut parts);
                let mark = self.fs().freereg;
                let first = self.fs().freereg;
                for part in &parts {
                    let reg = self.expr_to_next_reg(part)?;
                    debug_assert!(reg >= first);
                }
                let last = first + parts.len() as u32 - 1;
                self.emit(Instruction::abc(
                    OpCode::Concat,
                    dest,
                    first as i32,
                    last as i32,
                ));
                self.free_to(mark);
                Ok(())
            }
            _ => {
                self.set_line(line);
                let mark = self.fs().freereg;
                let b = self.expr_to_rk(lhs)?;
                let c = self.expr_to_rk(rhs)?;
                let opcode = match op {
                    BinOp::Add => OpCode::Add,
                    BinOp::Sub => OpCode::Sub,
                    BinOp::Mul => OpCode::Mul,
                    BinOp::Div => OpCode::Div,
                    BinOp::IDiv => OpCode::IDiv,
                    BinOp::Mod => OpCode::Mod,
                    BinOp::Pow => OpCode::Pow,
                    BinOp::BAnd => OpCode::BAnd,
                    BinOp::BOr => OpCode::BOr,
                    BinOp::BXor => OpCode::BXor,
                    BinOp::Shl => OpCode::Shl,
                    BinOp::Shr => OpCode::Shr,
                    _ => unreachable!(),
                };
                self.emit(Instruction::abc(opcode, dest, b, c));
                self.free_to(mark);
                Ok(())
            }
        }
    }

    fn compile_table(
        &mut self,
        items: &[TableItem],
        dest: u32,
        line: u32,
    ) -> Result<(), SyntaxError> {
        self.set_line(line);
        // SetList requires the batch to sit directly above the table
        let treg = if dest + 1 == self.fs().freereg {
            dest
        } else {
            self.reserve_regs(1)
        };
        let narray = items
            .iter()
            .filter(|i| matches!(i, TableItem::Positional(_)))
            .count();
        let nhash = items.len() - narray;
        self.emit(Instruction::abc(
            OpCode::NewTable,
            treg,
            narray.min(255) as i32,
            nhash.min(255) as i32,
        ));
        let mut pending: i32 = 0;
        let mut batch: i32 = 0;
        let total = items.len();
        for (idx, item) in items.iter().enumerate() {
            match item {
                TableItem::Positional(value) => {
                    let is_last = idx + 1 == total;
                    if is_last && value.is_multivalue() {
                        self.expr_multi(value, -1)?;
                        self.emit(Instruction::abc(OpCode::SetList, treg, 0, batch + 1));
                        pending = 0;
                        break;
                    }
                    self.expr_to_next_reg(value)?;
                    pending += 1;
                    if pending == crate::lua_vm::opcode::SETLIST_BATCH as i32 {
                        self.emit(Instruction::abc(OpCode::SetList, treg, pending, batch + 1));
                        batch += 1;
                        pending = 0;
                        self.free_to(treg + 1);
                    }
                }
                TableItem::Named(name, value) => {
                    let mark = self.fs().freereg;
                    let key = self.string_const(name.as_bytes()) as i32 + 256;
                    let value_rk = self.expr_to_rk(value)?;
                    self.emit(Instruction::abc(OpCode::SetTable, treg, key, value_rk));
                    self.free_to(mark);
                }
                TableItem::Keyed(key, value) => {
                    let mark = self.fs().freereg;
                    let key_rk = self.expr_to_rk(key)?;
                    let value_rk = self.expr_to_rk(value)?;
                    self.emit(Instruction::abc(OpCode::SetTable, treg, key_rk, value_rk));
                    self.free_to(mark);
                }
            }
        }
        if pending > 0 {
            self.emit(Instruction::abc(OpCode::SetList, treg, pending, batch + 1));
        }
        self.free_to(treg + 1);
        if treg != dest {
            self.emit(Instruction::abc(OpCode::Move, dest, treg as i32, 0));
            self.free_to(treg);
        }
        Ok(())
    }

    /// Lay out function + arguments at the top of the register stack.
    /// Returns the encoded argument count: n for fixed, -1 when the last
    /// argument expands to all its values.
    pub(crate) fn call_to_stack(&mut self, e: &Expr) -> Result<i32, SyntaxError> {
        match e {
            Expr::Call { func, args, line } => {
                self.set_line(*line);
                let base = self.reserve_regs(1);
                self.expr_to_reg(func, base)?;
                self.compile_args(args, *line)
            }
            Expr::MethodCall {
                obj,
                method,
                args,
                line,
            } => {
                self.set_line(*line);
                let mark = self.fs().freereg;
                let obj_reg = self.expr_to_any_reg(obj)?;
                self.free_to(mark);
                let base = self.reserve_regs(2);
                let key = self.string_const(method.as_bytes()) as i32 + 256;
                self.emit(Instruction::abc(
                    OpCode::GetMethod,
                    base,
                    obj_reg as i32,
                    key,
                ));
                let nargs = self.compile_args(args, *line)?;
                // self occupies one argument slot
                Ok(if nargs < 0 { -1 } else { nargs + 1 })
            }
            _ => Err(SyntaxError {
                message: "call expression expected".to_string(),
                near: "'('".to_string(),
                line: e.line(),
            }),
        }
    }

    fn compile_args(&mut self, args: &[Expr], _line: u32) -> Result<i32, SyntaxError> {
        if args.is_empty() {
            return Ok(0);
        }
        let n = args.len();
        for arg in &args[..n - 1] {
            self.expr_to_next_reg(arg)?;
        }
        let last = &args[n - 1];
        if last.is_multivalue() {
            self.expr_multi(last, -1)?;
            Ok(-1)
        } else {
            self.expr_to_next_reg(last)?;
            Ok(n as i32)
        }
    }

    /// Emit a call leaving `want` results at its base (`want < 0` keeps the
    /// result list open).
    fn compile_call(&mut self, e: &Expr, want: i32) -> Result<u32, SyntaxError> {
        let base = self.fs().freereg;
        let nargs = self.call_to_stack(e)?;
        let b = if nargs < 0 { 0 } else { nargs + 1 };
        let c = if want < 0 { 0 } else { want + 1 };
        self.emit(Instruction::abc(OpCode::Call, base, b, c));
        if want >= 0 {
            self.free_to(base + want as u32);
            let fs = self.fs_mut();
            if fs.freereg > fs.max_stack {
                fs.max_stack = fs.freereg;
            }
        } else {
            self.free_to(base + 1);
        }
        Ok(base)
    }

    /// Multi-value expression (call or `...`): leaves `want` values at the
    /// current register top, or an open list when `want < 0`.
    pub(crate) fn expr_multi(&mut self, e: &Expr, want: i32) -> Result<(), SyntaxError> {
        match e {
            Expr::Call { .. } | Expr::MethodCall { .. } => {
                self.compile_call(e, want)?;
                Ok(())
            }
            Expr::Vararg(line) => {
                self.set_line(*line);
                if !self.fs().is_vararg {
                    return Err(SyntaxError {
                        message: "cannot use '...' outside a vararg function".to_string(),
                        near: "'...'".to_string(),
                        line: *line,
                    });
                }
                let base = self.fs().freereg;
                let b = if want < 0 { 0 } else { want + 1 };
                self.emit(Instruction::abc(OpCode::Vararg, base, b, 0));
                if want > 0 {
                    self.reserve_regs(want as u32);
                } else if want < 0 {
                    self.reserve_regs(1);
                }
                Ok(())
            }
            _ => {
                // single-valued expression in a multi-value position
                if want == 0 {
                    let mark = self.fs().freereg;
                    self.expr_to_next_reg(e)?;
                    self.free_to(mark);
                } else {
                    self.expr_to_next_reg(e)?;
                    if want > 1 {
                        let base = self.fs().freereg;
                        self.reserve_regs(want as u32 - 1);
                        self.emit(Instruction::abc(
                            OpCode::LoadNil,
                            base,
                            want - 2,
                            0,
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// Produce exactly `want` values from an expression list, starting at
    /// the current register top.
    pub(crate) fn explist_to_regs(&mut self, exprs: &[Expr], want: u32) -> Result<(), SyntaxError> {
        let base = self.fs().freereg;
        if exprs.is_empty() {
            if want > 0 {
                self.reserve_regs(want);
                self.emit(Instruction::abc(
                    OpCode::LoadNil,
                    base,
                    want as i32 - 1,
                    0,
                ));
            }
            return Ok(());
        }
        let n = exprs.len();
        for e in &exprs[..n - 1] {
            self.expr_to_next_reg(e)?;
        }
        let produced = (n - 1) as u32;
        let last = &exprs[n - 1];
        if want > produced {
            let need = want - produced;
            if last.is_multivalue() {
                self.expr_multi(last, need as i32)?;
                let fs = self.fs_mut();
                fs.freereg = base + want;
                if fs.freereg > fs.max_stack {
                    fs.max_stack = fs.freereg;
                }
            } else {
                self.expr_to_next_reg(last)?;
                if need > 1 {
                    let fill = self.fs().freereg;
                    self.reserve_regs(need - 1);
                    self.emit(Instruction::abc(
                        OpCode::LoadNil,
                        fill,
                        need as i32 - 2,
                        0,
                    ));
                }
            }
        } else {
            // surplus expressions still evaluate for their side effects
            self.expr_to_next_reg(last)?;
            self.free_to(base + want);
        }
        Ok(())
    }

    /// Evaluate an expression list leaving the last expression open when it
    /// can produce multiple values. Returns true when open.
    pub(crate) fn explist_open(&mut self, exprs: &[Expr]) -> Result<Option<()>, SyntaxError> {
        let n = exprs.len();
        for e in &exprs[..n - 1] {
            self.expr_to_next_reg(e)?;
        }
        let last = &exprs[n - 1];
        if last.is_multivalue() {
            self.expr_multi(last, -1)?;
            Ok(Some(()))
        } else {
            self.expr_to_next_reg(last)?;
            Ok(None)
        }
    }
}

fn flatten_concat<'a>(lhs: &'a Expr, rhs: &'a Expr, out: &mut Vec<&'a Expr>) {
    out.push(lhs);
    let mut cur = rhs;
    loop {
        match cur {
            Expr::BinOp {
                op: BinOp::Concat,
                lhs,
                rhs,
                ..
            } => {
                out.push(lhs);
                cur = rhs;
            }
            other => {
                out.push(other);
                break;
            }
        }
    }
}
