// Single-pass code generator: AST -> Proto. Registers follow a stack
// discipline: active locals occupy registers 0..nactive (register ==
// position in the active list), temporaries live above, and each block
// restores the watermark on exit.

use ahash::AHashMap;
use smol_str::SmolStr;
use std::rc::Rc;

use super::ast::*;
use super::SyntaxError;
use crate::lua_value::{LocalVar, LuaValue, Proto, UpvalDesc};
use crate::lua_vm::opcode::{Instruction, OpCode};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub(crate) enum ConstKey {
    Nil,
    True,
    False,
    Int(i64),
    Float(u64),
    Str(Vec<u8>),
}

pub(crate) struct ActiveLocal {
    pub name: SmolStr,
    pub attrib: Attrib,
    pub captured: bool,
    pub debug_index: usize,
}

pub(crate) struct BlockScope {
    pub first_local: usize,
    pub first_label: usize,
    pub first_goto: usize,
    pub is_loop: bool,
    pub has_upval: bool,
    pub has_tbc: bool,
    /// pcs of the Jmp of each break (its Close sits at pc-1)
    pub break_jumps: Vec<usize>,
}

pub(crate) struct LabelDef {
    pub name: SmolStr,
    pub pc: usize,
    pub nactive: usize,
}

pub(crate) struct PendingGoto {
    pub name: SmolStr,
    pub close_pc: usize,
    pub jmp_pc: usize,
    pub nactive: usize,
    pub line: u32,
}

pub(crate) struct FuncState {
    pub code: Vec<Instruction>,
    pub line_info: Vec<u32>,
    pub constants: Vec<LuaValue>,
    pub const_map: AHashMap<ConstKey, usize>,
    pub protos: Vec<Rc<Proto>>,
    pub upvalues: Vec<UpvalDesc>,
    pub locals_debug: Vec<LocalVar>,
    pub active: Vec<ActiveLocal>,
    pub blocks: Vec<BlockScope>,
    pub labels: Vec<LabelDef>,
    pub gotos: Vec<PendingGoto>,
    pub freereg: u32,
    pub max_stack: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub cur_line: u32,
}

impl FuncState {
    fn new(is_vararg: bool, line_defined: u32) -> Self {
        FuncState {
            code: Vec::new(),
            line_info: Vec::new(),
            constants: Vec::new(),
            const_map: AHashMap::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            locals_debug: Vec::new(),
            active: Vec::new(),
            blocks: Vec::new(),
            labels: Vec::new(),
            gotos: Vec::new(),
            freereg: 0,
            max_stack: 2,
            num_params: 0,
            is_vararg,
            line_defined,
            last_line_defined: 0,
            cur_line: line_defined.max(1),
        }
    }

    /// True when any enclosing block carries a to-be-closed variable; a
    /// call in tail position must stay a regular call then.
    pub fn inside_tbc(&self) -> bool {
        self.blocks.iter().any(|b| b.has_tbc)
    }
}

/// How a name resolves at a use site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Local(u32),
    Upvalue(u32),
    Global,
}

pub struct CodeGen {
    chunk_name: String,
    stack: Vec<FuncState>,
}

impl CodeGen {
    pub fn compile_chunk(block: &Block, chunk_name: &str) -> Result<Proto, SyntaxError> {
        let mut cg = CodeGen {
            chunk_name: chunk_name.to_string(),
            stack: Vec::new(),
        };
        let mut main = FuncState::new(true, 0);
        // the main chunk's single upvalue is _ENV, filled by the VM
        main.upvalues.push(UpvalDesc {
            name: SmolStr::new("_ENV"),
            in_stack: false,
            index: 0,
        });
        cg.stack.push(main);
        cg.open_block(false);
        cg.compile_block(block)?;
        cg.close_block()?;
        cg.finish_function(0)
    }

    pub(crate) fn fs(&self) -> &FuncState {
        self.stack.last().expect("function state stack is never empty")
    }

    pub(crate) fn fs_mut(&mut self) -> &mut FuncState {
        self.stack.last_mut().expect("function state stack is never empty")
    }

    fn err(&self, message: impl Into<String>, near: &str, line: u32) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            near: near.to_string(),
            line,
        }
    }

    // instruction emission

    pub(crate) fn emit(&mut self, instr: Instruction) -> usize {
        let line = self.fs().cur_line;
        let fs = self.fs_mut();
        fs.code.push(instr);
        fs.line_info.push(line);
        fs.code.len() - 1
    }

    pub(crate) fn emit_jump(&mut self) -> usize {
        self.emit(Instruction::asbx(OpCode::Jmp, 0, 0))
    }

    pub(crate) fn patch_jump_to(&mut self, jmp_pc: usize, target: usize) {
        let offset = target as i32 - (jmp_pc as i32 + 1);
        self.fs_mut().code[jmp_pc].b = offset;
    }

    pub(crate) fn patch_jump_here(&mut self, jmp_pc: usize) {
        let here = self.fs().code.len();
        self.patch_jump_to(jmp_pc, here);
    }

    pub(crate) fn pc(&self) -> usize {
        self.fs().code.len()
    }

    pub(crate) fn set_line(&mut self, line: u32) {
        self.fs_mut().cur_line = line;
        let fs = self.fs_mut();
        if line > fs.last_line_defined {
            fs.last_line_defined = line;
        }
    }

    // register management

    pub(crate) fn reserve_regs(&mut self, n: u32) -> u32 {
        let fs = self.fs_mut();
        let first = fs.freereg;
        fs.freereg += n;
        if fs.freereg > fs.max_stack {
            fs.max_stack = fs.freereg;
        }
        first
    }

    pub(crate) fn free_to(&mut self, watermark: u32) {
        let nactive = self.fs().active.len() as u32;
        self.fs_mut().freereg = watermark.max(nactive);
    }

    // constants

    pub(crate) fn const_index(&mut self, key: ConstKey, value: LuaValue) -> u32 {
        let fs = self.fs_mut();
        if let Some(&idx) = fs.const_map.get(&key) {
            return idx as u32;
        }
        let idx = fs.constants.len();
        fs.constants.push(value);
        fs.const_map.insert(key, idx);
        idx as u32
    }

    pub(crate) fn string_const(&mut self, bytes: &[u8]) -> u32 {
        self.const_index(
            ConstKey::Str(bytes.to_vec()),
            LuaValue::string(crate::lua_value::LuaString::from_bytes(bytes.to_vec())),
        )
    }

    // locals and scopes

    fn declare_local(&mut self, name: &SmolStr, attrib: Attrib) -> u32 {
        let register = self.fs().active.len() as u32;
        let start_pc = self.pc() as u32;
        let fs = self.fs_mut();
        let debug_index = fs.locals_debug.len();
        fs.locals_debug.push(LocalVar {
            name: name.clone(),
            start_pc,
            end_pc: u32::MAX,
            register,
        });
        fs.active.push(ActiveLocal {
            name: name.clone(),
            attrib,
            captured: false,
            debug_index,
        });
        if fs.freereg <= register {
            fs.freereg = register + 1;
        }
        if fs.freereg > fs.max_stack {
            fs.max_stack = fs.freereg;
        }
        register
    }

    fn remove_locals_to(&mut self, first: usize) {
        let end_pc = self.pc() as u32;
        let fs = self.fs_mut();
        while fs.active.len() > first {
            if let Some(local) = fs.active.pop() {
                fs.locals_debug[local.debug_index].end_pc = end_pc;
            }
        }
        fs.freereg = first as u32;
    }

    pub(crate) fn open_block(&mut self, is_loop: bool) {
        let fs = self.fs_mut();
        let scope = BlockScope {
            first_local: fs.active.len(),
            first_label: fs.labels.len(),
            first_goto: fs.gotos.len(),
            is_loop,
            has_upval: false,
            has_tbc: false,
            break_jumps: Vec::new(),
        };
        fs.blocks.push(scope);
    }

    /// Close the innermost block: finish break patching for loops, drop
    /// labels, propagate unresolved gotos, and emit Close when needed.
    pub(crate) fn close_block(&mut self) -> Result<(), SyntaxError> {
        let block = match self.fs_mut().blocks.pop() {
            Some(b) => b,
            None => return Ok(()),
        };
        if block.has_upval || block.has_tbc {
            let first = block.first_local as u32;
            self.emit(Instruction::abc(OpCode::Close, first, 0, 0));
        }
        self.remove_locals_to(block.first_local);
        // labels die with their block
        self.fs_mut().labels.truncate(block.first_label);
        // unresolved gotos escape to the enclosing block with their level
        // clamped to what survives
        let first_goto = block.first_goto;
        let fs = self.fs_mut();
        for pending in fs.gotos.iter_mut().skip(first_goto) {
            if pending.nactive > block.first_local {
                pending.nactive = block.first_local;
            }
        }
        // break targets: land after the block's Close
        let jumps = block.break_jumps;
        let close_to = block.first_local as u32;
        for jmp_pc in jumps {
            self.fs_mut().code[jmp_pc - 1].a = close_to;
            self.patch_jump_here(jmp_pc);
        }
        Ok(())
    }

    fn define_label(&mut self, name: &SmolStr, line: u32) -> Result<(), SyntaxError> {
        let fs = self.fs();
        let first_label = fs.blocks.last().map(|b| b.first_label).unwrap_or(0);
        if fs.labels[first_label..].iter().any(|l| l.name == *name) {
            return Err(self.err(
                format!("label '{}' already defined", name),
                &format!("'{}'", name),
                line,
            ));
        }
        let nactive = self.fs().active.len();
        let pc = self.pc();
        self.fs_mut().labels.push(LabelDef {
            name: name.clone(),
            pc,
            nactive,
        });
        self.resolve_gotos_to_label(name, pc, nactive)?;
        Ok(())
    }

    /// Match pending gotos (from this block or closed inner ones) against a
    /// freshly defined label.
    fn resolve_gotos_to_label(
        &mut self,
        name: &SmolStr,
        label_pc: usize,
        label_nactive: usize,
    ) -> Result<(), SyntaxError> {
        let first_goto = self.fs().blocks.last().map(|b| b.first_goto).unwrap_or(0);
        let mut resolved = Vec::new();
        for (i, pending) in self.fs().gotos.iter().enumerate().skip(first_goto) {
            if pending.name == *name {
                if label_nactive > pending.nactive {
                    let entering = self.fs().active[pending.nactive].name.clone();
                    return Err(self.err(
                        format!(
                            "<goto {}> jumps into the scope of local '{}'",
                            name, entering
                        ),
                        &format!("'{}'", name),
                        pending.line,
                    ));
                }
                resolved.push(i);
            }
        }
        for &i in resolved.iter().rev() {
            let pending = self.fs_mut().gotos.remove(i);
            self.fs_mut().code[pending.close_pc].a = label_nactive as u32;
            self.patch_jump_to(pending.jmp_pc, label_pc);
        }
        Ok(())
    }

    fn finish_function(&mut self, num_params: u8) -> Result<Proto, SyntaxError> {
        // implicit final return
        self.emit(Instruction::abc(OpCode::Return, 0, 1, 0));
        if let Some(pending) = self.fs().gotos.first() {
            return Err(self.err(
                format!("no visible label '{}' for goto", pending.name),
                &format!("'{}'", pending.name),
                pending.line,
            ));
        }
        let end_pc = self.pc() as u32;
        let fs = self.stack.pop().expect("function state stack is never empty");
        let mut locals = fs.locals_debug;
        for local in locals.iter_mut() {
            if local.end_pc == u32::MAX {
                local.end_pc = end_pc;
            }
        }
        Ok(Proto {
            code: fs.code,
            constants: fs.constants,
            protos: fs.protos,
            upvalues: fs.upvalues,
            locals,
            line_info: fs.line_info,
            source: self.chunk_name.clone(),
            num_params,
            is_vararg: fs.is_vararg,
            max_stack_size: fs.max_stack,
            line_defined: fs.line_defined,
            last_line_defined: fs.last_line_defined,
        })
    }

    // name resolution

    /// Resolve `name` in the function at stack depth `level`, adding
    /// upvalue descriptors along the chain as needed.
    pub(crate) fn resolve_name(&mut self, level: usize, name: &str) -> Access {
        // active local?
        if let Some(pos) = self.stack[level]
            .active
            .iter()
            .rposition(|l| l.name.as_str() == name)
        {
            return Access::Local(pos as u32);
        }
        // already captured?
        if let Some(idx) = self.stack[level]
            .upvalues
            .iter()
            .position(|u| u.name.as_str() == name)
        {
            return Access::Upvalue(idx as u32);
        }
        if level == 0 {
            return Access::Global;
        }
        match self.resolve_name(level - 1, name) {
            Access::Local(reg) => {
                self.mark_captured(level - 1, reg as usize);
                self.add_upvalue(level, name, true, reg as u8)
            }
            Access::Upvalue(idx) => self.add_upvalue(level, name, false, idx as u8),
            Access::Global => Access::Global,
        }
    }

    fn mark_captured(&mut self, level: usize, reg: usize) {
        let fs = &mut self.stack[level];
        fs.active[reg].captured = true;
        for block in fs.blocks.iter_mut().rev() {
            if block.first_local <= reg {
                block.has_upval = true;
                break;
            }
        }
    }

    fn add_upvalue(&mut self, level: usize, name: &str, in_stack: bool, index: u8) -> Access {
        let fs = &mut self.stack[level];
        let idx = fs.upvalues.len() as u32;
        fs.upvalues.push(UpvalDesc {
            name: SmolStr::new(name),
            in_stack,
            index,
        });
        Access::Upvalue(idx)
    }

    /// Resolution in the current function.
    pub(crate) fn resolve(&mut self, name: &str) -> Access {
        let level = self.stack.len() - 1;
        self.resolve_name(level, name)
    }

    // statements

    pub(crate) fn compile_block(&mut self, block: &Block) -> Result<(), SyntaxError> {
        for stat in &block.stats {
            self.compile_stat(stat)?;
            // statement boundary: temporaries die here
            let nactive = self.fs().active.len() as u32;
            self.free_to(nactive);
        }
        Ok(())
    }

    fn compile_scoped_block(&mut self, block: &Block, is_loop: bool) -> Result<(), SyntaxError> {
        self.open_block(is_loop);
        self.compile_block(block)?;
        self.close_block()
    }

    fn compile_stat(&mut self, stat: &Stat) -> Result<(), SyntaxError> {
        match stat {
            Stat::ExprStat { expr, line } => {
                self.set_line(*line);
                let mark = self.fs().freereg;
                self.expr_multi(expr, 0)?;
                self.free_to(mark);
                Ok(())
            }
            Stat::Local { names, values, line } => self.compile_local(names, values, *line),
            Stat::Assign {
                targets,
                values,
                line,
            } => self.compile_assign(targets, values, *line),
            Stat::If {
                arms,
                else_block,
                line,
            } => self.compile_if(arms, else_block.as_ref(), *line),
            Stat::While { cond, body, line } => self.compile_while(cond, body, *line),
            Stat::Repeat { body, cond, line } => self.compile_repeat(body, cond, *line),
            Stat::NumericFor {
                var,
                start,
                limit,
                step,
                body,
                line,
            } => self.compile_numeric_for(var, start, limit, step.as_ref(), body, *line),
            Stat::GenericFor {
                names,
                exprs,
                body,
                line,
            } => self.compile_generic_for(names, exprs, body, *line),
            Stat::Do { body } => self.compile_scoped_block(body, false),
            Stat::Return { exprs, line } => self.compile_return(exprs, *line),
            Stat::Break { line } => self.compile_break(*line),
            Stat::Goto { label, line } => {
                self.set_line(*line);
                let nactive = self.fs().active.len();
                // visible backward label?
                if let Some(label_def) = self
                    .fs()
                    .labels
                    .iter()
                    .rev()
                    .find(|l| l.name == *label)
                    .map(|l| (l.pc, l.nactive))
                {
                    self.emit(Instruction::abc(OpCode::Close, label_def.1 as u32, 0, 0));
                    let jmp = self.emit_jump();
                    self.patch_jump_to(jmp, label_def.0);
                    return Ok(());
                }
                let close_pc = self.emit(Instruction::abc(OpCode::Close, nactive as u32, 0, 0));
                let jmp_pc = self.emit_jump();
                self.fs_mut().gotos.push(PendingGoto {
                    name: label.clone(),
                    close_pc,
                    jmp_pc,
                    nactive,
                    line: *line,
                });
                Ok(())
            }
            Stat::Label { name, line } => {
                self.set_line(*line);
                self.define_label(name, *line)
            }
            Stat::Function {
                path,
                is_method: _,
                body,
                line,
            } => self.compile_function_stat(path, body, *line),
            Stat::LocalFunction { name, body, line } => {
                self.set_line(*line);
                // declare first so the body can refer to itself
                let reg = self.declare_local(name, Attrib::None);
                self.compile_closure(body, reg)?;
                Ok(())
            }
        }
    }

    fn compile_local(
        &mut self,
        names: &[(SmolStr, Attrib)],
        values: &[Expr],
        line: u32,
    ) -> Result<(), SyntaxError> {
        self.set_line(line);
        let base = self.fs().freereg;
        self.explist_to_regs(values, names.len() as u32)?;
        let mut close_regs = Vec::new();
        for (i, (name, attrib)) in names.iter().enumerate() {
            let reg = self.declare_local(name, *attrib);
            debug_assert_eq!(reg, base + i as u32);
            if *attrib == Attrib::Close {
                close_regs.push(reg);
            }
        }
        for reg in close_regs {
            self.emit(Instruction::abc(OpCode::Tbc, reg, 0, 0));
            if let Some(block) = self.fs_mut().blocks.last_mut() {
                block.has_tbc = true;
            }
        }
        Ok(())
    }

    fn compile_assign(
        &mut self,
        targets: &[Expr],
        values: &[Expr],
        line: u32,
    ) -> Result<(), SyntaxError> {
        self.set_line(line);
        let mark = self.fs().freereg;
        // const check before any code is emitted
        for target in targets {
            if let Expr::Name(name, _) = target {
                let level = self.stack.len() - 1;
                if let Access::Local(reg) = self.resolve_name(level, name) {
                    if self.fs().active[reg as usize].attrib != Attrib::None {
                        return Err(self.err(
                            format!("attempt to assign to const variable '{}'", name),
                            &format!("'{}'", name),
                            line,
                        ));
                    }
                }
            }
        }
        // pre-evaluate table/key operands of index targets, then values
        enum Prepared {
            Var(SmolStr),
            Indexed { obj: u32, key: i32 },
        }
        let mut prepared = Vec::new();
        for target in targets {
            match target {
                Expr::Name(name, _) => prepared.push(Prepared::Var(name.clone())),
                Expr::Index { obj, key, .. } => {
                    let obj_reg = self.expr_to_next_reg(obj)?;
                    let key_rk = self.expr_to_rk(key)?;
                    prepared.push(Prepared::Indexed {
                        obj: obj_reg,
                        key: key_rk,
                    });
                }
                _ => {
                    return Err(self.err("cannot assign to this expression", "'='", line));
                }
            }
        }
        let value_base = self.fs().freereg;
        self.explist_to_regs(values, targets.len() as u32)?;
        for (i, slot) in prepared.iter().enumerate() {
            let value_reg = value_base + i as u32;
            match slot {
                Prepared::Var(name) => self.store_to_name(name, value_reg, line)?,
                Prepared::Indexed { obj, key } => {
                    self.emit(Instruction::abc(
                        OpCode::SetTable,
                        *obj,
                        *key,
                        value_reg as i32,
                    ));
                }
            }
        }
        self.free_to(mark);
        Ok(())
    }

    pub(crate) fn store_to_name(
        &mut self,
        name: &SmolStr,
        value_reg: u32,
        line: u32,
    ) -> Result<(), SyntaxError> {
        match self.resolve(name) {
            Access::Local(reg) => {
                if self.fs().active[reg as usize].attrib != Attrib::None {
                    return Err(self.err(
                        format!("attempt to assign to const variable '{}'", name),
                        &format!("'{}'", name),
                        line,
                    ));
                }
                if reg != value_reg {
                    self.emit(Instruction::abc(OpCode::Move, reg, value_reg as i32, 0));
                }
            }
            Access::Upvalue(idx) => {
                self.emit(Instruction::abc(
                    OpCode::SetUpval,
                    value_reg,
                    idx as i32,
                    0,
                ));
            }
            Access::Global => {
                let key = self.string_const(name.as_bytes()) as i32 + 256;
                match self.resolve("_ENV") {
                    Access::Upvalue(env) => {
                        self.emit(Instruction::abc(
                            OpCode::SetTabUp,
                            env,
                            key,
                            value_reg as i32,
                        ));
                    }
                    Access::Local(env_reg) => {
                        self.emit(Instruction::abc(
                            OpCode::SetTable,
                            env_reg,
                            key,
                            value_reg as i32,
                        ));
                    }
                    Access::Global => {
                        // _ENV always resolves; reaching here is a front-end bug
                        return Err(self.err("invalid environment access", "'_ENV'", line));
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        arms: &[(Expr, Block)],
        else_block: Option<&Block>,
        line: u32,
    ) -> Result<(), SyntaxError> {
        self.set_line(line);
        let mut exit_jumps = Vec::new();
        for (cond, body) in arms {
            let mark = self.fs().freereg;
            let cond_reg = self.expr_to_any_reg(cond)?;
            self.emit(Instruction::abc(OpCode::Test, cond_reg, 0, 0));
            let skip = self.emit_jump();
            self.free_to(mark);
            self.compile_scoped_block(body, false)?;
            exit_jumps.push(self.emit_jump());
            self.patch_jump_here(skip);
        }
        if let Some(body) = else_block {
            self.compile_scoped_block(body, false)?;
        }
        for jmp in exit_jumps {
            self.patch_jump_here(jmp);
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block, line: u32) -> Result<(), SyntaxError> {
        self.set_line(line);
        let loop_start = self.pc();
        let mark = self.fs().freereg;
        let cond_reg = self.expr_to_any_reg(cond)?;
        self.emit(Instruction::abc(OpCode::Test, cond_reg, 0, 0));
        let exit = self.emit_jump();
        self.free_to(mark);
        self.open_block(true);
        self.compile_block(body)?;
        // the block's Close (when needed) runs before looping back
        let exit_pc = self.close_loop_block_with_backjump(loop_start)?;
        self.patch_jump_to(exit, exit_pc);
        Ok(())
    }

    /// Close a loop block and emit the back jump. Captured locals close on
    /// every iteration (before the jump) and again on the fall-out path.
    /// Returns the pc the loop's exit jump must target.
    fn close_loop_block_with_backjump(&mut self, target: usize) -> Result<usize, SyntaxError> {
        let block = self.fs_mut().blocks.pop().expect("loop block present");
        let needs_close = block.has_upval || block.has_tbc;
        if needs_close {
            self.emit(Instruction::abc(
                OpCode::Close,
                block.first_local as u32,
                0,
                0,
            ));
        }
        self.remove_locals_to(block.first_local);
        self.fs_mut().labels.truncate(block.first_label);
        let first_goto = block.first_goto;
        let fs = self.fs_mut();
        for pending in fs.gotos.iter_mut().skip(first_goto) {
            if pending.nactive > block.first_local {
                pending.nactive = block.first_local;
            }
        }
        let back = self.emit_jump();
        self.patch_jump_to(back, target);
        // the exit path also closes; breaks carry their own Close already
        let exit_pc = self.pc();
        if needs_close {
            self.emit(Instruction::abc(
                OpCode::Close,
                block.first_local as u32,
                0,
                0,
            ));
        }
        let close_to = block.first_local as u32;
        for jmp_pc in block.break_jumps {
            self.fs_mut().code[jmp_pc - 1].a = close_to;
            self.patch_jump_here(jmp_pc);
        }
        Ok(exit_pc)
    }

    fn compile_repeat(&mut self, body: &Block, cond: &Expr, line: u32) -> Result<(), SyntaxError> {
        self.set_line(line);
        let loop_start = self.pc();
        self.open_block(true);
        self.compile_block(body)?;
        // until condition still sees the body's locals
        let mark = self.fs().freereg;
        let cond_reg = self.expr_to_any_reg(cond)?;
        self.emit(Instruction::abc(OpCode::Test, cond_reg, 0, 1));
        let exit = self.emit_jump();
        self.free_to(mark);
        let exit_pc = self.close_loop_block_with_backjump(loop_start)?;
        self.patch_jump_to(exit, exit_pc);
        Ok(())
    }

    fn compile_break(&mut self, line: u32) -> Result<(), SyntaxError> {
        self.set_line(line);
        if !self.fs().blocks.iter().any(|b| b.is_loop) {
            return Err(self.err("break outside a loop", "'break'", line));
        }
        // Close placeholder; the loop end patches the register floor
        self.emit(Instruction::abc(OpCode::Close, 0, 0, 0));
        let jmp_pc = self.emit_jump();
        for block in self.fs_mut().blocks.iter_mut().rev() {
            if block.is_loop {
                block.break_jumps.push(jmp_pc);
                break;
            }
        }
        Ok(())
    }

    fn compile_numeric_for(
        &mut self,
        var: &SmolStr,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: u32,
    ) -> Result<(), SyntaxError> {
        self.set_line(line);
        self.open_block(true);
        let base = self.fs().freereg;
        self.expr_to_reg_at(start, base)?;
        self.expr_to_reg_at(limit, base + 1)?;
        match step {
            Some(step) => self.expr_to_reg_at(step, base + 2)?,
            None => {
                self.reserve_regs(1);
                let k = self.const_index(ConstKey::Int(1), LuaValue::Integer(1)) as i32;
                self.emit(Instruction::abx(OpCode::LoadK, base + 2, k));
            }
        }
        // hidden control registers then the visible variable
        self.declare_local(&SmolStr::new("(for state)"), Attrib::None);
        self.declare_local(&SmolStr::new("(for state)"), Attrib::None);
        self.declare_local(&SmolStr::new("(for state)"), Attrib::None);
        let var_reg = self.declare_local(var, Attrib::None);
        debug_assert_eq!(var_reg, base + 3);
        let prep = self.emit(Instruction::asbx(OpCode::ForPrep, base, 0));
        let body_start = self.pc();
        self.open_block(false);
        self.compile_block(body)?;
        self.close_block()?;
        // a captured loop variable closes before rebinding
        if self.fs().blocks.last().map(|b| b.has_upval).unwrap_or(false) {
            self.emit(Instruction::abc(OpCode::Close, base + 3, 0, 0));
        }
        let loop_pc = self.emit(Instruction::asbx(OpCode::ForLoop, base, 0));
        self.patch_jump_to(loop_pc, body_start);
        self.patch_jump_here(prep);
        self.close_block()?;
        Ok(())
    }

    fn compile_generic_for(
        &mut self,
        names: &[SmolStr],
        exprs: &[Expr],
        body: &Block,
        line: u32,
    ) -> Result<(), SyntaxError> {
        self.set_line(line);
        self.open_block(true);
        let base = self.fs().freereg;
        // iterator, invariant state, control, closing value
        self.explist_to_regs(exprs, 4)?;
        self.declare_local(&SmolStr::new("(for state)"), Attrib::None);
        self.declare_local(&SmolStr::new("(for state)"), Attrib::None);
        self.declare_local(&SmolStr::new("(for state)"), Attrib::None);
        self.declare_local(&SmolStr::new("(for state)"), Attrib::None);
        self.emit(Instruction::abc(OpCode::Tbc, base + 3, 0, 0));
        if let Some(block) = self.fs_mut().blocks.last_mut() {
            block.has_tbc = true;
        }
        let mut var_regs = Vec::new();
        for name in names {
            var_regs.push(self.declare_local(name, Attrib::None));
        }
        debug_assert_eq!(var_regs[0], base + 4);
        let to_loop = self.emit_jump();
        let body_start = self.pc();
        self.open_block(false);
        self.compile_block(body)?;
        self.close_block()?;
        if self.fs().blocks.last().map(|b| b.has_upval).unwrap_or(false) {
            self.emit(Instruction::abc(OpCode::Close, base + 4, 0, 0));
        }
        self.patch_jump_here(to_loop);
        self.emit(Instruction::abc(
            OpCode::TForCall,
            base,
            0,
            names.len() as i32,
        ));
        let loop_pc = self.emit(Instruction::asbx(OpCode::TForLoop, base, 0));
        self.patch_jump_to(loop_pc, body_start);
        self.close_block()?;
        Ok(())
    }

    fn compile_return(&mut self, exprs: &[Expr], line: u32) -> Result<(), SyntaxError> {
        self.set_line(line);
        // single call in tail position becomes a tail call, unless a
        // to-be-closed variable still needs its scope unwound here
        if exprs.len() == 1 && !self.fs().inside_tbc() {
            if let Expr::Call { .. } | Expr::MethodCall { .. } = &exprs[0] {
                let base = self.fs().freereg;
                let nargs = self.call_to_stack(&exprs[0])?;
                self.emit(Instruction::abc(OpCode::TailCall, base, nargs + 1, 0));
                self.emit(Instruction::abc(OpCode::Return, base, 0, 0));
                return Ok(());
            }
        }
        let base = self.fs().freereg;
        if exprs.is_empty() {
            self.emit(Instruction::abc(OpCode::Return, base, 1, 0));
            return Ok(());
        }
        let multi = self.explist_open(exprs)?;
        match multi {
            Some(_) => {
                self.emit(Instruction::abc(OpCode::Return, base, 0, 0));
            }
            None => {
                self.emit(Instruction::abc(
                    OpCode::Return,
                    base,
                    exprs.len() as i32 + 1,
                    0,
                ));
            }
        }
        self.free_to(base);
        Ok(())
    }

    fn compile_function_stat(
        &mut self,
        path: &[SmolStr],
        body: &FuncBody,
        line: u32,
    ) -> Result<(), SyntaxError> {
        self.set_line(line);
        let mark = self.fs().freereg;
        if path.len() == 1 {
            let reg = self.reserve_regs(1);
            self.compile_closure(body, reg)?;
            self.store_to_name(&path[0], reg, line)?;
        } else {
            // a.b.c.f = function: navigate to the second-to-last segment,
            // reusing one register for the chain
            let obj = self.expr_to_next_reg(&Expr::Name(path[0].clone(), line))?;
            for segment in &path[1..path.len() - 1] {
                let key = self.string_const(segment.as_bytes()) as i32 + 256;
                self.emit(Instruction::abc(OpCode::GetTable, obj, obj as i32, key));
            }
            let value = self.reserve_regs(1);
            self.compile_closure(body, value)?;
            let key = self.string_const(path[path.len() - 1].as_bytes()) as i32 + 256;
            self.emit(Instruction::abc(OpCode::SetTable, obj, key, value as i32));
        }
        self.free_to(mark);
        Ok(())
    }

    /// Compile a function body into a nested Proto and emit Closure into
    /// `dest`.
    pub(crate) fn compile_closure(&mut self, body: &FuncBody, dest: u32) -> Result<(), SyntaxError> {
        let mut fs = FuncState::new(body.is_vararg, body.line);
        fs.num_params = body.params.len() as u8;
        self.stack.push(fs);
        self.open_block(false);
        let params: Vec<SmolStr> = body.params.clone();
        for param in &params {
            self.declare_local(param, Attrib::None);
        }
        self.compile_block(&body.block)?;
        self.set_line(body.end_line);
        self.close_block()?;
        let proto = self.finish_function(params.len() as u8)?;
        let fs = self.fs_mut();
        let proto_index = fs.protos.len() as i32;
        fs.protos.push(Rc::new(proto));
        self.emit(Instruction::abx(OpCode::Closure, dest, proto_index));
        Ok(())
    }
}
