// The virtual machine: execution contexts (one per active coroutine),
// the frame stack, native-call plumbing, and the public embedding API.

mod arith;
mod call;
mod chunk_dump;
mod coroutines;
pub mod debug_info;
mod dispatch;
pub mod frame;
pub mod lua_error;
mod metamethod;
mod name_hint;
pub mod opcode;
mod table_ops;
pub mod traceback;

pub use chunk_dump::{dump_proto, load_proto, DUMP_SIGNATURE};
pub use lua_error::{LuaError, LuaResult};
pub use metamethod::MetaEvent;
pub use opcode::{Instruction, OpCode};

use ahash::AHashMap;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::compiler::Compiler;
use crate::lua_value::{
    LuaClosure, LuaFunction, LuaString, LuaTable, LuaThread, LuaUpvalue, LuaValue, Proto,
};
use frame::{CallFrame, ResultSink};
use lua_error::{short_source, Traceback};

/// A function implemented in Rust. Arguments and bound upvalues are
/// reached through the VM (`vm.arg(i)`, `vm.native_upvalue(i)`).
pub type CFunction = fn(&mut LuaVM) -> LuaResult<NativeReturn>;

/// What a native call produces: plain values, or a request to continue by
/// calling another function in its place. The `Call` form runs frame-based,
/// so pcall bodies stay yieldable.
pub enum NativeReturn {
    Values(Vec<LuaValue>),
    Call {
        func: LuaValue,
        args: Vec<LuaValue>,
        /// Some(handler) makes the callee a protected boundary
        protect: Option<Option<LuaValue>>,
    },
}

impl NativeReturn {
    pub fn none() -> Self {
        NativeReturn::Values(Vec::new())
    }

    pub fn one(value: LuaValue) -> Self {
        NativeReturn::Values(vec![value])
    }
}

/// VM limits, in the spirit of the usual C-stack guards.
#[derive(Clone, Copy)]
pub struct VmOptions {
    /// maximum native re-entries into the VM
    pub native_call_limit: usize,
    /// maximum Lua frames per execution context
    pub frame_limit: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            native_call_limit: 200,
            frame_limit: 8000,
        }
    }
}

/// Debug hook registration (debug.sethook).
pub struct HookState {
    pub func: Option<LuaValue>,
    pub on_call: bool,
    pub on_return: bool,
    pub on_line: bool,
    pub count: u32,
    pub counter: u32,
    pub in_hook: bool,
}

impl HookState {
    fn new() -> Self {
        HookState {
            func: None,
            on_call: false,
            on_return: false,
            on_line: false,
            count: 0,
            counter: 0,
            in_hook: false,
        }
    }

    pub fn active(&self) -> bool {
        self.func.is_some() && !self.in_hook
    }
}

/// One execution context: the frame stack of the running coroutine (or of
/// the main thread when `coroutine` is None).
pub(crate) struct ExecContext {
    pub frames: Vec<CallFrame>,
    pub coroutine: Option<Rc<RefCell<LuaThread>>>,
}

/// Bookkeeping for one native invocation, used by tracebacks and the
/// argument accessors.
pub(crate) struct NativeCall {
    pub func: Rc<LuaFunction>,
    pub args: Vec<LuaValue>,
    pub context_index: usize,
    pub frames_below: usize,
}

pub struct LuaVM {
    pub(crate) globals: Rc<RefCell<LuaTable>>,
    /// process-wide metatable shared by all strings
    pub(crate) string_metatable: Option<Rc<RefCell<LuaTable>>>,
    pub(crate) contexts: Vec<ExecContext>,
    pub(crate) native_calls: Vec<NativeCall>,
    pub(crate) native_depth: usize,
    /// every coroutine ever created, for open-upvalue lookup across stacks
    pub(crate) known_threads: Vec<Weak<RefCell<LuaThread>>>,
    interner: AHashMap<Box<[u8]>, Rc<LuaString>>,
    pub(crate) hook: HookState,
    pub(crate) options: VmOptions,
    pub(crate) next_frame_id: u64,
    /// sink of the call to yield, recorded while a Yield unwinds
    pub(crate) pending_yield_sink: Option<ResultSink>,
    pub(crate) fs: Rc<dyn crate::stdlib::io::LuaFs>,
    /// shared metatable of FILE* handles
    pub(crate) file_metatable: Option<Rc<RefCell<LuaTable>>>,
    /// the implicit coroutine the state starts on; never resumable
    pub(crate) main_thread: Rc<RefCell<LuaThread>>,
}

impl LuaVM {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        LuaVM {
            globals: Rc::new(RefCell::new(LuaTable::new())),
            string_metatable: None,
            contexts: vec![ExecContext {
                frames: Vec::new(),
                coroutine: None,
            }],
            native_calls: Vec::new(),
            native_depth: 0,
            known_threads: Vec::new(),
            interner: AHashMap::new(),
            hook: HookState::new(),
            options,
            next_frame_id: 1,
            pending_yield_sink: None,
            fs: Rc::new(crate::stdlib::io::RealFs),
            file_metatable: None,
            main_thread: {
                let mut main = LuaThread::new(LuaValue::Nil);
                main.entry = None;
                main.status = crate::lua_value::ThreadStatus::Running;
                Rc::new(RefCell::new(main))
            },
        }
    }

    /// The main thread object (what coroutine.running returns on the main
    /// coroutine).
    pub fn main_thread(&self) -> Rc<RefCell<LuaThread>> {
        Rc::clone(&self.main_thread)
    }

    /// Install the standard libraries into the globals table.
    pub fn open_libs(&mut self) {
        crate::stdlib::open_libs(self);
    }

    pub fn set_fs(&mut self, fs: Rc<dyn crate::stdlib::io::LuaFs>) {
        self.fs = fs;
    }

    // compilation and execution

    pub fn compile(&mut self, source: &str) -> LuaResult<Rc<Proto>> {
        Compiler::compile(source, source)
    }

    pub fn compile_named(&mut self, source: &str, chunk_name: &str) -> LuaResult<Rc<Proto>> {
        Compiler::compile(source, chunk_name)
    }

    pub fn execute(&mut self, source: &str) -> LuaResult<Vec<LuaValue>> {
        let proto = self.compile(source)?;
        self.execute_proto(proto, Vec::new())
    }

    pub fn execute_named(&mut self, source: &str, chunk_name: &str) -> LuaResult<Vec<LuaValue>> {
        let proto = self.compile_named(source, chunk_name)?;
        self.execute_proto(proto, Vec::new())
    }

    /// Run a compiled chunk on the main context.
    pub fn execute_proto(&mut self, proto: Rc<Proto>, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let closure = self.make_main_closure(proto);
        self.call_value(closure, args)
    }

    /// Wrap a main-chunk prototype into a closure with `_ENV` bound to the
    /// globals table.
    pub fn make_main_closure(&mut self, proto: Rc<Proto>) -> LuaValue {
        let env = Rc::new(LuaUpvalue::closed(LuaValue::Table(Rc::clone(&self.globals))));
        let mut upvalues = Vec::with_capacity(proto.upvalues.len());
        for (i, desc) in proto.upvalues.iter().enumerate() {
            // only an _ENV slot receives the environment; anything else
            // (a reloaded dump of an inner function) starts out nil
            if i == 0 && desc.name == "_ENV" {
                upvalues.push(Rc::clone(&env));
            } else {
                upvalues.push(Rc::new(LuaUpvalue::closed(LuaValue::Nil)));
            }
        }
        LuaValue::Function(Rc::new(LuaFunction::Lua(LuaClosure { proto, upvalues })))
    }

    /// Synchronous call from host or library code. Not a yield point: a
    /// yield crossing this boundary raises the C-boundary error.
    pub fn call_value(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        match &func {
            LuaValue::Function(f) if f.is_native() => {
                let f = Rc::clone(f);
                match self.call_native(f, args)? {
                    NativeReturn::Values(vals) => Ok(vals),
                    NativeReturn::Call {
                        func,
                        args,
                        protect,
                    } => {
                        let result = self.call_value(func, args);
                        match protect {
                            None => result,
                            Some(handler) => self.protect_sync_result(result, handler),
                        }
                    }
                }
            }
            LuaValue::Function(f) => {
                let f = Rc::clone(f);
                let floor = self.frames_len();
                self.push_lua_frame(f, args, ResultSink::Final, None)?;
                self.run(floor, false)
            }
            _ => match self.get_metamethod(&func, MetaEvent::Call) {
                Some(handler) => {
                    let mut call_args = vec![func];
                    call_args.extend(args);
                    self.call_value(handler, call_args)
                }
                None => Err(self.runtime_error(format!(
                    "attempt to call a {} value",
                    func.type_name()
                ))),
            },
        }
    }

    /// pcall semantics for a synchronous continuation from a native.
    fn protect_sync_result(
        &mut self,
        result: LuaResult<Vec<LuaValue>>,
        handler: Option<LuaValue>,
    ) -> LuaResult<Vec<LuaValue>> {
        match result {
            Ok(mut vals) => {
                vals.insert(0, LuaValue::Boolean(true));
                Ok(vals)
            }
            Err(err) if !err.is_yield() => {
                let errval = self.apply_message_handler(err.value(), handler);
                Ok(vec![LuaValue::Boolean(false), errval])
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn apply_message_handler(
        &mut self,
        errval: LuaValue,
        handler: Option<LuaValue>,
    ) -> LuaValue {
        match handler {
            None => errval,
            Some(h) => match self.call_value(h, vec![errval]) {
                Ok(vals) => vals.into_iter().next().unwrap_or(LuaValue::Nil),
                Err(_) => self.new_string("error in error handling"),
            },
        }
    }

    // strings

    /// Interned string creation; short strings share one allocation per
    /// content.
    pub fn new_string(&mut self, s: impl AsRef<str>) -> LuaValue {
        self.new_string_bytes(s.as_ref().as_bytes().to_vec())
    }

    pub fn new_string_bytes(&mut self, bytes: Vec<u8>) -> LuaValue {
        if bytes.len() <= 40 {
            if let Some(existing) = self.interner.get(bytes.as_slice()) {
                return LuaValue::String(Rc::clone(existing));
            }
            let rc = Rc::new(LuaString::from_bytes(bytes.clone()));
            self.interner.insert(bytes.into_boxed_slice(), Rc::clone(&rc));
            LuaValue::String(rc)
        } else {
            LuaValue::String(Rc::new(LuaString::from_bytes(bytes)))
        }
    }

    // globals

    pub fn globals(&self) -> Rc<RefCell<LuaTable>> {
        Rc::clone(&self.globals)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = self.new_string(name);
        // nil/NaN cannot occur: the key is a string
        let _ = self.globals.borrow_mut().raw_set(key, value);
    }

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = self.new_string(name);
        self.globals.borrow().raw_get(&key)
    }

    // frame and register plumbing

    pub(crate) fn context(&self) -> &ExecContext {
        self.contexts.last().expect("main context always present")
    }

    pub(crate) fn context_mut(&mut self) -> &mut ExecContext {
        self.contexts.last_mut().expect("main context always present")
    }

    pub(crate) fn frames_len(&self) -> usize {
        self.context().frames.len()
    }

    pub(crate) fn cf(&self) -> &CallFrame {
        self.context().frames.last().expect("dispatch requires a frame")
    }

    pub(crate) fn cf_mut(&mut self) -> &mut CallFrame {
        self.context_mut()
            .frames
            .last_mut()
            .expect("dispatch requires a frame")
    }

    #[inline(always)]
    pub(crate) fn reg(&self, i: u32) -> LuaValue {
        self.cf().reg(i)
    }

    #[inline(always)]
    pub(crate) fn set_reg(&mut self, i: u32, value: LuaValue) {
        self.cf_mut().set_reg(i, value);
    }

    /// RK operand decode against the current frame.
    pub(crate) fn rk(&self, v: i32) -> LuaValue {
        if opcode::rk_is_const(v) {
            self.cf()
                .proto
                .constants
                .get((v - opcode::RK_CONST_BASE) as usize)
                .cloned()
                .unwrap_or(LuaValue::Nil)
        } else {
            self.reg(v as u32)
        }
    }

    // native-call support

    pub(crate) fn call_native(
        &mut self,
        func: Rc<LuaFunction>,
        args: Vec<LuaValue>,
    ) -> LuaResult<NativeReturn> {
        if self.native_depth >= self.options.native_call_limit {
            return Err(self.runtime_error("stack overflow"));
        }
        let cfn = match func.as_native() {
            Some(n) => n.func,
            None => return Err(self.runtime_error("attempt to call a non-native function natively")),
        };
        self.native_depth += 1;
        self.native_calls.push(NativeCall {
            func,
            args,
            context_index: self.contexts.len() - 1,
            frames_below: self.frames_len(),
        });
        let result = cfn(self);
        self.native_calls.pop();
        self.native_depth -= 1;
        result
    }

    fn current_native(&self) -> Option<&NativeCall> {
        self.native_calls.last()
    }

    /// Name of the running native function (for error messages).
    pub fn native_name(&self) -> String {
        match self.current_native() {
            Some(call) => match call.func.as_native() {
                Some(n) => n.name.clone(),
                None => "?".to_string(),
            },
            None => "?".to_string(),
        }
    }

    pub fn arg_count(&self) -> usize {
        self.current_native().map(|c| c.args.len()).unwrap_or(0)
    }

    /// 1-based argument access; absent arguments read as nil.
    pub fn arg(&self, i: usize) -> LuaValue {
        self.current_native()
            .and_then(|c| c.args.get(i.checked_sub(1)?))
            .cloned()
            .unwrap_or(LuaValue::Nil)
    }

    pub fn args_vec(&self) -> Vec<LuaValue> {
        self.current_native().map(|c| c.args.clone()).unwrap_or_default()
    }

    pub fn args_from(&self, i: usize) -> Vec<LuaValue> {
        let args = self.args_vec();
        if i <= 1 {
            args
        } else if i - 1 >= args.len() {
            Vec::new()
        } else {
            args[i - 1..].to_vec()
        }
    }

    pub fn native_upvalue(&self, i: usize) -> LuaValue {
        self.current_native()
            .and_then(|c| c.func.as_native())
            .and_then(|n| n.upvalues.borrow().get(i).cloned())
            .unwrap_or(LuaValue::Nil)
    }

    pub fn set_native_upvalue(&mut self, i: usize, value: LuaValue) {
        if let Some(call) = self.current_native() {
            if let Some(native) = call.func.as_native() {
                let mut upvalues = native.upvalues.borrow_mut();
                if upvalues.len() <= i {
                    upvalues.resize(i + 1, LuaValue::Nil);
                }
                upvalues[i] = value;
            }
        }
    }

    // argument checking (bad argument #n to 'f' ...)

    fn bad_argument(&mut self, i: usize, expected: &str, got: &LuaValue) -> LuaError {
        let got = if self.arg_count() < i {
            "no value".to_string()
        } else {
            got.type_name().to_string()
        };
        let name = self.native_name();
        self.runtime_error(format!(
            "bad argument #{} to '{}' ({} expected, got {})",
            i, name, expected, got
        ))
    }

    pub fn check_any(&mut self, i: usize) -> LuaResult<LuaValue> {
        if self.arg_count() < i {
            let name = self.native_name();
            return Err(self.runtime_error(format!(
                "bad argument #{} to '{}' (value expected)",
                i, name
            )));
        }
        Ok(self.arg(i))
    }

    pub fn check_integer(&mut self, i: usize) -> LuaResult<i64> {
        let v = self.arg(i);
        match v.coerce_integer() {
            Some(n) => Ok(n),
            None => {
                if v.is_number() {
                    let name = self.native_name();
                    Err(self.runtime_error(format!(
                        "bad argument #{} to '{}' (number has no integer representation)",
                        i, name
                    )))
                } else {
                    Err(self.bad_argument(i, "number", &v))
                }
            }
        }
    }

    pub fn check_number(&mut self, i: usize) -> LuaResult<f64> {
        let v = self.arg(i);
        match v.coerce_number().and_then(|n| n.as_float()) {
            Some(f) => Ok(f),
            None => Err(self.bad_argument(i, "number", &v)),
        }
    }

    pub fn check_string(&mut self, i: usize) -> LuaResult<Rc<LuaString>> {
        let v = self.arg(i);
        match &v {
            LuaValue::String(s) => Ok(Rc::clone(s)),
            LuaValue::Integer(_) | LuaValue::Float(_) => {
                Ok(Rc::new(LuaString::from(v.to_string())))
            }
            _ => Err(self.bad_argument(i, "string", &v)),
        }
    }

    pub fn check_table(&mut self, i: usize) -> LuaResult<Rc<RefCell<LuaTable>>> {
        let v = self.arg(i);
        match v.as_table() {
            Some(t) => Ok(t),
            None => Err(self.bad_argument(i, "table", &v)),
        }
    }

    pub fn check_function(&mut self, i: usize) -> LuaResult<LuaValue> {
        let v = self.arg(i);
        if v.is_function() {
            Ok(v)
        } else {
            Err(self.bad_argument(i, "function", &v))
        }
    }

    pub fn check_thread(&mut self, i: usize) -> LuaResult<Rc<RefCell<LuaThread>>> {
        let v = self.arg(i);
        match v.as_thread() {
            Some(t) => Ok(t),
            None => Err(self.bad_argument(i, "coroutine", &v)),
        }
    }

    pub fn opt_integer(&mut self, i: usize, default: i64) -> LuaResult<i64> {
        if self.arg(i).is_nil() {
            Ok(default)
        } else {
            self.check_integer(i)
        }
    }

    pub fn opt_string(&mut self, i: usize, default: &str) -> LuaResult<Rc<LuaString>> {
        if self.arg(i).is_nil() {
            Ok(Rc::new(LuaString::from(default)))
        } else {
            self.check_string(i)
        }
    }

    // error construction

    /// Raise with the current source position prefixed into the error
    /// value, the way the reference VM reports type errors.
    pub fn runtime_error(&mut self, msg: impl Into<String>) -> LuaError {
        let msg = msg.into();
        let position = self
            .context()
            .frames
            .last()
            .map(|frame| (short_source(&frame.proto.source), frame.current_line()));
        let value = match position {
            Some((source, line)) => self.new_string(format!("{}:{}: {}", source, line, msg)),
            None => self.new_string(msg),
        };
        let traceback = self.capture_traceback();
        LuaError::with_traceback(value, traceback)
    }

    /// Raise without position information (library-level errors such as
    /// "cannot resume dead coroutine").
    pub fn error_plain(&mut self, msg: impl Into<String>) -> LuaError {
        let value = self.new_string(msg.into());
        let traceback = self.capture_traceback();
        LuaError::with_traceback(value, traceback)
    }

    /// Raise an arbitrary error value (the error() builtin).
    pub fn error_value(&mut self, value: LuaValue) -> LuaError {
        let traceback = self.capture_traceback();
        LuaError::with_traceback(value, traceback)
    }

    pub(crate) fn capture_traceback(&self) -> Traceback {
        traceback::capture(self)
    }

    /// Register a coroutine for cross-stack upvalue resolution.
    pub(crate) fn register_thread(&mut self, thread: &Rc<RefCell<LuaThread>>) {
        self.known_threads.push(Rc::downgrade(thread));
        if self.known_threads.len() % 64 == 0 {
            self.known_threads.retain(|w| w.strong_count() > 0);
        }
    }
}

impl Default for LuaVM {
    fn default() -> Self {
        LuaVM::new()
    }
}
