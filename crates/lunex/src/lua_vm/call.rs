// Call, return, and unwinding machinery: frame push/pop, protected
// boundaries, tail calls, the to-be-closed chain, and error unwinding.

use std::rc::Rc;

use super::frame::{CallFrame, CloseAction, CloseState, ResultSink};
use super::lua_error::{LuaError, LuaResult};
use super::metamethod::MetaEvent;
use super::{LuaVM, NativeReturn};
use crate::lua_value::{LuaFunction, LuaValue};

/// Outcome of advancing a frame's to-be-closed chain.
pub(crate) enum CloseOutcome {
    /// a __close handler frame was pushed; dispatch should loop
    Pushed,
    /// chain drained; finish the interrupted RETURN with these values
    FinishedReturn(Vec<LuaValue>),
    /// chain drained; resume the dispatch loop at the current pc
    FinishedContinue,
    /// chain drained with an error still in flight
    FinishedError(LuaError),
}

impl LuaVM {
    pub(crate) fn push_lua_frame(
        &mut self,
        func: Rc<LuaFunction>,
        args: Vec<LuaValue>,
        sink: ResultSink,
        protect: Option<Option<LuaValue>>,
    ) -> LuaResult<()> {
        let proto = match func.as_lua() {
            Some(closure) => Rc::clone(&closure.proto),
            None => return Err(self.runtime_error("attempt to call a non-Lua function as Lua")),
        };
        if self.frames_len() >= self.options.frame_limit {
            return Err(self.runtime_error("stack overflow"));
        }
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let mut frame = CallFrame::new(frame_id, func, proto, args, sink);
        if let Some(handler) = protect {
            frame.protected.push(handler);
        }
        self.context_mut().frames.push(frame);
        self.fire_call_hook("call")?;
        Ok(())
    }

    /// Start a call from the dispatch loop. Lua callees get a frame;
    /// natives run immediately and have their results routed. `__call`
    /// resolution and native `NativeReturn::Call` delegation both loop
    /// here, accumulating protection boundaries outermost-first.
    pub(crate) fn prepare_call(
        &mut self,
        func: LuaValue,
        args: Vec<LuaValue>,
        sink: ResultSink,
        protect: Option<Option<LuaValue>>,
        call_name: Option<String>,
    ) -> LuaResult<Option<Vec<LuaValue>>> {
        self.prepare_call_carrying(func, args, sink, protect.into_iter().collect(), call_name)
    }

    /// prepare_call with an explicit boundary stack (tail calls hand their
    /// frame's boundaries to the callee).
    pub(crate) fn prepare_call_carrying(
        &mut self,
        func: LuaValue,
        args: Vec<LuaValue>,
        sink: ResultSink,
        protects: Vec<Option<LuaValue>>,
        call_name: Option<String>,
    ) -> LuaResult<Option<Vec<LuaValue>>> {
        let mut func = func;
        let mut args = args;
        let mut call_name = call_name;
        let mut protects = protects;
        let mut call_depth = 0;
        loop {
            let f = match &func {
                LuaValue::Function(f) => Rc::clone(f),
                _ => {
                    call_depth += 1;
                    if call_depth > 16 {
                        return Err(self.runtime_error("'__call' chain too long"));
                    }
                    match self.get_metamethod(&func, MetaEvent::Call) {
                        Some(handler) => {
                            let mut new_args = Vec::with_capacity(args.len() + 1);
                            new_args.push(func);
                            new_args.append(&mut args);
                            args = new_args;
                            func = handler;
                            continue;
                        }
                        None => {
                            let hint = call_name
                                .map(|n| format!(" ({})", n))
                                .unwrap_or_default();
                            return Err(self.runtime_error(format!(
                                "attempt to call a {} value{}",
                                func.type_name(),
                                hint
                            )));
                        }
                    }
                }
            };
            if !f.is_native() {
                self.push_lua_frame(f, args, sink, None)?;
                let frame = self.cf_mut();
                frame.protected = protects;
                frame.call_name = call_name;
                return Ok(None);
            }
            match self.call_native(f, args) {
                Ok(NativeReturn::Values(mut vals)) => {
                    while protects.pop().is_some() {
                        vals.insert(0, LuaValue::Boolean(true));
                    }
                    return Ok(self.route_results(vals, sink));
                }
                Ok(NativeReturn::Call {
                    func: next,
                    args: next_args,
                    protect: inner,
                }) => {
                    if let Some(handler) = inner {
                        protects.push(handler);
                    }
                    func = next;
                    args = next_args;
                    call_name = None;
                }
                Err(LuaError::Yield(vals)) => {
                    self.pending_yield_sink = Some(sink);
                    return Err(LuaError::Yield(vals));
                }
                Err(err) => {
                    // a protected native callee catches its own error
                    if let Some(handler) = protects.pop() {
                        let errval = self.apply_message_handler(err.value(), handler);
                        let mut vals = vec![LuaValue::Boolean(false), errval];
                        while protects.pop().is_some() {
                            vals.insert(0, LuaValue::Boolean(true));
                        }
                        return Ok(self.route_results(vals, sink));
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Deliver results into the current top frame per `sink`. Returns
    /// Some(values) when the sink is Final (values leave the run).
    pub(crate) fn route_results(
        &mut self,
        vals: Vec<LuaValue>,
        sink: ResultSink,
    ) -> Option<Vec<LuaValue>> {
        match sink {
            ResultSink::Registers { dest, nresults } => {
                let frame = self.cf_mut();
                if nresults < 0 {
                    for (i, v) in vals.iter().enumerate() {
                        frame.set_reg(dest + i as u32, v.clone());
                    }
                    frame.top = dest as usize + vals.len();
                } else {
                    for i in 0..nresults as u32 {
                        let v = vals.get(i as usize).cloned().unwrap_or(LuaValue::Nil);
                        frame.set_reg(dest + i, v);
                    }
                }
                None
            }
            ResultSink::Compare { expect } => {
                let truthy = vals.first().map(|v| v.is_truthy()).unwrap_or(false);
                if truthy != expect {
                    self.cf_mut().pc += 1;
                }
                None
            }
            ResultSink::CloseStep => None,
            ResultSink::Final => Some(vals),
        }
    }

    /// Pop the top frame delivering `vals`. Returns Some(values) when the
    /// popped frame was an entry frame (sink Final).
    pub(crate) fn pop_frame_with(&mut self, mut vals: Vec<LuaValue>) -> LuaResult<Option<Vec<LuaValue>>> {
        self.fire_return_hook()?;
        let mut frame = match self.context_mut().frames.pop() {
            Some(f) => f,
            None => return Ok(Some(vals)),
        };
        frame.close_upvalues_from(0);
        while frame.protected.pop().is_some() {
            vals.insert(0, LuaValue::Boolean(true));
        }
        match frame.sink {
            ResultSink::CloseStep => {
                // one __close handler finished; the owner resumes its chain
                Ok(None)
            }
            sink => Ok(self.route_results(vals, sink)),
        }
    }

    /// RETURN: close this frame's TBC entries first (possibly suspending
    /// into a close chain), then pop.
    pub(crate) fn do_return(&mut self, vals: Vec<LuaValue>) -> LuaResult<Option<Vec<LuaValue>>> {
        if self.cf().tbc.is_empty() {
            return self.pop_frame_with(vals);
        }
        self.begin_close(0, None, CloseAction::Return(vals));
        Ok(None)
    }

    /// Set up a close chain on the top frame for registers >= `from`.
    pub(crate) fn begin_close(&mut self, from: u32, error: Option<LuaValue>, action: CloseAction) {
        let frame = self.cf_mut();
        frame.close_upvalues_from(from);
        let pending = frame.take_tbc_from(from);
        frame.closing = Some(CloseState {
            pending,
            error,
            action,
        });
    }

    /// Advance the top frame's close chain: run native handlers inline,
    /// push a frame for a Lua handler, or finish the chain.
    pub(crate) fn advance_close_chain(&mut self) -> LuaResult<CloseOutcome> {
        loop {
            let (entry, errval) = {
                let frame = self.cf_mut();
                let state = match frame.closing.as_mut() {
                    Some(s) => s,
                    None => return Ok(CloseOutcome::FinishedContinue),
                };
                match state.pending.pop() {
                    Some(entry) => {
                        let errval = state.error.clone().unwrap_or(LuaValue::Nil);
                        (Some(entry), errval)
                    }
                    None => (None, LuaValue::Nil),
                }
            };
            let entry = match entry {
                Some(e) => e,
                None => {
                    let state = match self.cf_mut().closing.take() {
                        Some(s) => s,
                        None => return Ok(CloseOutcome::FinishedContinue),
                    };
                    return Ok(match (state.action, state.error) {
                        (_, Some(errval)) => {
                            let traceback = self.capture_traceback();
                            CloseOutcome::FinishedError(LuaError::with_traceback(
                                errval, traceback,
                            ))
                        }
                        (CloseAction::Return(vals), None) => CloseOutcome::FinishedReturn(vals),
                        (CloseAction::Continue, None) | (CloseAction::Propagate, None) => {
                            CloseOutcome::FinishedContinue
                        }
                    });
                }
            };
            match self.get_metamethod(&entry.value, MetaEvent::Close) {
                Some(handler) => {
                    let is_lua = matches!(
                        &handler,
                        LuaValue::Function(f) if !f.is_native()
                    );
                    if is_lua {
                        let f = match &handler {
                            LuaValue::Function(f) => Rc::clone(f),
                            _ => unreachable!(),
                        };
                        self.push_lua_frame(
                            f,
                            vec![entry.value, errval],
                            ResultSink::CloseStep,
                            None,
                        )?;
                        self.cf_mut().is_close_frame = true;
                        return Ok(CloseOutcome::Pushed);
                    }
                    // native handler runs to completion here
                    match self.call_value(handler, vec![entry.value, errval]) {
                        Ok(_) => {}
                        Err(err) => {
                            if let Some(state) = self.cf_mut().closing.as_mut() {
                                state.error = Some(err.value());
                            }
                        }
                    }
                }
                None => {
                    if !matches!(entry.value, LuaValue::Nil | LuaValue::Boolean(false)) {
                        let name = {
                            let frame = self.cf();
                            frame
                                .proto
                                .local_name_at(entry.register, frame.pc as u32)
                                .unwrap_or("?")
                                .to_string()
                        };
                        let err = self.runtime_error(format!(
                            "variable '{}' got a non-closable value",
                            name
                        ));
                        if let Some(state) = self.cf_mut().closing.as_mut() {
                            state.error = Some(err.value());
                        }
                    }
                }
            }
        }
    }

    /// Error unwinding. Returns Ok(None) to resume the dispatch loop,
    /// Ok(Some(values)) when a catch produced the run's final values, and
    /// Err when the error leaves this run entirely.
    pub(crate) fn unwind_error(
        &mut self,
        err: LuaError,
        floor: usize,
    ) -> LuaResult<Option<Vec<LuaValue>>> {
        loop {
            if self.frames_len() <= floor {
                return Err(err);
            }
            // a failing __close handler replaces the owner's in-flight error
            if self.cf().sink == ResultSink::CloseStep {
                if let Some(mut frame) = self.context_mut().frames.pop() {
                    frame.close_upvalues_from(0);
                }
                if let Some(state) = self.cf_mut().closing.as_mut() {
                    state.error = Some(err.value());
                    return Ok(None);
                }
                continue;
            }
            if self.cf().closing.is_some() {
                // error surfaced while this frame is mid-chain (e.g. from a
                // hook): fold it into the chain
                if let Some(state) = self.cf_mut().closing.as_mut() {
                    state.error = Some(err.value());
                }
                return Ok(None);
            }
            if !self.cf().tbc.is_empty() {
                let errval = err.value();
                self.begin_close(0, Some(errval), CloseAction::Propagate);
                return Ok(None);
            }
            if !self.cf().protected.is_empty() {
                let handler = self
                    .cf_mut()
                    .protected
                    .pop()
                    .expect("checked non-empty above");
                let errval = self.apply_message_handler(err.value(), handler);
                let mut vals = vec![LuaValue::Boolean(false), errval];
                let mut frame = self
                    .context_mut()
                    .frames
                    .pop()
                    .expect("frame present during unwind");
                frame.close_upvalues_from(0);
                while frame.protected.pop().is_some() {
                    vals.insert(0, LuaValue::Boolean(true));
                }
                match frame.sink {
                    ResultSink::Final => return Ok(Some(vals)),
                    ResultSink::CloseStep => continue,
                    sink => {
                        self.route_results(vals, sink);
                        return Ok(None);
                    }
                }
            }
            // plain frame: close its upvalues and keep unwinding
            if let Some(mut frame) = self.context_mut().frames.pop() {
                frame.close_upvalues_from(0);
            }
        }
    }

    // debug hooks

    pub(crate) fn fire_call_hook(&mut self, event: &str) -> LuaResult<()> {
        if !self.hook.active() || !self.hook.on_call {
            return Ok(());
        }
        self.fire_hook(event, LuaValue::Nil)
    }

    pub(crate) fn fire_return_hook(&mut self) -> LuaResult<()> {
        if !self.hook.active() || !self.hook.on_return {
            return Ok(());
        }
        self.fire_hook("return", LuaValue::Nil)
    }

    pub(crate) fn fire_hook(&mut self, event: &str, arg: LuaValue) -> LuaResult<()> {
        let func = match &self.hook.func {
            Some(f) => f.clone(),
            None => return Ok(()),
        };
        self.hook.in_hook = true;
        let event_val = self.new_string(event);
        let result = self.call_value(func, vec![event_val, arg]);
        self.hook.in_hook = false;
        result.map(|_| ())
    }
}
