// Coroutine scheduling: resume pushes a fresh execution context and runs
// the dispatch loop; yield travels outward as a control signal carrying
// the transfer values; suspension stores the frame stack on the thread.

use std::cell::RefCell;
use std::rc::Rc;

use super::frame::ResultSink;
use super::lua_error::{LuaError, LuaResult};
use super::{ExecContext, LuaVM};
use crate::lua_value::{LuaThread, LuaValue, ThreadStatus};

impl LuaVM {
    pub fn create_coroutine(&mut self, func: LuaValue) -> LuaValue {
        let thread = Rc::new(RefCell::new(LuaThread::new(func)));
        self.register_thread(&thread);
        LuaValue::Coroutine(thread)
    }

    pub fn current_coroutine(&self) -> Option<Rc<RefCell<LuaThread>>> {
        self.context().coroutine.clone()
    }

    pub fn is_yieldable(&self) -> bool {
        self.context().coroutine.is_some()
    }

    /// coroutine.resume: Ok carries the yield or return values; Err means
    /// resume reports `(false, err)` and the coroutine is dead (or was
    /// never resumable).
    pub fn resume_coroutine(
        &mut self,
        co: Rc<RefCell<LuaThread>>,
        args: Vec<LuaValue>,
    ) -> LuaResult<Vec<LuaValue>> {
        {
            let status = co.borrow().status;
            match status {
                ThreadStatus::Dead => {
                    return Err(self.error_plain("cannot resume dead coroutine"));
                }
                ThreadStatus::Running | ThreadStatus::Normal => {
                    return Err(self.error_plain("cannot resume non-suspended coroutine"));
                }
                ThreadStatus::Suspended => {}
            }
        }
        if let Some(current) = &self.context().coroutine {
            current.borrow_mut().status = ThreadStatus::Normal;
        }
        let (entry, saved_sink, frames) = {
            let mut t = co.borrow_mut();
            t.status = ThreadStatus::Running;
            (
                t.entry.take(),
                t.pending_sink.take(),
                std::mem::take(&mut t.frames),
            )
        };
        self.contexts.push(ExecContext {
            frames,
            coroutine: Some(Rc::clone(&co)),
        });
        self.pending_yield_sink = None;
        let outcome = self.resume_body(entry, saved_sink, args);
        match outcome {
            Ok(vals) => {
                self.contexts.pop();
                co.borrow_mut().status = ThreadStatus::Dead;
                self.unpark_current();
                Ok(vals)
            }
            Err(LuaError::Yield(vals)) => {
                let ctx = self
                    .contexts
                    .pop()
                    .expect("resume pushed a context");
                {
                    let mut t = co.borrow_mut();
                    t.frames = ctx.frames;
                    t.status = ThreadStatus::Suspended;
                    t.pending_sink = self.pending_yield_sink.take();
                }
                self.unpark_current();
                Ok(vals)
            }
            Err(err) => {
                self.contexts.pop();
                co.borrow_mut().status = ThreadStatus::Dead;
                self.unpark_current();
                Err(err)
            }
        }
    }

    fn resume_body(
        &mut self,
        entry: Option<LuaValue>,
        saved_sink: Option<ResultSink>,
        args: Vec<LuaValue>,
    ) -> LuaResult<Vec<LuaValue>> {
        match entry {
            Some(func) => match &func {
                LuaValue::Function(f) if !f.is_native() => {
                    let f = Rc::clone(f);
                    self.push_lua_frame(f, args, ResultSink::Final, None)?;
                    self.run(0, true)
                }
                // native or __call entry runs to completion on this context
                _ => self.call_value(func, args),
            },
            None => {
                // deliver the resume arguments where yield was called
                if let Some(sink) = saved_sink {
                    self.route_results(args, sink);
                }
                self.run(0, true)
            }
        }
    }

    fn unpark_current(&mut self) {
        if let Some(current) = &self.context().coroutine {
            current.borrow_mut().status = ThreadStatus::Running;
        }
    }

    /// coroutine.yield: produces the control signal that unwinds to the
    /// innermost resume. Raises when called on the main thread.
    pub fn do_yield(&mut self, vals: Vec<LuaValue>) -> LuaError {
        if self.context().coroutine.is_none() {
            return self.runtime_error("attempt to yield from outside a coroutine");
        }
        LuaError::Yield(vals)
    }

    /// coroutine.close: run the pending TBC entries of a suspended
    /// coroutine and mark it dead. Returns the close error, if any.
    pub fn close_coroutine(
        &mut self,
        co: Rc<RefCell<LuaThread>>,
    ) -> LuaResult<Option<LuaValue>> {
        {
            let status = co.borrow().status;
            match status {
                ThreadStatus::Dead => return Ok(None),
                ThreadStatus::Suspended => {}
                _ => {
                    return Err(self.error_plain("cannot close a running coroutine"));
                }
            }
        }
        let mut frames = {
            let mut t = co.borrow_mut();
            t.status = ThreadStatus::Dead;
            t.entry = None;
            std::mem::take(&mut t.frames)
        };
        let mut pending_error: Option<LuaValue> = None;
        while let Some(mut frame) = frames.pop() {
            frame.close_upvalues_from(0);
            let mut entries = std::mem::take(&mut frame.tbc);
            while let Some(entry) = entries.pop() {
                let errarg = pending_error.clone().unwrap_or(LuaValue::Nil);
                match self.get_metamethod(&entry.value, super::MetaEvent::Close) {
                    Some(handler) => {
                        if let Err(err) = self.call_value(handler, vec![entry.value, errarg]) {
                            if !err.is_yield() {
                                pending_error = Some(err.value());
                            }
                        }
                    }
                    None => {
                        if !matches!(entry.value, LuaValue::Nil | LuaValue::Boolean(false)) {
                            let err = self
                                .error_plain("variable got a non-closable value");
                            pending_error = Some(err.value());
                        }
                    }
                }
            }
        }
        Ok(pending_error)
    }
}
