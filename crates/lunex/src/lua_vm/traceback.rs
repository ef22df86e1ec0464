// Traceback capture and rendering.

use super::lua_error::{short_source, FrameRole, TraceEntry, Traceback};
use super::LuaVM;

/// Frame counts around the elision marker for deep stacks.
const TRACEBACK_LIMIT: usize = 22;
const HEAD_FRAMES: usize = 10;
const TAIL_FRAMES: usize = 11;

/// Snapshot the current context's stack, innermost first, interleaving
/// native invocations at the depth they were entered.
pub(crate) fn capture(vm: &LuaVM) -> Traceback {
    let ctx_index = vm.contexts.len() - 1;
    let ctx = vm.contexts.last().expect("main context always present");
    let natives: Vec<_> = vm
        .native_calls
        .iter()
        .filter(|c| c.context_index == ctx_index)
        .collect();
    let mut entries = Vec::new();
    let mut ni = natives.len();
    for depth in (0..=ctx.frames.len()).rev() {
        while ni > 0 && natives[ni - 1].frames_below >= depth {
            ni -= 1;
            let name = natives[ni].func.as_native().map(|n| n.name.clone());
            entries.push(TraceEntry {
                source: "[C]".to_string(),
                line: 0,
                def_line: 0,
                name,
                role: FrameRole::Native,
                is_tail: false,
            });
        }
        if depth > 0 {
            let frame = &ctx.frames[depth - 1];
            let role = if frame.is_close_frame {
                FrameRole::Metamethod
            } else if frame.proto.is_main_chunk() {
                FrameRole::Main
            } else {
                FrameRole::Function
            };
            entries.push(TraceEntry {
                source: frame.proto.source.clone(),
                line: frame.current_line(),
                def_line: frame.proto.line_defined,
                name: frame.call_name.clone(),
                role,
                is_tail: frame.is_tail_call,
            });
        }
    }
    Traceback { entries }
}

/// Extract the bare name out of a hint like `global 'print'`.
fn bare_name(hint: &str) -> &str {
    match (hint.find('\''), hint.rfind('\'')) {
        (Some(a), Some(b)) if b > a => &hint[a + 1..b],
        _ => hint,
    }
}

fn render_entry(entry: &TraceEntry) -> String {
    match entry.role {
        FrameRole::Native => match &entry.name {
            Some(name) => format!("\t[C]: in function '{}'", name),
            None => "\t[C]: in ?".to_string(),
        },
        FrameRole::Main => format!(
            "\t{}:{}: in main chunk",
            short_source(&entry.source),
            entry.line
        ),
        role => {
            let src = short_source(&entry.source);
            match &entry.name {
                Some(name) => {
                    let word = match role {
                        FrameRole::Metamethod => "metamethod",
                        FrameRole::Hook => "hook",
                        FrameRole::Upvalue => "upvalue",
                        _ => "function",
                    };
                    format!("\t{}:{}: in {} '{}'", src, entry.line, word, bare_name(name))
                }
                None => {
                    if entry.role == FrameRole::Metamethod {
                        format!("\t{}:{}: in metamethod", src, entry.line)
                    } else {
                        format!(
                            "\t{}:{}: in function <{}:{}>",
                            src, entry.line, src, entry.def_line
                        )
                    }
                }
            }
        }
    }
}

/// Render per the standard shape: message, `stack traceback:`, one
/// tab-indented line per frame, with deep stacks elided in the middle and
/// main-thread traces ending at the host boundary.
pub fn format_traceback(msg: Option<&str>, tb: &Traceback, ends_at_host: bool) -> String {
    let mut lines: Vec<String> = Vec::new();
    for entry in &tb.entries {
        lines.push(render_entry(entry));
        if entry.is_tail {
            lines.push("\t(...tail calls...)".to_string());
        }
    }
    if ends_at_host {
        lines.push("\t[C]: in ?".to_string());
    }
    let mut out = String::new();
    if let Some(msg) = msg {
        out.push_str(msg);
        out.push('\n');
    }
    out.push_str("stack traceback:");
    if lines.len() > TRACEBACK_LIMIT {
        let skipped = lines.len() - HEAD_FRAMES - TAIL_FRAMES;
        for line in &lines[..HEAD_FRAMES] {
            out.push('\n');
            out.push_str(line);
        }
        out.push_str(&format!("\n\t...\t(skipping {} levels)", skipped));
        for line in &lines[lines.len() - TAIL_FRAMES..] {
            out.push('\n');
            out.push_str(line);
        }
    } else {
        for line in &lines {
            out.push('\n');
            out.push_str(line);
        }
    }
    out
}

impl LuaVM {
    /// Full rendering of an error plus its captured traceback, for hosts
    /// printing an uncaught error.
    pub fn render_error(&mut self, err: &super::LuaError) -> String {
        match err {
            super::LuaError::Runtime(e) => {
                let msg = super::lua_error::display_error_value(&e.value);
                match &e.traceback {
                    Some(tb) => format_traceback(Some(&msg), tb, true),
                    None => msg,
                }
            }
            super::LuaError::Yield(_) => "attempt to yield from outside a coroutine".to_string(),
        }
    }
}
