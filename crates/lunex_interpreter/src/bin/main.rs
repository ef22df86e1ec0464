use lunex::lua_vm::LuaError;
use lunex::{Compiler, LuaVM, LuaValue};
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const VERSION: &str = "Lunex 5.4 (Lua 5.4 compatible)";
const COPYRIGHT: &str = "Copyright (C) 2026 lunex contributors";

fn print_usage() {
    eprintln!("usage: lua [options] [script [args]]");
    eprintln!("Available options are:");
    eprintln!("  -e stat   execute string 'stat'");
    eprintln!("  -i        enter interactive mode after executing 'script'");
    eprintln!("  -l mod    require library 'mod' into global 'mod'");
    eprintln!("  -v        show version information");
    eprintln!("  --        stop handling options");
    eprintln!("  -         stop handling options and execute stdin");
}

fn print_version() {
    println!("{}", VERSION);
    println!("{}", COPYRIGHT);
}

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    script_file: Option<String>,
    script_args: Vec<String>,
    require_modules: Vec<String>,
    show_version: bool,
    read_stdin: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut i = 1;
    let mut stop_options = false;

    while i < args.len() {
        let arg = &args[i];
        if !stop_options && arg.starts_with('-') && arg.len() > 1 {
            match arg.as_str() {
                "-e" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-e' needs argument".to_string());
                    }
                    opts.execute_strings.push(args[i].clone());
                }
                "-i" => opts.interactive = true,
                "-l" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-l' needs argument".to_string());
                    }
                    opts.require_modules.push(args[i].clone());
                }
                "-v" => opts.show_version = true,
                "--" => stop_options = true,
                _ => return Err(format!("unrecognized option '{}'", arg)),
            }
        } else if !stop_options && arg == "-" {
            opts.read_stdin = true;
            stop_options = true;
        } else {
            opts.script_file = Some(arg.clone());
            i += 1;
            while i < args.len() {
                opts.script_args.push(args[i].clone());
                i += 1;
            }
            break;
        }
        i += 1;
    }
    Ok(opts)
}

fn report_error(vm: &mut LuaVM, err: &LuaError) {
    eprintln!("lua: {}", vm.render_error(err));
}

/// Build the `arg` table: script name at 0, positional arguments from 1.
fn install_arg_table(vm: &mut LuaVM, script: &str, args: &[String]) {
    let table = lunex::lua_value::LuaTable::new();
    let t = match LuaValue::table(table) {
        LuaValue::Table(t) => t,
        _ => return,
    };
    {
        let mut t = t.borrow_mut();
        t.raw_set_int(0, vm.new_string(script));
        for (i, a) in args.iter().enumerate() {
            let v = vm.new_string(a);
            t.raw_set_int(i as i64 + 1, v);
        }
    }
    vm.set_global("arg", LuaValue::Table(t));
}

fn run_source(vm: &mut LuaVM, source: &str, chunk_name: &str) -> bool {
    match vm.execute_named(source, chunk_name) {
        Ok(_) => true,
        Err(err) => {
            report_error(vm, &err);
            false
        }
    }
}

fn repl(vm: &mut LuaVM) {
    let stdin = io::stdin();
    let mut buffer = String::new();
    loop {
        if buffer.is_empty() {
            print!("> ");
        } else {
            print!(">> ");
        }
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return;
            }
            Ok(_) => {}
            Err(_) => return,
        }
        if buffer.is_empty() {
            // `=expr` sugar for printing an expression
            if let Some(rest) = line.trim_start().strip_prefix('=') {
                buffer = format!("return {}", rest);
            } else {
                buffer = line;
            }
        } else {
            buffer.push_str(&line);
        }
        // incomplete statements keep reading lines
        if Compiler::is_incomplete(&buffer) {
            continue;
        }
        let source = std::mem::take(&mut buffer);
        match vm.execute_named(&source, "=stdin") {
            Ok(vals) => {
                if !vals.is_empty() {
                    let rendered: Vec<String> = vals.iter().map(|v| v.to_string()).collect();
                    println!("{}", rendered.join("\t"));
                }
            }
            Err(err) => report_error(vm, &err),
        }
    }
}

fn main() {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("lua: {}", msg);
            print_usage();
            std::process::exit(1);
        }
    };

    let mut vm = LuaVM::new();
    vm.open_libs();

    if opts.show_version {
        print_version();
        if opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.interactive {
            return;
        }
    }

    for module in &opts.require_modules {
        let stmt = format!("{} = require('{}')", module, module);
        if !run_source(&mut vm, &stmt, "=(command line)") {
            std::process::exit(1);
        }
    }

    for chunk in &opts.execute_strings {
        if !run_source(&mut vm, chunk, "=(command line)") {
            std::process::exit(1);
        }
    }

    if let Some(script) = &opts.script_file {
        install_arg_table(&mut vm, script, &opts.script_args);
        let source = match fs::read_to_string(script) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("lua: cannot open {}: {}", script, e);
                std::process::exit(1);
            }
        };
        let chunk_name = format!("@{}", script);
        if !run_source(&mut vm, &source, &chunk_name) {
            std::process::exit(1);
        }
    } else if opts.read_stdin {
        let mut source = String::new();
        if io::Read::read_to_string(&mut io::stdin(), &mut source).is_ok() {
            if !run_source(&mut vm, &source, "=stdin") {
                std::process::exit(1);
            }
        }
    }

    if opts.interactive || (opts.script_file.is_none() && opts.execute_strings.is_empty() && !opts.show_version && !opts.read_stdin) {
        print_version();
        repl(&mut vm);
    }
}
