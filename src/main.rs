use std::env;
use std::fs;
use std::process::ExitCode;

use filly::error::Diagnostic;
use filly::host::HostEnvironment;
use filly::preprocessor::{preprocess, NoIncluder};
use filly::scheduler::Scheduler;
use filly::{compile, lex, parse, Repl};

fn usage() {
    println!("Usage: filly <file.tfy> [options]");
    println!("       filly repl");
    println!();
    println!("Options:");
    println!("  --max-ticks <n>   Run <n> scheduler ticks after loading (default: 0)");
    println!("  --dump-tokens     Print the token stream instead of running");
    println!("  --dump-ast        Print the parsed program instead of running");
    println!("  --dump-opcodes    Print the compiled opcode stream instead of running");
    println!("  -v                Verbose logging (equivalent to RUST_LOG=filly=debug)");
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("filly=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("filly=warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
        return ExitCode::SUCCESS;
    }

    let verbose = args.iter().any(|a| a == "-v");
    init_tracing(verbose);

    if args[1] == "repl" {
        return match Repl::new().run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("repl error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let filename = &args[1];
    let dump_tokens = args.contains(&"--dump-tokens".to_string());
    let dump_ast = args.contains(&"--dump-ast".to_string());
    let dump_opcodes = args.contains(&"--dump-opcodes".to_string());
    let ticks: u64 = args
        .iter()
        .position(|a| a == "--max-ticks")
        .and_then(|idx| args.get(idx + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let source = match fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read '{}': {}", filename, e);
            return ExitCode::FAILURE;
        }
    };

    let (expanded, infos, preprocess_errors) = preprocess(&source, &NoIncluder);
    for info in &infos {
        tracing::debug!(key = %info.key, value = %info.value, "#info record");
    }
    for e in &preprocess_errors {
        eprintln!("{}", e.render());
    }

    let (tokens, lex_errors) = lex(&expanded);
    for e in &lex_errors {
        eprintln!("{}", e.render());
    }
    if dump_tokens {
        for t in &tokens {
            println!("{:?}", t);
        }
        return ExitCode::SUCCESS;
    }

    let (program, parse_errors) = parse(&tokens);
    for e in &parse_errors {
        eprintln!("{}", e.render());
    }
    if dump_ast {
        println!("{:#?}", program);
        return ExitCode::SUCCESS;
    }

    let (opcodes, compile_errors) = compile(&program);
    for e in &compile_errors {
        eprintln!("{}", e.render());
    }
    if dump_opcodes {
        for op in &opcodes {
            println!("{:?}", op);
        }
        return ExitCode::SUCCESS;
    }

    if !preprocess_errors.is_empty() || !lex_errors.is_empty() || !parse_errors.is_empty() || !compile_errors.is_empty()
    {
        return ExitCode::FAILURE;
    }

    let mut scheduler = Scheduler::new(HostEnvironment::new());
    if let Err(e) = scheduler.load(&opcodes) {
        eprintln!("runtime error during load: {}", e);
        return ExitCode::FAILURE;
    }

    for _ in 0..ticks {
        scheduler.tick();
        if scheduler.is_terminated() {
            break;
        }
    }

    tracing::info!(ticks, live = scheduler.live_sequence_count(), "run complete");
    ExitCode::SUCCESS
}
