//! Interactive shell for poking at FILLY source: dump tokens, the AST,
//! the compiled opcode stream, or load a one-liner straight into a
//! scheduler and tick it.

use std::io::{self, Write};

use crate::compiler::compile;
use crate::error::Diagnostic;
use crate::host::HostEnvironment;
use crate::lexer::tokenize_all;
use crate::parser::parse;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub struct ReplConfig {
    pub prompt: String,
    pub verbose: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "filly> ".to_string(),
            verbose: false,
        }
    }
}

/// Interactive shell holding one live scheduler across evaluations, so
/// a `mes(TIME)` block registered on one line keeps running as later
/// lines feed it ticks.
pub struct Repl {
    config: ReplConfig,
    scheduler: Scheduler,
    history: Vec<String>,
}

impl Repl {
    pub fn new() -> Self {
        Self::with_config(ReplConfig::default())
    }

    pub fn with_config(config: ReplConfig) -> Self {
        Self {
            config,
            scheduler: Scheduler::new(HostEnvironment::new()),
            history: Vec::new(),
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        println!("FILLY REPL");
        println!("Type :help for commands, :quit to exit");
        println!();

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut input = String::new();

        loop {
            print!("{}", self.config.prompt);
            stdout.flush()?;

            input.clear();
            if stdin.read_line(&mut input)? == 0 {
                break;
            }

            let line = input.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with(':') {
                if self.handle_command(line) {
                    break;
                }
                continue;
            }

            self.eval(line);
            self.history.push(line.to_string());
        }

        println!("Goodbye!");
        Ok(())
    }

    fn handle_command(&mut self, cmd: &str) -> bool {
        let mut parts = cmd.splitn(2, char::is_whitespace);
        match parts.next().unwrap_or("") {
            ":quit" | ":q" => return true,
            ":help" | ":h" => {
                println!("Commands:");
                println!("  :quit, :q          Exit the REPL");
                println!("  :help, :h          Show this help");
                println!("  :tokens <src>      Dump the token stream");
                println!("  :ast <src>         Dump the parsed program");
                println!("  :ops <src>         Dump the compiled opcode stream");
                println!("  :tick [n]          Advance the live scheduler by n ticks (default 1)");
                println!("  :history           Show command history");
                println!("  :verbose           Toggle verbose mode");
                println!();
                println!("Anything else is loaded into the live scheduler.");
            }
            ":tokens" => {
                if let Some(src) = parts.next() {
                    self.dump_tokens(src);
                }
            }
            ":ast" => {
                if let Some(src) = parts.next() {
                    self.dump_ast(src);
                }
            }
            ":ops" => {
                if let Some(src) = parts.next() {
                    self.dump_ops(src);
                }
            }
            ":tick" => {
                let n: u64 = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(1);
                for _ in 0..n {
                    self.scheduler.tick();
                }
                println!(
                    "ticked {} time(s); live sequences: {}",
                    n,
                    self.scheduler.live_sequence_count()
                );
            }
            ":history" => {
                for (i, line) in self.history.iter().enumerate() {
                    println!("{}: {}", i + 1, line);
                }
            }
            ":verbose" => {
                self.config.verbose = !self.config.verbose;
                println!("Verbose mode: {}", if self.config.verbose { "on" } else { "off" });
            }
            other => {
                println!("Unknown command: {}", other);
            }
        }
        false
    }

    fn dump_tokens(&self, src: &str) {
        let (tokens, errors) = tokenize_all(src);
        for t in &tokens {
            println!("{:?}", t);
        }
        for e in &errors {
            println!("error: {}", e.render());
        }
    }

    fn dump_ast(&self, src: &str) {
        let (tokens, _) = tokenize_all(src);
        let (program, errors) = parse(&tokens);
        println!("{:#?}", program);
        for e in &errors {
            println!("error: {}", e.render());
        }
    }

    fn dump_ops(&self, src: &str) {
        let (tokens, _) = tokenize_all(src);
        let (program, _) = parse(&tokens);
        let (ops, errors) = compile(&program);
        for op in &ops {
            println!("{:?}", op);
        }
        for e in &errors {
            println!("error: {}", e.render());
        }
    }

    /// Lexes, parses, and compiles one line, loading it into the
    /// REPL's persistent scheduler.
    pub fn eval(&mut self, code: &str) {
        let (tokens, lex_errors) = tokenize_all(code);
        if !lex_errors.is_empty() {
            for e in &lex_errors {
                println!("lex error: {}", e.render());
            }
            return;
        }

        let (program, parse_errors) = parse(&tokens);
        if !parse_errors.is_empty() {
            for e in &parse_errors {
                println!("parse error: {}", e.render());
            }
            return;
        }

        let (ops, compile_errors) = compile(&program);
        if !compile_errors.is_empty() {
            for e in &compile_errors {
                println!("compile error: {}", e.render());
            }
            return;
        }

        match self.scheduler.load(&ops) {
            Ok(()) => {
                if self.config.verbose {
                    println!("loaded; live sequences: {}", self.scheduler.live_sequence_count());
                }
            }
            Err(e) => println!("runtime error: {}", e),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repl_starts_with_empty_history() {
        let repl = Repl::new();
        assert!(repl.history.is_empty());
    }

    #[test]
    fn eval_loads_a_global_assignment() {
        let mut repl = Repl::new();
        repl.eval("int x; x = 5;");
        assert_eq!(repl.scheduler().global("x"), Some(&crate::host::RuntimeValue::Int(5)));
    }

    #[test]
    fn eval_reports_parse_errors_without_panicking() {
        let mut repl = Repl::new();
        repl.eval("if ( {");
    }
}
