//! Black-box scenarios against the public `filly` API: a whole source
//! string goes in, scheduler/global state comes out. No module
//! internals are reached from here; only what an embedding host sees.

use filly::host::{HostEnvironment, RuntimeValue};
use filly::preprocessor::{preprocess, NoIncluder};
use filly::scheduler::Scheduler;
use filly::{compile, lex, parse};

fn run(src: &str) -> Scheduler {
    let (expanded, _, preprocess_errors) = preprocess(src, &NoIncluder);
    assert!(preprocess_errors.is_empty(), "{:?}", preprocess_errors);
    let (tokens, lex_errors) = lex(&expanded);
    assert!(lex_errors.is_empty(), "{:?}", lex_errors);
    let (program, parse_errors) = parse(&tokens);
    assert!(parse_errors.is_empty(), "{:?}", parse_errors);
    let (opcodes, compile_errors) = compile(&program);
    assert!(compile_errors.is_empty(), "{:?}", compile_errors);
    let mut scheduler = Scheduler::new(HostEnvironment::new());
    scheduler.load(&opcodes).expect("load should not fail");
    scheduler
}

#[test]
fn case_insensitive_mes_registers_a_time_handler() {
    let scheduler = run("MES(Time) { int x; x = 1; }");
    assert_eq!(scheduler.live_sequence_count(), 1);
}

#[test]
fn one_shot_event_only_spawns_on_dispatch() {
    let mut scheduler = run("mes(key) { int x; x = 1; }");
    assert_eq!(scheduler.live_sequence_count(), 0);
    scheduler.dispatch_event("KEY", 0);
    assert_eq!(scheduler.live_sequence_count(), 0); // runs to completion, no Wait
}

#[test]
fn comma_step_body_advances_one_command_per_tick() {
    // `mes(time)` spawns its sequence at load time but does not run it
    // until the first tick; each subsequent tick then runs until the
    // next `Wait`.
    let mut scheduler = run(
        r#"
        int x;
        mes(time) {
            step(1) {
                x = 1;,
                x = 2;,
                x = 3;
            }
        }
        "#,
    );
    scheduler.tick();
    assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(1)));
    scheduler.tick();
    assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(2)));
    scheduler.tick();
    assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(3)));
}

#[test]
fn array_assignment_lowers_and_runs() {
    let mut scheduler = run(
        r#"
        int a[5];
        mes(time) {
            a[2] = 9;
        }
        "#,
    );
    assert_eq!(scheduler.global("a"), Some(&RuntimeValue::Array(vec![])));
    scheduler.tick();
    assert_eq!(
        scheduler.global("a"),
        Some(&RuntimeValue::Array(vec![
            RuntimeValue::Int(0),
            RuntimeValue::Int(0),
            RuntimeValue::Int(9),
        ]))
    );
}

#[test]
fn if_else_if_chain_picks_the_matching_branch() {
    let mut scheduler = run(
        r#"
        int x;
        int y;
        x = 7;
        mes(time) {
            if (x > 10) y = 1;
            else if (x > 5) y = 2;
            else y = 3;
        }
        "#,
    );
    scheduler.tick();
    assert_eq!(scheduler.global("y"), Some(&RuntimeValue::Int(2)));
}

#[test]
fn function_definition_is_not_confused_with_a_call() {
    let scheduler = run(
        r#"
        OP_greet(name) {
            return name;
        }
        mes(time) {
            del_me();
        }
        "#,
    );
    // Defining OP_greet must not itself register an event handler or
    // emit a call; only the `mes(time)` block should spawn a sequence.
    assert_eq!(scheduler.live_sequence_count(), 1);
}

#[test]
fn default_parameters_fill_in_when_the_caller_omits_an_argument() {
    let scheduler = run(
        r#"
        int result;
        OP_add(a, b=10) {
            return a + b;
        }
        result = OP_add(5);
        "#,
    );
    assert_eq!(scheduler.global("result"), Some(&RuntimeValue::Int(15)));
}

#[test]
fn wait_suspends_the_sequence_across_ticks() {
    // `step(2)` means one tick of wall-clock time is two scheduler
    // ticks, so the single comma between the two commands costs two
    // ticks of suspension, not one.
    let mut scheduler = run(
        r#"
        int x;
        mes(time) {
            step(2) {
                x = 1;,
                x = 2;
            }
        }
        "#,
    );
    scheduler.tick();
    assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(1)));
    scheduler.tick();
    assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(1)));
    scheduler.tick();
    assert_eq!(scheduler.global("x"), Some(&RuntimeValue::Int(2)));
}

#[test]
fn del_all_terminates_the_whole_scheduler() {
    let mut scheduler = run(
        r#"
        mes(time) {
            del_all();
        }
        "#,
    );
    assert!(!scheduler.is_terminated());
    scheduler.tick();
    assert!(scheduler.is_terminated());
}
