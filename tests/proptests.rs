//! Property tests for invariants that hold over whole classes of input
//! rather than one fixed example: token positions, keyword casing,
//! wait counts, and determinism of the lex/parse/compile pipeline.

use filly::opcode::{OpKind, Value};
use filly::token::TokenKind;
use filly::{compile, lex, parse};
use proptest::prelude::*;

fn ident_casing_variants(word: &str) -> impl Strategy<Value = String> {
    let word = word.to_string();
    prop::collection::vec(any::<bool>(), word.len()).prop_map(move |flags| {
        word.chars()
            .zip(flags.into_iter().chain(std::iter::repeat(false)))
            .map(|(c, upper)| if upper { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
            .collect()
    })
}

proptest! {
    /// Every token the lexer produces has a 1-indexed, positive
    /// `(line, column)` pair, regardless of what garbage precedes it.
    #[test]
    fn token_positions_are_always_one_indexed(src in ".{0,200}") {
        let (tokens, _) = lex(&src);
        for t in &tokens {
            prop_assert!(t.line >= 1);
            prop_assert!(t.column >= 1);
        }
    }

    /// `mes` in any mix of upper/lower case lexes to the same keyword.
    #[test]
    fn mes_keyword_is_case_insensitive(variant in ident_casing_variants("mes")) {
        let (tokens, _) = lex(&variant);
        prop_assert_eq!(&tokens[0].kind, &TokenKind::KwMes);
    }

    /// `del_all` in any mix of upper/lower case lexes to the same
    /// keyword.
    #[test]
    fn del_all_keyword_is_case_insensitive(variant in ident_casing_variants("del_all")) {
        let (tokens, _) = lex(&variant);
        prop_assert_eq!(&tokens[0].kind, &TokenKind::KwDelAll);
    }

    /// A step body's wait count is always the count of trailing commas
    /// after a command, and a `Wait` opcode never carries a count below
    /// one (a count of zero commas means no `Wait` opcode is emitted
    /// at all, not a `Wait(0)`).
    #[test]
    fn step_wait_opcodes_are_never_below_one(trailing_commas in 0u32..6) {
        let commas = ",".repeat(trailing_commas as usize);
        let src = format!("step(10){{ x = 1;{} }}", commas);
        let (tokens, lex_errors) = lex(&src);
        prop_assert!(lex_errors.is_empty());
        let (program, parse_errors) = parse(&tokens);
        prop_assert!(parse_errors.is_empty());
        let (opcodes, compile_errors) = compile(&program);
        prop_assert!(compile_errors.is_empty());

        let waits: Vec<i64> = opcodes
            .iter()
            .filter(|op| op.cmd == OpKind::Wait)
            .map(|op| match &op.args[0] {
                Value::Int(n) => *n,
                other => panic!("wait arg should be Int, got {:?}", other),
            })
            .collect();

        for n in &waits {
            prop_assert!(*n >= 1);
        }
        if trailing_commas == 0 {
            prop_assert!(waits.is_empty());
        } else {
            prop_assert_eq!(waits.last().copied(), Some(trailing_commas as i64));
        }
    }

    /// Compiling the same source twice always produces the same
    /// opcode stream; the pipeline carries no hidden mutable state
    /// across runs.
    #[test]
    fn compile_pipeline_is_deterministic(
        name in "[a-zA-Z_][a-zA-Z0-9_]{0,8}",
        value in any::<i16>(),
    ) {
        let src = format!("int {}; {} = {};", name, name, value);
        let run = || {
            let (tokens, lex_errors) = lex(&src);
            prop_assert!(lex_errors.is_empty());
            let (program, parse_errors) = parse(&tokens);
            prop_assert!(parse_errors.is_empty());
            Ok::<_, TestCaseError>(compile(&program))
        };
        let (first, first_errors) = run()?;
        let (second, second_errors) = run()?;
        prop_assert_eq!(first, second);
        prop_assert_eq!(first_errors, second_errors);
    }
}
