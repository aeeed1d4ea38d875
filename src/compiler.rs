//! AST → opcode stream. A structural walk over the tree with one
//! lowering rule per node type.

use crate::ast::{DeclType, Expr, Param, Program, Stmt};
use crate::error::CompileError;
use crate::opcode::{Opcode, ParamDesc, Value};

pub struct Compiler {
    errors: Vec<CompileError>,
}

/// Lowers a whole program to a flat top-level opcode stream, source
/// order preserved.
pub fn compile(program: &Program) -> (Vec<Opcode>, Vec<CompileError>) {
    let mut compiler = Compiler::new();
    let opcodes = compiler.compile_block(&program.items);
    tracing::debug!(opcodes = opcodes.len(), errors = compiler.errors.len(), "compile finished");
    (opcodes, compiler.errors)
}

impl Compiler {
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn error(&mut self, stmt_or_expr_line: u32, stmt_or_expr_column: u32, message: impl Into<String>) {
        self.errors.push(CompileError {
            message: message.into(),
            line: stmt_or_expr_line,
            column: stmt_or_expr_column,
        });
    }

    fn compile_block(&mut self, stmts: &[Stmt]) -> Vec<Opcode> {
        stmts.iter().flat_map(|s| self.compile_stmt(s)).collect()
    }

    fn zero_value(decl_type: &DeclType, is_array: bool) -> Value {
        if is_array {
            return Value::Block(vec![]);
        }
        match decl_type {
            DeclType::Int | DeclType::Real => Value::Int(0),
            DeclType::Str => Value::Str(String::new()),
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Vec<Opcode> {
        match stmt {
            Stmt::VarDecl {
                name,
                decl_type,
                is_array,
                ..
            } => vec![Opcode::assign(name.clone(), Self::zero_value(decl_type, *is_array))],

            Stmt::Assign { target, value, token } => match target {
                Expr::Ident { name, .. } => {
                    vec![Opcode::assign(name.clone(), self.compile_expr(value))]
                }
                Expr::Index { name, index, .. } => {
                    let idx = self.compile_expr(index);
                    let val = self.compile_expr(value);
                    vec![Opcode::array_assign(name.clone(), idx, val)]
                }
                _ => {
                    self.error(token.line, token.column, "assignment target must be an identifier or array index");
                    vec![]
                }
            },

            Stmt::ExprStmt { expr, .. } => match expr {
                Expr::Call { name, args, .. } => {
                    let compiled_args = args.iter().map(|a| self.compile_expr(a)).collect();
                    vec![Opcode::call(name.clone(), compiled_args)]
                }
                Expr::Prefix { .. } | Expr::Infix { .. } | Expr::Index { .. } => {
                    match self.compile_expr(expr) {
                        Value::Op(op) => vec![*op],
                        _ => vec![],
                    }
                }
                _ => vec![],
            },

            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                let c = self.compile_expr(cond);
                let then_ops = self.compile_block(then_branch);
                let else_ops = self.compile_block(else_branch);
                vec![Opcode::if_op(c, then_ops, else_ops)]
            }

            Stmt::For {
                init,
                cond,
                post,
                body,
                ..
            } => {
                let init_ops = init
                    .as_ref()
                    .map(|s| self.compile_stmt(s))
                    .unwrap_or_default();
                let cond_val = cond
                    .as_ref()
                    .map(|e| self.compile_expr(e))
                    .unwrap_or(Value::Int(1));
                let post_ops = post
                    .as_ref()
                    .map(|s| self.compile_stmt(s))
                    .unwrap_or_default();
                let body_ops = self.compile_block(body);
                vec![Opcode::for_op(init_ops, cond_val, post_ops, body_ops)]
            }

            Stmt::While { cond, body, .. } => {
                let c = self.compile_expr(cond);
                let body_ops = self.compile_block(body);
                vec![Opcode::while_op(c, body_ops)]
            }

            Stmt::DoWhile { cond, body, .. } => {
                let c = self.compile_expr(cond);
                let body_ops = self.compile_block(body);
                vec![Opcode::do_while(c, body_ops)]
            }

            Stmt::Switch {
                value,
                cases,
                default,
                ..
            } => {
                let v = self.compile_expr(value);
                let compiled_cases = cases
                    .iter()
                    .map(|(case_value, body)| {
                        let case_val = self.compile_expr(case_value);
                        let body_ops = self.compile_block(body);
                        (case_val, body_ops)
                    })
                    .collect();
                let default_ops = default
                    .as_ref()
                    .map(|d| self.compile_block(d))
                    .unwrap_or_default();
                vec![Opcode::switch_op(v, compiled_cases, default_ops)]
            }

            Stmt::Break { .. } => vec![Opcode::break_op()],
            Stmt::Continue { .. } => vec![Opcode::continue_op()],

            Stmt::Return { value, .. } => {
                let args = match value {
                    Some(v) => vec![self.compile_expr(v)],
                    None => vec![],
                };
                vec![Opcode::call("return", args)]
            }

            Stmt::FunctionDef {
                name, params, body, ..
            } => {
                let param_descs = params.iter().map(|p| self.compile_param(p)).collect();
                let body_ops = self.compile_block(body);
                vec![Opcode::define_function(name.clone(), param_descs, body_ops)]
            }

            Stmt::Mes { event, body, .. } => {
                let body_ops = self.compile_block(body);
                vec![Opcode::register_event_handler(event.clone(), body_ops)]
            }

            Stmt::Step { count, commands, token } => {
                let mut ops = Vec::new();
                if let Some(count_expr) = count {
                    if let Value::Int(n) = self.compile_expr(count_expr) {
                        if n < 1 {
                            self.error(
                                token.line,
                                token.column,
                                format!("step duration must be at least 1, got {}", n),
                            );
                        }
                        ops.push(Opcode::set_step(n.max(1)));
                    }
                }
                for command in commands {
                    if let Some(inner) = &command.stmt {
                        ops.extend(self.compile_stmt(inner));
                    }
                    if command.wait_count > 0 {
                        ops.push(Opcode::wait(command.wait_count as i64));
                    }
                }
                ops
            }

            Stmt::Block { body, .. } => self.compile_block(body),

            // Labels, and preprocessor residue left over from a pass that ran
            // without an `Includer`, carry no runtime behavior.
            Stmt::Label { .. } | Stmt::Info { .. } | Stmt::Include { .. } | Stmt::Define { .. } => {
                vec![]
            }
        }
    }

    fn compile_param(&mut self, param: &Param) -> ParamDesc {
        let r#type = match param.decl_type {
            Some(DeclType::Int) | None => "int",
            Some(DeclType::Str) => "str",
            Some(DeclType::Real) => "real",
        }
        .to_string();
        ParamDesc {
            name: param.name.clone(),
            r#type,
            is_array: param.is_array,
            default: param.default.as_ref().map(|d| self.compile_expr(d)),
        }
    }

    fn compile_expr(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Ident { name, .. } => Value::VarRef(name.clone()),
            Expr::Int { value, .. } => Value::Int(*value),
            Expr::Float { value, .. } => Value::Float(*value),
            Expr::Str { value, .. } => Value::Str(value.clone()),
            Expr::ArrayRef { name, .. } => Value::VarRef(name.clone()),

            Expr::Prefix { op, operand, .. } => {
                let inner = self.compile_expr(operand);
                Value::Op(Box::new(Opcode::unary_op(*op, inner)))
            }

            Expr::Infix { op, left, right, .. } => {
                let l = self.compile_expr(left);
                let r = self.compile_expr(right);
                Value::Op(Box::new(Opcode::binary_op(*op, l, r)))
            }

            Expr::Call { name, args, .. } => {
                let compiled_args = args.iter().map(|a| self.compile_expr(a)).collect();
                Value::Op(Box::new(Opcode::call(name.clone(), compiled_args)))
            }

            Expr::Index { name, index, .. } => {
                let idx = self.compile_expr(index);
                Value::Op(Box::new(Opcode::array_access(name.clone(), idx)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize_all;
    use crate::opcode::OpKind;
    use crate::parser::parse;

    fn compile_src(src: &str) -> (Vec<Opcode>, Vec<CompileError>) {
        let (tokens, lex_errors) = tokenize_all(src);
        assert!(lex_errors.is_empty());
        let (program, parse_errors) = parse(&tokens);
        assert!(parse_errors.is_empty(), "{:?}", parse_errors);
        compile(&program)
    }

    #[test]
    fn var_decl_zero_initializes_by_kind() {
        let (ops, errors) = compile_src("int x; str s; int a[];");
        assert!(errors.is_empty());
        assert_eq!(ops[0].args, vec![Value::VarRef("x".into()), Value::Int(0)]);
        assert_eq!(
            ops[1].args,
            vec![Value::VarRef("s".into()), Value::Str(String::new())]
        );
        assert_eq!(ops[2].args, vec![Value::VarRef("a".into()), Value::Block(vec![])]);
    }

    #[test]
    fn array_assignment_lowers_to_array_assign() {
        let (ops, errors) = compile_src("LPic[i+1] = LoadPic(\"X.BMP\");");
        assert!(errors.is_empty());
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].cmd, OpKind::ArrayAssign);
    }

    #[test]
    fn if_else_if_nests_as_single_opcode() {
        let (ops, errors) = compile_src("if (x>10) y=1; else if (x>5) y=2; else y=3;");
        assert!(errors.is_empty());
        assert_eq!(ops[0].cmd, OpKind::If);
        match &ops[0].args[2] {
            Value::Block(else_block) => {
                assert_eq!(else_block.len(), 1);
                assert_eq!(else_block[0].cmd, OpKind::If);
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn step_zero_is_clamped_and_reported() {
        let (ops, errors) = compile_src("step(0){func1();}");
        assert_eq!(errors.len(), 1);
        assert_eq!(ops[0].cmd, OpKind::SetStep);
        assert_eq!(ops[0].args, vec![Value::Int(1)]);
    }

    #[test]
    fn step_block_emits_set_step_and_waits() {
        let (ops, errors) = compile_src("step(10){func1();, func2();,, }");
        assert!(errors.is_empty());
        assert_eq!(ops[0].cmd, OpKind::SetStep);
        assert_eq!(ops[0].args, vec![Value::Int(10)]);
        assert_eq!(ops[1].cmd, OpKind::Call);
        assert_eq!(ops[2].cmd, OpKind::Wait);
        assert_eq!(ops[2].args, vec![Value::Int(1)]);
        assert_eq!(ops[3].cmd, OpKind::Call);
        assert_eq!(ops[4].cmd, OpKind::Wait);
        assert_eq!(ops[4].args, vec![Value::Int(2)]);
    }

    #[test]
    fn mes_block_uses_canonical_event_name() {
        let (ops, errors) = compile_src("MES(time) { del_me(); }");
        assert!(errors.is_empty());
        assert_eq!(ops[0].cmd, OpKind::RegisterEventHandler);
        assert_eq!(ops[0].args[0], Value::Str("TIME".to_string()));
    }

    #[test]
    fn function_def_compiles_default_params() {
        let (ops, errors) = compile_src("OP_walk(c,p[],x,y,w,h,l=10){}");
        assert!(errors.is_empty());
        match &ops[0].args[1] {
            Value::Params(params) => {
                let l = params.last().unwrap();
                assert_eq!(l.default, Some(Value::Int(10)));
                assert!(params[1].is_array);
            }
            other => panic!("expected params, got {:?}", other),
        }
    }

    #[test]
    fn bare_expression_statement_without_side_effect_emits_nothing() {
        let (ops, errors) = compile_src("x;");
        assert!(errors.is_empty());
        assert!(ops.is_empty());
    }

    #[test]
    fn label_and_preprocessor_residue_emit_nothing() {
        let (ops, errors) = compile_src("top: ;");
        assert!(errors.is_empty());
        assert!(ops.is_empty());
    }
}
