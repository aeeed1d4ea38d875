//! Opcode model: the flat, structurally recursive instruction stream
//! the compiler produces.

/// Heterogeneous opcode argument. `VarRef` is kept as a variant
/// distinct from `Str` on purpose, so a variable name can never be
/// mistaken for a plain string literal by later passes.
///
/// `Params` carries `DefineFunction`'s parameter-descriptor list. It
/// gets its own small record type rather than being smuggled through
/// `CaseTable` or a `Block`, since a parameter list is a structured
/// key/value record, not a sequence of opcodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    VarRef(String),
    Op(Box<Opcode>),
    Block(Vec<Opcode>),
    CaseTable(Vec<(Value, Vec<Opcode>)>),
    Params(Vec<ParamDesc>),
}

/// Closed set of instruction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Assign,
    ArrayAssign,
    Call,
    BinaryOp,
    UnaryOp,
    ArrayAccess,
    If,
    For,
    While,
    DoWhile,
    Switch,
    Break,
    Continue,
    RegisterEventHandler,
    SetStep,
    Wait,
    DefineFunction,
}

/// One parameter descriptor as carried inside a `DefineFunction`
/// opcode's argument list: `name`, `type`, `isArray`, optional
/// `default`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDesc {
    pub name: String,
    pub r#type: String,
    pub is_array: bool,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Opcode {
    pub cmd: OpKind,
    pub args: Vec<Value>,
}

impl Opcode {
    fn new(cmd: OpKind, args: Vec<Value>) -> Self {
        Self { cmd, args }
    }

    pub fn assign(name: impl Into<String>, value: Value) -> Self {
        Self::new(OpKind::Assign, vec![Value::VarRef(name.into()), value])
    }

    pub fn array_assign(name: impl Into<String>, index: Value, value: Value) -> Self {
        Self::new(
            OpKind::ArrayAssign,
            vec![Value::VarRef(name.into()), index, value],
        )
    }

    pub fn call(name: impl Into<String>, args: Vec<Value>) -> Self {
        let mut all = vec![Value::Str(name.into())];
        all.extend(args);
        Self::new(OpKind::Call, all)
    }

    pub fn binary_op(op: impl Into<String>, left: Value, right: Value) -> Self {
        Self::new(OpKind::BinaryOp, vec![Value::Str(op.into()), left, right])
    }

    pub fn unary_op(op: impl Into<String>, operand: Value) -> Self {
        Self::new(OpKind::UnaryOp, vec![Value::Str(op.into()), operand])
    }

    pub fn array_access(name: impl Into<String>, index: Value) -> Self {
        Self::new(OpKind::ArrayAccess, vec![Value::VarRef(name.into()), index])
    }

    pub fn if_op(cond: Value, then_block: Vec<Opcode>, else_block: Vec<Opcode>) -> Self {
        Self::new(
            OpKind::If,
            vec![cond, Value::Block(then_block), Value::Block(else_block)],
        )
    }

    pub fn for_op(init: Vec<Opcode>, cond: Value, post: Vec<Opcode>, body: Vec<Opcode>) -> Self {
        Self::new(
            OpKind::For,
            vec![
                Value::Block(init),
                cond,
                Value::Block(post),
                Value::Block(body),
            ],
        )
    }

    pub fn while_op(cond: Value, body: Vec<Opcode>) -> Self {
        Self::new(OpKind::While, vec![cond, Value::Block(body)])
    }

    pub fn do_while(cond: Value, body: Vec<Opcode>) -> Self {
        Self::new(OpKind::DoWhile, vec![cond, Value::Block(body)])
    }

    pub fn switch_op(value: Value, cases: Vec<(Value, Vec<Opcode>)>, default: Vec<Opcode>) -> Self {
        Self::new(
            OpKind::Switch,
            vec![value, Value::CaseTable(cases), Value::Block(default)],
        )
    }

    pub fn break_op() -> Self {
        Self::new(OpKind::Break, vec![])
    }

    pub fn continue_op() -> Self {
        Self::new(OpKind::Continue, vec![])
    }

    pub fn register_event_handler(event: impl Into<String>, body: Vec<Opcode>) -> Self {
        Self::new(
            OpKind::RegisterEventHandler,
            vec![Value::Str(event.into()), Value::Block(body)],
        )
    }

    pub fn set_step(duration: i64) -> Self {
        Self::new(OpKind::SetStep, vec![Value::Int(duration)])
    }

    pub fn wait(count: i64) -> Self {
        Self::new(OpKind::Wait, vec![Value::Int(count)])
    }

    pub fn define_function(
        name: impl Into<String>,
        params: Vec<ParamDesc>,
        body: Vec<Opcode>,
    ) -> Self {
        Self::new(
            OpKind::DefineFunction,
            vec![Value::Str(name.into()), Value::Params(params), Value::Block(body)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_shape_matches_canonical_form() {
        let op = Opcode::assign("x", Value::Int(0));
        assert_eq!(op.cmd, OpKind::Assign);
        assert_eq!(op.args, vec![Value::VarRef("x".into()), Value::Int(0)]);
    }

    #[test]
    fn varref_is_distinct_from_str() {
        assert_ne!(Value::VarRef("x".into()), Value::Str("x".into()));
    }

    #[test]
    fn if_blocks_are_never_missing_even_when_empty() {
        let op = Opcode::if_op(Value::Int(1), vec![], vec![]);
        match &op.args[1] {
            Value::Block(b) => assert!(b.is_empty()),
            _ => panic!("expected block"),
        }
    }
}
