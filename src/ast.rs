//! Syntax tree produced by the parser.
//!
//! Every node carries the token that anchors it, so later phases can
//! report precise `line:column` diagnostics without re-deriving a
//! position from the subtree.

use crate::token::Token;

/// Declared variable kind. `real` is lexed and accepted as a reserved
/// type keyword but carries no runtime semantics of its own.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclType {
    Int,
    Str,
    Real,
}

/// A function or event-handler parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub decl_type: Option<DeclType>,
    pub is_array: bool,
    pub default: Option<Expr>,
}

/// One command inside a `step(n) { ... }` body: an optional statement
/// followed by a wait count. `stmt = None` represents a leading run of
/// bare commas.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCommand {
    pub stmt: Option<Box<Stmt>>,
    pub wait_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident {
        name: String,
        token: Token,
    },
    Int {
        value: i64,
        token: Token,
    },
    Float {
        value: f64,
        token: Token,
    },
    Str {
        value: String,
        token: Token,
    },
    Prefix {
        op: &'static str,
        operand: Box<Expr>,
        token: Token,
    },
    Infix {
        op: &'static str,
        left: Box<Expr>,
        right: Box<Expr>,
        token: Token,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        token: Token,
    },
    Index {
        name: String,
        index: Box<Expr>,
        token: Token,
    },
    /// Bare `a[]` reference, used only in argument position.
    ArrayRef {
        name: String,
        token: Token,
    },
}

impl Expr {
    pub fn token(&self) -> &Token {
        match self {
            Expr::Ident { token, .. }
            | Expr::Int { token, .. }
            | Expr::Float { token, .. }
            | Expr::Str { token, .. }
            | Expr::Prefix { token, .. }
            | Expr::Infix { token, .. }
            | Expr::Call { token, .. }
            | Expr::Index { token, .. }
            | Expr::ArrayRef { token, .. } => token,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDecl {
        name: String,
        decl_type: DeclType,
        is_array: bool,
        size: Option<Expr>,
        token: Token,
    },
    FunctionDef {
        name: String,
        params: Vec<Param>,
        body: Vec<Stmt>,
        token: Token,
    },
    Block {
        body: Vec<Stmt>,
        token: Token,
    },
    Assign {
        target: Expr,
        value: Expr,
        token: Token,
    },
    ExprStmt {
        expr: Expr,
        token: Token,
    },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
        token: Token,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Vec<Stmt>,
        token: Token,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        token: Token,
    },
    DoWhile {
        cond: Expr,
        body: Vec<Stmt>,
        token: Token,
    },
    Switch {
        value: Expr,
        cases: Vec<(Expr, Vec<Stmt>)>,
        default: Option<Vec<Stmt>>,
        token: Token,
    },
    Break {
        token: Token,
    },
    Continue {
        token: Token,
    },
    Return {
        value: Option<Expr>,
        token: Token,
    },
    Mes {
        event: String,
        body: Vec<Stmt>,
        token: Token,
    },
    Step {
        count: Option<Expr>,
        commands: Vec<StepCommand>,
        token: Token,
    },
    /// Preserved for diagnostics; a label by itself emits no opcode
    /// and there is no corresponding jump instruction.
    Label {
        name: String,
        token: Token,
    },
    Info {
        key: String,
        value: String,
        token: Token,
    },
    Include {
        path: String,
        token: Token,
    },
    Define {
        name: String,
        value: String,
        token: Token,
    },
}

impl Stmt {
    pub fn token(&self) -> &Token {
        match self {
            Stmt::VarDecl { token, .. }
            | Stmt::FunctionDef { token, .. }
            | Stmt::Block { token, .. }
            | Stmt::Assign { token, .. }
            | Stmt::ExprStmt { token, .. }
            | Stmt::If { token, .. }
            | Stmt::For { token, .. }
            | Stmt::While { token, .. }
            | Stmt::DoWhile { token, .. }
            | Stmt::Switch { token, .. }
            | Stmt::Break { token, .. }
            | Stmt::Continue { token, .. }
            | Stmt::Return { token, .. }
            | Stmt::Mes { token, .. }
            | Stmt::Step { token, .. }
            | Stmt::Label { token, .. }
            | Stmt::Info { token, .. }
            | Stmt::Include { token, .. }
            | Stmt::Define { token, .. } => token,
        }
    }
}

/// A whole parsed `.TFY` unit: top-level statements in source order
/// (globals, function definitions, free-standing `mes` handlers, and
/// any preprocessor residue left for the record).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub items: Vec<Stmt>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }
}
