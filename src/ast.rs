use crate::precedence::BinaryOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeName {
    Int,
    Bool,
    Str,
    IntArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int {
        pos: Position,
        value: i64,
    },
    Bool {
        pos: Position,
        value: bool,
    },
    Str {
        pos: Position,
        value: String,
    },
    Var {
        pos: Position,
        name: String,
    },
    Index {
        pos: Position,
        array: String,
        index: Box<Expr>,
    },
    Length {
        pos: Position,
        array: String,
    },
    NewArray {
        pos: Position,
        length: Box<Expr>,
    },
    Call {
        pos: Position,
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        pos: Position,
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        pos: Position,
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        pos: Position,
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn pos(&self) -> Position {
        match self {
            Expr::Int { pos, .. }
            | Expr::Bool { pos, .. }
            | Expr::Str { pos, .. }
            | Expr::Var { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::Length { pos, .. }
            | Expr::NewArray { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Unary { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Conditional { pos, .. } => *pos,
        }
    }
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Var(String),
    Index { array: String, index: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Declare {
        pos: Position,
        ty: TypeName,
        name: String,
        value: Option<Expr>,
    },
    /// `op` is `None` for plain `=`, otherwise the operator of a compound assignment.
    Assign {
        pos: Position,
        place: Place,
        op: Option<BinaryOp>,
        value: Expr,
    },
    Increment {
        pos: Position,
        place: Place,
        delta: i64,
    },
    Expr {
        pos: Position,
        expr: Expr,
    },
    If {
        pos: Position,
        branches: Vec<(Expr, Vec<Statement>)>,
        otherwise: Option<Vec<Statement>>,
    },
    While {
        pos: Position,
        condition: Expr,
        body: Vec<Statement>,
    },
    For {
        pos: Position,
        init: Option<Box<Statement>>,
        condition: Option<Expr>,
        update: Option<Box<Statement>>,
        body: Vec<Statement>,
    },
    Break {
        pos: Position,
    },
    Continue {
        pos: Position,
    },
    Block {
        pos: Position,
        body: Vec<Statement>,
    },
}

impl Statement {
    pub fn pos(&self) -> Position {
        match self {
            Statement::Declare { pos, .. }
            | Statement::Assign { pos, .. }
            | Statement::Increment { pos, .. }
            | Statement::Expr { pos, .. }
            | Statement::If { pos, .. }
            | Statement::While { pos, .. }
            | Statement::For { pos, .. }
            | Statement::Break { pos }
            | Statement::Continue { pos }
            | Statement::Block { pos, .. } => *pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub pos: Position,
    pub name: String,
    pub body: Vec<Statement>,
}

/// A parsed program: `void` functions plus the top-level statements run in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub functions: Vec<Function>,
    pub statements: Vec<Statement>,
}
