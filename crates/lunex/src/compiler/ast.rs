// Abstract syntax tree for the Lua 5.4 grammar.

use smol_str::SmolStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attrib {
    None,
    Const,
    Close,
}

#[derive(Debug)]
pub struct Block {
    pub stats: Vec<Stat>,
}

#[derive(Debug)]
pub enum Stat {
    /// expression statement; must be a call at parse time
    ExprStat { expr: Expr, line: u32 },
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
        line: u32,
    },
    Local {
        names: Vec<(SmolStr, Attrib)>,
        values: Vec<Expr>,
        line: u32,
    },
    If {
        arms: Vec<(Expr, Block)>,
        else_block: Option<Block>,
        line: u32,
    },
    While {
        cond: Expr,
        body: Block,
        line: u32,
    },
    Repeat {
        body: Block,
        cond: Expr,
        line: u32,
    },
    NumericFor {
        var: SmolStr,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
        line: u32,
    },
    GenericFor {
        names: Vec<SmolStr>,
        exprs: Vec<Expr>,
        body: Block,
        line: u32,
    },
    Do {
        body: Block,
    },
    Return {
        exprs: Vec<Expr>,
        line: u32,
    },
    Break {
        line: u32,
    },
    Goto {
        label: SmolStr,
        line: u32,
    },
    Label {
        name: SmolStr,
        line: u32,
    },
    /// `function a.b.c:m() ... end`
    Function {
        path: Vec<SmolStr>,
        is_method: bool,
        body: FuncBody,
        line: u32,
    },
    LocalFunction {
        name: SmolStr,
        body: FuncBody,
        line: u32,
    },
}

#[derive(Debug)]
pub struct FuncBody {
    pub params: Vec<SmolStr>,
    pub is_vararg: bool,
    pub block: Block,
    pub line: u32,
    pub end_line: u32,
    /// display name for tracebacks, filled where syntax provides one
    pub name: Option<String>,
}

#[derive(Debug)]
pub enum TableItem {
    Positional(Expr),
    Named(SmolStr, Expr),
    Keyed(Expr, Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
    BNot,
}

#[derive(Debug)]
pub enum Expr {
    Nil(u32),
    True(u32),
    False(u32),
    Integer(i64, u32),
    Float(f64, u32),
    Str(Vec<u8>, u32),
    Vararg(u32),
    Function(FuncBody),
    Name(SmolStr, u32),
    Index {
        obj: Box<Expr>,
        key: Box<Expr>,
        line: u32,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        line: u32,
    },
    MethodCall {
        obj: Box<Expr>,
        method: SmolStr,
        args: Vec<Expr>,
        line: u32,
    },
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        line: u32,
    },
    UnOp {
        op: UnOp,
        operand: Box<Expr>,
        line: u32,
    },
    Table {
        items: Vec<TableItem>,
        line: u32,
    },
    /// parenthesized expression: truncates multiple values to one
    Paren(Box<Expr>),
}

impl Expr {
    pub fn line(&self) -> u32 {
        match self {
            Expr::Nil(l)
            | Expr::True(l)
            | Expr::False(l)
            | Expr::Integer(_, l)
            | Expr::Float(_, l)
            | Expr::Str(_, l)
            | Expr::Vararg(l)
            | Expr::Name(_, l) => *l,
            Expr::Function(body) => body.line,
            Expr::Index { line, .. }
            | Expr::Call { line, .. }
            | Expr::MethodCall { line, .. }
            | Expr::BinOp { line, .. }
            | Expr::UnOp { line, .. }
            | Expr::Table { line, .. } => *line,
            Expr::Paren(inner) => inner.line(),
        }
    }

    /// Calls and `...` can expand to multiple values in tail position.
    pub fn is_multivalue(&self) -> bool {
        matches!(
            self,
            Expr::Call { .. } | Expr::MethodCall { .. } | Expr::Vararg(_)
        )
    }
}
