//! AST node types for catlua.
//!
//! The parser builds these, the desugarer and semantic analyzer mutate them
//! (each pass takes the tree by move), and the IR emitter reads the settled
//! tree. Every node records the 1-based source line it came from.

/// A scope prefix attached to a variable reference (`l!x`, `g!x`, `o!x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Local,
    Global,
    Object,
}

impl Prefix {
    pub fn as_str(self) -> &'static str {
        match self {
            Prefix::Local => "l!",
            Prefix::Global => "g!",
            Prefix::Object => "o!",
        }
    }

    pub fn from_str(s: &str) -> Option<Prefix> {
        match s {
            "l!" => Some(Prefix::Local),
            "g!" => Some(Prefix::Global),
            "o!" => Some(Prefix::Object),
            _ => None,
        }
    }
}

/// A scope keyword on a statement (`local x = ...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Global,
    Object,
}

impl Scope {
    pub fn keyword(self) -> &'static str {
        match self {
            Scope::Local => "local",
            Scope::Global => "global",
            Scope::Object => "object",
        }
    }

    pub fn prefix(self) -> Prefix {
        match self {
            Scope::Local => Prefix::Local,
            Scope::Global => Prefix::Global,
            Scope::Object => Prefix::Object,
        }
    }

    pub fn from_keyword(word: &str) -> Option<Scope> {
        match word {
            "local" => Some(Scope::Local),
            "global" => Some(Scope::Global),
            "object" => Some(Scope::Object),
            _ => None,
        }
    }
}

/// Value of the `type` annotation, selecting specialized lowering paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Audio,
    Input,
    Object,
}

impl ObjectClass {
    pub fn from_str(s: &str) -> Option<ObjectClass> {
        match s {
            "audio" => Some(ObjectClass::Audio),
            "input" => Some(ObjectClass::Input),
            "object" => Some(ObjectClass::Object),
            _ => None,
        }
    }
}

/// The annotation flags a statement can carry.
///
/// Only three keys are honored (`builtin`, `custom`, `type`); anything else
/// in an annotation line is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotations {
    pub force_builtin: bool,
    pub force_custom: bool,
    pub ty: Option<ObjectClass>,
}

impl Annotations {
    /// Set a key, from either `key=value` (line form) or `key value`
    /// (block form). Unknown keys are ignored.
    pub fn apply(&mut self, key: &str, value: Option<&str>) {
        match key {
            "builtin" => self.force_builtin = true,
            "custom" => self.force_custom = true,
            "type" => self.ty = value.and_then(ObjectClass::from_str),
            _ => {}
        }
    }

    /// Remove a key (block annotation with no value).
    pub fn remove(&mut self, key: &str) {
        match key {
            "builtin" => self.force_builtin = false,
            "custom" => self.force_custom = false,
            "type" => self.ty = None,
            _ => {}
        }
    }

    /// Merge line-scoped annotations over block-scoped ones.
    pub fn merged_with(self, line: Annotations) -> Annotations {
        Annotations {
            force_builtin: self.force_builtin || line.force_builtin,
            force_custom: self.force_custom || line.force_custom,
            ty: line.ty.or(self.ty),
        }
    }
}

// ── Expressions ────────────────────────────────────────────────────────

/// A binary operator, ordered by the Pratt precedence table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    Nor,
    Xor,
    And,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    NotContains,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinOp {
    /// Binding strength; higher binds tighter. `^` is right-associative,
    /// everything else left-associative.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Or | BinOp::Nor | BinOp::Xor => 1,
            BinOp::And => 2,
            BinOp::Eq
            | BinOp::Neq
            | BinOp::Lt
            | BinOp::Le
            | BinOp::Gt
            | BinOp::Ge
            | BinOp::Contains
            | BinOp::NotContains => 3,
            BinOp::Concat => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 6,
            BinOp::Pow => 7,
        }
    }

    pub fn is_right_assoc(self) -> bool {
        self == BinOp::Pow
    }

    pub fn from_lexeme(lexeme: &str) -> Option<BinOp> {
        match lexeme {
            "or" => Some(BinOp::Or),
            "nor" => Some(BinOp::Nor),
            "xor" => Some(BinOp::Xor),
            "and" => Some(BinOp::And),
            "==" => Some(BinOp::Eq),
            "~=" => Some(BinOp::Neq),
            "<" => Some(BinOp::Lt),
            "<=" => Some(BinOp::Le),
            ">" => Some(BinOp::Gt),
            ">=" => Some(BinOp::Ge),
            "contains" => Some(BinOp::Contains),
            "not contains" => Some(BinOp::NotContains),
            ".." => Some(BinOp::Concat),
            "+" => Some(BinOp::Add),
            "-" => Some(BinOp::Sub),
            "*" => Some(BinOp::Mul),
            "/" => Some(BinOp::Div),
            "%" => Some(BinOp::Mod),
            "^" => Some(BinOp::Pow),
            _ => None,
        }
    }
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Arithmetic negation `-x`.
    Neg,
    /// Length `#x`.
    Len,
    /// Logical negation `not x`.
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(NumberLit),
    Str(StringLit),
    InterpStr(InterpStringLit),
    Table(TableLit),
    Var(VarRef),
    Prop(Box<PropRef>),
    Index(Box<IndexRef>),
    Binary(Box<BinaryExpr>),
    Unary(Box<UnaryExpr>),
    Call(Box<Call>),
}

impl Expr {
    pub fn line(&self) -> u32 {
        match self {
            Expr::Number(n) => n.line,
            Expr::Str(s) => s.line,
            Expr::InterpStr(s) => s.line,
            Expr::Table(t) => t.line,
            Expr::Var(v) => v.line,
            Expr::Prop(p) => p.line,
            Expr::Index(i) => i.line,
            Expr::Binary(b) => b.line,
            Expr::Unary(u) => u.line,
            Expr::Call(c) => c.line,
        }
    }

    /// The variable reference inside this expression, if it is one.
    pub fn as_var(&self) -> Option<&VarRef> {
        match self {
            Expr::Var(v) => Some(v),
            _ => None,
        }
    }
}

/// A number literal. The source text is kept verbatim; [`NumberLit::value`]
/// reparses it for constant folding.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberLit {
    pub line: u32,
    pub text: String,
}

impl NumberLit {
    pub fn new(line: u32, text: impl Into<String>) -> Self {
        Self { line, text: text.into() }
    }

    pub fn value(&self) -> Option<f64> {
        self.text.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringLit {
    pub line: u32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpStringLit {
    pub line: u32,
    pub value: String,
}

/// The empty table constructor `{}`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLit {
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub line: u32,
    pub name: String,
    pub prefix: Option<Prefix>,
}

impl VarRef {
    pub fn new(line: u32, name: impl Into<String>, prefix: Option<Prefix>) -> Self {
        Self { line, name: name.into(), prefix }
    }

    pub fn is_nil(&self) -> bool {
        self.name == "nil"
    }
}

/// Property access `obj.prop`.
#[derive(Debug, Clone, PartialEq)]
pub struct PropRef {
    pub line: u32,
    pub obj: Expr,
    pub prop: String,
}

/// Index access `table[index]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRef {
    pub line: u32,
    pub table: Expr,
    pub index: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub line: u32,
    pub left: Expr,
    pub op: BinOp,
    pub right: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub line: u32,
    pub op: UnOp,
    pub right: Expr,
}

/// A call in expression position. Statement-position calls wrap this in
/// [`CallStmt`], which adds targets, scope, and the protected/background
/// flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub line: u32,
    pub func: Expr,
    pub args: Vec<Expr>,
}

// ── Statements ─────────────────────────────────────────────────────────

/// Compound and plain assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
}

impl AssignOp {
    pub fn from_lexeme(lexeme: &str) -> Option<AssignOp> {
        match lexeme {
            "=" => Some(AssignOp::Set),
            "+=" => Some(AssignOp::Add),
            "-=" => Some(AssignOp::Sub),
            "*=" => Some(AssignOp::Mul),
            "/=" => Some(AssignOp::Div),
            "^=" => Some(AssignOp::Pow),
            "%=" => Some(AssignOp::Mod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign(AssignStmt),
    If(IfStmt),
    Repeat(RepeatStmt),
    For(ForStmt),
    Call(CallStmt),
    Return(ReturnStmt),
    Break(BreakStmt),
    Delete(DeleteStmt),
    Comment(CommentStmt),
}

impl Stmt {
    pub fn line(&self) -> u32 {
        match self {
            Stmt::Assign(s) => s.line,
            Stmt::If(s) => s.line,
            Stmt::Repeat(s) => s.line,
            Stmt::For(s) => s.line,
            Stmt::Call(s) => s.line,
            Stmt::Return(s) => s.line,
            Stmt::Break(s) => s.line,
            Stmt::Delete(s) => s.line,
            Stmt::Comment(s) => s.line,
        }
    }

    /// Attach merged annotations. Only assignments and calls honor them.
    pub fn set_annotations(&mut self, annotations: Annotations) {
        match self {
            Stmt::Assign(s) => s.annotations = annotations,
            Stmt::Call(s) => s.annotations = annotations,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignStmt {
    pub line: u32,
    pub scope: Option<Scope>,
    pub targets: Vec<Expr>,
    pub value: Expr,
    pub op: AssignOp,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseIf {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub line: u32,
    pub condition: Expr,
    pub true_body: Vec<Stmt>,
    pub else_ifs: Vec<ElseIf>,
    pub false_body: Option<Vec<Stmt>>,
}

/// `repeat [forever|count] ... end`. A missing count means forever.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatStmt {
    pub line: u32,
    pub count: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// `for key, value in pairs(expr) do ... end`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub line: u32,
    pub key: String,
    pub value: String,
    pub iterator: Expr,
    pub body: Vec<Stmt>,
}

/// A call in statement position, carrying the assignment targets when it
/// appeared as the right-hand side of `=` (the call's outputs).
#[derive(Debug, Clone, PartialEq)]
pub struct CallStmt {
    pub line: u32,
    pub call: Call,
    pub is_bg: bool,
    pub targets: Vec<Expr>,
    pub is_protected: bool,
    pub scope: Option<Scope>,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub line: u32,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakStmt {
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub line: u32,
    pub target: Expr,
}

/// A source comment carried through to a `COMMENT` action.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentStmt {
    pub line: u32,
    pub text: String,
}

// ── Top level ──────────────────────────────────────────────────────────

/// One output script: a group of events and functions introduced by
/// `--@ script`, plus the `require` paths collected while it was current.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shard {
    pub alias: String,
    pub requires: Vec<String>,
    pub func_defs: Vec<FuncDef>,
    pub events: Vec<Event>,
}

impl Shard {
    /// Shards with no events or functions are never flushed into the program.
    pub fn is_empty(&self) -> bool {
        self.func_defs.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub line: u32,
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub line: u32,
    pub event_type: String,
    pub args: Vec<String>,
    pub body: Vec<Stmt>,
}

/// The root of a (possibly multi-file) compilation: an ordered list of
/// shards. The linker appends required files' shards after the requiring
/// shard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub shards: Vec<Shard>,
}
