use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

/// Element references available inside collection helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentRef {
    Element,
    Index,
    Accumulator,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Current(CurrentRef),
}

/// A variable declared through `ai(name, description, type)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiDeclaration {
    pub name: String,
    pub description: String,
    pub kind: String,
}

impl Expr {
    /// The dotted path this expression denotes when it is a chain of member
    /// and literal-index accesses rooted at an identifier.
    pub fn static_path(&self) -> Option<String> {
        match self {
            Expr::Ident(name) => Some(name.clone()),
            Expr::Member(target, field) => {
                let base = target.static_path()?;
                Some(format!("{}.{}", base, field))
            }
            Expr::Index(target, index) => {
                let base = target.static_path()?;
                match index.as_ref() {
                    Expr::Literal(Value::Number(n)) => {
                        let i = n.as_u64()?;
                        Some(format!("{}[{}]", base, i))
                    }
                    Expr::Literal(Value::String(key)) => {
                        if key.contains('.') || key.contains('[') {
                            Some(format!("{}[{:?}]", base, key))
                        } else {
                            Some(format!("{}.{}", base, key))
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Visit this node and every descendant.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Literal(_) | Expr::Ident(_) | Expr::Current(_) => {}
            Expr::Member(target, _) => target.walk(visit),
            Expr::Index(target, index) => {
                target.walk(visit);
                index.walk(visit);
            }
            Expr::Unary(_, operand) => operand.walk(visit),
            Expr::Binary(_, left, right) => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Call(_, args) | Expr::Array(args) => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Object(fields) => {
                for (_, value) in fields {
                    value.walk(visit);
                }
            }
            Expr::Conditional(cond, then, otherwise) => {
                cond.walk(visit);
                then.walk(visit);
                otherwise.walk(visit);
            }
        }
    }

    /// Longest static paths referenced by the expression, plus the literal
    /// arguments of `get()` and `has()`.
    pub fn referenced_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths.sort();
        paths.dedup();
        paths
    }

    fn collect_paths(&self, out: &mut Vec<String>) {
        if let Some(path) = self.static_path() {
            out.push(path);
            return;
        }
        match self {
            Expr::Call(name, args) if name == "get" || name == "has" => {
                if let Some(Expr::Literal(Value::String(path))) = args.first() {
                    out.push(path.clone());
                }
            }
            // ai() declarations are tool arguments, not flow variables
            Expr::Call(name, _) if name == "ai" => {}
            Expr::Call(_, args) | Expr::Array(args) => args.iter().for_each(|a| a.collect_paths(out)),
            Expr::Member(target, _) => target.collect_paths(out),
            Expr::Index(target, index) => {
                target.collect_paths(out);
                index.collect_paths(out);
            }
            Expr::Unary(_, operand) => operand.collect_paths(out),
            Expr::Binary(_, left, right) => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
            Expr::Object(fields) => fields.iter().for_each(|(_, v)| v.collect_paths(out)),
            Expr::Conditional(cond, then, otherwise) => {
                cond.collect_paths(out);
                then.collect_paths(out);
                otherwise.collect_paths(out);
            }
            Expr::Literal(_) | Expr::Ident(_) | Expr::Current(_) => {}
        }
    }

    pub fn ai_declarations(&self) -> Vec<AiDeclaration> {
        let mut found = Vec::new();
        self.walk(&mut |node| {
            if let Expr::Call(name, args) = node {
                if name != "ai" {
                    return;
                }
                let text = |i: usize| match args.get(i) {
                    Some(Expr::Literal(Value::String(s))) => Some(s.clone()),
                    _ => None,
                };
                if let Some(var) = text(0) {
                    found.push(AiDeclaration {
                        name: var,
                        description: text(1).unwrap_or_default(),
                        kind: text(2).unwrap_or_else(|| "string".to_string()),
                    });
                }
            }
        });
        found
    }
}
