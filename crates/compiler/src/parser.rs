//! Recursive-descent parser.
//!
//! Consumes the preprocessed, newline-stripped token stream and produces
//! one AST node per top-level declaration. The expression grammar covers
//! all standard C precedence levels plus the GNU statement expression
//! `({ ... })`.
//!
//! A few constructs are desugared during parse:
//! - `a->b` becomes `(*a).b`
//! - `a[i]` becomes `*(a + i)`
//! - `while (c) s` becomes `for (; c; ) s`
//! - `a > b` / `a >= b` become `b < a` / `b <= a`
//!
//! The parser carries a scope stack with two maps per scope: `typedef`
//! names and `struct` tags. Struct member offsets and the struct's
//! size/alignment are computed greedily as the body is parsed. The parser
//! is deliberately permissive about expression shape (`1 = 2` parses);
//! the semantic analyzer rejects non-lvalue assignment later.

use crate::ast::{BinaryOp, Node, NodeKind, Program};
use crate::error::CompileError;
use crate::scanner::{Span, Token, TokenKind};
use crate::types::{Type, TypeKind};
use std::collections::HashMap;

#[derive(Default)]
struct Scope {
    typedefs: HashMap<String, Type>,
    tags: HashMap<String, Type>,
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    env: Vec<Scope>,
}

impl Parser {
    /// Expects the driver's token stream: newline-stripped and terminated
    /// by an `Eof` sentinel.
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            env: vec![Scope::default()],
        }
    }

    pub fn parse(&mut self) -> Result<Program, CompileError> {
        let mut nodes = Vec::new();
        while !self.check(&TokenKind::Eof) {
            if let Some(node) = self.toplevel()? {
                nodes.push(node);
            }
        }
        Ok(Program { nodes })
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn next(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if t.kind != TokenKind::Eof {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn consume_punct(&mut self, c: char) -> bool {
        self.consume(&TokenKind::Punct(c))
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, CompileError> {
        if self.check(kind) {
            Ok(self.next())
        } else {
            Err(CompileError::at(
                &self.peek().span,
                format!("{} expected", what),
            ))
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<Token, CompileError> {
        self.expect(&TokenKind::Punct(c), &format!("'{}'", c))
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Span), CompileError> {
        let t = self.peek().clone();
        if let TokenKind::Ident(name) = t.kind {
            self.pos += 1;
            Ok((name, t.span))
        } else {
            Err(CompileError::at(&t.span, format!("{} expected", what)))
        }
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn scope_mut(&mut self) -> &mut Scope {
        if self.env.is_empty() {
            self.env.push(Scope::default());
        }
        let last = self.env.len() - 1;
        &mut self.env[last]
    }

    fn find_typedef(&self, name: &str) -> Option<&Type> {
        self.env.iter().rev().find_map(|s| s.typedefs.get(name))
    }

    fn find_tag(&self, name: &str) -> Option<&Type> {
        self.env.iter().rev().find_map(|s| s.tags.get(name))
    }

    fn is_typename(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Int | TokenKind::Char | TokenKind::Void | TokenKind::Struct => true,
            TokenKind::Ident(name) => self.find_typedef(name).is_some(),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Types and declarators
    // ------------------------------------------------------------------

    fn type_(&mut self) -> Result<Type, CompileError> {
        let t = self.peek().clone();
        let mut ty = match &t.kind {
            TokenKind::Int => {
                self.pos += 1;
                Type::int_()
            }
            TokenKind::Char => {
                self.pos += 1;
                Type::char_()
            }
            TokenKind::Void => {
                self.pos += 1;
                Type::void_()
            }
            TokenKind::Struct => self.struct_type()?,
            TokenKind::Ident(name) => match self.find_typedef(name) {
                Some(ty) => {
                    let ty = ty.clone();
                    self.pos += 1;
                    ty
                }
                None => return Err(CompileError::at(&t.span, "typename expected")),
            },
            _ => return Err(CompileError::at(&t.span, "typename expected")),
        };
        while self.consume_punct('*') {
            ty = Type::ptr_to(ty);
        }
        Ok(ty)
    }

    fn struct_type(&mut self) -> Result<Type, CompileError> {
        let struct_tok = self.next();
        let tag = match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.pos += 1;
                Some(name)
            }
            _ => None,
        };

        if self.consume_punct('{') {
            let mut fields = Vec::new();
            while !self.consume_punct('}') {
                if self.check(&TokenKind::Eof) {
                    return Err(CompileError::at(&self.peek().span, "premature end of input"));
                }
                let mty = self.type_()?;
                let (mname, mspan) = self.expect_ident("member name")?;
                let mty = self.read_array(mty, &mspan)?;
                self.expect_punct(';')?;
                fields.push((mname, mty));
            }
            let ty = Type::struct_of(fields);
            if let Some(tag) = tag {
                self.scope_mut().tags.insert(tag, ty.clone());
            }
            Ok(ty)
        } else if let Some(tag) = tag {
            match self.find_tag(&tag) {
                Some(ty) => Ok(ty.clone()),
                None => Err(CompileError::at(
                    &struct_tok.span,
                    format!("incomplete type: struct {}", tag),
                )),
            }
        } else {
            Err(CompileError::at(&struct_tok.span, "bad struct definition"))
        }
    }

    /// Array dimensions after a declarator name. Dimensions must be
    /// number literals.
    fn read_array(&mut self, base: Type, span: &Span) -> Result<Type, CompileError> {
        let mut dims = Vec::new();
        while self.consume_punct('[') {
            let t = self.next();
            let TokenKind::Num(n) = t.kind else {
                return Err(CompileError::at(&t.span, "number expected"));
            };
            self.expect_punct(']')?;
            dims.push(n as usize);
        }
        let mut ty = base;
        for n in dims.into_iter().rev() {
            if matches!(ty.kind, TypeKind::Void) {
                return Err(CompileError::at(span, "array of void"));
            }
            ty = Type::array_of(ty, n);
        }
        Ok(ty)
    }

    // ------------------------------------------------------------------
    // Declarations and statements
    // ------------------------------------------------------------------

    fn toplevel(&mut self) -> Result<Option<Node>, CompileError> {
        let start = self.peek().clone();
        let is_typedef = self.consume(&TokenKind::Typedef);
        let is_extern = self.consume(&TokenKind::Extern);

        let ty = self.type_()?;
        let (name, name_span) = self.expect_ident("function or variable name")?;

        if self.consume_punct('(') {
            if is_typedef {
                return Err(CompileError::at(&start.span, "cannot typedef a function"));
            }
            let mut params = Vec::new();
            if !self.consume_punct(')') {
                loop {
                    params.push(self.param()?);
                    if self.consume_punct(')') {
                        break;
                    }
                    self.expect_punct(',')?;
                }
            }
            let body = self.compound_stmt()?;
            return Ok(Some(Node::with_ty(
                NodeKind::Func {
                    name,
                    params,
                    body: Box::new(body),
                    stacksize: 0,
                },
                Type::func_returning(ty),
                name_span,
            )));
        }

        let ty = self.read_array(ty, &name_span)?;
        self.expect_punct(';')?;
        if is_typedef {
            self.scope_mut().typedefs.insert(name, ty);
            return Ok(None);
        }
        Ok(Some(Node::with_ty(
            NodeKind::Vardef {
                name,
                init: None,
                offset: 0,
                is_extern,
            },
            ty,
            name_span,
        )))
    }

    fn param(&mut self) -> Result<Node, CompileError> {
        let ty = self.type_()?;
        let (name, span) = self.expect_ident("parameter name")?;
        Ok(Node::with_ty(
            NodeKind::Vardef {
                name,
                init: None,
                offset: 0,
                is_extern: false,
            },
            ty,
            span,
        ))
    }

    fn decl(&mut self) -> Result<Node, CompileError> {
        let ty = self.type_()?;
        let (name, span) = self.expect_ident("variable name")?;
        let ty = self.read_array(ty, &span)?;
        let init = if self.consume_punct('=') {
            Some(Box::new(self.assign()?))
        } else {
            None
        };
        self.expect_punct(';')?;
        Ok(Node::with_ty(
            NodeKind::Vardef {
                name,
                init,
                offset: 0,
                is_extern: false,
            },
            ty,
            span,
        ))
    }

    fn expr_stmt(&mut self) -> Result<Node, CompileError> {
        let e = self.expr()?;
        let span = e.span.clone();
        self.expect_punct(';')?;
        Ok(Node::new(NodeKind::ExprStmt(Box::new(e)), span))
    }

    fn stmt(&mut self) -> Result<Node, CompileError> {
        let t = self.peek().clone();
        match t.kind {
            TokenKind::Typedef => {
                self.pos += 1;
                let ty = self.type_()?;
                let (name, span) = self.expect_ident("typedef name")?;
                let ty = self.read_array(ty, &span)?;
                self.expect_punct(';')?;
                self.scope_mut().typedefs.insert(name, ty);
                Ok(Node::new(NodeKind::Null, t.span))
            }
            TokenKind::If => {
                self.pos += 1;
                self.expect_punct('(')?;
                let cond = self.expr()?;
                self.expect_punct(')')?;
                let then = self.stmt()?;
                let els = if self.consume(&TokenKind::Else) {
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                Ok(Node::new(
                    NodeKind::If {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        els,
                    },
                    t.span,
                ))
            }
            TokenKind::For => {
                self.pos += 1;
                self.expect_punct('(')?;
                let init = if self.consume_punct(';') {
                    None
                } else if self.is_typename() {
                    Some(Box::new(self.decl()?))
                } else {
                    Some(Box::new(self.expr_stmt()?))
                };
                let cond = if self.consume_punct(';') {
                    None
                } else {
                    let e = self.expr()?;
                    self.expect_punct(';')?;
                    Some(Box::new(e))
                };
                let inc = if self.check(&TokenKind::Punct(')')) {
                    None
                } else {
                    let e = self.expr()?;
                    let span = e.span.clone();
                    Some(Box::new(Node::new(NodeKind::ExprStmt(Box::new(e)), span)))
                };
                self.expect_punct(')')?;
                let body = self.stmt()?;
                Ok(Node::new(
                    NodeKind::For {
                        init,
                        cond,
                        inc,
                        body: Box::new(body),
                    },
                    t.span,
                ))
            }
            TokenKind::While => {
                self.pos += 1;
                self.expect_punct('(')?;
                let cond = self.expr()?;
                self.expect_punct(')')?;
                let body = self.stmt()?;
                Ok(Node::new(
                    NodeKind::For {
                        init: None,
                        cond: Some(Box::new(cond)),
                        inc: None,
                        body: Box::new(body),
                    },
                    t.span,
                ))
            }
            TokenKind::Do => {
                self.pos += 1;
                let body = self.stmt()?;
                self.expect(&TokenKind::While, "'while'")?;
                self.expect_punct('(')?;
                let cond = self.expr()?;
                self.expect_punct(')')?;
                self.expect_punct(';')?;
                Ok(Node::new(
                    NodeKind::DoWhile {
                        body: Box::new(body),
                        cond: Box::new(cond),
                    },
                    t.span,
                ))
            }
            TokenKind::Break => {
                self.pos += 1;
                self.expect_punct(';')?;
                Ok(Node::new(NodeKind::Break, t.span))
            }
            TokenKind::Return => {
                self.pos += 1;
                let e = self.expr()?;
                self.expect_punct(';')?;
                Ok(Node::new(NodeKind::Return(Box::new(e)), t.span))
            }
            TokenKind::Punct('{') => self.compound_stmt(),
            TokenKind::Punct(';') => {
                self.pos += 1;
                Ok(Node::new(NodeKind::Null, t.span))
            }
            _ if self.is_typename() => self.decl(),
            _ => self.expr_stmt(),
        }
    }

    fn compound_stmt(&mut self) -> Result<Node, CompileError> {
        let open = self.expect_punct('{')?;
        self.env.push(Scope::default());
        let mut stmts = Vec::new();
        while !self.consume_punct('}') {
            if self.check(&TokenKind::Eof) {
                self.env.pop();
                return Err(CompileError::at(&self.peek().span, "premature end of input"));
            }
            stmts.push(self.stmt()?);
        }
        self.env.pop();
        Ok(Node::new(NodeKind::CompStmt(stmts), open.span))
    }

    // ------------------------------------------------------------------
    // Expressions, one method per precedence level
    // ------------------------------------------------------------------

    pub fn expr(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.assign()?;
        while self.consume_punct(',') {
            let rhs = self.assign()?;
            let span = lhs.span.clone();
            lhs = Node::new(
                NodeKind::Comma {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn assign(&mut self) -> Result<Node, CompileError> {
        let lhs = self.conditional()?;
        let t = self.peek().clone();

        if t.kind == TokenKind::Punct('=') {
            self.pos += 1;
            let rhs = self.assign()?;
            return Ok(Node::new(
                NodeKind::Assign {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                t.span,
            ));
        }

        let op = match t.kind {
            TokenKind::MulEq => Some(BinaryOp::Mul),
            TokenKind::DivEq => Some(BinaryOp::Div),
            TokenKind::ModEq => Some(BinaryOp::Mod),
            TokenKind::AddEq => Some(BinaryOp::Add),
            TokenKind::SubEq => Some(BinaryOp::Sub),
            TokenKind::ShlEq => Some(BinaryOp::Shl),
            TokenKind::ShrEq => Some(BinaryOp::Shr),
            TokenKind::AndEq => Some(BinaryOp::BitAnd),
            TokenKind::XorEq => Some(BinaryOp::BitXor),
            TokenKind::OrEq => Some(BinaryOp::BitOr),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let rhs = self.assign()?;
                Ok(Node::new(
                    NodeKind::AssignOp {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    t.span,
                ))
            }
            None => Ok(lhs),
        }
    }

    fn conditional(&mut self) -> Result<Node, CompileError> {
        let cond = self.logor()?;
        if !self.consume_punct('?') {
            return Ok(cond);
        }
        let then = self.expr()?;
        self.expect_punct(':')?;
        let els = self.conditional()?;
        let span = cond.span.clone();
        Ok(Node::new(
            NodeKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                els: Box::new(els),
            },
            span,
        ))
    }

    fn logor(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.logand()?;
        while self.consume(&TokenKind::LogOr) {
            let rhs = self.logand()?;
            lhs = binary(BinaryOp::LogOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn logand(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.bitor()?;
        while self.consume(&TokenKind::LogAnd) {
            let rhs = self.bitor()?;
            lhs = binary(BinaryOp::LogAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bitor(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.bitxor()?;
        while self.consume_punct('|') {
            let rhs = self.bitxor()?;
            lhs = binary(BinaryOp::BitOr, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bitxor(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.bitand()?;
        while self.consume_punct('^') {
            let rhs = self.bitand()?;
            lhs = binary(BinaryOp::BitXor, lhs, rhs);
        }
        Ok(lhs)
    }

    fn bitand(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.equality()?;
        while self.consume_punct('&') {
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::BitAnd, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.relational()?;
        loop {
            if self.consume(&TokenKind::EqEq) {
                let rhs = self.relational()?;
                lhs = binary(BinaryOp::Eq, lhs, rhs);
            } else if self.consume(&TokenKind::Ne) {
                let rhs = self.relational()?;
                lhs = binary(BinaryOp::Ne, lhs, rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn relational(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.shift()?;
        loop {
            if self.consume_punct('<') {
                let rhs = self.shift()?;
                lhs = binary(BinaryOp::Lt, lhs, rhs);
            } else if self.consume_punct('>') {
                let rhs = self.shift()?;
                lhs = binary(BinaryOp::Lt, rhs, lhs);
            } else if self.consume(&TokenKind::Le) {
                let rhs = self.shift()?;
                lhs = binary(BinaryOp::Le, lhs, rhs);
            } else if self.consume(&TokenKind::Ge) {
                let rhs = self.shift()?;
                lhs = binary(BinaryOp::Le, rhs, lhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn shift(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.additive()?;
        loop {
            if self.consume(&TokenKind::Shl) {
                let rhs = self.additive()?;
                lhs = binary(BinaryOp::Shl, lhs, rhs);
            } else if self.consume(&TokenKind::Shr) {
                let rhs = self.additive()?;
                lhs = binary(BinaryOp::Shr, lhs, rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn additive(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.mul()?;
        loop {
            if self.consume_punct('+') {
                let rhs = self.mul()?;
                lhs = binary(BinaryOp::Add, lhs, rhs);
            } else if self.consume_punct('-') {
                let rhs = self.mul()?;
                lhs = binary(BinaryOp::Sub, lhs, rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn mul(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.unary()?;
        loop {
            if self.consume_punct('*') {
                let rhs = self.unary()?;
                lhs = binary(BinaryOp::Mul, lhs, rhs);
            } else if self.consume_punct('/') {
                let rhs = self.unary()?;
                lhs = binary(BinaryOp::Div, lhs, rhs);
            } else if self.consume_punct('%') {
                let rhs = self.unary()?;
                lhs = binary(BinaryOp::Mod, lhs, rhs);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&mut self) -> Result<Node, CompileError> {
        let t = self.peek().clone();
        let kind = match &t.kind {
            TokenKind::Punct('-') => {
                self.pos += 1;
                NodeKind::Neg(Box::new(self.unary()?))
            }
            TokenKind::Punct('!') => {
                self.pos += 1;
                NodeKind::Not(Box::new(self.unary()?))
            }
            TokenKind::Punct('~') => {
                self.pos += 1;
                NodeKind::BitNot(Box::new(self.unary()?))
            }
            TokenKind::Punct('*') => {
                self.pos += 1;
                NodeKind::Deref(Box::new(self.unary()?))
            }
            TokenKind::Punct('&') => {
                self.pos += 1;
                NodeKind::Addr(Box::new(self.unary()?))
            }
            TokenKind::Inc => {
                self.pos += 1;
                NodeKind::PreInc(Box::new(self.unary()?))
            }
            TokenKind::Dec => {
                self.pos += 1;
                NodeKind::PreDec(Box::new(self.unary()?))
            }
            TokenKind::Sizeof => {
                self.pos += 1;
                NodeKind::Sizeof(Box::new(self.unary()?))
            }
            TokenKind::Alignof => {
                self.pos += 1;
                NodeKind::Alignof(Box::new(self.unary()?))
            }
            _ => return self.postfix(),
        };
        Ok(Node::new(kind, t.span))
    }

    fn postfix(&mut self) -> Result<Node, CompileError> {
        let mut node = self.primary()?;
        loop {
            let t = self.peek().clone();
            match t.kind {
                TokenKind::Inc => {
                    self.pos += 1;
                    node = Node::new(NodeKind::PostInc(Box::new(node)), t.span);
                }
                TokenKind::Dec => {
                    self.pos += 1;
                    node = Node::new(NodeKind::PostDec(Box::new(node)), t.span);
                }
                TokenKind::Punct('.') => {
                    self.pos += 1;
                    let (name, span) = self.expect_ident("member name")?;
                    node = Node::new(
                        NodeKind::Dot {
                            expr: Box::new(node),
                            name,
                            offset: 0,
                        },
                        span,
                    );
                }
                TokenKind::Arrow => {
                    self.pos += 1;
                    let (name, span) = self.expect_ident("member name")?;
                    let deref = Node::new(NodeKind::Deref(Box::new(node)), span.clone());
                    node = Node::new(
                        NodeKind::Dot {
                            expr: Box::new(deref),
                            name,
                            offset: 0,
                        },
                        span,
                    );
                }
                TokenKind::Punct('[') => {
                    self.pos += 1;
                    let idx = self.expr()?;
                    self.expect_punct(']')?;
                    let add = Node::new(
                        NodeKind::Binary {
                            op: BinaryOp::Add,
                            lhs: Box::new(node),
                            rhs: Box::new(idx),
                        },
                        t.span.clone(),
                    );
                    node = Node::new(NodeKind::Deref(Box::new(add)), t.span);
                }
                _ => return Ok(node),
            }
        }
    }

    fn primary(&mut self) -> Result<Node, CompileError> {
        let t = self.next();
        match t.kind {
            TokenKind::Punct('(') => {
                if self.check(&TokenKind::Punct('{')) {
                    let body = self.compound_stmt()?;
                    self.expect_punct(')')?;
                    return Ok(Node::new(NodeKind::StmtExpr(Box::new(body)), t.span));
                }
                let e = self.expr()?;
                self.expect_punct(')')?;
                Ok(e)
            }
            TokenKind::Num(v) => Ok(Node::new(NodeKind::Num(v), t.span)),
            TokenKind::Str(bytes) => {
                let ty = Type::array_of(Type::char_(), bytes.len() + 1);
                Ok(Node::with_ty(NodeKind::Str(bytes), ty, t.span))
            }
            TokenKind::Ident(name) => {
                if !self.consume_punct('(') {
                    return Ok(Node::new(NodeKind::Ident(name), t.span));
                }
                let mut args = Vec::new();
                if !self.consume_punct(')') {
                    loop {
                        args.push(self.assign()?);
                        if self.consume_punct(')') {
                            break;
                        }
                        self.expect_punct(',')?;
                    }
                }
                Ok(Node::new(NodeKind::Call { name, args }, t.span))
            }
            _ => Err(CompileError::at(&t.span, "unexpected token")),
        }
    }
}

fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
    let span = lhs.span.clone();
    Node::new(
        NodeKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    fn parse_src(src: &str) -> Program {
        let tokens = crate::tokenize_source(src, "test.c", &CompilerConfig::new()).unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn parse_err(src: &str) -> CompileError {
        let tokens = crate::tokenize_source(src, "test.c", &CompilerConfig::new()).unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    fn main_body(program: &Program) -> &[Node] {
        let NodeKind::Func { body, .. } = &program.nodes[0].kind else {
            panic!("expected function");
        };
        let NodeKind::CompStmt(stmts) = &body.kind else {
            panic!("expected compound body");
        };
        stmts
    }

    #[test]
    fn test_parse_precedence() {
        let program = parse_src("int main() { return 1 + 2 * 3; }");
        let NodeKind::Return(e) = &main_body(&program)[0].kind else {
            panic!("expected return");
        };
        let NodeKind::Binary {
            op: BinaryOp::Add,
            rhs,
            ..
        } = &e.kind
        else {
            panic!("expected addition at the top");
        };
        assert!(matches!(
            rhs.kind,
            NodeKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_bitwise_precedence() {
        // | binds loosest, then ^, then &.
        let program = parse_src("int main() { return 1 | 2 ^ 3 & 4; }");
        let NodeKind::Return(e) = &main_body(&program)[0].kind else {
            panic!("expected return");
        };
        let NodeKind::Binary {
            op: BinaryOp::BitOr,
            rhs,
            ..
        } = &e.kind
        else {
            panic!("expected | at the top");
        };
        let NodeKind::Binary {
            op: BinaryOp::BitXor,
            rhs,
            ..
        } = &rhs.kind
        else {
            panic!("expected ^ under |");
        };
        assert!(matches!(
            rhs.kind,
            NodeKind::Binary {
                op: BinaryOp::BitAnd,
                ..
            }
        ));
    }

    #[test]
    fn test_greater_than_swaps_operands() {
        let program = parse_src("int main() { return 2 > 1; }");
        let NodeKind::Return(e) = &main_body(&program)[0].kind else {
            panic!("expected return");
        };
        let NodeKind::Binary {
            op: BinaryOp::Lt,
            lhs,
            rhs,
        } = &e.kind
        else {
            panic!("expected < after swap");
        };
        assert!(matches!(lhs.kind, NodeKind::Num(1)));
        assert!(matches!(rhs.kind, NodeKind::Num(2)));
    }

    #[test]
    fn test_arrow_is_deref_dot() {
        let program = parse_src("int main() { return p->x; }");
        let NodeKind::Return(e) = &main_body(&program)[0].kind else {
            panic!("expected return");
        };
        let NodeKind::Dot { expr, name, .. } = &e.kind else {
            panic!("expected member access");
        };
        assert_eq!(name, "x");
        assert!(matches!(expr.kind, NodeKind::Deref(_)));
    }

    #[test]
    fn test_index_is_deref_add() {
        let program = parse_src("int main() { return a[3]; }");
        let NodeKind::Return(e) = &main_body(&program)[0].kind else {
            panic!("expected return");
        };
        let NodeKind::Deref(inner) = &e.kind else {
            panic!("expected deref");
        };
        assert!(matches!(
            inner.kind,
            NodeKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_while_becomes_for() {
        let program = parse_src("int main() { while (1) ; return 0; }");
        let NodeKind::For {
            init, cond, inc, ..
        } = &main_body(&program)[0].kind
        else {
            panic!("expected for");
        };
        assert!(init.is_none());
        assert!(cond.is_some());
        assert!(inc.is_none());
    }

    #[test]
    fn test_struct_layout_at_parse_time() {
        let program = parse_src("int main() { struct { char a; int b; } x; return x.b; }");
        let NodeKind::Vardef { .. } = &main_body(&program)[0].kind else {
            panic!("expected declaration");
        };
        let ty = main_body(&program)[0].ty.as_ref().unwrap();
        assert_eq!(ty.size, 8);
        assert_eq!(ty.align, 4);
        let TypeKind::Struct(members) = &ty.kind else {
            panic!("expected struct type");
        };
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 4);
    }

    #[test]
    fn test_typedef_names_types() {
        let program = parse_src("typedef int myint; int main() { myint x; return x; }");
        let decl = &main_body(&program)[0];
        assert_eq!(decl.ty.as_ref().unwrap(), &Type::int_());
    }

    #[test]
    fn test_struct_tag_scoping() {
        let program =
            parse_src("int main() { struct pair { int a; int b; } x; struct pair y; return 0; }");
        let y = &main_body(&program)[1];
        assert_eq!(y.ty.as_ref().unwrap().size, 8);
    }

    #[test]
    fn test_statement_expression() {
        let program = parse_src("int main() { return ({ 1; 2; }); }");
        let NodeKind::Return(e) = &main_body(&program)[0].kind else {
            panic!("expected return");
        };
        assert!(matches!(e.kind, NodeKind::StmtExpr(_)));
    }

    #[test]
    fn test_compound_assignment() {
        let program = parse_src("int main() { int a; a <<= 2; return a; }");
        let NodeKind::ExprStmt(e) = &main_body(&program)[1].kind else {
            panic!("expected expression statement");
        };
        assert!(matches!(
            e.kind,
            NodeKind::AssignOp {
                op: BinaryOp::Shl,
                ..
            }
        ));
    }

    #[test]
    fn test_nonliteral_array_dimension_rejected() {
        let err = parse_err("int main() { int a[n]; return 0; }");
        assert!(err.message().contains("number expected"));
    }

    #[test]
    fn test_missing_struct_definition_rejected() {
        let err = parse_err("int main() { struct nope x; return 0; }");
        assert!(err.message().contains("incomplete type"));
    }

    #[test]
    fn test_array_of_void_rejected() {
        let err = parse_err("int main() { void a[3]; return 0; }");
        assert!(err.message().contains("array of void"));
    }

    #[test]
    fn test_global_and_extern() {
        let program = parse_src("extern int e; int g; int main() { return g; }");
        let NodeKind::Vardef { is_extern, .. } = &program.nodes[0].kind else {
            panic!("expected global");
        };
        assert!(*is_extern);
        let NodeKind::Vardef { is_extern, .. } = &program.nodes[1].kind else {
            panic!("expected global");
        };
        assert!(!*is_extern);
    }
}
