//! Semantic analysis.
//!
//! A single pre-order walk over the AST that
//! - resolves identifier references into local (BP-relative offset) or
//!   global (symbolic name) references,
//! - lays out each function's stack frame, rounding every local up to its
//!   alignment,
//! - assigns a type to every node and inserts the implicit conversions:
//!   array-to-pointer decay in rvalue contexts and the `sizeof(*p)` scale
//!   factor on integer operands of pointer arithmetic,
//! - hoists string literals into anonymous `.L.str{n}` globals,
//! - checks lvalue positions and resolves struct member accesses,
//! - folds `sizeof` / `_Alignof` into integer constants.
//!
//! The walk carries a `decay` flag; the left side of `=`, the operand of
//! unary `&`, and the operands of `sizeof`/`_Alignof` are visited with it
//! cleared.

use crate::ast::{BinaryOp, Node, NodeKind, Program};
use crate::error::CompileError;
use crate::types::{Type, TypeKind, roundup};
use std::collections::HashMap;
use std::mem;

/// A global emitted into the `.data` section (or, for `extern`, only
/// registered for name resolution).
#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    pub ty: Type,
    pub data: Vec<u8>,
    pub is_extern: bool,
}

#[derive(Debug, Clone)]
struct Var {
    ty: Type,
    local: bool,
    offset: usize,
    name: String,
}

pub struct Sema {
    /// Scope stack; index 0 is the global scope.
    env: Vec<HashMap<String, Var>>,
    globals: Vec<GlobalVar>,
    stacksize: usize,
    str_label: usize,
}

/// Analyze the program in place and return the ordered global table.
pub fn analyze(program: &mut Program) -> Result<Vec<GlobalVar>, CompileError> {
    let mut sema = Sema {
        env: vec![HashMap::new()],
        globals: Vec::new(),
        stacksize: 0,
        str_label: 0,
    };
    for node in &mut program.nodes {
        if matches!(node.kind, NodeKind::Func { .. }) {
            sema.walk_func(node)?;
        } else if matches!(node.kind, NodeKind::Vardef { .. }) {
            sema.global_var(node)?;
        } else {
            return Err(CompileError::at(
                &node.span,
                "internal error: unexpected top-level node",
            ));
        }
    }
    Ok(sema.globals)
}

impl Sema {
    fn global_var(&mut self, node: &mut Node) -> Result<(), CompileError> {
        let NodeKind::Vardef {
            name, is_extern, ..
        } = &node.kind
        else {
            return Err(CompileError::at(&node.span, "internal error: not a global"));
        };
        let ty = match &node.ty {
            Some(ty) => ty.clone(),
            None => Type::int_(),
        };
        self.env[0].insert(
            name.clone(),
            Var {
                ty: ty.clone(),
                local: false,
                offset: 0,
                name: name.clone(),
            },
        );
        let data = if *is_extern {
            Vec::new()
        } else {
            vec![0; ty.size]
        };
        self.globals.push(GlobalVar {
            name: name.clone(),
            ty,
            data,
            is_extern: *is_extern,
        });
        Ok(())
    }

    fn walk_func(&mut self, node: &mut Node) -> Result<(), CompileError> {
        let NodeKind::Func {
            name,
            mut params,
            mut body,
            ..
        } = mem::replace(&mut node.kind, NodeKind::Null)
        else {
            return Err(CompileError::at(
                &node.span,
                "internal error: not a function",
            ));
        };

        // Register the function before walking the body so that recursive
        // calls resolve.
        let fnty = match &node.ty {
            Some(ty) => ty.clone(),
            None => Type::func_returning(Type::int_()),
        };
        self.env[0].insert(
            name.clone(),
            Var {
                ty: fnty,
                local: false,
                offset: 0,
                name: name.clone(),
            },
        );

        self.stacksize = 0;
        self.env.push(HashMap::new());
        for p in &mut params {
            self.walk(p, true)?;
        }
        self.walk(&mut body, true)?;
        self.env.pop();

        node.kind = NodeKind::Func {
            name,
            params,
            body,
            stacksize: self.stacksize,
        };
        Ok(())
    }

    fn find_var(&self, name: &str) -> Option<&Var> {
        self.env.iter().rev().find_map(|scope| scope.get(name))
    }

    fn scope_insert(&mut self, name: String, var: Var) {
        if let Some(scope) = self.env.last_mut() {
            scope.insert(name, var);
        }
    }

    /// Rewrite an array-typed node into `&expr[0]` when it is evaluated
    /// in an rvalue context.
    fn maybe_decay(node: &mut Node, decay: bool) {
        if !decay {
            return;
        }
        let Some(ty) = &node.ty else { return };
        let TypeKind::Array { base, .. } = &ty.kind else {
            return;
        };
        let elem = (**base).clone();
        let span = node.span.clone();
        let inner_ty = node.ty.take();
        let inner = Node {
            kind: mem::replace(&mut node.kind, NodeKind::Null),
            ty: inner_ty,
            span: span.clone(),
        };
        node.kind = NodeKind::Addr(Box::new(inner));
        node.ty = Some(Type::ptr_to(elem));
    }

    fn check_lval(node: &Node) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Lvar { .. }
            | NodeKind::Gvar { .. }
            | NodeKind::Deref(_)
            | NodeKind::Dot { .. } => Ok(()),
            _ => Err(CompileError::at(&node.span, "not an lvalue")),
        }
    }

    fn walk(&mut self, node: &mut Node, decay: bool) -> Result<(), CompileError> {
        let kind = mem::replace(&mut node.kind, NodeKind::Null);
        match kind {
            NodeKind::Num(v) => {
                node.kind = NodeKind::Num(v);
                node.ty = Some(Type::int_());
            }

            NodeKind::Str(bytes) => {
                let name = format!(".L.str{}", self.str_label);
                self.str_label += 1;
                let ty = match node.ty.take() {
                    Some(ty) => ty,
                    None => Type::array_of(Type::char_(), bytes.len() + 1),
                };
                let mut data = bytes;
                data.push(0);
                self.globals.push(GlobalVar {
                    name: name.clone(),
                    ty: ty.clone(),
                    data,
                    is_extern: false,
                });
                node.kind = NodeKind::Gvar { name };
                node.ty = Some(ty);
                Self::maybe_decay(node, decay);
            }

            NodeKind::Ident(name) => {
                let Some(var) = self.find_var(&name).cloned() else {
                    return Err(CompileError::at(
                        &node.span,
                        format!("undefined variable: {}", name),
                    ));
                };
                if var.local {
                    node.kind = NodeKind::Lvar { offset: var.offset };
                } else {
                    node.kind = NodeKind::Gvar { name: var.name };
                }
                node.ty = Some(var.ty);
                Self::maybe_decay(node, decay);
            }

            // Already resolved; nothing to do.
            NodeKind::Lvar { offset } => {
                node.kind = NodeKind::Lvar { offset };
            }
            NodeKind::Gvar { name } => {
                node.kind = NodeKind::Gvar { name };
                Self::maybe_decay(node, decay);
            }

            NodeKind::Vardef {
                name,
                mut init,
                is_extern,
                ..
            } => {
                let ty = match &node.ty {
                    Some(ty) => ty.clone(),
                    None => Type::int_(),
                };
                self.stacksize = roundup(self.stacksize, ty.align) + ty.size;
                let offset = self.stacksize;
                self.scope_insert(
                    name.clone(),
                    Var {
                        ty,
                        local: true,
                        offset,
                        name: name.clone(),
                    },
                );
                if let Some(init) = &mut init {
                    self.walk(init, true)?;
                }
                node.kind = NodeKind::Vardef {
                    name,
                    init,
                    offset,
                    is_extern,
                };
            }

            NodeKind::Func { .. } => {
                return Err(CompileError::at(
                    &node.span,
                    "internal error: nested function",
                ));
            }

            NodeKind::CompStmt(mut stmts) => {
                self.env.push(HashMap::new());
                for s in &mut stmts {
                    self.walk(s, true)?;
                }
                self.env.pop();
                node.kind = NodeKind::CompStmt(stmts);
                node.ty = Some(Type::void_());
            }

            NodeKind::ExprStmt(mut expr) => {
                self.walk(&mut expr, true)?;
                node.kind = NodeKind::ExprStmt(expr);
                node.ty = Some(Type::void_());
            }

            NodeKind::StmtExpr(mut body) => {
                self.walk(&mut body, true)?;
                node.kind = NodeKind::StmtExpr(body);
                node.ty = Some(Type::int_());
            }

            NodeKind::If {
                mut cond,
                mut then,
                mut els,
            } => {
                self.walk(&mut cond, true)?;
                self.walk(&mut then, true)?;
                if let Some(els) = &mut els {
                    self.walk(els, true)?;
                }
                node.kind = NodeKind::If { cond, then, els };
                node.ty = Some(Type::void_());
            }

            NodeKind::For {
                mut init,
                mut cond,
                mut inc,
                mut body,
            } => {
                if let Some(init) = &mut init {
                    self.walk(init, true)?;
                }
                if let Some(cond) = &mut cond {
                    self.walk(cond, true)?;
                }
                if let Some(inc) = &mut inc {
                    self.walk(inc, true)?;
                }
                self.walk(&mut body, true)?;
                node.kind = NodeKind::For {
                    init,
                    cond,
                    inc,
                    body,
                };
                node.ty = Some(Type::void_());
            }

            NodeKind::DoWhile { mut body, mut cond } => {
                self.walk(&mut body, true)?;
                self.walk(&mut cond, true)?;
                node.kind = NodeKind::DoWhile { body, cond };
                node.ty = Some(Type::void_());
            }

            NodeKind::Break => {
                node.kind = NodeKind::Break;
                node.ty = Some(Type::void_());
            }

            NodeKind::Return(mut expr) => {
                self.walk(&mut expr, true)?;
                node.kind = NodeKind::Return(expr);
                node.ty = Some(Type::void_());
            }

            NodeKind::Null => {
                node.kind = NodeKind::Null;
                node.ty = Some(Type::void_());
            }

            NodeKind::Binary { op, mut lhs, mut rhs } => {
                self.walk(&mut lhs, true)?;
                self.walk(&mut rhs, true)?;
                if matches!(op, BinaryOp::Add | BinaryOp::Sub) {
                    if rhs.ty.as_ref().is_some_and(Type::is_ptr) {
                        mem::swap(&mut lhs, &mut rhs);
                    }
                    if rhs.ty.as_ref().is_some_and(Type::is_ptr) {
                        let sym = if op == BinaryOp::Add { '+' } else { '-' };
                        return Err(CompileError::at(
                            &node.span,
                            format!("'pointer {} pointer' is not defined", sym),
                        ));
                    }
                    let scale = lhs
                        .ty
                        .as_ref()
                        .and_then(|t| t.pointee())
                        .map(|t| t.size);
                    if let Some(scale) = scale {
                        let span = rhs.span.clone();
                        let num = Box::new(Node::with_ty(
                            NodeKind::Num(scale as i64),
                            Type::int_(),
                            span.clone(),
                        ));
                        rhs = Box::new(Node::with_ty(
                            NodeKind::Binary {
                                op: BinaryOp::Mul,
                                lhs: rhs,
                                rhs: num,
                            },
                            Type::int_(),
                            span,
                        ));
                    }
                }
                node.ty = lhs.ty.clone();
                node.kind = NodeKind::Binary { op, lhs, rhs };
            }

            NodeKind::Assign { mut lhs, mut rhs } => {
                self.walk(&mut lhs, false)?;
                Self::check_lval(&lhs)?;
                self.walk(&mut rhs, true)?;
                node.ty = lhs.ty.clone();
                node.kind = NodeKind::Assign { lhs, rhs };
            }

            NodeKind::AssignOp { op, mut lhs, mut rhs } => {
                self.walk(&mut lhs, false)?;
                Self::check_lval(&lhs)?;
                self.walk(&mut rhs, true)?;
                node.ty = lhs.ty.clone();
                node.kind = NodeKind::AssignOp { op, lhs, rhs };
            }

            NodeKind::Addr(mut expr) => {
                self.walk(&mut expr, false)?;
                Self::check_lval(&expr)?;
                let base = match &expr.ty {
                    Some(ty) => ty.clone(),
                    None => Type::int_(),
                };
                node.ty = Some(Type::ptr_to(base));
                node.kind = NodeKind::Addr(expr);
            }

            NodeKind::Deref(mut expr) => {
                self.walk(&mut expr, true)?;
                let pointee = expr.ty.as_ref().and_then(|t| t.pointee()).cloned();
                let Some(pointee) = pointee else {
                    return Err(CompileError::at(&expr.span, "operand must be a pointer"));
                };
                if matches!(pointee.kind, TypeKind::Void) {
                    return Err(CompileError::at(
                        &expr.span,
                        "cannot dereference void pointer",
                    ));
                }
                node.ty = Some(pointee);
                node.kind = NodeKind::Deref(expr);
                Self::maybe_decay(node, decay);
            }

            NodeKind::Dot {
                mut expr, name, ..
            } => {
                self.walk(&mut expr, true)?;
                let members = match expr.ty.as_ref().map(|t| &t.kind) {
                    Some(TypeKind::Struct(members)) => members.clone(),
                    _ => {
                        return Err(CompileError::at(
                            &expr.span,
                            "struct expected before '.'",
                        ));
                    }
                };
                let Some(member) = members.iter().find(|m| m.name == name) else {
                    return Err(CompileError::at(
                        &node.span,
                        format!("member not found: {}", name),
                    ));
                };
                node.ty = Some(member.ty.clone());
                node.kind = NodeKind::Dot {
                    expr,
                    name,
                    offset: member.offset,
                };
                Self::maybe_decay(node, decay);
            }

            NodeKind::PreInc(mut expr) => {
                self.walk(&mut expr, false)?;
                Self::check_lval(&expr)?;
                node.ty = expr.ty.clone();
                node.kind = NodeKind::PreInc(expr);
            }
            NodeKind::PreDec(mut expr) => {
                self.walk(&mut expr, false)?;
                Self::check_lval(&expr)?;
                node.ty = expr.ty.clone();
                node.kind = NodeKind::PreDec(expr);
            }
            NodeKind::PostInc(mut expr) => {
                self.walk(&mut expr, false)?;
                Self::check_lval(&expr)?;
                node.ty = expr.ty.clone();
                node.kind = NodeKind::PostInc(expr);
            }
            NodeKind::PostDec(mut expr) => {
                self.walk(&mut expr, false)?;
                Self::check_lval(&expr)?;
                node.ty = expr.ty.clone();
                node.kind = NodeKind::PostDec(expr);
            }

            NodeKind::Neg(mut expr) => {
                self.walk(&mut expr, true)?;
                node.ty = expr.ty.clone();
                node.kind = NodeKind::Neg(expr);
            }

            NodeKind::Not(mut expr) => {
                self.walk(&mut expr, true)?;
                node.ty = Some(Type::int_());
                node.kind = NodeKind::Not(expr);
            }

            NodeKind::BitNot(mut expr) => {
                self.walk(&mut expr, true)?;
                node.ty = expr.ty.clone();
                node.kind = NodeKind::BitNot(expr);
            }

            NodeKind::Ternary {
                mut cond,
                mut then,
                mut els,
            } => {
                self.walk(&mut cond, true)?;
                self.walk(&mut then, true)?;
                self.walk(&mut els, true)?;
                node.ty = then.ty.clone();
                node.kind = NodeKind::Ternary { cond, then, els };
            }

            NodeKind::Comma { mut lhs, mut rhs } => {
                self.walk(&mut lhs, true)?;
                self.walk(&mut rhs, true)?;
                node.ty = rhs.ty.clone();
                node.kind = NodeKind::Comma { lhs, rhs };
            }

            NodeKind::Call { name, mut args } => {
                for arg in &mut args {
                    self.walk(arg, true)?;
                }
                if args.len() > 6 {
                    return Err(CompileError::at(
                        &node.span,
                        "more than 6 call arguments are not supported",
                    ));
                }
                let ret = match self.find_var(&name) {
                    Some(var) => match &var.ty.kind {
                        TypeKind::Func(ret) => (**ret).clone(),
                        _ => {
                            return Err(CompileError::at(
                                &node.span,
                                format!("not a function: {}", name),
                            ));
                        }
                    },
                    None => {
                        eprintln!("warning: undefined function: {}", name);
                        Type::int_()
                    }
                };
                node.ty = Some(ret);
                node.kind = NodeKind::Call { name, args };
            }

            NodeKind::Sizeof(mut expr) => {
                self.walk(&mut expr, false)?;
                let size = expr.ty.as_ref().map_or(0, |t| t.size);
                node.kind = NodeKind::Num(size as i64);
                node.ty = Some(Type::int_());
            }

            NodeKind::Alignof(mut expr) => {
                self.walk(&mut expr, false)?;
                let align = expr.ty.as_ref().map_or(1, |t| t.align);
                node.kind = NodeKind::Num(align as i64);
                node.ty = Some(Type::int_());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::parser::Parser;

    fn analyze_src(src: &str) -> (Program, Vec<GlobalVar>) {
        let tokens = crate::tokenize_source(src, "test.c", &CompilerConfig::new()).unwrap();
        let mut program = Parser::new(tokens).parse().unwrap();
        let globals = analyze(&mut program).unwrap();
        (program, globals)
    }

    fn analyze_err(src: &str) -> CompileError {
        let tokens = crate::tokenize_source(src, "test.c", &CompilerConfig::new()).unwrap();
        let mut program = Parser::new(tokens).parse().unwrap();
        analyze(&mut program).unwrap_err()
    }

    fn func_parts(program: &Program, i: usize) -> (&[Node], usize) {
        let NodeKind::Func {
            body, stacksize, ..
        } = &program.nodes[i].kind
        else {
            panic!("expected function");
        };
        let NodeKind::CompStmt(stmts) = &body.kind else {
            panic!("expected compound body");
        };
        (stmts, *stacksize)
    }

    #[test]
    fn test_undefined_variable() {
        let err = analyze_err("int main() { return nope; }");
        assert!(err.message().contains("undefined variable: nope"));
    }

    #[test]
    fn test_stack_layout_respects_alignment() {
        let (program, _) = analyze_src("int main() { char c; int i; return 0; }");
        let (_, stacksize) = func_parts(&program, 0);
        // c at 1, i rounded up to 4 then +4.
        assert_eq!(stacksize, 8);
    }

    #[test]
    fn test_array_stack_size() {
        let (program, _) = analyze_src("int main() { int a[3]; return 0; }");
        let (_, stacksize) = func_parts(&program, 0);
        assert!(stacksize >= 12);
        assert_eq!(stacksize % 4, 0);
    }

    #[test]
    fn test_identifier_resolution() {
        let (program, _) = analyze_src("int g; int main() { int l; l = 1; return g; }");
        let (stmts, _) = func_parts(&program, 1);
        let NodeKind::ExprStmt(assign) = &stmts[1].kind else {
            panic!("expected expression statement");
        };
        let NodeKind::Assign { lhs, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(lhs.kind, NodeKind::Lvar { offset: 4 }));
        let NodeKind::Return(e) = &stmts[2].kind else {
            panic!("expected return");
        };
        assert!(matches!(&e.kind, NodeKind::Gvar { name } if name == "g"));
    }

    #[test]
    fn test_sizeof_folds_to_constant() {
        let (program, _) = analyze_src("int main() { int x; return sizeof(x); }");
        let (stmts, _) = func_parts(&program, 0);
        let NodeKind::Return(e) = &stmts[1].kind else {
            panic!("expected return");
        };
        assert!(matches!(e.kind, NodeKind::Num(4)));
        assert_eq!(e.ty.as_ref().unwrap(), &Type::int_());
    }

    #[test]
    fn test_alignof_folds_to_constant() {
        let (program, _) = analyze_src("int main() { char x; return _Alignof(x); }");
        let (stmts, _) = func_parts(&program, 0);
        let NodeKind::Return(e) = &stmts[1].kind else {
            panic!("expected return");
        };
        assert!(matches!(e.kind, NodeKind::Num(1)));
    }

    #[test]
    fn test_sizeof_array_does_not_decay() {
        let (program, _) = analyze_src("int main() { int a[3]; return sizeof(a); }");
        let (stmts, _) = func_parts(&program, 0);
        let NodeKind::Return(e) = &stmts[1].kind else {
            panic!("expected return");
        };
        assert!(matches!(e.kind, NodeKind::Num(12)));
    }

    #[test]
    fn test_string_literal_hoisting() {
        let (program, globals) = analyze_src("int main() { char *p; p = \"hi\"; return 0; }");
        assert_eq!(globals.len(), 1);
        assert_eq!(globals[0].name, ".L.str0");
        assert_eq!(globals[0].data, b"hi\0");
        assert!(!globals[0].is_extern);
        // The use site decayed into a pointer to the hoisted global.
        let (stmts, _) = func_parts(&program, 0);
        let NodeKind::ExprStmt(assign) = &stmts[1].kind else {
            panic!("expected expression statement");
        };
        let NodeKind::Assign { rhs, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        let NodeKind::Addr(inner) = &rhs.kind else {
            panic!("expected decayed address");
        };
        assert!(matches!(&inner.kind, NodeKind::Gvar { name } if name == ".L.str0"));
    }

    #[test]
    fn test_array_decays_on_assignment() {
        let (program, _) = analyze_src("int main() { int a[2]; int *p; p = a; return 0; }");
        let (stmts, _) = func_parts(&program, 0);
        let NodeKind::ExprStmt(assign) = &stmts[2].kind else {
            panic!("expected expression statement");
        };
        let NodeKind::Assign { rhs, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(rhs.kind, NodeKind::Addr(_)));
        assert!(rhs.ty.as_ref().unwrap().is_ptr());
    }

    #[test]
    fn test_pointer_arithmetic_is_scaled() {
        let (program, _) = analyze_src("int main() { int *p; int *q; q = p + 2; return 0; }");
        let (stmts, _) = func_parts(&program, 0);
        let NodeKind::ExprStmt(assign) = &stmts[2].kind else {
            panic!("expected expression statement");
        };
        let NodeKind::Assign { rhs, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        let NodeKind::Binary {
            op: BinaryOp::Add,
            rhs: scaled,
            ..
        } = &rhs.kind
        else {
            panic!("expected addition");
        };
        let NodeKind::Binary {
            op: BinaryOp::Mul,
            rhs: factor,
            ..
        } = &scaled.kind
        else {
            panic!("expected inserted scale multiplication");
        };
        assert!(matches!(factor.kind, NodeKind::Num(4)));
    }

    #[test]
    fn test_pointer_plus_pointer_rejected() {
        let err = analyze_err("int main() { int *p; int *q; return p + q; }");
        assert!(err.message().contains("pointer"));
    }

    #[test]
    fn test_assignment_to_non_lvalue_rejected() {
        let err = analyze_err("int main() { 1 = 2; return 0; }");
        assert!(err.message().contains("not an lvalue"));
    }

    #[test]
    fn test_deref_of_non_pointer_rejected() {
        let err = analyze_err("int main() { int x; return *x; }");
        assert!(err.message().contains("operand must be a pointer"));
    }

    #[test]
    fn test_deref_of_void_pointer_rejected() {
        let err = analyze_err("int main() { void *p; return *p; }");
        assert!(err.message().contains("void pointer"));
    }

    #[test]
    fn test_member_resolution() {
        let (program, _) =
            analyze_src("int main() { struct { char a; int b; } x; return x.b; }");
        let (stmts, _) = func_parts(&program, 0);
        let NodeKind::Return(e) = &stmts[1].kind else {
            panic!("expected return");
        };
        let NodeKind::Dot { offset, .. } = &e.kind else {
            panic!("expected member access");
        };
        assert_eq!(*offset, 4);
        assert_eq!(e.ty.as_ref().unwrap(), &Type::int_());
    }

    #[test]
    fn test_member_not_found() {
        let err = analyze_err("int main() { struct { int a; } x; return x.b; }");
        assert!(err.message().contains("member not found: b"));
    }

    #[test]
    fn test_call_resolves_return_type() {
        let (program, _) =
            analyze_src("char *f() { return 0; } int main() { char *p; p = f(); return 0; }");
        let (stmts, _) = func_parts(&program, 1);
        let NodeKind::ExprStmt(assign) = &stmts[1].kind else {
            panic!("expected expression statement");
        };
        let NodeKind::Assign { rhs, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        assert!(rhs.ty.as_ref().unwrap().is_ptr());
    }

    #[test]
    fn test_unknown_call_defaults_to_int() {
        let (program, _) = analyze_src("int main() { return putchar(65); }");
        let (stmts, _) = func_parts(&program, 0);
        let NodeKind::Return(e) = &stmts[0].kind else {
            panic!("expected return");
        };
        assert_eq!(e.ty.as_ref().unwrap(), &Type::int_());
    }

    #[test]
    fn test_too_many_call_arguments() {
        let err = analyze_err("int main() { return f(1, 2, 3, 4, 5, 6, 7); }");
        assert!(err.message().contains("more than 6"));
    }

    #[test]
    fn test_every_expression_gets_a_type() {
        let (program, _) = analyze_src(
            "int main() { int a; a = 1 ? 2 : 3; a += ~a; return a && 1 || 0; }",
        );
        fn assert_typed(node: &Node) {
            assert!(node.ty.is_some(), "untyped node: {:?}", node.kind);
        }
        let (stmts, _) = func_parts(&program, 0);
        for s in stmts {
            assert_typed(s);
        }
    }
}
