//! Lowering from the typed AST to IR.
//!
//! Expressions evaluate into fresh virtual registers; every intermediate
//! is retired with `KILL` as soon as the value moves up the tree, so at
//! most one unkilled temporary exists per leaf and the allocator's seven
//! registers suffice for any program the grammar accepts.
//!
//! Control flow lowers to label/branch idioms: `if` and the short-circuit
//! operators use `UNLESS` with fall-through, loops save and restore the
//! enclosing break label, and a statement expression installs a return
//! sink (a register and a label) that `return` inside the braces targets
//! instead of the function epilogue.

use crate::ast::{BinaryOp, Node, NodeKind, Program};
use crate::error::CompileError;
use crate::ir::{Function, Instr, IrOp};
use crate::types::Type;
use std::mem;

pub struct IrGen {
    code: Vec<Instr>,
    nreg: i64,
    nlabel: i64,
    break_label: Option<i64>,
    /// Return sink of the innermost statement expression: (label, register).
    sink: Option<(i64, i64)>,
}

/// Lower every function of an analyzed program.
pub fn generate(program: &Program) -> Result<Vec<Function>, CompileError> {
    let mut g = IrGen {
        code: Vec::new(),
        nreg: 1,
        nlabel: 0,
        break_label: None,
        sink: None,
    };
    let mut fns = Vec::new();

    for node in &program.nodes {
        let NodeKind::Func {
            name,
            params,
            body,
            stacksize,
        } = &node.kind
        else {
            continue;
        };
        g.code = Vec::new();
        g.nreg = 1;
        for (i, p) in params.iter().enumerate() {
            g.gen_param(p, i as i64)?;
        }
        g.gen_stmt(body)?;
        fns.push(Function {
            name: name.clone(),
            stacksize: *stacksize,
            ir: mem::take(&mut g.code),
        });
    }
    Ok(fns)
}

fn ty_of(node: &Node) -> Result<&Type, CompileError> {
    node.ty
        .as_ref()
        .ok_or_else(|| CompileError::at(&node.span, "internal error: missing type"))
}

fn binop_ir(op: BinaryOp) -> Option<IrOp> {
    let ir = match op {
        BinaryOp::Add => IrOp::Add,
        BinaryOp::Sub => IrOp::Sub,
        BinaryOp::Mul => IrOp::Mul,
        BinaryOp::Div => IrOp::Div,
        BinaryOp::Mod => IrOp::Mod,
        BinaryOp::BitAnd => IrOp::And,
        BinaryOp::BitOr => IrOp::Or,
        BinaryOp::BitXor => IrOp::Xor,
        BinaryOp::Shl => IrOp::Shl,
        BinaryOp::Shr => IrOp::Shr,
        BinaryOp::Eq => IrOp::Eq,
        BinaryOp::Ne => IrOp::Ne,
        BinaryOp::Lt => IrOp::Lt,
        BinaryOp::Le => IrOp::Le,
        BinaryOp::LogAnd | BinaryOp::LogOr => return None,
    };
    Some(ir)
}

impl IrGen {
    fn newreg(&mut self) -> i64 {
        let r = self.nreg;
        self.nreg += 1;
        r
    }

    fn newlabel(&mut self) -> i64 {
        let l = self.nlabel;
        self.nlabel += 1;
        l
    }

    fn add(&mut self, op: IrOp, lhs: i64, rhs: i64) {
        self.code.push(Instr::new(op, lhs, rhs));
    }

    fn kill(&mut self, r: i64) {
        self.add(IrOp::Kill, r, -1);
    }

    fn label(&mut self, x: i64) {
        self.add(IrOp::Label, x, -1);
    }

    fn jmp(&mut self, x: i64) {
        self.add(IrOp::Jmp, x, -1);
    }

    fn load(&mut self, size: usize, dst: i64, src: i64) {
        let mut instr = Instr::new(IrOp::Load, dst, src);
        instr.size = size;
        self.code.push(instr);
    }

    fn store(&mut self, size: usize, dst: i64, src: i64) {
        let mut instr = Instr::new(IrOp::Store, dst, src);
        instr.size = size;
        self.code.push(instr);
    }

    fn gen_param(&mut self, param: &Node, index: i64) -> Result<(), CompileError> {
        let NodeKind::Vardef { offset, .. } = &param.kind else {
            return Err(CompileError::at(
                &param.span,
                "internal error: bad parameter",
            ));
        };
        let mut instr = Instr::new(IrOp::StoreArg, *offset as i64, index);
        instr.size = ty_of(param)?.size;
        self.code.push(instr);
        Ok(())
    }

    /// Evaluate a node to the address it denotes.
    fn gen_lval(&mut self, node: &Node) -> Result<i64, CompileError> {
        match &node.kind {
            NodeKind::Deref(expr) => self.gen_expr(expr),
            NodeKind::Dot { expr, offset, .. } => {
                let r = self.gen_lval(expr)?;
                self.add(IrOp::AddImm, r, *offset as i64);
                Ok(r)
            }
            NodeKind::Lvar { offset } => {
                let r = self.newreg();
                self.add(IrOp::Bprel, r, *offset as i64);
                Ok(r)
            }
            NodeKind::Gvar { name } => {
                let r = self.newreg();
                let mut instr = Instr::new(IrOp::LabelAddr, r, -1);
                instr.name = Some(name.clone());
                self.code.push(instr);
                Ok(r)
            }
            _ => Err(CompileError::at(&node.span, "not an lvalue")),
        }
    }

    fn gen_binop(&mut self, op: IrOp, lhs: &Node, rhs: &Node) -> Result<i64, CompileError> {
        let r1 = self.gen_expr(lhs)?;
        let r2 = self.gen_expr(rhs)?;
        self.add(op, r1, r2);
        self.kill(r2);
        Ok(r1)
    }

    /// `1` for integers, `sizeof(*p)` for pointers; the step of `++`/`--`.
    fn inc_scale(node: &Node) -> Result<i64, CompileError> {
        Ok(match ty_of(node)?.pointee() {
            Some(p) => p.size as i64,
            None => 1,
        })
    }

    /// Load-modify-store of `expr` by `num * scale`; returns the updated
    /// value. Post-increment compensates afterwards to recover the old
    /// value.
    fn gen_pre_inc(&mut self, expr: &Node, num: i64) -> Result<i64, CompileError> {
        let scale = Self::inc_scale(expr)?;
        let size = ty_of(expr)?.size;
        let addr = self.gen_lval(expr)?;
        let val = self.newreg();
        self.load(size, val, addr);
        self.add(IrOp::AddImm, val, num * scale);
        self.store(size, addr, val);
        self.kill(addr);
        Ok(val)
    }

    fn gen_post_inc(&mut self, expr: &Node, num: i64) -> Result<i64, CompileError> {
        let scale = Self::inc_scale(expr)?;
        let val = self.gen_pre_inc(expr, num)?;
        self.add(IrOp::SubImm, val, num * scale);
        Ok(val)
    }

    fn gen_expr(&mut self, node: &Node) -> Result<i64, CompileError> {
        match &node.kind {
            NodeKind::Num(v) => {
                let r = self.newreg();
                self.add(IrOp::Imm, r, *v);
                Ok(r)
            }

            NodeKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::LogAnd => {
                    let x = self.newlabel();
                    let r1 = self.gen_expr(lhs)?;
                    self.add(IrOp::Unless, r1, x);
                    let r2 = self.gen_expr(rhs)?;
                    self.add(IrOp::Mov, r1, r2);
                    self.kill(r2);
                    self.add(IrOp::Unless, r1, x);
                    self.add(IrOp::Imm, r1, 1);
                    self.label(x);
                    Ok(r1)
                }
                BinaryOp::LogOr => {
                    let x = self.newlabel();
                    let y = self.newlabel();
                    let r1 = self.gen_expr(lhs)?;
                    self.add(IrOp::Unless, r1, x);
                    self.add(IrOp::Imm, r1, 1);
                    self.jmp(y);
                    self.label(x);
                    let r2 = self.gen_expr(rhs)?;
                    self.add(IrOp::Mov, r1, r2);
                    self.kill(r2);
                    self.add(IrOp::Unless, r1, y);
                    self.add(IrOp::Imm, r1, 1);
                    self.label(y);
                    Ok(r1)
                }
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                    if let NodeKind::Num(v) = &rhs.kind {
                        let imm_op = match op {
                            BinaryOp::Add => IrOp::AddImm,
                            BinaryOp::Sub => IrOp::SubImm,
                            _ => IrOp::MulImm,
                        };
                        let r = self.gen_expr(lhs)?;
                        self.add(imm_op, r, *v);
                        return Ok(r);
                    }
                    let ir = binop_ir(*op).ok_or_else(|| {
                        CompileError::at(&node.span, "internal error: bad operator")
                    })?;
                    self.gen_binop(ir, lhs, rhs)
                }
                _ => {
                    let ir = binop_ir(*op).ok_or_else(|| {
                        CompileError::at(&node.span, "internal error: bad operator")
                    })?;
                    self.gen_binop(ir, lhs, rhs)
                }
            },

            NodeKind::Lvar { .. } | NodeKind::Gvar { .. } | NodeKind::Dot { .. } => {
                let size = ty_of(node)?.size;
                let r = self.gen_lval(node)?;
                self.load(size, r, r);
                Ok(r)
            }

            NodeKind::Assign { lhs, rhs } => {
                let size = ty_of(lhs)?.size;
                let r_rhs = self.gen_expr(rhs)?;
                let r_lhs = self.gen_lval(lhs)?;
                self.store(size, r_lhs, r_rhs);
                self.kill(r_lhs);
                Ok(r_rhs)
            }

            NodeKind::AssignOp { op, lhs, rhs } => {
                let ir = binop_ir(*op)
                    .ok_or_else(|| CompileError::at(&node.span, "internal error: bad operator"))?;
                let size = ty_of(lhs)?.size;
                let src = self.gen_expr(rhs)?;
                let dst = self.gen_lval(lhs)?;
                let val = self.newreg();
                self.load(size, val, dst);
                self.add(ir, val, src);
                self.kill(src);
                self.store(size, dst, val);
                self.kill(dst);
                Ok(val)
            }

            NodeKind::Addr(expr) => self.gen_lval(expr),

            NodeKind::Deref(expr) => {
                let size = ty_of(node)?.size;
                let r = self.gen_expr(expr)?;
                self.load(size, r, r);
                Ok(r)
            }

            NodeKind::PreInc(expr) => self.gen_pre_inc(expr, 1),
            NodeKind::PreDec(expr) => self.gen_pre_inc(expr, -1),
            NodeKind::PostInc(expr) => self.gen_post_inc(expr, 1),
            NodeKind::PostDec(expr) => self.gen_post_inc(expr, -1),

            NodeKind::Neg(expr) => {
                let r = self.gen_expr(expr)?;
                self.add(IrOp::Neg, r, -1);
                Ok(r)
            }

            NodeKind::Not(expr) => {
                let lhs = self.gen_expr(expr)?;
                let rhs = self.newreg();
                self.add(IrOp::Imm, rhs, 0);
                self.add(IrOp::Eq, lhs, rhs);
                self.kill(rhs);
                Ok(lhs)
            }

            NodeKind::BitNot(expr) => {
                let lhs = self.gen_expr(expr)?;
                let rhs = self.newreg();
                self.add(IrOp::Imm, rhs, -1);
                self.add(IrOp::Xor, lhs, rhs);
                self.kill(rhs);
                Ok(lhs)
            }

            NodeKind::Ternary { cond, then, els } => {
                let x = self.newlabel();
                let y = self.newlabel();
                let r = self.gen_expr(cond)?;
                self.add(IrOp::Unless, r, x);
                let r2 = self.gen_expr(then)?;
                self.add(IrOp::Mov, r, r2);
                self.kill(r2);
                self.jmp(y);
                self.label(x);
                let r3 = self.gen_expr(els)?;
                self.add(IrOp::Mov, r, r3);
                self.kill(r3);
                self.label(y);
                Ok(r)
            }

            NodeKind::Comma { lhs, rhs } => {
                let r = self.gen_expr(lhs)?;
                self.kill(r);
                self.gen_expr(rhs)
            }

            NodeKind::Call { name, args } => {
                let mut arg_regs = Vec::with_capacity(args.len());
                for arg in args {
                    arg_regs.push(self.gen_expr(arg)?);
                }
                let r = self.newreg();
                let mut instr = Instr::new(IrOp::Call, r, -1);
                instr.name = Some(name.clone());
                instr.args = arg_regs;
                self.code.push(instr);
                Ok(r)
            }

            NodeKind::StmtExpr(body) => {
                let saved = self.sink.take();
                let l = self.newlabel();
                let r = self.newreg();
                self.sink = Some((l, r));
                self.gen_stmt(body)?;
                self.label(l);
                self.sink = saved;
                Ok(r)
            }

            _ => Err(CompileError::at(
                &node.span,
                "internal error: unexpected node in expression",
            )),
        }
    }

    fn gen_stmt(&mut self, node: &Node) -> Result<(), CompileError> {
        match &node.kind {
            NodeKind::Null => Ok(()),

            NodeKind::Vardef { init, offset, .. } => {
                let Some(init) = init else { return Ok(()) };
                let size = ty_of(node)?.size;
                let rhs = self.gen_expr(init)?;
                let addr = self.newreg();
                self.add(IrOp::Bprel, addr, *offset as i64);
                self.store(size, addr, rhs);
                self.kill(addr);
                self.kill(rhs);
                Ok(())
            }

            NodeKind::If { cond, then, els } => {
                let x = self.newlabel();
                let r = self.gen_expr(cond)?;
                self.add(IrOp::Unless, r, x);
                self.kill(r);
                self.gen_stmt(then)?;
                match els {
                    None => self.label(x),
                    Some(els) => {
                        let y = self.newlabel();
                        self.jmp(y);
                        self.label(x);
                        self.gen_stmt(els)?;
                        self.label(y);
                    }
                }
                Ok(())
            }

            NodeKind::For {
                init,
                cond,
                inc,
                body,
            } => {
                let x = self.newlabel();
                let y = self.newlabel();
                let saved = self.break_label;
                let brk = self.newlabel();
                self.break_label = Some(brk);

                if let Some(init) = init {
                    self.gen_stmt(init)?;
                }
                self.label(x);
                if let Some(cond) = cond {
                    let r = self.gen_expr(cond)?;
                    self.add(IrOp::Unless, r, y);
                    self.kill(r);
                }
                self.gen_stmt(body)?;
                if let Some(inc) = inc {
                    self.gen_stmt(inc)?;
                }
                self.jmp(x);
                self.label(y);
                self.label(brk);
                self.break_label = saved;
                Ok(())
            }

            NodeKind::DoWhile { body, cond } => {
                let x = self.newlabel();
                let saved = self.break_label;
                let brk = self.newlabel();
                self.break_label = Some(brk);

                self.label(x);
                self.gen_stmt(body)?;
                let r = self.gen_expr(cond)?;
                self.add(IrOp::If, r, x);
                self.kill(r);
                self.label(brk);
                self.break_label = saved;
                Ok(())
            }

            NodeKind::Break => match self.break_label {
                Some(brk) => {
                    self.jmp(brk);
                    Ok(())
                }
                None => Err(CompileError::at(&node.span, "stray break")),
            },

            NodeKind::Return(expr) => {
                let r = self.gen_expr(expr)?;
                // Inside a statement expression, `return` feeds the sink
                // instead of the function epilogue.
                if let Some((label, reg)) = self.sink {
                    self.add(IrOp::Mov, reg, r);
                    self.kill(r);
                    self.jmp(label);
                } else {
                    self.add(IrOp::Return, r, -1);
                }
                Ok(())
            }

            NodeKind::ExprStmt(expr) => {
                let r = self.gen_expr(expr)?;
                self.kill(r);
                Ok(())
            }

            NodeKind::CompStmt(stmts) => {
                for s in stmts {
                    self.gen_stmt(s)?;
                }
                Ok(())
            }

            _ => Err(CompileError::at(
                &node.span,
                "internal error: unexpected node in statement",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::ir::{IrKind, irinfo};
    use crate::parser::Parser;
    use std::collections::HashMap;

    fn gen_src(src: &str) -> Vec<Function> {
        let tokens = crate::tokenize_source(src, "test.c", &CompilerConfig::new()).unwrap();
        let mut program = Parser::new(tokens).parse().unwrap();
        crate::sema::analyze(&mut program).unwrap();
        generate(&program).unwrap()
    }

    fn reg_operands(instr: &Instr) -> Vec<i64> {
        match irinfo(instr.op).kind {
            IrKind::Reg | IrKind::RegImm | IrKind::RegLabel | IrKind::LabelAddr => {
                vec![instr.lhs]
            }
            IrKind::RegReg => vec![instr.lhs, instr.rhs],
            IrKind::Call => {
                let mut v = vec![instr.lhs];
                v.extend(&instr.args);
                v
            }
            _ => Vec::new(),
        }
    }

    /// Every virtual is defined before other uses and retired exactly
    /// once, by KILL, RETURN, or a call-argument position.
    fn assert_kill_discipline(f: &Function) {
        let mut live: HashMap<i64, bool> = HashMap::new();
        for instr in &f.ir {
            for v in reg_operands(instr) {
                match live.get(&v) {
                    Some(false) => panic!("use of retired r{} in {}", v, f.name),
                    Some(true) => {}
                    None => {
                        live.insert(v, true);
                    }
                }
            }
            match instr.op {
                IrOp::Kill | IrOp::Return => {
                    live.insert(instr.lhs, false);
                }
                IrOp::Call => {
                    for &a in &instr.args {
                        live.insert(a, false);
                    }
                }
                _ => {}
            }
        }
        let leaked: Vec<i64> = live
            .iter()
            .filter_map(|(&v, &alive)| alive.then_some(v))
            .collect();
        assert!(leaked.is_empty(), "unretired virtuals in {}: {:?}", f.name, leaked);
    }

    #[test]
    fn test_kill_discipline_across_features() {
        let fns = gen_src(
            "int g;
             int f(int x, int y) { return x - y; }
             int main() {
               int a[3];
               int i;
               a[0] = 1;
               for (i = 0; i < 3; i = i + 1) a[1] += a[i];
               do { i--; } while (i > 0 && a[0]);
               g = i ? ~i : -i;
               return f(a[0], a[1]) + ({ int s; s = 2; return s; 0; });
             }",
        );
        assert_eq!(fns.len(), 2);
        for f in &fns {
            assert_kill_discipline(f);
        }
    }

    #[test]
    fn test_store_arg_offsets() {
        let fns = gen_src("int f(int x, int y) { return x - y; } int main() { return f(10, 3); }");
        let f = &fns[0];
        let store_args: Vec<(i64, i64, usize)> = f
            .ir
            .iter()
            .filter(|i| i.op == IrOp::StoreArg)
            .map(|i| (i.lhs, i.rhs, i.size))
            .collect();
        assert_eq!(store_args, vec![(4, 0, 4), (8, 1, 4)]);
    }

    #[test]
    fn test_call_lowering() {
        let fns = gen_src("int f(int x) { return x; } int main() { return f(7); }");
        let main = &fns[1];
        let call = main.ir.iter().find(|i| i.op == IrOp::Call).unwrap();
        assert_eq!(call.name.as_deref(), Some("f"));
        assert_eq!(call.args.len(), 1);
    }

    #[test]
    fn test_compound_assign_is_load_op_store() {
        let fns = gen_src("int main() { int a; a = 3; a += 4; return a; }");
        let ir = &fns[0].ir;
        let load_pos = ir.iter().position(|i| i.op == IrOp::Load).unwrap();
        assert_eq!(ir[load_pos + 1].op, IrOp::Add);
        // The store goes back through the same address register.
        let store = ir[load_pos..]
            .iter()
            .find(|i| i.op == IrOp::Store)
            .unwrap();
        assert_eq!(store.lhs, ir[load_pos].rhs);
        assert_eq!(store.rhs, ir[load_pos].lhs);
    }

    #[test]
    fn test_imm_peephole() {
        let fns = gen_src("int main() { int a; a = 3; return a + 4; }");
        let ir = &fns[0].ir;
        assert!(ir.iter().any(|i| i.op == IrOp::AddImm && i.rhs == 4));
        assert!(!ir.iter().any(|i| i.op == IrOp::Add));
    }

    #[test]
    fn test_pointer_scaling_becomes_mul_imm() {
        let fns = gen_src("int main() { int a[2]; return *(a + 1); }");
        let ir = &fns[0].ir;
        assert!(ir.iter().any(|i| i.op == IrOp::MulImm && i.rhs == 4));
    }

    #[test]
    fn test_short_circuit_and() {
        let fns = gen_src("int main() { return 1 && 2; }");
        let ir = &fns[0].ir;
        let unless_count = ir.iter().filter(|i| i.op == IrOp::Unless).count();
        assert_eq!(unless_count, 2);
        assert!(ir.iter().any(|i| i.op == IrOp::Label));
    }

    #[test]
    fn test_do_while_branches_back() {
        let fns = gen_src("int main() { int i; i = 0; do i++; while (i < 3); return i; }");
        let ir = &fns[0].ir;
        assert!(ir.iter().any(|i| i.op == IrOp::If));
    }

    #[test]
    fn test_break_targets_loop_exit() {
        let fns = gen_src("int main() { for (;;) break; return 0; }");
        let ir = &fns[0].ir;
        assert!(ir.iter().any(|i| i.op == IrOp::Jmp));
    }

    #[test]
    fn test_stray_break_rejected() {
        let tokens =
            crate::tokenize_source("int main() { break; }", "test.c", &CompilerConfig::new())
                .unwrap();
        let mut program = Parser::new(tokens).parse().unwrap();
        crate::sema::analyze(&mut program).unwrap();
        let err = generate(&program).unwrap_err();
        assert!(err.message().contains("stray break"));
    }

    #[test]
    fn test_ternary_kills_both_temporaries() {
        let fns = gen_src("int main() { return 1 ? 2 : 3; }");
        let ir = &fns[0].ir;
        // cond + both branch temporaries retired, result retired by RET.
        let kills = ir.iter().filter(|i| i.op == IrOp::Kill).count();
        assert_eq!(kills, 2);
        assert_kill_discipline(&fns[0]);
    }

    #[test]
    fn test_char_load_size() {
        let fns = gen_src("int main() { char c; c = 7; return c; }");
        let ir = &fns[0].ir;
        let load = ir.iter().find(|i| i.op == IrOp::Load).unwrap();
        assert_eq!(load.size, 1);
        let store = ir.iter().find(|i| i.op == IrOp::Store).unwrap();
        assert_eq!(store.size, 1);
    }

    #[test]
    fn test_global_access_uses_label_addr() {
        let fns = gen_src("int g; int main() { g = 1; return g; }");
        let ir = &fns[0].ir;
        let la = ir.iter().find(|i| i.op == IrOp::LabelAddr).unwrap();
        assert_eq!(la.name.as_deref(), Some("g"));
    }
}
