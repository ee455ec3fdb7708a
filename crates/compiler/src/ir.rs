//! Intermediate representation.
//!
//! Three-address code over an unbounded virtual register file. Virtual
//! registers are allocated by a monotonic counter; each is defined exactly
//! once and retired explicitly with `KILL` when no longer needed (call
//! arguments are retired at the call site, and a function's result is
//! retired by `RETURN`). The register allocator relies on this discipline
//! instead of computing liveness.
//!
//! Each opcode has a fixed operand shape recorded in [`irinfo`]; both the
//! register allocator and the dump printer are driven by that table alone.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrOp {
    /// lhs(reg) <- rhs(imm)
    Imm,
    /// lhs(reg) <- rhs(reg)
    Mov,
    /// lhs(reg) <- address rbp - rhs(imm)
    Bprel,
    /// lhs(reg) <- address of global `name`
    LabelAddr,
    Add,
    AddImm,
    Sub,
    SubImm,
    Mul,
    /// lhs <- lhs * rhs(imm); strength-reduced to a shift for small
    /// powers of two by the emitter.
    MulImm,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    /// lhs(reg) <- memory at rhs(reg), `size` bytes
    Load,
    /// memory at lhs(reg) <- rhs(reg), `size` bytes
    Store,
    /// memory at rbp - lhs(imm) <- incoming argument register rhs(imm)
    StoreArg,
    /// lhs(reg) <- `name`(args...)
    Call,
    /// emit `.L{lhs}:`
    Label,
    Jmp,
    /// branch to .L{rhs} if lhs(reg) != 0
    If,
    /// branch to .L{rhs} if lhs(reg) == 0
    Unless,
    Return,
    /// retire lhs(reg); rewritten to `Nop` by the allocator
    Kill,
    Nop,
}

/// Operand shape of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrKind {
    Noarg,
    /// lhs is a register.
    Reg,
    /// lhs is an immediate.
    Imm,
    /// lhs is a jump target label.
    Jmp,
    /// lhs is a label to define.
    Label,
    /// lhs is a register, `name` is a global symbol.
    LabelAddr,
    /// lhs and rhs are registers.
    RegReg,
    /// lhs is a register, rhs an immediate.
    RegImm,
    /// lhs is a register, rhs a label.
    RegLabel,
    /// lhs and rhs are immediates (offset, argument index).
    StoreArg,
    /// lhs is the result register, `args` the argument registers.
    Call,
}

pub struct IrInfo {
    pub name: &'static str,
    pub kind: IrKind,
}

pub fn irinfo(op: IrOp) -> IrInfo {
    let (name, kind) = match op {
        IrOp::Imm => ("IMM", IrKind::RegImm),
        IrOp::Mov => ("MOV", IrKind::RegReg),
        IrOp::Bprel => ("BPREL", IrKind::RegImm),
        IrOp::LabelAddr => ("LABEL_ADDR", IrKind::LabelAddr),
        IrOp::Add => ("ADD", IrKind::RegReg),
        IrOp::AddImm => ("ADD_IMM", IrKind::RegImm),
        IrOp::Sub => ("SUB", IrKind::RegReg),
        IrOp::SubImm => ("SUB_IMM", IrKind::RegImm),
        IrOp::Mul => ("MUL", IrKind::RegReg),
        IrOp::MulImm => ("MUL_IMM", IrKind::RegImm),
        IrOp::Div => ("DIV", IrKind::RegReg),
        IrOp::Mod => ("MOD", IrKind::RegReg),
        IrOp::And => ("AND", IrKind::RegReg),
        IrOp::Or => ("OR", IrKind::RegReg),
        IrOp::Xor => ("XOR", IrKind::RegReg),
        IrOp::Shl => ("SHL", IrKind::RegReg),
        IrOp::Shr => ("SHR", IrKind::RegReg),
        IrOp::Neg => ("NEG", IrKind::Reg),
        IrOp::Eq => ("EQ", IrKind::RegReg),
        IrOp::Ne => ("NE", IrKind::RegReg),
        IrOp::Lt => ("LT", IrKind::RegReg),
        IrOp::Le => ("LE", IrKind::RegReg),
        IrOp::Load => ("LOAD", IrKind::RegReg),
        IrOp::Store => ("STORE", IrKind::RegReg),
        IrOp::StoreArg => ("STORE_ARG", IrKind::StoreArg),
        IrOp::Call => ("CALL", IrKind::Call),
        IrOp::Label => ("", IrKind::Label),
        IrOp::Jmp => ("JMP", IrKind::Jmp),
        IrOp::If => ("IF", IrKind::RegLabel),
        IrOp::Unless => ("UNLESS", IrKind::RegLabel),
        IrOp::Return => ("RET", IrKind::Reg),
        IrOp::Kill => ("KILL", IrKind::Reg),
        IrOp::Nop => ("NOP", IrKind::Noarg),
    };
    IrInfo { name, kind }
}

#[derive(Debug, Clone)]
pub struct Instr {
    pub op: IrOp,
    pub lhs: i64,
    pub rhs: i64,
    /// Access width of `Load`/`Store`/`StoreArg` (1, 4 or 8).
    pub size: usize,
    /// Callee of `Call`, symbol of `LabelAddr`.
    pub name: Option<String>,
    /// Argument registers of `Call`, at most six.
    pub args: Vec<i64>,
}

impl Instr {
    pub fn new(op: IrOp, lhs: i64, rhs: i64) -> Self {
        Instr {
            op,
            lhs,
            rhs,
            size: 0,
            name: None,
            args: Vec::new(),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = irinfo(self.op);
        match info.kind {
            IrKind::Label => write!(f, ".L{}:", self.lhs),
            IrKind::Imm => write!(f, "  {} {}", info.name, self.lhs),
            IrKind::Reg => write!(f, "  {} r{}", info.name, self.lhs),
            IrKind::Jmp => write!(f, "  {} .L{}", info.name, self.lhs),
            IrKind::RegReg => write!(f, "  {} r{}, r{}", info.name, self.lhs, self.rhs),
            IrKind::RegImm => write!(f, "  {} r{}, {}", info.name, self.lhs, self.rhs),
            IrKind::RegLabel => write!(f, "  {} r{}, .L{}", info.name, self.lhs, self.rhs),
            IrKind::LabelAddr => write!(
                f,
                "  {} r{}, {}",
                info.name,
                self.lhs,
                self.name.as_deref().unwrap_or("?")
            ),
            IrKind::StoreArg => write!(f, "  {} {}, {}", info.name, self.lhs, self.rhs),
            IrKind::Call => {
                let args = self
                    .args
                    .iter()
                    .map(|a| format!("r{}", a))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "  r{} = {}({})",
                    self.lhs,
                    self.name.as_deref().unwrap_or("?"),
                    args
                )
            }
            IrKind::Noarg => write!(f, "  {}", info.name),
        }
    }
}

/// A function lowered to IR.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub stacksize: usize,
    pub ir: Vec<Instr>,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}():", self.name)?;
        for instr in &self.ir {
            writeln!(f, "{}", instr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instr_display() {
        assert_eq!(Instr::new(IrOp::Imm, 1, 42).to_string(), "  IMM r1, 42");
        assert_eq!(Instr::new(IrOp::Add, 1, 2).to_string(), "  ADD r1, r2");
        assert_eq!(Instr::new(IrOp::Label, 3, -1).to_string(), ".L3:");
        assert_eq!(Instr::new(IrOp::Unless, 1, 7).to_string(), "  UNLESS r1, .L7");

        let mut call = Instr::new(IrOp::Call, 4, -1);
        call.name = Some("f".to_string());
        call.args = vec![1, 2];
        assert_eq!(call.to_string(), "  r4 = f(r1, r2)");
    }

    #[test]
    fn test_opcode_shapes() {
        assert_eq!(irinfo(IrOp::Load).kind, IrKind::RegReg);
        assert_eq!(irinfo(IrOp::Bprel).kind, IrKind::RegImm);
        assert_eq!(irinfo(IrOp::Kill).kind, IrKind::Reg);
        assert_eq!(irinfo(IrOp::StoreArg).kind, IrKind::StoreArg);
        assert_eq!(irinfo(IrOp::Nop).kind, IrKind::Noarg);
    }
}
