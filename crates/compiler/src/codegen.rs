//! x86-64 code generation.
//!
//! Walks the allocated IR and prints Intel-syntax GNU assembler text into
//! a `String`. The output starts with `.intel_syntax noprefix`, then a
//! `.data` section with every non-extern global as an escaped `.ascii`
//! blob, then `.text` with one symbol per function.
//!
//! Calling convention is System V AMD64: integer arguments in
//! rdi/rsi/rdx/rcx/r8/r9 (with 8- and 32-bit names for narrow stores),
//! result in rax. The allocator's seven registers are r10/r11 plus the
//! callee-saved rbx/r12..r15; the prologue saves the callee-saved five,
//! r10 and r11 are pushed around calls, and rax is zeroed before each
//! call to satisfy the variadic ABI for integer-only calls.
//!
//! Loads widen to the full 64-bit register: 1-byte loads zero-extend via
//! `movzb`, 4-byte loads sign-extend via `movsxd` so negative ints
//! survive the round trip through memory.

use crate::error::CompileError;
use crate::ir::{Function, Instr, IrOp};
use crate::sema::GlobalVar;
use crate::types::roundup;
use std::fmt::Write as _;
use std::mem;

pub const NUM_REGS: usize = 7;

const REGS: [&str; NUM_REGS] = ["r10", "r11", "rbx", "r12", "r13", "r14", "r15"];
const REGS8: [&str; NUM_REGS] = ["r10b", "r11b", "bl", "r12b", "r13b", "r14b", "r15b"];
const REGS32: [&str; NUM_REGS] = ["r10d", "r11d", "ebx", "r12d", "r13d", "r14d", "r15d"];

const ARGREGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const ARGREGS8: [&str; 6] = ["dil", "sil", "dl", "cl", "r8b", "r9b"];
const ARGREGS32: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];

pub struct CodeGen {
    out: String,
    nlabel: usize,
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGen {
    pub fn new() -> Self {
        CodeGen {
            out: String::new(),
            nlabel: 0,
        }
    }

    /// Emit the whole translation unit.
    pub fn generate(
        &mut self,
        globals: &[GlobalVar],
        fns: &[Function],
    ) -> Result<String, CompileError> {
        writeln!(self.out, ".intel_syntax noprefix")?;

        writeln!(self.out, ".data")?;
        for g in globals {
            if g.is_extern {
                continue;
            }
            writeln!(self.out, "{}:", g.name)?;
            writeln!(self.out, "  .ascii \"{}\"", escape(&g.data))?;
        }

        writeln!(self.out, ".text")?;
        for f in fns {
            self.emit_fn(f)?;
        }
        Ok(mem::take(&mut self.out))
    }

    fn emit_fn(&mut self, f: &Function) -> Result<(), CompileError> {
        let ret = format!(".Lend{}", self.nlabel);
        self.nlabel += 1;

        writeln!(self.out, ".global {}", f.name)?;
        writeln!(self.out, "{}:", f.name)?;
        writeln!(self.out, "  push rbp")?;
        writeln!(self.out, "  mov rbp, rsp")?;
        writeln!(self.out, "  sub rsp, {}", roundup(f.stacksize, 16))?;
        writeln!(self.out, "  push rbx")?;
        writeln!(self.out, "  push r12")?;
        writeln!(self.out, "  push r13")?;
        writeln!(self.out, "  push r14")?;
        writeln!(self.out, "  push r15")?;

        for instr in &f.ir {
            self.emit_instr(instr, &ret)?;
        }

        writeln!(self.out, "{}:", ret)?;
        writeln!(self.out, "  pop r15")?;
        writeln!(self.out, "  pop r14")?;
        writeln!(self.out, "  pop r13")?;
        writeln!(self.out, "  pop r12")?;
        writeln!(self.out, "  pop rbx")?;
        writeln!(self.out, "  mov rsp, rbp")?;
        writeln!(self.out, "  pop rbp")?;
        writeln!(self.out, "  ret")?;
        Ok(())
    }

    fn emit_instr(&mut self, instr: &Instr, ret: &str) -> Result<(), CompileError> {
        let lhs = instr.lhs;
        let rhs = instr.rhs;
        match instr.op {
            IrOp::Imm => writeln!(self.out, "  mov {}, {}", reg(lhs)?, rhs)?,
            IrOp::Mov => writeln!(self.out, "  mov {}, {}", reg(lhs)?, reg(rhs)?)?,
            IrOp::Bprel => writeln!(self.out, "  lea {}, [rbp-{}]", reg(lhs)?, rhs)?,
            IrOp::LabelAddr => {
                writeln!(self.out, "  lea {}, {}", reg(lhs)?, symbol(instr)?)?;
            }

            IrOp::Add => writeln!(self.out, "  add {}, {}", reg(lhs)?, reg(rhs)?)?,
            IrOp::AddImm => writeln!(self.out, "  add {}, {}", reg(lhs)?, rhs)?,
            IrOp::Sub => writeln!(self.out, "  sub {}, {}", reg(lhs)?, reg(rhs)?)?,
            IrOp::SubImm => writeln!(self.out, "  sub {}, {}", reg(lhs)?, rhs)?,
            IrOp::Mul => {
                writeln!(self.out, "  mov rax, {}", reg(rhs)?)?;
                writeln!(self.out, "  mul {}", reg(lhs)?)?;
                writeln!(self.out, "  mov {}, rax", reg(lhs)?)?;
            }
            IrOp::MulImm => {
                if rhs > 0 && rhs < 256 && (rhs & (rhs - 1)) == 0 {
                    writeln!(self.out, "  shl {}, {}", reg(lhs)?, rhs.trailing_zeros())?;
                } else {
                    writeln!(self.out, "  mov rax, {}", rhs)?;
                    writeln!(self.out, "  mul {}", reg(lhs)?)?;
                    writeln!(self.out, "  mov {}, rax", reg(lhs)?)?;
                }
            }
            IrOp::Div => {
                writeln!(self.out, "  mov rax, {}", reg(lhs)?)?;
                writeln!(self.out, "  cqo")?;
                writeln!(self.out, "  idiv {}", reg(rhs)?)?;
                writeln!(self.out, "  mov {}, rax", reg(lhs)?)?;
            }
            IrOp::Mod => {
                writeln!(self.out, "  mov rax, {}", reg(lhs)?)?;
                writeln!(self.out, "  cqo")?;
                writeln!(self.out, "  idiv {}", reg(rhs)?)?;
                writeln!(self.out, "  mov {}, rdx", reg(lhs)?)?;
            }

            IrOp::And => writeln!(self.out, "  and {}, {}", reg(lhs)?, reg(rhs)?)?,
            IrOp::Or => writeln!(self.out, "  or {}, {}", reg(lhs)?, reg(rhs)?)?,
            IrOp::Xor => writeln!(self.out, "  xor {}, {}", reg(lhs)?, reg(rhs)?)?,
            IrOp::Shl => {
                writeln!(self.out, "  mov cl, {}", reg8(rhs)?)?;
                writeln!(self.out, "  shl {}, cl", reg(lhs)?)?;
            }
            IrOp::Shr => {
                writeln!(self.out, "  mov cl, {}", reg8(rhs)?)?;
                writeln!(self.out, "  sar {}, cl", reg(lhs)?)?;
            }
            IrOp::Neg => writeln!(self.out, "  neg {}", reg(lhs)?)?,

            IrOp::Eq => self.emit_cmp("sete", instr)?,
            IrOp::Ne => self.emit_cmp("setne", instr)?,
            IrOp::Lt => self.emit_cmp("setl", instr)?,
            IrOp::Le => self.emit_cmp("setle", instr)?,

            IrOp::Load => match instr.size {
                1 => {
                    writeln!(self.out, "  mov {}, [{}]", reg8(lhs)?, reg(rhs)?)?;
                    writeln!(self.out, "  movzb {}, {}", reg(lhs)?, reg8(lhs)?)?;
                }
                4 => {
                    writeln!(
                        self.out,
                        "  movsxd {}, dword ptr [{}]",
                        reg(lhs)?,
                        reg(rhs)?
                    )?;
                }
                8 => writeln!(self.out, "  mov {}, [{}]", reg(lhs)?, reg(rhs)?)?,
                _ => {
                    return Err(CompileError::new(format!(
                        "unsupported load size: {}",
                        instr.size
                    )));
                }
            },
            IrOp::Store => match instr.size {
                1 => writeln!(self.out, "  mov [{}], {}", reg(lhs)?, reg8(rhs)?)?,
                4 => writeln!(self.out, "  mov [{}], {}", reg(lhs)?, reg32(rhs)?)?,
                8 => writeln!(self.out, "  mov [{}], {}", reg(lhs)?, reg(rhs)?)?,
                _ => {
                    return Err(CompileError::new(format!(
                        "unsupported store size: {}",
                        instr.size
                    )));
                }
            },
            IrOp::StoreArg => {
                let i = usize::try_from(rhs)
                    .ok()
                    .filter(|&i| i < ARGREGS.len())
                    .ok_or_else(|| CompileError::new("bad argument index"))?;
                let src = match instr.size {
                    1 => ARGREGS8[i],
                    4 => ARGREGS32[i],
                    8 => ARGREGS[i],
                    _ => {
                        return Err(CompileError::new(format!(
                            "unsupported store size: {}",
                            instr.size
                        )));
                    }
                };
                writeln!(self.out, "  mov [rbp-{}], {}", lhs, src)?;
            }

            IrOp::Call => {
                for (i, arg) in instr.args.iter().enumerate() {
                    writeln!(self.out, "  mov {}, {}", ARGREGS[i], reg(*arg)?)?;
                }
                writeln!(self.out, "  push r10")?;
                writeln!(self.out, "  push r11")?;
                writeln!(self.out, "  mov rax, 0")?;
                writeln!(self.out, "  call {}", symbol(instr)?)?;
                writeln!(self.out, "  pop r11")?;
                writeln!(self.out, "  pop r10")?;
                writeln!(self.out, "  mov {}, rax", reg(lhs)?)?;
            }

            IrOp::Label => writeln!(self.out, ".L{}:", lhs)?,
            IrOp::Jmp => writeln!(self.out, "  jmp .L{}", lhs)?,
            IrOp::If => {
                writeln!(self.out, "  cmp {}, 0", reg(lhs)?)?;
                writeln!(self.out, "  jne .L{}", rhs)?;
            }
            IrOp::Unless => {
                writeln!(self.out, "  cmp {}, 0", reg(lhs)?)?;
                writeln!(self.out, "  je .L{}", rhs)?;
            }
            IrOp::Return => {
                writeln!(self.out, "  mov rax, {}", reg(lhs)?)?;
                writeln!(self.out, "  jmp {}", ret)?;
            }

            IrOp::Kill | IrOp::Nop => {}
        }
        Ok(())
    }

    fn emit_cmp(&mut self, set: &str, instr: &Instr) -> Result<(), CompileError> {
        writeln!(
            self.out,
            "  cmp {}, {}",
            reg(instr.lhs)?,
            reg(instr.rhs)?
        )?;
        writeln!(self.out, "  {} {}", set, reg8(instr.lhs)?)?;
        writeln!(self.out, "  movzb {}, {}", reg(instr.lhs)?, reg8(instr.lhs)?)?;
        Ok(())
    }
}

fn reg_name(table: &'static [&'static str; NUM_REGS], r: i64) -> Result<&'static str, CompileError> {
    usize::try_from(r)
        .ok()
        .and_then(|i| table.get(i).copied())
        .ok_or_else(|| CompileError::new(format!("bad register index: {}", r)))
}

fn reg(r: i64) -> Result<&'static str, CompileError> {
    reg_name(&REGS, r)
}

fn reg8(r: i64) -> Result<&'static str, CompileError> {
    reg_name(&REGS8, r)
}

fn reg32(r: i64) -> Result<&'static str, CompileError> {
    reg_name(&REGS32, r)
}

fn symbol(instr: &Instr) -> Result<&str, CompileError> {
    instr
        .name
        .as_deref()
        .ok_or_else(|| CompileError::new("missing symbol name"))
}

/// Escape initializer bytes for `.ascii`: the C escape set for the common
/// controls, three-digit octal for everything else non-printable.
fn escape(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            8 => out.push_str("\\b"),
            12 => out.push_str("\\f"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out
}
