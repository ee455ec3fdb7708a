//! mcc compiler library.
//!
//! Compiles a small C subset to GNU-syntax x86-64 assembly (Intel
//! mnemonics). The pipeline is a straight line; each stage consumes the
//! previous stage's output in full:
//!
//! 1. [`scanner`] — source text to tokens with spans
//! 2. [`preprocess`] — macro expansion and `#include` splicing
//! 3. [`parser`] — recursive descent to an AST
//! 4. [`sema`] — name resolution, types, stack layout, globals
//! 5. [`irgen`] — lowering to three-address IR over virtual registers
//! 6. [`regalloc`] — first-fit mapping onto seven physical registers
//! 7. [`codegen`] — assembly text
//!
//! The drivers here wire the stages together:
//!
//! ```rust,ignore
//! use mcc::{CompilerConfig, compile_file};
//!
//! let config = CompilerConfig::new().with_include_dir("include");
//! let asm = compile_file(Path::new("prog.c"), &config)?;
//! print!("{}", asm);
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod ir;
pub mod irgen;
pub mod parser;
pub mod preprocess;
pub mod regalloc;
pub mod scanner;
pub mod sema;
pub mod types;

pub use config::CompilerConfig;
pub use error::CompileError;
pub use ir::Function;
pub use parser::Parser;
pub use preprocess::Preprocessor;
pub use scanner::{Token, TokenKind};
pub use sema::GlobalVar;
pub use types::Type;

use scanner::SourceFile;
use std::path::Path;
use std::rc::Rc;

/// Scan, preprocess, strip newlines and join adjacent string literals.
pub fn tokenize_file(path: &Path, config: &CompilerConfig) -> Result<Vec<Token>, CompileError> {
    let src = scanner::read_source(path)?;
    let file = Rc::new(SourceFile {
        path: path.to_path_buf(),
        src,
    });
    tokenize(file, config)
}

/// Like [`tokenize_file`] for an in-memory buffer (stdin, tests).
pub fn tokenize_source(
    src: &str,
    name: &str,
    config: &CompilerConfig,
) -> Result<Vec<Token>, CompileError> {
    tokenize(scanner::source_file(name, src), config)
}

fn tokenize(file: Rc<SourceFile>, config: &CompilerConfig) -> Result<Vec<Token>, CompileError> {
    let mut tokens = scanner::scan(&file)?;
    tokens.push(scanner::eof_token(&file));
    let mut pp = Preprocessor::new(config);
    let tokens = pp.preprocess(tokens)?;
    let tokens = scanner::strip_newlines(tokens);
    Ok(scanner::join_string_literals(tokens))
}

/// Compile one C source file to assembly text.
pub fn compile_file(path: &Path, config: &CompilerConfig) -> Result<String, CompileError> {
    compile_tokens(tokenize_file(path, config)?, config)
}

/// Compile an in-memory buffer to assembly text.
pub fn compile_source(
    src: &str,
    name: &str,
    config: &CompilerConfig,
) -> Result<String, CompileError> {
    compile_tokens(tokenize_source(src, name, config)?, config)
}

fn compile_tokens(tokens: Vec<Token>, config: &CompilerConfig) -> Result<String, CompileError> {
    let mut parser = Parser::new(tokens);
    let mut program = parser.parse()?;
    let globals = sema::analyze(&mut program)?;
    let mut fns = irgen::generate(&program)?;
    if config.dump_ir1 {
        dump_ir(&fns);
    }
    regalloc::alloc_regs(&mut fns)?;
    if config.dump_ir2 {
        dump_ir(&fns);
    }
    let mut cg = codegen::CodeGen::new();
    cg.generate(&globals, &fns)
}

fn dump_ir(fns: &[Function]) {
    for f in fns {
        eprint!("{}", f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> String {
        compile_source(src, "test.c", &CompilerConfig::new()).unwrap()
    }

    #[test]
    fn test_arithmetic_program_compiles() {
        let asm = compile("int main() { return 1 + 2 * 3; }");
        assert!(asm.contains(".global main"));
        assert!(asm.contains("  ret\n"));
    }

    #[test]
    fn test_loop_program_compiles() {
        let asm = compile(
            "int main() { int a = 0; for (int i = 0; i < 10; i = i + 1) a = a + i; return a; }",
        );
        assert!(asm.contains("  je .L"));
        assert!(asm.contains("  jmp .L"));
    }

    #[test]
    fn test_array_program_compiles() {
        let asm = compile("int main() { int a[3]; a[0]=1; a[1]=2; a[2]=3; return a[0]+a[1]+a[2]; }");
        // 12 bytes of locals, frame rounded to 16.
        assert!(asm.contains("  sub rsp, 16\n"));
    }

    #[test]
    fn test_macro_program_compiles() {
        let asm = compile("#define SQ(x) ((x)*(x))\nint main() { return SQ(5); }");
        assert!(asm.contains(".global main"));
    }

    #[test]
    fn test_register_pressure_boundary() {
        // A balanced expression tree keeps depth+1 values live at once
        // (the literal-operand peephole trims one): depth 7 fits the
        // seven-register file, depth 8 exhausts it deterministically.
        fn balanced(depth: usize) -> String {
            if depth == 0 {
                "1".to_string()
            } else {
                format!("({0}+{0})", balanced(depth - 1))
            }
        }
        let fits = format!("int main() {{ return {}; }}", balanced(7));
        assert!(compile_source(&fits, "test.c", &CompilerConfig::new()).is_ok());

        let bursts = format!("int main() {{ return {}; }}", balanced(8));
        let err = compile_source(&bursts, "test.c", &CompilerConfig::new()).unwrap_err();
        assert_eq!(err.message(), "register exhausted");
    }

    #[test]
    fn test_error_format_points_into_source() {
        let err = compile_source(
            "int main() {\n  return nope;\n}\n",
            "prog.c",
            &CompilerConfig::new(),
        )
        .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("error at prog.c:2:10\n"));
        assert!(text.contains("  return nope;\n"));
        assert!(text.contains("^"));
        assert!(text.ends_with("undefined variable: nope"));
    }

    #[test]
    fn test_compile_file_and_include() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("val.h");
        std::fs::write(&header, "#define VAL 40\nint pad;\n").unwrap();
        let main = dir.path().join("main.c");
        std::fs::write(&main, "#include \"val.h\"\nint main() { return VAL + 2; }\n").unwrap();

        let config = CompilerConfig::new().with_include_dir(dir.path());
        let asm = compile_file(&main, &config).unwrap();
        assert!(asm.contains("pad:"));
        assert!(asm.contains(".global main"));
    }

    #[test]
    fn test_statement_expression_program() {
        let asm = compile("int main() { return ({ int x = 3; return x + 4; 0; }); }");
        assert!(asm.contains(".global main"));
    }

    #[test]
    fn test_struct_program_compiles() {
        let asm = compile(
            "typedef struct { char a; int b; } pair;
             int main() { pair p; p.a = 1; p.b = 6; return p.a + p.b; }",
        );
        assert!(asm.contains(".global main"));
    }

    #[test]
    fn test_do_while_and_break() {
        let asm = compile(
            "int main() { int i = 0; do { i++; if (i == 3) break; } while (i < 10); return i; }",
        );
        assert!(asm.contains("  jne .L"));
    }
}
