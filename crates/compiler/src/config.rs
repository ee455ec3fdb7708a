//! Compiler configuration.
//!
//! Collects the knobs the CLI exposes so the library drivers stay
//! argument-light: directories searched by `#include` after the current
//! working directory, and the two IR dump switches.

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Directories searched for `#include "path"` when the path does not
    /// resolve relative to the current working directory.
    pub include_dirs: Vec<PathBuf>,
    /// Dump each function's IR to stderr before register allocation.
    pub dump_ir1: bool,
    /// Dump each function's IR to stderr after register allocation.
    pub dump_ir2: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory to the `#include` search path.
    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .with_include_dir("/usr/include")
            .with_include_dir("lib");
        assert_eq!(config.include_dirs.len(), 2);
        assert!(!config.dump_ir1);
    }
}
