//! Compiler settings and library discovery.

use std::fs;
use std::path::Path;

use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use snafu::ResultExt;

use crate::error::{CompileResult, ReadLibrarySnafu};
use crate::linker::Library;

/// First scratch slot handed to user code.
pub const DEFAULT_FIRST_SLOT: u32 = 0x1000;
pub const DEFAULT_OUTPUT: &str = "out.blockasm";
pub const DEFAULT_LIBRARY_DIR: &str = "blockasm_lib";
pub const LIBRARY_EXTENSION: &str = "blockasm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
  pub first_slot: u32,
  /// Seed for function ids. `None` seeds from the operating system.
  pub seed: Option<u64>,
}

impl Default for CompilerConfig {
  fn default() -> Self {
    Self {
      first_slot: DEFAULT_FIRST_SLOT,
      seed: None,
    }
  }
}

impl CompilerConfig {
  pub fn rng(&self) -> ChaCha8Rng {
    match self.seed {
      Some(seed) => ChaCha8Rng::seed_from_u64(seed),
      None => ChaCha8Rng::from_entropy(),
    }
  }
}

/// Load every `*.blockasm` file in `dir`, in file name order.
pub fn load_library_dir(dir: &Path) -> CompileResult<Vec<Library>> {
  let entries = fs::read_dir(dir).context(ReadLibrarySnafu { path: dir })?;
  let mut paths = Vec::new();
  for entry in entries {
    let path = entry.context(ReadLibrarySnafu { path: dir })?.path();
    if path.is_file() && path.extension().is_some_and(|ext| ext == LIBRARY_EXTENSION) {
      paths.push(path);
    }
  }
  paths.sort();

  paths.iter().map(|path| load_library(path)).collect()
}

fn load_library(path: &Path) -> CompileResult<Library> {
  let text = fs::read_to_string(path).context(ReadLibrarySnafu { path })?;
  let name = path
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_default();
  let library = Library::parse(name, &text)?;
  debug!(
    "loaded library {} with {} functions",
    path.display(),
    library.functions.len()
  );
  Ok(library)
}
