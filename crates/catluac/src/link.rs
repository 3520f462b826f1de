//! The multi-file linker.
//!
//! Resolves `require` directives recursively, parsing each file exactly once
//! (deduplicated by canonical path, which also breaks require cycles), and
//! flattens everything into one ordered shard list: a shard is followed by
//! the shards of the files it requires, depth-first.
//!
//! Compile mode fails fast on any syntax or resolution problem; lint mode
//! swallows missing files and keeps collecting diagnostics.

use std::fmt;
use std::path::{Path, PathBuf};

use catlua_common::diagnostics::{Diagnostic, Diagnostics};
use catlua_common::span::Span;
use catlua_lexer::Lexer;
use catlua_parser::ast::{Program, Shard};
use rustc_hash::FxHashSet;

/// The source-language file extension tried when a literal require path
/// does not exist.
pub const SOURCE_EXTENSION: &str = "catlua";

/// A located syntax error with enough context for rich reporting.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub line: u32,
    pub span: Span,
}

/// A fatal linker failure (compile mode only).
#[derive(Debug)]
pub enum LinkError {
    /// A file could not be read.
    Io { path: PathBuf, message: String },
    /// A `require` target does not exist, with or without the extension.
    MissingRequire { path: PathBuf, require: String },
    /// Lexing or parsing a file failed; carries the source for reporting.
    Syntax {
        path: PathBuf,
        source: String,
        errors: Vec<SyntaxError>,
    },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Io { path, message } => {
                write!(f, "failed to read '{}': {}", path.display(), message)
            }
            LinkError::MissingRequire { path, require } => write!(
                f,
                "could not find required file '{}' (from '{}')",
                require,
                path.display()
            ),
            LinkError::Syntax { path, errors, .. } => write!(
                f,
                "{} syntax error(s) in '{}'",
                errors.len(),
                path.display()
            ),
        }
    }
}

impl std::error::Error for LinkError {}

/// The linked program plus any diagnostics collected along the way.
#[derive(Debug)]
pub struct LinkOutcome {
    pub program: Program,
    pub diagnostics: Diagnostics,
    /// Lint mode only: a file failed so badly that no tree exists for it;
    /// the driver should report what it has and stop.
    pub fatal: bool,
}

/// Link the file at `root` and everything it requires.
pub fn link(root: &Path, lint: bool) -> Result<LinkOutcome, LinkError> {
    let mut linker = Linker {
        visited: FxHashSet::default(),
        lint,
        diagnostics: Diagnostics::new(),
        fatal: false,
    };
    let shards = linker.link_file(root)?;
    Ok(LinkOutcome {
        program: Program { shards },
        diagnostics: linker.diagnostics,
        fatal: linker.fatal,
    })
}

struct Linker {
    visited: FxHashSet<PathBuf>,
    lint: bool,
    diagnostics: Diagnostics,
    fatal: bool,
}

impl Linker {
    fn link_file(&mut self, path: &Path) -> Result<Vec<Shard>, LinkError> {
        let abs = match path.canonicalize() {
            Ok(abs) => abs,
            Err(e) => {
                return self.io_failure(path, e);
            }
        };
        if !self.visited.insert(abs.clone()) {
            return Ok(Vec::new());
        }

        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => return self.io_failure(path, e),
        };

        let tokens = match Lexer::tokenize(&source) {
            Ok(tokens) => tokens,
            Err(e) => {
                let error = SyntaxError {
                    message: e.kind.to_string(),
                    line: e.line,
                    span: e.span,
                };
                return self.syntax_failure(path, source, vec![error]);
            }
        };

        let outcome = catlua_parser::parse(tokens);
        let errors: Vec<SyntaxError> = outcome
            .errors
            .iter()
            .map(|e| SyntaxError {
                message: e.message.clone(),
                line: e.line,
                span: e.span,
            })
            .collect();

        let Some(program) = outcome.program else {
            return self.syntax_failure(path, source, errors);
        };
        if !errors.is_empty() {
            // Statement-level errors: the tree survives, so lint mode keeps
            // going with it; compile mode still refuses to continue.
            if !self.lint {
                return Err(LinkError::Syntax { path: path.to_path_buf(), source, errors });
            }
            for error in &errors {
                self.diagnostics.error(error.line, error.message.clone());
            }
        }

        let base_dir = abs.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut shards = Vec::new();

        for shard in program.shards {
            let requires = shard.requires.clone();
            shards.push(shard);

            for require in requires {
                let Some(resolved) = resolve_require(&base_dir, &require) else {
                    if self.lint {
                        continue;
                    }
                    return Err(LinkError::MissingRequire {
                        path: path.to_path_buf(),
                        require,
                    });
                };
                shards.extend(self.link_file(&resolved)?);
            }
        }

        Ok(shards)
    }

    fn io_failure(&mut self, path: &Path, error: std::io::Error) -> Result<Vec<Shard>, LinkError> {
        if self.lint {
            self.diagnostics
                .error(1, format!("failed to read '{}': {}", path.display(), error));
            self.fatal = true;
            return Ok(Vec::new());
        }
        Err(LinkError::Io {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }

    /// A file with no usable tree: report in lint mode, abort otherwise.
    fn syntax_failure(
        &mut self,
        path: &Path,
        source: String,
        errors: Vec<SyntaxError>,
    ) -> Result<Vec<Shard>, LinkError> {
        if self.lint {
            for error in &errors {
                self.diagnostics.push(Diagnostic::error(error.line, error.message.clone()));
            }
            self.fatal = true;
            return Ok(Vec::new());
        }
        Err(LinkError::Syntax {
            path: path.to_path_buf(),
            source,
            errors,
        })
    }
}

/// Resolve a require entry against the requiring file's directory: the
/// literal path first, then with the source extension appended.
fn resolve_require(base_dir: &Path, require: &str) -> Option<PathBuf> {
    let literal = base_dir.join(require);
    if literal.exists() {
        return Some(literal);
    }
    let with_ext = base_dir.join(format!("{require}.{SOURCE_EXTENSION}"));
    with_ext.exists().then_some(with_ext)
}
