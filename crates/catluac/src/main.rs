//! The catlua compiler CLI.
//!
//! `catluac <file> [-o output.json] [--ir] [--lint] [-O0|-O1|-O2]`
//!
//! Compiles a `.catlua` source file (and everything it requires) to the
//! block runtime's JSON script document. `--lint` emits every diagnostic as
//! a JSON array on stdout and always exits 0; compile mode prints warnings,
//! then errors, and exits 1 on any fatal problem.

mod link;

use std::path::PathBuf;
use std::process;

use ariadne::{Label, Report, ReportKind, Source};
use catlua_common::diagnostics::{Diagnostic, Diagnostics};
use clap::Parser;

use link::LinkError;

#[derive(Parser)]
#[command(name = "catluac", version, about = "The catlua compiler")]
struct Cli {
    /// Path to the source file to compile
    file: PathBuf,

    /// Output path for the compiled JSON (defaults to the source path with
    /// a .json extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the CWIR stream before JSON emission
    #[arg(long)]
    ir: bool,

    /// Emit diagnostics as a JSON array instead of compiling
    #[arg(long)]
    lint: bool,

    /// Optimization level (0 = none, 1 = constant folding, 2 = folding +
    /// dead-code elimination)
    #[arg(short = 'O', value_parser = clap::value_parser!(u8).range(0..=2), default_value_t = 1)]
    opt_level: u8,
}

fn main() {
    let cli = Cli::parse();
    process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    // Lex, parse, and link the requires graph.
    let outcome = match link::link(&cli.file, cli.lint) {
        Ok(outcome) => outcome,
        Err(error) => {
            report_link_error(&error);
            return 1;
        }
    };

    if cli.lint && outcome.fatal {
        print_lint(&outcome.diagnostics);
        return 0;
    }

    // Desugar, analyze, and optionally optimize.
    let program = catlua_sema::desugar(outcome.program);
    let (program, analysis, sema_diags) = catlua_sema::analyze(program, cli.opt_level);

    let mut diagnostics = outcome.diagnostics;
    diagnostics.extend(sema_diags);

    let program = if cli.opt_level >= 2 {
        catlua_sema::optimize(program, &mut diagnostics)
    } else {
        program
    };

    if cli.lint {
        print_lint(&diagnostics);
        return 0;
    }

    for warning in diagnostics.warnings() {
        eprintln!("{warning}");
    }
    if diagnostics.has_errors() {
        for error in diagnostics.errors() {
            eprintln!("{error}");
        }
        eprintln!("error: compilation failed");
        return 1;
    }

    // Lower to CWIR and emit the JSON document.
    let ir = catlua_ir::emit(&program, &analysis);
    if cli.ir {
        println!("{ir}");
    }

    let json = match catlua_emit::emit(&ir) {
        Ok(json) => json,
        Err(error) => {
            eprintln!("error: {error}");
            return 1;
        }
    };

    let out_path = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.file.with_extension("json"));
    if let Err(error) = std::fs::write(&out_path, &json) {
        eprintln!("error: failed to write '{}': {}", out_path.display(), error);
        return 1;
    }

    eprintln!("compiled {} -> {}", cli.file.display(), out_path.display());
    0
}

/// Render a linker failure: rich reports for syntax errors, plain lines for
/// everything else.
fn report_link_error(error: &LinkError) {
    match error {
        LinkError::Syntax { path, source, errors } => {
            let file_name = path.display().to_string();
            for syntax_error in errors {
                let start = syntax_error.span.start as usize;
                let end = (syntax_error.span.end as usize).max(start + 1);
                let _ = Report::<std::ops::Range<usize>>::build(ReportKind::Error, start..end)
                    .with_message(format!("Syntax error in {file_name}"))
                    .with_label(Label::new(start..end).with_message(&syntax_error.message))
                    .finish()
                    .eprint(Source::from(source.as_str()));
            }
            eprintln!("error: compilation failed");
        }
        other => eprintln!("error: {other}"),
    }
}

/// `--lint`: one JSON array of `{line, msg, severity}`, warnings first.
fn print_lint(diagnostics: &Diagnostics) {
    let items: Vec<&Diagnostic> = diagnostics.warnings().chain(diagnostics.errors()).collect();
    match serde_json::to_string(&items) {
        Ok(json) => println!("{json}"),
        Err(_) => println!("[]"),
    }
}
