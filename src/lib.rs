#![forbid(unsafe_code)]
pub mod asg;
pub mod ast;
pub mod errors;
pub mod gen;
pub mod ir;
pub mod local;
pub mod parse;
pub mod scan;
pub mod section;
pub mod symtab;
pub mod types;
pub mod x86;

#[cfg(test)]
mod test;

use anyhow::Result;

use errors::Session;
use gen::TranslationUnit;
use parse::Parser;
use section::Sections;

/// Compile one source file into its output sections. Errors abort at
/// the point of detection; warnings go to stderr and accumulate on the
/// session.
pub fn compile(source: &str, sess: &Session) -> Result<Sections> {
    let mut unit = TranslationUnit::new();
    let mut parser = Parser::new(source, sess)?;
    parser.run(&mut unit)?;
    Ok(unit.finish())
}
