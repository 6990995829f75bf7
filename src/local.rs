use bitflags::bitflags;

use crate::asg::{GraphKind, GraphNode};
use crate::ast::{AstNode, ExprOp};
use crate::errors::Session;
use crate::types::{align_to, TypeInfo};
use crate::x86::Gpr;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LocalFlags: u32 {
        /// The variable is referenced by at least one statement.
        const USED = 1 << 0;
        /// Function parameter; its slot lives above the base pointer
        /// and is never allocated in the frame.
        const ARG = 1 << 1;
    }
}

/// A local variable (or parameter) of the function being translated.
/// `offset` is a positive displacement: below `%ebp` for frame locals,
/// above it for parameters.
#[derive(Debug)]
pub struct Local {
    pub name: String,
    pub offset: i32,
    pub ty: TypeInfo,
    pub flags: LocalFlags,
    /// GPR that most recently cached this variable, if any.
    pub reg_cache: Option<Gpr>,
}

#[derive(Debug, Default)]
pub struct LocalVars {
    locals: Vec<Local>,
}

impl LocalVars {
    pub fn new() -> Self {
        LocalVars::default()
    }

    pub fn add(&mut self, name: &str, ty: TypeInfo) {
        self.locals.push(Local {
            name: name.to_owned(),
            offset: 0,
            ty,
            flags: LocalFlags::empty(),
            reg_cache: None,
        });
    }

    pub fn add_param(&mut self, name: &str, ty: TypeInfo, offset: i32) {
        self.locals.push(Local {
            name: name.to_owned(),
            offset,
            ty,
            flags: LocalFlags::USED | LocalFlags::ARG,
            reg_cache: None,
        });
    }

    pub fn find(&self, name: &str) -> Option<&Local> {
        self.locals.iter().find(|l| l.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Local> {
        self.locals.iter_mut().find(|l| l.name == name)
    }

    pub fn mark_used(&mut self, name: &str) {
        if let Some(local) = self.find_mut(name) {
            local.flags |= LocalFlags::USED;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Local> {
        self.locals.iter()
    }
}

/// Walk a function body, adding every declared variable to `locals`
/// and marking the ones that statements actually reference.
pub fn scan_graph(locals: &mut LocalVars, graph: Option<&GraphNode>) {
    let mut current = graph;
    while let Some(node) = current {
        match &node.kind {
            GraphKind::Declaration(ast) => add_declared(locals, ast),
            GraphKind::Statement(ast) => note_usage(locals, ast),
            GraphKind::Conditional { cond, succ, fail } => {
                note_usage(locals, cond);
                scan_graph(locals, succ.as_deref());
                scan_graph(locals, fail.as_deref());
            }
            GraphKind::For {
                init,
                cond,
                post,
                body,
            } => {
                note_usage(locals, init);
                note_usage(locals, cond);
                note_usage(locals, post);
                scan_graph(locals, body.as_deref());
            }
            GraphKind::While { cond, body }
            | GraphKind::DoWhile { cond, body } => {
                note_usage(locals, cond);
                scan_graph(locals, body.as_deref());
            }
            GraphKind::Return(value) => {
                if let Some(value) = value {
                    note_usage(locals, value);
                }
            }
        }
        current = node.next.as_deref();
    }
}

/// Declaration subtrees only contain identifiers joined by commas.
fn add_declared(locals: &mut LocalVars, ast: &AstNode) {
    match ast {
        AstNode::Identifier { sym, ty } => locals.add(&sym.id, ty.clone()),
        AstNode::Expr {
            op: ExprOp::Comma,
            lhs,
            rhs,
            ..
        } => {
            add_declared(locals, lhs);
            if let Some(rhs) = rhs {
                add_declared(locals, rhs);
            }
        }
        _ => {}
    }
}

fn note_usage(locals: &mut LocalVars, ast: &AstNode) {
    match ast {
        AstNode::Identifier { sym, .. } => locals.mark_used(&sym.id),
        AstNode::Expr { lhs, rhs, .. } => {
            note_usage(locals, lhs);
            if let Some(rhs) = rhs {
                note_usage(locals, rhs);
            }
        }
        _ => {}
    }
}

/// Assign frame offsets to every used local in declaration order,
/// aligning each to its own size, and return the frame total rounded
/// up to 4 bytes. Unused locals get no slot and a warning.
pub fn layout_frame(
    locals: &mut LocalVars,
    sess: &Session,
    fname: &str,
) -> usize {
    let mut nbytes = 0usize;
    for local in &mut locals.locals {
        if local.flags.contains(LocalFlags::ARG) {
            continue;
        }
        if !local.flags.contains(LocalFlags::USED) {
            sess.warn(format!(
                "unused variable `{}' in function `{}'",
                local.name, fname
            ));
            continue;
        }

        let size = local.ty.size();
        nbytes = align_to(nbytes, size);
        nbytes += size;
        local.offset = nbytes as i32;
    }
    align_to(nbytes, 4)
}
