use crate::ast::AstNode;
use crate::errors::Session;

/// Control-flow node variants making up a function body.
#[derive(Debug)]
pub enum GraphKind {
    Declaration(Box<AstNode>),
    Statement(Box<AstNode>),
    Conditional {
        cond: Box<AstNode>,
        succ: Option<Box<GraphNode>>,
        fail: Option<Box<GraphNode>>,
    },
    For {
        init: Box<AstNode>,
        cond: Box<AstNode>,
        post: Box<AstNode>,
        body: Option<Box<GraphNode>>,
    },
    While {
        cond: Box<AstNode>,
        body: Option<Box<GraphNode>>,
    },
    DoWhile {
        cond: Box<AstNode>,
        body: Option<Box<GraphNode>>,
    },
    Return(Option<Box<AstNode>>),
}

/// One node in the linear control-flow sequence of a function body.
#[derive(Debug)]
pub struct GraphNode {
    pub kind: GraphKind,
    pub next: Option<Box<GraphNode>>,
}

impl GraphNode {
    fn new(kind: GraphKind) -> Box<GraphNode> {
        Box::new(GraphNode { kind, next: None })
    }

    pub fn declaration(ast: Box<AstNode>) -> Box<GraphNode> {
        GraphNode::new(GraphKind::Declaration(ast))
    }

    pub fn statement(ast: Box<AstNode>) -> Box<GraphNode> {
        GraphNode::new(GraphKind::Statement(ast))
    }

    pub fn conditional(
        cond: Box<AstNode>,
        succ: Option<Box<GraphNode>>,
        fail: Option<Box<GraphNode>>,
    ) -> Box<GraphNode> {
        GraphNode::new(GraphKind::Conditional { cond, succ, fail })
    }

    pub fn for_loop(
        init: Box<AstNode>,
        cond: Box<AstNode>,
        post: Box<AstNode>,
        body: Option<Box<GraphNode>>,
    ) -> Box<GraphNode> {
        GraphNode::new(GraphKind::For {
            init,
            cond,
            post,
            body,
        })
    }

    pub fn while_loop(
        cond: Box<AstNode>,
        body: Option<Box<GraphNode>>,
    ) -> Box<GraphNode> {
        GraphNode::new(GraphKind::While { cond, body })
    }

    pub fn do_while_loop(
        cond: Box<AstNode>,
        body: Option<Box<GraphNode>>,
    ) -> Box<GraphNode> {
        GraphNode::new(GraphKind::DoWhile { cond, body })
    }

    pub fn ret(value: Option<Box<AstNode>>) -> Box<GraphNode> {
        GraphNode::new(GraphKind::Return(value))
    }
}

/// Append `node` to the sequence starting at `head`. Code appended
/// after a return statement can never execute; it is still linked so
/// the whole function stays visible to later passes.
pub fn append(
    head: Option<Box<GraphNode>>,
    node: Box<GraphNode>,
    sess: &Session,
) -> Box<GraphNode> {
    let Some(mut head) = head else {
        return node;
    };
    append_to_tail(&mut head, node, sess);
    head
}

fn append_to_tail(tail: &mut GraphNode, node: Box<GraphNode>, sess: &Session) {
    match tail.next {
        Some(ref mut next) => append_to_tail(next, node, sess),
        None => {
            if matches!(tail.kind, GraphKind::Return(_)) {
                sess.warn("unreachable code");
            }
            tail.next = Some(node);
        }
    }
}
