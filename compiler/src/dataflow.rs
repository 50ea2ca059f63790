// dataflow.rs — Forward dataflow over a method body
//
// A worklist solver over the statement-level control-flow graph: a
// statement flows into its successor unless it jumps, returns or throws,
// and branches also flow into their target label. Facts at a join are the
// analysis's merge of every reached predecessor.
//
// Preconditions: every branch target names a label present in the body.
// Postconditions: `before[i]`/`after[i]` hold the fixed-point facts of
//   reachable statements; unreachable statements stay `None`.
// Failure modes: none. A missing label simply has no successor.
// Side effects: none.

use std::collections::VecDeque;

use crate::ir::{Body, Stmt};

pub trait Analysis {
    type Fact: Clone + PartialEq;

    /// Fact on entry to the method.
    fn entry(&self, body: &Body) -> Self::Fact;

    fn merge(&self, a: &Self::Fact, b: &Self::Fact) -> Self::Fact;

    fn transfer(&self, stmt: &Stmt, fact: &mut Self::Fact);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution<F> {
    pub before: Vec<Option<F>>,
    pub after: Vec<Option<F>>,
}

impl<F> Solution<F> {
    pub fn before(&self, index: usize) -> Option<&F> {
        self.before.get(index).and_then(Option::as_ref)
    }

    pub fn after(&self, index: usize) -> Option<&F> {
        self.after.get(index).and_then(Option::as_ref)
    }
}

/// Successor statement indexes of `index`.
pub fn successors(body: &Body, index: usize) -> Vec<usize> {
    let kind = &body.stmts[index].kind;
    let mut out = Vec::with_capacity(2);
    if kind.falls_through() && index + 1 < body.stmts.len() {
        out.push(index + 1);
    }
    if let Some(target) = kind.branch_target() {
        if let Some(pos) = body.label_position(target) {
            if !out.contains(&pos) {
                out.push(pos);
            }
        }
    }
    out
}

pub fn solve<A: Analysis>(analysis: &A, body: &Body) -> Solution<A::Fact> {
    let n = body.stmts.len();
    let mut solution = Solution {
        before: vec![None; n],
        after: vec![None; n],
    };
    if n > 0 {
        solution.before[0] = Some(analysis.entry(body));
    }
    iterate(analysis, body, solution, (0..n.min(1)).collect())
}

/// Continue from a previous solution, revisiting every reached statement.
pub fn resume<A: Analysis>(
    analysis: &A,
    body: &Body,
    previous: Solution<A::Fact>,
) -> Solution<A::Fact> {
    let reached = (0..body.stmts.len())
        .filter(|i| previous.before(*i).is_some())
        .collect();
    iterate(analysis, body, previous, reached)
}

fn iterate<A: Analysis>(
    analysis: &A,
    body: &Body,
    mut solution: Solution<A::Fact>,
    start: VecDeque<usize>,
) -> Solution<A::Fact> {
    let succs: Vec<Vec<usize>> = (0..body.stmts.len()).map(|i| successors(body, i)).collect();
    let mut work = start;
    let mut visits = 0usize;
    while let Some(i) = work.pop_front() {
        visits += 1;
        let Some(input) = solution.before[i].clone() else {
            continue;
        };
        let mut out = input;
        analysis.transfer(&body.stmts[i], &mut out);
        if solution.after[i].as_ref() == Some(&out) {
            continue;
        }
        for s in &succs[i] {
            let merged = match &solution.before[*s] {
                Some(existing) => analysis.merge(existing, &out),
                None => out.clone(),
            };
            if solution.before[*s].as_ref() != Some(&merged) {
                solution.before[*s] = Some(merged);
                if !work.contains(s) {
                    work.push_back(*s);
                }
            }
        }
        solution.after[i] = Some(out);
    }
    tracing::trace!(visits, statements = body.stmts.len(), "dataflow fixed point");
    solution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, Operand, StmtKind};

    /// Counts how many statements lie on the longest path so far, capped.
    struct Depth;

    impl Analysis for Depth {
        type Fact = u32;

        fn entry(&self, _: &Body) -> u32 {
            0
        }

        fn merge(&self, a: &u32, b: &u32) -> u32 {
            (*a).max(*b)
        }

        fn transfer(&self, _: &Stmt, fact: &mut u32) {
            *fact = (*fact + 1).min(10);
        }
    }

    #[test]
    fn loops_converge_and_dead_code_stays_unreached() {
        let mut body = Body::new();
        let head = body.new_label();
        let end = body.new_label();
        body.push(StmtKind::Label(head));
        body.push(StmtKind::If {
            op: BinOp::Eq,
            lhs: Operand::int(0),
            rhs: Operand::int(1),
            target: end,
        });
        body.push(StmtKind::Goto(head));
        body.push(StmtKind::Nop);
        body.push(StmtKind::Label(end));
        body.push(StmtKind::Return(None));

        let sol = solve(&Depth, &body);
        assert_eq!(sol.before(0), Some(&10));
        assert!(sol.before(3).is_none());
        assert!(sol.before(5).is_some());
        let again = resume(&Depth, &body, sol.clone());
        assert_eq!(again, sol);
    }
}
