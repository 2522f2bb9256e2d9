// Tue Jan 13 2026 - Alex

use crate::analysis::arm64::{Instruction, Opcode};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

pub type BlockId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockKind {
    Normal,
    Conditional,
    Unconditional,
    Return,
    /// Falls through, but contains at least one call.
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EdgeKind {
    Fallthrough,
    ConditionalTrue,
    ConditionalFalse,
    Unconditional,
    /// Block to callee entry. Not part of the intraprocedural graph.
    Call,
}

impl EdgeKind {
    pub fn is_intraprocedural(self) -> bool {
        self != EdgeKind::Call
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EdgeKind::Fallthrough => "fallthrough",
            EdgeKind::ConditionalTrue => "conditional-true",
            EdgeKind::ConditionalFalse => "conditional-false",
            EdgeKind::Unconditional => "unconditional",
            EdgeKind::Call => "call",
        };
        write!(f, "{}", name)
    }
}

/// Edges are keyed by address: `from` is a block start, `to` is a block
/// start, or the callee entry for call edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CfgEdge {
    pub from: u64,
    pub to: u64,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub start: u64,
    /// Exclusive.
    pub end: u64,
    pub instructions: Vec<Instruction>,
    pub kind: BlockKind,
    pub branch_target: Option<u64>,
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
    pub idom: Option<BlockId>,
    pub is_loop_header: bool,
}

impl BasicBlock {
    fn new(id: BlockId, instructions: Vec<Instruction>) -> Self {
        let start = instructions.first().map_or(0, |i| i.address);
        let end = instructions.last().map_or(start, |i| i.address + 4);
        let last = instructions.last();
        let kind = match last {
            Some(i) if i.is_return() => BlockKind::Return,
            Some(i) if i.is_conditional_branch() => BlockKind::Conditional,
            Some(i) if i.is_unconditional_branch() => BlockKind::Unconditional,
            _ if instructions.iter().any(Instruction::is_call) => BlockKind::Call,
            _ => BlockKind::Normal,
        };
        let branch_target = last.filter(|i| !i.is_call()).and_then(Instruction::branch_target);

        Self {
            id,
            start,
            end,
            instructions,
            kind,
            branch_target,
            successors: Vec::new(),
            predecessors: Vec::new(),
            idom: None,
            is_loop_header: false,
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Loop {
    pub header: BlockId,
    pub back_edge_sources: Vec<BlockId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlFlowGraph {
    pub function_name: String,
    pub start: u64,
    blocks: Vec<BasicBlock>,
    edges: Vec<CfgEdge>,
    #[serde(skip)]
    by_start: HashMap<u64, BlockId>,
    #[serde(skip)]
    dominators: Vec<BTreeSet<BlockId>>,
    loops: Vec<Loop>,
    order: Vec<BlockId>,
}

impl ControlFlowGraph {
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn edges(&self) -> &[CfgEdge] {
        &self.edges
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id)
    }

    pub fn entry(&self) -> Option<&BasicBlock> {
        self.block_starting_at(self.start)
    }

    pub fn block_starting_at(&self, addr: u64) -> Option<&BasicBlock> {
        self.by_start.get(&addr).map(|&id| &self.blocks[id])
    }

    /// Block whose address range covers `addr`.
    pub fn block_at(&self, addr: u64) -> Option<&BasicBlock> {
        let idx = self.blocks.partition_point(|b| b.start <= addr).checked_sub(1)?;
        self.blocks.get(idx).filter(|b| b.contains(addr))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn edges_from(&self, block: BlockId) -> impl Iterator<Item = &CfgEdge> {
        let start = self.blocks.get(block).map(|b| b.start);
        self.edges.iter().filter(move |e| Some(e.from) == start)
    }

    pub fn edge_kind(&self, from: BlockId, to: BlockId) -> Option<EdgeKind> {
        let to = self.blocks.get(to)?.start;
        self.edges_from(from).find(|e| e.to == to && e.kind.is_intraprocedural()).map(|e| e.kind)
    }

    /// Dominator set of `block`, itself included. Unreachable blocks only
    /// dominate themselves.
    pub fn dominators(&self, block: BlockId) -> Option<&BTreeSet<BlockId>> {
        self.dominators.get(block)
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dominators.get(b).map_or(false, |set| set.contains(&a))
    }

    pub fn loop_headers(&self) -> Vec<BlockId> {
        self.blocks.iter().filter(|b| b.is_loop_header).map(|b| b.id).collect()
    }

    pub fn detected_loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Reverse postorder over forward edges. Blocks unreachable from the
    /// entry come before it.
    pub fn topological_order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(BasicBlock::len).sum()
    }
}

pub struct CfgBuilder;

impl CfgBuilder {
    /// Builds the graph for one function's decoded instructions, which must
    /// be in address order and start at the function entry.
    pub fn build(function_name: impl Into<String>, instructions: &[Instruction]) -> ControlFlowGraph {
        let function_name = function_name.into();
        let start = instructions.first().map_or(0, |i| i.address);
        let end = instructions.last().map_or(start, |i| i.address + 4);

        let mut blocks = Self::split_blocks(instructions, start, end);
        let by_start: HashMap<u64, BlockId> = blocks.iter().map(|b| (b.start, b.id)).collect();
        let edges = Self::link(&mut blocks, &by_start);

        let mut cfg = ControlFlowGraph {
            function_name,
            start,
            blocks,
            edges,
            by_start,
            dominators: Vec::new(),
            loops: Vec::new(),
            order: Vec::new(),
        };
        if cfg.blocks.is_empty() {
            return cfg;
        }

        cfg.dominators = compute_dominators(&cfg.blocks);
        for id in 0..cfg.blocks.len() {
            cfg.blocks[id].idom = immediate_dominator(&cfg.dominators, id);
        }
        cfg.loops = find_loops(&cfg.blocks);
        for lp in &cfg.loops {
            cfg.blocks[lp.header].is_loop_header = true;
        }
        cfg.order = reverse_postorder(&cfg.blocks);

        log::trace!(
            "CFG {}: {} blocks, {} edges, {} loops",
            cfg.function_name,
            cfg.blocks.len(),
            cfg.edges.len(),
            cfg.loops.len()
        );
        cfg
    }

    fn split_blocks(instructions: &[Instruction], start: u64, end: u64) -> Vec<BasicBlock> {
        let mut leaders = BTreeSet::new();
        leaders.insert(start);
        for instr in instructions {
            if instr.is_call() {
                continue;
            }
            if let Some(target) = instr.branch_target() {
                if target >= start && target < end {
                    leaders.insert(target);
                }
            }
            if instr.is_block_terminator() {
                leaders.insert(instr.address + 4);
            }
        }

        let mut blocks = Vec::new();
        let mut current = Vec::new();
        for instr in instructions {
            if leaders.contains(&instr.address) && !current.is_empty() {
                blocks.push(BasicBlock::new(blocks.len(), std::mem::take(&mut current)));
            }
            current.push(instr.clone());
        }
        if !current.is_empty() {
            blocks.push(BasicBlock::new(blocks.len(), current));
        }
        blocks
    }

    fn link(blocks: &mut [BasicBlock], by_start: &HashMap<u64, BlockId>) -> Vec<CfgEdge> {
        let mut links: Vec<(BlockId, BlockId, EdgeKind)> = Vec::new();
        let mut edges = Vec::new();

        for block in blocks.iter() {
            for call in block.instructions.iter().filter(|i| i.opcode == Opcode::BL) {
                if let Some(target) = call.branch_target() {
                    edges.push(CfgEdge { from: block.start, to: target, kind: EdgeKind::Call });
                }
            }

            let next = by_start.get(&block.end).copied();
            let target = block.branch_target.and_then(|t| by_start.get(&t).copied());
            match block.kind {
                BlockKind::Return => {}
                BlockKind::Conditional => {
                    if let Some(t) = target {
                        links.push((block.id, t, EdgeKind::ConditionalTrue));
                    }
                    if let Some(n) = next {
                        links.push((block.id, n, EdgeKind::ConditionalFalse));
                    }
                }
                BlockKind::Unconditional => {
                    if let Some(t) = target {
                        links.push((block.id, t, EdgeKind::Unconditional));
                    }
                }
                BlockKind::Normal | BlockKind::Call => {
                    let falls_through = block.last_instruction().map_or(true, |i| !i.is_terminal());
                    if let (Some(n), true) = (next, falls_through) {
                        links.push((block.id, n, EdgeKind::Fallthrough));
                    }
                }
            }
        }

        for (from, to, kind) in links {
            edges.push(CfgEdge { from: blocks[from].start, to: blocks[to].start, kind });
            if !blocks[from].successors.contains(&to) {
                blocks[from].successors.push(to);
                blocks[to].predecessors.push(from);
            }
        }
        edges
    }
}

fn reachable_from(blocks: &[BasicBlock], root: BlockId) -> Vec<bool> {
    let mut seen = vec![false; blocks.len()];
    let mut queue = VecDeque::from([root]);
    seen[root] = true;
    while let Some(id) = queue.pop_front() {
        for &succ in &blocks[id].successors {
            if !seen[succ] {
                seen[succ] = true;
                queue.push_back(succ);
            }
        }
    }
    seen
}

/// Iterative fixpoint: dom(b) = {b} ∪ ⋂ dom(p) over reachable predecessors.
fn compute_dominators(blocks: &[BasicBlock]) -> Vec<BTreeSet<BlockId>> {
    let reachable = reachable_from(blocks, 0);
    let all: BTreeSet<BlockId> = (0..blocks.len()).filter(|&i| reachable[i]).collect();
    let mut dom: Vec<BTreeSet<BlockId>> = (0..blocks.len())
        .map(|i| if i == 0 || !reachable[i] { BTreeSet::from([i]) } else { all.clone() })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for id in 1..blocks.len() {
            if !reachable[id] {
                continue;
            }
            let mut preds = blocks[id].predecessors.iter().filter(|&&p| reachable[p]);
            let Some(&first) = preds.next() else { continue };
            let mut next = dom[first].clone();
            for &p in preds {
                next = next.intersection(&dom[p]).copied().collect();
            }
            next.insert(id);
            if next != dom[id] {
                dom[id] = next;
                changed = true;
            }
        }
    }
    dom
}

/// The strict dominator that every other strict dominator dominates.
fn immediate_dominator(dom: &[BTreeSet<BlockId>], id: BlockId) -> Option<BlockId> {
    dom[id].iter().copied().filter(|&d| d != id).max_by_key(|&d| dom[d].len())
}

fn find_loops(blocks: &[BasicBlock]) -> Vec<Loop> {
    let mut loops = Vec::new();
    for block in blocks {
        if block.predecessors.is_empty() {
            continue;
        }
        let reach = reachable_from(blocks, block.id);
        let sources: Vec<BlockId> = block.predecessors.iter().copied().filter(|&p| reach[p]).collect();
        if !sources.is_empty() {
            loops.push(Loop { header: block.id, back_edge_sources: sources });
        }
    }
    loops
}

/// Reverse postorder of a DFS forest: the entry is the first root, then each
/// block it never reached, in address order. Later trees end up in front, so
/// a dead block that falls into live code still precedes its target.
fn reverse_postorder(blocks: &[BasicBlock]) -> Vec<BlockId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let mut marks = vec![Mark::New; blocks.len()];
    let mut postorder = Vec::with_capacity(blocks.len());

    for root in 0..blocks.len() {
        if marks[root] != Mark::New {
            continue;
        }
        let mut stack: Vec<(BlockId, usize)> = vec![(root, 0)];
        marks[root] = Mark::Active;

        while let Some((id, next_child)) = stack.pop() {
            match blocks[id].successors.get(next_child) {
                Some(&succ) => {
                    stack.push((id, next_child + 1));
                    if marks[succ] == Mark::New {
                        marks[succ] = Mark::Active;
                        stack.push((succ, 0));
                    }
                }
                None => {
                    marks[id] = Mark::Done;
                    postorder.push(id);
                }
            }
        }
    }

    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::arm64::decode_all;
    use crate::container::testing::words_to_bytes;

    const BASE: u64 = 0x1_0000_4000;

    fn cfg(words: &[u32]) -> ControlFlowGraph {
        CfgBuilder::build("f", &decode_all(&words_to_bytes(words), BASE))
    }

    fn looped() -> ControlFlowGraph {
        cfg(&[
            0xa9bf7bfd, // stp x29, x30, [sp, #-0x10]!
            0x910003fd, // mov x29, sp
            0xb40000a0, // cbz x0, 0x1c
            0xd1000400, // sub x0, x0, #1
            0x94000040, // bl 0x110
            0xb5ffffc0, // cbnz x0, 0xc
            0xd503201f, // nop
            0xa8c17bfd, // ldp x29, x30, [sp], #0x10
            0xd65f03c0, // ret
        ])
    }

    #[test]
    fn test_blocks_edges_and_single_loop() {
        let cfg = looped();
        assert_eq!(cfg.len(), 4);
        let starts: Vec<u64> = cfg.blocks().iter().map(|b| b.start - BASE).collect();
        assert_eq!(starts, vec![0x0, 0xc, 0x18, 0x1c]);

        assert_eq!(cfg.edge_kind(0, 3), Some(EdgeKind::ConditionalTrue));
        assert_eq!(cfg.edge_kind(0, 1), Some(EdgeKind::ConditionalFalse));
        assert_eq!(cfg.edge_kind(1, 1), Some(EdgeKind::ConditionalTrue));
        assert_eq!(cfg.edge_kind(1, 2), Some(EdgeKind::ConditionalFalse));
        assert_eq!(cfg.edge_kind(2, 3), Some(EdgeKind::Fallthrough));

        let calls: Vec<&CfgEdge> = cfg.edges().iter().filter(|e| e.kind == EdgeKind::Call).collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].from, BASE + 0xc);
        assert_eq!(calls[0].to, BASE + 0x110);

        assert_eq!(cfg.block(1).unwrap().kind, BlockKind::Conditional);
        assert_eq!(cfg.block(3).unwrap().kind, BlockKind::Return);
        assert_eq!(cfg.loop_headers(), vec![1]);
        assert_eq!(cfg.detected_loops(), &[Loop { header: 1, back_edge_sources: vec![1] }]);
    }

    #[test]
    fn test_successor_predecessor_symmetry() {
        let cfg = looped();
        for block in cfg.blocks() {
            for &s in &block.successors {
                assert!(cfg.block(s).unwrap().predecessors.contains(&block.id));
            }
            for &p in &block.predecessors {
                assert!(cfg.block(p).unwrap().successors.contains(&block.id));
            }
        }
        assert!(cfg.entry().unwrap().predecessors.is_empty());
    }

    #[test]
    fn test_dominators_and_idom() {
        let cfg = looped();
        assert_eq!(cfg.block(0).unwrap().idom, None);
        assert_eq!(cfg.block(1).unwrap().idom, Some(0));
        assert_eq!(cfg.block(2).unwrap().idom, Some(1));
        assert_eq!(cfg.block(3).unwrap().idom, Some(0));
        assert!(cfg.dominates(1, 2));
        assert!(!cfg.dominates(1, 3));
    }

    #[test]
    fn test_acyclic_entry_dominates_all_and_order_is_topological() {
        // if (x0 == 0) { x1 = 1 } else { x1 = 2 } ; return
        let cfg = cfg(&[
            0xb4000060, // cbz x0, 0xc
            0xd2800041, // mov x1, #2
            0x14000002, // b 0x10
            0xd2800021, // mov x1, #1
            0xd65f03c0, // ret
        ]);
        assert_eq!(cfg.len(), 4);
        assert!(cfg.detected_loops().is_empty());
        for block in cfg.blocks() {
            assert!(cfg.dominates(0, block.id));
        }
        assert_eq!(cfg.block(3).unwrap().idom, Some(0));

        let order = cfg.topological_order();
        assert_eq!(order.len(), 4);
        let position = |id: BlockId| order.iter().position(|&b| b == id).unwrap();
        for block in cfg.blocks() {
            for &s in &block.successors {
                assert!(position(block.id) < position(s));
            }
        }
    }

    #[test]
    fn test_unreachable_block_and_block_lookup() {
        // ret ; nop
        let cfg = cfg(&[0xd65f03c0, 0xd503201f]);
        assert_eq!(cfg.len(), 2);
        assert!(cfg.block(1).unwrap().predecessors.is_empty());
        assert_eq!(cfg.block(1).unwrap().idom, None);
        assert_eq!(cfg.topological_order(), &[1, 0]);
        assert_eq!(cfg.block_at(BASE + 4).unwrap().id, 1);
        assert!(cfg.block_at(BASE + 8).is_none());
    }

    #[test]
    fn test_dead_block_falling_into_live_code_is_ordered_first() {
        let cfg = cfg(&[
            0x14000002, // b 0x8
            0xd503201f, // nop
            0xd65f03c0, // ret
        ]);
        assert_eq!(cfg.len(), 3);
        assert!(cfg.block(1).unwrap().predecessors.is_empty());
        assert_eq!(cfg.block(2).unwrap().predecessors, vec![0, 1]);

        let order = cfg.topological_order();
        assert_eq!(order.len(), 3);
        let position = |id: BlockId| order.iter().position(|&b| b == id).unwrap();
        for block in cfg.blocks() {
            for &s in &block.successors {
                assert!(position(block.id) < position(s), "edge {} -> {} violates {:?}", block.id, s, order);
            }
        }
        assert_eq!(order, &[1, 0, 2]);
    }
}
