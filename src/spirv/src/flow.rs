use fnv::{FnvHashMap, FnvHashSet};
use log::debug;
use spirv_headers as spv;

use crate::*;

/// Structured control-flow sets derived from the merge instructions of
/// every block in the module.
#[derive(Debug, Default)]
pub struct ControlFlow {
    loop_headers: FnvHashSet<Id>,
    continue_blocks: FnvHashSet<Id>,
    loop_merge_targets: FnvHashSet<Id>,
    selection_merge_targets: FnvHashSet<Id>,
    multiselect_merge_targets: FnvHashSet<Id>,
    loop_of_continue: FnvHashMap<Id, Id>,
}

/// Shape that `block_is_loop_candidate` tries to match.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LoopMethod {
    /// The loop header itself ends in the exit condition.
    MergeToSelectForLoop,
    /// The loop header branches straight to a block holding the exit
    /// condition.
    MergeToDirectForLoop,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ContinueBlockType {
    /// The continue block branches straight back with no work.
    WhileLoop,
    /// The continue block does work, then branches straight back.
    ForLoop,
    /// The continue block holds the exit condition.
    DoWhileLoop,
    /// Anything else; emitters must lower it without a loop idiom.
    Complex,
}

impl ControlFlow {
    pub(crate) fn analyze(ir: &Ir) -> Self {
        let mut flow = Self::default();
        for (id, block) in ir.iter::<Block>() {
            match block.merge {
                Merge::Loop { merge_block, continue_block } => {
                    flow.loop_headers.insert(id);
                    flow.loop_merge_targets.insert(merge_block);
                    // A header continuing to itself is not a continue
                    // block, but its continue shape can still be asked for.
                    if continue_block != id {
                        flow.continue_blocks.insert(continue_block);
                    }
                    flow.loop_of_continue.insert(continue_block, id);
                },
                Merge::Selection(merge_block) => {
                    flow.selection_merge_targets.insert(merge_block);
                    if let Terminator::MultiSelect { .. } = block.terminator {
                        flow.multiselect_merge_targets.insert(merge_block);
                    }
                },
                Merge::None => {},
            }
        }
        debug!(
            "control flow: {} loops, {} selection merges",
            flow.loop_headers.len(), flow.selection_merge_targets.len(),
        );
        flow
    }

    pub fn loop_headers(&self) -> &FnvHashSet<Id> {
        &self.loop_headers
    }

    pub fn continue_blocks(&self) -> &FnvHashSet<Id> {
        &self.continue_blocks
    }

    pub fn loop_merge_targets(&self) -> &FnvHashSet<Id> {
        &self.loop_merge_targets
    }

    pub fn selection_merge_targets(&self) -> &FnvHashSet<Id> {
        &self.selection_merge_targets
    }

    pub fn multiselect_merge_targets(&self) -> &FnvHashSet<Id> {
        &self.multiselect_merge_targets
    }

    pub fn is_loop_header(&self, block: Id) -> bool {
        self.loop_headers.contains(&block)
    }

    pub fn is_continue(&self, block: Id) -> bool {
        self.continue_blocks.contains(&block)
    }

    /// Branching here leaves a loop or a switch.
    pub fn is_break(&self, block: Id) -> bool {
        self.loop_merge_targets.contains(&block) ||
            self.multiselect_merge_targets.contains(&block)
    }

    pub fn is_conditional(&self, block: Id) -> bool {
        self.selection_merge_targets.contains(&block) &&
            !self.multiselect_merge_targets.contains(&block)
    }

    /// The loop header that declared `block` as its continue target.
    pub fn loop_header_of(&self, block: Id) -> Option<Id> {
        self.loop_of_continue.get(&block).copied()
    }
}

impl Compiler {
    pub fn is_continue(&self, block: Id) -> bool {
        self.control_flow().is_continue(block)
    }

    pub fn is_break(&self, block: Id) -> bool {
        self.control_flow().is_break(block)
    }

    pub fn is_conditional(&self, block: Id) -> bool {
        self.control_flow().is_conditional(block)
    }

    /// Whether a loop header matches the requested for-loop shape, so an
    /// emitter may fold its condition into the loop statement.
    pub fn block_is_loop_candidate(&self, id: Id, method: LoopMethod) ->
        Result<bool>
    {
        let block = self.get_block(id)?;
        if block.disable_block_optimization || block.complex_continue {
            return Ok(false);
        }
        let merge_block = match block.merge {
            Merge::Loop { merge_block, .. } => merge_block,
            _ => return Ok(false),
        };

        // Phis in the merge block fed from inside the condition cannot be
        // expressed once the condition moves into the loop statement.
        let merge_has_phi_from = |parents: &[Id]| {
            self.ir.maybe_get::<Block>(merge_block).map_or(false, |merge| {
                merge.phi_variables.iter()
                    .any(|phi| parents.contains(&phi.parent))
            })
        };

        match method {
            LoopMethod::MergeToSelectForLoop => {
                let candidate = match block.terminator {
                    Terminator::Select { true_block, false_block, .. } =>
                        false_block == merge_block &&
                        true_block != merge_block && true_block != id,
                    _ => false,
                };
                if !candidate { return Ok(false); }
                if block.phi_variables.iter().any(|phi| phi.parent == id) {
                    return Ok(false);
                }
                Ok(!merge_has_phi_from(&[id]))
            },
            LoopMethod::MergeToDirectForLoop => {
                let next = match block.terminator {
                    Terminator::Direct(next) if block.ops.is_empty() => next,
                    _ => return Ok(false),
                };
                let child = self.get_block(next)?;
                let false_block = match child.terminator {
                    Terminator::Select { true_block, false_block, .. }
                        if child.merge == Merge::None &&
                            false_block == merge_block &&
                            true_block != merge_block && true_block != id
                        => false_block,
                    _ => return Ok(false),
                };
                if block.phi_variables.iter()
                    .any(|phi| phi.parent == id || phi.parent == next)
                {
                    return Ok(false);
                }
                if child.phi_variables.iter().any(|phi| phi.parent == id) {
                    return Ok(false);
                }
                Ok(!merge_has_phi_from(&[id, false_block]))
            },
        }
    }

    /// Walks unconditional branches from `from`. Cycles not passing
    /// through `to` end the walk. With `require_empty`, a step that has
    /// to write phis of the next block also ends it.
    fn walk_direct(&self, from: Id, to: Id, require_empty: bool) ->
        Result<bool>
    {
        let mut current = from;
        for _ in 0..=self.ir.bound() {
            if current == to { return Ok(true); }
            let block = self.get_block(current)?;
            if require_empty && !block.ops.is_empty() { return Ok(false); }
            let next = match (block.merge, block.next_block()) {
                (Merge::None, Some(next)) => next,
                _ => return Ok(false),
            };
            if require_empty && self.get_block(next)?.phi_variables.iter()
                .any(|phi| phi.parent == current)
            {
                return Ok(false);
            }
            current = next;
        }
        Ok(false)
    }

    /// True if `to` is reached from `from` through unconditional
    /// branches only.
    pub fn execution_is_branchless(&self, from: Id, to: Id) -> Result<bool> {
        self.walk_direct(from, to, false)
    }

    /// Like `execution_is_branchless`, but every block on the way must
    /// also be empty.
    pub fn execution_is_noop(&self, from: Id, to: Id) -> Result<bool> {
        self.walk_direct(from, to, true)
    }

    pub fn continue_block_type(&self, id: Id) -> Result<ContinueBlockType> {
        let header = self.control_flow().loop_header_of(id)
            .ok_or_else(|| err!(UnsupportedConstruct,
                "block {} is not the continue target of a loop", id))?;
        let block = self.get_block(id)?;
        let dominator = self.get_block(header)?;

        if block.complex_continue {
            return Ok(ContinueBlockType::Complex);
        }
        if let Merge::Loop { .. } = block.merge {
            return Ok(ContinueBlockType::WhileLoop);
        }
        if self.execution_is_noop(id, header)? {
            return Ok(ContinueBlockType::WhileLoop);
        }
        if self.execution_is_branchless(id, header)? {
            return Ok(ContinueBlockType::ForLoop);
        }
        match block.terminator {
            Terminator::Select { true_block, false_block, .. }
                if block.merge == Merge::None && true_block == header &&
                    Some(false_block) == dominator.merge.merge_block()
                => Ok(ContinueBlockType::DoWhileLoop),
            _ => Ok(ContinueBlockType::Complex),
        }
    }

    /// Keeps emitters from collapsing this block into a loop idiom.
    pub fn disable_block_optimization(&mut self, id: Id) -> Result<()> {
        self.ir.get_mut::<Block>(id)?.disable_block_optimization = true;
        Ok(())
    }

    pub fn set_complex_continue(&mut self, id: Id, complex: bool) -> Result<()>
    {
        self.ir.get_mut::<Block>(id)?.complex_continue = complex;
        Ok(())
    }

    /// Whether running `id` can have effects outside its function.
    pub fn block_is_pure(&self, id: Id) -> Result<bool> {
        let block = self.get_block(id)?;
        for inst in block.ops.iter() {
            let args = self.ir.stream(inst)?;
            if inst.op() == Some(spv::Op::FunctionCall) {
                let callee = *args.get(2).ok_or_else(||
                    err!(OutOfRange, "OpFunctionCall is missing its callee"))?;
                if !self.function_is_pure(callee)? {
                    return Ok(false);
                }
            } else if !self.op_is_pure(inst.op(), args)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether the function and everything it calls is free of side
    /// effects.
    pub fn function_is_pure(&self, id: Id) -> Result<bool> {
        for op in self.reachable_ops(id) {
            let op = op?;
            if !self.op_is_pure(op.op(), op.args)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn op_is_pure(&self, op: Option<spv::Op>, args: &[u32]) -> Result<bool> {
        use spv::Op;
        let op = match op {
            Some(op) => op,
            None => return Ok(false),
        };
        Ok(match op {
            Op::Store | Op::CopyMemory => {
                let target = *args.first().ok_or_else(||
                    err!(OutOfRange, "{:?} is missing its target", op))?;
                self.ir.pointer_type(target)?.storage ==
                    spv::StorageClass::Function
            },
            Op::ImageWrite |
            Op::AtomicLoad | Op::AtomicStore | Op::AtomicExchange |
            Op::AtomicCompareExchange | Op::AtomicCompareExchangeWeak |
            Op::AtomicIIncrement | Op::AtomicIDecrement | Op::AtomicIAdd |
            Op::AtomicISub | Op::AtomicSMin | Op::AtomicUMin |
            Op::AtomicSMax | Op::AtomicUMax | Op::AtomicAnd | Op::AtomicOr |
            Op::AtomicXor |
            Op::EmitVertex | Op::EndPrimitive | Op::EmitStreamVertex |
            Op::EndStreamPrimitive |
            Op::ControlBarrier | Op::MemoryBarrier => false,
            _ => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use spirv_headers::Op;

    use crate::testing::*;
    use super::*;

    #[test]
    fn merge_sets() {
        let compiler = loop_shader().compile();
        let flow = compiler.control_flow();
        assert!(flow.is_loop_header(11));
        assert!(compiler.is_continue(14));
        assert!(!compiler.is_continue(11));
        assert_eq!(flow.loop_header_of(14), Some(11));

        // Loop merge
        assert!(compiler.is_break(13));
        // Switch merge
        assert!(compiler.is_break(17));
        assert!(!compiler.is_conditional(17));
        assert!(flow.selection_merge_targets().contains(&17));
        assert!(flow.multiselect_merge_targets().contains(&17));
        assert!(!compiler.is_break(12));
    }

    #[test]
    fn continue_types() {
        let compiler = loop_shader().compile();
        assert_eq!(compiler.continue_block_type(14).unwrap(),
            ContinueBlockType::WhileLoop);
        let err = compiler.continue_block_type(12).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
    }

    #[test]
    fn self_continue() {
        let mut asm = Assembler::new(20);
        asm.op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[2, 1])
            .op(Op::TypeBool, &[3])
            .op(Op::ConstantTrue, &[3, 5])
            .op(Op::Function, &[1, 4, 0, 2])
            .op(Op::Label, &[10])
            .op(Op::Branch, &[11])
            .op(Op::Label, &[11])
            .op(Op::LoopMerge, &[13, 11, 0])
            .op(Op::BranchConditional, &[5, 11, 13])
            .op(Op::Label, &[13])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[]);
        let compiler = asm.compile();
        assert!(!compiler.is_continue(11));
        assert_eq!(compiler.control_flow().loop_header_of(11), Some(11));
        assert_eq!(compiler.continue_block_type(11).unwrap(),
            ContinueBlockType::WhileLoop);
    }

    #[test]
    fn complex_continue_flag() {
        let mut compiler = loop_shader().compile();
        compiler.set_complex_continue(14, true).unwrap();
        assert_eq!(compiler.continue_block_type(14).unwrap(),
            ContinueBlockType::Complex);
        compiler.set_complex_continue(14, false).unwrap();
        assert_eq!(compiler.continue_block_type(14).unwrap(),
            ContinueBlockType::WhileLoop);
    }

    /// The empty continue block 14 feeds the loop-carried phi 20 of the
    /// header.
    #[test]
    fn continue_writes_header_phi() {
        let mut asm = Assembler::new(24);
        asm.op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[2, 1])
            .op(Op::TypeBool, &[3])
            .op(Op::ConstantTrue, &[3, 5])
            .op(Op::ConstantFalse, &[3, 6])
            .op(Op::Function, &[1, 4, 0, 2])
            .op(Op::Label, &[10])
            .op(Op::Branch, &[11])
            .op(Op::Label, &[11])
            .op(Op::Phi, &[3, 20, 5, 10, 21, 14])
            .op(Op::LoopMerge, &[13, 14, 0])
            .op(Op::BranchConditional, &[20, 12, 13])
            .op(Op::Label, &[12])
            .op(Op::LogicalNot, &[3, 21, 20])
            .op(Op::Branch, &[14])
            .op(Op::Label, &[14])
            .op(Op::Branch, &[11])
            .op(Op::Label, &[13])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[]);
        let compiler = asm.compile();
        assert!(compiler.execution_is_branchless(14, 11).unwrap());
        assert!(!compiler.execution_is_noop(14, 11).unwrap());
        assert_eq!(compiler.continue_block_type(14).unwrap(),
            ContinueBlockType::ForLoop);
    }

    #[test]
    fn loop_candidates() {
        let mut compiler = loop_shader().compile();
        assert!(compiler.block_is_loop_candidate(
            11, LoopMethod::MergeToSelectForLoop).unwrap());
        assert!(!compiler.block_is_loop_candidate(
            11, LoopMethod::MergeToDirectForLoop).unwrap());
        assert!(!compiler.block_is_loop_candidate(
            12, LoopMethod::MergeToSelectForLoop).unwrap());

        compiler.disable_block_optimization(11).unwrap();
        assert!(!compiler.block_is_loop_candidate(
            11, LoopMethod::MergeToSelectForLoop).unwrap());
    }

    #[test]
    fn branchless_walks() {
        let compiler = loop_shader().compile();
        assert!(compiler.execution_is_branchless(12, 11).unwrap());
        assert!(!compiler.execution_is_noop(12, 11).unwrap());
        assert!(compiler.execution_is_noop(14, 11).unwrap());
        assert!(compiler.execution_is_branchless(15, 17).unwrap());
        assert!(!compiler.execution_is_branchless(11, 13).unwrap());
        assert!(compiler.execution_is_noop(17, 17).unwrap());
    }

    /// A loop whose continue block carries the exit condition, entered
    /// through an empty header that branches to the body.
    fn do_while_shader() -> Assembler {
        let mut asm = Assembler::new(20);
        asm.op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[2, 1])
            .op(Op::TypeBool, &[3])
            .op(Op::ConstantTrue, &[3, 5])
            .op(Op::Function, &[1, 4, 0, 2])
            .op(Op::Label, &[10])
            .op(Op::Branch, &[11])
            .op(Op::Label, &[11])
            .op(Op::LoopMerge, &[13, 12, 0])
            .op(Op::Branch, &[12])
            .op(Op::Label, &[12])
            .op(Op::BranchConditional, &[5, 11, 13])
            .op(Op::Label, &[13])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[]);
        asm
    }

    #[test]
    fn do_while_continue() {
        let compiler = do_while_shader().compile();
        assert_eq!(compiler.continue_block_type(12).unwrap(),
            ContinueBlockType::DoWhileLoop);
        assert!(!compiler.block_is_loop_candidate(
            11, LoopMethod::MergeToSelectForLoop).unwrap());
    }

    #[test]
    fn direct_for_loop() {
        let mut asm = Assembler::new(20);
        asm.op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[2, 1])
            .op(Op::TypeBool, &[3])
            .op(Op::ConstantTrue, &[3, 5])
            .op(Op::Function, &[1, 4, 0, 2])
            .op(Op::Label, &[10])
            .op(Op::Branch, &[11])
            .op(Op::Label, &[11])
            .op(Op::LoopMerge, &[14, 13, 0])
            .op(Op::Branch, &[12])
            .op(Op::Label, &[12])
            .op(Op::BranchConditional, &[5, 15, 14])
            .op(Op::Label, &[15])
            .op(Op::Branch, &[13])
            .op(Op::Label, &[13])
            .op(Op::Branch, &[11])
            .op(Op::Label, &[14])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[]);
        let compiler = asm.compile();
        assert!(compiler.block_is_loop_candidate(
            11, LoopMethod::MergeToDirectForLoop).unwrap());
        assert!(!compiler.block_is_loop_candidate(
            11, LoopMethod::MergeToSelectForLoop).unwrap());
    }

    #[test]
    fn phi_blocks_candidate() {
        let mut asm = Assembler::new(20);
        asm.op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[2, 1])
            .op(Op::TypeBool, &[3])
            .op(Op::ConstantTrue, &[3, 5])
            .op(Op::Function, &[1, 4, 0, 2])
            .op(Op::Label, &[10])
            .op(Op::Branch, &[11])
            .op(Op::Label, &[11])
            .op(Op::LoopMerge, &[13, 12, 0])
            .op(Op::BranchConditional, &[5, 12, 13])
            .op(Op::Label, &[12])
            .op(Op::Branch, &[11])
            .op(Op::Label, &[13])
            .op(Op::Phi, &[3, 6, 5, 11])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[]);
        let compiler = asm.compile();
        assert!(!compiler.block_is_loop_candidate(
            11, LoopMethod::MergeToSelectForLoop).unwrap());
    }

    #[test]
    fn recomputed_after_edit() {
        let mut compiler = loop_shader().compile();
        assert!(compiler.is_continue(14));
        let _ = compiler.increase_bound_by(1);
        // The sets are rebuilt from the same blocks
        assert!(compiler.is_continue(14));
        assert!(compiler.is_break(13));
    }

    #[test]
    fn purity() {
        let compiler = loop_shader().compile();
        assert!(compiler.block_is_pure(12).unwrap());
        assert!(compiler.function_is_pure(4).unwrap());

        let compiler = uniform_block_shader().compile();
        // Stores to an output variable
        assert!(!compiler.function_is_pure(4).unwrap());
    }
}
