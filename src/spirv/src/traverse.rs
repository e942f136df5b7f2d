use spirv_headers as spv;

use crate::*;

/// An instruction reached during traversal, with its operand words.
#[derive(Clone, Copy, Debug)]
pub struct ReachableOp<'a> {
    pub inst: Instruction,
    pub args: &'a [u32],
}

impl ReachableOp<'_> {
    pub fn op(&self) -> Option<spv::Op> {
        self.inst.op()
    }
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    function: Id,
    block: usize,
    op: usize,
}

/// Lazily visits every block op reachable from a function, in block
/// order. A call is yielded first, then the callee's ops, then the rest
/// of the caller.
#[derive(Clone, Debug)]
pub struct ReachableOps<'a> {
    ir: &'a Ir,
    stack: Vec<Frame>,
    failed: bool,
}

impl<'a> ReachableOps<'a> {
    pub(crate) fn new(ir: &'a Ir, function: Id) -> Self {
        Self {
            ir,
            stack: vec![Frame { function, block: 0, op: 0 }],
            failed: false,
        }
    }

    fn step(&mut self) -> Result<Option<ReachableOp<'a>>> {
        let ir = self.ir;
        loop {
            let frame = match self.stack.last_mut() {
                Some(frame) => frame,
                None => return Ok(None),
            };
            let function = ir.get::<Function>(frame.function)?;
            let block = match function.blocks.get(frame.block) {
                Some(&block) => ir.get::<Block>(block)?,
                None => {
                    self.stack.pop();
                    continue;
                },
            };
            let inst = match block.ops.get(frame.op) {
                Some(&inst) => inst,
                None => {
                    frame.block += 1;
                    frame.op = 0;
                    continue;
                },
            };
            frame.op += 1;

            let args = ir.stream(&inst)?;
            if inst.op() == Some(spv::Op::FunctionCall) {
                let callee = *args.get(2).ok_or_else(||
                    err!(OutOfRange, "OpFunctionCall is missing its callee"))?;
                // Recursion is illegal; never re-enter a function on the
                // current call path.
                if !self.stack.iter().any(|frame| frame.function == callee) {
                    self.stack.push(Frame { function: callee, block: 0, op: 0 });
                }
            }
            return Ok(Some(ReachableOp { inst, args }));
        }
    }
}

impl<'a> Iterator for ReachableOps<'a> {
    type Item = Result<ReachableOp<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed { return None; }
        match self.step() {
            Ok(op) => op.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use spirv_headers::{Op, StorageClass};

    use crate::testing::*;
    use super::*;

    fn ops(compiler: &Compiler, function: Id) -> Vec<Option<Op>> {
        compiler.reachable_ops(function)
            .map(|op| op.unwrap().op())
            .collect()
    }

    fn call_shader() -> Assembler {
        let mut asm = Assembler::new(20);
        asm.op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[2, 1])
            .op(Op::TypeFloat, &[3, 32])
            .op(Op::TypePointer, &[5, StorageClass::Private as u32, 3])
            .op(Op::Variable, &[5, 6, StorageClass::Private as u32])
            .op(Op::Function, &[1, 4, 0, 2])
            .op(Op::Label, &[10])
            .op(Op::Load, &[3, 11, 6])
            .op(Op::FunctionCall, &[1, 12, 7])
            .op(Op::Store, &[6, 11])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[])
            .op(Op::Function, &[1, 7, 0, 2])
            .op(Op::Label, &[13])
            .op(Op::Branch, &[14])
            .op(Op::Label, &[14])
            .op(Op::Load, &[3, 15, 6])
            .op(Op::FunctionCall, &[1, 16, 7])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[]);
        asm
    }

    #[test]
    fn descends_into_calls() {
        let compiler = call_shader().compile();
        assert_eq!(ops(&compiler, 4), vec![
            Some(Op::Load),
            Some(Op::FunctionCall),
            Some(Op::Load),
            // The recursive call is yielded but not followed
            Some(Op::FunctionCall),
            Some(Op::Store),
        ]);
        assert_eq!(ops(&compiler, 7), vec![
            Some(Op::Load),
            Some(Op::FunctionCall),
        ]);
    }

    #[test]
    fn operands() {
        let compiler = call_shader().compile();
        let first = compiler.reachable_ops(4).next().unwrap().unwrap();
        assert_eq!(first.args, &[3, 11, 6]);
    }

    #[test]
    fn restartable() {
        let compiler = call_shader().compile();
        let iter = compiler.reachable_ops(4);
        let copy = iter.clone();
        assert_eq!(iter.count(), 5);
        assert_eq!(copy.count(), 5);
    }

    #[test]
    fn bad_function() {
        let compiler = call_shader().compile();
        let mut iter = compiler.reachable_ops(3);
        let err = iter.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongEntityKind);
        assert!(iter.next().is_none());
    }
}
