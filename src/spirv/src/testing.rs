#![cfg(test)]

use spirv_headers as spv;
use spirv_headers::{Decoration, ExecutionModel, Op, StorageClass};

use crate::*;

static INIT_LOGGING: std::sync::Once = std::sync::Once::new();

pub(crate) fn init_logging() {
    INIT_LOGGING.call_once(env_logger::init);
}

pub(crate) fn string_words(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes.chunks(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Hand assembler for test modules. IDs are chosen by the caller.
#[derive(Clone, Debug)]
pub(crate) struct Assembler {
    words: Vec<u32>,
}

impl Assembler {
    pub(crate) fn new(bound: u32) -> Self {
        Self { words: vec![parser::MAGIC, 0x0001_0000, 0, bound, 0] }
    }

    pub(crate) fn version(&mut self, major: u8, minor: u8) -> &mut Self {
        self.words[1] = ((major as u32) << 16) | ((minor as u32) << 8);
        self
    }

    pub(crate) fn raw(&mut self, opcode: u16, operands: &[u32]) -> &mut Self {
        let count = (operands.len() + 1) as u32;
        self.words.push((count << 16) | opcode as u32);
        self.words.extend_from_slice(operands);
        self
    }

    pub(crate) fn op(&mut self, op: Op, operands: &[u32]) -> &mut Self {
        self.raw(op as u16, operands)
    }

    /// An instruction with a string operand between other operands.
    pub(crate) fn op_str(
        &mut self,
        op: Op,
        before: &[u32],
        s: &str,
        after: &[u32],
    ) -> &mut Self {
        let mut operands = before.to_vec();
        operands.extend(string_words(s));
        operands.extend_from_slice(after);
        self.op(op, &operands)
    }

    pub(crate) fn name(&mut self, id: Id, name: &str) -> &mut Self {
        self.op_str(Op::Name, &[id], name, &[])
    }

    pub(crate) fn member_name(&mut self, id: Id, member: u32, name: &str) ->
        &mut Self
    {
        self.op_str(Op::MemberName, &[id, member], name, &[])
    }

    pub(crate) fn decorate(
        &mut self,
        id: Id,
        decoration: Decoration,
        args: &[u32],
    ) -> &mut Self {
        let mut operands = vec![id, decoration as u32];
        operands.extend_from_slice(args);
        self.op(Op::Decorate, &operands)
    }

    pub(crate) fn member_decorate(
        &mut self,
        id: Id,
        member: u32,
        decoration: Decoration,
        args: &[u32],
    ) -> &mut Self {
        let mut operands = vec![id, member, decoration as u32];
        operands.extend_from_slice(args);
        self.op(Op::MemberDecorate, &operands)
    }

    pub(crate) fn words(&self) -> Vec<u32> {
        self.words.clone()
    }

    pub(crate) fn compile(&self) -> Compiler {
        init_logging();
        Compiler::new(self.words()).unwrap()
    }
}

/// A fragment shader with a two-member uniform block; `main` stops
/// right after its `OpFunction`.
pub(crate) fn uniform_block_shader_without_body() -> Assembler {
    let mut asm = Assembler::new(21);
    asm.op(Op::Capability, &[spv::Capability::Shader as u32])
        .op_str(Op::EntryPoint, &[ExecutionModel::Fragment as u32, 4], "main",
            &[20])
        .op(Op::ExecutionMode, &[4, spv::ExecutionMode::OriginUpperLeft as u32])
        .name(7, "Globals")
        .member_name(7, 0, "a")
        .member_name(7, 1, "b")
        .name(9, "ubo")
        .member_decorate(7, 0, Decoration::Offset, &[0])
        .member_decorate(7, 1, Decoration::Offset, &[16])
        .decorate(7, Decoration::Block, &[])
        .decorate(9, Decoration::DescriptorSet, &[0])
        .decorate(9, Decoration::Binding, &[1])
        .decorate(20, Decoration::Location, &[0])
        .op(Op::TypeVoid, &[1])
        .op(Op::TypeFunction, &[2, 1])
        .op(Op::TypeInt, &[3, 32, 1])
        .op(Op::TypeFloat, &[5, 32])
        .op(Op::TypeVector, &[6, 5, 4])
        .op(Op::TypeStruct, &[7, 6, 6])
        .op(Op::TypePointer, &[8, StorageClass::Uniform as u32, 7])
        .op(Op::Variable, &[8, 9, StorageClass::Uniform as u32])
        .op(Op::Constant, &[3, 11, 1])
        .op(Op::TypePointer, &[12, StorageClass::Uniform as u32, 6])
        .op(Op::TypePointer, &[19, StorageClass::Output as u32, 6])
        .op(Op::Variable, &[19, 20, StorageClass::Output as u32])
        .op(Op::Function, &[1, 4, 0, 2]);
    asm
}

/// `main` copies `ubo.b` to the output.
pub(crate) fn uniform_block_shader() -> Assembler {
    let mut asm = uniform_block_shader_without_body();
    asm.op(Op::Label, &[10])
        .op(Op::AccessChain, &[12, 14, 9, 11])
        .op(Op::Load, &[6, 15, 14])
        .op(Op::Store, &[20, 15])
        .op(Op::Return, &[])
        .op(Op::FunctionEnd, &[]);
    asm
}

/// A while loop followed by a switch:
///
/// ```text
/// 10 -> 11 (loop header, merge 13, continue 14) -> 12 | 13
/// 12 -> 14 -> 11
/// 13 (selection merge 17) switch: 1 -> 15, default -> 16
/// 15, 16 -> 17, return
/// ```
pub(crate) fn loop_shader() -> Assembler {
    let mut asm = Assembler::new(19);
    asm.op(Op::Capability, &[spv::Capability::Shader as u32])
        .op_str(Op::EntryPoint, &[ExecutionModel::GLCompute as u32, 4], "main",
            &[])
        .op(Op::TypeVoid, &[1])
        .op(Op::TypeFunction, &[2, 1])
        .op(Op::TypeBool, &[3])
        .op(Op::TypeInt, &[6, 32, 1])
        .op(Op::TypePointer, &[7, StorageClass::Function as u32, 6])
        .op(Op::Constant, &[6, 8, 1])
        .op(Op::ConstantTrue, &[3, 9])
        .op(Op::Function, &[1, 4, 0, 2])
        .op(Op::Label, &[10])
        .op(Op::Variable, &[7, 18, StorageClass::Function as u32])
        .op(Op::Branch, &[11])
        .op(Op::Label, &[11])
        .op(Op::LoopMerge, &[13, 14, 0])
        .op(Op::BranchConditional, &[9, 12, 13])
        .op(Op::Label, &[12])
        .op(Op::Store, &[18, 8])
        .op(Op::Branch, &[14])
        .op(Op::Label, &[14])
        .op(Op::Branch, &[11])
        .op(Op::Label, &[13])
        .op(Op::SelectionMerge, &[17, 0])
        .op(Op::Switch, &[8, 16, 1, 15])
        .op(Op::Label, &[15])
        .op(Op::Branch, &[17])
        .op(Op::Label, &[16])
        .op(Op::Branch, &[17])
        .op(Op::Label, &[17])
        .op(Op::Return, &[])
        .op(Op::FunctionEnd, &[]);
    asm
}
