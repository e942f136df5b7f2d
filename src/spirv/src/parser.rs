use fnv::FnvHashMap;
use log::{debug, trace, warn};
use num_traits::FromPrimitive;
use spirv_headers as spv;

use crate::*;
use crate::node::{self, Literal, Node, Parse};

pub(crate) const MAGIC: u32 = 0x0723_0203;
pub(crate) const HEADER_LEN: usize = 5;

pub type Version = (u8, u8);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Header {
    /// The SPIR-V version as a pair `(major, minor)`.
    pub version: Version,
    pub generator: u32,
    /// Every ID in the module is strictly below this.
    pub bound: u32,
    pub schema: u32,
}

/// Location of one instruction's operands within the module words.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Instruction {
    pub opcode: u16,
    /// Index of the first operand word.
    pub offset: u32,
    /// Operand count, excluding the opcode word.
    pub length: u32,
}

impl Instruction {
    pub fn op(&self) -> Option<spv::Op> {
        spv::Op::from_u32(self.opcode as u32)
    }

    pub(crate) fn range(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.length as usize
    }
}

#[derive(Clone, Debug)]
pub(crate) struct InstructionParser<'data> {
    op: Option<spv::Op>,
    // Remaining operand words including the type and result ids
    operands: &'data [u32],
    bound: u32,
}

fn decode_op(word: u32) -> (u16, usize) {
    let size = (word >> 16) & 0xffff;
    ((word & 0xffff) as u16, size as _)
}

/// Validates the header, byte-swapping the whole module first if it was
/// written with the opposite endianness.
fn parse_header(words: &mut [u32]) -> Result<Header> {
    if words.len() < HEADER_LEN {
        bail!(MalformedHeader, "module is only {} words long", words.len());
    }

    if words[0] == MAGIC.swap_bytes() {
        trace!("byte-swapping module");
        for word in words.iter_mut() {
            *word = word.swap_bytes();
        }
    }
    if words[0] != MAGIC {
        bail!(MalformedHeader, "bad magic number {:#010x}", words[0]);
    }

    let byte = |word: u32, n: u32| ((word >> (8 * n)) & 0xff) as u8;
    let raw = words[1];
    let version = (byte(raw, 2), byte(raw, 1));
    if raw & 0xff00_00ff != 0 || version.0 != 1 || version.1 > 6 {
        bail!(MalformedHeader, "unsupported version {:#010x}", raw);
    }

    Ok(Header {
        version,
        generator: words[2],
        bound: words[3],
        schema: words[4],
    })
}

impl<'data> InstructionParser<'data> {
    pub(crate) fn new(
        op: Option<spv::Op>,
        operands: &'data [u32],
        bound: u32,
    ) -> Self {
        Self { op, operands, bound }
    }

    pub(crate) fn op(&self) -> Option<spv::Op> {
        self.op
    }

    pub(crate) fn consume(&mut self) -> Result<u32> {
        let (&first, rest) = self.operands.split_first().ok_or_else(||
            err!(OutOfRange, "{:?} is missing operands", self.op))?;
        self.operands = rest;
        Ok(first)
    }

    pub(crate) fn parse_id(&mut self) -> Result<Id> {
        let id = self.consume()?;
        if id >= self.bound {
            bail!(OutOfRange, "{:?} references ID {} beyond bound {}",
                self.op, id, self.bound);
        }
        Ok(id)
    }

    /// Reads a nul-terminated literal string. Bytes are packed low-order
    /// first within each word regardless of host endianness.
    pub(crate) fn parse_string(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        loop {
            let word = self.consume()?.to_le_bytes();
            match word.iter().position(|&b| b == 0) {
                Some(len) => {
                    bytes.extend_from_slice(&word[..len]);
                    break;
                },
                None => bytes.extend_from_slice(&word),
            }
        }
        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }

    pub(crate) fn parse_enum<T: FromPrimitive>(&mut self, what: &str) ->
        Result<T>
    {
        let word = self.consume()?;
        T::from_u32(word).ok_or_else(|| err!(UnsupportedConstruct,
            "unknown {} value {}", what, word))
    }

    pub(crate) fn parse<T: Parse>(&mut self) -> Result<T> {
        T::parse(self)
    }

    pub(crate) fn parse_many<T: Parse>(&mut self) -> Result<Vec<T>> {
        let mut res = Vec::new();
        while !self.operands.is_empty() {
            res.push(self.parse()?);
        }
        Ok(res)
    }

    pub(crate) fn parse_option<T: Parse>(&mut self) -> Result<Option<T>> {
        Ok(if !self.operands.is_empty() {
            Some(self.parse()?)
        } else { None })
    }
}

#[derive(Debug)]
struct InstIter<'a> {
    data: &'a [u32],
    pos: usize,
}

impl<'a> Iterator for InstIter<'a> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        let (opcode, words) = decode_op(*self.data.get(self.pos)?);
        let pos = self.pos;
        if words == 0 {
            self.pos = self.data.len();
            return Some(Err(err!(OutOfRange,
                "instruction at word {} has a word count of zero", pos)));
        }
        if self.data.len() - pos < words {
            self.pos = self.data.len();
            return Some(Err(err!(OutOfRange,
                "instruction at word {} needs {} words but only {} remain",
                pos, words, self.data.len() - pos)));
        }

        self.pos += words;
        Some(Ok(Instruction {
            opcode,
            offset: (pos + 1) as u32,
            length: (words - 1) as u32,
        }))
    }
}

fn instructions(words: &[u32]) -> InstIter<'_> {
    InstIter { data: words, pos: HEADER_LEN }
}

/// Builds the entity table and metadata from a word stream.
pub(crate) fn parse_module(mut words: Vec<u32>, options: &Options) ->
    Result<Ir>
{
    let header = parse_header(&mut words)?;
    debug!(
        "parsing SPIR-V {}.{} module, bound {}",
        header.version.0, header.version.1, header.bound,
    );

    let mut ir = Ir::new(header);
    let mut parser = ModuleParser {
        ir: &mut ir,
        options,
        function: None,
        block: None,
        int64: false,
        value_types: Default::default(),
    };
    for inst in instructions(&words) {
        let inst = inst?;
        let mut operands = InstructionParser::new(
            inst.op(), &words[inst.range()], header.bound);
        parser.parse_instruction(inst, &mut operands)?;
    }
    parser.finish()?;

    ir.words = words;
    Ok(ir)
}

struct ModuleParser<'a> {
    ir: &'a mut Ir,
    options: &'a Options,
    function: Option<Id>,
    block: Option<Id>,
    /// Whether a 64-bit integer type has been declared.
    int64: bool,
    /// Result types of instructions that may feed a switch selector.
    value_types: FnvHashMap<Id, Id>,
}

impl<'a> ModuleParser<'a> {
    fn declare<N: Node, T: Payload>(&mut self, node: &N, val: T) ->
        Result<&mut T>
    {
        self.ir.set(node.id(), val)
    }

    fn current_function(&self, op: spv::Op) -> Result<Id> {
        self.function.ok_or_else(|| err!(UnsupportedConstruct,
            "{:?} outside of a function", op))
    }

    fn current_block(&self, op: spv::Op) -> Result<Id> {
        self.block.ok_or_else(|| err!(UnsupportedConstruct,
            "{:?} outside of a block", op))
    }

    fn current_block_mut(&mut self, op: spv::Op) -> Result<&mut Block> {
        let block = self.current_block(op)?;
        self.ir.get_mut(block)
    }

    fn terminate(&mut self, op: spv::Op, terminator: Terminator) -> Result<()> {
        self.current_block_mut(op)?.terminator = terminator;
        self.block = None;
        Ok(())
    }

    fn derive_type(&self, from: Id, result: Id) -> Result<Type> {
        let mut ty = self.ir.get::<Type>(from)?.clone();
        ty.parent = Some(from);
        ty.base = result;
        Ok(ty)
    }

    fn parse_instruction(
        &mut self,
        inst: Instruction,
        operands: &mut InstructionParser<'_>,
    ) -> Result<()> {
        use spv::Op;

        let op = match operands.op() {
            Some(op) => op,
            None if self.options.strict_opcodes => bail!(UnsupportedConstruct,
                "unknown opcode {}", inst.opcode),
            None => {
                warn!("skipping unknown opcode {}", inst.opcode);
                return Ok(());
            },
        };

        match op {
            Op::Nop | Op::SourceContinued | Op::SourceExtension | Op::String |
                Op::Line | Op::NoLine | Op::MemoryModel | Op::ModuleProcessed
                => {},
            // String-valued decorations carry nothing reflection uses
            Op::DecorateString | Op::MemberDecorateString => {},
            Op::TypeForwardPointer | Op::TypeOpaque | Op::TypeEvent |
                Op::TypeDeviceEvent | Op::TypeReserveId | Op::TypeQueue |
                Op::TypePipe | Op::TypePipeStorage | Op::TypeNamedBarrier |
                Op::ConstantSampler | Op::ConstantPipeStorage
                => warn!("skipping unsupported declaration {:?}", op),
            Op::Source => {
                let source: node::Source = operands.parse()?;
                self.ir.source = Source {
                    version: source.version.0,
                    es: source.language == spv::SourceLanguage::ESSL,
                    known: source.language != spv::SourceLanguage::Unknown,
                    hlsl: source.language == spv::SourceLanguage::HLSL,
                };
            },
            Op::Capability => {
                let node::Capability { capability } = operands.parse()?;
                match spv::Capability::from_u32(capability.0) {
                    Some(cap) => self.ir.capabilities.push(cap),
                    None => warn!("unknown capability {}", capability.0),
                }
            },
            Op::Extension => {
                let node::Extension { name } = operands.parse()?;
                self.ir.extensions.push(name);
            },
            Op::ExtInstImport => {
                let node: node::ExtInstImport = operands.parse()?;
                let kind = if node.name == "GLSL.std.450" {
                    ExtensionKind::GlslStd450
                } else {
                    ExtensionKind::Unsupported
                };
                let name = node.name.clone();
                self.declare(&node, Extension { kind, name })?;
            },
            Op::EntryPoint => {
                let node: node::EntryPoint = operands.parse()?;
                self.ir.entry_points.push(EntryPoint::new(
                    node.name,
                    node.function,
                    node.execution_model,
                    node.interface,
                ));
            },
            Op::ExecutionMode | Op::ExecutionModeId => {
                self.execution_mode(operands.parse()?)?;
            },
            Op::Name => {
                let node: node::Name = operands.parse()?;
                self.ir.meta_mut(node.target)?.decoration.name = node.name;
            },
            Op::MemberName => {
                let node: node::MemberName = operands.parse()?;
                self.ir.meta_mut(node.ty)?.member_mut(node.member.0)?.name =
                    node.name;
            },
            Op::Decorate | Op::DecorateId => {
                let node: node::Decorate = operands.parse()?;
                if let Some(decoration) = decoration(node.decoration) {
                    let arg = node.args.first().map_or(0, |arg| arg.0);
                    self.ir.meta_mut(node.target)?.decoration
                        .set(decoration, arg);
                }
            },
            Op::MemberDecorate => {
                let node: node::MemberDecorate = operands.parse()?;
                if let Some(decoration) = decoration(node.decoration) {
                    let arg = node.args.first().map_or(0, |arg| arg.0);
                    self.ir.meta_mut(node.ty)?.member_mut(node.member.0)?
                        .set(decoration, arg);
                }
            },
            // A group is an ordinary decoration target
            Op::DecorationGroup => {
                let _: node::DecorationGroup = operands.parse()?;
            },
            Op::GroupDecorate => {
                let node: node::GroupDecorate = operands.parse()?;
                let group = self.ir.meta(node.group)?.decoration.clone();
                for target in node.targets {
                    self.ir.meta_mut(target)?.decoration.merge_from(&group);
                }
            },
            Op::GroupMemberDecorate => {
                let node: node::GroupMemberDecorate = operands.parse()?;
                let group = self.ir.meta(node.group)?.decoration.clone();
                for (target, member) in node.targets {
                    self.ir.meta_mut(target)?.member_mut(member.0)?
                        .merge_from(&group);
                }
            },
            Op::TypeVoid => {
                let node: node::TypeVoid = operands.parse()?;
                self.declare(&node, Type {
                    base_type: BaseType::Void,
                    base: node.result,
                    ..Default::default()
                })?;
            },
            Op::TypeBool => {
                let node: node::TypeBool = operands.parse()?;
                self.declare(&node, Type {
                    base_type: BaseType::Boolean,
                    width: 32,
                    base: node.result,
                    ..Default::default()
                })?;
            },
            Op::TypeInt => {
                let node: node::TypeInt = operands.parse()?;
                if node.width.0 == 64 {
                    self.int64 = true;
                }
                let base_type = if node.signedness.0 != 0 {
                    BaseType::Int
                } else {
                    BaseType::UInt
                };
                self.declare(&node, Type {
                    base_type,
                    width: node.width.0,
                    base: node.result,
                    ..Default::default()
                })?;
            },
            Op::TypeFloat => {
                let node: node::TypeFloat = operands.parse()?;
                self.declare(&node, Type {
                    base_type: BaseType::Float,
                    width: node.width.0,
                    base: node.result,
                    ..Default::default()
                })?;
            },
            Op::TypeVector => {
                let node: node::TypeVector = operands.parse()?;
                let mut ty = self.derive_type(node.component_type, node.result)?;
                ty.vecsize = node.component_count.0;
                self.declare(&node, ty)?;
            },
            Op::TypeMatrix => {
                let node: node::TypeMatrix = operands.parse()?;
                let mut ty = self.derive_type(node.column_type, node.result)?;
                ty.columns = node.column_count.0;
                self.declare(&node, ty)?;
            },
            Op::TypeArray => {
                let node: node::TypeArray = operands.parse()?;
                let length = self.ir.constant_scalar(node.length)?;
                let mut ty = self.ir.get::<Type>(node.elem)?.clone();
                ty.array.push(ArraySize::Constant { id: node.length, length });
                ty.parent = Some(node.elem);
                self.declare(&node, ty)?;
            },
            Op::TypeRuntimeArray => {
                let node: node::TypeRuntimeArray = operands.parse()?;
                let mut ty = self.ir.get::<Type>(node.elem)?.clone();
                ty.array.push(ArraySize::Runtime);
                ty.parent = Some(node.elem);
                self.declare(&node, ty)?;
            },
            Op::TypeStruct => {
                let node: node::TypeStruct = operands.parse()?;
                let member_types = node.members.clone();
                self.declare(&node, Type {
                    base_type: BaseType::Struct,
                    member_types,
                    base: node.result,
                    ..Default::default()
                })?;
            },
            Op::TypeImage => {
                let node: node::TypeImage = operands.parse()?;
                let image = ImageInfo {
                    sampled_type: node.sampled_type,
                    dim: node.dim,
                    depth: node.depth.0 == 1,
                    arrayed: node.arrayed.0 != 0,
                    multisampled: node.multisampled.0 != 0,
                    sampled: node.sampled.0,
                    format: node.format,
                    access: node.access_qualifier,
                };
                self.declare(&node, Type {
                    base_type: BaseType::Image,
                    image,
                    base: node.result,
                    ..Default::default()
                })?;
            },
            Op::TypeSampledImage => {
                let node: node::TypeSampledImage = operands.parse()?;
                let mut ty = self.derive_type(node.image_type, node.result)?;
                ty.base_type = BaseType::SampledImage;
                self.declare(&node, ty)?;
            },
            Op::TypeSampler => {
                let node: node::TypeSampler = operands.parse()?;
                self.declare(&node, Type {
                    base_type: BaseType::Sampler,
                    base: node.result,
                    ..Default::default()
                })?;
            },
            Op::TypePointer => {
                let node: node::TypePointer = operands.parse()?;
                let mut ty = self.ir.get::<Type>(node.target)?.clone();
                ty.pointer = true;
                ty.storage = node.storage_class;
                ty.parent = Some(node.target);
                if node.storage_class == spv::StorageClass::AtomicCounter {
                    ty.base_type = BaseType::AtomicCounter;
                }
                self.declare(&node, ty)?;
            },
            Op::TypeFunction => {
                let node: node::TypeFunction = operands.parse()?;
                let proto = FunctionPrototype {
                    return_type: node.ret,
                    parameter_types: node.params.clone(),
                };
                self.declare(&node, proto)?;
            },
            Op::Constant | Op::SpecConstant => {
                let node: node::Constant = operands.parse()?;
                let lo = node.value.get(0).map_or(0, |w| w.0 as u64);
                let hi = node.value.get(1).map_or(0, |w| w.0 as u64);
                self.declare(&node, Constant {
                    ty: node.ty,
                    value: ConstantValue::Scalar((hi << 32) | lo),
                    specialization: op == Op::SpecConstant,
                })?;
            },
            Op::ConstantTrue | Op::ConstantFalse | Op::SpecConstantTrue |
                Op::SpecConstantFalse =>
            {
                let node: node::NullaryConstant = operands.parse()?;
                let value = match op {
                    Op::ConstantTrue | Op::SpecConstantTrue => 1,
                    _ => 0,
                };
                self.declare(&node, Constant {
                    ty: node.ty,
                    value: ConstantValue::Scalar(value),
                    specialization: op == Op::SpecConstantTrue ||
                        op == Op::SpecConstantFalse,
                })?;
            },
            Op::ConstantComposite | Op::SpecConstantComposite => {
                let node: node::ConstantComposite = operands.parse()?;
                let value = ConstantValue::Composite(node.constituents.clone());
                self.declare(&node, Constant {
                    ty: node.ty,
                    value,
                    specialization: op == Op::SpecConstantComposite,
                })?;
            },
            Op::SpecConstantOp => {
                let node: node::SpecConstantOp = operands.parse()?;
                let words = node.operands.iter().map(|word| word.0).collect();
                self.declare(&node, Constant {
                    ty: node.ty,
                    value: ConstantValue::Operation {
                        opcode: node.opcode.0,
                        operands: words,
                    },
                    specialization: true,
                })?;
            },
            Op::ConstantNull => {
                let node: node::NullaryConstant = operands.parse()?;
                self.declare(&node, Constant {
                    ty: node.ty,
                    value: ConstantValue::Null,
                    specialization: false,
                })?;
            },
            Op::Undef => {
                let node: node::Undef = operands.parse()?;
                self.declare(&node, Undefined { ty: node.ty })?;
            },
            Op::Variable => self.variable(operands.parse()?)?,
            Op::Function => {
                let node: node::Function = operands.parse()?;
                if let Some(outer) = self.function {
                    bail!(UnsupportedConstruct,
                        "function {} begins inside function {}",
                        node.result, outer);
                }
                self.declare(&node, Function {
                    return_type: node.ty,
                    prototype: node.function_type,
                    ..Default::default()
                })?;
                self.function = Some(node.result);
            },
            Op::FunctionParameter => {
                let node: node::FunctionParameter = operands.parse()?;
                let function = self.current_function(op)?;
                self.ir.get_mut::<Function>(function)?.parameters
                    .push(Parameter { id: node.result, ty: node.ty });
                self.declare(&node, Variable {
                    ty: node.ty,
                    function: Some(function),
                    parameter: true,
                    ..Default::default()
                })?;
            },
            Op::FunctionEnd => {
                let function = self.current_function(op)?;
                if let Some(block) = self.block {
                    bail!(UnsupportedConstruct,
                        "block {} of function {} is never terminated",
                        block, function);
                }
                self.function = None;
            },
            Op::Label => {
                let node: node::Label = operands.parse()?;
                let function = self.current_function(op)?;
                if let Some(block) = self.block {
                    bail!(UnsupportedConstruct,
                        "block {} is never terminated", block);
                }
                self.declare(&node, Block {
                    id: node.result,
                    function,
                    ..Default::default()
                })?;
                let func = self.ir.get_mut::<Function>(function)?;
                func.blocks.push(node.result);
                func.entry_block.get_or_insert(node.result);
                self.block = Some(node.result);
            },
            Op::Branch => {
                let node: node::Branch = operands.parse()?;
                self.terminate(op, Terminator::Direct(node.target))?;
            },
            Op::BranchConditional => {
                let node: node::BranchConditional = operands.parse()?;
                self.terminate(op, Terminator::Select {
                    condition: node.condition,
                    true_block: node.true_label,
                    false_block: node.false_label,
                })?;
            },
            Op::Switch => {
                let selector: Id = operands.clone().parse()?;
                self.check_selector_width(selector)?;
                let node: node::Switch = operands.parse()?;
                let block = self.current_block_mut(op)?;
                if block.merge == Merge::None {
                    bail!(UnsupportedConstruct,
                        "switch in block {} has no merge block", block.id);
                }
                self.terminate(op, Terminator::MultiSelect {
                    selector: node.selector,
                    default: node.default,
                    cases: node.targets.iter()
                        .map(|&(Literal(value), target)| (value, target))
                        .collect(),
                })?;
            },
            Op::Return => self.terminate(op, Terminator::Return(None))?,
            Op::ReturnValue => {
                let node: node::ReturnValue = operands.parse()?;
                self.terminate(op, Terminator::Return(Some(node.value)))?;
            },
            Op::Kill => self.terminate(op, Terminator::Kill)?,
            Op::Unreachable => self.terminate(op, Terminator::Unreachable)?,
            Op::SelectionMerge => {
                let node: node::SelectionMerge = operands.parse()?;
                self.current_block_mut(op)?.merge =
                    Merge::Selection(node.merge_block);
            },
            Op::LoopMerge => {
                let node: node::LoopMerge = operands.parse()?;
                self.current_block_mut(op)?.merge = Merge::Loop {
                    merge_block: node.merge_block,
                    continue_block: node.continue_target,
                };
            },
            Op::Phi => {
                let node: node::Phi = operands.parse()?;
                let function = self.current_function(op)?;
                let block = self.current_block_mut(op)?;
                block.phi_variables.extend(node.incoming.iter()
                    .map(|&(value, parent)| Phi {
                        value,
                        parent,
                        variable: node.result,
                    }));
                self.ir.get_mut::<Function>(function)?.local_variables
                    .push(node.result);
                self.declare(&node, Variable {
                    ty: node.ty,
                    function: Some(function),
                    phi: true,
                    ..Default::default()
                })?;
            },
            // Module-scope instructions with no meaning here, such as
            // non-semantic debug info
            _ if self.function.is_none() =>
                warn!("skipping module-scope {:?}", op),
            _ => {
                let block = self.current_block_mut(op)?;
                block.ops.push(inst);
                match op {
                    Op::AccessChain | Op::InBoundsAccessChain |
                        Op::PtrAccessChain | Op::CopyObject =>
                    {
                        let ty = operands.parse_id()?;
                        let result = operands.parse_id()?;
                        self.ir.chain_types.insert(result, ty);
                    },
                    _ if self.int64 && produces_integer(op) => {
                        let ty = operands.parse_id()?;
                        let result = operands.parse_id()?;
                        self.value_types.insert(result, ty);
                    },
                    _ => {},
                }
            },
        }

        Ok(())
    }

    /// Case literals are read one word each, which a 64-bit selector
    /// would pair with the wrong targets.
    fn check_selector_width(&self, selector: Id) -> Result<()> {
        if !self.int64 { return Ok(()); }
        let ty = self.ir.maybe_get::<Constant>(selector).map(|c| c.ty)
            .or_else(|| self.ir.maybe_get::<Variable>(selector).map(|v| v.ty))
            .or_else(|| self.value_types.get(&selector).copied());
        match ty.and_then(|ty| self.ir.maybe_get::<Type>(ty)) {
            Some(ty) if ty.width == 32 => Ok(()),
            Some(ty) => bail!(UnsupportedConstruct,
                "switch on {}-bit selector {}", ty.width, selector),
            None => bail!(UnsupportedConstruct,
                "cannot tell the width of switch selector {}", selector),
        }
    }

    fn execution_mode(&mut self, node: node::ExecutionMode) -> Result<()> {
        let mode = match spv::ExecutionMode::from_u32(node.mode.0) {
            Some(mode) => mode,
            None => {
                warn!("unknown execution mode {}", node.mode.0);
                return Ok(());
            },
        };
        let args: Vec<u32> = node.args.iter().map(|arg| arg.0).collect();

        let mut found = false;
        for entry in self.ir.entry_points.iter_mut()
            .filter(|entry| entry.function == node.entry_point)
        {
            entry.set_mode(mode, &args);
            found = true;
        }
        if !found {
            bail!(WrongEntityKind,
                "execution mode {:?} targets {}, which is not an entry point",
                mode, node.entry_point);
        }
        Ok(())
    }

    fn variable(&mut self, node: node::Variable) -> Result<()> {
        let mut var = Variable {
            ty: node.ty,
            storage: node.storage_class,
            initializer: node.initializer,
            ..Default::default()
        };

        if node.storage_class == spv::StorageClass::Function {
            let function = self.current_function(spv::Op::Variable)?;
            var.function = Some(function);
            self.ir.get_mut::<Function>(function)?.local_variables
                .push(node.result);
        } else {
            if let Some(function) = self.function {
                bail!(UnsupportedConstruct,
                    "variable {} of class {:?} declared inside function {}",
                    node.result, node.storage_class, function);
            }
            self.ir.global_variables.push(node.result);
        }

        var.aliased = self.ir.variable_storage_is_aliased(node.result, &var)?;
        if var.aliased {
            self.ir.aliased_variables.push(node.result);
        }
        self.declare(&node, var)?;
        Ok(())
    }

    fn finish(self) -> Result<()> {
        if let Some(function) = self.function {
            bail!(UnsupportedConstruct,
                "module ends inside function {}", function);
        }

        for entry in self.ir.entry_points.iter() {
            self.ir.get::<Function>(entry.function)?;
            for &id in entry.interface.iter() {
                match self.ir.maybe_get::<Variable>(id) {
                    Some(var) if var.is_global() => {},
                    _ => bail!(WrongEntityKind,
                        "interface ID {} of entry point {} is not a global \
                        variable", id, entry.name),
                }
            }
        }

        debug!(
            "parsed {} entry points, {} global variables",
            self.ir.entry_points.len(), self.ir.global_variables.len(),
        );
        Ok(())
    }
}

/// Instructions whose leading operands are a result type and an ID and
/// that commonly yield integer scalars.
fn produces_integer(op: spv::Op) -> bool {
    use spv::Op;
    match op {
        Op::Load | Op::IAdd | Op::ISub | Op::IMul | Op::UDiv | Op::SDiv |
            Op::UMod | Op::SRem | Op::SMod | Op::SNegate | Op::Not |
            Op::BitwiseAnd | Op::BitwiseOr | Op::BitwiseXor |
            Op::ShiftLeftLogical | Op::ShiftRightLogical |
            Op::ShiftRightArithmetic | Op::SConvert | Op::UConvert |
            Op::ConvertFToU | Op::ConvertFToS | Op::Bitcast |
            Op::CompositeExtract | Op::Select | Op::BitFieldInsert |
            Op::BitFieldSExtract | Op::BitFieldUExtract | Op::BitReverse |
            Op::BitCount => true,
        _ => false,
    }
}

fn decoration(raw: Literal) -> Option<spv::Decoration> {
    let decoration = spv::Decoration::from_u32(raw.0);
    if decoration.is_none() {
        warn!("skipping unknown decoration {}", raw.0);
    }
    decoration
}

#[cfg(test)]
mod tests {
    use spirv_headers::{Op, StorageClass};

    use crate::testing::*;
    use super::*;

    fn parse(words: Vec<u32>) -> Result<Ir> {
        init_logging();
        parse_module(words, &Options::default())
    }

    #[test]
    fn header() {
        let ir = parse(Assembler::new(1).words()).unwrap();
        assert_eq!(ir.version(), (1, 0));
        assert_eq!(ir.bound(), 1);

        let mut asm = Assembler::new(1);
        asm.version(1, 3);
        let ir = parse(asm.words()).unwrap();
        assert_eq!(ir.version(), (1, 3));
    }

    #[test]
    fn bad_headers() {
        let err = parse(vec![MAGIC, 0x0001_0000, 0, 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);

        let err = parse(vec![0xdeadbeef, 0x0001_0000, 0, 1, 0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);

        let err = parse(vec![MAGIC, 0x0002_0000, 0, 1, 0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);
    }

    #[test]
    fn byte_swapped_module() {
        let words = uniform_block_shader().words();
        let swapped = words.iter().map(|w| w.swap_bytes()).collect();
        let ir = parse(swapped).unwrap();
        assert_eq!(ir.bound(), 21);
        assert_eq!(ir.meta(7).unwrap().decoration.name, "Globals");
    }

    #[test]
    fn truncated_instruction() {
        let mut words = Assembler::new(4).words();
        // TypeInt claims four words but only two follow
        words.extend(&[(4 << 16) | Op::TypeInt as u32, 1, 32]);
        let err = parse(words).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn zero_word_count() {
        let mut words = Assembler::new(4).words();
        words.push(Op::Nop as u32);
        let err = parse(words).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn id_beyond_bound() {
        let mut asm = Assembler::new(3);
        asm.op(Op::TypeFloat, &[5, 32]);
        let err = parse(asm.words()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn unknown_opcodes() {
        let mut asm = Assembler::new(2);
        asm.raw(4000, &[1]);
        asm.op(Op::TypeVoid, &[1]);
        let err = parse(asm.words()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);

        let options = Options { strict_opcodes: false, ..Default::default() };
        let ir = parse_module(asm.words(), &options).unwrap();
        assert_eq!(ir.get::<Type>(1).unwrap().base_type, BaseType::Void);
    }

    #[test]
    fn types() {
        let ir = parse(uniform_block_shader().words()).unwrap();

        let vec4 = ir.get::<Type>(6).unwrap();
        assert_eq!(vec4.base_type, BaseType::Float);
        assert_eq!((vec4.width, vec4.vecsize, vec4.columns), (32, 4, 1));
        assert_eq!(vec4.parent, Some(5));
        assert_eq!(vec4.base, 6);

        let block = ir.get::<Type>(7).unwrap();
        assert_eq!(block.base_type, BaseType::Struct);
        assert_eq!(block.member_types, vec![6, 6]);

        let ptr = ir.get::<Type>(8).unwrap();
        assert!(ptr.pointer);
        assert_eq!(ptr.storage, StorageClass::Uniform);
        assert_eq!(ptr.base, 7);
        assert_eq!(ptr.parent, Some(7));

        let err = ir.get::<Variable>(7).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongEntityKind);
        assert!(ir.maybe_get::<Variable>(7).is_none());
    }

    #[test]
    fn arrays_and_constants() {
        let mut asm = Assembler::new(8);
        asm.op(Op::TypeInt, &[1, 32, 0])
            .op(Op::Constant, &[1, 2, 4])
            .op(Op::SpecConstantTrue, &[1, 3])
            .op(Op::TypeFloat, &[4, 32])
            .op(Op::TypeArray, &[5, 4, 2])
            .op(Op::TypeArray, &[6, 5, 2])
            .op(Op::TypeRuntimeArray, &[7, 6]);
        let ir = parse(asm.words()).unwrap();

        let c = ir.get::<Constant>(2).unwrap();
        assert_eq!(c.scalar(), Some(4));
        assert!(!c.specialization);
        assert!(ir.get::<Constant>(3).unwrap().specialization);

        let ty = ir.get::<Type>(7).unwrap();
        assert_eq!(ty.base, 4);
        assert_eq!(ty.parent, Some(6));
        assert_eq!(ty.array, vec![
            ArraySize::Constant { id: 2, length: 4 },
            ArraySize::Constant { id: 2, length: 4 },
            ArraySize::Runtime,
        ]);
    }

    #[test]
    fn functions_and_blocks() {
        let ir = parse(loop_shader().words()).unwrap();
        let func = ir.get::<Function>(4).unwrap();
        assert_eq!(func.entry_block, Some(10));
        assert_eq!(func.blocks, vec![10, 11, 12, 14, 13, 15, 16, 17]);

        let header = ir.get::<Block>(11).unwrap();
        assert_eq!(header.merge, Merge::Loop {
            merge_block: 13,
            continue_block: 14,
        });
        assert_eq!(header.terminator, Terminator::Select {
            condition: 9,
            true_block: 12,
            false_block: 13,
        });

        let switch = ir.get::<Block>(13).unwrap();
        assert_eq!(switch.terminator, Terminator::MultiSelect {
            selector: 8,
            default: 16,
            cases: vec![(1, 15)],
        });
        assert_eq!(ir.get::<Block>(17).unwrap().terminator,
            Terminator::Return(None));
    }

    #[test]
    fn strings() {
        let mut asm = Assembler::new(3);
        asm.name(1, "abc").name(2, "abcd");
        let ir = parse(asm.words()).unwrap();
        assert_eq!(ir.meta(1).unwrap().decoration.name, "abc");
        assert_eq!(ir.meta(2).unwrap().decoration.name, "abcd");

        let mut words = Assembler::new(3).words();
        // The string runs off the end of the instruction
        words.extend(&[(3 << 16) | Op::Name as u32, 1, 0x6464_6464]);
        let err = parse(words).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn entry_point_interface_must_be_variables() {
        let mut asm = Assembler::new(5);
        asm.op_str(Op::EntryPoint, &[4, 2], "main", &[1])
            .op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[3, 1])
            .op(Op::Function, &[1, 2, 0, 3])
            .op(Op::Label, &[4])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[]);
        let err = parse(asm.words()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongEntityKind);
    }

    #[test]
    fn unterminated_block() {
        let mut asm = Assembler::new(5);
        asm.op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[3, 1])
            .op(Op::Function, &[1, 2, 0, 3])
            .op(Op::Label, &[4])
            .op(Op::FunctionEnd, &[]);
        let err = parse(asm.words()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
    }

    #[test]
    fn switch_requires_merge() {
        let mut asm = Assembler::new(8);
        asm.op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[3, 1])
            .op(Op::TypeInt, &[5, 32, 1])
            .op(Op::Constant, &[5, 6, 0])
            .op(Op::Function, &[1, 2, 0, 3])
            .op(Op::Label, &[4])
            .op(Op::Switch, &[6, 7])
            .op(Op::Label, &[7])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[]);
        let err = parse(asm.words()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
    }

    #[test]
    fn string_decorations() {
        const USER_SEMANTIC: u32 = 5635;
        let mut asm = Assembler::new(4);
        asm.op_str(Op::DecorateString, &[1, USER_SEMANTIC], "POS", &[])
            .op_str(Op::MemberDecorateString, &[2, 0, USER_SEMANTIC], "COLOR",
                &[])
            .decorate(1, spv::Decoration::RelaxedPrecision, &[])
            .op(Op::TypeFloat, &[1, 32])
            .op(Op::TypeStruct, &[2, 1]);
        let ir = parse(asm.words()).unwrap();
        let meta = ir.meta(1).unwrap();
        assert!(meta.decoration.has(spv::Decoration::RelaxedPrecision));
        assert!(ir.meta(2).unwrap().member(0).is_none());
    }

    #[test]
    fn spec_constant_operations() {
        let mut asm = Assembler::new(12);
        asm.op(Op::TypeInt, &[1, 32, 0])
            .op(Op::SpecConstant, &[1, 2, 4])
            .op(Op::SpecConstantOp, &[1, 3, Op::IAdd as u32, 2, 2])
            .op(Op::TypeFloat, &[4, 32])
            .op(Op::TypeArray, &[5, 4, 3])
            .op(Op::TypeForwardPointer, &[6, StorageClass::Uniform as u32])
            .op_str(Op::TypeOpaque, &[7], "opaque", &[])
            .op_str(Op::ExtInstImport, &[8], "NonSemantic.DebugInfo", &[])
            .op(Op::TypeVoid, &[9])
            .op(Op::ExtInst, &[9, 10, 8, 1]);
        let ir = parse(asm.words()).unwrap();

        let c = ir.get::<Constant>(3).unwrap();
        assert!(c.specialization);
        assert_eq!(c.value, ConstantValue::Operation {
            opcode: Op::IAdd as u32,
            operands: vec![2, 2],
        });
        assert_eq!(c.scalar(), None);
        assert_eq!(ir.constant_scalar(3).unwrap(), 8);
        assert_eq!(ir.get::<Type>(5).unwrap().array,
            vec![ArraySize::Constant { id: 3, length: 8 }]);
        assert_eq!(ir.get::<Extension>(8).unwrap().kind,
            ExtensionKind::Unsupported);
    }

    #[test]
    fn unfoldable_array_length() {
        let mut asm = Assembler::new(8);
        asm.op(Op::TypeInt, &[1, 32, 0])
            .op(Op::SpecConstant, &[1, 2, 4])
            .op(Op::Constant, &[1, 3, 0])
            .op(Op::SpecConstantOp, &[1, 4, Op::UDiv as u32, 2, 3])
            .op(Op::TypeArray, &[5, 1, 4]);
        let err = parse(asm.words()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
    }

    /// Switches on `selector` in a module declaring 64-bit integers.
    /// Load 11 is 64 bits wide, load 12 is 32.
    fn wide_switch(switch: &[u32]) -> Assembler {
        let mut asm = Assembler::new(20);
        asm.op(Op::TypeVoid, &[1])
            .op(Op::TypeFunction, &[3, 1])
            .op(Op::TypeInt, &[5, 64, 1])
            .op(Op::TypeInt, &[6, 32, 1])
            .op(Op::TypePointer, &[7, StorageClass::Function as u32, 5])
            .op(Op::TypePointer, &[8, StorageClass::Function as u32, 6])
            .op(Op::Function, &[1, 2, 0, 3])
            .op(Op::Label, &[4])
            .op(Op::Variable, &[7, 9, StorageClass::Function as u32])
            .op(Op::Variable, &[8, 10, StorageClass::Function as u32])
            .op(Op::Load, &[5, 11, 9])
            .op(Op::Load, &[6, 12, 10])
            .op(Op::SelectionMerge, &[13, 0])
            .op(Op::Switch, switch)
            .op(Op::Label, &[13])
            .op(Op::Return, &[])
            .op(Op::FunctionEnd, &[]);
        asm
    }

    #[test]
    fn switch_selector_widths() {
        let ir = parse(wide_switch(&[12, 13, 1, 13]).words()).unwrap();
        assert_eq!(ir.get::<Block>(4).unwrap().terminator,
            Terminator::MultiSelect { selector: 12, default: 13,
                cases: vec![(1, 13)] });

        let err = parse(wide_switch(&[11, 13, 1, 0, 13]).words()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
    }

    #[test]
    fn aliased_variables() {
        let mut asm = Assembler::new(8);
        asm.decorate(2, spv::Decoration::BufferBlock, &[])
            .decorate(5, spv::Decoration::Restrict, &[])
            .op(Op::TypeFloat, &[1, 32])
            .op(Op::TypeStruct, &[2, 1])
            .op(Op::TypePointer, &[3, StorageClass::Uniform as u32, 2])
            .op(Op::Variable, &[3, 4, StorageClass::Uniform as u32])
            .op(Op::Variable, &[3, 5, StorageClass::Uniform as u32])
            .op(Op::TypePointer, &[6, StorageClass::Private as u32, 1])
            .op(Op::Variable, &[6, 7, StorageClass::Private as u32]);
        let ir = parse(asm.words()).unwrap();
        assert_eq!(ir.global_variables(), &[4, 5, 7]);
        assert_eq!(ir.aliased_variables(), &[4]);
        assert!(ir.get::<Variable>(4).unwrap().aliased);
        assert!(!ir.get::<Variable>(5).unwrap().aliased);
    }

    #[test]
    fn module_info() {
        let mut asm = Assembler::new(2);
        asm.op(Op::Capability, &[spv::Capability::Shader as u32])
            .op(Op::Capability, &[60000])
            .op_str(Op::Extension, &[], "SPV_KHR_storage_buffer_storage_class",
                &[])
            .op_str(Op::ExtInstImport, &[1], "GLSL.std.450", &[])
            .op(Op::Source, &[spv::SourceLanguage::ESSL as u32, 310]);
        let ir = parse(asm.words()).unwrap();
        assert_eq!(ir.capabilities(), &[spv::Capability::Shader]);
        assert_eq!(ir.extensions(), &["SPV_KHR_storage_buffer_storage_class"]);
        assert_eq!(ir.get::<Extension>(1).unwrap().kind,
            ExtensionKind::GlslStd450);
        assert_eq!(*ir.source(), Source {
            version: 310,
            es: true,
            known: true,
            hlsl: false,
        });
    }
}
