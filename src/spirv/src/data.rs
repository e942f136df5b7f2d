use derivative::Derivative;
use fnv::FnvHashMap;
use smallvec::SmallVec;
use spirv_headers as spv;

use crate::*;

pub type Id = u32;

#[derive(Clone, Copy, Debug, Derivative, Eq, Hash, PartialEq)]
#[derivative(Default)]
pub enum BaseType {
    #[derivative(Default)]
    Unknown,
    Void,
    Boolean,
    Int,
    UInt,
    Float,
    AtomicCounter,
    Struct,
    Image,
    SampledImage,
    Sampler,
}

/// One array dimension. Dimensions are stored innermost first, so the
/// last entry is the outermost length.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ArraySize {
    /// Length given by an `OpConstant`, resolved at parse time.
    Constant { id: Id, length: u32 },
    /// Length synthesized by a structural edit; no constant backs it.
    Literal(u32),
    Runtime,
}

impl ArraySize {
    /// The element count, or `None` for runtime arrays.
    pub fn length(self) -> Option<u32> {
        match self {
            Self::Constant { length, .. } => Some(length),
            Self::Literal(length) => Some(length),
            Self::Runtime => None,
        }
    }
}

#[derive(Clone, Debug, Derivative, Eq, PartialEq)]
#[derivative(Default)]
pub struct ImageInfo {
    pub sampled_type: Id,
    #[derivative(Default(value = "spv::Dim::Dim2D"))]
    pub dim: spv::Dim,
    pub depth: bool,
    pub arrayed: bool,
    pub multisampled: bool,
    /// 0 = known at runtime, 1 = sampled, 2 = storage.
    pub sampled: u32,
    #[derivative(Default(value = "spv::ImageFormat::Unknown"))]
    pub format: spv::ImageFormat,
    pub access: Option<spv::AccessQualifier>,
}

#[derive(Clone, Debug, Derivative, Eq, PartialEq)]
#[derivative(Default)]
pub struct Type {
    pub base_type: BaseType,
    /// Bit width of scalar components.
    pub width: u32,
    #[derivative(Default(value = "1"))]
    pub vecsize: u32,
    #[derivative(Default(value = "1"))]
    pub columns: u32,
    pub array: Vec<ArraySize>,
    pub pointer: bool,
    #[derivative(Default(value = "spv::StorageClass::Generic"))]
    pub storage: spv::StorageClass,
    pub member_types: Vec<Id>,
    pub image: ImageInfo,
    /// The declaring type. Pointer and array types inherit this from
    /// their element, so decorations are always looked up here.
    pub base: Id,
    /// The type this one was derived from, if any.
    pub parent: Option<Id>,
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        match self.base_type {
            BaseType::Boolean | BaseType::Int | BaseType::UInt |
                BaseType::Float => true,
            _ => false,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.is_numeric() && self.vecsize == 1 && self.columns == 1
    }

    pub fn is_vector(&self) -> bool {
        self.is_numeric() && self.vecsize > 1 && self.columns == 1
    }

    pub fn is_matrix(&self) -> bool {
        self.is_numeric() && self.columns > 1
    }

    pub fn is_array(&self) -> bool {
        !self.array.is_empty()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FunctionPrototype {
    pub return_type: Id,
    pub parameter_types: Vec<Id>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConstantValue {
    /// Up to 64 bits of literal data, low word first.
    Scalar(u64),
    Composite(Vec<Id>),
    Null,
    /// `OpSpecConstantOp`: an opcode applied to other constants. Operand
    /// words are kept raw since some operations take literals.
    Operation {
        opcode: u32,
        operands: Vec<u32>,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Constant {
    pub ty: Id,
    pub value: ConstantValue,
    pub specialization: bool,
}

impl Constant {
    /// The low 32 bits of a scalar constant.
    pub fn scalar(&self) -> Option<u32> {
        match self.value {
            ConstantValue::Scalar(val) => Some(val as u32),
            ConstantValue::Null => Some(0),
            ConstantValue::Composite(_) | ConstantValue::Operation { .. } =>
                None,
        }
    }
}

#[derive(Clone, Debug, Derivative, Eq, PartialEq)]
#[derivative(Default)]
pub struct Variable {
    /// Pointer type of the variable.
    pub ty: Id,
    #[derivative(Default(value = "spv::StorageClass::Function"))]
    pub storage: spv::StorageClass,
    pub initializer: Option<Id>,
    /// Owning function of a function-scope variable.
    pub function: Option<Id>,
    pub parameter: bool,
    pub phi: bool,
    /// Storage may overlap another variable's.
    pub aliased: bool,
    /// Excluded from emission, e.g. because it maps onto a builtin.
    pub remapped: bool,
    pub remapped_components: u32,
}

impl Variable {
    pub fn is_global(&self) -> bool {
        self.storage != spv::StorageClass::Function
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Parameter {
    pub id: Id,
    pub ty: Id,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Function {
    pub return_type: Id,
    pub prototype: Id,
    pub parameters: Vec<Parameter>,
    pub local_variables: Vec<Id>,
    pub blocks: Vec<Id>,
    pub entry_block: Option<Id>,
}

#[derive(Clone, Debug, Derivative, Eq, PartialEq)]
#[derivative(Default)]
pub enum Terminator {
    /// The block has not been closed yet.
    #[derivative(Default)]
    Unknown,
    Direct(Id),
    Select {
        condition: Id,
        true_block: Id,
        false_block: Id,
    },
    MultiSelect {
        selector: Id,
        default: Id,
        cases: Vec<(u32, Id)>,
    },
    Return(Option<Id>),
    Unreachable,
    Kill,
}

#[derive(Clone, Copy, Debug, Derivative, Eq, PartialEq)]
#[derivative(Default)]
pub enum Merge {
    #[derivative(Default)]
    None,
    Selection(Id),
    Loop {
        merge_block: Id,
        continue_block: Id,
    },
}

impl Merge {
    pub fn merge_block(self) -> Option<Id> {
        match self {
            Merge::None => None,
            Merge::Selection(block) => Some(block),
            Merge::Loop { merge_block, .. } => Some(merge_block),
        }
    }
}

/// An incoming edge of an `OpPhi` in the block that declares it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Phi {
    pub value: Id,
    pub parent: Id,
    pub variable: Id,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Block {
    pub id: Id,
    pub function: Id,
    /// Every instruction except the label, phis, merge and terminator.
    pub ops: Vec<Instruction>,
    pub terminator: Terminator,
    pub merge: Merge,
    pub phi_variables: Vec<Phi>,
    pub disable_block_optimization: bool,
    pub complex_continue: bool,
}

impl Block {
    pub fn next_block(&self) -> Option<Id> {
        match self.terminator {
            Terminator::Direct(next) => Some(next),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Undefined {
    pub ty: Id,
}

/// A temporary materialized by an emitter.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Expression {
    pub ty: Id,
    pub loaded_from: Option<Id>,
    pub dependencies: Vec<Id>,
    pub immutable: bool,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ExtensionKind {
    GlslStd450,
    Unsupported,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Extension {
    pub kind: ExtensionKind,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct EntryPoint {
    pub name: String,
    pub function: Id,
    pub execution_model: spv::ExecutionModel,
    pub interface: Vec<Id>,
    pub modes: Bitset,
    pub(crate) mode_args: FnvHashMap<spv::ExecutionMode, SmallVec<[u32; 3]>>,
}

impl EntryPoint {
    pub(crate) fn new(
        name: String,
        function: Id,
        execution_model: spv::ExecutionModel,
        interface: Vec<Id>,
    ) -> Self {
        Self {
            name,
            function,
            execution_model,
            interface,
            modes: Bitset::new(),
            mode_args: Default::default(),
        }
    }

    pub fn has_mode(&self, mode: spv::ExecutionMode) -> bool {
        self.modes.get(mode as u32)
    }

    pub fn set_mode(&mut self, mode: spv::ExecutionMode, args: &[u32]) {
        self.modes.set(mode as u32);
        self.mode_args.insert(mode, args.iter().copied().collect());
    }

    pub fn unset_mode(&mut self, mode: spv::ExecutionMode) {
        self.modes.clear(mode as u32);
        self.mode_args.remove(&mode);
    }

    /// For `LocalSize`, `index` selects the dimension. Modes without
    /// arguments yield 0.
    pub fn mode_argument(&self, mode: spv::ExecutionMode, index: usize) -> u32 {
        self.mode_args.get(&mode)
            .and_then(|args| args.get(index).copied())
            .unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Source {
    pub version: u32,
    pub es: bool,
    pub known: bool,
    pub hlsl: bool,
}
