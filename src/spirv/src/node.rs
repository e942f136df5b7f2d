use spirv_headers as spv;

use crate::*;
use crate::parser::InstructionParser;

pub(crate) trait Parse: Sized {
    fn parse<'data>(parser: &mut InstructionParser<'data>) -> Result<Self>;
}

/// A raw literal word. IDs are bounds-checked when parsed; literals
/// are not.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub(crate) struct Literal(pub(crate) u32);

/// An instruction that declares a result ID.
pub(crate) trait Node: Parse {
    fn id(&self) -> Id;
}

impl Parse for Id {
    fn parse<'data>(parser: &mut InstructionParser<'data>) -> Result<Self> {
        parser.parse_id()
    }
}

impl Parse for Literal {
    fn parse<'data>(parser: &mut InstructionParser<'data>) -> Result<Self> {
        Ok(Literal(parser.consume()?))
    }
}

impl Parse for String {
    fn parse<'data>(parser: &mut InstructionParser<'data>) -> Result<Self> {
        parser.parse_string()
    }
}

impl<T: Parse> Parse for Vec<T> {
    fn parse<'data>(parser: &mut InstructionParser<'data>) -> Result<Self> {
        parser.parse_many()
    }
}

impl<T: Parse> Parse for Option<T> {
    fn parse<'data>(parser: &mut InstructionParser<'data>) -> Result<Self> {
        parser.parse_option()
    }
}

impl<A: Parse, B: Parse> Parse for (A, B) {
    fn parse<'data>(parser: &mut InstructionParser<'data>) -> Result<Self> {
        Ok((parser.parse()?, parser.parse()?))
    }
}

macro_rules! impl_parse_enums {
    ($($name:ident,)*) => {
        $(
            impl Parse for spv::$name {
                fn parse<'data>(parser: &mut InstructionParser<'data>) ->
                    Result<Self>
                {
                    parser.parse_enum(stringify!($name))
                }
            }
        )*
    }
}

// Decorations, capabilities and execution modes are read as literals
// since unknown vendor values are skipped rather than rejected.
impl_parse_enums! {
    AccessQualifier,
    Dim,
    ExecutionModel,
    ImageFormat,
    SourceLanguage,
    StorageClass,
}

macro_rules! impl_parseable {
    (
        $name:ident {
            $($member:ident: $type:ty),*$(,)?
        }
    ) => {
        #[derive(Debug, Eq, PartialEq)]
        pub(crate) struct $name {
            $(pub(crate) $member: $type,)*
        }

        impl Parse for $name {
            fn parse<'data>(parser: &mut InstructionParser<'data>) ->
                Result<Self>
            {
                Ok($name {
                    $($member: parser.parse()?,)*
                })
            }
        }
    };
}

macro_rules! impl_parseables {
    (
        $(
            $name:ident {
                $($member:ident: $type:ty),*$(,)?
            }
        )*
    ) => {
        $(impl_parseable! { $name { $($member: $type),* } })*
    }
}

macro_rules! impl_nodes {
    (
        $(
            $name:ident {
                $($member:ident: $type:ty),*$(,)?
            }
        )*
    ) => {
        $(
            impl_parseable! { $name { $($member: $type),* } }

            impl Node for $name {
                fn id(&self) -> Id {
                    self.result
                }
            }
        )*
    }
}

impl_parseables! {
    Source {
        language: spv::SourceLanguage,
        version: Literal,
    }
    Name {
        target: Id,
        name: String,
    }
    MemberName {
        ty: Id,
        member: Literal,
        name: String,
    }
    Extension {
        name: String,
    }
    Capability {
        capability: Literal,
    }
    EntryPoint {
        execution_model: spv::ExecutionModel,
        function: Id,
        name: String,
        interface: Vec<Id>,
    }
    ExecutionMode {
        entry_point: Id,
        mode: Literal,
        args: Vec<Literal>,
    }
    Decorate {
        target: Id,
        decoration: Literal,
        args: Vec<Literal>,
    }
    MemberDecorate {
        ty: Id,
        member: Literal,
        decoration: Literal,
        args: Vec<Literal>,
    }
    GroupDecorate {
        group: Id,
        targets: Vec<Id>,
    }
    GroupMemberDecorate {
        group: Id,
        targets: Vec<(Id, Literal)>,
    }
    Branch {
        target: Id,
    }
    BranchConditional {
        condition: Id,
        true_label: Id,
        false_label: Id,
        weights: Vec<Literal>,
    }
    Switch {
        selector: Id,
        default: Id,
        targets: Vec<(Literal, Id)>,
    }
    ReturnValue {
        value: Id,
    }
    SelectionMerge {
        merge_block: Id,
        control: Literal,
    }
    LoopMerge {
        merge_block: Id,
        continue_target: Id,
        control: Vec<Literal>,
    }
}

impl_nodes! {
    DecorationGroup {
        result: Id,
    }
    ExtInstImport {
        result: Id,
        name: String,
    }
    Undef {
        ty: Id,
        result: Id,
    }
    TypeVoid {
        result: Id,
    }
    TypeBool {
        result: Id,
    }
    TypeInt {
        result: Id,
        width: Literal,
        signedness: Literal,
    }
    TypeFloat {
        result: Id,
        width: Literal,
    }
    TypeVector {
        result: Id,
        component_type: Id,
        component_count: Literal,
    }
    TypeMatrix {
        result: Id,
        column_type: Id,
        column_count: Literal,
    }
    TypeImage {
        result: Id,
        sampled_type: Id,
        dim: spv::Dim,
        depth: Literal,
        arrayed: Literal,
        multisampled: Literal,
        sampled: Literal,
        format: spv::ImageFormat,
        access_qualifier: Option<spv::AccessQualifier>,
    }
    TypeSampler {
        result: Id,
    }
    TypeSampledImage {
        result: Id,
        image_type: Id,
    }
    TypeArray {
        result: Id,
        elem: Id,
        length: Id,
    }
    TypeRuntimeArray {
        result: Id,
        elem: Id,
    }
    TypeStruct {
        result: Id,
        members: Vec<Id>,
    }
    TypePointer {
        result: Id,
        storage_class: spv::StorageClass,
        target: Id,
    }
    TypeFunction {
        result: Id,
        ret: Id,
        params: Vec<Id>,
    }
    Constant {
        ty: Id,
        result: Id,
        value: Vec<Literal>,
    }
    NullaryConstant {
        ty: Id,
        result: Id,
    }
    ConstantComposite {
        ty: Id,
        result: Id,
        constituents: Vec<Id>,
    }
    SpecConstantOp {
        ty: Id,
        result: Id,
        opcode: Literal,
        operands: Vec<Literal>,
    }
    Variable {
        ty: Id,
        result: Id,
        storage_class: spv::StorageClass,
        initializer: Option<Id>,
    }
    Function {
        ty: Id,
        result: Id,
        control: Literal,
        function_type: Id,
    }
    FunctionParameter {
        ty: Id,
        result: Id,
    }
    Label {
        result: Id,
    }
    Phi {
        ty: Id,
        result: Id,
        incoming: Vec<(Id, Id)>,
    }
}
