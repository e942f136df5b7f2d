use derivative::Derivative;
use derive_more::Display;
use fnv::FnvHashMap;
use num_traits::FromPrimitive;
use spirv_headers as spv;

use crate::*;

const MAX_FOLD_DEPTH: u32 = 64;

#[derive(Clone, Debug, Derivative)]
#[derivative(Default)]
pub enum Entity {
    #[derivative(Default)]
    Unset,
    Type(Type),
    FunctionPrototype(FunctionPrototype),
    Variable(Variable),
    Constant(Constant),
    Function(Function),
    Block(Block),
    Undefined(Undefined),
    Expression(Expression),
    Extension(Extension),
}

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum EntityKind {
    #[display(fmt = "unset")]
    Unset,
    #[display(fmt = "type")]
    Type,
    #[display(fmt = "function prototype")]
    FunctionPrototype,
    #[display(fmt = "variable")]
    Variable,
    #[display(fmt = "constant")]
    Constant,
    #[display(fmt = "function")]
    Function,
    #[display(fmt = "block")]
    Block,
    #[display(fmt = "undefined value")]
    Undefined,
    #[display(fmt = "expression")]
    Expression,
    #[display(fmt = "extension")]
    Extension,
}

/// A type that can occupy an entity slot.
pub trait Payload: Sized {
    const KIND: EntityKind;
    fn from_entity(entity: &Entity) -> Option<&Self>;
    fn from_entity_mut(entity: &mut Entity) -> Option<&mut Self>;
    fn into_entity(self) -> Entity;
}

macro_rules! impl_payloads {
    ($($variant:ident,)*) => {
        impl Entity {
            pub fn kind(&self) -> EntityKind {
                match self {
                    Entity::Unset => EntityKind::Unset,
                    $(Entity::$variant(_) => EntityKind::$variant,)*
                }
            }
        }

        $(
            impl Payload for $variant {
                const KIND: EntityKind = EntityKind::$variant;

                fn from_entity(entity: &Entity) -> Option<&Self> {
                    match entity {
                        Entity::$variant(ref val) => Some(val),
                        _ => None,
                    }
                }

                fn from_entity_mut(entity: &mut Entity) -> Option<&mut Self> {
                    match entity {
                        Entity::$variant(ref mut val) => Some(val),
                        _ => None,
                    }
                }

                fn into_entity(self) -> Entity {
                    Entity::$variant(self)
                }
            }
        )*
    }
}

impl_payloads! {
    Type,
    FunctionPrototype,
    Variable,
    Constant,
    Function,
    Block,
    Undefined,
    Expression,
    Extension,
}

/// The parsed module: one entity slot and one metadata record per ID
/// below the bound, plus module-level declarations.
#[derive(Debug)]
pub struct Ir {
    pub(crate) words: Vec<u32>,
    pub(crate) header: Header,
    pub(crate) ids: Vec<Entity>,
    pub(crate) meta: Vec<Meta>,
    pub(crate) global_variables: Vec<Id>,
    pub(crate) aliased_variables: Vec<Id>,
    pub(crate) entry_points: Vec<EntryPoint>,
    pub(crate) capabilities: Vec<spv::Capability>,
    pub(crate) extensions: Vec<String>,
    pub(crate) source: Source,
    // Result type of every pointer-producing op inside a block
    pub(crate) chain_types: FnvHashMap<Id, Id>,
}

impl Ir {
    pub(crate) fn new(header: Header) -> Self {
        let bound = header.bound as usize;
        Self {
            words: Vec::new(),
            header,
            ids: vec![Entity::Unset; bound],
            meta: vec![Meta::default(); bound],
            global_variables: Vec::new(),
            aliased_variables: Vec::new(),
            entry_points: Vec::new(),
            capabilities: Vec::new(),
            extensions: Vec::new(),
            source: Default::default(),
            chain_types: Default::default(),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn version(&self) -> Version {
        self.header.version
    }

    pub fn bound(&self) -> u32 {
        self.header.bound
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// The operand words of an instruction.
    pub fn stream(&self, inst: &Instruction) -> Result<&[u32]> {
        self.words.get(inst.range()).ok_or_else(|| err!(OutOfRange,
            "instruction at word {} overruns the module", inst.offset))
    }

    fn index(&self, id: Id) -> Result<usize> {
        if id >= self.bound() {
            bail!(OutOfRange, "ID {} is not below bound {}", id, self.bound());
        }
        Ok(id as usize)
    }

    pub fn entity(&self, id: Id) -> Result<&Entity> {
        Ok(&self.ids[self.index(id)?])
    }

    pub fn get<T: Payload>(&self, id: Id) -> Result<&T> {
        let entity = self.entity(id)?;
        T::from_entity(entity).ok_or_else(|| err!(WrongEntityKind,
            "ID {} is {}, expected {}", id, entity.kind(), T::KIND))
    }

    pub fn get_mut<T: Payload>(&mut self, id: Id) -> Result<&mut T> {
        let index = self.index(id)?;
        let entity = &mut self.ids[index];
        let kind = entity.kind();
        T::from_entity_mut(entity).ok_or_else(|| err!(WrongEntityKind,
            "ID {} is {}, expected {}", id, kind, T::KIND))
    }

    pub fn maybe_get<T: Payload>(&self, id: Id) -> Option<&T> {
        self.ids.get(id as usize).and_then(T::from_entity)
    }

    pub fn maybe_get_mut<T: Payload>(&mut self, id: Id) -> Option<&mut T> {
        self.ids.get_mut(id as usize).and_then(T::from_entity_mut)
    }

    /// Replaces whatever the slot held.
    pub(crate) fn set<T: Payload>(&mut self, id: Id, val: T) -> Result<&mut T>
    {
        let index = self.index(id)?;
        let entity = &mut self.ids[index];
        *entity = val.into_entity();
        T::from_entity_mut(entity).ok_or_else(|| err!(WrongEntityKind,
            "ID {} did not accept {}", id, T::KIND))
    }

    /// All IDs holding an entity of type `T`, in ID order.
    pub fn iter<'a, T: Payload + 'a>(&'a self) ->
        impl Iterator<Item = (Id, &'a T)> + 'a
    {
        self.ids.iter().enumerate()
            .filter_map(|(id, entity)| Some((id as Id, T::from_entity(entity)?)))
    }

    /// Grows the bound, returning the first new ID.
    pub(crate) fn increase_bound_by(&mut self, count: u32) -> Id {
        let first = self.header.bound;
        self.header.bound += count;
        let bound = self.header.bound as usize;
        self.ids.resize_with(bound, Default::default);
        self.meta.resize_with(bound, Default::default);
        first
    }

    pub fn meta(&self, id: Id) -> Result<&Meta> {
        Ok(&self.meta[self.index(id)?])
    }

    pub(crate) fn meta_mut(&mut self, id: Id) -> Result<&mut Meta> {
        let index = self.index(id)?;
        Ok(&mut self.meta[index])
    }

    pub fn global_variables(&self) -> &[Id] {
        &self.global_variables
    }

    pub fn aliased_variables(&self) -> &[Id] {
        &self.aliased_variables
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    pub fn capabilities(&self) -> &[spv::Capability] {
        &self.capabilities
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// The low 32 bits of an integer constant. Specialization constant
    /// operations are folded over the default values of their operands.
    pub fn constant_scalar(&self, id: Id) -> Result<u32> {
        self.fold_constant(id, 0)
    }

    fn fold_constant(&self, id: Id, depth: u32) -> Result<u32> {
        use spv::Op;

        if depth > MAX_FOLD_DEPTH {
            bail!(UnsupportedConstruct,
                "constant {} nests operations too deeply", id);
        }
        let constant = self.get::<Constant>(id)?;
        let (opcode, operands) = match constant.value {
            ConstantValue::Operation { opcode, ref operands } =>
                (opcode, operands),
            _ => return constant.scalar().ok_or_else(|| err!(
                UnsupportedConstruct, "constant {} is not a scalar", id)),
        };

        let arg = |index: usize| -> Result<u32> {
            let operand = *operands.get(index).ok_or_else(|| err!(OutOfRange,
                "operation of constant {} is missing operands", id))?;
            self.fold_constant(operand, depth + 1)
        };
        let divisor = |index: usize| -> Result<u32> {
            match arg(index)? {
                0 => Err(err!(UnsupportedConstruct,
                    "constant {} divides by zero", id)),
                val => Ok(val),
            }
        };
        let op = Op::from_u32(opcode);
        Ok(match op {
            Some(Op::SConvert) | Some(Op::UConvert) => arg(0)?,
            Some(Op::SNegate) => (arg(0)? as i32).wrapping_neg() as u32,
            Some(Op::Not) => !arg(0)?,
            Some(Op::IAdd) => arg(0)?.wrapping_add(arg(1)?),
            Some(Op::ISub) => arg(0)?.wrapping_sub(arg(1)?),
            Some(Op::IMul) => arg(0)?.wrapping_mul(arg(1)?),
            Some(Op::UDiv) => arg(0)? / divisor(1)?,
            Some(Op::UMod) => arg(0)? % divisor(1)?,
            Some(Op::SDiv) =>
                (arg(0)? as i32).wrapping_div(divisor(1)? as i32) as u32,
            Some(Op::SRem) =>
                (arg(0)? as i32).wrapping_rem(divisor(1)? as i32) as u32,
            Some(Op::ShiftLeftLogical) => arg(0)?.wrapping_shl(arg(1)?),
            Some(Op::ShiftRightLogical) => arg(0)?.wrapping_shr(arg(1)?),
            Some(Op::ShiftRightArithmetic) =>
                (arg(0)? as i32).wrapping_shr(arg(1)?) as u32,
            Some(Op::BitwiseOr) => arg(0)? | arg(1)?,
            Some(Op::BitwiseXor) => arg(0)? ^ arg(1)?,
            Some(Op::BitwiseAnd) => arg(0)? & arg(1)?,
            _ => bail!(UnsupportedConstruct,
                "cannot fold opcode {} of constant {}", opcode, id),
        })
    }

    /// Storage-buffer blocks, storage images and atomic counters may be
    /// reached through more than one variable unless the variable is
    /// declared `Restrict`.
    pub(crate) fn variable_storage_is_aliased(&self, id: Id, var: &Variable) ->
        Result<bool>
    {
        let ty = self.get::<Type>(var.ty)?;
        let ssbo = var.storage == spv::StorageClass::StorageBuffer ||
            self.meta(ty.base)?.decoration.has(spv::Decoration::BufferBlock);
        let image = ty.base_type == BaseType::Image;
        let counter = ty.base_type == BaseType::AtomicCounter;
        let restrict = self.meta(id)?.decoration.has(spv::Decoration::Restrict);
        Ok((ssbo || image || counter) && !restrict)
    }

    /// The pointer type behind a variable, parameter or access chain.
    pub(crate) fn pointer_type(&self, id: Id) -> Result<&Type> {
        if let Some(var) = self.maybe_get::<Variable>(id) {
            return self.get(var.ty);
        }
        if let Some(&ty) = self.chain_types.get(&id) {
            return self.get(ty);
        }
        if let Some(expr) = self.maybe_get::<Expression>(id) {
            return self.get(expr.ty);
        }
        bail!(WrongEntityKind, "ID {} is not a pointer", id)
    }
}
