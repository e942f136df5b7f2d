use fnv::{FnvHashMap, FnvHashSet};
use log::trace;
use spirv_headers as spv;

use crate::*;

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Resource {
    /// The variable.
    pub id: Id,
    /// The variable's pointer type, which carries array dimensions.
    pub type_id: Id,
    /// The declaring type, which carries decorations and member names.
    pub base_type_id: Id,
    pub name: String,
}

/// The resources an entry point uses, bucketed by binding model.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ShaderResources {
    pub uniform_buffers: Vec<Resource>,
    pub storage_buffers: Vec<Resource>,
    pub stage_inputs: Vec<Resource>,
    pub stage_outputs: Vec<Resource>,
    pub subpass_inputs: Vec<Resource>,
    pub storage_images: Vec<Resource>,
    pub sampled_images: Vec<Resource>,
    pub separate_images: Vec<Resource>,
    pub separate_samplers: Vec<Resource>,
    pub atomic_counters: Vec<Resource>,
    pub push_constant_buffers: Vec<Resource>,
}

/// A member of a buffer block that the entry point touches.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BufferRange {
    pub index: u32,
    pub offset: usize,
    pub size: usize,
}

impl Compiler {
    /// Whether the variable is a builtin or a block of builtins. Such
    /// variables, along with remapped ones, are not user resources.
    pub fn is_builtin_variable(&self, id: Id) -> Result<bool> {
        let var = self.get_variable(id)?;
        if var.remapped || self.has_decoration(id, spv::Decoration::BuiltIn)? {
            return Ok(true);
        }
        let ty = self.get_type(var.ty)?;
        Ok(self.ir.meta(ty.base)?.members.iter()
            .any(|member| member.has(spv::Decoration::BuiltIn)))
    }

    pub fn shader_resources(&self) -> Result<ShaderResources> {
        use spv::StorageClass::*;

        let entry = self.active_entry_point()?;
        // Starting with 1.4, the interface lists every global the entry
        // point uses, not only inputs and outputs.
        let filter_all = self.ir.version() >= (1, 4);

        let mut res = ShaderResources::default();
        for &id in self.ir.global_variables() {
            let var = self.get_variable(id)?;
            let ty = self.get_type(var.ty)?;
            let in_interface = entry.interface.contains(&id);
            let stage_io = var.storage == Input || var.storage == Output;
            if (stage_io || filter_all) && !in_interface { continue; }
            if self.is_builtin_variable(id)? {
                trace!("skipping builtin or remapped variable {}", id);
                continue;
            }

            let block = &self.ir.meta(ty.base)?.decoration;
            let var_name = &self.ir.meta(id)?.decoration.name;
            let resource = |name: &str| Resource {
                id,
                type_id: var.ty,
                base_type_id: ty.base,
                name: name.to_owned(),
            };
            let is_block = block.has(spv::Decoration::Block);
            let io_name = if is_block { &block.name } else { var_name };

            match (var.storage, ty.base_type) {
                (Input, _) => res.stage_inputs.push(resource(io_name)),
                (Output, _) => res.stage_outputs.push(resource(io_name)),
                (UniformConstant, BaseType::Image)
                    if ty.image.dim == spv::Dim::DimSubpassData =>
                    res.subpass_inputs.push(resource(var_name)),
                (Uniform, _) if is_block =>
                    res.uniform_buffers.push(resource(&block.name)),
                (Uniform, _) if block.has(spv::Decoration::BufferBlock) =>
                    res.storage_buffers.push(resource(&block.name)),
                (StorageBuffer, _) =>
                    res.storage_buffers.push(resource(&block.name)),
                (PushConstant, _) =>
                    res.push_constant_buffers.push(resource(var_name)),
                (UniformConstant, BaseType::Image) if ty.image.sampled == 1 =>
                    res.separate_images.push(resource(var_name)),
                (UniformConstant, BaseType::Image) =>
                    res.storage_images.push(resource(var_name)),
                (UniformConstant, BaseType::SampledImage) =>
                    res.sampled_images.push(resource(var_name)),
                (UniformConstant, BaseType::Sampler) =>
                    res.separate_samplers.push(resource(var_name)),
                (AtomicCounter, _) =>
                    res.atomic_counters.push(resource(var_name)),
                _ => trace!("variable {} is not a resource", id),
            }
        }
        Ok(res)
    }

    fn member_offset(&self, struct_type: Id, index: u32) -> Result<usize> {
        let meta = self.ir.meta(struct_type)?;
        match meta.member(index) {
            Some(member) if member.has(spv::Decoration::Offset) =>
                Ok(member.get(spv::Decoration::Offset) as usize),
            _ => bail!(UnsupportedConstruct,
                "member {} of struct {} has no Offset", index, struct_type),
        }
    }

    fn struct_type(&self, id: Id) -> Result<&Type> {
        let ty = self.get_type(id)?;
        if ty.base_type != BaseType::Struct {
            bail!(WrongEntityKind, "type {} is not a struct", id);
        }
        Ok(ty)
    }

    /// Size of a block struct, from the offset of its last member plus
    /// that member's declared size.
    pub fn get_declared_struct_size(&self, id: Id) -> Result<usize> {
        let ty = self.struct_type(id)?;
        let last = match ty.member_types.len() {
            0 => bail!(UnsupportedConstruct,
                "struct {} is empty and has no declared size", id),
            len => (len - 1) as u32,
        };
        Ok(self.member_offset(ty.base, last)? +
            self.get_declared_struct_member_size(id, last)?)
    }

    /// Size of one member as laid out by its Offset, ArrayStride and
    /// MatrixStride decorations.
    pub fn get_declared_struct_member_size(&self, id: Id, index: u32) ->
        Result<usize>
    {
        let ty = self.struct_type(id)?;
        let member_id = *ty.member_types.get(index as usize).ok_or_else(||
            err!(OutOfRange, "struct {} has no member {}", id, index))?;
        let member = self.get_type(member_id)?;

        if member.base_type != BaseType::Struct && !member.is_numeric() {
            bail!(UnsupportedConstruct,
                "member {} of struct {} has no declared size", index, id);
        }

        if let Some(&outer) = member.array.last() {
            // Runtime arrays contribute nothing to the declared size
            let length = outer.length().unwrap_or(0);
            let stride = self.ir.meta(member_id)?.decoration
                .get(spv::Decoration::ArrayStride);
            if stride == 0 {
                bail!(UnsupportedConstruct,
                    "array member {} of struct {} has no ArrayStride",
                    index, id);
            }
            return Ok(stride as usize * length as usize);
        }

        if member.base_type == BaseType::Struct {
            return self.get_declared_struct_size(member_id);
        }

        let component = member.width as usize / 8;
        let vecsize = member.vecsize as usize;
        let columns = member.columns as usize;
        if columns == 1 {
            return Ok(component * vecsize);
        }

        let flags = self.ir.meta(ty.base)?.member(index);
        let stride = flags.map_or(0, |f| f.get(spv::Decoration::MatrixStride))
            as usize;
        let row_major = flags.map_or(false, |f|
            f.has(spv::Decoration::RowMajor));
        Ok(match (stride, row_major) {
            (0, _) => {
                // Columns of three components are padded to four.
                let padded = if vecsize == 3 { 4 } else { vecsize };
                component * padded * columns
            },
            (stride, true) => stride * vecsize,
            (stride, false) => stride * columns,
        })
    }

    /// The members of a block variable that the active entry point
    /// touches, following access chains and copies of the variable.
    pub fn get_active_buffer_ranges(&self, id: Id) -> Result<Vec<BufferRange>> {
        use spv::Op;

        let var = self.get_variable(id)?;
        let ptr = self.get_type(var.ty)?;
        let block = self.struct_type(ptr.base)?;
        let entry = self.active_entry_point()?;

        // Pointers that alias the block, with their remaining array depth
        let mut roots: FnvHashMap<Id, usize> = FnvHashMap::default();
        roots.insert(id, ptr.array.len());
        let mut seen = FnvHashSet::default();
        let mut ranges = Vec::new();

        let operand = |args: &[u32], index: usize| args.get(index).copied()
            .ok_or_else(|| err!(OutOfRange, "instruction is missing operands"));

        for op in self.reachable_ops(entry.function) {
            let op = op?;
            let args = op.args;
            match op.op() {
                Some(Op::AccessChain) | Some(Op::InBoundsAccessChain) |
                    Some(Op::PtrAccessChain) =>
                {
                    let depth = match roots.get(&operand(args, 2)?) {
                        Some(&depth) => depth,
                        None => continue,
                    };
                    let first = if op.op() == Some(Op::PtrAccessChain) {
                        4
                    } else {
                        3
                    };
                    let indices = args.get(first..).unwrap_or(&[]);
                    if indices.len() <= depth {
                        roots.insert(operand(args, 1)?, depth - indices.len());
                        continue;
                    }
                    let index = self.get_constant(indices[depth])?.scalar()
                        .ok_or_else(|| err!(UnsupportedConstruct,
                            "member index {} is not a scalar constant",
                            indices[depth]))?;
                    self.add_buffer_range(block, index, &mut seen,
                        &mut ranges)?;
                },
                Some(Op::CopyObject) => {
                    if let Some(&depth) = roots.get(&operand(args, 2)?) {
                        roots.insert(operand(args, 1)?, depth);
                    }
                },
                Some(Op::Load) => {
                    if roots.contains_key(&operand(args, 2)?) {
                        self.add_all_buffer_ranges(block, &mut seen,
                            &mut ranges)?;
                    }
                },
                Some(Op::Store) => {
                    if roots.contains_key(&operand(args, 0)?) {
                        self.add_all_buffer_ranges(block, &mut seen,
                            &mut ranges)?;
                    }
                },
                Some(Op::CopyMemory) => {
                    if roots.contains_key(&operand(args, 0)?) ||
                        roots.contains_key(&operand(args, 1)?)
                    {
                        self.add_all_buffer_ranges(block, &mut seen,
                            &mut ranges)?;
                    }
                },
                _ => {},
            }
        }
        Ok(ranges)
    }

    fn add_all_buffer_ranges(
        &self,
        block: &Type,
        seen: &mut FnvHashSet<u32>,
        ranges: &mut Vec<BufferRange>,
    ) -> Result<()> {
        for index in 0..block.member_types.len() as u32 {
            self.add_buffer_range(block, index, seen, ranges)?;
        }
        Ok(())
    }

    fn add_buffer_range(
        &self,
        block: &Type,
        index: u32,
        seen: &mut FnvHashSet<u32>,
        ranges: &mut Vec<BufferRange>,
    ) -> Result<()> {
        let count = block.member_types.len() as u32;
        if index >= count {
            bail!(OutOfRange, "struct {} has no member {}", block.base, index);
        }
        if !seen.insert(index) { return Ok(()); }

        let offset = self.member_offset(block.base, index)?;
        let size = if index + 1 < count {
            let next = self.member_offset(block.base, index + 1)?;
            next.checked_sub(offset).ok_or_else(|| err!(UnsupportedConstruct,
                "member offsets of struct {} are not increasing", block.base))?
        } else {
            self.get_declared_struct_member_size(block.base, index)?
        };
        ranges.push(BufferRange { index, offset, size });
        Ok(())
    }

    /// Whether two types have the same shape regardless of ID or
    /// decorations.
    pub fn types_are_logically_equivalent(&self, a: Id, b: Id) -> Result<bool> {
        if a == b { return Ok(true); }
        let (ta, tb) = (self.get_type(a)?, self.get_type(b)?);
        let lengths = |ty: &Type| ty.array.iter().map(|dim| dim.length())
            .collect::<Vec<_>>();
        if ta.base_type != tb.base_type ||
            ta.width != tb.width ||
            ta.vecsize != tb.vecsize ||
            ta.columns != tb.columns ||
            ta.pointer != tb.pointer ||
            ta.image != tb.image ||
            lengths(ta) != lengths(tb) ||
            ta.member_types.len() != tb.member_types.len()
        {
            return Ok(false);
        }
        for (&ma, &mb) in ta.member_types.iter().zip(tb.member_types.iter()) {
            if !self.types_are_logically_equivalent(ma, mb)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Rewrites a uniform block whose members all share one type into an
    /// array of that type. The variable keeps its ID and takes the
    /// block's name.
    pub fn flatten_interface_block(&mut self, id: Id) -> Result<()> {
        let var = self.get_variable(id)?;
        let ptr = self.get_type(var.ty)?;
        let block_id = ptr.base;
        let block = self.struct_type(block_id)?;
        let decoration = &self.ir.meta(block_id)?.decoration;

        if ptr.storage != spv::StorageClass::Uniform ||
            !decoration.has(spv::Decoration::Block)
        {
            bail!(UnsupportedConstruct,
                "variable {} is not a uniform block", id);
        }
        if ptr.is_array() {
            bail!(UnsupportedConstruct,
                "cannot flatten arrayed uniform block {}", id);
        }
        let first = *block.member_types.first().ok_or_else(|| err!(
            UnsupportedConstruct, "cannot flatten empty block {}", block_id))?;
        let member = self.get_type(first)?;
        if member.is_array() || !member.is_numeric() {
            bail!(UnsupportedConstruct,
                "block {} has non-vector members", block_id);
        }
        for &other in &block.member_types[1..] {
            if !self.types_are_logically_equivalent(first, other)? {
                bail!(UnsupportedConstruct,
                    "members of block {} differ in type", block_id);
            }
        }

        let stride = self.get_declared_struct_member_size(block_id, 0)?;
        let count = block.member_types.len() as u32;
        let name = decoration.name.clone();
        let mut array = member.clone();
        array.array.push(ArraySize::Literal(count));
        array.parent = Some(first);

        let array_id = self.increase_bound_by(2);
        let ptr_id = array_id + 1;
        let mut ptr = array.clone();
        ptr.pointer = true;
        ptr.storage = spv::StorageClass::Uniform;
        ptr.parent = Some(array_id);

        self.ir.set(array_id, array)?;
        self.ir.set(ptr_id, ptr)?;
        self.set_decoration(array_id, spv::Decoration::ArrayStride,
            stride as u32)?;
        self.ir.get_mut::<Variable>(id)?.ty = ptr_id;
        if !name.is_empty() {
            self.set_name(id, name)?;
        }
        trace!("flattened block {} into {} x {}", block_id, count, first);
        Ok(())
    }
}
