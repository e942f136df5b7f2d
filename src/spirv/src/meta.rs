use fnv::FnvHashMap;
use spirv_headers as spv;

use crate::*;

/// Upper limit on struct members imposed by the SPIR-V environment
/// limits; member metadata past it is rejected.
const MAX_STRUCT_MEMBERS: u32 = 16383;

#[derive(Clone, Debug, Default)]
pub struct Decorations {
    pub name: String,
    pub mask: Bitset,
    args: FnvHashMap<spv::Decoration, u32>,
}

impl Decorations {
    pub fn has(&self, decoration: spv::Decoration) -> bool {
        self.mask.get(decoration as u32)
    }

    /// The decoration's argument, or 0 if absent or argument-less.
    pub fn get(&self, decoration: spv::Decoration) -> u32 {
        if !self.has(decoration) { return 0; }
        self.args.get(&decoration).copied().unwrap_or(0)
    }

    pub fn set(&mut self, decoration: spv::Decoration, arg: u32) {
        self.mask.set(decoration as u32);
        self.args.insert(decoration, arg);
    }

    pub fn unset(&mut self, decoration: spv::Decoration) {
        self.mask.clear(decoration as u32);
        self.args.remove(&decoration);
    }

    /// Applies every decoration of `other`. Names are not decorations.
    pub(crate) fn merge_from(&mut self, other: &Decorations) {
        self.mask |= &other.mask;
        self.args.extend(other.args.iter().map(|(&k, &v)| (k, v)));
    }
}

#[derive(Clone, Debug, Default)]
pub struct Meta {
    pub decoration: Decorations,
    pub members: Vec<Decorations>,
}

impl Meta {
    pub fn member(&self, index: u32) -> Option<&Decorations> {
        self.members.get(index as usize)
    }

    pub(crate) fn member_mut(&mut self, index: u32) -> Result<&mut Decorations>
    {
        if index >= MAX_STRUCT_MEMBERS {
            bail!(OutOfRange, "member index {} exceeds struct limit", index);
        }
        let index = index as usize;
        if self.members.len() <= index {
            self.members.resize_with(index + 1, Default::default);
        }
        Ok(&mut self.members[index])
    }
}

impl Compiler {
    /// The recorded name, or empty if the module never named the ID.
    pub fn get_name(&self, id: Id) -> Result<&str> {
        Ok(&self.ir.meta(id)?.decoration.name)
    }

    pub fn set_name(&mut self, id: Id, name: impl Into<String>) -> Result<()> {
        self.ir.meta_mut(id)?.decoration.name = name.into();
        Ok(())
    }

    pub fn get_member_name(&self, ty: Id, index: u32) -> Result<&str> {
        Ok(self.ir.meta(ty)?.member(index).map_or("", |m| &m.name))
    }

    pub fn set_member_name(
        &mut self,
        ty: Id,
        index: u32,
        name: impl Into<String>,
    ) -> Result<()> {
        self.ir.meta_mut(ty)?.member_mut(index)?.name = name.into();
        Ok(())
    }

    /// Deterministic name for unnamed IDs.
    pub fn get_fallback_name(&self, id: Id) -> String {
        format!("_{}", id)
    }

    pub fn get_fallback_member_name(&self, index: u32) -> String {
        format!("_{}", index)
    }

    /// The recorded name, or the fallback name if there is none.
    pub fn to_name(&self, id: Id) -> Result<String> {
        let name = self.get_name(id)?;
        Ok(if name.is_empty() {
            self.get_fallback_name(id)
        } else {
            name.to_owned()
        })
    }

    pub fn has_decoration(&self, id: Id, decoration: spv::Decoration) ->
        Result<bool>
    {
        Ok(self.ir.meta(id)?.decoration.has(decoration))
    }

    pub fn get_decoration(&self, id: Id, decoration: spv::Decoration) ->
        Result<u32>
    {
        Ok(self.ir.meta(id)?.decoration.get(decoration))
    }

    pub fn set_decoration(
        &mut self,
        id: Id,
        decoration: spv::Decoration,
        arg: u32,
    ) -> Result<()> {
        self.ir.meta_mut(id)?.decoration.set(decoration, arg);
        Ok(())
    }

    pub fn unset_decoration(&mut self, id: Id, decoration: spv::Decoration) ->
        Result<()>
    {
        self.ir.meta_mut(id)?.decoration.unset(decoration);
        Ok(())
    }

    pub fn get_decoration_mask(&self, id: Id) -> Result<&Bitset> {
        Ok(&self.ir.meta(id)?.decoration.mask)
    }

    pub fn has_member_decoration(
        &self,
        ty: Id,
        index: u32,
        decoration: spv::Decoration,
    ) -> Result<bool> {
        Ok(self.ir.meta(ty)?.member(index).map_or(false, |m| m.has(decoration)))
    }

    pub fn get_member_decoration(
        &self,
        ty: Id,
        index: u32,
        decoration: spv::Decoration,
    ) -> Result<u32> {
        Ok(self.ir.meta(ty)?.member(index).map_or(0, |m| m.get(decoration)))
    }

    pub fn set_member_decoration(
        &mut self,
        ty: Id,
        index: u32,
        decoration: spv::Decoration,
        arg: u32,
    ) -> Result<()> {
        self.ir.meta_mut(ty)?.member_mut(index)?.set(decoration, arg);
        Ok(())
    }

    pub fn unset_member_decoration(
        &mut self,
        ty: Id,
        index: u32,
        decoration: spv::Decoration,
    ) -> Result<()> {
        let meta = self.ir.meta_mut(ty)?;
        if let Some(member) = meta.members.get_mut(index as usize) {
            member.unset(decoration);
        }
        Ok(())
    }

    pub fn get_member_decoration_mask(&self, ty: Id, index: u32) ->
        Result<Bitset>
    {
        Ok(self.ir.meta(ty)?.member(index)
            .map_or_else(Bitset::new, |m| m.mask.clone()))
    }
}

#[cfg(test)]
mod tests {
    use spirv_headers::Decoration;

    use crate::testing::*;
    use super::*;

    #[test]
    fn decorations() {
        let mut compiler = uniform_block_shader().compile();
        assert_eq!(compiler.get_decoration(9, Decoration::Binding).unwrap(), 1);
        assert_eq!(
            compiler.get_decoration(9, Decoration::DescriptorSet).unwrap(),
            0,
        );
        assert!(compiler.has_decoration(9, Decoration::DescriptorSet).unwrap());
        assert!(compiler.has_decoration(7, Decoration::Block).unwrap());
        assert_eq!(compiler.get_decoration(7, Decoration::Block).unwrap(), 0);

        compiler.set_decoration(9, Decoration::Binding, 4).unwrap();
        assert_eq!(compiler.get_decoration(9, Decoration::Binding).unwrap(), 4);
        compiler.unset_decoration(9, Decoration::Binding).unwrap();
        assert!(!compiler.has_decoration(9, Decoration::Binding).unwrap());
        assert_eq!(compiler.get_decoration(9, Decoration::Binding).unwrap(), 0);
    }

    #[test]
    fn member_decorations() {
        let mut compiler = uniform_block_shader().compile();
        assert_eq!(
            compiler.get_member_decoration(7, 1, Decoration::Offset).unwrap(),
            16,
        );
        assert_eq!(
            compiler.get_member_decoration(7, 5, Decoration::Offset).unwrap(),
            0,
        );
        assert!(compiler.get_member_decoration_mask(7, 5).unwrap().is_empty());

        compiler.set_member_decoration(7, 3, Decoration::Offset, 48).unwrap();
        assert_eq!(
            compiler.get_member_decoration(7, 3, Decoration::Offset).unwrap(),
            48,
        );
        compiler.unset_member_decoration(7, 3, Decoration::Offset).unwrap();
        assert!(!compiler.has_member_decoration(7, 3, Decoration::Offset)
            .unwrap());
    }

    #[test]
    fn names() {
        let mut compiler = uniform_block_shader().compile();
        assert_eq!(compiler.get_name(7).unwrap(), "Globals");
        assert_eq!(compiler.get_member_name(7, 1).unwrap(), "b");
        assert_eq!(compiler.get_member_name(7, 2).unwrap(), "");
        assert_eq!(compiler.get_name(20).unwrap(), "");
        assert_eq!(compiler.to_name(20).unwrap(), "_20");
        assert_eq!(compiler.get_fallback_member_name(3), "_3");

        compiler.set_name(20, "color").unwrap();
        assert_eq!(compiler.to_name(20).unwrap(), "color");
        compiler.set_member_name(7, 0, "first").unwrap();
        assert_eq!(compiler.get_member_name(7, 0).unwrap(), "first");
    }

    #[test]
    fn fallback_names() {
        let mut compiler = uniform_block_shader().compile();
        assert_eq!(compiler.get_name(20).unwrap(), "");
        assert_eq!(compiler.get_name(12).unwrap(), "");
        let fallback = compiler.get_fallback_name(20);
        assert_eq!(compiler.get_fallback_name(20), fallback);
        assert_ne!(compiler.get_fallback_name(12), fallback);
        assert_ne!(compiler.to_name(12).unwrap(), compiler.to_name(20).unwrap());
        assert_ne!(compiler.get_fallback_member_name(0),
            compiler.get_fallback_member_name(1));

        compiler.set_name(9, "Params").unwrap();
        assert_eq!(compiler.get_name(9).unwrap(), "Params");
        assert_eq!(compiler.to_name(9).unwrap(), "Params");
    }

    #[test]
    fn out_of_range_ids() {
        let mut compiler = uniform_block_shader().compile();
        let err = compiler.get_name(1000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        let err = compiler.set_decoration(21, spv::Decoration::Flat, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn decoration_groups() {
        let mut asm = Assembler::new(6);
        asm.decorate(1, Decoration::RelaxedPrecision, &[])
            .decorate(1, Decoration::Binding, &[3])
            .op(spv::Op::DecorationGroup, &[1])
            .op(spv::Op::GroupDecorate, &[1, 4, 5])
            .op(spv::Op::GroupMemberDecorate, &[1, 2, 1])
            .op(spv::Op::TypeFloat, &[3, 32])
            .op(spv::Op::TypeStruct, &[2, 3, 3])
            .op(spv::Op::TypePointer, &[4, spv::StorageClass::Uniform as u32, 2])
            .op(spv::Op::Variable, &[4, 5, spv::StorageClass::Uniform as u32]);
        let compiler = asm.compile();
        assert!(compiler.has_decoration(5, Decoration::RelaxedPrecision)
            .unwrap());
        assert_eq!(compiler.get_decoration(5, Decoration::Binding).unwrap(), 3);
        assert_eq!(compiler.get_decoration(4, Decoration::Binding).unwrap(), 3);
        assert!(compiler.has_member_decoration(2, 1, Decoration::Binding)
            .unwrap());
        assert!(!compiler.has_member_decoration(2, 0, Decoration::Binding)
            .unwrap());
    }
}
