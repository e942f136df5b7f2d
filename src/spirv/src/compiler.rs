use std::cell::OnceCell;

use derivative::Derivative;
use log::debug;
use spirv_headers as spv;

use crate::*;

#[derive(Clone, Debug, Derivative)]
#[derivative(Default)]
pub struct Options {
    /// Entry point to select instead of the first declared one.
    pub entry_point: Option<String>,
    /// Reject opcodes missing from the SPIR-V grammar instead of
    /// skipping them.
    #[derivative(Default(value = "true"))]
    pub strict_opcodes: bool,
}

/// Front-end shared by every backend: owns the parsed module and the
/// analyses derived from it.
#[derive(Debug)]
pub struct Compiler {
    pub(crate) ir: Ir,
    entry_point: Option<usize>,
    control_flow: OnceCell<ControlFlow>,
    pub(crate) deps: DependencyTracker,
}

/// A code generator built on top of a `Compiler`.
pub trait Backend {
    fn compiler(&self) -> &Compiler;
    fn compile(&mut self) -> Result<String>;
}

impl Compiler {
    pub fn new(words: Vec<u32>) -> Result<Self> {
        Self::with_options(words, &Options::default())
    }

    pub fn with_options(words: Vec<u32>, options: &Options) -> Result<Self> {
        let ir = parser::parse_module(words, options)?;
        let entry_point = if ir.entry_points.is_empty() { None } else { Some(0) };
        let mut compiler = Self {
            ir,
            entry_point,
            control_flow: OnceCell::new(),
            deps: Default::default(),
        };
        if let Some(ref name) = options.entry_point {
            compiler.set_entry_point(name)?;
        }
        Ok(compiler)
    }

    /// Parses a little-endian byte stream.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            bail!(MalformedHeader,
                "byte length {} is not a multiple of 4", bytes.len());
        }
        let words = bytes.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(words)
    }

    pub fn ir(&self) -> &Ir {
        &self.ir
    }

    pub fn get_type(&self, id: Id) -> Result<&Type> {
        self.ir.get(id)
    }

    pub fn get_variable(&self, id: Id) -> Result<&Variable> {
        self.ir.get(id)
    }

    pub fn get_constant(&self, id: Id) -> Result<&Constant> {
        self.ir.get(id)
    }

    pub fn get_function(&self, id: Id) -> Result<&Function> {
        self.ir.get(id)
    }

    pub fn get_block(&self, id: Id) -> Result<&Block> {
        self.ir.get(id)
    }

    pub fn get_storage_class(&self, id: Id) -> Result<spv::StorageClass> {
        Ok(self.get_variable(id)?.storage)
    }

    /// Allocates `count` fresh IDs and returns the first.
    pub fn increase_bound_by(&mut self, count: u32) -> Id {
        let id = self.ir.increase_bound_by(count);
        self.invalidate_analyses();
        id
    }

    /// Drops derived state after a structural edit. The control-flow
    /// sets are rebuilt on next use.
    pub(crate) fn invalidate_analyses(&mut self) {
        debug!("invalidating control-flow and dependency analyses");
        self.control_flow = OnceCell::new();
        self.deps = Default::default();
    }

    pub fn control_flow(&self) -> &ControlFlow {
        self.control_flow.get_or_init(|| ControlFlow::analyze(&self.ir))
    }

    pub fn reachable_ops(&self, function: Id) -> ReachableOps<'_> {
        ReachableOps::new(&self.ir, function)
    }

    pub fn get_entry_points(&self) -> Vec<&str> {
        self.ir.entry_points.iter().map(|entry| &entry.name[..]).collect()
    }

    fn entry_point_index(&self, name: &str) -> Result<usize> {
        self.ir.entry_points.iter().position(|entry| entry.name == name)
            .ok_or_else(|| err!(NotFound, "no entry point named {:?}", name))
    }

    pub fn set_entry_point(&mut self, name: &str) -> Result<()> {
        self.entry_point = Some(self.entry_point_index(name)?);
        debug!("selected entry point {:?}", name);
        Ok(())
    }

    pub fn get_entry_point(&self, name: &str) -> Result<&EntryPoint> {
        Ok(&self.ir.entry_points[self.entry_point_index(name)?])
    }

    pub fn get_entry_point_mut(&mut self, name: &str) ->
        Result<&mut EntryPoint>
    {
        let index = self.entry_point_index(name)?;
        Ok(&mut self.ir.entry_points[index])
    }

    pub fn active_entry_point(&self) -> Result<&EntryPoint> {
        self.entry_point.map(|index| &self.ir.entry_points[index])
            .ok_or_else(|| err!(NotFound, "module declares no entry points"))
    }

    fn active_entry_point_mut(&mut self) -> Result<&mut EntryPoint> {
        let index = self.entry_point.ok_or_else(||
            err!(NotFound, "module declares no entry points"))?;
        Ok(&mut self.ir.entry_points[index])
    }

    pub fn get_execution_model(&self) -> Result<spv::ExecutionModel> {
        Ok(self.active_entry_point()?.execution_model)
    }

    pub fn get_execution_mode_mask(&self) -> Result<&Bitset> {
        Ok(&self.active_entry_point()?.modes)
    }

    pub fn set_execution_mode(
        &mut self,
        mode: spv::ExecutionMode,
        args: &[u32],
    ) -> Result<()> {
        self.active_entry_point_mut()?.set_mode(mode, args);
        Ok(())
    }

    pub fn unset_execution_mode(&mut self, mode: spv::ExecutionMode) ->
        Result<()>
    {
        self.active_entry_point_mut()?.unset_mode(mode);
        Ok(())
    }

    /// For `LocalSize`, `index` selects the x, y or z dimension.
    pub fn get_execution_mode_argument(
        &self,
        mode: spv::ExecutionMode,
        index: usize,
    ) -> Result<u32> {
        Ok(self.active_entry_point()?.mode_argument(mode, index))
    }

    /// Remapped variables are skipped by reflection and emission.
    pub fn set_remapped_variable_state(&mut self, id: Id, remapped: bool) ->
        Result<()>
    {
        self.ir.get_mut::<Variable>(id)?.remapped = remapped;
        Ok(())
    }

    pub fn get_remapped_variable_state(&self, id: Id) -> Result<bool> {
        Ok(self.get_variable(id)?.remapped)
    }

    pub fn set_subpass_input_remapped_components(
        &mut self,
        id: Id,
        components: u32,
    ) -> Result<()> {
        self.ir.get_mut::<Variable>(id)?.remapped_components = components;
        Ok(())
    }

    pub fn get_subpass_input_remapped_components(&self, id: Id) -> Result<u32> {
        Ok(self.get_variable(id)?.remapped_components)
    }
}
