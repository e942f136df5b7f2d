use fnv::{FnvHashMap, FnvHashSet};
use log::trace;
use spirv_headers as spv;

use crate::*;

/// Tracks which forwarded expressions read which variables so emitters
/// know what to force into temporaries when a variable is written.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    dependees: FnvHashMap<Id, Vec<Id>>,
    invalid: FnvHashSet<Id>,
}

impl DependencyTracker {
    /// Forwarded expressions that read `var`.
    pub fn dependees(&self, var: Id) -> &[Id] {
        self.dependees.get(&var).map_or(&[], |deps| &deps[..])
    }

    pub fn invalid_expressions(&self) -> &FnvHashSet<Id> {
        &self.invalid
    }

    fn add(&mut self, var: Id, expr: Id) {
        let deps = self.dependees.entry(var).or_default();
        if !deps.contains(&expr) {
            deps.push(expr);
        }
    }

    fn flush(&mut self, var: Id) {
        if let Some(deps) = self.dependees.remove(&var) {
            trace!("variable {} invalidates {:?}", var, deps);
            self.invalid.extend(deps);
        }
    }
}

impl Compiler {
    pub fn dependencies(&self) -> &DependencyTracker {
        &self.deps
    }

    /// Records an emitter temporary.
    pub fn set_expression(&mut self, id: Id, expr: Expression) -> Result<()> {
        self.ir.set(id, expr)?;
        Ok(())
    }

    pub fn get_expression(&self, id: Id) -> Result<&Expression> {
        self.ir.get(id)
    }

    /// The type of anything that can appear as an operand.
    pub fn expression_type(&self, id: Id) -> Result<&Type> {
        let ty = match self.ir.entity(id)? {
            Entity::Expression(expr) => expr.ty,
            Entity::Variable(var) => var.ty,
            Entity::Constant(constant) => constant.ty,
            Entity::Undefined(undef) => undef.ty,
            other => bail!(WrongEntityKind,
                "{} {} has no value type", other.kind(), id),
        };
        self.get_type(ty)
    }

    /// Opaque handles cannot be assigned to.
    pub fn expression_is_lvalue(&self, id: Id) -> Result<bool> {
        Ok(match self.expression_type(id)?.base_type {
            BaseType::Image | BaseType::SampledImage | BaseType::Sampler =>
                false,
            _ => true,
        })
    }

    /// Resolves an access chain or loaded expression to the variable
    /// it reads from.
    pub fn maybe_get_backing_variable(&self, chain: Id) -> Option<Id> {
        if self.ir.maybe_get::<Variable>(chain).is_some() {
            return Some(chain);
        }
        self.ir.maybe_get::<Expression>(chain)?.loaded_from
    }

    /// Whether reads of `id` can be forwarded without tracking: constant
    /// data, immutable expressions and read-only variables.
    pub fn is_immutable(&self, id: Id) -> Result<bool> {
        use spv::StorageClass::*;
        match self.ir.entity(id)? {
            Entity::Constant(_) | Entity::Undefined(_) | Entity::Type(_) |
                Entity::FunctionPrototype(_) | Entity::Function(_) |
                Entity::Extension(_) => Ok(true),
            Entity::Expression(expr) => Ok(expr.immutable),
            Entity::Variable(var) => {
                // Phis are written once per incoming edge
                if var.phi { return Ok(false); }
                Ok(match var.storage {
                    UniformConstant | Input | PushConstant => true,
                    // BufferBlock makes a Uniform variable a writable SSBO
                    Uniform => {
                        let ty = self.get_type(var.ty)?;
                        !self.ir.meta(ty.base)?.decoration
                            .has(spv::Decoration::BufferBlock)
                    },
                    _ => false,
                })
            },
            Entity::Block(_) | Entity::Unset => Ok(false),
        }
    }

    /// Notes that forwarded expression `expr` reads through `chain`.
    pub fn register_read(&mut self, expr: Id, chain: Id, forwarded: bool) ->
        Result<()>
    {
        let var = self.maybe_get_backing_variable(chain);
        self.ir.get_mut::<Expression>(expr)?.loaded_from = var;
        if let Some(var) = var {
            if forwarded && !self.is_immutable(var)? {
                self.deps.add(var, expr);
            }
        }
        Ok(())
    }

    /// A write through `chain` invalidates expressions that read its
    /// variable, or every aliased variable's readers if it may alias.
    pub fn register_write(&mut self, chain: Id) -> Result<()> {
        let var = match self.maybe_get_backing_variable(chain) {
            Some(var) => var,
            None => return Ok(()),
        };
        let aliased = {
            let v = self.get_variable(var)?;
            self.ir.variable_storage_is_aliased(var, v)?
        };
        if aliased {
            self.flush_all_aliased_variables();
        } else {
            self.flush_dependees(var);
        }
        Ok(())
    }

    pub fn flush_dependees(&mut self, var: Id) {
        self.deps.flush(var);
    }

    pub fn flush_all_aliased_variables(&mut self) {
        for &var in self.ir.aliased_variables.iter() {
            self.deps.flush(var);
        }
    }

    /// Atomics may touch any global or aliased storage.
    pub fn flush_all_atomic_capable_variables(&mut self) {
        for &var in self.ir.global_variables.iter() {
            self.deps.flush(var);
        }
        self.flush_all_aliased_variables();
    }

    /// A call may write anything the function can see.
    pub fn flush_all_active_variables(&mut self, function: Id) -> Result<()> {
        let func = self.ir.get::<Function>(function)?;
        let locals = func.local_variables.iter()
            .chain(func.parameters.iter().map(|param| &param.id));
        for &var in locals {
            self.deps.flush(var);
        }
        self.flush_all_atomic_capable_variables();
        Ok(())
    }

    /// Makes `expr` depend on every mutable global that `function` or its
    /// callees load. Subpass inputs cannot change within an invocation
    /// and are skipped.
    pub fn register_global_read_dependencies(
        &mut self,
        function: Id,
        expr: Id,
    ) -> Result<()> {
        let mut reads = Vec::new();
        for op in self.reachable_ops(function) {
            let op = op?;
            match op.op() {
                Some(spv::Op::Load) | Some(spv::Op::ImageRead) => {},
                _ => continue,
            }
            let source = *op.args.get(2).ok_or_else(||
                err!(OutOfRange, "{:?} is missing its source", op.op()))?;
            let var_id = match self.maybe_get_backing_variable(source) {
                Some(var) => var,
                None => continue,
            };
            let var = self.get_variable(var_id)?;
            if !var.is_global() { continue; }
            let ty = self.get_type(var.ty)?;
            if ty.base_type == BaseType::Image &&
                ty.image.dim == spv::Dim::DimSubpassData
            {
                continue;
            }
            reads.push(var_id);
        }
        for var in reads {
            self.deps.add(var, expr);
        }
        Ok(())
    }

    /// `dst` inherits `source` and everything `source` depends on.
    pub fn inherit_expression_dependencies(&mut self, dst: Id, source: Id) ->
        Result<()>
    {
        let inherited = match self.ir.maybe_get::<Expression>(source) {
            Some(expr) => expr.dependencies.clone(),
            None => return Ok(()),
        };
        let expr = self.ir.get_mut::<Expression>(dst)?;
        expr.dependencies.push(source);
        expr.dependencies.extend(inherited);
        expr.dependencies.sort_unstable();
        expr.dependencies.dedup();
        Ok(())
    }

    pub fn is_expression_invalid(&self, id: Id) -> bool {
        self.deps.invalid.contains(&id)
    }

    pub fn invalid_expressions(&self) -> &FnvHashSet<Id> {
        self.deps.invalid_expressions()
    }

    pub fn clear_invalid_expressions(&mut self) {
        self.deps.invalid.clear();
    }
}
