//! Contract-to-implementation matching.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use svchost_core::{QualifiedTypeName, TypeDescriptor};

use crate::domain::{LoadedModule, ModuleDomain};
use crate::host::ImplementationType;

/// A concrete class found in a service module.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub module: Arc<LoadedModule>,
    pub type_name: String,
}

impl Candidate {
    /// The hostable implementation, with its linked code if any.
    #[must_use]
    pub fn implementation(&self) -> ImplementationType {
        ImplementationType::new(
            self.module.qualify(&self.type_name),
            self.module.factory_for(&self.type_name),
        )
    }
}

/// Every concrete class of the service modules, indexed by each contract
/// it is assignable to.
///
/// A class is assignable to the interfaces it implements, the interfaces
/// those extend, and everything its base classes are assignable to.
/// Contracts are keyed by their qualified name (`Type.Name, Module`), so
/// equally named interfaces of different modules stay apart.
#[derive(Debug, Default)]
pub struct ImplementationIndex {
    by_contract: HashMap<QualifiedTypeName, Vec<Candidate>>,
}

impl ImplementationIndex {
    /// Indexes the concrete classes of `modules`, in module then
    /// declaration order.
    ///
    /// A referenced type name may be module-qualified. An unqualified name
    /// is looked up in the referencing module first and then across
    /// `domain`. An interface whose declaration is not loaded is keyed by
    /// its name alone.
    #[must_use]
    pub fn build(modules: &[Arc<LoadedModule>], domain: &ModuleDomain) -> Self {
        let mut by_contract: HashMap<QualifiedTypeName, Vec<Candidate>> = HashMap::new();

        for module in modules {
            for class in module.types().filter(|t| t.is_concrete_class()) {
                for contract in assignable_contracts(module, class, domain) {
                    by_contract.entry(contract).or_default().push(Candidate {
                        module: Arc::clone(module),
                        type_name: class.name.clone(),
                    });
                }
            }
        }

        Self { by_contract }
    }

    /// Concrete classes assignable to `contract`.
    #[must_use]
    pub fn candidates(&self, contract: &QualifiedTypeName) -> &[Candidate] {
        self.by_contract
            .get(contract)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of distinct contracts with at least one candidate.
    #[must_use]
    pub fn contract_count(&self) -> usize {
        self.by_contract.len()
    }
}

/// A referenced type, with the module declaring it when that is loaded.
struct Declared {
    name: QualifiedTypeName,
    declaration: Option<(Arc<LoadedModule>, TypeDescriptor)>,
}

fn lookup(module: &Arc<LoadedModule>, reference: &str, domain: &ModuleDomain) -> Declared {
    let parsed = QualifiedTypeName::parse(reference);
    let type_name = parsed.type_name();
    let found = match parsed.module() {
        Some(owner) => domain.get(owner.simple_name()).and_then(|owner| {
            let descriptor = owner.find_type(type_name)?.clone();
            Some((owner, descriptor))
        }),
        None => module
            .find_type(type_name)
            .map(|descriptor| (Arc::clone(module), descriptor.clone()))
            .or_else(|| {
                domain
                    .find_type(type_name)
                    .map(|resolved| (resolved.module, resolved.descriptor))
            }),
    };
    match found {
        Some((owner, descriptor)) => Declared {
            name: owner.qualify(type_name),
            declaration: Some((owner, descriptor)),
        },
        None => Declared {
            name: parsed,
            declaration: None,
        },
    }
}

fn assignable_contracts(
    module: &Arc<LoadedModule>,
    class: &TypeDescriptor,
    domain: &ModuleDomain,
) -> HashSet<QualifiedTypeName> {
    let mut contracts = HashSet::new();
    let mut visited = HashSet::new();
    // (referencing module, type reference, is an interface)
    let mut pending: Vec<(Arc<LoadedModule>, String, bool)> = Vec::new();
    push_supertypes(module, class, &mut pending);

    while let Some((referrer, reference, is_interface)) = pending.pop() {
        let declared = lookup(&referrer, &reference, domain);
        if !visited.insert(declared.name.clone()) {
            continue;
        }
        if let Some((owner, descriptor)) = &declared.declaration {
            push_supertypes(owner, descriptor, &mut pending);
        }
        if is_interface {
            contracts.insert(declared.name);
        }
    }

    contracts
}

fn push_supertypes(
    module: &Arc<LoadedModule>,
    descriptor: &TypeDescriptor,
    pending: &mut Vec<(Arc<LoadedModule>, String, bool)>,
) {
    let mut push = |name: &String, is_interface: bool| {
        pending.push((Arc::clone(module), name.clone(), is_interface));
    };
    if descriptor.is_interface() {
        descriptor.extends.iter().for_each(|name| push(name, true));
    } else {
        descriptor.implements.iter().for_each(|name| push(name, true));
        descriptor.base.iter().for_each(|name| push(name, false));
    }
}
