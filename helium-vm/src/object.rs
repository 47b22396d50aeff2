//! The runtime object/class system (C6): `Class`, `Method`, `Field`
//! records built from a loaded module's tables, object construction, and
//! static/virtual/interface dispatch (spec §4.6).

use helium_module::{method_flags, type_flags};

use crate::heap::Heap;
use crate::registry::ModuleRegistry;
use crate::value::ObjectRef;

/// Reserved runtime type ids, numerically mirroring (not depending on)
/// `helium_ir::lower::builtin_types` on the compiler side -- the two
/// crates agree on the numbering by convention since a loaded module's
/// type table never re-declares the built-ins (spec §3.2).
pub mod builtin_types {
    pub const INTEGER: u32 = 1;
    pub const FLOAT: u32 = 2;
    pub const BOOLEAN: u32 = 3;
    pub const STRING: u32 = 4;
    pub const OBJECT: u32 = 5;
    pub const VOID: u32 = 6;
}

/// A loaded class, built from a module's `TypeEntry` plus the registry's
/// id-remapping (spec §3.4's runtime `Class`).
#[derive(Debug, Clone)]
pub struct Class {
    pub type_id: u32,
    pub name: String,
    pub super_type_id: Option<u32>,
    pub interface_type_ids: Vec<u32>,
    pub method_ids: Vec<u32>,
    pub field_ids: Vec<u32>,
    pub flags: u32,
}

impl Class {
    pub fn is_interface(&self) -> bool {
        self.flags & type_flags::INTERFACE != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.is_interface()
    }
}

/// A loaded method (spec §3.4's runtime `Method`). The bytecode itself
/// stays in the owning module's blob; this only records where it lives.
#[derive(Debug, Clone)]
pub struct Method {
    pub method_id: u32,
    pub module_id: u32,
    pub owner_type_id: u32,
    pub name: String,
    pub return_type_id: u32,
    pub param_type_ids: Vec<u32>,
    pub local_count: u32,
    pub bytecode_off: u32,
    pub bytecode_len: u32,
    pub flags: u32,
}

impl Method {
    pub fn is_static(&self) -> bool {
        self.flags & method_flags::STATIC != 0
    }

    pub fn is_virtual(&self) -> bool {
        self.flags & method_flags::VIRTUAL != 0
    }

    pub fn is_intrinsic(&self) -> bool {
        self.flags & method_flags::INTRINSIC != 0
    }

    pub fn param_count(&self) -> usize {
        self.param_type_ids.len()
    }
}

/// A loaded field (spec §3.4's runtime `Field`). `slot` is its index into
/// the owning object's field-value array, assigned by the registry at
/// class-discovery time so inherited fields keep a stable layout.
#[derive(Debug, Clone)]
pub struct Field {
    pub field_id: u32,
    pub owner_type_id: u32,
    pub name: String,
    pub type_id: u32,
    pub flags: u32,
    pub slot: usize,
}

impl Field {
    pub fn is_static(&self) -> bool {
        self.flags & helium_module::field_flags::STATIC != 0
    }
}

/// Allocate a new instance of `class`, zero-initialising every instance
/// field slot and setting `ref_count = 1` (spec §4.6 `new_object`).
pub fn new_object(
    heap: &mut Heap,
    registry: &ModuleRegistry,
    class: &Class,
    roots: &[ObjectRef],
) -> Result<ObjectRef, crate::error::HeapError> {
    let field_count = registry.instance_field_count(class.type_id);
    heap.allocate_object(class.type_id, field_count, false, roots)
}

/// Walk the superclass chain looking for `target_type_id` (spec §4.6
/// `object_is_instance_of`).
pub fn object_is_instance_of(registry: &ModuleRegistry, obj_type_id: u32, target_type_id: u32) -> bool {
    let mut current = Some(obj_type_id);
    while let Some(type_id) = current {
        if type_id == target_type_id {
            return true;
        }
        current = registry.class(type_id).and_then(|c| c.super_type_id);
    }
    false
}

/// Walk the superclass chain, checking each level's implemented-interface
/// list (spec §4.6 `object_is_instance_of_interface`).
pub fn object_is_instance_of_interface(
    registry: &ModuleRegistry,
    obj_type_id: u32,
    interface_type_id: u32,
) -> bool {
    let mut current = Some(obj_type_id);
    while let Some(type_id) = current {
        let Some(class) = registry.class(type_id) else {
            return false;
        };
        if class.interface_type_ids.contains(&interface_type_id) {
            return true;
        }
        current = class.super_type_id;
    }
    false
}

/// Virtual dispatch (spec §4.6 `CALLV`): starting at `obj_type_id`,
/// search each superclass in turn for a method named `name`; first match
/// wins. A vtable is an optimisation left for later, not required here.
pub fn find_virtual_method<'a>(
    registry: &'a ModuleRegistry,
    obj_type_id: u32,
    name: &str,
) -> Option<&'a Method> {
    let mut current = Some(obj_type_id);
    while let Some(type_id) = current {
        let class = registry.class(type_id)?;
        if let Some(method) = class
            .method_ids
            .iter()
            .filter_map(|id| registry.method(*id))
            .find(|m| m.name == name)
        {
            return Some(method);
        }
        current = class.super_type_id;
    }
    None
}

/// Interface dispatch (spec §4.6 `CALLI`): resolve the method by name on
/// the named interface, then dispatch it as virtual against the receiver.
pub fn find_interface_method<'a>(
    registry: &'a ModuleRegistry,
    interface_type_id: u32,
    name: &str,
) -> Option<&'a Method> {
    let interface = registry.class(interface_type_id)?;
    interface
        .method_ids
        .iter()
        .filter_map(|id| registry.method(*id))
        .find(|m| m.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::registry::ModuleRegistry;

    fn registry_with(classes: Vec<Class>) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        for class in classes {
            registry.insert_class_for_test(class);
        }
        registry
    }

    #[test]
    fn instance_of_walks_superclass_chain() {
        let registry = registry_with(vec![
            Class {
                type_id: 10,
                name: "Base".into(),
                super_type_id: None,
                interface_type_ids: vec![],
                method_ids: vec![],
                field_ids: vec![],
                flags: type_flags::CLASS,
            },
            Class {
                type_id: 11,
                name: "Derived".into(),
                super_type_id: Some(10),
                interface_type_ids: vec![],
                method_ids: vec![],
                field_ids: vec![],
                flags: type_flags::CLASS,
            },
        ]);
        assert!(object_is_instance_of(&registry, 11, 10));
        assert!(object_is_instance_of(&registry, 11, 11));
        assert!(!object_is_instance_of(&registry, 10, 11));
    }

    #[test]
    fn instance_of_interface_checks_every_level() {
        let registry = registry_with(vec![
            Class {
                type_id: 10,
                name: "Base".into(),
                super_type_id: None,
                interface_type_ids: vec![20],
                method_ids: vec![],
                field_ids: vec![],
                flags: type_flags::CLASS,
            },
            Class {
                type_id: 11,
                name: "Derived".into(),
                super_type_id: Some(10),
                interface_type_ids: vec![],
                method_ids: vec![],
                field_ids: vec![],
                flags: type_flags::CLASS,
            },
        ]);
        assert!(object_is_instance_of_interface(&registry, 11, 20));
        assert!(!object_is_instance_of_interface(&registry, 11, 99));
    }

    #[test]
    fn allocating_an_object_gives_it_zeroed_fields_and_ref_count_one() {
        let mut registry = ModuleRegistry::new();
        let class = Class {
            type_id: 10,
            name: "Point".into(),
            super_type_id: None,
            interface_type_ids: vec![],
            method_ids: vec![],
            field_ids: vec![],
            flags: type_flags::CLASS,
        };
        registry.insert_class_for_test(class.clone());
        let mut heap = Heap::new(&VmConfig::default());
        let obj = new_object(&mut heap, &registry, &class, &[]).unwrap();
        assert_eq!(heap.ref_count(obj), Some(1));
        assert_eq!(heap.type_id_of(obj), Some(10));
    }
}
