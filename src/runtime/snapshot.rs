//! JSON heap snapshot backend.
//!
//! A snapshot is a self-contained description of a managed runtime at one
//! instant: types, objects with their fields, methods by code address,
//! threads and handles. [`SnapshotProvider`] indexes it and serves the
//! [`RuntimeProvider`] contract; [`SnapshotBuilder`] assembles one in code.

use super::{
    Address, ClrFlavor, Generation, HandleInfo, MethodInfo, ModuleInfo, RuntimeProvider,
    ThreadInfo, TypeHandle, Value,
};
use crate::utils::error::{AttachError, ProviderError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Runtime identification recorded in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub flavor: ClrFlavor,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    pub id: TypeHandle,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base: Option<TypeHandle>,
    /// Initialized static fields; a missing entry is an uninitialized static
    #[serde(default)]
    pub statics: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub address: Address,
    pub type_id: TypeHandle,
    #[serde(default)]
    pub generation: Generation,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Array elements; for value-type arrays each element refers to the
    /// embedded struct record
    #[serde(default)]
    pub elements: Option<Vec<Value>>,
    /// Set for objects whose memory could not be read when captured
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unreadable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRecord {
    pub address: Address,
    pub type_name: String,
    pub name: String,
}

/// Top-level snapshot document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapSnapshot {
    /// Absent when the captured process hosts no managed runtime
    #[serde(default)]
    pub runtime: Option<RuntimeInfo>,
    #[serde(default)]
    pub modules: Vec<ModuleInfo>,
    #[serde(default)]
    pub types: Vec<TypeRecord>,
    #[serde(default)]
    pub objects: Vec<ObjectRecord>,
    #[serde(default)]
    pub methods: Vec<MethodRecord>,
    #[serde(default)]
    pub threads: Vec<ThreadInfo>,
    #[serde(default)]
    pub handles: Vec<HandleInfo>,
}

/// [`RuntimeProvider`] over an indexed [`HeapSnapshot`]
#[derive(Debug)]
pub struct SnapshotProvider {
    flavor: ClrFlavor,
    snapshot: HeapSnapshot,
    heap_order: Vec<Address>,
    objects: HashMap<Address, usize>,
    types: HashMap<TypeHandle, usize>,
    types_by_name: HashMap<String, TypeHandle>,
    methods: HashMap<Address, usize>,
}

impl SnapshotProvider {
    /// Index a snapshot
    ///
    /// # Errors
    /// * `AttachError::NotManaged` - the snapshot records no managed runtime
    pub fn new(snapshot: HeapSnapshot) -> Result<Self, AttachError> {
        let flavor = snapshot
            .runtime
            .as_ref()
            .map(|r| r.flavor)
            .ok_or_else(|| AttachError::NotManaged("heap snapshot".to_string()))?;
        Ok(Self::index(flavor, snapshot))
    }

    fn index(flavor: ClrFlavor, snapshot: HeapSnapshot) -> Self {
        let objects: HashMap<Address, usize> = snapshot
            .objects
            .iter()
            .enumerate()
            .map(|(i, o)| (o.address, i))
            .collect();

        let mut heap_order: Vec<Address> = snapshot.objects.iter().map(|o| o.address).collect();
        heap_order.sort_unstable();

        let types = snapshot
            .types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id, i))
            .collect();

        let mut types_by_name = HashMap::new();
        for t in &snapshot.types {
            if let Some(name) = &t.name {
                types_by_name.entry(name.clone()).or_insert(t.id);
            }
        }

        let methods = snapshot
            .methods
            .iter()
            .enumerate()
            .map(|(i, m)| (m.address, i))
            .collect();

        debug!(
            "Indexed heap snapshot: {} types, {} objects, {} threads",
            snapshot.types.len(),
            snapshot.objects.len(),
            snapshot.threads.len()
        );

        Self {
            flavor,
            snapshot,
            heap_order,
            objects,
            types,
            types_by_name,
            methods,
        }
    }

    pub fn snapshot(&self) -> &HeapSnapshot {
        &self.snapshot
    }

    fn object(&self, address: Address) -> Result<&ObjectRecord, ProviderError> {
        self.objects
            .get(&address)
            .map(|&i| &self.snapshot.objects[i])
            .filter(|o| !o.unreadable)
            .ok_or(ProviderError::UnknownAddress(address))
    }

    fn elements(&self, address: Address) -> Result<&[Value], ProviderError> {
        self.object(address)?
            .elements
            .as_deref()
            .ok_or(ProviderError::NotAnArray(address))
    }

    fn element(&self, address: Address, index: usize) -> Result<Value, ProviderError> {
        let elements = self.elements(address)?;
        elements
            .get(index)
            .copied()
            .ok_or(ProviderError::IndexOutOfRange {
                address,
                index,
                length: elements.len(),
            })
    }
}

impl RuntimeProvider for SnapshotProvider {
    fn flavor(&self) -> ClrFlavor {
        self.flavor
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        self.snapshot.modules.clone()
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        self.snapshot.threads.clone()
    }

    fn handles(&self) -> Vec<HandleInfo> {
        self.snapshot.handles.clone()
    }

    fn object_addresses(&self) -> Box<dyn Iterator<Item = Address> + '_> {
        Box::new(self.heap_order.iter().copied())
    }

    fn object_type(&self, address: Address) -> Result<TypeHandle, ProviderError> {
        Ok(self.object(address)?.type_id)
    }

    fn generation(&self, address: Address) -> Result<Generation, ProviderError> {
        Ok(self.object(address)?.generation)
    }

    fn type_name(&self, ty: TypeHandle) -> Option<&str> {
        self.types
            .get(&ty)
            .and_then(|&i| self.snapshot.types[i].name.as_deref())
    }

    fn base_type(&self, ty: TypeHandle) -> Option<TypeHandle> {
        self.types.get(&ty).and_then(|&i| self.snapshot.types[i].base)
    }

    fn type_by_name(&self, name: &str) -> Option<TypeHandle> {
        self.types_by_name.get(name).copied()
    }

    fn read_field(&self, address: Address, field: &str) -> Result<Value, ProviderError> {
        self.object(address)?
            .fields
            .get(field)
            .copied()
            .ok_or_else(|| ProviderError::MissingField {
                address,
                field: field.to_string(),
            })
    }

    fn static_field(&self, ty: TypeHandle, field: &str) -> Result<Option<Value>, ProviderError> {
        let record = self
            .types
            .get(&ty)
            .map(|&i| &self.snapshot.types[i])
            .ok_or_else(|| {
                ProviderError::MissingStatic(format!("{:#x}", ty.0), field.to_string())
            })?;
        Ok(record.statics.get(field).copied())
    }

    fn array_length(&self, address: Address) -> Result<usize, ProviderError> {
        Ok(self.elements(address)?.len())
    }

    fn array_element(&self, address: Address, index: usize) -> Result<Value, ProviderError> {
        self.element(address, index)
    }

    fn array_element_address(&self, address: Address, index: usize) -> Result<Address, ProviderError> {
        Ok(self.element(address, index)?.as_address())
    }

    fn method_by_address(&self, code: Address) -> Option<MethodInfo> {
        self.methods.get(&code).map(|&i| {
            let m = &self.snapshot.methods[i];
            MethodInfo {
                type_name: m.type_name.clone(),
                name: m.name.clone(),
            }
        })
    }
}

const FIRST_OBJECT_ADDRESS: Address = 0x1000;
const OBJECT_STRIDE: Address = 0x20;
const FIRST_METHOD_ADDRESS: Address = 0x7f00_0000;

/// Assembles a [`HeapSnapshot`] in code
///
/// Addresses and type handles are allocated sequentially, so a builder
/// driven the same way always produces the same snapshot.
#[derive(Debug)]
pub struct SnapshotBuilder {
    flavor: ClrFlavor,
    snapshot: HeapSnapshot,
    next_type: u64,
    next_object: Address,
    next_method: Address,
    object_index: HashMap<Address, usize>,
}

impl SnapshotBuilder {
    /// Start a snapshot for the given flavor, with its core library loaded
    pub fn new(flavor: ClrFlavor) -> Self {
        let corelib = match flavor {
            ClrFlavor::Core => "System.Private.CoreLib.dll",
            ClrFlavor::Desktop => "mscorlib.dll",
        };
        Self {
            flavor,
            snapshot: HeapSnapshot {
                runtime: Some(RuntimeInfo {
                    flavor,
                    version: String::new(),
                }),
                modules: vec![ModuleInfo {
                    assembly_name: corelib.to_string(),
                }],
                ..Default::default()
            },
            next_type: 1,
            next_object: FIRST_OBJECT_ADDRESS,
            next_method: FIRST_METHOD_ADDRESS,
            object_index: HashMap::new(),
        }
    }

    pub fn add_type(&mut self, name: &str, base: Option<TypeHandle>) -> TypeHandle {
        self.push_type(Some(name.to_string()), base)
    }

    pub fn add_anonymous_type(&mut self, base: Option<TypeHandle>) -> TypeHandle {
        self.push_type(None, base)
    }

    fn push_type(&mut self, name: Option<String>, base: Option<TypeHandle>) -> TypeHandle {
        let id = TypeHandle(self.next_type);
        self.next_type += 1;
        self.snapshot.types.push(TypeRecord {
            id,
            name,
            base,
            statics: BTreeMap::new(),
        });
        id
    }

    pub fn set_static(&mut self, ty: TypeHandle, field: &str, value: Value) -> &mut Self {
        if let Some(record) = self.snapshot.types.iter_mut().find(|t| t.id == ty) {
            record.statics.insert(field.to_string(), value);
        }
        self
    }

    pub fn add_object(&mut self, ty: TypeHandle, generation: Generation) -> Address {
        self.push_object(ty, generation, None)
    }

    pub fn add_array(&mut self, ty: TypeHandle, elements: Vec<Value>) -> Address {
        self.push_object(ty, 0, Some(elements))
    }

    fn push_object(&mut self, ty: TypeHandle, generation: Generation, elements: Option<Vec<Value>>) -> Address {
        let address = self.next_object;
        self.next_object += OBJECT_STRIDE;
        self.object_index.insert(address, self.snapshot.objects.len());
        self.snapshot.objects.push(ObjectRecord {
            address,
            type_id: ty,
            generation,
            fields: BTreeMap::new(),
            elements,
            unreadable: false,
        });
        address
    }

    pub fn set_field(&mut self, address: Address, field: &str, value: Value) -> &mut Self {
        if let Some(&i) = self.object_index.get(&address) {
            self.snapshot.objects[i].fields.insert(field.to_string(), value);
        }
        self
    }

    pub fn set_elements(&mut self, address: Address, elements: Vec<Value>) -> &mut Self {
        if let Some(&i) = self.object_index.get(&address) {
            self.snapshot.objects[i].elements = Some(elements);
        }
        self
    }

    pub fn mark_unreadable(&mut self, address: Address) -> &mut Self {
        if let Some(&i) = self.object_index.get(&address) {
            self.snapshot.objects[i].unreadable = true;
        }
        self
    }

    /// Register a method and return its code address
    pub fn add_method(&mut self, type_name: &str, name: &str) -> Address {
        let address = self.next_method;
        self.next_method += OBJECT_STRIDE;
        self.snapshot.methods.push(MethodRecord {
            address,
            type_name: type_name.to_string(),
            name: name.to_string(),
        });
        address
    }

    pub fn add_thread(&mut self, thread: ThreadInfo) -> &mut Self {
        self.snapshot.threads.push(thread);
        self
    }

    pub fn add_handle(&mut self, handle: HandleInfo) -> &mut Self {
        self.snapshot.handles.push(handle);
        self
    }

    pub fn snapshot(&self) -> &HeapSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> HeapSnapshot {
        self.snapshot
    }

    pub fn build(self) -> SnapshotProvider {
        SnapshotProvider::index(self.flavor, self.snapshot)
    }
}
