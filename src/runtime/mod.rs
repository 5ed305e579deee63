//! Runtime introspection provider.
//!
//! Everything the census engine knows about the inspected process comes
//! through the [`RuntimeProvider`] trait: threads and their frames, heap
//! object addresses, type descriptors, generations, handles and named field
//! reads. Attaching to a target ([`attach`]) yields a boxed provider.
//!
//! This crate ships one backend, [`snapshot::SnapshotProvider`], which
//! serves a JSON heap snapshot captured out of process.

pub mod attach;
pub mod snapshot;

use crate::utils::error::ProviderError;
use serde::{Deserialize, Serialize};

pub use attach::{attach, RuntimeSource, Target};
pub use snapshot::{HeapSnapshot, SnapshotBuilder, SnapshotProvider};

/// Address of an object (or embedded struct) in the inspected process
pub type Address = u64;

/// GC generation number
pub type Generation = u32;

/// Identity of a runtime type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeHandle(pub u64);

/// Runtime flavor, detected once at attach time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClrFlavor {
    /// .NET Core / .NET 5+
    Core,
    /// .NET Framework
    Desktop,
}

/// Raw value of a field, static field or array element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    #[default]
    Null,
    Ref(Address),
    Int(i64),
}

impl Value {
    /// Interpret the value as an address; null reads as zero.
    ///
    /// Integers are accepted too, since pointer-sized fields such as
    /// method pointers are stored as native integers.
    pub fn as_address(&self) -> Address {
        match *self {
            Value::Null => 0,
            Value::Ref(address) => address,
            Value::Int(raw) => raw as u64,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Null => Some(0),
            Value::Int(raw) => Some(raw),
            Value::Ref(_) => None,
        }
    }
}

/// A resolved method: declaring type plus method name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub type_name: String,
    pub name: String,
}

/// One raw stack frame as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    /// Managed method, absent for runtime/native transition frames
    #[serde(default)]
    pub method: Option<MethodInfo>,

    /// Runtime's own rendering of the frame
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    LocalVar,
    Pinning,
    Other,
}

/// An object referenced from a thread's stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRoot {
    pub object: Address,
    pub kind: RootKind,
}

/// A managed thread: frames innermost first, plus its stack roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub managed_id: u32,
    #[serde(default)]
    pub os_id: u32,
    #[serde(default)]
    pub frames: Vec<FrameInfo>,
    #[serde(default)]
    pub roots: Vec<StackRoot>,
}

/// A GC handle and the object it keeps alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleInfo {
    pub address: Address,
    #[serde(default)]
    pub object: Address,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub assembly_name: String,
}

/// Capability interface over an attached runtime.
///
/// Object graph walks through a provider are not thread-safe against each
/// other; a provider is owned and driven by a single thread.
pub trait RuntimeProvider {
    fn flavor(&self) -> ClrFlavor;

    fn modules(&self) -> Vec<ModuleInfo>;

    fn threads(&self) -> Vec<ThreadInfo>;

    fn handles(&self) -> Vec<HandleInfo>;

    /// Every object address on the managed heap, in heap order
    fn object_addresses(&self) -> Box<dyn Iterator<Item = Address> + '_>;

    fn object_type(&self, address: Address) -> Result<TypeHandle, ProviderError>;

    fn generation(&self, address: Address) -> Result<Generation, ProviderError>;

    /// Type name; `None` for anonymous types
    fn type_name(&self, ty: TypeHandle) -> Option<&str>;

    fn base_type(&self, ty: TypeHandle) -> Option<TypeHandle>;

    fn type_by_name(&self, name: &str) -> Option<TypeHandle>;

    fn read_field(&self, address: Address, field: &str) -> Result<Value, ProviderError>;

    /// Read a field of a struct embedded at `address` (array slot, padded
    /// field), with the strongest consistency the backend offers.
    fn read_interior_field(&self, address: Address, field: &str) -> Result<Value, ProviderError> {
        self.read_field(address, field)
    }

    /// Static field value; `Ok(None)` when the static is not initialized
    fn static_field(&self, ty: TypeHandle, field: &str) -> Result<Option<Value>, ProviderError>;

    fn array_length(&self, address: Address) -> Result<usize, ProviderError>;

    fn array_element(&self, address: Address, index: usize) -> Result<Value, ProviderError>;

    /// Address of an embedded struct element, for arrays of value types
    fn array_element_address(&self, address: Address, index: usize) -> Result<Address, ProviderError>;

    fn method_by_address(&self, code: Address) -> Option<MethodInfo>;

    fn object_type_name(&self, address: Address) -> Result<Option<&str>, ProviderError> {
        let ty = self.object_type(address)?;
        Ok(self.type_name(ty))
    }

    fn read_address(&self, address: Address, field: &str) -> Result<Address, ProviderError> {
        Ok(self.read_field(address, field)?.as_address())
    }

    fn read_int(&self, address: Address, field: &str) -> Result<i64, ProviderError> {
        self.read_field(address, field)?
            .as_int()
            .ok_or_else(|| ProviderError::UnexpectedValue {
                address,
                field: field.to_string(),
                expected: "an integer",
            })
    }
}
