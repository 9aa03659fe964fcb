//! Reference cache for host types and their conversion methods.
//!
//! Marshalling a `&dyn Any` into the interpreter needs to know which host
//! type it is and how to turn it into a [`Value`]. Resolving that on every
//! push would be wasteful, so the bridge resolves every type it understands
//! once per process (at the first [`attach`]) and keeps long-lived
//! [`ClassRef`] handles until the last [`Attachment`] goes away.
//!
//! Resolution goes through the [`HostRuntime`] trait so a failing runtime can
//! be exercised in isolation; the process cache always uses
//! [`NativeRuntime`].

use core_types::{AttachError, Value};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the single conversion method every cached type exposes.
pub const CONVERT_METHOD: &str = "to_lua";

/// Shape of the value a conversion method produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionKind {
    /// Always `nil`
    Nil,
    /// Boolean
    Boolean,
    /// Integer, falling back to a float when out of range
    Integer,
    /// Float
    Number,
    /// String
    String,
    /// Sequence of further host values
    Sequence,
    /// Already a [`Value`]
    Value,
}

impl ConversionKind {
    /// Method signature for this kind of conversion.
    pub fn signature(self) -> &'static str {
        match self {
            ConversionKind::Nil => "(&self) -> nil",
            ConversionKind::Boolean => "(&self) -> boolean",
            ConversionKind::Integer => "(&self) -> integer",
            ConversionKind::Number => "(&self) -> number",
            ConversionKind::String => "(&self) -> string",
            ConversionKind::Sequence => "(&self) -> table",
            ConversionKind::Value => "(&self) -> value",
        }
    }
}

/// A conversion method body.
#[derive(Clone, Copy)]
pub enum Conversion {
    /// Produces `nil`
    Nil,
    /// Reads a boolean
    Boolean(fn(&dyn Any) -> Option<bool>),
    /// Reads an integer (or out-of-range float)
    Integer(fn(&dyn Any) -> Option<Value>),
    /// Reads a float
    Number(fn(&dyn Any) -> Option<f64>),
    /// Borrows a string
    String(fn(&dyn Any) -> Option<&str>),
    /// Borrows the elements of a sequence
    Sequence(fn(&dyn Any) -> Option<Vec<&dyn Any>>),
    /// Clones a ready-made value
    Value(fn(&dyn Any) -> Option<Value>),
}

impl Conversion {
    /// Kind of value this conversion produces.
    pub fn kind(&self) -> ConversionKind {
        match self {
            Conversion::Nil => ConversionKind::Nil,
            Conversion::Boolean(_) => ConversionKind::Boolean,
            Conversion::Integer(_) => ConversionKind::Integer,
            Conversion::Number(_) => ConversionKind::Number,
            Conversion::String(_) => ConversionKind::String,
            Conversion::Sequence(_) => ConversionKind::Sequence,
            Conversion::Value(_) => ConversionKind::Value,
        }
    }
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conversion::{:?}", self.kind())
    }
}

/// A resolved method on a host type.
#[derive(Debug, Clone, Copy)]
pub struct MethodHandle {
    /// Name of the owning type
    pub owner: &'static str,
    /// Method name
    pub name: &'static str,
    /// Method signature
    pub signature: &'static str,
    /// Whether the method takes no receiver
    pub is_static: bool,
    /// Method body
    pub conversion: Conversion,
}

/// A resolved host type.
#[derive(Debug)]
pub struct HostClass {
    name: &'static str,
    type_id: TypeId,
    methods: Vec<MethodHandle>,
}

impl HostClass {
    /// Symbolic name of the type.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runtime identity of the type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Methods the type exposes.
    pub fn methods(&self) -> &[MethodHandle] {
        &self.methods
    }
}

/// Long-lived handle to a resolved host type.
pub type ClassRef = Arc<HostClass>;

/// Resolves host types and methods by symbolic name.
pub trait HostRuntime {
    /// Looks up a type by name, acquiring a long-lived handle.
    fn find_class(&self, name: &str) -> Option<ClassRef>;

    /// Looks up a method on a previously resolved type.
    fn get_method(
        &self,
        class: &ClassRef,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<MethodHandle>;
}

/// The Rust host universe: primitives, strings, sequences and [`Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeRuntime;

struct ClassSpec {
    name: &'static str,
    type_id: fn() -> TypeId,
    conversion: Conversion,
}

fn integer<T: ToPrimitive + 'static>(value: &dyn Any) -> Option<Value> {
    let n = value.downcast_ref::<T>()?;
    Some(match n.to_i64() {
        Some(i) => Value::Integer(i),
        None => Value::Number(n.to_f64().unwrap_or(f64::NAN)),
    })
}

fn number<T: ToPrimitive + 'static>(value: &dyn Any) -> Option<f64> {
    value.downcast_ref::<T>().and_then(ToPrimitive::to_f64)
}

fn elements<T: Any>(value: &dyn Any) -> Option<Vec<&dyn Any>> {
    value
        .downcast_ref::<Vec<T>>()
        .map(|items| items.iter().map(|item| item as &dyn Any).collect())
}

fn boxed_elements(value: &dyn Any) -> Option<Vec<&dyn Any>> {
    value
        .downcast_ref::<Vec<Box<dyn Any>>>()
        .map(|items| items.iter().map(|item| &**item).collect())
}

fn static_str(value: &dyn Any) -> Option<&str> {
    value.downcast_ref::<&'static str>().copied()
}

fn owned_str(value: &dyn Any) -> Option<&str> {
    value.downcast_ref::<String>().map(String::as_str)
}

fn boolean(value: &dyn Any) -> Option<bool> {
    value.downcast_ref::<bool>().copied()
}

fn ready_value(value: &dyn Any) -> Option<Value> {
    value.downcast_ref::<Value>().cloned()
}

fn value_array(value: &dyn Any) -> Option<Value> {
    value
        .downcast_ref::<Vec<Value>>()
        .map(|items| Value::Array(items.clone()))
}

macro_rules! class {
    ($name:expr, $ty:ty, $conversion:expr) => {
        ClassSpec {
            name: $name,
            type_id: TypeId::of::<$ty>,
            conversion: $conversion,
        }
    };
}

fn native_classes() -> [ClassSpec; 26] {
    [
        class!("()", (), Conversion::Nil),
        class!("bool", bool, Conversion::Boolean(boolean)),
        class!("i8", i8, Conversion::Integer(integer::<i8>)),
        class!("i16", i16, Conversion::Integer(integer::<i16>)),
        class!("i32", i32, Conversion::Integer(integer::<i32>)),
        class!("i64", i64, Conversion::Integer(integer::<i64>)),
        class!("i128", i128, Conversion::Integer(integer::<i128>)),
        class!("isize", isize, Conversion::Integer(integer::<isize>)),
        class!("u8", u8, Conversion::Integer(integer::<u8>)),
        class!("u16", u16, Conversion::Integer(integer::<u16>)),
        class!("u32", u32, Conversion::Integer(integer::<u32>)),
        class!("u64", u64, Conversion::Integer(integer::<u64>)),
        class!("u128", u128, Conversion::Integer(integer::<u128>)),
        class!("usize", usize, Conversion::Integer(integer::<usize>)),
        class!("BigInt", BigInt, Conversion::Integer(integer::<BigInt>)),
        class!("f32", f32, Conversion::Number(number::<f32>)),
        class!("f64", f64, Conversion::Number(number::<f64>)),
        class!("&str", &'static str, Conversion::String(static_str)),
        class!("String", String, Conversion::String(owned_str)),
        class!("Vec<Box<dyn Any>>", Vec<Box<dyn Any>>, Conversion::Sequence(boxed_elements)),
        class!("Vec<bool>", Vec<bool>, Conversion::Sequence(elements::<bool>)),
        class!("Vec<i64>", Vec<i64>, Conversion::Sequence(elements::<i64>)),
        class!("Vec<f64>", Vec<f64>, Conversion::Sequence(elements::<f64>)),
        class!("Vec<String>", Vec<String>, Conversion::Sequence(elements::<String>)),
        class!("Vec<Value>", Vec<Value>, Conversion::Value(value_array)),
        class!("Value", Value, Conversion::Value(ready_value)),
    ]
}

impl HostRuntime for NativeRuntime {
    fn find_class(&self, name: &str) -> Option<ClassRef> {
        let spec = native_classes().into_iter().find(|spec| spec.name == name)?;
        let method = MethodHandle {
            owner: spec.name,
            name: CONVERT_METHOD,
            signature: spec.conversion.kind().signature(),
            is_static: false,
            conversion: spec.conversion,
        };
        Some(Arc::new(HostClass {
            name: spec.name,
            type_id: (spec.type_id)(),
            methods: vec![method],
        }))
    }

    fn get_method(
        &self,
        class: &ClassRef,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<MethodHandle> {
        class
            .methods
            .iter()
            .find(|m| m.name == name && m.signature == signature && m.is_static == is_static)
            .copied()
    }
}

/// Every type the bridge marshals, with the conversion each must expose.
pub const REQUIRED_TYPES: &[(&str, ConversionKind)] = &[
    ("()", ConversionKind::Nil),
    ("bool", ConversionKind::Boolean),
    ("i8", ConversionKind::Integer),
    ("i16", ConversionKind::Integer),
    ("i32", ConversionKind::Integer),
    ("i64", ConversionKind::Integer),
    ("i128", ConversionKind::Integer),
    ("isize", ConversionKind::Integer),
    ("u8", ConversionKind::Integer),
    ("u16", ConversionKind::Integer),
    ("u32", ConversionKind::Integer),
    ("u64", ConversionKind::Integer),
    ("u128", ConversionKind::Integer),
    ("usize", ConversionKind::Integer),
    ("BigInt", ConversionKind::Integer),
    ("f32", ConversionKind::Number),
    ("f64", ConversionKind::Number),
    ("&str", ConversionKind::String),
    ("String", ConversionKind::String),
    ("Vec<Box<dyn Any>>", ConversionKind::Sequence),
    ("Vec<bool>", ConversionKind::Sequence),
    ("Vec<i64>", ConversionKind::Sequence),
    ("Vec<f64>", ConversionKind::Sequence),
    ("Vec<String>", ConversionKind::Sequence),
    ("Vec<Value>", ConversionKind::Value),
    ("Value", ConversionKind::Value),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    owner: String,
    name: String,
    signature: String,
    is_static: bool,
}

/// Resolved types and methods, keyed by name and by runtime type.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    types: HashMap<&'static str, ClassRef>,
    by_type_id: HashMap<TypeId, ClassRef>,
    methods: HashMap<MethodKey, MethodHandle>,
}

impl ReferenceCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        ReferenceCache::default()
    }

    /// Resolves every type in [`REQUIRED_TYPES`].
    ///
    /// All or nothing: on the first miss the handles acquired so far are
    /// released and the missing name is reported. Anything a previous
    /// population left behind is released first.
    pub fn cache_types(&mut self, runtime: &dyn HostRuntime) -> Result<(), AttachError> {
        if !self.is_empty() {
            self.release_all();
        }
        for (name, _) in REQUIRED_TYPES {
            let Some(class) = runtime.find_class(name) else {
                self.release_all();
                return Err(AttachError::MissingType((*name).to_string()));
            };
            self.by_type_id.insert(class.type_id, Arc::clone(&class));
            self.types.insert(class.name, class);
        }
        Ok(())
    }

    /// Resolves the conversion method of every cached type.
    ///
    /// Requires [`cache_types`](Self::cache_types) to have succeeded. Fails
    /// the same way on the first miss.
    pub fn cache_methods(&mut self, runtime: &dyn HostRuntime) -> Result<(), AttachError> {
        self.methods.clear();
        for (name, kind) in REQUIRED_TYPES {
            let signature = kind.signature();
            let method = self
                .types
                .get(name)
                .and_then(|class| runtime.get_method(class, CONVERT_METHOD, signature, false));
            let Some(method) = method else {
                self.release_all();
                return Err(AttachError::MissingMethod {
                    owner: (*name).to_string(),
                    name: CONVERT_METHOD.to_string(),
                    signature: signature.to_string(),
                });
            };
            self.methods.insert(
                MethodKey {
                    owner: (*name).to_string(),
                    name: CONVERT_METHOD.to_string(),
                    signature: signature.to_string(),
                    is_static: false,
                },
                method,
            );
        }
        Ok(())
    }

    /// Looks up a cached type by name.
    pub fn find_type(&self, name: &str) -> Option<&ClassRef> {
        self.types.get(name)
    }

    /// Looks up a cached type by runtime identity.
    pub fn find_type_of(&self, type_id: TypeId) -> Option<&ClassRef> {
        self.by_type_id.get(&type_id)
    }

    /// Looks up a cached method.
    pub fn find_method(
        &self,
        owner: &str,
        name: &str,
        signature: &str,
        is_static: bool,
    ) -> Option<&MethodHandle> {
        self.methods.get(&MethodKey {
            owner: owner.to_string(),
            name: name.to_string(),
            signature: signature.to_string(),
            is_static,
        })
    }

    /// The conversion method for a value's runtime type.
    pub fn conversion_for(&self, type_id: TypeId) -> Option<&MethodHandle> {
        let class = self.find_type_of(type_id)?;
        let method = class.methods.first()?;
        self.find_method(class.name, method.name, method.signature, method.is_static)
    }

    /// Releases every cached handle.
    pub fn release_all(&mut self) {
        let released = self.types.len();
        self.methods.clear();
        self.by_type_id.clear();
        self.types.clear();
        tracing::debug!(released, "reference cache released");
    }

    /// Returns whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.methods.is_empty()
    }

    /// Number of cached types.
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Number of cached methods.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

struct ProcessCache {
    attachments: usize,
    cache: Option<ReferenceCache>,
}

static PROCESS: RwLock<ProcessCache> = parking_lot::const_rwlock(ProcessCache {
    attachments: 0,
    cache: None,
});

/// Keeps the process cache populated while alive.
///
/// The first attachment populates the cache; dropping the last one releases
/// it.
#[derive(Debug)]
pub struct Attachment {
    _private: (),
}

/// Attaches to the process cache, populating it from [`NativeRuntime`] if
/// this is the first attachment.
pub fn attach() -> Result<Attachment, AttachError> {
    let mut process = PROCESS.write();
    if process.attachments == 0 {
        let mut cache = ReferenceCache::new();
        cache.cache_types(&NativeRuntime)?;
        cache.cache_methods(&NativeRuntime)?;
        tracing::debug!(
            types = cache.type_count(),
            methods = cache.method_count(),
            "reference cache populated"
        );
        process.cache = Some(cache);
    }
    process.attachments += 1;
    Ok(Attachment { _private: () })
}

impl Drop for Attachment {
    fn drop(&mut self) {
        let mut process = PROCESS.write();
        process.attachments -= 1;
        if process.attachments == 0 {
            if let Some(mut cache) = process.cache.take() {
                cache.release_all();
            }
        }
    }
}

/// Runs `f` against the populated process cache.
///
/// Returns `None` when no attachment is alive.
pub fn with_process_cache<R>(f: impl FnOnce(&ReferenceCache) -> R) -> Option<R> {
    let process = PROCESS.read();
    process.cache.as_ref().map(f)
}

/// Number of live attachments.
pub fn attachment_count() -> usize {
    PROCESS.read().attachments
}
