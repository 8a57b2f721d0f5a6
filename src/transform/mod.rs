//! Conversion of host values into the captured value model
//!
//! Dispatch order for [`Transformer::transform`]:
//! 1. an adapter registered for the exact type
//! 2. built-in primitives (booleans, integers, floats, strings)
//! 3. sequences, element by element
//! 4. structural decomposition of `Serialize` types (structs, maps,
//!    enum variants), gated by the reflection flag for structs and enums
//!
//! `None` and `()` have no captured representation: as struct fields or
//! map values they are omitted, anywhere else they are an error.

mod ser;

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;

use serde::Serialize;
use tally_wire::Value;

use ser::ValueSerializer;

/// Errors raised while converting a value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    /// No adapter matched and reflection is disabled
    #[error("no serializer registered for type `{0}`")]
    Unhandled(String),

    /// A `None` or `()` outside of a struct field or map value
    #[error("no serializer registered for null values")]
    Null,

    /// An unsigned or 128-bit integer outside the signed 64-bit range
    #[error("integer {0} does not fit in a signed 64-bit value")]
    OutOfRange(String),

    #[error("{0}")]
    Custom(String),
}

impl serde::ser::Error for TransformError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        TransformError::Custom(msg.to_string())
    }
}

/// A value that can be handed to [`Transformer::transform`].
///
/// Every `Serialize` type qualifies, sized or not, so borrowed text and
/// slices can be captured directly.
pub trait Capturable: Serialize {}

impl<T: Serialize + ?Sized> Capturable for T {}

type Resolver = Box<dyn Fn(&Transformer) -> Result<Value, TransformError>>;

/// Named sub-values produced by an adapter.
///
/// Each entry re-enters [`Transformer::transform`]; the result is an
/// `Object` of the named entries in insertion order.
#[derive(Default)]
pub struct Context {
    entries: Vec<(String, Resolver)>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named entry.
    pub fn add<T: Capturable + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.entries
            .push((name.into(), Box::new(move |t: &Transformer| t.transform(&value))));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

/// What an adapter hands back
#[derive(Debug)]
pub enum Adapted {
    /// A finished value
    Value(Value),
    /// Named sub-values to transform in turn
    Context(Context),
}

/// Adapter with its argument type erased.
///
/// Must only be called with a pointer to a live value of the type the
/// adapter was registered for.
type AdapterFn = dyn Fn(*const ()) -> Adapted + Send + Sync;

/// `TypeId` of `T` with lifetimes erased.
///
/// Serde hands nested values over as `&T` without a `'static` bound, so
/// `TypeId::of` cannot be used there. Lifetimes do not take part in type
/// identity; for any `'static` type this equals `TypeId::of::<T>()`.
fn erased_type_id<T: ?Sized>() -> TypeId {
    trait NonStaticAny {
        fn get_type_id(&self) -> TypeId
        where
            Self: 'static;
    }

    impl<T: ?Sized> NonStaticAny for PhantomData<T> {
        fn get_type_id(&self) -> TypeId
        where
            Self: 'static,
        {
            TypeId::of::<T>()
        }
    }

    let phantom = PhantomData::<T>;
    // SAFETY: `PhantomData` holds no data, so nothing can be reached
    // through the extended lifetime; only the type id is read.
    let erased = unsafe {
        mem::transmute::<&dyn NonStaticAny, &(dyn NonStaticAny + 'static)>(&phantom)
    };
    erased.get_type_id()
}

/// Registry of type adapters plus the reflection switch.
#[derive(Clone)]
pub struct Transformer {
    reflection: bool,
    adapters: HashMap<TypeId, Arc<AdapterFn>>,
}

impl Transformer {
    /// Create a transformer with no adapters.
    pub fn new(reflection: bool) -> Self {
        Self {
            reflection,
            adapters: HashMap::new(),
        }
    }

    pub fn reflection(&self) -> bool {
        self.reflection
    }

    pub fn set_reflection(&mut self, reflection: bool) {
        self.reflection = reflection;
    }

    /// Register an adapter for exactly `T`, replacing any earlier one.
    ///
    /// The adapter applies wherever a `T` is met: as the captured value
    /// itself, or nested in a sequence, struct field, map value or
    /// `Option`. For a `T` with lifetime parameters (such as
    /// `&'static str`) nested values of that type may borrow for less
    /// than `'static`; such an adapter must not keep what it is handed
    /// beyond the call.
    pub fn add_adapter<T, F>(&mut self, adapter: F)
    where
        T: Any,
        F: Fn(&T) -> Adapted + Send + Sync + 'static,
    {
        let erased = move |ptr: *const ()| {
            // SAFETY: `apply` only passes pointers to a live `T`, found
            // under `TypeId::of::<T>()`.
            let value = unsafe { &*ptr.cast::<T>() };
            adapter(value)
        };
        self.adapters.insert(TypeId::of::<T>(), Arc::new(erased));
    }

    pub fn has_adapter<T: Any>(&self) -> bool {
        self.adapters.contains_key(&TypeId::of::<T>())
    }

    /// Convert `value` into a [`Value`].
    pub fn transform<T: Capturable + ?Sized>(&self, value: &T) -> Result<Value, TransformError> {
        self.dispatch(value)
    }

    /// Adapter lookup, then structural decomposition. Nested values of a
    /// decomposed value come back through here.
    pub(crate) fn dispatch<T: Serialize + ?Sized>(&self, value: &T) -> Result<Value, TransformError> {
        if let Some(adapted) = self.apply(erased_type_id::<T>(), value) {
            return self.resolve(adapted);
        }
        value.serialize(ValueSerializer::new(self))
    }

    /// Convert a value that only an adapter knows how to handle.
    ///
    /// Types without `Serialize` go through here; without a registered
    /// adapter the result names the type as unhandled.
    pub fn transform_any<T: Any>(&self, value: &T) -> Result<Value, TransformError> {
        match self.apply(TypeId::of::<T>(), value) {
            Some(adapted) => self.resolve(adapted),
            None => Err(TransformError::Unhandled(type_name::<T>().to_string())),
        }
    }

    /// Run the adapter registered under `id`. `id` must be the type id of
    /// `T` itself.
    fn apply<T: ?Sized>(&self, id: TypeId, value: &T) -> Option<Adapted> {
        if self.adapters.is_empty() {
            return None;
        }
        let adapter = self.adapters.get(&id)?;
        // adapters are only registered for sized types, so a match means
        // `value` is a thin pointer to exactly that type
        Some(adapter((value as *const T).cast::<()>()))
    }

    fn resolve(&self, adapted: Adapted) -> Result<Value, TransformError> {
        match adapted {
            Adapted::Value(value) => Ok(value),
            Adapted::Context(context) => {
                let mut out = Value::Object(Vec::with_capacity(context.len()));
                for (name, resolver) in context.entries {
                    out.insert(name, resolver(self)?);
                }
                Ok(out)
            }
        }
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("reflection", &self.reflection)
            .field("adapters", &self.adapters.len())
            .finish()
    }
}
