//! Type conversion resolution between connected data ports
//!
//! When an output of type `From` is connected to an input of type `To`,
//! the resolver decides whether the pair can connect and with which
//! function values are carried across. Rules are tried in order and the
//! first match wins:
//!
//! 1. a custom conversion registered for the exact pair
//! 2. identity (`From == To`)
//! 3. upcast into [`AnyValue`], the supertype of every data type
//! 4. nullable wrap (`To == Option<From>`)
//! 5. lossless numeric widening from a fixed table
//!
//! Anything else is rejected. Results, negative ones included, are cached
//! per ordered type pair for the lifetime of the resolver. The process-wide
//! resolver returned by [`global`] is what graphs use unless they are given
//! their own.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::value::{AnyValue, BoxValue, DataType, DynValue, ValueType};

type TypePair = (TypeId, TypeId);

/// Type-erased conversion function
pub type ConvertFn = Arc<dyn Fn(&dyn DynValue) -> Option<BoxValue> + Send + Sync>;

/// Which rule produced a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionKind {
    Identity,
    Upcast,
    NullableWrap,
    Widening,
    Custom,
}

/// A resolved conversion from one value type to another
#[derive(Clone)]
pub struct Conversion {
    kind: ConversionKind,
    from: ValueType,
    to: ValueType,
    func: ConvertFn,
}

impl Conversion {
    fn new(kind: ConversionKind, from: ValueType, to: ValueType, func: ConvertFn) -> Self {
        Self {
            kind,
            from,
            to,
            func,
        }
    }

    fn identity(ty: ValueType) -> Self {
        Self::new(
            ConversionKind::Identity,
            ty,
            ty,
            Arc::new(|value: &dyn DynValue| Some(value.clone_value())),
        )
    }

    fn upcast(from: ValueType) -> Self {
        Self::new(
            ConversionKind::Upcast,
            from,
            ValueType::of::<AnyValue>(),
            Arc::new(|value: &dyn DynValue| {
                Some(Box::new(AnyValue::from_boxed(value.clone_value())) as BoxValue)
            }),
        )
    }

    fn widening<F, T>() -> Self
    where
        F: DataType + Copy,
        T: DataType + From<F>,
    {
        Self::new(
            ConversionKind::Widening,
            ValueType::of::<F>(),
            ValueType::of::<T>(),
            Arc::new(|value: &dyn DynValue| {
                value
                    .downcast_ref::<F>()
                    .map(|v| Box::new(T::from(*v)) as BoxValue)
            }),
        )
    }

    pub fn kind(&self) -> ConversionKind {
        self.kind
    }

    pub fn from_type(&self) -> ValueType {
        self.from
    }

    pub fn to_type(&self) -> ValueType {
        self.to
    }

    /// Convert a value
    ///
    /// Returns `None` when the value is not of this conversion's source type.
    pub fn apply(&self, value: &dyn DynValue) -> Option<BoxValue> {
        if value.value_type() != self.from {
            return None;
        }
        (self.func)(value)
    }
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversion")
            .field("kind", &self.kind)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

macro_rules! widenings {
    ($($from:ty => [$($to:ty),+]);+ $(;)?) => {{
        let mut table: HashMap<TypePair, Conversion> = HashMap::new();
        $($(
            table.insert(
                (TypeId::of::<$from>(), TypeId::of::<$to>()),
                Conversion::widening::<$from, $to>(),
            );
        )+)+
        table
    }};
}

/// Lossless numeric promotions, one entry per standard `From` impl
static WIDENINGS: Lazy<HashMap<TypePair, Conversion>> = Lazy::new(|| {
    widenings! {
        i8 => [i16, i32, i64, f32, f64];
        u8 => [u16, u32, u64, i16, i32, i64, f32, f64];
        i16 => [i32, i64, f32, f64];
        u16 => [u32, u64, i32, i64, f32, f64];
        i32 => [i64, f64];
        u32 => [u64, i64, f64];
        f32 => [f64];
        char => [u32, u64];
    }
});

static GLOBAL: Lazy<Arc<ConversionResolver>> = Lazy::new(|| Arc::new(ConversionResolver::new()));

/// The process-wide resolver
pub fn global() -> Arc<ConversionResolver> {
    GLOBAL.clone()
}

/// Resolves and caches conversions between value types
#[derive(Default)]
pub struct ConversionResolver {
    custom: RwLock<HashMap<TypePair, Conversion>>,
    cache: RwLock<HashMap<TypePair, Option<Conversion>>>,
}

impl ConversionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom conversion for `F -> T`
    ///
    /// Takes precedence over the automatic rules for that pair and replaces
    /// any result already cached for it. Connections made earlier keep the
    /// conversion they were created with.
    pub fn register<F, T>(&self, convert: impl Fn(&F) -> T + Send + Sync + 'static)
    where
        F: DataType,
        T: DataType,
    {
        let from = ValueType::of::<F>();
        let to = ValueType::of::<T>();
        let conversion = Conversion::new(
            ConversionKind::Custom,
            from,
            to,
            Arc::new(move |value: &dyn DynValue| {
                value
                    .downcast_ref::<F>()
                    .map(|v| Box::new(convert(v)) as BoxValue)
            }),
        );
        let key = (from.id(), to.id());
        log::debug!("Registered custom conversion {} -> {}", from, to);
        self.custom.write().insert(key, conversion.clone());
        self.cache.write().insert(key, Some(conversion));
    }

    /// Find the conversion for `from -> to`, or `None` if the pair cannot connect
    pub fn resolve(&self, from: ValueType, to: ValueType) -> Option<Conversion> {
        let key = (from.id(), to.id());
        if let Some(cached) = self.cache.read().get(&key) {
            return cached.clone();
        }

        let resolved = self.build(from, to);
        match &resolved {
            Some(conversion) => {
                log::debug!("Resolved {} -> {} ({:?})", from, to, conversion.kind())
            }
            None => log::debug!("No conversion {} -> {}", from, to),
        }

        self.store(key, resolved)
    }

    /// Cache a computed result. The last write wins, except over a custom
    /// conversion registered for the pair while the result was computed.
    fn store(&self, key: TypePair, resolved: Option<Conversion>) -> Option<Conversion> {
        let mut cache = self.cache.write();
        let resolved = self.custom.read().get(&key).cloned().or(resolved);
        cache.insert(key, resolved.clone());
        resolved
    }

    /// Typed shorthand for [`resolve`](Self::resolve)
    pub fn resolve_types<F: DataType, T: DataType>(&self) -> Option<Conversion> {
        self.resolve(ValueType::of::<F>(), ValueType::of::<T>())
    }

    pub fn can_convert(&self, from: ValueType, to: ValueType) -> bool {
        self.resolve(from, to).is_some()
    }

    /// Number of type pairs resolved so far
    pub fn cached_pairs(&self) -> usize {
        self.cache.read().len()
    }

    fn build(&self, from: ValueType, to: ValueType) -> Option<Conversion> {
        let key = (from.id(), to.id());
        if let Some(custom) = self.custom.read().get(&key) {
            return Some(custom.clone());
        }
        if from == to {
            return Some(Conversion::identity(from));
        }
        if to.is::<AnyValue>() {
            return Some(Conversion::upcast(from));
        }
        if let Some(nullable) = to.nullable() {
            if (nullable.inner)() == from {
                return Some(Conversion::new(
                    ConversionKind::NullableWrap,
                    from,
                    to,
                    Arc::new(nullable.wrap),
                ));
            }
        }
        WIDENINGS.get(&key).cloned()
    }
}
