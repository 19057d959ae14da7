//! Values that travel through data ports
//!
//! Every port value implements [`DataType`]. Values are stored type-erased
//! as [`BoxValue`] and identified at runtime by [`ValueType`], which carries
//! the `TypeId`, a readable name, a JSON decoder for restoring snapshots and,
//! for `Option<T>`, the metadata the conversion resolver needs to wrap a
//! plain `T` into it.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value that can be carried by a data port
pub trait DataType:
    Any + Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned
{
    /// Nullable metadata when this type is an optional wrapper
    fn nullable() -> Option<Nullable> {
        None
    }

    /// Human-readable rendering used by port value inspection
    fn display(&self) -> String {
        format!("{:?}", self)
    }
}

/// Owned, type-erased port value
pub type BoxValue = Box<dyn DynValue>;

/// Object-safe view of a [`DataType`] value
pub trait DynValue: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn value_type(&self) -> ValueType;

    fn clone_value(&self) -> BoxValue;

    fn to_json(&self) -> serde_json::Result<serde_json::Value>;

    fn display_value(&self) -> String;
}

impl<T: DataType> DynValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn value_type(&self) -> ValueType {
        ValueType::of::<T>()
    }

    fn clone_value(&self) -> BoxValue {
        Box::new(self.clone())
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    fn display_value(&self) -> String {
        self.display()
    }
}

impl<'a> dyn DynValue + 'a {
    /// Borrow the concrete value if it has type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Whether the concrete value has type `T`
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl Clone for BoxValue {
    fn clone(&self) -> Self {
        self.clone_value()
    }
}

type DecodeFn = fn(serde_json::Value) -> serde_json::Result<BoxValue>;

/// Wraps a value of the inner type into its optional type
pub type WrapFn = fn(&dyn DynValue) -> Option<BoxValue>;

/// Describes an optional type `Option<T>` in terms of `T`
#[derive(Clone, Copy)]
pub struct Nullable {
    pub inner: fn() -> ValueType,
    pub wrap: WrapFn,
}

impl fmt::Debug for Nullable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nullable")
            .field("inner", &(self.inner)().name())
            .finish()
    }
}

/// Runtime identity of a port value type
///
/// Equality and hashing use only the `TypeId`.
#[derive(Clone, Copy)]
pub struct ValueType {
    id: TypeId,
    name: &'static str,
    decode: DecodeFn,
    nullable: Option<Nullable>,
}

impl ValueType {
    pub fn of<T: DataType>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            decode: decode_boxed::<T>,
            nullable: T::nullable(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn nullable(&self) -> Option<Nullable> {
        self.nullable
    }

    pub fn is<T: DataType>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Decode a JSON value into a boxed value of this type
    pub fn decode(&self, value: serde_json::Value) -> serde_json::Result<BoxValue> {
        (self.decode)(value)
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ValueType {}

impl Hash for ValueType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn decode_boxed<T: DataType>(value: serde_json::Value) -> serde_json::Result<BoxValue> {
    serde_json::from_value::<T>(value).map(|v| Box::new(v) as BoxValue)
}

fn wrap_some<T: DataType>(value: &dyn DynValue) -> Option<BoxValue> {
    value
        .downcast_ref::<T>()
        .map(|v| Box::new(Some(v.clone())) as BoxValue)
}

macro_rules! plain_data_types {
    ($($ty:ty),* $(,)?) => {
        $(impl DataType for $ty {})*
    };
}

plain_data_types!(bool, char, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl DataType for String {
    fn display(&self) -> String {
        self.clone()
    }
}

impl DataType for serde_json::Value {
    fn display(&self) -> String {
        self.to_string()
    }
}

impl<T: DataType> DataType for Vec<T> {
    fn display(&self) -> String {
        let items: Vec<String> = self.iter().map(DataType::display).collect();
        format!("[{}]", items.join(", "))
    }
}

impl<T: DataType> DataType for Option<T> {
    fn nullable() -> Option<Nullable> {
        Some(Nullable {
            inner: ValueType::of::<T>,
            wrap: wrap_some::<T>,
        })
    }

    fn display(&self) -> String {
        match self {
            Some(value) => value.display(),
            None => "null".to_string(),
        }
    }
}

/// The universal supertype: any data value, shared and type-erased
///
/// Every port type can be connected into an `AnyValue` input. Serializes as
/// the JSON form of the wrapped value and deserializes as a
/// `serde_json::Value`.
#[derive(Clone)]
pub struct AnyValue(Arc<dyn DynValue>);

impl AnyValue {
    pub fn new<T: DataType>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_boxed(value: BoxValue) -> Self {
        Self(Arc::from(value))
    }

    pub fn inner(&self) -> &dyn DynValue {
        &*self.0
    }

    /// Type of the wrapped value
    pub fn inner_type(&self) -> ValueType {
        self.0.value_type()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl Serialize for AnyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let json = self.0.to_json().map_err(serde::ser::Error::custom)?;
        json.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(AnyValue::new)
    }
}

impl DataType for AnyValue {
    fn display(&self) -> String {
        self.0.display_value()
    }
}
