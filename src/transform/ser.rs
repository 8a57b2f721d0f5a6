//! Structural decomposition through `serde::Serialize`
//!
//! Derived `Serialize` impls stand in for runtime reflection: primitives
//! and sequences always convert, while structs and data-carrying enum
//! variants convert only when reflection is enabled. Every nested value
//! (elements, fields, map keys and values, `Some` and newtype payloads)
//! goes back through [`Transformer::dispatch`] so adapters apply at any
//! depth.

use serde::ser::{
    self, Serialize, SerializeMap, SerializeSeq, SerializeStruct, SerializeStructVariant,
    SerializeTuple, SerializeTupleStruct, SerializeTupleVariant,
};
use tally_wire::Value;

use super::{TransformError, Transformer};

type Result<T> = std::result::Result<T, TransformError>;

#[derive(Clone, Copy)]
pub(crate) struct ValueSerializer<'t> {
    transformer: &'t Transformer,
}

impl<'t> ValueSerializer<'t> {
    pub(crate) fn new(transformer: &'t Transformer) -> Self {
        Self { transformer }
    }

    fn nested<T: ?Sized + Serialize>(&self, value: &T) -> Result<Value> {
        self.transformer.dispatch(value)
    }

    fn structural(&self, name: &'static str) -> Result<()> {
        if self.transformer.reflection() {
            Ok(())
        } else {
            Err(TransformError::Unhandled(name.to_string()))
        }
    }

    fn integer<N: TryInto<i64> + ToString + Copy>(&self, v: N) -> Result<Value> {
        v.try_into()
            .map(Value::Integer)
            .map_err(|_| TransformError::OutOfRange(v.to_string()))
    }
}

/// Serialize a member value; `Ok(None)` means "omit the member".
fn member<T: ?Sized + Serialize>(ser: ValueSerializer<'_>, value: &T) -> Result<Option<Value>> {
    match ser.nested(value) {
        Ok(v) => Ok(Some(v)),
        Err(TransformError::Null) => Ok(None),
        Err(e) => Err(e),
    }
}

impl<'t> ser::Serializer for ValueSerializer<'t> {
    type Ok = Value;
    type Error = TransformError;
    type SerializeSeq = SeqCollector<'t>;
    type SerializeTuple = SeqCollector<'t>;
    type SerializeTupleStruct = SeqCollector<'t>;
    type SerializeTupleVariant = VariantCollector<SeqCollector<'t>>;
    type SerializeMap = MapCollector<'t>;
    type SerializeStruct = MapCollector<'t>;
    type SerializeStructVariant = VariantCollector<MapCollector<'t>>;

    fn serialize_bool(self, v: bool) -> Result<Value> {
        Ok(Value::Boolean(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value> {
        Ok(Value::Integer(i64::from(v)))
    }

    fn serialize_i16(self, v: i16) -> Result<Value> {
        Ok(Value::Integer(i64::from(v)))
    }

    fn serialize_i32(self, v: i32) -> Result<Value> {
        Ok(Value::Integer(i64::from(v)))
    }

    fn serialize_i64(self, v: i64) -> Result<Value> {
        Ok(Value::Integer(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Value> {
        self.integer(v)
    }

    fn serialize_u8(self, v: u8) -> Result<Value> {
        Ok(Value::Integer(i64::from(v)))
    }

    fn serialize_u16(self, v: u16) -> Result<Value> {
        Ok(Value::Integer(i64::from(v)))
    }

    fn serialize_u32(self, v: u32) -> Result<Value> {
        Ok(Value::Integer(i64::from(v)))
    }

    fn serialize_u64(self, v: u64) -> Result<Value> {
        self.integer(v)
    }

    fn serialize_u128(self, v: u128) -> Result<Value> {
        self.integer(v)
    }

    fn serialize_f32(self, v: f32) -> Result<Value> {
        Ok(Value::Decimal(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Result<Value> {
        Ok(Value::Decimal(v))
    }

    fn serialize_char(self, v: char) -> Result<Value> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value> {
        Ok(Value::Array(
            v.iter().map(|b| Value::Integer(i64::from(*b))).collect(),
        ))
    }

    fn serialize_none(self) -> Result<Value> {
        Err(TransformError::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Value> {
        self.nested(value)
    }

    fn serialize_unit(self) -> Result<Value> {
        Err(TransformError::Null)
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<Value> {
        self.structural(name)?;
        Ok(Value::Object(Vec::new()))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Value> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Value> {
        self.nested(value)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value> {
        self.structural(name)?;
        let inner = member(self, value)?;
        Ok(Value::Object(
            inner.map(|v| (variant.to_string(), v)).into_iter().collect(),
        ))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqCollector<'t>> {
        Ok(SeqCollector::new(self, len))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqCollector<'t>> {
        Ok(SeqCollector::new(self, Some(len)))
    }

    fn serialize_tuple_struct(self, name: &'static str, len: usize) -> Result<SeqCollector<'t>> {
        self.structural(name)?;
        Ok(SeqCollector::new(self, Some(len)))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantCollector<SeqCollector<'t>>> {
        self.structural(name)?;
        Ok(VariantCollector {
            variant,
            inner: SeqCollector::new(self, Some(len)),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapCollector<'t>> {
        Ok(MapCollector::new(self, len))
    }

    fn serialize_struct(self, name: &'static str, len: usize) -> Result<MapCollector<'t>> {
        self.structural(name)?;
        Ok(MapCollector::new(self, Some(len)))
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantCollector<MapCollector<'t>>> {
        self.structural(name)?;
        Ok(VariantCollector {
            variant,
            inner: MapCollector::new(self, Some(len)),
        })
    }
}

pub(crate) struct SeqCollector<'t> {
    ser: ValueSerializer<'t>,
    items: Vec<Value>,
}

impl<'t> SeqCollector<'t> {
    fn new(ser: ValueSerializer<'t>, len: Option<usize>) -> Self {
        Self {
            ser,
            items: Vec::with_capacity(len.unwrap_or(0)),
        }
    }

    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.items.push(self.ser.nested(value)?);
        Ok(())
    }

    fn finish(self) -> Value {
        Value::Array(self.items)
    }
}

impl SerializeSeq for SeqCollector<'_> {
    type Ok = Value;
    type Error = TransformError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl SerializeTuple for SeqCollector<'_> {
    type Ok = Value;
    type Error = TransformError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl SerializeTupleStruct for SeqCollector<'_> {
    type Ok = Value;
    type Error = TransformError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

pub(crate) struct MapCollector<'t> {
    ser: ValueSerializer<'t>,
    members: Vec<(String, Value)>,
    pending_key: Option<String>,
}

impl<'t> MapCollector<'t> {
    fn new(ser: ValueSerializer<'t>, len: Option<usize>) -> Self {
        Self {
            ser,
            members: Vec::with_capacity(len.unwrap_or(0)),
            pending_key: None,
        }
    }

    fn put<T: ?Sized + Serialize>(&mut self, key: String, value: &T) -> Result<()> {
        if let Some(value) = member(self.ser, value)? {
            match self.members.iter_mut().find(|(k, _)| *k == key) {
                Some((_, slot)) => *slot = value,
                None => self.members.push((key, value)),
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        Value::Object(self.members)
    }
}

fn key_string<T: ?Sized + Serialize>(ser: ValueSerializer<'_>, key: &T) -> Result<String> {
    match ser.nested(key)? {
        Value::String(s) => Ok(s),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Decimal(d) => Ok(d.to_string()),
        other => Err(TransformError::Custom(format!(
            "map keys must be scalars, found {}",
            other.kind()
        ))),
    }
}

impl SerializeMap for MapCollector<'_> {
    type Ok = Value;
    type Error = TransformError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<()> {
        self.pending_key = Some(key_string(self.ser, key)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| TransformError::Custom("map value without a key".to_string()))?;
        self.put(key, value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

impl SerializeStruct for MapCollector<'_> {
    type Ok = Value;
    type Error = TransformError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Result<()> {
        self.put(key.to_string(), value)
    }

    fn end(self) -> Result<Value> {
        Ok(self.finish())
    }
}

/// Wraps the collected variant body as `{ variant: body }`.
pub(crate) struct VariantCollector<C> {
    variant: &'static str,
    inner: C,
}

impl<C> VariantCollector<C> {
    fn wrap(variant: &'static str, body: Value) -> Value {
        Value::Object(vec![(variant.to_string(), body)])
    }
}

impl SerializeTupleVariant for VariantCollector<SeqCollector<'_>> {
    type Ok = Value;
    type Error = TransformError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.inner.push(value)
    }

    fn end(self) -> Result<Value> {
        Ok(Self::wrap(self.variant, self.inner.finish()))
    }
}

impl SerializeStructVariant for VariantCollector<MapCollector<'_>> {
    type Ok = Value;
    type Error = TransformError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Result<()> {
        self.inner.put(key.to_string(), value)
    }

    fn end(self) -> Result<Value> {
        Ok(Self::wrap(self.variant, self.inner.finish()))
    }
}
