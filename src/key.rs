use std::collections::BTreeMap;

use parse_display::Display;
use serde::{ser, Serialize};


/// Derives a deterministic string key from any serializable argument value.
///
/// Object keys are visited in lexicographic order, so two values that differ only in
/// field or map-entry insertion order derive the same key.
/// Sequences are keyed like objects whose keys are their decimal indices.
///
/// | value | rendering |
/// |---|---|
/// | `()`, unit struct, JSON `null` | `(n)` |
/// | `None` | `(u)` |
/// | string, `char` | `:text;` |
/// | `bool`, number | `(value)` |
/// | struct, map, sequence | `{key<value>key<value>}` |
///
/// Map keys that are not strings or scalars are rendered to their key text and used as is.
///
/// # Panics
///
/// Panics if the value's `Serialize` implementation reports an error.
pub fn derive_key<T: Serialize + ?Sized>(value: &T) -> String {
    match value.serialize(KeySerializer) {
        Ok(node) => {
            let mut s = String::new();
            node.write_to(&mut s);
            s
        }
        Err(e) => panic!("failed to derive cache key: {e}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Undefined,
    Null,
    Literal(String),
    Str(String),
    Object(BTreeMap<String, Node>),
}

impl Node {
    fn write_to(&self, s: &mut String) {
        match self {
            Node::Undefined => s.push_str("(u)"),
            Node::Null => s.push_str("(n)"),
            Node::Literal(value) => {
                s.push('(');
                s.push_str(value);
                s.push(')');
            }
            Node::Str(value) => {
                s.push(':');
                s.push_str(value);
                s.push(';');
            }
            Node::Object(fields) => {
                s.push('{');
                for (key, value) in fields {
                    s.push_str(key);
                    value.write_to(s);
                }
                s.push('}');
            }
        }
    }
    fn into_map_key(self) -> String {
        match self {
            Node::Str(s) | Node::Literal(s) => s,
            Node::Null => "null".into(),
            Node::Undefined => "undefined".into(),
            node @ Node::Object(_) => {
                let mut s = String::new();
                node.write_to(&mut s);
                s
            }
        }
    }
    fn variant(variant: &str, inner: Node) -> Node {
        Node::Object(BTreeMap::from([(variant.to_string(), inner)]))
    }
}

fn float_literal(value: f64) -> Node {
    let text = if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else {
        value.to_string()
    };
    Node::Literal(text)
}

#[derive(Debug, Display)]
#[display("{0}")]
struct KeyError(String);

impl std::error::Error for KeyError {}

impl ser::Error for KeyError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        KeyError(msg.to_string())
    }
}

struct KeySerializer;

impl ser::Serializer for KeySerializer {
    type Ok = Node;
    type Error = KeyError;
    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = VariantBuilder<SeqBuilder>;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = VariantBuilder<MapBuilder>;

    fn serialize_bool(self, v: bool) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_i8(self, v: i8) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_i16(self, v: i16) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_i32(self, v: i32) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_i64(self, v: i64) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_i128(self, v: i128) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_u8(self, v: u8) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_u16(self, v: u16) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_u32(self, v: u32) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_u64(self, v: u64) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_u128(self, v: u128) -> Result<Node, KeyError> {
        Ok(Node::Literal(v.to_string()))
    }
    fn serialize_f32(self, v: f32) -> Result<Node, KeyError> {
        if v.is_finite() {
            Ok(Node::Literal(v.to_string()))
        } else {
            Ok(float_literal(v as f64))
        }
    }
    fn serialize_f64(self, v: f64) -> Result<Node, KeyError> {
        Ok(float_literal(v))
    }
    fn serialize_char(self, v: char) -> Result<Node, KeyError> {
        Ok(Node::Str(v.to_string()))
    }
    fn serialize_str(self, v: &str) -> Result<Node, KeyError> {
        Ok(Node::Str(v.to_string()))
    }
    fn serialize_bytes(self, v: &[u8]) -> Result<Node, KeyError> {
        let mut seq = SeqBuilder::default();
        for b in v {
            seq.push(Node::Literal(b.to_string()));
        }
        Ok(Node::Object(seq.items))
    }
    fn serialize_none(self) -> Result<Node, KeyError> {
        Ok(Node::Undefined)
    }
    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Node, KeyError> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<Node, KeyError> {
        Ok(Node::Null)
    }
    fn serialize_unit_struct(self, _name: &'static str) -> Result<Node, KeyError> {
        Ok(Node::Null)
    }
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Node, KeyError> {
        Ok(Node::Str(variant.to_string()))
    }
    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Node, KeyError> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Node, KeyError> {
        Ok(Node::variant(variant, value.serialize(self)?))
    }
    fn serialize_seq(self, _len: Option<usize>) -> Result<SeqBuilder, KeyError> {
        Ok(SeqBuilder::default())
    }
    fn serialize_tuple(self, _len: usize) -> Result<SeqBuilder, KeyError> {
        Ok(SeqBuilder::default())
    }
    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<SeqBuilder, KeyError> {
        Ok(SeqBuilder::default())
    }
    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantBuilder<SeqBuilder>, KeyError> {
        Ok(VariantBuilder {
            variant,
            inner: SeqBuilder::default(),
        })
    }
    fn serialize_map(self, _len: Option<usize>) -> Result<MapBuilder, KeyError> {
        Ok(MapBuilder::default())
    }
    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<MapBuilder, KeyError> {
        Ok(MapBuilder::default())
    }
    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantBuilder<MapBuilder>, KeyError> {
        Ok(VariantBuilder {
            variant,
            inner: MapBuilder::default(),
        })
    }
}

#[derive(Default)]
struct SeqBuilder {
    items: BTreeMap<String, Node>,
    len: usize,
}
impl SeqBuilder {
    fn push(&mut self, node: Node) {
        self.items.insert(self.len.to_string(), node);
        self.len += 1;
    }
    fn push_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.push(value.serialize(KeySerializer)?);
        Ok(())
    }
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = Node;
    type Error = KeyError;
    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.push_value(value)
    }
    fn end(self) -> Result<Node, KeyError> {
        Ok(Node::Object(self.items))
    }
}
impl ser::SerializeTuple for SeqBuilder {
    type Ok = Node;
    type Error = KeyError;
    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.push_value(value)
    }
    fn end(self) -> Result<Node, KeyError> {
        Ok(Node::Object(self.items))
    }
}
impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = Node;
    type Error = KeyError;
    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.push_value(value)
    }
    fn end(self) -> Result<Node, KeyError> {
        Ok(Node::Object(self.items))
    }
}

#[derive(Default)]
struct MapBuilder {
    entries: BTreeMap<String, Node>,
    next_key: Option<String>,
}

impl ser::SerializeMap for MapBuilder {
    type Ok = Node;
    type Error = KeyError;
    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), KeyError> {
        self.next_key = Some(key.serialize(KeySerializer)?.into_map_key());
        Ok(())
    }
    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        let Some(key) = self.next_key.take() else {
            return Err(ser::Error::custom("map value serialized before its key"));
        };
        self.entries.insert(key, value.serialize(KeySerializer)?);
        Ok(())
    }
    fn end(self) -> Result<Node, KeyError> {
        Ok(Node::Object(self.entries))
    }
}
impl ser::SerializeStruct for MapBuilder {
    type Ok = Node;
    type Error = KeyError;
    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), KeyError> {
        self.entries
            .insert(key.to_string(), value.serialize(KeySerializer)?);
        Ok(())
    }
    fn end(self) -> Result<Node, KeyError> {
        Ok(Node::Object(self.entries))
    }
}

struct VariantBuilder<B> {
    variant: &'static str,
    inner: B,
}

impl ser::SerializeTupleVariant for VariantBuilder<SeqBuilder> {
    type Ok = Node;
    type Error = KeyError;
    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), KeyError> {
        self.inner.push_value(value)
    }
    fn end(self) -> Result<Node, KeyError> {
        Ok(Node::variant(self.variant, Node::Object(self.inner.items)))
    }
}
impl ser::SerializeStructVariant for VariantBuilder<MapBuilder> {
    type Ok = Node;
    type Error = KeyError;
    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), KeyError> {
        ser::SerializeStruct::serialize_field(&mut self.inner, key, value)
    }
    fn end(self) -> Result<Node, KeyError> {
        Ok(Node::variant(self.variant, Node::Object(self.inner.entries)))
    }
}
