/// Location of a value in debuggee memory.
pub type Address = u64;

/// Raw payload of an evaluated runtime value.
#[derive(Clone, Debug, PartialEq)]
pub enum RawValue {
    Null,
    Boolean(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    /// Pointer, reference or boxed value pointing at `target`.
    Reference {
        target: Address,
    },
    Array {
        length: u64,
    },
    /// Instance of a struct/class; its members are enumerated by the language evaluator.
    Object,
}

/// Presentation shape of a node, derived from its value's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Scalar,
    Aggregate,
    PointerLike,
}

/// An evaluated runtime value. A [`crate::ValueNode`] is a presentation wrapper around one.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    type_name: String,
    address: Option<Address>,
    raw: RawValue,
}

impl Value {
    pub fn new(type_name: impl Into<String>, raw: RawValue) -> Self {
        Self {
            type_name: type_name.into(),
            address: None,
            raw,
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Fully qualified runtime type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn raw(&self) -> &RawValue {
        &self.raw
    }

    pub fn is_null(&self) -> bool {
        matches!(self.raw, RawValue::Null)
    }

    pub fn kind(&self) -> NodeKind {
        match self.raw {
            RawValue::Array { .. } | RawValue::Object => NodeKind::Aggregate,
            RawValue::Reference { .. } => NodeKind::PointerLike,
            _ => NodeKind::Scalar,
        }
    }
}
