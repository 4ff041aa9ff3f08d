//! Field values handed to operators, and the capture collection

use crate::error::{EeError, Result};

/// Maximum number of capture items
pub const MAX_CAPTURE_ITEMS: usize = 10;

const CAPTURE_NAMES: [&str; MAX_CAPTURE_ITEMS] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

/// Name of the capture item at `index`
pub fn capture_name(index: usize) -> Option<&'static str> {
    CAPTURE_NAMES.get(index).copied()
}

/// Typed field value
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// NUL-terminated string
    NulStr(String),
    /// Byte string, may contain any byte
    ByteStr(Vec<u8>),
    Num(i64),
    Float(f64),
    List(Vec<Field>),
}

impl FieldValue {
    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::NulStr(_) => "nulstr",
            FieldValue::ByteStr(_) => "bytestr",
            FieldValue::Num(_) => "num",
            FieldValue::Float(_) => "float",
            FieldValue::List(_) => "list",
        }
    }
}

/// A named, typed value
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(name: &str, value: FieldValue) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }

    pub fn nulstr(name: &str, value: &str) -> Self {
        Self::new(name, FieldValue::NulStr(value.to_string()))
    }

    pub fn bytestr(name: &str, value: &[u8]) -> Self {
        Self::new(name, FieldValue::ByteStr(value.to_vec()))
    }

    /// The bytes an automaton runs over
    ///
    /// A string stops at its first NUL. Lists are `NotImplemented`; any other
    /// type is `InvalidInput`.
    pub fn match_input(&self) -> Result<&[u8]> {
        match &self.value {
            FieldValue::NulStr(s) => {
                let bytes = s.as_bytes();
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Ok(&bytes[..end])
            }
            FieldValue::ByteStr(b) => Ok(b),
            FieldValue::List(_) => Err(EeError::NotImplemented(format!(
                "matching list field \"{}\"",
                self.name
            ))),
            other => Err(EeError::InvalidInput(format!(
                "field \"{}\" has unsupported type {}",
                self.name,
                other.type_name()
            ))),
        }
    }
}

/// Capture collection filled by operators that support capture
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Capture {
    items: Vec<Field>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every captured item
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Store `bytes` as item `index`, replacing any previous value
    pub fn set_item(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        let name = capture_name(index).ok_or_else(|| {
            EeError::InvalidInput(format!("capture index {} out of range", index))
        })?;

        let mut value = Vec::new();
        value.try_reserve_exact(bytes.len())?;
        value.extend_from_slice(bytes);
        let field = Field::new(name, FieldValue::ByteStr(value));

        if let Some(slot) = self.items.iter_mut().find(|f| f.name == name) {
            *slot = field;
        } else {
            self.items.push(field);
        }
        Ok(())
    }

    /// Captured bytes of item `index`
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        let name = capture_name(index)?;
        self.items
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| match &f.value {
                FieldValue::ByteStr(b) => Some(b.as_slice()),
                _ => None,
            })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
