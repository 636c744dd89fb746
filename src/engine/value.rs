//! Runtime values

use std::fmt;

use crate::frontend::ast::Literal;

/// A runtime value. Values are plain data: assignment copies.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Blob { tag: Option<String>, content: String },
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    /// Fields keep declaration order
    Object(Vec<(String, Value)>),
    /// start..end, end exclusive
    Range(i64, i64),
    /// Stands in for an unresolved name when evaluating despite resolution
    /// errors; operations involving it produce `Error` again
    Error,
}

impl Value {
    pub fn from_literal(lit: &Literal) -> Value {
        match lit {
            Literal::Int(v, _) => Value::Int(*v),
            Literal::Float(v, _) => Value::Float(*v),
            Literal::Str(s, _) | Literal::Bare(s, _) => Value::Str(s.clone()),
            Literal::Blob { tag, content, .. } => Value::Blob {
                tag: tag.clone(),
                content: content.clone(),
            },
            Literal::Bool(b, _) => Value::Bool(*b),
            Literal::Null(_) => Value::Null,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Blob { .. } => "blob",
            Value::Array(_) => "array",
            Value::Tuple(_) => "tuple",
            Value::Object(_) => "object",
            Value::Range(..) => "range",
            Value::Error => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Field of an object value
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.iter().find(|(key, _)| key == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Equality with `1 == 1.0`
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            _ => self == other,
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Blob { tag: Some(tag), content } => write!(f, "@{}`{}`", tag, content),
            Value::Blob { tag: None, content } => write!(f, "`{}`", content),
            other => write!(f, "{}", other),
        }
    }

    fn fmt_list(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            item.fmt_nested(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Blob { content, .. } => write!(f, "{}", content),
            Value::Array(items) => {
                write!(f, "[")?;
                Value::fmt_list(f, items)?;
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                Value::fmt_list(f, items)?;
                write!(f, ")")
            }
            Value::Object(fields) if fields.is_empty() => write!(f, "{{}}"),
            Value::Object(fields) => {
                write!(f, "{{ ")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} := ", key)?;
                    value.fmt_nested(f)?;
                }
                write!(f, " }}")
            }
            Value::Range(start, end) => write!(f, "{}..{}", start, end),
            Value::Error => write!(f, "<error>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let value = Value::Object(vec![
            ("name".into(), Value::Str("Notch".into())),
            ("pos".into(), Value::Tuple(vec![Value::Int(1), Value::Float(2.0)])),
            ("tags".into(), Value::Array(vec![Value::Str("a".into())])),
        ]);
        assert_eq!(value.to_string(), "{ name := \"Notch\", pos := (1, 2.0), tags := [\"a\"] }");
        assert_eq!(Value::Str("plain".into()).to_string(), "plain");
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
        assert_eq!(Value::Range(0, 3).to_string(), "0..3");
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(!Value::Int(1).loose_eq(&Value::Str("1".into())));
    }
    #[test]
    fn test_field_lookup() {
        let value = Value::Object(vec![("hp".into(), Value::Int(20))]);
        assert_eq!(value.field("hp"), Some(&Value::Int(20)));
        assert_eq!(value.field("mp"), None);
        assert_eq!(Value::Array(Vec::new()).field("hp"), None);
    }
}
