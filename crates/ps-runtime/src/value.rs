//! The dynamic value model. Arrays, objects, and class instances have
//! reference semantics; everything else copies.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use ps_core::{PsError, PsResult};
use ps_lang::Stmt;
use ps_llm::LlmAdapter;
use serde_json::{Map, Number, Value as Json};

#[derive(Debug)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub struct ClassDef {
    pub name: String,
    pub methods: HashMap<String, Rc<FunctionDef>>,
    /// Non-`def` statements of the class body, executed with `self`
    /// bound when an instance is constructed.
    pub init_body: Vec<Stmt>,
}

#[derive(Debug)]
pub struct Instance {
    pub class: Rc<ClassDef>,
    pub fields: Rc<RefCell<Vec<(String, Value)>>>,
}

/// An opaque, unforgeable LLM client value created by `LLMClient(cfg)`.
#[derive(Debug)]
pub struct LlmClientHandle {
    pub adapter: LlmAdapter,
    pub no_ask: bool,
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Vec<(String, Value)>>>),
    Function(Rc<FunctionDef>),
    Class(Rc<ClassDef>),
    Instance(Rc<Instance>),
    LlmClient(Rc<LlmClientHandle>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(fields: Vec<(String, Value)>) -> Self {
        Self::Object(Rc::new(RefCell::new(fields)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Class(_) => "class",
            Self::Instance(_) => "instance",
            Self::LlmClient(_) => "llm_client",
        }
    }

    /// `null`, `false`, `0`, `""`, `[]`, `{}` are false; everything else
    /// is true.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Str(s) => !s.is_empty(),
            Self::Array(items) => !items.borrow().is_empty(),
            Self::Object(fields) => !fields.borrow().is_empty(),
            _ => true,
        }
    }

    /// Look up a field on an object or instance. Non-objects yield null.
    pub fn get_member(&self, field: &str) -> Value {
        let fields = match self {
            Self::Object(fields) => fields.clone(),
            Self::Instance(instance) => instance.fields.clone(),
            _ => return Value::Null,
        };
        let borrowed = fields.borrow();
        borrowed
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null)
    }

    pub fn set_member(&self, field: &str, value: Value) -> PsResult<()> {
        let fields = match self {
            Self::Object(fields) => fields.clone(),
            Self::Instance(instance) => instance.fields.clone(),
            other => {
                return Err(PsError::Runtime(format!(
                    "cannot set member '{field}' on {}",
                    other.type_name()
                )));
            }
        };
        let mut borrowed = fields.borrow_mut();
        if let Some(slot) = borrowed.iter_mut().find(|(name, _)| name == field) {
            slot.1 = value;
        } else {
            borrowed.push((field.to_string(), value));
        }
        Ok(())
    }

    pub fn deep_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_eq(y))
            }
            (Self::Object(a), Self::Object(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.deep_eq(vb))
            }
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            (Self::LlmClient(a), Self::LlmClient(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Convert to JSON for tool args, plan payloads, and context
    /// injection. Callable values do not cross this boundary.
    pub fn to_json(&self) -> PsResult<Json> {
        Ok(match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(n) => Json::Number(Number::from(*n)),
            Self::Str(s) => Json::String(s.clone()),
            Self::Array(items) => {
                let mut out = Vec::new();
                for item in items.borrow().iter() {
                    out.push(item.to_json()?);
                }
                Json::Array(out)
            }
            Self::Object(fields) => {
                let mut map = Map::new();
                for (key, value) in fields.borrow().iter() {
                    map.insert(key.clone(), value.to_json()?);
                }
                Json::Object(map)
            }
            Self::Instance(instance) => {
                let mut map = Map::new();
                for (key, value) in instance.fields.borrow().iter() {
                    map.insert(key.clone(), value.to_json()?);
                }
                Json::Object(map)
            }
            other => {
                return Err(PsError::Runtime(format!(
                    "cannot convert {} to JSON",
                    other.type_name()
                )));
            }
        })
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .unwrap_or_else(|| Value::Str(n.to_string())),
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Value::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (index, item) in items.borrow().iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Self::Str(s) => write!(f, "{s:?}")?,
                        other => write!(f, "{other}")?,
                    }
                }
                write!(f, "]")
            }
            Self::Object(fields) => {
                write!(f, "{{")?;
                for (index, (key, value)) in fields.borrow().iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    match value {
                        Self::Str(s) => write!(f, "{key}: {s:?}")?,
                        other => write!(f, "{key}: {other}")?,
                    }
                }
                write!(f, "}}")
            }
            Self::Function(def) => write!(f, "<function {}>", def.name),
            Self::Class(def) => write!(f, "<class {}>", def.name),
            Self::Instance(instance) => write!(f, "<{} instance>", instance.class.name),
            Self::LlmClient(_) => write!(f, "<llm client>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness_table() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(!Value::array(vec![]).truthy());
        assert!(!Value::object(vec![]).truthy());

        assert!(Value::Int(-1).truthy());
        assert!(Value::Str("x".into()).truthy());
        assert!(Value::array(vec![Value::Null]).truthy());
    }

    #[test]
    fn test_member_access_on_non_object_is_null() {
        assert!(matches!(Value::Int(3).get_member("x"), Value::Null));
        assert!(matches!(Value::Null.get_member("x"), Value::Null));
    }

    #[test]
    fn test_object_reference_semantics() {
        let object = Value::object(vec![("a".into(), Value::Int(1))]);
        let alias = object.clone();
        alias.set_member("a", Value::Int(2)).unwrap();
        assert!(object.get_member("a").deep_eq(&Value::Int(2)));
    }

    #[test]
    fn test_set_member_on_scalar_errors() {
        let err = Value::Int(1).set_member("a", Value::Null).unwrap_err();
        assert!(err.to_string().contains("cannot set member"));
    }

    #[test]
    fn test_json_roundtrip_preserves_order() {
        let value = Value::object(vec![
            ("zulu".into(), Value::Int(1)),
            ("alpha".into(), Value::Str("two".into())),
        ]);
        let encoded = value.to_json().unwrap();
        // serde_json maps sort keys, so order maps to sorted form on the
        // wire; round-tripping back still compares deep-equal per key.
        let back = Value::from_json(&encoded);
        assert!(back.get_member("zulu").deep_eq(&Value::Int(1)));
        assert!(back.get_member("alpha").deep_eq(&Value::Str("two".into())));
    }

    #[test]
    fn test_function_values_not_json_encodable() {
        let function = Value::Function(Rc::new(FunctionDef {
            name: "f".into(),
            params: vec![],
            body: vec![],
        }));
        assert!(function.to_json().is_err());
    }

    #[test]
    fn test_from_json_numbers() {
        assert!(Value::from_json(&json!(7)).deep_eq(&Value::Int(7)));
    }

    #[test]
    fn test_display_object() {
        let value = Value::object(vec![("msg".into(), Value::Str("hi".into()))]);
        assert_eq!(value.to_string(), "{msg: \"hi\"}");
    }
}
