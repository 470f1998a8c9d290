/*
    Attribute values are the primary data of the record. Only scalars and strings are stored;
    nested mappings and lists are written as their json string encoding and None becomes "None".
 */
use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize,Deserialize};
use serde_json::{Map, Value};

pub type Attrs = BTreeMap<String,AttrValue>;

#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    // only produced when reading files written by other tools
    Nested(Map<String,Value>),
}

impl AttrValue {

    /// value-serialise a json value into something that can live on an attribute
    pub fn encode(value:&Value) -> Self {
        match value {
            Value::Null => AttrValue::Text(String::from("None")),
            Value::Bool(b) => AttrValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttrValue::Int(i),
                None => AttrValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => AttrValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => AttrValue::Text(value.to_string()),
        }
    }

    pub fn encode_map(map:&Map<String,Value>) -> Attrs {
        map.iter().map(|(key,val)| (key.clone(),Self::encode(val))).collect()
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            _=> None
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _=> None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _=> None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _=> None
        }
    }

    /// a mapping stored either natively or as its string encoding
    pub fn as_mapping(&self) -> Option<Map<String,Value>> {
        match self {
            AttrValue::Nested(map) => Some(map.clone()),
            AttrValue::Text(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Some(map),
                _=> None
            },
            _=> None
        }
    }

    /// a list stored as its string encoding
    pub fn as_list(&self) -> Option<Vec<Value>> {
        match self {
            AttrValue::Text(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Array(list)) => Some(list),
                _=> None
            },
            _=> None
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self,AttrValue::Text(s) if s == "None")
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f,"{}",b),
            AttrValue::Int(i) => write!(f,"{}",i),
            AttrValue::Float(x) => write!(f,"{}",x),
            AttrValue::Text(s) => write!(f,"{}",s),
            AttrValue::Nested(map) => write!(f,"{}",Value::Object(map.clone())),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(b:bool) -> Self { AttrValue::Bool(b) }
}

impl From<i64> for AttrValue {
    fn from(i:i64) -> Self { AttrValue::Int(i) }
}

impl From<u32> for AttrValue {
    fn from(i:u32) -> Self { AttrValue::Int(i as i64) }
}

impl From<f64> for AttrValue {
    fn from(x:f64) -> Self { AttrValue::Float(x) }
}

impl From<&str> for AttrValue {
    fn from(s:&str) -> Self { AttrValue::Text(s.to_string()) }
}

impl From<String> for AttrValue {
    fn from(s:String) -> Self { AttrValue::Text(s) }
}
