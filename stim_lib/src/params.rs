use std::collections::BTreeMap;
use serde::{Serialize,Deserialize};
use serde_json::Value;
use record::{AttrValue, Attrs};

pub type Params = BTreeMap<String,ParamValue>;

/// A user facing parameter value. A list means "sample across the run".
#[derive(Clone,Debug,PartialEq,Serialize,Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    List(Vec<ParamValue>),
    // never produced by deserialization, see conform_to
    Pair(f64,f64),
}

#[derive(Debug,Clone,PartialEq,thiserror::Error)]
pub enum ParamError {
    #[error("missing parameter {0}")]
    Missing(String),
    #[error("parameter {key} must be {expected}")]
    WrongType{key:String,expected:&'static str},
}

impl ParamValue {

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Real(x) => Some(*x),
            _=> None
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Real(x) if x.fract() == 0.0 => Some(*x as i64),
            _=> None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _=> None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _=> None
        }
    }

    /// a pair, or a two element numeric list
    pub fn as_pair(&self) -> Option<(f64,f64)> {
        match self {
            ParamValue::Pair(x,y) => Some((*x,*y)),
            ParamValue::List(items) if items.len() == 2 => {
                Some((items[0].as_f64()?,items[1].as_f64()?))
            }
            _=> None
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self,ParamValue::Null)
    }

    /// a scalar behaves like a one element list
    pub fn values(&self) -> Vec<ParamValue> {
        match self {
            ParamValue::List(items) => items.clone(),
            other => vec![other.clone()]
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Null => Value::Null,
            ParamValue::Bool(b) => Value::from(*b),
            ParamValue::Int(i) => Value::from(*i),
            ParamValue::Real(x) => Value::from(*x),
            ParamValue::Text(s) => Value::from(s.as_str()),
            ParamValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            ParamValue::Pair(x,y) => Value::Array(vec![Value::from(*x),Value::from(*y)]),
        }
    }

    /// Reshape a value read from a file to the shape of the default it overrides.
    /// Returns None when the shapes are incompatible.
    pub fn conform_to(&self,default:&ParamValue) -> Option<ParamValue> {
        use ParamValue::*;
        match (self,default) {
            (Null,_) => Some(Null),
            (value,Null) => Some(value.clone()),
            (List(items),List(defaults)) => match defaults.first() {
                Some(d) => Self::conform_all(items,d),
                None => Some(self.clone()),
            },
            (List(_),Pair(..)) if self.as_pair().is_some() => {
                let (x,y) = self.as_pair()?;
                Some(Pair(x,y))
            }
            // a sweep over a parameter whose default is a single value
            (List(items),d) => Self::conform_all(items,d),
            (value,List(defaults)) => match defaults.first() {
                Some(d) => value.conform_to(d),
                None => Some(value.clone()),
            },
            (Int(i),Real(_)) => Some(Real(*i as f64)),
            (Real(x),Int(_)) if x.fract() == 0.0 => Some(Int(*x as i64)),
            (Pair(x,y),Pair(..)) => Some(Pair(*x,*y)),
            (Bool(_),Bool(_)) | (Int(_),Int(_)) | (Real(_),Real(_)) | (Text(_),Text(_)) => Some(self.clone()),
            _=> None
        }
    }

    fn conform_all(items:&[ParamValue],default:&ParamValue) -> Option<ParamValue> {
        items.iter()
            .map(|item| item.conform_to(default))
            .collect::<Option<Vec<_>>>()
            .map(ParamValue::List)
    }
}

impl From<f64> for ParamValue {
    fn from(x:f64) -> Self { ParamValue::Real(x) }
}

impl From<i64> for ParamValue {
    fn from(i:i64) -> Self { ParamValue::Int(i) }
}

impl From<bool> for ParamValue {
    fn from(b:bool) -> Self { ParamValue::Bool(b) }
}

impl From<&str> for ParamValue {
    fn from(s:&str) -> Self { ParamValue::Text(s.to_string()) }
}

impl From<(f64,f64)> for ParamValue {
    fn from(p:(f64,f64)) -> Self { ParamValue::Pair(p.0,p.1) }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v:Vec<f64>) -> Self { ParamValue::List(v.into_iter().map(ParamValue::Real).collect()) }
}

/// typed lookups on a parameter map
pub trait ParamsExt {
    fn value(&self,key:&str) -> Result<&ParamValue,ParamError>;
    fn real(&self,key:&str) -> Result<f64,ParamError>;
    fn int(&self,key:&str) -> Result<i64,ParamError>;
    fn flag(&self,key:&str) -> Result<bool,ParamError>;
    fn text(&self,key:&str) -> Result<&str,ParamError>;
    fn pair(&self,key:&str) -> Result<(f64,f64),ParamError>;
    fn to_attrs(&self) -> Attrs;
}

impl ParamsExt for Params {

    fn value(&self,key:&str) -> Result<&ParamValue,ParamError> {
        self.get(key).ok_or_else(|| ParamError::Missing(key.to_string()))
    }

    fn real(&self,key:&str) -> Result<f64,ParamError> {
        self.value(key)?.as_f64().ok_or_else(|| ParamError::WrongType{key:key.to_string(),expected:"a number"})
    }

    fn int(&self,key:&str) -> Result<i64,ParamError> {
        self.value(key)?.as_i64().ok_or_else(|| ParamError::WrongType{key:key.to_string(),expected:"an integer"})
    }

    fn flag(&self,key:&str) -> Result<bool,ParamError> {
        self.value(key)?.as_bool().ok_or_else(|| ParamError::WrongType{key:key.to_string(),expected:"a boolean"})
    }

    fn text(&self,key:&str) -> Result<&str,ParamError> {
        self.value(key)?.as_str().ok_or_else(|| ParamError::WrongType{key:key.to_string(),expected:"a string"})
    }

    fn pair(&self,key:&str) -> Result<(f64,f64),ParamError> {
        self.value(key)?.as_pair().ok_or_else(|| ParamError::WrongType{key:key.to_string(),expected:"a pair of numbers"})
    }

    fn to_attrs(&self) -> Attrs {
        self.iter().map(|(key,val)| (key.clone(),AttrValue::encode(&val.to_json()))).collect()
    }
}
