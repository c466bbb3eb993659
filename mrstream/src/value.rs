use serde::{ser, Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, fmt};

/// Valor genérico que viaja como clave o como valor de un [`Pair`].
///
/// Es un conjunto cerrado de tipos representables en JSON. Los números son
/// siempre `f64`: después de decodificar no queda distinción entre entero y
/// flotante, y los reducers tienen que asumirlo.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

/// 2^53: hasta acá un f64 representa enteros sin pérdida.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                // serde_json escribiría `null` para NaN/inf; eso sería perder datos
                if !n.is_finite() {
                    return Err(ser::Error::custom(format!("número no representable: {n}")));
                }
                // enteros exactos sin ".0", igual que otros productores de JSON en streaming
                if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => items.serialize(serializer),
            Value::Object(obj) => obj.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(obj: BTreeMap<String, Value>) -> Self {
        Value::Object(obj)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

/// Se muestra como su codificación JSON (útil en logs y mensajes de error).
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// Un registro clave/valor del pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub key: Value,
    pub value: Value,
}

impl Pair {
    pub fn new(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_convierte_numeros_a_f64() {
        let v = Value::from(json!({"n": 3, "xs": [1, 2.5, "a", null, true]}));

        let obj = v.as_object().unwrap();
        assert_eq!(obj["n"], Value::Number(3.0));
        assert_eq!(
            obj["xs"],
            Value::Array(vec![
                Value::Number(1.0),
                Value::Number(2.5),
                Value::from("a"),
                Value::Null,
                Value::Bool(true),
            ])
        );
    }

    #[test]
    fn serializa_enteros_exactos_sin_decimales() {
        assert_eq!(serde_json::to_string(&Value::Number(1.0)).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Value::Number(-42.0)).unwrap(), "-42");
        assert_eq!(serde_json::to_string(&Value::Number(2.5)).unwrap(), "2.5");

        // los grandes quedan en notación científica; el formato exacto es de serde_json
        let big = serde_json::to_string(&Value::Number(1e300)).unwrap();
        assert!(big.contains('e'), "{big}");
        assert_eq!(big.parse::<f64>().unwrap(), 1e300);
    }

    #[test]
    fn serializar_nan_o_infinito_falla() {
        assert!(serde_json::to_string(&Value::Number(f64::NAN)).is_err());
        assert!(serde_json::to_string(&Value::Number(f64::INFINITY)).is_err());

        let nested = Value::Array(vec![Value::Number(f64::NEG_INFINITY)]);
        assert!(serde_json::to_string(&nested).is_err());
    }

    #[test]
    fn objetos_se_serializan_con_claves_ordenadas() {
        let v = Value::from(json!({"b": 1, "a": [true, null]}));
        assert_eq!(v.to_string(), r#"{"a":[true,null],"b":1}"#);
    }

    #[test]
    fn igualdad_estructural_profunda() {
        let a = Value::from(json!({"k": [1, {"x": "y"}]}));
        let b = Value::from(json!({"k": [1.0, {"x": "y"}]}));
        let c = Value::from(json!({"k": [1, {"x": "z"}]}));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn accesores_devuelven_none_con_otro_tipo() {
        let v = Value::from(json!([true, null, "x"]));
        let items = v.as_array().unwrap();

        assert_eq!(items[0].as_bool(), Some(true));
        assert!(items[1].is_null());
        assert!(!items[2].is_null());
        assert_eq!(items[2].as_bool(), None);
        assert_eq!(items[2].as_f64(), None);
        assert!(Value::from(1).as_array().is_none());
        assert!(Value::from("x").as_object().is_none());
    }

    #[test]
    fn pair_new_acepta_tipos_nativos() {
        let p = Pair::new("the", 1);
        assert_eq!(p.key.as_str(), Some("the"));
        assert_eq!(p.value.as_f64(), Some(1.0));
    }
}
