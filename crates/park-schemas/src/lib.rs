//! Wire payloads carried on the parking bus topics.
//!
//! Fields that the sensing relay sends loosely typed (status as string or
//! number, car id as string or number, cars possibly missing) are modelled as
//! untagged unions here and resolved by the canonicalizer in
//! `park-reconcile`. Nothing past that boundary sees the raw shapes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Status topic
// ---------------------------------------------------------------------------

/// Raw `status` field as it arrives on the status topic.
///
/// The relay publishes `0|1`, older publishers send `"occupied"|"empty"`, and
/// some send the digits as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawStatus {
    Text(String),
    Number(f64),
    /// Anything else (bool, null, object, array). Always rejected downstream.
    Other(Value),
}

impl std::fmt::Display for RawStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawStatus::Text(s) => write!(f, "{s:?}"),
            RawStatus::Number(n) => write!(f, "{n}"),
            RawStatus::Other(v) => write!(f, "{v}"),
        }
    }
}

/// `{slot, status, confidence?, timestamp?}` on the status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    /// Slot label exactly as published (`"slot1"`, `"slot 08"`, `"8"`).
    pub slot: String,
    pub status: RawStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Publisher timestamp; shape is not guaranteed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

// ---------------------------------------------------------------------------
// Illegal topic
// ---------------------------------------------------------------------------

/// Car identifier as sent by the detector: tracker ids are numbers, some
/// publishers stringify them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CarId {
    Number(serde_json::Number),
    Text(String),
}

/// One illegally parked car inside a detection batch.
///
/// Every field is optional and read leniently: a field of an unexpected
/// shape becomes `None` (numbers may also arrive as numeric strings) rather
/// than dropping the car.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Car {
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<CarId>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// Seconds the car has been stationary.
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<CarId>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => Some(CarId::Number(n)),
        Value::String(s) => Some(CarId::Text(s)),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// `{timestamp?, count, cars?}` on the illegal topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IllegalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    pub count: u32,
    /// Kept raw: a missing or non-array value is accepted and means "no cars".
    #[serde(default)]
    pub cars: Value,
}

/// Cars decoded from an [`IllegalPayload`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedCars {
    pub cars: Vec<Car>,
    /// Array elements that were not car objects and were left out.
    pub skipped: usize,
}

impl IllegalPayload {
    /// Decode `cars` leniently, preserving order.
    pub fn decode_cars(&self) -> DecodedCars {
        let Value::Array(items) = &self.cars else {
            return DecodedCars::default();
        };

        let mut out = DecodedCars::default();
        for item in items {
            if !item.is_object() {
                out.skipped += 1;
                continue;
            }
            match serde_json::from_value::<Car>(item.clone()) {
                Ok(car) => out.cars.push(car),
                Err(_) => out.skipped += 1,
            }
        }
        out
    }
}
