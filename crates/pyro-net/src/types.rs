//! Wire types shared by every Pyro server

use pyro_core::{Registry, Value};

/// Position mirrored between peers, wire form `Vector3(x, y, z)`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

fn component(value: &Value) -> Result<f64, String> {
    value
        .as_float()
        .ok_or_else(|| format!("expected a number, got {}", value.type_name()))
}

/// Register the built-in wire types
pub fn register_types(registry: &mut Registry) {
    registry.register(
        "Vector3",
        |v: &Vector3| vec![Value::Float(v.x), Value::Float(v.y), Value::Float(v.z)],
        |fields| match fields {
            [x, y, z] => Ok(Vector3::new(component(x)?, component(y)?, component(z)?)),
            _ => Err(format!("expected 3 components, got {}", fields.len())),
        },
    );
}
