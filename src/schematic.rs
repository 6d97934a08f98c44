//! Component values of the three-branch network.
//!
//! Each branch hangs off the common `input` node:
//!
//! ```text
//! branch 1:  input -- R1 -- C1 -- D1 --> gnd     (_R_C1 / _R_D1 switch C1 / D1)
//! branch 2:  input -- R2 -- C2 ---------- gnd     (_R_C2 switches C2)
//! branch 3:  input -- R3 -- C3 -- D3 <-- gnd     (_R_C3 / _R_D3 switch C3 / D3)
//! ```
//!
//! The `_R_*` slots are not physical parts. They encode structure: a value at
//! or above the presence threshold means the capacitor or diode is drawn, a
//! value below it means it is bridged out.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::ops::{Index, IndexMut};

use crate::config::Limits;

/// Number of slots in a parameter vector.
pub const SLOT_COUNT: usize = 11;

/// Stand-in for an infinite reactance or capacitance.
pub const SATURATED: f64 = 1e20;

/// Component identifiers in slot order. The order is the packing order of
/// [`ParameterVector`] and [`crate::codec::VariabilityMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentId {
    R1,
    C1,
    RC1,
    RD1,
    R2,
    C2,
    RC2,
    R3,
    C3,
    RC3,
    RD3,
}

impl ComponentId {
    pub const ALL: [ComponentId; SLOT_COUNT] = [
        ComponentId::R1,
        ComponentId::C1,
        ComponentId::RC1,
        ComponentId::RD1,
        ComponentId::R2,
        ComponentId::C2,
        ComponentId::RC2,
        ComponentId::R3,
        ComponentId::C3,
        ComponentId::RC3,
        ComponentId::RD3,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ComponentId::R1 => "R1",
            ComponentId::C1 => "C1",
            ComponentId::RC1 => "_R_C1",
            ComponentId::RD1 => "_R_D1",
            ComponentId::R2 => "R2",
            ComponentId::C2 => "C2",
            ComponentId::RC2 => "_R_C2",
            ComponentId::R3 => "R3",
            ComponentId::C3 => "C3",
            ComponentId::RC3 => "_R_C3",
            ComponentId::RD3 => "_R_D3",
        }
    }

    pub fn from_name(name: &str) -> Option<ComponentId> {
        ComponentId::ALL.into_iter().find(|id| id.name().eq_ignore_ascii_case(name))
    }

    pub fn is_capacitor(self) -> bool {
        matches!(self, ComponentId::C1 | ComponentId::C2 | ComponentId::C3)
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reactance of `capacitance` at `frequency`, saturating instead of going infinite.
pub fn capacitance_to_reactance(capacitance: f64, frequency: f64) -> f64 {
    saturate(1.0 / (2.0 * std::f64::consts::PI * frequency * capacitance))
}

/// Capacitance whose reactance at `frequency` is `reactance`.
pub fn reactance_to_capacitance(reactance: f64, frequency: f64) -> f64 {
    saturate(1.0 / (2.0 * std::f64::consts::PI * frequency * reactance))
}

fn saturate(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        SATURATED.copysign(value)
    }
}

/// Optimizer-visible vector: resistances as-is, capacitances as reactances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterVector(pub [f64; SLOT_COUNT]);

impl Index<ComponentId> for ParameterVector {
    type Output = f64;

    fn index(&self, id: ComponentId) -> &f64 {
        &self.0[id.index()]
    }
}

impl IndexMut<ComponentId> for ParameterVector {
    fn index_mut(&mut self, id: ComponentId) -> &mut f64 {
        &mut self.0[id.index()]
    }
}

/// Physical component values, ohms and farads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schematic {
    values: [f64; SLOT_COUNT],
}

impl Schematic {
    /// Every branch open, capacitors minimal and bridged, diodes drawn.
    pub fn open(limits: &Limits) -> Self {
        let mut sch = Schematic {
            values: [0.0; SLOT_COUNT],
        };
        for id in ComponentId::ALL {
            sch[id] = match id {
                ComponentId::R1 | ComponentId::R2 | ComponentId::R3 => limits.huge_resistance,
                ComponentId::C1 | ComponentId::C2 | ComponentId::C3 => limits.min_capacitance,
                ComponentId::RC1 | ComponentId::RC2 | ComponentId::RC3 => limits.null_resistance,
                ComponentId::RD1 | ComponentId::RD3 => limits.huge_resistance,
            };
        }
        sch
    }

    pub fn to_parameters(&self, frequency: f64) -> ParameterVector {
        let mut xi = [0.0; SLOT_COUNT];
        for id in ComponentId::ALL {
            xi[id.index()] = if id.is_capacitor() {
                capacitance_to_reactance(self[id], frequency)
            } else {
                self[id]
            };
        }
        ParameterVector(xi)
    }

    /// Physical values for an optimizer vector. Signs are dropped, the
    /// optimizer is free to step through zero.
    pub fn from_parameters(xi: &ParameterVector, frequency: f64) -> Self {
        let mut values = [0.0; SLOT_COUNT];
        for id in ComponentId::ALL {
            let x = xi[id];
            values[id.index()] = if id.is_capacitor() {
                reactance_to_capacitance(x, frequency).abs()
            } else {
                x.abs()
            };
        }
        Schematic { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, f64)> + '_ {
        ComponentId::ALL.into_iter().map(move |id| (id, self[id]))
    }
}

impl Index<ComponentId> for Schematic {
    type Output = f64;

    fn index(&self, id: ComponentId) -> &f64 {
        &self.values[id.index()]
    }
}

impl IndexMut<ComponentId> for Schematic {
    fn index_mut(&mut self, id: ComponentId) -> &mut f64 {
        &mut self.values[id.index()]
    }
}

impl Serialize for Schematic {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(SLOT_COUNT))?;
        for (id, value) in self.iter() {
            map.serialize_entry(id.name(), &value)?;
        }
        map.end()
    }
}
