//! Netlist intermediate representation.
//!
//! The parser produces a `Netlist`; [`crate::netlist::to_schematic`] maps it
//! back onto the three-branch schematic.

/// Node identifier in the netlist (e.g., "0", "input", "_net1").
pub type NodeId = String;

/// A circuit element parsed from the netlist.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Resistor {
        name: String,
        nodes: (NodeId, NodeId),
        value: f64,
    },
    Capacitor {
        name: String,
        nodes: (NodeId, NodeId),
        value: f64,
    },
    /// Diode instance. `params` holds instance parameters such as AREA.
    Diode {
        name: String,
        nodes: (NodeId, NodeId),
        model: String,
        params: Vec<(String, f64)>,
    },
    /// Independent voltage source. The waveform text is kept verbatim.
    VSource {
        name: String,
        nodes: (NodeId, NodeId),
        waveform: String,
    },
}

impl Element {
    pub fn name(&self) -> &str {
        match self {
            Element::Resistor { name, .. }
            | Element::Capacitor { name, .. }
            | Element::Diode { name, .. }
            | Element::VSource { name, .. } => name,
        }
    }
}

/// `.MODEL name D (...)` card. Parameter names are upper-cased.
#[derive(Debug, Clone, PartialEq)]
pub struct DiodeModel {
    pub name: String,
    pub params: Vec<(String, f64)>,
}

impl DiodeModel {
    pub fn param(&self, key: &str) -> Option<f64> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }
}

/// A parsed netlist: elements + model cards.
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    pub elements: Vec<Element>,
    pub models: Vec<DiodeModel>,
}

impl Netlist {
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| e.name().eq_ignore_ascii_case(name))
    }
}
