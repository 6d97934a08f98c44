//! Netlist synthesis for the three-branch network, and its inverse.
//!
//! Node names are fixed: `input` is the common node, `0` ground, and the
//! `_net0`..`_net4` nodes sit between series parts of a branch.

use std::fmt::Write;

use crate::config::Limits;
use crate::error::{FitError, Result};
use crate::ir::{Element, Netlist};
use crate::schematic::{ComponentId, Schematic};

pub const DIODE_MODEL: &str = "DMOD_D1";

const DIODE_MODEL_PARAMS: &str = "Is=2.22e-10 N=1.65 Cj0=4e-12 M=0.333 Vj=0.7 Fc=0.5 \
Rs=0.0686 Tt=5.76e-09 Ikf=0 Kf=0 Af=1 Bv=75 Ibv=1e-06 Xti=3 Eg=1.11 Tcv=0 Trs=0 \
Ttt1=0 Ttt2=0 Tm1=0 Tm2=0 Tnom=26.85";

const DIODE_INSTANCE: &str = "AREA=1.0 Temp=26.85";

/// Render `sch` as a SPICE netlist.
///
/// A branch is drawn when its resistor is below `present_threshold`. Inside
/// a drawn branch a capacitor or diode is drawn when its switch resistor is
/// at or above the threshold, otherwise it is bridged.
pub fn synthesize(sch: &Schematic, limits: &Limits) -> String {
    let present = |id: ComponentId| sch[id] >= limits.present_threshold;
    let branch = |id: ComponentId| sch[id] < limits.present_threshold;

    let mut out = String::from("* cir file corresponding to the equivalent circuit.\n");
    let mut any_diode = false;

    // Writing to a String cannot fail.
    if branch(ComponentId::R1) {
        if present(ComponentId::RC1) {
            let _ = writeln!(out, "R1 _net1 input {:e}", sch[ComponentId::R1]);
            let _ = writeln!(out, "C1 _net0 _net1 {:e}", sch[ComponentId::C1]);
        } else {
            let _ = writeln!(out, "R1 _net0 input {:e}", sch[ComponentId::R1]);
        }
        if present(ComponentId::RD1) {
            let _ = writeln!(out, "D1 _net0 0 {DIODE_MODEL} {DIODE_INSTANCE}");
            any_diode = true;
        } else {
            let _ = writeln!(out, "R_D1 0 _net0 {:e}", sch[ComponentId::RD1]);
        }
    }

    if branch(ComponentId::R2) {
        if present(ComponentId::RC2) {
            let _ = writeln!(out, "R2 _net4 input {:e}", sch[ComponentId::R2]);
            let _ = writeln!(out, "C2 0 _net4 {:e}", sch[ComponentId::C2]);
        } else {
            let _ = writeln!(out, "R2 0 input {:e}", sch[ComponentId::R2]);
        }
    }

    if branch(ComponentId::R3) {
        if present(ComponentId::RC3) {
            let _ = writeln!(out, "R3 _net3 input {:e}", sch[ComponentId::R3]);
            let _ = writeln!(out, "C3 _net2 _net3 {:e}", sch[ComponentId::C3]);
        } else {
            let _ = writeln!(out, "R3 _net2 input {:e}", sch[ComponentId::R3]);
        }
        if present(ComponentId::RD3) {
            let _ = writeln!(out, "D3 0 _net2 {DIODE_MODEL} {DIODE_INSTANCE}");
            any_diode = true;
        } else {
            let _ = writeln!(out, "R_D3 0 _net2 {:e}", sch[ComponentId::RD3]);
        }
    }

    if any_diode {
        let _ = writeln!(out, ".MODEL {DIODE_MODEL} D ({DIODE_MODEL_PARAMS})");
    }
    out.push_str(".END\n");
    out
}

/// Recover a schematic from a netlist drawn in the three-branch vocabulary.
///
/// Missing branch resistors are open, a missing capacitor is bridged, and
/// a branch with neither diode nor bridge has its diode shorted out.
/// Voltage sources are ignored so a probe deck can be read back too.
pub fn to_schematic(netlist: &Netlist, limits: &Limits) -> Result<Schematic> {
    for element in &netlist.elements {
        let name = element.name().to_uppercase();
        let known = matches!(
            name.as_str(),
            "R1" | "C1" | "D1" | "R_D1" | "R2" | "C2" | "R3" | "C3" | "D3" | "R_D3"
        );
        if !known && !matches!(element, Element::VSource { .. }) {
            return Err(FitError::Parse(format!(
                "element '{}' is not part of the three-branch network",
                element.name()
            )));
        }
    }

    let mut sch = Schematic::open(limits);
    // The parser picks the element kind from the first letter, so a name
    // from the vocabulary always carries the matching kind.
    let value_of = |name: &str| match netlist.find(name) {
        Some(Element::Resistor { value, .. }) | Some(Element::Capacitor { value, .. }) => {
            Some(*value)
        }
        _ => None,
    };

    use ComponentId::*;
    let branches = [
        (R1, C1, RC1, Some((RD1, "D1", "R_D1"))),
        (R2, C2, RC2, None),
        (R3, C3, RC3, Some((RD3, "D3", "R_D3"))),
    ];
    for (r, c, rc, diode) in branches {
        let Some(resistance) = value_of(r.name()) else {
            continue;
        };
        sch[r] = resistance;
        match value_of(c.name()) {
            Some(capacitance) => {
                sch[c] = capacitance;
                sch[rc] = limits.huge_resistance;
            }
            None => sch[rc] = limits.null_resistance,
        }
        if let Some((rd, diode_name, bridge_name)) = diode {
            sch[rd] = if netlist.find(diode_name).is_some() {
                limits.huge_resistance
            } else {
                value_of(bridge_name).unwrap_or(limits.null_resistance)
            };
        }
    }
    Ok(sch)
}
