//! SPICE netlist parser.
//!
//! Parses the subset of SPICE the fitter writes and reads back.
//!
//! # Supported syntax
//!
//! ```text
//! * comment line
//! Rname n+ n- value                 (resistor)
//! Cname n+ n- value                 (capacitor)
//! Dname anode cathode MODEL [k=v]   (diode, optional instance parameters)
//! Vname n+ n- [waveform]            (voltage source, waveform kept verbatim)
//! .MODEL name D (k=v ...)
//! .END
//! ```
//!
//! Values support engineering suffixes: T, G, MEG, K, M, U, N, P, F
//! (case-insensitive). Other dot commands are ignored.

use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while1};
use nom::character::complete::{space0, space1};
use nom::combinator::{map, opt};
use nom::number::complete::double;
use nom::IResult;
use nom::Parser;

use crate::error::{FitError, Result};
use crate::ir::{DiodeModel, Element, Netlist};

/// Parse a SPICE netlist string into a [`Netlist`].
pub fn parse(input: &str) -> Result<Netlist> {
    let mut netlist = Netlist::default();

    for (line_num, raw_line) in input.lines().enumerate() {
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('*') {
            continue;
        }

        let upper = line.to_uppercase();
        if upper == ".END" {
            break;
        }

        let Some(first) = line.chars().next() else {
            continue;
        };
        match first.to_ascii_uppercase() {
            'R' | 'C' => {
                let element = parse_rc_line(line, first.to_ascii_uppercase())
                    .map_err(|e| parse_err(line_num, raw_line, &e))?;
                netlist.elements.push(element);
            }
            'D' => {
                let element =
                    parse_diode_line(line).map_err(|e| parse_err(line_num, raw_line, &e))?;
                netlist.elements.push(element);
            }
            'V' => {
                let element =
                    parse_source_line(line).map_err(|e| parse_err(line_num, raw_line, &e))?;
                netlist.elements.push(element);
            }
            '.' => {
                if upper.starts_with(".MODEL") {
                    let model = parse_model_command(line)
                        .map_err(|e| parse_err(line_num, raw_line, &e))?;
                    netlist.models.push(model);
                }
            }
            _ => {
                return Err(FitError::Parse(format!(
                    "line {}: unknown element '{}': {}",
                    line_num + 1,
                    first,
                    raw_line
                )));
            }
        }
    }

    Ok(netlist)
}

fn parse_err(line_num: usize, raw_line: &str, detail: &str) -> FitError {
    FitError::Parse(format!("line {}: {} in: {}", line_num + 1, detail, raw_line))
}

// ---------------------------------------------------------------------------
// Engineering suffix value parser
// ---------------------------------------------------------------------------

/// Parse a numeric value with optional engineering suffix.
/// Handles: 10k, 100n, 4.7u, 1MEG, 1e3, -3.3, etc.
fn eng_value(input: &str) -> IResult<&str, f64> {
    let (rest, num) = double(input)?;
    let (rest, suffix) = opt(eng_suffix).parse(rest)?;
    Ok((rest, num * suffix.unwrap_or(1.0)))
}

/// Match an engineering suffix and return its multiplier.
fn eng_suffix(input: &str) -> IResult<&str, f64> {
    // MEG before M
    alt((
        map(tag_no_case("MEG"), |_: &str| 1e6),
        map(tag_no_case("T"), |_: &str| 1e12),
        map(tag_no_case("G"), |_: &str| 1e9),
        map(tag_no_case("K"), |_: &str| 1e3),
        map(tag_no_case("M"), |_: &str| 1e-3),
        map(tag_no_case("U"), |_: &str| 1e-6),
        map(tag_no_case("N"), |_: &str| 1e-9),
        map(tag_no_case("P"), |_: &str| 1e-12),
        map(tag_no_case("F"), |_: &str| 1e-15),
    ))
    .parse(input)
}

/// Parse a whole token as a value; trailing garbage is an error.
fn token_value(token: &str) -> std::result::Result<f64, String> {
    match eng_value(token) {
        Ok(("", value)) => Ok(value),
        _ => Err(format!("invalid value '{}'", token)),
    }
}

// ---------------------------------------------------------------------------
// Token parsers
// ---------------------------------------------------------------------------

/// Parse a node identifier (e.g. "0", "input", "_net1").
fn node_id(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

/// Parse an element name (everything up to the first whitespace).
fn element_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

/// Parse whitespace-separated `key=value` pairs. Keys are upper-cased.
fn key_values(input: &str) -> std::result::Result<Vec<(String, f64)>, String> {
    input
        .split_whitespace()
        .map(|token| {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| format!("expected key=value, got '{}'", token))?;
            if key.is_empty() {
                return Err(format!("missing parameter name in '{}'", token));
            }
            Ok((key.to_uppercase(), token_value(value)?))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// R, C parsing
// ---------------------------------------------------------------------------

/// Parse a line like: Rname n+ n- value
fn parse_rc_line(line: &str, kind: char) -> std::result::Result<Element, String> {
    let (rest, (name, _, n_plus, _, n_minus, _, value, _)) = (
        element_name,
        space1,
        node_id,
        space1,
        node_id,
        space1,
        eng_value,
        space0,
    )
        .parse(line)
        .map_err(|_| format!("failed to parse {} element", kind))?;
    if !rest.is_empty() {
        return Err(format!("unexpected trailing text '{}'", rest));
    }

    let name = name.to_string();
    let nodes = (n_plus.to_string(), n_minus.to_string());

    match kind {
        'R' => Ok(Element::Resistor { name, nodes, value }),
        _ => Ok(Element::Capacitor { name, nodes, value }),
    }
}

// ---------------------------------------------------------------------------
// Diode parsing
// ---------------------------------------------------------------------------

/// Parse a diode line: Dname anode cathode MODELNAME [AREA=1.0 TEMP=26.85]
fn parse_diode_line(line: &str) -> std::result::Result<Element, String> {
    let (rest, (name, _, anode, _, cathode, _, model_name)) = (
        element_name,
        space1,
        node_id,
        space1,
        node_id,
        space1,
        node_id,
    )
        .parse(line)
        .map_err(|_| "failed to parse diode element".to_string())?;

    Ok(Element::Diode {
        name: name.to_string(),
        nodes: (anode.to_string(), cathode.to_string()),
        model: model_name.to_string(),
        params: key_values(rest)?,
    })
}

// ---------------------------------------------------------------------------
// V source parsing
// ---------------------------------------------------------------------------

fn parse_source_line(line: &str) -> std::result::Result<Element, String> {
    let (rest, (name, _, n_plus, _, n_minus, _)) =
        (element_name, space1, node_id, space1, node_id, space0)
            .parse(line)
            .map_err(|_| "failed to parse source name/nodes".to_string())?;

    Ok(Element::VSource {
        name: name.to_string(),
        nodes: (n_plus.to_string(), n_minus.to_string()),
        waveform: rest.trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// .MODEL parsing
// ---------------------------------------------------------------------------

/// Parse: .MODEL name D (k=v ...)
fn parse_model_command(line: &str) -> std::result::Result<DiodeModel, String> {
    let rest = line.trim();
    if !rest.to_uppercase().starts_with(".MODEL") {
        return Err("expected .MODEL directive".to_string());
    }
    let rest = rest[6..].trim_start();

    let (rest, model_name) =
        node_id(rest).map_err(|_| "expected model name after .MODEL".to_string())?;
    let rest = rest.trim_start();

    let (rest, model_type) =
        node_id(rest).map_err(|_| "expected model type (D) after model name".to_string())?;
    if !model_type.eq_ignore_ascii_case("D") {
        return Err(format!("unsupported model type '{}', only D is supported", model_type));
    }
    let rest = rest.trim_start();

    let params = if let Some(inner) = rest.strip_prefix('(') {
        let end = inner.find(')').ok_or("missing closing ')' in .MODEL parameters")?;
        key_values(&inner[..end])?
    } else {
        key_values(rest)?
    };

    Ok(DiodeModel {
        name: model_name.to_string(),
        params,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
