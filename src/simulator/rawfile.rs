//! Reader for ngspice rawfiles (real-valued, ASCII or binary).
//!
//! ```text
//! Title: ...
//! Plotname: Transient Analysis
//! Flags: real
//! No. Variables: 3
//! No. Points: 1001
//! Variables:
//!     0   time    time
//!     1   v(input)  voltage
//!     2   i(v_probe) current
//! Values: | Binary:
//! ```

use crate::error::{FitError, Result};

#[derive(Debug, Clone, Default)]
pub struct RawHeader {
    pub plotname: String,
    pub num_variables: usize,
    pub num_points: usize,
    /// Lower-cased variable names in column order.
    pub variables: Vec<String>,
    pub is_binary: bool,
}

#[derive(Debug, Clone)]
pub struct RawData {
    pub header: RawHeader,
    /// `num_points` rows of `num_variables` values.
    pub rows: Vec<Vec<f64>>,
}

impl RawData {
    /// Column for `name`, matched case-insensitively.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let name = name.to_lowercase();
        let idx = self.header.variables.iter().position(|v| *v == name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }
}

fn raw_err(msg: impl Into<String>) -> FitError {
    FitError::Simulation(format!("rawfile: {}", msg.into()))
}

pub fn parse_rawfile(data: &[u8]) -> Result<RawData> {
    let text = String::from_utf8_lossy(data);
    let header = parse_header(&text)?;
    if header.num_variables == 0 {
        return Err(raw_err("no variables"));
    }
    if header.is_binary {
        parse_binary(data, header)
    } else {
        parse_ascii(&text, header)
    }
}

fn parse_header(text: &str) -> Result<RawHeader> {
    let mut header = RawHeader::default();
    let mut in_variables = false;
    let mut complex = false;

    for line in text.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("Plotname:") {
            header.plotname = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("Flags:") {
            complex = v.to_lowercase().contains("complex");
        } else if let Some(v) = line.strip_prefix("No. Variables:") {
            header.num_variables = v
                .trim()
                .parse()
                .map_err(|_| raw_err(format!("invalid No. Variables: {}", v.trim())))?;
        } else if let Some(v) = line.strip_prefix("No. Points:") {
            header.num_points = v
                .trim()
                .parse()
                .map_err(|_| raw_err(format!("invalid No. Points: {}", v.trim())))?;
        } else if line.starts_with("Variables:") {
            in_variables = true;
        } else if line.starts_with("Values:") || line.starts_with("Binary:") {
            header.is_binary = line.starts_with("Binary:");
            break;
        } else if in_variables && !line.is_empty() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                header.variables.push(parts[1].to_lowercase());
            }
        }
    }

    if complex {
        return Err(raw_err("complex data is not supported"));
    }
    if header.variables.len() != header.num_variables {
        return Err(raw_err(format!(
            "header lists {} variables, expected {}",
            header.variables.len(),
            header.num_variables
        )));
    }
    Ok(header)
}

fn parse_ascii(text: &str, header: RawHeader) -> Result<RawData> {
    let start = text.find("Values:").ok_or_else(|| raw_err("Values: marker not found"))?;
    let nvars = header.num_variables;
    let mut rows = Vec::with_capacity(header.num_points);
    let mut current = Vec::with_capacity(nvars);

    for line in text[start + "Values:".len()..].lines() {
        let mut parts = line.split_whitespace();
        let Some(first) = parts.next() else {
            continue;
        };
        // A point starts with its index followed by the first value.
        let value = if current.is_empty() {
            match parts.next() {
                Some(v) => v,
                None => return Err(raw_err(format!("missing value after point index {}", first))),
            }
        } else {
            first
        };
        current.push(
            value
                .parse::<f64>()
                .map_err(|_| raw_err(format!("invalid value '{}'", value)))?,
        );
        if current.len() == nvars {
            rows.push(std::mem::replace(&mut current, Vec::with_capacity(nvars)));
        }
    }

    Ok(RawData { header, rows })
}

fn parse_binary(data: &[u8], header: RawHeader) -> Result<RawData> {
    let marker = b"Binary:\n";
    let pos = data
        .windows(marker.len())
        .position(|w| w == marker)
        .ok_or_else(|| raw_err("Binary: marker not found"))?;
    let body = &data[pos + marker.len()..];

    let point_bytes = header.num_variables * 8;
    let rows: Vec<Vec<f64>> = body
        .chunks_exact(point_bytes)
        .take(header.num_points)
        .map(|point| {
            point
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect()
        })
        .collect();

    Ok(RawData { header, rows })
}
