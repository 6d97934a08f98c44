//! Result persistence.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_derive::Serialize;

use crate::error::Result;
use crate::fit::{FitReport, FittingContext};
use crate::netlist;
use crate::session::SessionSummary;
use crate::simulator::IvCurve;

/// What [`write_result`] put on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    /// The synthesized netlist of the best schematic.
    Netlist,
    /// A JSON dump, because the best schematic never simulated.
    Dump,
}

#[derive(Serialize)]
struct ResultDump<'a> {
    success: bool,
    #[serde(flatten)]
    session: SessionSummary<'a>,
}

/// Persist the best schematic of `report` to `path`, success or not.
///
/// The curve kept by the best session is reused; a session without one is
/// simulated once more. With a curve the netlist is written, along with a
/// CSV of target and fitted curves when `curve_csv` is given. Without one
/// `path` receives a JSON dump of the session.
pub fn write_result(
    report: &FitReport,
    ctx: &FittingContext,
    path: &Path,
    curve_csv: Option<&Path>,
) -> Result<Written> {
    let text = netlist::synthesize(report.schematic(), &ctx.config().limits);
    let fitted = match &report.best.curve {
        Some(curve) => Ok(curve.clone()),
        None => ctx.simulator().simulate(&text, ctx.stimulus()),
    };

    match fitted {
        Ok(curve) => {
            std::fs::write(path, &text)?;
            if let Some(csv_path) = curve_csv {
                let mut writer = BufWriter::new(File::create(csv_path)?);
                write_curves_csv(ctx.target().curve(), &curve, &mut writer)?;
                writer.flush()?;
            }
            tracing::info!(path = %path.display(), "wrote fitted netlist");
            Ok(Written::Netlist)
        }
        Err(e) => {
            tracing::warn!(error = %e, "best schematic failed to simulate, writing JSON dump");
            let dump = ResultDump {
                success: report.success,
                session: report.best.summary(),
            };
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, &dump)?;
            writeln!(writer)?;
            writer.flush()?;
            Ok(Written::Dump)
        }
    }
}

/// Write target and fitted curves side by side as CSV.
///
/// Format:
/// ```csv
/// Index,V_target,I_target,V_fitted,I_fitted
/// 0,0,0,0,0
/// 1,0.314,0.000314,0.314,0.000311
/// ```
/// Cells past the end of the shorter curve are left empty.
pub fn write_curves_csv<W: Write>(
    target: &IvCurve,
    fitted: &IvCurve,
    writer: &mut W,
) -> Result<()> {
    writeln!(writer, "Index,V_target,I_target,V_fitted,I_fitted")?;
    for k in 0..target.len().max(fitted.len()) {
        write!(writer, "{}", k)?;
        for curve in [target, fitted] {
            match (curve.voltages.get(k), curve.currents.get(k)) {
                (Some(v), Some(i)) => write!(writer, ",{},{}", v, i)?,
                _ => write!(writer, ",,")?,
            }
        }
        writeln!(writer)?;
    }
    Ok(())
}
