//! Plain-text readout of analysis results.

use std::fmt::Write;
use tenney_core::solver::UnitRatio;
use tenney_core::AnalysisResult;

/// One readout line: time, pitch, target ratio and cents, alternatives,
/// equal-tempered reference, confidence and level.
///
/// A `*` after the ratio marks a frame where the target changed.
pub fn format_result(result: &AnalysisResult) -> String {
    let seconds = result.timestamp.as_secs_f64();
    let Some(frequency) = result.frequency else {
        return format!("{seconds:9.3}s  {:>10}  rms {:.4}", "--", result.rms);
    };

    let mut line = format!("{seconds:9.3}s  {frequency:8.2} Hz");
    if let Some(resolution) = &result.resolution {
        let marker = if resolution.switched { '*' } else { ' ' };
        let _ = write!(
            line,
            "  {:>7}{marker} {:+6.1}c",
            resolution.current().to_string(),
            resolution.cents_error()
        );
        if !resolution.alternatives.is_empty() {
            let alternatives: Vec<String> = resolution
                .alternatives
                .iter()
                .map(|alt| format!("{} {:+.1}c", alt.ratio, alt.cents_error))
                .collect();
            let _ = write!(line, "  [{}]", alternatives.join(", "));
        }
    }
    if let Some(note) = &result.note {
        let _ = write!(line, "  {} {:+.1}c", note.name, note.cents);
    }
    let _ = write!(line, "  conf {:.2}  rms {:.4}", result.confidence, result.rms);
    line
}

/// One row of the unit-ratio table.
pub fn format_unit_ratio(unit: &UnitRatio) -> String {
    format!(
        "{:>7}  {:8.5}  {:8.2}c  {:3}  {:6.3}",
        unit.ratio.to_string(),
        unit.value,
        unit.ratio.cents(),
        unit.complexity,
        unit.ratio.tenney_height()
    )
}
