//! CSV export of acquired samples

use super::protocol::{OutputKind, Sample};
use std::io::{self, Write};

/// Column header
pub const CSV_HEADER: &str = "index,value,unit";

/// Write `samples` as CSV rows, oldest first
pub fn write_csv<W: Write>(mut writer: W, samples: &[Sample], unit: OutputKind) -> io::Result<()> {
    writeln!(writer, "{CSV_HEADER}")?;
    let unit = unit.unit();
    for sample in samples {
        writeln!(writer, "{},{:e},{}", sample.index, sample.value, unit)?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_follow_sample_order() {
        let samples = [
            Sample { index: 4, value: 6.409e-4 },
            Sample { index: 5, value: 100_000.0 },
        ];
        let mut out = Vec::new();
        write_csv(&mut out, &samples, OutputKind::Current).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, ["index,value,unit", "4,6.409e-4,A", "5,1e5,A"]);
    }

    #[test]
    fn test_energy_unit_and_empty_input() {
        let mut out = Vec::new();
        write_csv(&mut out, &[], OutputKind::Energy).unwrap();
        assert_eq!(out, b"index,value,unit\n");

        let mut out = Vec::new();
        write_csv(&mut out, &[Sample { index: 0, value: 2.5 }], OutputKind::Energy).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("0,2.5e0,J\n"));
    }
}
