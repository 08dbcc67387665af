use std::path::{Path, PathBuf};

use crate::error::{EftemError, Result};

use super::binning::DqeMeasurement;

/// Column names of the report table.
pub const COLUMNS: [&str; 5] = ["binning", "mean", "stdv", "var", "dqe"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLocale {
    /// `.` as decimal separator.
    English,
    /// `,` as decimal separator.
    German,
}

impl ReportLocale {
    fn decimal_separator(self) -> char {
        match self {
            ReportLocale::English => '.',
            ReportLocale::German => ',',
        }
    }
}

/// Scientific notation with six decimals and an at least two-digit signed
/// exponent, e.g. `1.234568e+03`.
pub fn format_scientific(value: f64, locale: ReportLocale) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let formatted = format!("{value:.6e}");
    let text = match formatted.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{mantissa}e{sign}{:02}", exp.abs())
            }
            Err(_) => formatted.clone(),
        },
        None => formatted.clone(),
    };
    match locale {
        ReportLocale::English => text,
        ReportLocale::German => text.replace('.', &locale.decimal_separator().to_string()),
    }
}

/// Header block: image, border, binning limit and sensitivity, then a blank line.
pub fn summary(measurement: &DqeMeasurement) -> String {
    format!(
        "Image: {}\nIgnored border: {}\nMax. binning: {}\nSensitivity: {:?}\n\n",
        measurement.image_name, measurement.border, measurement.max_binning, measurement.sensitivity
    )
}

/// Summary followed by a `;` separated table with one row per binning factor.
pub fn render_report(measurement: &DqeMeasurement, locale: ReportLocale) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .terminator(csv::Terminator::Any(b'\n'))
        .has_headers(false)
        .from_writer(summary(measurement).into_bytes());

    writer.write_record(COLUMNS)?;
    for dataset in &measurement.datasets {
        writer.write_record([
            dataset.binning.to_string(),
            format_scientific(dataset.mean, locale),
            format_scientific(dataset.std_dev(), locale),
            format_scientific(dataset.variance, locale),
            format_scientific(dataset.dqe, locale),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| EftemError::Csv(err.into_error().into()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Default report file name for an image.
pub fn report_file_name(image_name: &str) -> String {
    let stem = Path::new(image_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_name.to_string());
    format!("DQE_{stem}.txt")
}

/// `dir/report.txt` -> `dir/report_de.txt`
pub fn german_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "txt".to_string());
    path.with_file_name(format!("{stem}_de.{extension}"))
}

/// Write the English report to `path` and the German one next to it.
pub fn save_reports(measurement: &DqeMeasurement, path: &Path) -> Result<(PathBuf, PathBuf)> {
    let german = german_path(path);
    let targets = [
        (path, ReportLocale::English),
        (german.as_path(), ReportLocale::German),
    ];
    for (target, locale) in targets {
        let text = render_report(measurement, locale)?;
        std::fs::write(target, text).map_err(|source| EftemError::Io {
            path: target.to_path_buf(),
            source,
        })?;
        log::info!("DQE report written to {}", target.display());
    }
    Ok((path.to_path_buf(), german))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dqe::binning::{run_workers, DqeDataset};
    use crate::image::FloatImage;

    fn measurement(datasets: Vec<DqeDataset>) -> DqeMeasurement {
        DqeMeasurement {
            image_name: "gain.tif".into(),
            border: 2,
            max_binning: datasets.len(),
            sensitivity: 1.0,
            datasets,
        }
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(format_scientific(1234.5678, ReportLocale::English), "1.234568e+03");
        assert_eq!(format_scientific(0.00012, ReportLocale::English), "1.200000e-04");
        assert_eq!(format_scientific(0.0, ReportLocale::English), "0.000000e+00");
        assert_eq!(format_scientific(-2.5e120, ReportLocale::English), "-2.500000e+120");
        assert_eq!(format_scientific(1234.5678, ReportLocale::German), "1,234568e+03");
        assert_eq!(format_scientific(f64::NAN, ReportLocale::German), "NaN");
    }

    #[test]
    fn report_layout() {
        let report = render_report(
            &measurement(vec![DqeDataset {
                binning: 1,
                mean: 100.0,
                variance: 4.0,
                dqe: 25.0,
            }]),
            ReportLocale::German,
        )
        .unwrap();
        let expected = "Image: gain.tif\n\
                        Ignored border: 2\n\
                        Max. binning: 1\n\
                        Sensitivity: 1.0\n\
                        \n\
                        binning;mean;stdv;var;dqe\n\
                        1;1,000000e+02;2,000000e+00;4,000000e+00;2,500000e+01\n";
        assert_eq!(report, expected);
    }

    #[test]
    fn concurrent_measurement_gives_sorted_report() {
        let image = FloatImage::from_fn(48, 48, |x, y| 50.0 + ((x * 7 + y * 13) % 11) as f32);
        let datasets = run_workers(&image, 4, 1.0, 4).unwrap();
        let report = render_report(&measurement(datasets), ReportLocale::English).unwrap();
        let rows: Vec<&str> = report.lines().skip(6).collect();
        assert_eq!(rows.len(), 4);
        let factors: Vec<&str> = rows.iter().map(|r| r.split(';').next().unwrap()).collect();
        assert_eq!(factors, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn both_locales_are_saved() {
        let dir = std::env::temp_dir().join(format!("eftem-dqe-report-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(report_file_name("gain.tif"));
        let (english, german) = save_reports(&measurement(Vec::new()), &path).unwrap();

        assert_eq!(english, dir.join("DQE_gain.txt"));
        assert_eq!(german, dir.join("DQE_gain_de.txt"));
        assert!(std::fs::read_to_string(&german).unwrap().ends_with("binning;mean;stdv;var;dqe\n"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
