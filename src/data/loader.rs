use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{EftemError, Result};
use crate::image::FloatImage;

use super::model::{PointSet, Spectrum};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a spectrum from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.msa`              – EMSA/MAS spectral data, `x, y` lines plus `#KEY: value` metadata
/// * `.csv`              – two numeric columns (energy loss, intensity), optional header
/// * `.tif/.tiff/.png`   – spectrum image, columns are summed over all rows.
///   The energy axis is taken from a `<stem>_info.txt` file next to the image
///   when there is one (see [`info_path`]).
pub fn load_file(path: &Path) -> Result<Spectrum> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let spectrum = match ext.as_str() {
        "msa" => load_msa(path)?,
        "csv" => load_csv(path)?,
        "tif" | "tiff" | "png" => {
            let image = FloatImage::load(path)?;
            let calibration = read_calibration(path)?.unwrap_or_default();
            spectrum_from_image(&file_name(path), &image, None, &calibration, false)
        }
        other => {
            return Err(EftemError::UnsupportedFormat {
                extension: other.to_string(),
            })
        }
    };
    log::info!(
        "Imported {} points from {} (x: {}, y: {})",
        spectrum.len(),
        path.display(),
        spectrum.x_unit,
        spectrum.y_unit
    );
    Ok(spectrum)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| EftemError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// MSA loader
// ---------------------------------------------------------------------------

/// Load an MSA spectrum file.
pub fn load_msa(path: &Path) -> Result<Spectrum> {
    let text = read_text(path)?;
    parse_msa(&text, path)
}

/// Parse the content of an MSA file. `path` is only used for naming and errors.
///
/// ```text
/// #FORMAT      : EMSA/MAS Spectral Data File
/// #XUNITS      : eV
/// #YUNITS      : counts
/// 250.0, 10234.0
/// 250.5, 10190.0
/// #ENDOFDATA   :
/// ```
pub fn parse_msa(text: &str, path: &Path) -> Result<Spectrum> {
    let mut pairs = Vec::new();
    let mut x_unit = None;
    let mut y_unit = None;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            if let Some(unit) = msa_keyword(line, "#XUNITS") {
                x_unit = Some(unit.to_string());
            } else if let Some(unit) = msa_keyword(line, "#YUNITS") {
                y_unit = Some(unit.to_string());
            }
            continue;
        }

        let parse_error = |reason: String| EftemError::MsaParse {
            path: path.to_path_buf(),
            line: line_no + 1,
            reason,
        };
        let mut items = line.split(',').map(str::trim);
        let (Some(x), Some(y)) = (items.next(), items.next()) else {
            return Err(parse_error(format!("expected 'x, y' but found '{line}'")));
        };
        let x: f64 = x
            .parse()
            .map_err(|_| parse_error(format!("'{x}' is not a number")))?;
        let y: f64 = y
            .parse()
            .map_err(|_| parse_error(format!("'{y}' is not a number")))?;
        pairs.push((x, y));
    }

    let mut spectrum = Spectrum::new(file_name(path), PointSet::from_pairs(pairs));
    if let Some(unit) = x_unit {
        spectrum.x_unit = unit;
    }
    if let Some(unit) = y_unit {
        spectrum.y_unit = unit;
    }
    Ok(spectrum)
}

/// Value of `#KEY : value` (whitespace around the colon is optional).
fn msa_keyword<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?.trim_start();
    rest.strip_prefix(':')?.split_whitespace().next()
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// Two-column CSV: energy loss, intensity. A non-numeric first row is taken
/// as header, lines starting with `#` are ignored.
fn load_csv(path: &Path) -> Result<Spectrum> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let mut pairs = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.map_err(|e| csv_error(path, e))?;
        let x = record.get(0).unwrap_or("");
        let y = record.get(1).unwrap_or("");
        match (x.parse::<f64>(), y.parse::<f64>()) {
            (Ok(x), Ok(y)) => pairs.push((x, y)),
            _ if row_no == 0 => continue,
            _ => {
                return Err(EftemError::MsaParse {
                    path: path.to_path_buf(),
                    line: row_no + 1,
                    reason: format!("'{x}', '{y}' is not a pair of numbers"),
                })
            }
        }
    }
    Ok(Spectrum::new(file_name(path), PointSet::from_pairs(pairs)))
}

fn csv_error(path: &Path, error: csv::Error) -> EftemError {
    match error.into_kind() {
        csv::ErrorKind::Io(source) => EftemError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => EftemError::MsaParse {
            path: path.to_path_buf(),
            line: 0,
            reason: format!("{other:?}"),
        },
    }
}

// ---------------------------------------------------------------------------
// Calibrated spectra (DM3 / spectrum images)
// ---------------------------------------------------------------------------

/// Energy axis calibration as reported by a Gatan metadata extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Channel index of zero energy loss.
    pub origin: f64,
    /// Energy per channel.
    pub scale: f64,
    pub x_unit: Option<String>,
    pub intensity_unit: Option<String>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            origin: 0.0,
            scale: 1.0,
            x_unit: None,
            intensity_unit: None,
        }
    }
}

impl Calibration {
    /// Energy loss of channel `index`: `scale * (index - origin)`.
    pub fn energy(&self, index: usize) -> f64 {
        self.scale * (index as f64 - self.origin)
    }
}

/// Build a spectrum from channel intensities and an energy calibration.
/// Missing units fall back to "eV" and "a.u.".
pub fn spectrum_from_calibration(
    name: &str,
    intensities: &[f32],
    calibration: &Calibration,
) -> Spectrum {
    let pairs = intensities
        .iter()
        .enumerate()
        .map(|(i, &y)| (calibration.energy(i), y as f64))
        .collect();
    let x_unit = non_empty(calibration.x_unit.as_deref()).unwrap_or(Spectrum::DEFAULT_X_UNIT);
    let y_unit =
        non_empty(calibration.intensity_unit.as_deref()).unwrap_or(Spectrum::DEFAULT_Y_UNIT);
    Spectrum::new(name, PointSet::from_pairs(pairs)).with_units(x_unit, y_unit)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// Sum the columns of a spectrum image over `rows` (clamped to the image;
/// `None` = all rows). With `average` the sum is divided by the row count.
pub fn spectrum_from_image(
    name: &str,
    image: &FloatImage,
    rows: Option<Range<usize>>,
    calibration: &Calibration,
    average: bool,
) -> Spectrum {
    let rows = rows.unwrap_or(0..image.height());
    let start = rows.start.min(image.height());
    let end = rows.end.min(image.height()).max(start);

    let mut profile = vec![0.0f64; image.width()];
    for y in start..end {
        for (acc, &value) in profile.iter_mut().zip(image.row(y)) {
            *acc += value as f64;
        }
    }
    if average && end > start {
        let count = (end - start) as f64;
        profile.iter_mut().for_each(|v| *v /= count);
    }
    let intensities: Vec<f32> = profile.into_iter().map(|v| v as f32).collect();
    spectrum_from_calibration(name, &intensities, calibration)
}

// ---------------------------------------------------------------------------
// Gatan metadata
// ---------------------------------------------------------------------------

/// `key = value` pairs of the "Info" property written by the DM3 reader.
#[derive(Debug, Clone, Default)]
pub struct GatanMetadata {
    entries: BTreeMap<String, String>,
}

impl GatanMetadata {
    const X_ORIGIN: &'static str = "1.ImageData.Calibrations.Dimension.0.Origin";
    const X_SCALE: &'static str = "1.ImageData.Calibrations.Dimension.0.Scale";
    const X_UNIT: &'static str = "1.ImageData.Calibrations.Dimension.0.Units";
    const INTENSITY_UNIT: &'static str = "Brightness.Units";

    pub fn parse(info: &str) -> Self {
        let entries = info
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Self { entries }
    }

    /// First value whose key ends with `suffix`.
    pub fn find(&self, suffix: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.ends_with(suffix))
            .map(|(_, value)| value.as_str())
    }

    pub fn x_origin(&self) -> Option<f64> {
        self.find(Self::X_ORIGIN)?.parse().ok()
    }

    pub fn x_scale(&self) -> Option<f64> {
        self.find(Self::X_SCALE)?.parse().ok()
    }

    pub fn x_unit(&self) -> Option<&str> {
        self.find(Self::X_UNIT)
    }

    pub fn intensity_unit(&self) -> Option<&str> {
        self.find(Self::INTENSITY_UNIT)
    }

    pub fn calibration(&self) -> Calibration {
        let default = Calibration::default();
        Calibration {
            origin: self.x_origin().unwrap_or(default.origin),
            scale: self.x_scale().unwrap_or(default.scale),
            x_unit: self.x_unit().map(str::to_string),
            intensity_unit: self.intensity_unit().map(str::to_string),
        }
    }
}

/// Gatan "Info" text belonging to an image: `<stem>_info.txt` in the same
/// directory.
pub fn info_path(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    image_path.with_file_name(format!("{stem}_info.txt"))
}

/// Calibration from the info file next to `image_path`, `None` if there is
/// no such file.
pub fn read_calibration(image_path: &Path) -> Result<Option<Calibration>> {
    let info = info_path(image_path);
    if !info.is_file() {
        return Ok(None);
    }
    let calibration = GatanMetadata::parse(&read_text(&info)?).calibration();
    log::debug!(
        "Calibration from {}: origin {}, scale {}",
        info.display(),
        calibration.origin,
        calibration.scale
    );
    Ok(Some(calibration))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSA: &str = "#FORMAT      : EMSA/MAS Spectral Data File\n\
                       #XUNITS      : eV\n\
                       #YUNITS:counts\n\
                       #SPECTRUM    :\n\
                       \n\
                       252.0, 90.0\n\
                       250.0, 100.0,\n\
                       251.0 ,95.0\n\
                       #ENDOFDATA   :\n";

    #[test]
    fn msa_reads_units_and_sorted_points() {
        let spectrum = parse_msa(MSA, Path::new("/data/C_K.msa")).unwrap();
        assert_eq!(spectrum.name, "C_K.msa");
        assert_eq!(spectrum.x_unit, "eV");
        assert_eq!(spectrum.y_unit, "counts");
        assert_eq!(spectrum.points.x, vec![250.0, 251.0, 252.0]);
        assert_eq!(spectrum.points.y, vec![100.0, 95.0, 90.0]);
    }

    #[test]
    fn msa_malformed_number_names_file_and_line() {
        let text = "#XUNITS: eV\n1.0, 2.0\n2.0, abc\n";
        let err = parse_msa(text, Path::new("broken.msa")).unwrap_err();
        match err {
            EftemError::MsaParse { path, line, .. } => {
                assert_eq!(path, Path::new("broken.msa"));
                assert_eq!(line, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
        let message = parse_msa(text, Path::new("broken.msa"))
            .unwrap_err()
            .to_string();
        assert!(message.contains("broken.msa"));
    }

    #[test]
    fn msa_single_column_is_rejected() {
        let err = parse_msa("1.0\n", Path::new("y_only.msa")).unwrap_err();
        assert!(matches!(err, EftemError::MsaParse { line: 1, .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_msa(Path::new("/definitely/not/here.msa")).unwrap_err();
        assert!(matches!(err, EftemError::Io { .. }));
        assert!(err.to_string().contains("here.msa"));
    }

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("eftem_loader_{}_{name}", std::process::id()))
    }

    #[test]
    fn csv_skips_header_and_comments() {
        let path = temp_file("header.csv");
        std::fs::write(&path, "energy,counts\n# comment\n101.0, 7\n100.0,8\n").unwrap();
        let spectrum = load_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(spectrum.name, path.file_name().unwrap().to_string_lossy());
        assert_eq!(spectrum.points.x, vec![100.0, 101.0]);
        assert_eq!(spectrum.points.y, vec![8.0, 7.0]);
    }

    #[test]
    fn csv_malformed_row_names_the_row() {
        let path = temp_file("malformed.csv");
        std::fs::write(&path, "1.0,2.0\n2.0,oops\n").unwrap();
        let err = load_file(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, EftemError::MsaParse { line: 2, .. }), "{err:?}");
    }

    #[test]
    fn spectrum_image_uses_info_calibration() {
        let path = temp_file("si_calibrated.tif");
        let counts: Vec<u16> = vec![100, 200, 300, 400, 1000, 2000, 3000, 4000];
        image::ImageBuffer::<image::Luma<u16>, _>::from_raw(4, 2, counts)
            .unwrap()
            .save(&path)
            .unwrap();
        let info = info_path(&path);
        std::fs::write(
            &info,
            "Root.ImageList.1.ImageData.Calibrations.Dimension.0.Origin = 2\n\
             Root.ImageList.1.ImageData.Calibrations.Dimension.0.Scale = 0.5\n\
             Root.ImageList.1.ImageData.Calibrations.Dimension.0.Units = eV\n\
             Root.ImageList.1.ImageData.Calibrations.Brightness.Units = counts\n",
        )
        .unwrap();

        let spectrum = load_file(&path);
        std::fs::remove_file(&path).ok();
        std::fs::remove_file(&info).ok();
        let spectrum = spectrum.unwrap();

        assert_eq!(spectrum.points.x, vec![-1.0, -0.5, 0.0, 0.5]);
        assert_eq!(spectrum.points.y, vec![1100.0, 2200.0, 3300.0, 4400.0]);
        assert_eq!(spectrum.x_unit, "eV");
        assert_eq!(spectrum.y_unit, "counts");
    }

    #[test]
    fn spectrum_image_without_info_uses_channel_index() {
        let path = temp_file("si_plain.png");
        image::GrayImage::from_raw(3, 1, vec![5, 6, 7])
            .unwrap()
            .save(&path)
            .unwrap();

        let spectrum = load_file(&path);
        std::fs::remove_file(&path).ok();
        let spectrum = spectrum.unwrap();

        assert_eq!(spectrum.points.x, vec![0.0, 1.0, 2.0]);
        assert_eq!(spectrum.points.y, vec![5.0, 6.0, 7.0]);
        assert_eq!(spectrum.y_unit, Spectrum::DEFAULT_Y_UNIT);
    }

    #[test]
    fn info_file_sits_next_to_the_image() {
        assert_eq!(
            info_path(Path::new("/data/si/C_K.tif")),
            PathBuf::from("/data/si/C_K_info.txt")
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_file(Path::new("spectrum.xyz")).unwrap_err();
        assert!(matches!(err, EftemError::UnsupportedFormat { .. }));
    }

    #[test]
    fn calibration_maps_channels_to_energy() {
        let calibration = Calibration {
            origin: 10.0,
            scale: 0.5,
            x_unit: Some("eV".into()),
            intensity_unit: None,
        };
        let spectrum = spectrum_from_calibration("dm3", &[1.0, 2.0, 3.0], &calibration);
        assert_eq!(spectrum.points.x, vec![-5.0, -4.5, -4.0]);
        assert_eq!(spectrum.y_unit, "a.u.");
    }

    #[test]
    fn image_profile_sums_selected_rows() {
        let image = FloatImage::from_fn(3, 4, |x, y| (x + 10 * y) as f32);
        let spectrum =
            spectrum_from_image("si", &image, Some(1..3), &Calibration::default(), false);
        assert_eq!(spectrum.points.y, vec![30.0, 32.0, 34.0]);

        let mean = spectrum_from_image("si", &image, Some(1..99), &Calibration::default(), true);
        assert_eq!(mean.points.y, vec![20.0, 21.0, 22.0]);
    }

    #[test]
    fn gatan_metadata_extracts_calibration() {
        let info = "Root.ImageList.1.ImageData.Calibrations.Dimension.0.Origin = 120.5\n\
                    Root.ImageList.1.ImageData.Calibrations.Dimension.0.Scale = 0.25\n\
                    Root.ImageList.1.ImageData.Calibrations.Dimension.0.Units = eV\n\
                    Root.ImageList.1.ImageData.Calibrations.Brightness.Units = counts\n\
                    no separator here\n";
        let calibration = GatanMetadata::parse(info).calibration();
        assert_eq!(calibration.origin, 120.5);
        assert_eq!(calibration.scale, 0.25);
        assert_eq!(calibration.x_unit.as_deref(), Some("eV"));
        assert_eq!(calibration.intensity_unit.as_deref(), Some("counts"));
    }
}
