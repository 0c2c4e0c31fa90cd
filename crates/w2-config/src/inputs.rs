//! Bathymetry and vertical profile inputs that travel with a control file.
//!
//! Both are read into typed tables. The text they were read from is kept,
//! and writing an input back emits exactly that text.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use w2_schema::Schema;

use crate::document::Document;
use crate::report::ValidationIssue;
use crate::{ConfigError, ConfigResult, load_document, serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("{file} input has {found} line(s), expected at least {needed}")]
    TooShort {
        file: &'static str,
        found: usize,
        needed: usize,
    },

    #[error("{file} input, line {line}: {message}")]
    Malformed {
        file: &'static str,
        line: usize,
        message: String,
    },
}

pub type InputResult<T> = Result<T, InputError>;

const BATHYMETRY: &str = "bathymetry";
const PROFILE: &str = "profile";

/// Lines before the layer table: comment, segment header, four segment rows, titles.
const BATHYMETRY_HEADING: usize = 7;

/// One layer row of a bathymetry table.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub number: u32,
    pub height_m: f64,
    /// Width in metres for each segment, in segment order.
    pub widths_m: Vec<f64>,
}

/// A comma-delimited bathymetry file such as `mbth_wb1.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bathymetry {
    pub comment: Option<String>,
    pub segments: Vec<u32>,
    /// Per-segment rows (`DLX`, `ELWS`, `PHI0`, `FRIC`), one value per segment.
    pub parameters: Vec<(String, Vec<f64>)>,
    /// Column titles on the seventh line. The engine does not read them.
    pub titles: Vec<String>,
    pub layers: Vec<Layer>,
    raw: String,
}

impl Bathymetry {
    pub fn parse(raw: &str) -> InputResult<Self> {
        let lines: Vec<&str> = raw.lines().collect();
        if lines.len() < BATHYMETRY_HEADING {
            return Err(InputError::TooShort {
                file: BATHYMETRY,
                found: lines.len(),
                needed: BATHYMETRY_HEADING,
            });
        }

        let comment = lines[0].strip_prefix('$').map(|text| {
            text.trim_end_matches(|c: char| c == ',' || c.is_whitespace())
                .to_string()
        });

        // The header's first cell is `SEG` or empty, the rest number the segments.
        let segments = csv_cells(lines[1])
            .into_iter()
            .skip(1)
            .map(|cell| {
                cell.parse::<u32>().map_err(|_| {
                    malformed(BATHYMETRY, 2, format!("'{cell}' is not a segment number"))
                })
            })
            .collect::<InputResult<Vec<_>>>()?;
        if segments.is_empty() {
            return Err(malformed(BATHYMETRY, 2, "no segments declared".to_string()));
        }

        let mut parameters = Vec::with_capacity(4);
        for (offset, text) in lines[2..6].iter().enumerate() {
            let line = offset + 3;
            let cells = csv_cells(text);
            let Some((name, values)) = cells.split_first() else {
                return Err(malformed(BATHYMETRY, line, "empty segment row".to_string()));
            };
            let values = numbers(BATHYMETRY, line, values)?;
            if values.len() != segments.len() {
                return Err(malformed(
                    BATHYMETRY,
                    line,
                    format!("{name} has {} value(s) for {} segment(s)", values.len(), segments.len()),
                ));
            }
            parameters.push((name.to_string(), values));
        }

        let titles = lines[6].trim().split(',').map(str::to_string).collect();

        let mut layers = Vec::new();
        for (offset, text) in lines[BATHYMETRY_HEADING..].iter().enumerate() {
            let line = offset + BATHYMETRY_HEADING + 1;
            let cells = csv_cells(text);
            if cells.is_empty() {
                continue;
            }
            // height, one width per segment, layer number
            let [height, widths @ .., number] = cells.as_slice() else {
                return Err(malformed(BATHYMETRY, line, "layer row is too short".to_string()));
            };
            let widths = numbers(BATHYMETRY, line, widths)?;
            if widths.len() != segments.len() {
                return Err(malformed(
                    BATHYMETRY,
                    line,
                    format!("{} width(s) for {} segment(s)", widths.len(), segments.len()),
                ));
            }
            layers.push(Layer {
                number: number.parse().map_err(|_| {
                    malformed(BATHYMETRY, line, format!("'{number}' is not a layer number"))
                })?,
                height_m: number_at(BATHYMETRY, line, height)?,
                widths_m: widths,
            });
        }

        Ok(Self {
            comment,
            segments,
            parameters,
            titles,
            layers,
            raw: raw.to_string(),
        })
    }

    /// Per-segment values of a parameter row, matched case-insensitively.
    pub fn parameter(&self, name: &str) -> Option<&[f64]> {
        self.parameters
            .iter()
            .find(|(row, _)| row.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// One named block of a profile file, e.g. `TemperC` tagged `T1`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileBlock {
    pub name: String,
    pub tag: String,
    /// Layer values, top layer first.
    pub values: Vec<f64>,
}

/// A vertical profile file such as `mvpr1.npt`.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// File named on the `Profile file:` line, if present.
    pub profile_file: Option<String>,
    pub comment: String,
    pub blocks: Vec<ProfileBlock>,
    raw: String,
}

impl Profile {
    pub fn parse(raw: &str) -> InputResult<Self> {
        let lines: Vec<&str> = raw.lines().collect();
        if lines.len() < 2 {
            return Err(InputError::TooShort {
                file: PROFILE,
                found: lines.len(),
                needed: 2,
            });
        }

        let profile_file = lines[0]
            .strip_prefix("Profile file:")
            .map(str::trim)
            .filter(|name| !name.is_empty() && !name.contains(char::is_whitespace))
            .map(str::to_string);
        if profile_file.is_none() {
            tracing::warn!(line = lines[0], "profile source file not named");
        }
        let comment = lines[1].trim().to_string();

        let mut blocks = Vec::new();
        let mut index = 2;
        while index < lines.len() {
            if lines[index].trim().is_empty() {
                index += 1;
                continue;
            }
            let (name, tag) = block_header(lines[index]).ok_or_else(|| {
                malformed(PROFILE, index + 1, format!("cannot name block '{}'", lines[index].trim()))
            })?;
            index += 1;

            let mut values = Vec::new();
            while let Some(text) = lines.get(index).filter(|text| !text.trim().is_empty()) {
                for token in text.split_whitespace() {
                    values.push(number_at(PROFILE, index + 1, token)?);
                }
                index += 1;
            }
            blocks.push(ProfileBlock { name, tag, values });
        }

        Ok(Self {
            profile_file,
            comment,
            blocks,
            raw: raw.to_string(),
        })
    }

    pub fn block(&self, name: &str) -> Option<&ProfileBlock> {
        self.blocks
            .iter()
            .find(|block| block.name.eq_ignore_ascii_case(name))
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Block name and column tag. The name is everything before the run of
/// repeated tags, and may contain spaces (`TDS mgl  C1  C1`).
fn block_header(text: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let (&tag, rest) = tokens.split_last()?;
    let end = rest.iter().rposition(|token| *token != tag)?;
    Some((tokens[..=end].join(" "), tag.to_string()))
}

/// Trimmed cells with the empty ones left by trailing commas removed.
fn csv_cells(text: &str) -> Vec<&str> {
    let mut cells: Vec<&str> = text.split(',').map(str::trim).collect();
    while cells.last().is_some_and(|cell| cell.is_empty()) {
        cells.pop();
    }
    cells
}

fn numbers(file: &'static str, line: usize, cells: &[&str]) -> InputResult<Vec<f64>> {
    cells.iter().map(|cell| number_at(file, line, cell)).collect()
}

fn number_at(file: &'static str, line: usize, cell: &str) -> InputResult<f64> {
    cell.parse()
        .map_err(|_| malformed(file, line, format!("'{cell}' is not a number")))
}

fn malformed(file: &'static str, line: usize, message: String) -> InputError {
    InputError::Malformed {
        file,
        line,
        message,
    }
}

/// File names of an input set inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFileNames {
    pub control: String,
    pub bathymetry: String,
    pub profile: String,
}

impl Default for InputFileNames {
    fn default() -> Self {
        Self {
            control: "w2_con.npt".to_string(),
            bathymetry: "mbth.csv".to_string(),
            profile: "mvpr1.npt".to_string(),
        }
    }
}

/// Control file, bathymetry and initial profile read together.
#[derive(Debug, Clone)]
pub struct InputSet {
    pub control: Document,
    /// Decode warnings from parsing the control file.
    pub warnings: Vec<ValidationIssue>,
    pub bathymetry: Bathymetry,
    pub profile: Profile,
}

impl InputSet {
    pub fn from_files(
        control: &Path,
        bathymetry: &Path,
        profile: &Path,
        schema: Arc<Schema>,
    ) -> ConfigResult<Self> {
        let parsed = load_document(control, schema)?;
        let bathymetry = read_input(bathymetry, Bathymetry::parse)?;
        let profile = read_input(profile, Profile::parse)?;
        Ok(Self {
            control: parsed.document,
            warnings: parsed.warnings,
            bathymetry,
            profile,
        })
    }

    /// Read the set from `dir` using `names`.
    pub fn from_dir(dir: &Path, names: &InputFileNames, schema: Arc<Schema>) -> ConfigResult<Self> {
        Self::from_files(
            &dir.join(&names.control),
            &dir.join(&names.bathymetry),
            &dir.join(&names.profile),
            schema,
        )
    }

    /// Write all three files into `dir`, creating it if needed. Existing
    /// files are only replaced when `overwrite` is set, and nothing is
    /// written if any of them would be refused.
    pub fn to_directory(
        &self,
        dir: &Path,
        names: &InputFileNames,
        overwrite: bool,
    ) -> ConfigResult<Vec<PathBuf>> {
        let files = [
            (dir.join(&names.control), serialize(&self.control)),
            (dir.join(&names.bathymetry), self.bathymetry.raw().to_string()),
            (dir.join(&names.profile), self.profile.raw().to_string()),
        ];
        if !overwrite
            && let Some((path, _)) = files.iter().find(|(path, _)| path.exists())
        {
            return Err(ConfigError::Exists { path: path.clone() });
        }
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::with_capacity(files.len());
        for (path, text) in files {
            std::fs::write(&path, text).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        tracing::debug!(dir = %dir.display(), "wrote input set");
        Ok(written)
    }
}

fn read_input<T>(path: &Path, parse: fn(&str) -> InputResult<T>) -> ConfigResult<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&raw).map_err(|source| ConfigError::Input {
        path: path.to_path_buf(),
        source,
    })
}
