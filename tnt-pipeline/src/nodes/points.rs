//! Point set formats.
//!
//! Classifier training points travel through three formats: the template
//! tag table (`x, y, z, index`, RAS), the CSV read by the point transform
//! tool (LPS) and the MNI tag file read by the classifier (RAS).

use super::tools::file_stem;
use super::{blocking, Interface, NodeContext, NodeError, PortSpec};
use crate::graph::{Datum, PortValues};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// One labelled point in world coordinates (RAS).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Right.
    pub x: f64,
    /// Anterior.
    pub y: f64,
    /// Superior.
    pub z: f64,
    /// Tissue class of the point.
    pub index: u32,
}

/// On-disk point set format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointFormat {
    /// Tab separated `x, y, z, index` table.
    Tsv,
    /// Point transform CSV (`x,y,z,t,label`), LPS.
    Ants,
    /// MNI tag point file.
    Minc,
}

impl PointFormat {
    /// Format implied by a file name.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "tsv" => Some(Self::Tsv),
            "csv" => Some(Self::Ants),
            "tag" => Some(Self::Minc),
            _ => None,
        }
    }

    /// File extension of the format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Tsv => "tsv",
            Self::Ants => "csv",
            Self::Minc => "tag",
        }
    }

    /// Parses a point set.
    pub fn parse(self, text: &str, path: &Path) -> Result<Vec<Point>, NodeError> {
        match self {
            Self::Tsv => parse_table(text, '\t', "index", false, path),
            Self::Ants => parse_table(text, ',', "label", true, path),
            Self::Minc => parse_tag(text, path),
        }
    }

    /// Serializes a point set.
    #[must_use]
    pub fn render(self, points: &[Point]) -> String {
        let mut out = String::new();
        match self {
            Self::Tsv => {
                out.push_str("x\ty\tz\tindex\n");
                for p in points {
                    let _ = writeln!(out, "{}\t{}\t{}\t{}", p.x, p.y, p.z, p.index);
                }
            }
            Self::Ants => {
                out.push_str("x,y,z,t,label\n");
                for p in points {
                    let _ = writeln!(out, "{},{},{},0,{}", -p.x, -p.y, p.z, p.index);
                }
            }
            Self::Minc => {
                out.push_str("MNI Tag Point File\nVolumes = 1;\n\nPoints =");
                for p in points {
                    let _ = write!(out, "\n {} {} {} 1 {} 1 \"{}\"", p.x, p.y, p.z, p.index, p.index);
                }
                out.push_str(";\n");
            }
        }
        out
    }
}

fn parse_table(text: &str, separator: char, index_column: &str, lps: bool, path: &Path) -> Result<Vec<Point>, NodeError> {
    let text = text.trim_start_matches('\u{feff}');
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| NodeError::malformed(path, "empty point file"))?
        .split(separator)
        .map(str::trim)
        .collect();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| NodeError::malformed(path, format!("missing column '{name}'")))
    };
    let (cx, cy, cz, ci) = (column("x")?, column("y")?, column("z")?, column(index_column)?);

    let sign = if lps { -1.0 } else { 1.0 };
    lines
        .map(|line| {
            let fields: Vec<&str> = line.split(separator).map(str::trim).collect();
            let number = |i: usize| -> Result<f64, NodeError> {
                fields
                    .get(i)
                    .and_then(|v| v.parse::<f64>().ok())
                    .ok_or_else(|| NodeError::malformed(path, format!("bad coordinate in line {line:?}")))
            };
            let index = fields
                .get(ci)
                .and_then(|v| parse_index(v))
                .ok_or_else(|| NodeError::malformed(path, format!("bad index in line {line:?}")))?;
            Ok(Point {
                x: sign * number(cx)?,
                y: sign * number(cy)?,
                z: number(cz)?,
                index,
            })
        })
        .collect()
}

/// Accepts integral values written as floats, as the transform tool does.
fn parse_index(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().or_else(|| {
        let f = value.parse::<f64>().ok()?;
        if f.fract() == 0.0 && f >= 0.0 && f <= f64::from(u32::MAX) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Some(f as u32)
        } else {
            None
        }
    })
}

fn parse_tag(text: &str, path: &Path) -> Result<Vec<Point>, NodeError> {
    let body = text
        .split_once("Points =")
        .map(|(_, rest)| rest)
        .ok_or_else(|| NodeError::malformed(path, "missing 'Points =' section"))?;
    let body = body.split(';').next().unwrap_or_default();
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let (numbers, label) = match line.split_once('"') {
                Some((numbers, rest)) => (numbers, rest.trim_end_matches('"').trim()),
                None => (line, ""),
            };
            let values: Vec<f64> = numbers
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|_| NodeError::malformed(path, format!("bad tag line {line:?}")))?;
            if values.len() < 3 {
                return Err(NodeError::malformed(path, format!("bad tag line {line:?}")));
            }
            let index = parse_index(label)
                .or_else(|| values.get(4).and_then(|v| parse_index(&v.to_string())))
                .ok_or_else(|| NodeError::malformed(path, format!("tag line without class {line:?}")))?;
            Ok(Point {
                x: values[0],
                y: values[1],
                z: values[2],
                index,
            })
        })
        .collect()
}

/// Converts a point set into another format, flipping between RAS and LPS
/// where needed.
#[derive(Debug, Clone, Copy)]
pub struct ConvertPoints {
    /// Target format.
    pub out_format: PointFormat,
}

#[async_trait]
impl Interface for ConvertPoints {
    fn kind(&self) -> &str {
        "convert_points"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("in_file")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let source = ctx.file("in_file")?.to_path_buf();
        let in_format = PointFormat::from_path(&source)
            .ok_or_else(|| NodeError::malformed(&source, "unknown point file extension"))?;
        let out_format = self.out_format;
        let dest = ctx.work_path(&format!("{}_points.{}", file_stem(&source), out_format.extension()));
        let out = dest.clone();
        blocking(move || {
            let text = std::fs::read_to_string(&source)?;
            let points = in_format.parse(&text, &source)?;
            std::fs::write(&dest, out_format.render(&points))?;
            Ok(())
        })
        .await?;
        Ok(PortValues::from([("out_file".to_string(), Datum::File(out))]))
    }
}

/// Turns a header-less CSV into a TSV with the given header.
#[derive(Debug, Clone)]
pub struct Csv2Tsv {
    /// Column names.
    pub header: Vec<String>,
}

impl Csv2Tsv {
    /// Creates a converter.
    #[must_use]
    pub fn new<I, S>(header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: header.into_iter().map(Into::into).collect(),
        }
    }

    /// Converts CSV text.
    pub fn convert(&self, text: &str, path: &Path) -> Result<String, NodeError> {
        let mut out = self.header.join("\t");
        out.push('\n');
        for (number, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != self.header.len() {
                return Err(NodeError::malformed(
                    path,
                    format!("line {} has {} columns, expected {}", number + 1, fields.len(), self.header.len()),
                ));
            }
            out.push_str(&fields.join("\t"));
            out.push('\n');
        }
        Ok(out)
    }
}

#[async_trait]
impl Interface for Csv2Tsv {
    fn kind(&self) -> &str {
        "csv2tsv"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("in_file")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let source = ctx.file("in_file")?;
        let text = tokio::fs::read_to_string(source).await?;
        let converted = self.convert(&text, source)?;
        let dest: PathBuf = ctx.work_path(&format!("{}.tsv", file_stem(source)));
        tokio::fs::write(&dest, converted).await?;
        Ok(PortValues::from([("out_file".to_string(), Datum::File(dest))]))
    }
}
