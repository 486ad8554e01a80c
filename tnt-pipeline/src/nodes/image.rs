//! Native NIfTI nodes: qform repair, label image combination and per-label
//! statistics.

use super::io::full_extension;
use super::tools::file_stem;
use super::{blocking, Interface, NodeContext, NodeError, PortSpec};
use crate::graph::{Datum, PortValues};
use crate::labels::{LabelCombination, LabelSet};
use async_trait::async_trait;
use ndarray::ArrayD;
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;

/// Reads a NIfTI volume as `f32`, with intensity scaling applied.
pub fn read_volume(path: &Path) -> Result<(NiftiHeader, ArrayD<f32>), NodeError> {
    let image = |e: nifti::NiftiError| NodeError::malformed(path, e.to_string());
    let obj = ReaderOptions::new().read_file(path).map_err(image)?;
    let header = obj.header().clone();
    let data = obj.into_volume().into_ndarray::<f32>().map_err(image)?;
    Ok((header, data))
}

/// Writes `data` with the geometry of `header`, keeping its integer voxel
/// type where one is set.
fn write_volume(path: &Path, header: &NiftiHeader, data: &ArrayD<f32>) -> Result<(), NodeError> {
    let mut header = header.clone();
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    let writer = WriterOptions::new(path).reference_header(&header);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let written = match header.datatype {
        DT_UINT8 => writer.write_nifti(&data.mapv(|v| v.round() as u8)),
        DT_INT16 => writer.write_nifti(&data.mapv(|v| v.round() as i16)),
        _ => writer.write_nifti(data),
    };
    written.map_err(|e| NodeError::malformed(path, e.to_string()))
}

/// Cubic millimetres per voxel.
fn voxel_volume(header: &NiftiHeader) -> f64 {
    header.pixdim[1..4].iter().map(|d| f64::from(d.abs())).product()
}

/// Label value of a voxel, if it is a non-negative integer.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn voxel_label(value: f32) -> Option<u32> {
    let rounded = value.round();
    (rounded >= 0.0 && (value - rounded).abs() < 1e-3 && rounded <= u32::MAX as f32).then_some(rounded as u32)
}

type Mat3 = [[f64; 3]; 3];

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalized(v: [f64; 3]) -> Option<[f64; 3]> {
    let norm = dot(v, v).sqrt();
    (norm > f64::EPSILON).then(|| [v[0] / norm, v[1] / norm, v[2] / norm])
}

/// Quaternion `(b, c, d)` of a proper rotation matrix, with `a >= 0`.
fn rotation_to_quaternion(r: &Mat3) -> [f64; 3] {
    let trace = r[0][0] + r[1][1] + r[2][2] + 1.0;
    let (a, b, c, d);
    if trace > 0.5 {
        a = 0.5 * trace.sqrt();
        b = 0.25 * (r[2][1] - r[1][2]) / a;
        c = 0.25 * (r[0][2] - r[2][0]) / a;
        d = 0.25 * (r[1][0] - r[0][1]) / a;
    } else {
        let xd = 1.0 + r[0][0] - (r[1][1] + r[2][2]);
        let yd = 1.0 + r[1][1] - (r[0][0] + r[2][2]);
        let zd = 1.0 + r[2][2] - (r[0][0] + r[1][1]);
        if xd > 1.0 {
            b = 0.5 * xd.sqrt();
            c = 0.25 * (r[0][1] + r[1][0]) / b;
            d = 0.25 * (r[0][2] + r[2][0]) / b;
            a = 0.25 * (r[2][1] - r[1][2]) / b;
        } else if yd > 1.0 {
            c = 0.5 * yd.sqrt();
            b = 0.25 * (r[0][1] + r[1][0]) / c;
            d = 0.25 * (r[1][2] + r[2][1]) / c;
            a = 0.25 * (r[0][2] - r[2][0]) / c;
        } else {
            d = 0.5 * zd.sqrt();
            b = 0.25 * (r[0][2] + r[2][0]) / d;
            c = 0.25 * (r[1][2] + r[2][1]) / d;
            a = 0.25 * (r[1][0] - r[0][1]) / d;
        }
    }
    if a < 0.0 {
        [-b, -c, -d]
    } else {
        [b, c, d]
    }
}

/// Rewrites the qform of `header` from its sform.
///
/// The sform must be a rotation with per-axis scaling; any pair of axes
/// deviating from orthogonal by more than `max_shear_angle` radians is
/// rejected. Headers without an sform are left untouched.
#[allow(clippy::cast_possible_truncation)]
pub fn qform_from_sform(header: &mut NiftiHeader, max_shear_angle: f64) -> Result<(), String> {
    if header.sform_code == 0 {
        return Ok(());
    }
    let rows = [header.srow_x, header.srow_y, header.srow_z];
    let column = |j: usize| [f64::from(rows[0][j]), f64::from(rows[1][j]), f64::from(rows[2][j])];
    let axes = [column(0), column(1), column(2)];
    let units = axes
        .iter()
        .map(|axis| normalized(*axis).ok_or_else(|| "sform has a zero-length axis".to_string()))
        .collect::<Result<Vec<_>, _>>()?;

    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        let shear = dot(units[i], units[j]).clamp(-1.0, 1.0).asin().abs();
        if shear > max_shear_angle {
            return Err(format!(
                "shear between axes {i} and {j} is {shear:e} rad, more than {max_shear_angle:e}"
            ));
        }
    }

    let u0 = units[0];
    let along = dot(u0, units[1]);
    let u1 = normalized([
        units[1][0] - along * u0[0],
        units[1][1] - along * u0[1],
        units[1][2] - along * u0[2],
    ])
    .ok_or_else(|| "sform axes are parallel".to_string())?;
    let u2 = cross(u0, u1);
    let qfac = if dot(units[2], u2) < 0.0 { -1.0 } else { 1.0 };
    let rotation = [[u0[0], u1[0], u2[0]], [u0[1], u1[1], u2[1]], [u0[2], u1[2], u2[2]]];
    let [b, c, d] = rotation_to_quaternion(&rotation);

    header.quatern_b = b as f32;
    header.quatern_c = c as f32;
    header.quatern_d = d as f32;
    header.quatern_x = rows[0][3];
    header.quatern_y = rows[1][3];
    header.quatern_z = rows[2][3];
    header.pixdim[0] = qfac as f32;
    for (k, axis) in axes.iter().enumerate() {
        header.pixdim[k + 1] = dot(*axis, *axis).sqrt() as f32;
    }
    header.qform_code = header.sform_code;
    Ok(())
}

/// Makes the qform of an image agree with its sform.
#[derive(Debug, Clone)]
pub struct ForceQForm {
    /// Largest accepted shear, radians.
    pub max_shear_angle: f64,
    /// Output file name; defaults to `<stem>_qform` with the input's
    /// extension.
    pub out_name: Option<String>,
}

impl ForceQForm {
    /// Creates the node with the default output name.
    #[must_use]
    pub const fn new(max_shear_angle: f64) -> Self {
        Self {
            max_shear_angle,
            out_name: None,
        }
    }

    /// Sets the output file name.
    #[must_use]
    pub fn with_out_name(mut self, name: impl Into<String>) -> Self {
        self.out_name = Some(name.into());
        self
    }
}

#[async_trait]
impl Interface for ForceQForm {
    fn kind(&self) -> &str {
        "force_qform"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("in_file")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let source = ctx.file("in_file")?.to_path_buf();
        let name = self
            .out_name
            .clone()
            .unwrap_or_else(|| format!("{}_qform.{}", file_stem(&source), full_extension(&source)));
        let dest = ctx.work_path(&name);
        let out = dest.clone();
        let max_shear_angle = self.max_shear_angle;
        blocking(move || {
            let (mut header, data) = read_volume(&source)?;
            qform_from_sform(&mut header, max_shear_angle).map_err(|reason| NodeError::malformed(&source, reason))?;
            write_volume(&dest, &header, &data)
        })
        .await?;
        Ok(PortValues::from([("out_file".to_string(), Datum::File(out))]))
    }
}

/// Combines a tissue map and a lobe map into one joint label image.
///
/// Voxels whose pair of labels is not part of the combination become 0.
#[derive(Debug, Clone)]
pub struct CombineLabels {
    combination: LabelCombination,
}

impl CombineLabels {
    /// Creates the node.
    #[must_use]
    pub const fn new(combination: LabelCombination) -> Self {
        Self { combination }
    }

    /// Combines two label volumes of the same shape.
    #[allow(clippy::cast_precision_loss)]
    pub fn combine(&self, first: &ArrayD<f32>, second: &ArrayD<f32>) -> Result<ArrayD<f32>, String> {
        if first.shape() != second.shape() {
            return Err(format!("shape {:?} does not match {:?}", first.shape(), second.shape()));
        }
        let table: HashMap<(u32, u32), u32> = self
            .combination
            .entries()
            .iter()
            .map(|e| ((e.first, e.second), e.index))
            .collect();
        let mut out = ArrayD::<f32>::zeros(first.raw_dim());
        ndarray::Zip::from(&mut out)
            .and(first)
            .and(second)
            .for_each(|o, &a, &b| {
                if let (Some(a), Some(b)) = (voxel_label(a), voxel_label(b)) {
                    if let Some(&index) = table.get(&(a, b)) {
                        *o = index as f32;
                    }
                }
            });
        Ok(out)
    }
}

#[async_trait]
impl Interface for CombineLabels {
    fn kind(&self) -> &str {
        "combine_labels"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("label_files")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let files: Vec<PathBuf> = ctx.files("label_files")?.into_iter().map(Path::to_path_buf).collect();
        let [first, second] = <[PathBuf; 2]>::try_from(files).map_err(|_| NodeError::InputType {
            port: "label_files".to_string(),
            expected: "exactly two label images",
        })?;
        let dest = ctx.work_path(&format!("{}_combined.nii.gz", file_stem(&first)));
        let out = dest.clone();
        let node = self.clone();
        blocking(move || {
            let (mut header, a) = read_volume(&first)?;
            let (_, b) = read_volume(&second)?;
            let combined = node.combine(&a, &b).map_err(|reason| NodeError::malformed(&second, reason))?;
            header.datatype = if node.combination.entries().len() <= i16::MAX as usize {
                DT_INT16
            } else {
                16
            };
            write_volume(&dest, &header, &combined)
        })
        .await?;
        Ok(PortValues::from([("out_file".to_string(), Datum::File(out))]))
    }
}

/// A per-label statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// Voxel count times voxel volume, mm^3.
    Volume,
    /// Mean intensity.
    Mean,
}

impl Statistic {
    /// Column name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Mean => "mean",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics of one label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStatRow {
    /// Label index.
    pub index: u32,
    /// Label name.
    pub name: String,
    /// Number of voxels carrying the label.
    pub voxels: u64,
    /// Volume in mm^3.
    pub volume: f64,
    /// Mean intensity; `None` for an empty label.
    pub mean: Option<f64>,
}

impl LabelStatRow {
    fn cell(&self, stat: Statistic) -> String {
        match stat {
            Statistic::Volume => self.volume.to_string(),
            Statistic::Mean => self.mean.map_or_else(|| "n/a".to_string(), |m| m.to_string()),
        }
    }
}

/// A statistics table, one row per declared label.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsTable {
    /// Statistic columns.
    pub stats: Vec<Statistic>,
    /// Rows in label order.
    pub rows: Vec<LabelStatRow>,
}

impl StatsTable {
    /// Renders the table as TSV with LF line endings.
    #[must_use]
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("index\tname");
        for stat in &self.stats {
            let _ = write!(out, "\t{stat}");
        }
        out.push('\n');
        for row in &self.rows {
            let _ = write!(out, "{}\t{}", row.index, row.name);
            for stat in &self.stats {
                let _ = write!(out, "\t{}", row.cell(*stat));
            }
            out.push('\n');
        }
        out
    }
}

/// Computes per-label statistics of `intensity` over the regions of
/// `label_image`. Rows follow the order of `labels`; voxels with undeclared
/// values are ignored.
pub fn compute_label_stats(
    label_image: &ArrayD<f32>,
    intensity: &ArrayD<f32>,
    voxel_volume: f64,
    labels: &LabelSet,
    stats: &[Statistic],
) -> Result<StatsTable, String> {
    if label_image.shape() != intensity.shape() {
        return Err(format!(
            "label image shape {:?} does not match intensity shape {:?}",
            label_image.shape(),
            intensity.shape()
        ));
    }
    let mut sums: Vec<(u64, f64)> = vec![(0, 0.0); labels.len()];
    let positions: std::collections::HashMap<u32, usize> =
        labels.iter().enumerate().map(|(i, l)| (l.index, i)).collect();
    ndarray::Zip::from(label_image).and(intensity).for_each(|&l, &v| {
        if let Some(slot) = voxel_label(l).and_then(|l| positions.get(&l)) {
            sums[*slot].0 += 1;
            sums[*slot].1 += f64::from(v);
        }
    });

    #[allow(clippy::cast_precision_loss)]
    let rows = labels
        .iter()
        .zip(sums)
        .map(|(label, (voxels, total))| LabelStatRow {
            index: label.index,
            name: label.name.clone(),
            voxels,
            volume: voxels as f64 * voxel_volume,
            mean: (voxels > 0).then(|| total / voxels as f64),
        })
        .collect();
    Ok(StatsTable {
        stats: stats.to_vec(),
        rows,
    })
}

/// Computes per-label statistics of an intensity image.
#[derive(Debug, Clone)]
pub struct ImageStats {
    /// Columns to compute.
    pub stats: Vec<Statistic>,
    /// Labels to report, by name.
    pub labels: LabelSet,
}

impl ImageStats {
    /// Creates the node.
    #[must_use]
    pub fn new(stats: &[Statistic], labels: LabelSet) -> Self {
        Self {
            stats: stats.to_vec(),
            labels,
        }
    }
}

#[async_trait]
impl Interface for ImageStats {
    fn kind(&self) -> &str {
        "image_stats"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("label_file"), PortSpec::required("in_file")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let label_file = ctx.file("label_file")?.to_path_buf();
        let in_file = ctx.file("in_file")?.to_path_buf();
        let dest = ctx.work_path(&format!("{}_stats.tsv", file_stem(&label_file)));
        let out = dest.clone();
        let node = self.clone();
        blocking(move || {
            let (header, labels) = read_volume(&label_file)?;
            let (_, intensity) = read_volume(&in_file)?;
            let table = compute_label_stats(&labels, &intensity, voxel_volume(&header), &node.labels, &node.stats)
                .map_err(|reason| NodeError::malformed(&in_file, reason))?;
            std::fs::write(&dest, table.to_tsv())?;
            Ok(())
        })
        .await?;
        Ok(PortValues::from([("out_file".to_string(), Datum::File(out))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, IxDyn};
    use pretty_assertions::assert_eq;

    fn labels(pairs: &[(u32, &str)]) -> LabelSet {
        LabelSet::from_pairs(pairs.iter().map(|(i, n)| (*i, *n))).unwrap()
    }

    fn volume(values: &[f32]) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(&[values.len(), 1, 1]), values.to_vec()).unwrap()
    }

    fn scaled_header(scale: f32) -> NiftiHeader {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.srow_x = [scale, 0.0, 0.0, -10.0];
        header.srow_y = [0.0, scale, 0.0, -20.0];
        header.srow_z = [0.0, 0.0, scale, -30.0];
        header
    }

    #[test]
    fn test_stats_by_label() {
        let l = volume(&[0.0, 1.0, 1.0, 2.0, 7.0]);
        let v = volume(&[100.0, 10.0, 20.0, 5.0, 1.0]);
        let set = labels(&[(1, "GM"), (2, "WM"), (3, "CSF")]);
        let table = compute_label_stats(&l, &v, 2.0, &set, &[Statistic::Volume, Statistic::Mean]).unwrap();
        assert_eq!(
            table.to_tsv(),
            "index\tname\tvolume\tmean\n1\tGM\t4\t15\n2\tWM\t2\t5\n3\tCSF\t0\tn/a\n"
        );
    }

    #[test]
    fn test_stats_shape_mismatch() {
        let set = labels(&[(1, "brain")]);
        assert!(compute_label_stats(&volume(&[1.0]), &volume(&[1.0, 2.0]), 1.0, &set, &[Statistic::Volume]).is_err());
    }

    #[test]
    fn test_volume_only_column() {
        let set = labels(&[(1, "ICV")]);
        let table = compute_label_stats(&volume(&[1.0, 1.0]), &volume(&[3.0, 4.0]), 1.5, &set, &[Statistic::Volume]).unwrap();
        assert_eq!(table.to_tsv(), "index\tname\tvolume\n1\tICV\t3\n");
    }

    #[test]
    fn test_combine_voxels() {
        let tissue = labels(&[(1, "GM"), (2, "WM")]);
        let atlas = labels(&[(1, "frontal"), (2, "temporal"), (3, "occipital")]);
        let node = CombineLabels::new(tissue.combine(&atlas));
        let combined = node
            .combine(&volume(&[1.0, 2.0, 2.0, 0.0, 1.0]), &volume(&[1.0, 1.0, 3.0, 2.0, 0.0]))
            .unwrap();
        assert_eq!(combined.iter().copied().collect::<Vec<_>>(), vec![1.0, 4.0, 6.0, 0.0, 0.0]);
    }

    #[test]
    fn test_combine_agrees_with_lookup() {
        let tissue = labels(&[(3, "CSF"), (1, "GM"), (2, "WM")]);
        let atlas = labels(&[(10, "frontal"), (4, "temporal")]);
        let combination = tissue.combine(&atlas);
        let node = CombineLabels::new(combination.clone());
        let first = volume(&[3.0, 3.0, 1.0, 1.0, 2.0, 2.0, 5.0]);
        let second = volume(&[10.0, 4.0, 10.0, 4.0, 10.0, 4.0, 4.0]);
        let combined = node.combine(&first, &second).unwrap();
        let expected: Vec<f32> = first
            .iter()
            .zip(second.iter())
            .map(|(&a, &b)| combination.lookup(a as u32, b as u32).map_or(0.0, |i| i as f32))
            .collect();
        assert_eq!(combined.iter().copied().collect::<Vec<_>>(), expected);
        assert_eq!(expected, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.0]);
    }

    #[test]
    fn test_voxel_label() {
        assert_eq!(voxel_label(3.0), Some(3));
        assert_eq!(voxel_label(2.9999), Some(3));
        assert_eq!(voxel_label(2.5), None);
        assert_eq!(voxel_label(-1.0), None);
    }

    #[test]
    fn test_qform_from_scaled_sform() {
        let mut header = scaled_header(2.0);
        qform_from_sform(&mut header, 1e-6).unwrap();
        assert_eq!(header.qform_code, 1);
        assert!(header.quatern_b.abs() < 1e-6);
        assert!(header.quatern_c.abs() < 1e-6);
        assert!(header.quatern_d.abs() < 1e-6);
        assert_eq!(&header.pixdim[0..4], &[1.0, 2.0, 2.0, 2.0]);
        assert_eq!((header.quatern_x, header.quatern_y, header.quatern_z), (-10.0, -20.0, -30.0));
    }

    #[test]
    fn test_qform_flipped_axis() {
        let mut header = scaled_header(1.0);
        header.srow_x = [-1.0, 0.0, 0.0, 0.0];
        qform_from_sform(&mut header, 1e-6).unwrap();
        // rotation by pi about y, third axis flipped back by qfac
        assert!((header.pixdim[0] + 1.0).abs() < 1e-6);
        assert!((header.quatern_c.abs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_qform_rejects_shear() {
        let mut header = scaled_header(1.0);
        header.srow_x = [1.0, 0.1, 0.0, 0.0];
        let before = header.clone();
        let err = qform_from_sform(&mut header, 1e-6).unwrap_err();
        assert!(err.contains("shear"));
        assert_eq!(header, before);
    }

    #[tokio::test]
    async fn test_image_stats_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut header = scaled_header(2.0);
        header.pixdim = [1.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0];
        let seg = dir.path().join("seg.nii.gz");
        let t1 = dir.path().join("t1.nii.gz");
        let seg_data = Array3::<f32>::from_shape_vec((2, 1, 1), vec![1.0, 0.0]).unwrap();
        let t1_data = Array3::<f32>::from_shape_vec((2, 1, 1), vec![8.0, 3.0]).unwrap();
        WriterOptions::new(&seg).reference_header(&header).write_nifti(&seg_data).unwrap();
        WriterOptions::new(&t1).reference_header(&header).write_nifti(&t1_data).unwrap();

        let ctx = NodeContext::new(
            "stats",
            dir.path(),
            PortValues::from([
                ("label_file".to_string(), Datum::File(seg)),
                ("in_file".to_string(), Datum::File(t1)),
            ]),
        );
        let node = ImageStats::new(&[Statistic::Volume, Statistic::Mean], labels(&[(1, "brain")]));
        let out = node.run(&ctx).await.unwrap();
        let text = std::fs::read_to_string(out["out_file"].as_file().unwrap()).unwrap();
        assert_eq!(text, "index\tname\tvolume\tmean\n1\tbrain\t8\t8\n");
    }
}
