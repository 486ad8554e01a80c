//! Wrappers for the external image processing programs.
//!
//! Each wrapper only knows the command line contract of its program. Output
//! files are always placed in the node's working directory.

use super::command::{Invocation, ToolCommand};
use super::{NodeContext, NodeError, PortSpec};
use std::path::Path;

const KNOWN_EXTENSIONS: [&str; 8] = [".nii.gz", ".nii", ".mnc.gz", ".mnc", ".csv", ".tsv", ".tag", ".h5"];

/// File name of `path` with a known image, table or transform extension removed.
#[must_use]
pub fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    KNOWN_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .map_or_else(|| name.clone(), str::to_string)
}

fn ports(names: &[&str]) -> Vec<PortSpec> {
    names.iter().map(|n| PortSpec::required(*n)).collect()
}

fn outputs(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

/// Converts NIfTI to MINC.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nii2Mnc;

impl ToolCommand for Nii2Mnc {
    fn kind(&self) -> &str {
        "nii2mnc"
    }

    fn program(&self) -> &str {
        "nii2mnc"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        ports(&["in_file"])
    }

    fn output_ports(&self) -> Vec<String> {
        outputs(&["out_file"])
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let input = ctx.file("in_file")?;
        let out = ctx.work_path(&format!("{}.mnc", file_stem(input)));
        Ok(Invocation::default()
            .arg("-quiet")
            .path_arg(input)
            .path_arg(&out)
            .output("out_file", out))
    }
}

/// Converts MINC to uncompressed NIfTI.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mnc2Nii {
    /// Store voxels as bytes.
    pub write_byte: bool,
    /// Store voxels unsigned.
    pub write_unsigned: bool,
}

impl ToolCommand for Mnc2Nii {
    fn kind(&self) -> &str {
        "mnc2nii"
    }

    fn program(&self) -> &str {
        "mnc2nii"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        ports(&["in_file"])
    }

    fn output_ports(&self) -> Vec<String> {
        outputs(&["out_file"])
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let input = ctx.file("in_file")?;
        let out = ctx.work_path(&format!("{}.nii", file_stem(input)));
        let mut invocation = Invocation::default().arg("-nii");
        if self.write_byte {
            invocation = invocation.arg("-byte");
        }
        if self.write_unsigned {
            invocation = invocation.arg("-unsigned");
        }
        Ok(invocation.path_arg(input).path_arg(&out).output("out_file", out))
    }
}

/// Non-parametric non-uniform intensity normalization (bias correction).
#[derive(Debug, Clone, Copy, Default)]
pub struct NuCorrect;

impl ToolCommand for NuCorrect {
    fn kind(&self) -> &str {
        "nu_correct"
    }

    fn program(&self) -> &str {
        "nu_correct"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        ports(&["in_file"])
    }

    fn output_ports(&self) -> Vec<String> {
        outputs(&["out_file"])
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let input = ctx.file("in_file")?;
        let out = ctx.work_path(&format!("{}_nu.mnc", file_stem(input)));
        Ok(Invocation::default()
            .arg("-clobber")
            .arg("-tmpdir")
            .path_arg(&ctx.work_dir)
            .path_arg(input)
            .path_arg(&out)
            .output("out_file", out))
    }
}

/// Intensity normalization to a target range.
#[derive(Debug, Clone, Copy)]
pub struct INormalize {
    /// Target intensity range.
    pub const2: [f64; 2],
    /// Histogram percentile clip.
    pub range: f64,
}

impl ToolCommand for INormalize {
    fn kind(&self) -> &str {
        "inormalize"
    }

    fn program(&self) -> &str {
        "inormalize"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        ports(&["in_file"])
    }

    fn output_ports(&self) -> Vec<String> {
        outputs(&["out_file"])
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let input = ctx.file("in_file")?;
        let out = ctx.work_path(&format!("{}_inorm.mnc", file_stem(input)));
        Ok(Invocation::default()
            .arg("-clobber")
            .arg("-const2")
            .arg(self.const2[0].to_string())
            .arg(self.const2[1].to_string())
            .arg("-range")
            .arg(self.range.to_string())
            .path_arg(input)
            .path_arg(&out)
            .output("out_file", out))
    }
}

/// Brain extraction producing a skull-stripped image and a binary mask.
#[derive(Debug, Clone, Copy)]
pub struct Bet {
    /// Fractional intensity threshold.
    pub frac: f64,
    /// Vertical gradient of the threshold.
    pub vertical_gradient: f64,
}

impl ToolCommand for Bet {
    fn kind(&self) -> &str {
        "bet"
    }

    fn program(&self) -> &str {
        "bet"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        ports(&["in_file"])
    }

    fn output_ports(&self) -> Vec<String> {
        outputs(&["out_file", "mask_file"])
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let input = ctx.file("in_file")?;
        let stem = file_stem(input);
        let out = ctx.work_path(&format!("{stem}_brain.nii.gz"));
        let mask = ctx.work_path(&format!("{stem}_brain_mask.nii.gz"));
        Ok(Invocation::default()
            .path_arg(input)
            .path_arg(&out)
            .arg("-m")
            .arg("-f")
            .arg(self.frac.to_string())
            .arg("-g")
            .arg(self.vertical_gradient.to_string())
            .env("FSLOUTPUTTYPE", "NIFTI_GZ")
            .output("out_file", out)
            .output("mask_file", mask))
    }
}

/// Multiplies an image by a binary mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyMask;

impl ToolCommand for ApplyMask {
    fn kind(&self) -> &str {
        "image_maths"
    }

    fn program(&self) -> &str {
        "fslmaths"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        ports(&["in_file", "mask_file"])
    }

    fn output_ports(&self) -> Vec<String> {
        outputs(&["out_file"])
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let input = ctx.file("in_file")?;
        let mask = ctx.file("mask_file")?;
        let out = ctx.work_path(&format!("{}_masked.nii.gz", file_stem(input)));
        Ok(Invocation::default()
            .path_arg(input)
            .arg("-mas")
            .path_arg(mask)
            .path_arg(&out)
            .env("FSLOUTPUTTYPE", "NIFTI_GZ")
            .output("out_file", out))
    }
}

/// Transform model of one registration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    /// Rigid followed by affine, initialized by aligning centers of mass.
    Affine,
    /// Symmetric normalization, initialized by a given transform.
    Syn,
}

/// Image registration writing composite forward and inverse transforms.
#[derive(Debug, Clone, Copy)]
pub struct AntsRegistration {
    /// Transform model.
    pub kind: RegistrationKind,
    /// Run a single iteration per level.
    pub debug: bool,
    /// Threads to use.
    pub num_threads: usize,
}

impl AntsRegistration {
    fn iterations(&self, full: &str) -> String {
        if self.debug {
            "1x1x1x1".to_string()
        } else {
            full.to_string()
        }
    }
}

impl ToolCommand for AntsRegistration {
    fn kind(&self) -> &str {
        match self.kind {
            RegistrationKind::Affine => "ants_registration_affine",
            RegistrationKind::Syn => "ants_registration_syn",
        }
    }

    fn program(&self) -> &str {
        "antsRegistration"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        let mut ports = ports(&["fixed_image", "moving_image"]);
        if self.kind == RegistrationKind::Syn {
            ports.push(PortSpec::required("initial_moving_transform"));
        }
        ports
    }

    fn output_ports(&self) -> Vec<String> {
        outputs(&["composite_transform", "inverse_composite_transform", "warped_image"])
    }

    fn takes_threads(&self) -> bool {
        true
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let fixed = ctx.file("fixed_image")?.to_string_lossy().into_owned();
        let moving = ctx.file("moving_image")?.to_string_lossy().into_owned();
        let prefix = ctx.work_path("transform").to_string_lossy().into_owned();
        let warped = ctx.work_path("transformWarped.nii.gz");

        let mut invocation = Invocation::default()
            .arg("--dimensionality")
            .arg("3")
            .arg("--float")
            .arg("0")
            .arg("--verbose")
            .arg("1")
            .arg("--output")
            .arg(format!("[{prefix},{}]", warped.to_string_lossy()))
            .arg("--interpolation")
            .arg("Linear")
            .arg("--winsorize-image-intensities")
            .arg("[0.005,0.995]")
            .arg("--write-composite-transform")
            .arg("1")
            .arg("--initial-moving-transform");
        invocation = match self.kind {
            RegistrationKind::Affine => invocation.arg(format!("[{fixed},{moving},1]")),
            RegistrationKind::Syn => invocation.path_arg(ctx.file("initial_moving_transform")?),
        };

        let stages: Vec<(&str, String, &str)> = match self.kind {
            RegistrationKind::Affine => vec![
                ("Rigid[0.1]", format!("MI[{fixed},{moving},1,32,Regular,0.25]"), "1000x500x250x100"),
                ("Affine[0.1]", format!("MI[{fixed},{moving},1,32,Regular,0.25]"), "1000x500x250x100"),
            ],
            RegistrationKind::Syn => vec![("SyN[0.1,3,0]", format!("CC[{fixed},{moving},1,4]"), "100x70x50x20")],
        };
        for (transform, metric, iterations) in stages {
            invocation = invocation
                .arg("--transform")
                .arg(transform)
                .arg("--metric")
                .arg(metric)
                .arg("--convergence")
                .arg(format!("[{},1e-6,10]", self.iterations(iterations)))
                .arg("--shrink-factors")
                .arg("8x4x2x1")
                .arg("--smoothing-sigmas")
                .arg("3x2x1x0vox");
        }

        Ok(invocation
            .env("ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS", self.num_threads.to_string())
            .output("composite_transform", ctx.work_path("transformComposite.h5"))
            .output("inverse_composite_transform", ctx.work_path("transformInverseComposite.h5"))
            .output("warped_image", warped))
    }
}

/// Interpolation used when resampling through a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Nearest neighbour, for binary masks.
    NearestNeighbor,
    /// Per-label smoothing with majority vote, for label atlases.
    MultiLabel,
}

impl Interpolation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::NearestNeighbor => "NearestNeighbor",
            Self::MultiLabel => "MultiLabel",
        }
    }
}

/// Resamples an image into a reference space through a transform list.
#[derive(Debug, Clone, Copy)]
pub struct ApplyTransforms {
    /// Interpolation. Only categorical interpolations are offered since the
    /// pipeline only resamples masks and atlases.
    pub interpolation: Interpolation,
    /// Threads to use.
    pub num_threads: usize,
}

impl ToolCommand for ApplyTransforms {
    fn kind(&self) -> &str {
        "apply_transforms"
    }

    fn program(&self) -> &str {
        "antsApplyTransforms"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        ports(&["input_image", "reference_image", "transforms"])
    }

    fn output_ports(&self) -> Vec<String> {
        outputs(&["output_image"])
    }

    fn takes_threads(&self) -> bool {
        true
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let input = ctx.file("input_image")?;
        let out = ctx.work_path(&format!("{}_trans.nii.gz", file_stem(input)));
        let mut invocation = Invocation::default()
            .arg("--dimensionality")
            .arg("3")
            .arg("--input")
            .path_arg(input)
            .arg("--reference-image")
            .path_arg(ctx.file("reference_image")?)
            .arg("--output")
            .path_arg(&out)
            .arg("--interpolation")
            .arg(self.interpolation.as_str());
        for transform in ctx.files("transforms")? {
            invocation = invocation.arg("--transform").path_arg(transform);
        }
        Ok(invocation
            .env("ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS", self.num_threads.to_string())
            .output("output_image", out))
    }
}

/// Moves a CSV point set through a transform list.
#[derive(Debug, Clone, Copy)]
pub struct ApplyTransformsToPoints {
    /// Threads to use.
    pub num_threads: usize,
}

impl ToolCommand for ApplyTransformsToPoints {
    fn kind(&self) -> &str {
        "apply_transforms_to_points"
    }

    fn program(&self) -> &str {
        "antsApplyTransformsToPoints"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        ports(&["input_file", "transforms"])
    }

    fn output_ports(&self) -> Vec<String> {
        outputs(&["output_file"])
    }

    fn takes_threads(&self) -> bool {
        true
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let input = ctx.file("input_file")?;
        let out = ctx.work_path(&format!("{}_transformed.csv", file_stem(input)));
        let mut invocation = Invocation::default()
            .arg("--dimensionality")
            .arg("3")
            .arg("--input")
            .path_arg(input)
            .arg("--output")
            .path_arg(&out);
        for transform in ctx.files("transforms")? {
            invocation = invocation.arg("--transform").path_arg(transform);
        }
        Ok(invocation
            .env("ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS", self.num_threads.to_string())
            .output("output_file", out))
    }
}

/// Supervised tissue classification from training points.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classify {
    /// Write the feature values at the training points instead of a label map.
    pub dump_features: bool,
}

impl ToolCommand for Classify {
    fn kind(&self) -> &str {
        if self.dump_features {
            "classify_features"
        } else {
            "classify"
        }
    }

    fn program(&self) -> &str {
        "classify"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        ports(&["in_file", "tag_file", "mask_file"])
    }

    fn output_ports(&self) -> Vec<String> {
        if self.dump_features {
            outputs(&["features"])
        } else {
            outputs(&["out_file"])
        }
    }

    fn plan(&self, ctx: &NodeContext) -> Result<Invocation, NodeError> {
        let input = ctx.file("in_file")?;
        let mut invocation = Invocation::default()
            .arg("-clobber")
            .arg("-nocache")
            .arg("-tagfile")
            .path_arg(ctx.file("tag_file")?)
            .arg("-mask")
            .path_arg(ctx.file("mask_file")?)
            .arg("-user_mask_value")
            .arg("0.5");
        if self.dump_features {
            let features = ctx.work_path("features.csv");
            invocation = invocation
                .arg("-dump_features")
                .path_arg(&features)
                .path_arg(input)
                .output("features", features);
        } else {
            let out = ctx.work_path(&format!("{}_classified.mnc", file_stem(input)));
            invocation = invocation.path_arg(input).path_arg(&out).output("out_file", out);
        }
        Ok(invocation)
    }
}
