//! File plumbing nodes: export, text write, rename and compression.

use super::{blocking, Interface, NodeContext, NodeError, PortSpec};
use crate::graph::{Datum, PortValues};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension of a file name, treating `.nii.gz` as one extension.
#[must_use]
pub fn full_extension(path: &Path) -> String {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    if name.ends_with(".nii.gz") {
        "nii.gz".to_string()
    } else {
        path.extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn single_output(path: PathBuf) -> PortValues {
    PortValues::from([("out_file".to_string(), Datum::File(path))])
}

/// Copies a finished artifact to its final destination.
#[derive(Debug, Clone, Copy)]
pub struct ExportFile {
    /// Refuse to copy between different extensions.
    pub check_extension: bool,
}

#[async_trait]
impl Interface for ExportFile {
    fn kind(&self) -> &str {
        "export_file"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("in_file"), PortSpec::required("out_file")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let source = ctx.file("in_file")?.to_path_buf();
        let dest = ctx.file("out_file")?.to_path_buf();
        if self.check_extension && full_extension(&source) != full_extension(&dest) {
            return Err(NodeError::malformed(
                &source,
                format!("extension does not match destination {}", dest.display()),
            ));
        }
        let check = dest.clone();
        blocking(move || {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&source, &dest)?;
            Ok(())
        })
        .await?;
        debug!(node = %ctx.node, dest = %check.display(), "Exported file");
        Ok(single_output(check))
    }
}

/// Writes a text parameter to a file.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteFile;

#[async_trait]
impl Interface for WriteFile {
    fn kind(&self) -> &str {
        "write_file"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("text"), PortSpec::required("out_file")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let text = ctx
            .input("text")?
            .as_param()
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| NodeError::InputType {
                port: "text".to_string(),
                expected: "a string parameter",
            })?
            .to_string();
        let dest = ctx.file("out_file")?.to_path_buf();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, text).await?;
        Ok(single_output(dest))
    }
}

/// Copies a file into the working directory under a name derived from the
/// original one by a regular expression.
#[derive(Debug, Clone)]
pub struct Rename {
    pattern: Regex,
    template: String,
}

impl Rename {
    /// Creates a rename. `template` may refer to named groups of `pattern`
    /// as `$name` or `${name}`.
    pub fn new(pattern: &str, template: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            template: template.into(),
        })
    }

    /// Replaces a `.nii` or `.nii.gz` extension with `extension`.
    pub fn nifti_to(extension: &str) -> Result<Self, regex::Error> {
        Self::new(r"^(?P<base>.*)\.nii(\.gz)?$", format!("${{base}}.{extension}"))
    }

    /// The new file name for `name`, if the pattern matches.
    #[must_use]
    pub fn target_name(&self, name: &str) -> Option<String> {
        let captures = self.pattern.captures(name)?;
        let mut out = String::new();
        captures.expand(&self.template, &mut out);
        Some(out)
    }
}

#[async_trait]
impl Interface for Rename {
    fn kind(&self) -> &str {
        "rename"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("in_file")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let source = ctx.file("in_file")?;
        let name = source.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let target = self
            .target_name(&name)
            .ok_or_else(|| NodeError::malformed(source, format!("name does not match {}", self.pattern)))?;
        let dest = ctx.work_path(&target);
        tokio::fs::copy(source, &dest).await?;
        Ok(single_output(dest))
    }
}

/// Compresses a file with gzip.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gzip;

#[async_trait]
impl Interface for Gzip {
    fn kind(&self) -> &str {
        "gzip"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("in_file")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let source = ctx.file("in_file")?.to_path_buf();
        let name = source.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let dest = ctx.work_path(&format!("{name}.gz"));
        let out = dest.clone();
        blocking(move || {
            let mut reader = BufReader::new(File::open(&source)?);
            let mut encoder = GzEncoder::new(BufWriter::new(File::create(&dest)?), Compression::default());
            io::copy(&mut reader, &mut encoder)?;
            encoder.finish()?.flush()?;
            Ok(())
        })
        .await?;
        Ok(single_output(out))
    }
}

/// Decompresses a gzip file; passes anything else through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gunzip;

#[async_trait]
impl Interface for Gunzip {
    fn kind(&self) -> &str {
        "gunzip_or_ident"
    }

    fn input_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::required("in_file")]
    }

    fn output_ports(&self) -> Vec<String> {
        vec!["out_file".to_string()]
    }

    async fn run(&self, ctx: &NodeContext) -> Result<PortValues, NodeError> {
        let source = ctx.file("in_file")?.to_path_buf();
        let name = source.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let Some(stem) = name.strip_suffix(".gz") else {
            return Ok(single_output(source));
        };
        let dest = ctx.work_path(stem);
        let out = dest.clone();
        blocking(move || {
            let mut decoder = GzDecoder::new(BufReader::new(File::open(&source)?));
            let mut writer = BufWriter::new(File::create(&dest)?);
            io::copy(&mut decoder, &mut writer)?;
            writer.flush()?;
            Ok(())
        })
        .await?;
        Ok(single_output(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn ctx(dir: &Path, inputs: &[(&str, Datum)]) -> NodeContext {
        let inputs: PortValues = inputs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        NodeContext::new("node", dir, inputs)
    }

    #[test]
    fn test_full_extension() {
        assert_eq!(full_extension(Path::new("a/b_T1w.nii.gz")), "nii.gz");
        assert_eq!(full_extension(Path::new("x.h5")), "h5");
        assert_eq!(full_extension(Path::new("noext")), "");
    }

    #[test]
    fn test_rename_target() {
        let rename = Rename::nifti_to("h5").unwrap();
        assert_eq!(rename.target_name("sub-1_T1w.nii.gz").as_deref(), Some("sub-1_T1w.h5"));
        assert_eq!(rename.target_name("sub-1_T1w.nii").as_deref(), Some("sub-1_T1w.h5"));
        assert_eq!(rename.target_name("sub-1_T1w.mnc"), None);
    }

    #[tokio::test]
    async fn test_rename_copies_content() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.nii.gz");
        std::fs::write(&source, b"voxels").unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();
        let out = Rename::nifti_to("tsv")
            .unwrap()
            .run(&ctx(&work, &[("in_file", Datum::File(source))]))
            .await
            .unwrap();
        let dest = out["out_file"].as_file().unwrap();
        assert_eq!(dest, work.join("scan.tsv"));
        assert_eq!(std::fs::read(dest).unwrap(), b"voxels");
    }

    #[tokio::test]
    async fn test_export_checks_extension() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.nii.gz");
        std::fs::write(&source, b"voxels").unwrap();
        let dest = dir.path().join("out/sub-1/anat/sub-1_stats.tsv");
        let inputs = [
            ("in_file", Datum::File(source)),
            ("out_file", Datum::File(dest.clone())),
        ];

        let strict = ExportFile { check_extension: true };
        assert!(strict.run(&ctx(dir.path(), &inputs)).await.is_err());
        assert!(!dest.exists());

        let loose = ExportFile { check_extension: false };
        loose.run(&ctx(dir.path(), &inputs)).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"voxels");
    }

    #[tokio::test]
    async fn test_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("labels/sub-1_labels.tsv");
        let inputs = [
            ("text", Datum::Param(serde_json::json!("index\tname\r\n1\tGM\r\n"))),
            ("out_file", Datum::File(dest.clone())),
        ];
        WriteFile.run(&ctx(dir.path(), &inputs)).await.unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "index\tname\r\n1\tGM\r\n");
    }

    #[tokio::test]
    async fn test_gzip_then_gunzip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("image.nii");
        std::fs::write(&source, b"raw image bytes").unwrap();

        let zipped = Gzip.run(&ctx(dir.path(), &[("in_file", Datum::File(source))])).await.unwrap();
        let gz = zipped["out_file"].as_file().unwrap().to_path_buf();
        assert!(gz.to_string_lossy().ends_with("image.nii.gz"));
        let mut text = String::new();
        GzDecoder::new(File::open(&gz).unwrap()).read_to_string(&mut text).unwrap();
        assert_eq!(text, "raw image bytes");

        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();
        let unzipped = Gunzip.run(&ctx(&work, &[("in_file", Datum::File(gz))])).await.unwrap();
        let plain = unzipped["out_file"].as_file().unwrap();
        assert_eq!(plain, work.join("image.nii"));
        assert_eq!(std::fs::read(plain).unwrap(), b"raw image bytes");
    }

    #[tokio::test]
    async fn test_gunzip_passes_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("image.nii");
        std::fs::write(&source, b"x").unwrap();
        let out = Gunzip
            .run(&ctx(dir.path(), &[("in_file", Datum::File(source.clone()))]))
            .await
            .unwrap();
        assert_eq!(out["out_file"], Datum::File(source));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_gunzip_reports_failed_write() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("full.gz");
        let mut encoder = GzEncoder::new(File::create(&source).unwrap(), Compression::default());
        encoder.write_all(b"a few bytes that stay in the write buffer").unwrap();
        encoder.finish().unwrap();

        // the decompressed file lands on /dev/full, which fails every write
        let result = Gunzip.run(&ctx(Path::new("/dev"), &[("in_file", Datum::File(source))])).await;
        assert!(result.is_err());
    }
}
