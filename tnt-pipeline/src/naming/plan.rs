//! The complete set of output paths of one scan.

use super::descriptor::ArtifactDescriptor;
use super::resolver::OutputResolver;
use crate::bids::EntityDescriptor;
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A main output of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    /// Output field name.
    pub field: String,
    /// Destination path.
    pub path: PathBuf,
}

/// A label table written next to an index-coded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSidecar {
    /// Field whose output this table describes.
    pub field: String,
    /// Destination path.
    pub path: PathBuf,
    /// Serialized label table.
    pub text: String,
}

/// Resolved, collision-free destinations of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    entities: EntityDescriptor,
    outputs: Vec<PlannedOutput>,
    sidecars: Vec<PlannedSidecar>,
    crash_dir: PathBuf,
}

impl OutputPlan {
    /// Resolves every output and sidecar path and checks them for collisions.
    ///
    /// `outputs` lists `(field, descriptor)`; `sidecars` lists
    /// `(field, descriptor of the described output, label text)`. Nothing is
    /// written to disk.
    pub fn resolve(
        resolver: &OutputResolver,
        entities: &EntityDescriptor,
        outputs: &[(String, ArtifactDescriptor)],
        sidecars: &[(String, ArtifactDescriptor, String)],
    ) -> Result<Self, PipelineError> {
        let outputs = outputs
            .iter()
            .map(|(field, descriptor)| {
                Ok(PlannedOutput {
                    field: field.clone(),
                    path: resolver.resolve(field, descriptor, entities)?,
                })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;
        let sidecars = sidecars
            .iter()
            .map(|(field, descriptor, text)| {
                Ok(PlannedSidecar {
                    field: field.clone(),
                    path: resolver.resolve(field, &descriptor.label_sidecar(), entities)?,
                    text: text.clone(),
                })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let plan = Self {
            entities: entities.clone(),
            outputs,
            sidecars,
            crash_dir: resolver.crash_dir(entities)?,
        };
        if let Some(path) = first_duplicate(plan.paths()) {
            return Err(PipelineError::DuplicateOutputPath {
                path: path.to_path_buf(),
            });
        }
        Ok(plan)
    }

    /// Plans the outputs of the main graph for `config`.
    pub fn for_config(
        resolver: &OutputResolver,
        config: &PipelineConfig,
        entities: &EntityDescriptor,
    ) -> Result<Self, PipelineError> {
        let descriptors = config.output_descriptors();
        let outputs: Vec<(String, ArtifactDescriptor)> = descriptors
            .iter()
            .map(|(field, d)| (field.name().to_string(), d.clone()))
            .collect();
        let sidecars: Vec<(String, ArtifactDescriptor, String)> = descriptors
            .iter()
            .filter_map(|(field, d)| {
                let labels = config.label_set(field.label_source()?)?;
                Some((field.name().to_string(), d.clone(), labels.to_tsv()))
            })
            .collect();
        Self::resolve(resolver, entities, &outputs, &sidecars)
    }

    /// The scan these outputs belong to.
    #[must_use]
    pub const fn entities(&self) -> &EntityDescriptor {
        &self.entities
    }

    /// Main outputs in field order.
    #[must_use]
    pub fn outputs(&self) -> &[PlannedOutput] {
        &self.outputs
    }

    /// Label sidecars in field order.
    #[must_use]
    pub fn sidecars(&self) -> &[PlannedSidecar] {
        &self.sidecars
    }

    /// Crash report directory of the scan.
    #[must_use]
    pub fn crash_dir(&self) -> &Path {
        &self.crash_dir
    }

    /// Destination of `field`.
    #[must_use]
    pub fn output(&self, field: &str) -> Option<&Path> {
        self.outputs
            .iter()
            .find(|o| o.field == field)
            .map(|o| o.path.as_path())
    }

    /// Every output and sidecar path.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.outputs
            .iter()
            .map(|o| o.path.as_path())
            .chain(self.sidecars.iter().map(|s| s.path.as_path()))
    }

    /// Creates the parent directory of every path and the crash directory.
    /// Safe to call repeatedly.
    pub fn create_directories(&self) -> Result<(), PipelineError> {
        let mut created = HashSet::new();
        for parent in self.paths().filter_map(Path::parent) {
            if created.insert(parent) {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::create_dir_all(&self.crash_dir)?;
        debug!(scan = %self.entities, dirs = created.len(), "Created output directories");
        Ok(())
    }
}

/// First path that occurs more than once.
pub fn first_duplicate<'a, I>(paths: I) -> Option<&'a Path>
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut seen = HashSet::new();
    paths.into_iter().find(|p| !seen.insert(*p))
}
