//! Format conversion between NIfTI and MINC.

use crate::errors::GraphValidationError;
use crate::graph::{GraphBuilder, NodeSpec, WorkflowGraph, INPUTSPEC, OUTPUTSPEC};
use crate::nodes::tools::{Mnc2Nii, Nii2Mnc};
use crate::nodes::{CommandInterface, ForceQForm, Gunzip, Gzip};
use std::sync::Arc;

/// `in_file` (NIfTI, optionally gzipped) to `out_file` (MINC).
pub fn to_mnc_graph(name: &str) -> Result<WorkflowGraph, GraphValidationError> {
    let mut builder = GraphBuilder::stage(name, &["in_file"], &["out_file"])
        .node(NodeSpec::new("gunzip", Arc::new(Gunzip)))?
        .node(NodeSpec::new("convert", CommandInterface::shared(Nii2Mnc)))?;
    builder.connect(INPUTSPEC, "in_file", "gunzip", "in_file")?;
    builder.connect("gunzip", "out_file", "convert", "in_file")?;
    builder.connect("convert", "out_file", OUTPUTSPEC, "out_file")?;
    builder.build()
}

/// `in_file` (MINC) to `out_file` (gzipped NIfTI with its qform set from
/// the sform).
pub fn to_nii_gz_graph(name: &str, convert: Mnc2Nii, max_shear_angle: f64) -> Result<WorkflowGraph, GraphValidationError> {
    let mut builder = GraphBuilder::stage(name, &["in_file"], &["out_file"])
        .node(NodeSpec::new("convert", CommandInterface::shared(convert)))?
        .node(NodeSpec::new("forceqform", Arc::new(ForceQForm::new(max_shear_angle))))?
        .node(NodeSpec::new("gzip", Arc::new(Gzip)))?;
    builder.connect(INPUTSPEC, "in_file", "convert", "in_file")?;
    builder.connect("convert", "out_file", "forceqform", "in_file")?;
    builder.connect("forceqform", "out_file", "gzip", "in_file")?;
    builder.connect("gzip", "out_file", OUTPUTSPEC, "out_file")?;
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_mnc_chain() {
        let graph = to_mnc_graph("to_mnc").unwrap();
        assert_eq!(graph.name(), "to_mnc");
        assert_eq!(graph.execution_order(), &[INPUTSPEC, "gunzip", "convert", OUTPUTSPEC]);
    }

    #[test]
    fn test_to_nii_gz_chain() {
        let graph = to_nii_gz_graph("mnc2nii", Mnc2Nii::default(), 1e-6).unwrap();
        assert_eq!(
            graph.execution_order(),
            &[INPUTSPEC, "convert", "forceqform", "gzip", OUTPUTSPEC]
        );
        assert_eq!(graph.node("forceqform").unwrap().interface.kind(), "force_qform");
    }
}
