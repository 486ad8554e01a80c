//! Command line entry point of the TNT pipeline.
//!
//! Arguments are mapped onto the library option structs; everything else
//! happens in `tnt_pipeline`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tnt_pipeline::bids::EntityFilter;
use tnt_pipeline::config::{FailureMode, ParticipantOptions, PipelineRequest, PluginKind};
use tnt_pipeline::errors::PipelineError;
use tnt_pipeline::events::LoggingEventSink;
use tnt_pipeline::group::run_group;
use tnt_pipeline::participant::{run_participant, ParticipantPlan, RunHooks};
use tnt_pipeline::profile::create_resource_file;
use tnt_pipeline::qc::{write_qc_config, QcSettings};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tnt-pipeline", author, version, about = "Tissue and lobe segmentation of BIDS T1w scans")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the per-scan pipeline on every selected T1w scan.
    Participant(ParticipantArgs),
    /// Combine every per-scan statistics table into one group table.
    Group {
        /// Output folder of a participant run.
        output: PathBuf,
    },
    /// Write the configuration of the QC pages.
    Qcpages {
        /// Output folder of a participant run.
        output: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Aggregate a profiling run into a per-node resource table.
    CreateResourceFile {
        /// Profile JSON with name, rss_GiB, vms_GiB, cpus and time arrays.
        profile: PathBuf,
        /// Resource table to write.
        out: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PluginArg {
    Linear,
    Multiproc,
    Debug,
}

impl From<PluginArg> for PluginKind {
    fn from(arg: PluginArg) -> Self {
        match arg {
            PluginArg::Linear => Self::Linear,
            PluginArg::Multiproc => Self::MultiProc,
            PluginArg::Debug => Self::Debug,
        }
    }
}

/// Template, label and algorithm options shared by `participant` and `qcpages`.
#[derive(Args, Debug, Default)]
struct PipelineArgs {
    /// JSON file with participant options; flags override its values.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Template head.
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,
    /// Name of the template space.
    #[arg(long)]
    model_space: Option<String>,
    /// Brain mask of the template.
    #[arg(long, value_name = "FILE")]
    model_brain_mask: Option<PathBuf>,
    /// Tag file of the tissue classifier.
    #[arg(long, value_name = "FILE")]
    tags: Option<PathBuf>,
    /// Tissue label file; derived from --tags when omitted.
    #[arg(long, value_name = "FILE")]
    tag_labels: Option<PathBuf>,
    /// Lobe atlas in template space.
    #[arg(long, value_name = "FILE")]
    atlas: Option<PathBuf>,
    /// Atlas label file; derived from --atlas when omitted.
    #[arg(long, value_name = "FILE")]
    atlas_labels: Option<PathBuf>,
    /// Also segment subcortical structures.
    #[arg(long)]
    subcortical: bool,
    /// Template head of the subcortical branch.
    #[arg(long, value_name = "FILE")]
    subcortical_model: Option<PathBuf>,
    /// Name of the subcortical template space.
    #[arg(long)]
    subcortical_model_space: Option<String>,
    /// Brain mask of the subcortical template.
    #[arg(long, value_name = "FILE")]
    subcortical_model_brain_mask: Option<PathBuf>,
    /// Subcortical atlas.
    #[arg(long, value_name = "FILE")]
    subcortical_atlas: Option<PathBuf>,
    /// Subcortical label file; derived from --subcortical-atlas when omitted.
    #[arg(long, value_name = "FILE")]
    subcortical_labels: Option<PathBuf>,
    /// Also compute the intracranial volume.
    #[arg(long)]
    intracranial_volume: bool,
    /// Intracranial mask in template space.
    #[arg(long, value_name = "FILE")]
    intracranial_mask: Option<PathBuf>,
    /// Fractional intensity threshold of brain extraction.
    #[arg(long)]
    bet_frac: Option<f64>,
    /// Vertical gradient of the brain extraction threshold.
    #[arg(long, allow_negative_numbers = true)]
    bet_vertical_gradient: Option<f64>,
    /// Target intensity range of normalization.
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    inormalize_const2: Option<Vec<f64>>,
    /// Histogram percentile clip of normalization.
    #[arg(long)]
    inormalize_range: Option<f64>,
    /// Largest shear angle tolerated when forcing a qform.
    #[arg(long)]
    max_shear_angle: Option<f64>,
    /// Threads given to multi-threaded tools.
    #[arg(long)]
    num_threads: Option<usize>,
    /// Keep intermediate debugging outputs.
    #[arg(long)]
    debug: bool,
}

impl PipelineArgs {
    fn options(&self) -> Result<ParticipantOptions> {
        let mut options = match &self.config {
            Some(path) => ParticipantOptions::from_json_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => ParticipantOptions::default(),
        };
        self.apply(&mut options.pipeline);
        Ok(options)
    }

    fn apply(&self, request: &mut PipelineRequest) {
        fn set<T: Clone>(target: &mut T, value: Option<&T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: Option<&T>) {
            if let Some(value) = value {
                *target = Some(value.clone());
            }
        }

        set(&mut request.model, self.model.as_ref());
        set(&mut request.model_space, self.model_space.as_ref());
        set(&mut request.model_brain_mask, self.model_brain_mask.as_ref());
        set(&mut request.tags, self.tags.as_ref());
        set_opt(&mut request.tag_labels, self.tag_labels.as_ref());
        set(&mut request.atlas, self.atlas.as_ref());
        set_opt(&mut request.atlas_labels, self.atlas_labels.as_ref());
        request.subcortical |= self.subcortical;
        set_opt(&mut request.subcortical_model, self.subcortical_model.as_ref());
        set_opt(&mut request.subcortical_model_space, self.subcortical_model_space.as_ref());
        set_opt(&mut request.subcortical_model_brain_mask, self.subcortical_model_brain_mask.as_ref());
        set_opt(&mut request.subcortical_atlas, self.subcortical_atlas.as_ref());
        set_opt(&mut request.subcortical_labels, self.subcortical_labels.as_ref());
        request.intracranial_volume |= self.intracranial_volume;
        set_opt(&mut request.intracranial_mask, self.intracranial_mask.as_ref());
        set(&mut request.num_threads, self.num_threads.as_ref());
        request.debug |= self.debug;

        let preprocess = &mut request.preprocess;
        set(&mut preprocess.bet_frac, self.bet_frac.as_ref());
        set(&mut preprocess.bet_vertical_gradient, self.bet_vertical_gradient.as_ref());
        set(&mut preprocess.inormalize_range, self.inormalize_range.as_ref());
        set(&mut preprocess.max_shear_angle, self.max_shear_angle.as_ref());
        if let Some([low, high]) = self.inormalize_const2.as_deref() {
            preprocess.inormalize_const2 = [*low, *high];
        }
    }
}

#[derive(Args, Debug)]
struct ParticipantArgs {
    /// BIDS dataset.
    input: PathBuf,
    /// Output folder.
    output: PathBuf,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Subjects to process, with or without the sub- prefix.
    #[arg(long, num_args = 1..)]
    participant_labels: Option<Vec<String>>,
    /// Only scans of this session; without a value, only scans without one.
    #[arg(long, num_args = 0..=1, value_name = "SESSION")]
    filter_session: Option<Option<String>>,
    /// Only scans of this acquisition; without a value, only scans without one.
    #[arg(long, num_args = 0..=1, value_name = "ACQUISITION")]
    filter_acquisition: Option<Option<String>>,
    /// Only scans of this reconstruction; without a value, only scans without one.
    #[arg(long, num_args = 0..=1, value_name = "RECONSTRUCTION")]
    filter_reconstruction: Option<Option<String>>,
    /// Only scans of this run; without a value, only scans without one.
    #[arg(long, num_args = 0..=1, value_name = "RUN")]
    filter_run: Option<Option<String>>,

    /// Scheduling plugin.
    #[arg(long, value_enum)]
    plugin: Option<PluginArg>,
    /// CPU budget of the multiproc plugin.
    #[arg(long)]
    n_procs: Option<usize>,
    /// Memory budget of the multiproc plugin in GiB.
    #[arg(long)]
    memory_gb: Option<f64>,
    /// Scratch directory; must exist. A temporary directory when omitted.
    #[arg(long, value_name = "DIR")]
    working_directory: Option<PathBuf>,
    /// Per-node resource table written by create-resource-file.
    #[arg(long, value_name = "FILE")]
    resource_file: Option<PathBuf>,
    /// Keep running independent nodes of a scan after one of its nodes fails.
    #[arg(long)]
    continue_on_failure: bool,
    /// Replace every processing stage by a copy of the input scan.
    #[arg(long)]
    debug_io: bool,
    /// Do not require dataset_description.json.
    #[arg(long)]
    skip_bids_validation: bool,
    /// Write a Graphviz description of all scan graphs and exit.
    #[arg(long, value_name = "DOT_FILE")]
    graph_output: Option<PathBuf>,
}

impl ParticipantArgs {
    fn options(&self) -> Result<ParticipantOptions> {
        let mut options = self.pipeline.options()?;

        let filter = &mut options.filter;
        if let Some(labels) = &self.participant_labels {
            *filter = std::mem::take(filter).with_participants(labels.iter().cloned());
        }
        for (target, flag) in [
            (&mut filter.session, &self.filter_session),
            (&mut filter.acquisition, &self.filter_acquisition),
            (&mut filter.reconstruction, &self.filter_reconstruction),
            (&mut filter.run, &self.filter_run),
        ] {
            if flag.is_some() {
                *target = EntityFilter::from_flag(flag.clone());
            }
        }

        let execution = &mut options.execution;
        if let Some(plugin) = self.plugin {
            execution.plugin = plugin.into();
        }
        if self.n_procs.is_some() {
            execution.n_procs = self.n_procs;
        }
        if self.memory_gb.is_some() {
            execution.memory_gb = self.memory_gb;
        }
        if self.working_directory.is_some() {
            execution.working_directory.clone_from(&self.working_directory);
        }
        if self.resource_file.is_some() {
            execution.resource_file.clone_from(&self.resource_file);
        }
        if self.continue_on_failure {
            execution.failure_mode = FailureMode::ContinueOnFailure;
        }
        options.debug_io |= self.debug_io;
        options.skip_bids_validation |= self.skip_bids_validation;
        Ok(options)
    }
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn participant(args: ParticipantArgs) -> Result<()> {
    let options = args.options()?;

    if let Some(dot) = &args.graph_output {
        let plan = ParticipantPlan::build(&args.input, &args.output, &options)?;
        plan.write_dot(dot)?;
        return Ok(());
    }

    let hooks = RunHooks {
        events: Arc::new(LoggingEventSink::debug()),
        ..RunHooks::default()
    };
    let report = run_participant(&args.input, &args.output, &options, hooks).await?;
    info!(
        scans = report.scans.len(),
        failed = report.failed_scans().len(),
        duration_ms = report.duration_ms,
        "Participant level finished"
    );
    report.check()?;
    Ok(())
}

fn qcpages(output: &Path, pipeline: &PipelineArgs) -> Result<()> {
    let options = pipeline.options()?;
    write_qc_config(output, &QcSettings::from_request(&options.pipeline))?;
    Ok(())
}

fn report(err: &anyhow::Error) {
    error!("{err:#}");
    let Some(pipeline_err) = err.downcast_ref::<PipelineError>() else {
        return;
    };
    if let Some(info) = pipeline_err.error_info() {
        eprintln!("error[{}]: {}", info.code, info.summary);
        if let Some(hint) = info.fix_hint {
            eprintln!("  hint: {hint}");
        }
    }
    if pipeline_err.is_configuration() {
        eprintln!("  nothing was run");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let result = match cli.command {
        Commands::Participant(args) => participant(args).await,
        Commands::Group { output } => run_group(&output).map(|_| ()).map_err(Into::into),
        Commands::Qcpages { output, pipeline } => qcpages(&output, &pipeline),
        Commands::CreateResourceFile { profile, out } => {
            create_resource_file(&profile, &out).map(|_| ()).map_err(Into::into)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_participant_flags_map_onto_options() {
        let cli = parse(&[
            "tnt-pipeline",
            "participant",
            "/in",
            "/out",
            "--subcortical",
            "--model-space",
            "MNI",
            "--bet-frac",
            "0.3",
            "--inormalize-const2",
            "1",
            "100",
            "--filter-session",
            "--filter-acquisition",
            "10",
            "--participant-labels",
            "sub-1",
            "2",
            "--plugin",
            "multiproc",
            "--n-procs",
            "4",
            "--continue-on-failure",
            "--debug-io",
        ]);
        let Commands::Participant(args) = cli.command else {
            panic!("expected participant");
        };
        let options = args.options().unwrap();
        assert!(options.pipeline.subcortical);
        assert_eq!(options.pipeline.model_space, "MNI");
        assert!((options.pipeline.preprocess.bet_frac - 0.3).abs() < f64::EPSILON);
        assert_eq!(options.pipeline.preprocess.inormalize_const2, [1.0, 100.0]);
        assert_eq!(options.filter.session, EntityFilter::Absent);
        assert_eq!(options.filter.acquisition, EntityFilter::Equals("10".into()));
        assert_eq!(options.filter.run, EntityFilter::Any);
        assert_eq!(options.filter.participant_labels.as_ref().map(Vec::len), Some(2));
        assert_eq!(options.execution.plugin, PluginKind::MultiProc);
        assert_eq!(options.execution.n_procs, Some(4));
        assert_eq!(options.execution.failure_mode, FailureMode::ContinueOnFailure);
        assert!(options.debug_io);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("options.json");
        std::fs::write(
            &config,
            r#"{"pipeline": {"model_space": "FROMFILE", "intracranial_volume": true}, "debug_io": true}"#,
        )
        .unwrap();

        let cli = parse(&[
            "tnt-pipeline",
            "participant",
            "/in",
            "/out",
            "--config",
            config.to_str().unwrap(),
            "--model-space",
            "FLAG",
        ]);
        let Commands::Participant(args) = cli.command else {
            panic!("expected participant");
        };
        let options = args.options().unwrap();
        assert_eq!(options.pipeline.model_space, "FLAG");
        assert!(options.pipeline.intracranial_volume);
        assert!(options.debug_io);
    }

    #[test]
    fn test_other_subcommands_parse() {
        assert!(matches!(parse(&["tnt-pipeline", "group", "/out"]).command, Commands::Group { .. }));
        assert!(matches!(
            parse(&["tnt-pipeline", "-v", "create-resource-file", "p.json", "r.json"]).command,
            Commands::CreateResourceFile { .. }
        ));
        let cli = parse(&["tnt-pipeline", "qcpages", "/out", "--intracranial-volume", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["tnt-pipeline", "participant", "/in", "/out", "--plugin", "slurm"]).is_err());
    }
}
