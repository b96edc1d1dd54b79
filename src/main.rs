use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use cachesim::cache::{InclusionPolicy, LevelConfig, WritePolicy};
use cachesim::cli::{Args, Commands};
use cachesim::engine::{Engine, EngineConfig, RunOptions};
use cachesim::error::SimError;
use cachesim::presets::{self, Preset};
use cachesim::tlb::TlbConfig;
use cachesim::trace::{FileTable, TraceDecoder};
use cachesim::Report;

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match &args.command {
        Some(Commands::ListPresets) => {
            for name in presets::names() {
                println!("{name}");
            }
            ExitCode::SUCCESS
        }
        Some(Commands::Compare {
            trace,
            left,
            right,
            cores,
        }) => match run_compare(trace, left, right, *cores) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => report_failure(e),
        },
        None => match run_single(&args) {
            Ok(code) => code,
            Err(e) => report_failure(e),
        },
    }
}

fn report_failure(e: anyhow::Error) -> ExitCode {
    eprintln!("error: {e:#}");
    if let Some(sim_err) = e.downcast_ref::<SimError>() {
        ExitCode::from(sim_err.exit_code() as u8)
    } else {
        ExitCode::from(4)
    }
}

fn open_trace(path: &Option<String>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(p) => {
            let f = File::open(p).with_context(|| format!("opening trace file {p:?}"))?;
            Ok(Box::new(BufReader::new(f)))
        }
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let preset = presets::lookup(&args.config)?;
    let mut cfg = presets::engine_config_for(&preset, args.cores, args.fast, args.seed);
    apply_overrides(&mut cfg, &preset, args);
    Ok(cfg)
}

fn apply_overrides(cfg: &mut EngineConfig, preset: &Preset, args: &Args) {
    let line_size = args.line_size.unwrap_or(preset.line_size);
    if let Some(sz) = args.l1_size {
        cfg.l1_template.size_bytes = sz;
    }
    if let Some(a) = args.l1_assoc {
        cfg.l1_template.associativity = a;
    }
    cfg.l1_template.line_size = line_size;

    if let Some(sz) = args.l2_size {
        cfg.l2.size_bytes = sz;
    }
    if let Some(a) = args.l2_assoc {
        cfg.l2.associativity = a;
    }
    cfg.l2.line_size = line_size;

    match (args.l3_size, &mut cfg.l3) {
        (Some(sz), Some(l3)) => l3.size_bytes = sz,
        (Some(sz), None) => {
            cfg.l3 = Some(LevelConfig {
                name: "l3".into(),
                size_bytes: sz,
                line_size,
                associativity: args.l3_assoc.unwrap_or(16),
                replacement: preset.replacement,
                write_policy: WritePolicy::default(),
                inclusion: InclusionPolicy::NonInclusiveNonExclusive,
                track_3c: !args.fast,
                seed: args.seed ^ 0x3232_3232,
            });
        }
        _ => {}
    }
    if let (Some(a), Some(l3)) = (args.l3_assoc, &mut cfg.l3) {
        l3.associativity = a;
    }
    if let Some(l3) = &mut cfg.l3 {
        l3.line_size = line_size;
    }

    if let Some(choice) = args.prefetch {
        cfg.prefetch_policy = choice.into();
    }
    cfg.prefetch_degree = args.prefetch_degree;
    cfg.dtlb = Some(TlbConfig::default());
    cfg.itlb = Some(TlbConfig::default());
}

fn run_single(args: &Args) -> Result<ExitCode> {
    let cfg = build_config(args)?;
    let (report, truncated) = run_engine(cfg, &args.trace, args)?;
    emit(&report, args.json)?;
    if truncated {
        log::warn!("run truncated at the configured event limit");
        return Ok(ExitCode::from(SimError::Overflow { limit: args.limit }.exit_code() as u8));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_engine(cfg: EngineConfig, trace_path: &Option<String>, args: &Args) -> Result<(Report, bool)> {
    let mut engine = Engine::new(cfg).map_err(anyhow::Error::from)?;
    let reader = open_trace(trace_path)?;
    let mut decoder = TraceDecoder::new(reader);
    let mut files = FileTable::new();
    let opts = RunOptions {
        event_limit: args.limit,
        sample_rate: args.sample.max(1),
        progress_every: if args.verbose { 50 } else { 0 },
        verbose: args.verbose,
    };
    let report = engine
        .run(
            &mut decoder,
            &mut files,
            &opts,
            || false,
            |p| {
                log::debug!(
                    "progress: {} events, l1d hits={} misses={}",
                    p.events,
                    p.l1d.hits,
                    p.l1d.misses
                );
            },
        )
        .map_err(anyhow::Error::from)?;
    Ok((report, engine.was_truncated()))
}

fn run_compare(trace: &str, left: &str, right: &str, cores: usize) -> Result<()> {
    for name in [left, right] {
        let preset = presets::lookup(name)?;
        let cfg = presets::engine_config_for(&preset, cores, false, 0x9E37_79B9);
        let mut engine = Engine::new(cfg).map_err(anyhow::Error::from)?;
        let reader = open_trace(&Some(trace.to_string()))?;
        let mut decoder = TraceDecoder::new(reader);
        let mut files = FileTable::new();
        let report = engine
            .run(&mut decoder, &mut files, &RunOptions::default(), || false, |_| {})
            .map_err(anyhow::Error::from)?;
        println!("=== {name} ===");
        println!("{}", report.to_table());
    }
    Ok(())
}

fn emit(report: &Report, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", report.to_string_pretty()?);
    } else {
        println!("{}", report.to_table());
    }
    Ok(())
}
