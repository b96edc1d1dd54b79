use clap::{Parser, Subcommand, ValueEnum};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum, Debug)]
pub enum PrefetchChoice {
    None,
    Next,
    Stream,
    Stride,
    Adaptive,
    Intel,
}

impl From<PrefetchChoice> for crate::prefetch::PrefetchPolicyKind {
    fn from(c: PrefetchChoice) -> Self {
        use crate::prefetch::PrefetchPolicyKind as K;
        match c {
            PrefetchChoice::None => K::None,
            PrefetchChoice::Next => K::NextLine,
            PrefetchChoice::Stream => K::Stream,
            PrefetchChoice::Stride => K::Stride,
            PrefetchChoice::Adaptive => K::Adaptive,
            PrefetchChoice::Intel => K::Intel,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a trace file; reads stdin if omitted.
    pub trace: Option<String>,

    /// Named hardware preset (see `list-presets`), used as the base
    /// geometry; any `--l1-size`-style flag overrides its field.
    #[arg(long, default_value = "educational")]
    pub config: String,

    #[arg(long)]
    pub l1_size: Option<usize>,
    #[arg(long)]
    pub l1_assoc: Option<usize>,
    #[arg(long)]
    pub l2_size: Option<usize>,
    #[arg(long)]
    pub l2_assoc: Option<usize>,
    #[arg(long)]
    pub l3_size: Option<usize>,
    #[arg(long)]
    pub l3_assoc: Option<usize>,
    #[arg(long)]
    pub line_size: Option<usize>,

    #[arg(long, default_value_t = 1)]
    pub cores: usize,

    #[arg(long, value_enum)]
    pub prefetch: Option<PrefetchChoice>,
    #[arg(long, default_value_t = 1)]
    pub prefetch_degree: usize,

    /// Keep 1-in-K events (sampling); 1 disables sampling.
    #[arg(long, default_value_t = 1)]
    pub sample: u64,
    /// Maximum events processed before the run is truncated.
    #[arg(long, default_value_t = 5_000_000)]
    pub limit: u64,

    /// Disable 3C miss classification for throughput.
    #[arg(long, default_value_t = false)]
    pub fast: bool,

    /// Emit the machine-readable JSON report instead of a table.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Echo each decoded event as it is processed.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Seed for the deterministic PRNG backing Random/BRRIP replacement.
    #[arg(long, default_value_t = 0x9E37_79B9)]
    pub seed: u64,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the hardware presets built into the simulator.
    ListPresets,
    /// Run the same trace through two presets and print both reports.
    Compare {
        trace: String,
        #[arg(long)]
        left: String,
        #[arg(long)]
        right: String,
        #[arg(long, default_value_t = 1)]
        cores: usize,
    },
}
