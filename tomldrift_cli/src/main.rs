use tomldrift_core::config::{CompareMode, HarnessConfig};
use tomldrift_core::corpus::SeedCorpus;
use tomldrift_core::oracle::{DivergenceOracle, RoundVerdict};

use clap::{Parser, ValueEnum};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    Structured,
    Roundtrip,
}

impl From<ModeArg> for CompareMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Structured => CompareMode::Structured,
            ModeArg::Roundtrip => CompareMode::Roundtrip,
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Differential-conformance tester for TOML decoders", long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Path to decoder A's executable (overrides config and TOML_A).
    #[clap(long)]
    decoder_a: Option<String>,
    /// Path to decoder B's executable (overrides config and TOML_B).
    #[clap(long)]
    decoder_b: Option<String>,
    /// Root of an external conformance-test tree to seed from.
    #[clap(long)]
    corpus_tree: Option<PathBuf>,
    /// Payload format and comparison mode.
    #[clap(long, value_enum)]
    mode: Option<ModeArg>,
    /// Stop after this many rounds.
    #[clap(long)]
    max_rounds: Option<u64>,
    /// Instead of replaying the corpus in order, run this many randomly
    /// sampled rounds.
    #[clap(long)]
    sample: Option<u64>,
    /// RNG seed for --sample, for reproducible runs.
    #[clap(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Debug, Default)]
struct RunSummary {
    rounds: u64,
    agreements: u64,
    uninteresting: u64,
    skipped: u64,
    divergences: u64,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            HarnessConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("tomldrift.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                HarnessConfig::load_from_file(&default_config_path)?
            } else {
                HarnessConfig::default()
            }
        }
    };

    if let Some(path) = cli.decoder_a {
        config.decoder_a.path = Some(path);
    }
    if let Some(path) = cli.decoder_b {
        config.decoder_b.path = Some(path);
    }
    if let Some(tree) = cli.corpus_tree {
        config.corpus.tree_path = Some(tree);
    }
    if let Some(mode) = cli.mode {
        config.compare_mode = mode.into();
    }

    let (adapter_a, adapter_b) = config.build_adapters()?;
    let oracle = DivergenceOracle::new(
        Box::new(adapter_a),
        Box::new(adapter_b),
        config.compare_mode,
        config.suppress_bytes.clone(),
    );

    let mut corpus = SeedCorpus::with_literals();
    println!("Seeded {} literal inputs.", corpus.len());
    if let Some(tree) = &config.corpus.tree_path {
        let loaded = corpus.load_tree(tree, &config.corpus.denylist)?;
        println!("Loaded {loaded} inputs from conformance tree {tree:?}.");
    }

    let start_time = Instant::now();
    let mut summary = RunSummary::default();
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);

    let round_limit = match (cli.sample, cli.max_rounds) {
        (Some(sample), Some(max)) => sample.min(max),
        (Some(sample), None) => sample,
        (None, Some(max)) => max.min(corpus.len() as u64),
        (None, None) => corpus.len() as u64,
    };

    for round in 0..round_limit {
        let entry = if cli.sample.is_some() {
            let (_, entry) = corpus
                .random_select(&mut rng)
                .ok_or_else(|| anyhow::anyhow!("corpus is empty, nothing to sample"))?;
            entry
        } else {
            corpus
                .get(round as usize)
                .ok_or_else(|| anyhow::anyhow!("corpus entry {round} went missing"))?
        };

        summary.rounds += 1;
        // The first adapter error aborts the whole run via `?`.
        match oracle.run_round(&entry.data) {
            Ok(RoundVerdict::Agreement) => summary.agreements += 1,
            Ok(RoundVerdict::Uninteresting) => summary.uninteresting += 1,
            Ok(RoundVerdict::Skipped { reason }) => {
                summary.skipped += 1;
                println!("skipped [{}]: {reason}", entry.source);
            }
            Ok(RoundVerdict::Divergence(report)) => {
                summary.divergences += 1;
                println!("\n[{}]\n{report}\n", entry.source);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let elapsed = start_time.elapsed();
    println!(
        "\nFinished {} rounds in {:.2?}: {} agreements, {} uninteresting, {} skipped, {} divergences.",
        summary.rounds,
        elapsed,
        summary.agreements,
        summary.uninteresting,
        summary.skipped,
        summary.divergences
    );

    if summary.divergences > 0 {
        std::process::exit(1);
    }
    Ok(())
}
