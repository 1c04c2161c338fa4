use anyhow::{bail, Context, Result};
use ligo_sim::generative::GenerativeModelConfig;
use ligo_sim::implants::SeedMotif;
use ligo_sim::simulation::{
    LigoConfig, SignalConfig, SignalTarget, SimConfig, SimConfigItem, SimulationParams,
};

use crate::args::InitArgs;
use crate::defaults;
use crate::printing::print_config;

pub fn init_config(args: &InitArgs) -> Result<()> {
    println!("🧬 LIgO - Receptor Repertoire Simulator");
    println!("============================================\n");

    if args.output.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            args.output.display()
        );
    }

    let config = build_config(args);
    config
        .resolve()
        .context("Generated configuration is invalid")?;

    print_config(&config);

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = config.to_json().context("Failed to serialize configuration")?;
    std::fs::write(&args.output, json)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!("✓ Configuration written to {}", args.output.display());
    println!("\nConfiguration initialized successfully!");
    println!("Run it with: ligo simulate --config {}", args.output.display());

    Ok(())
}

fn build_config(args: &InitArgs) -> LigoConfig {
    let motif = SeedMotif::new(defaults::MOTIF_ID, args.motif.as_str()).with_gap(args.min_gap, args.max_gap);
    let signal = SignalConfig {
        id: defaults::SIGNAL_ID.to_string(),
        motifs: vec![motif.identifier.clone()],
        implanting: Default::default(),
        sequence_position_weights: None,
        v_call: None,
        j_call: None,
    };

    let mut item = SimConfigItem::new(args.name.as_str(), GenerativeModelConfig::recombination(&args.model))
        .with_examples(args.number_of_examples)
        .with_signal(defaults::SIGNAL_ID, SignalTarget::Rate(args.signal_rate))
        .with_seed(args.seed);
    if let Some(size) = args.repertoire_size {
        item = item.with_repertoire_size(size);
    }

    let mut simulation = SimConfig::new(vec![item]);
    simulation.is_repertoire = args.repertoire_size.is_some();
    simulation.sequence_type = args.sequence_type;
    simulation.simulation_strategy = args.strategy.into();

    let mut params = SimulationParams::default();
    if let Some(batch_size) = args.batch_size {
        params.sequence_batch_size = batch_size;
    }
    if let Some(max_iterations) = args.max_iterations {
        params.max_iterations = max_iterations;
    }

    LigoConfig {
        motifs: vec![motif],
        signals: vec![signal],
        simulation,
        params,
    }
}
