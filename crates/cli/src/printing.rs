use ligo_analysis::analysis::FeasibilityReport;
use ligo_sim::simulation::{LigoConfig, SignalTarget};

fn format_target(target: &SignalTarget) -> String {
    match target {
        SignalTarget::Rate(rate) => format!("{rate}"),
        SignalTarget::Count { count } => format!("{count} sequences"),
    }
}

pub fn print_config(config: &LigoConfig) {
    let sim = &config.simulation;
    let params = &config.params;

    println!("\n📋 Simulation Configuration");
    println!("  • Sequence Type: {}", sim.sequence_type);
    println!("  • Strategy: {:?}", sim.simulation_strategy);
    println!(
        "  • Output: {}",
        if sim.is_repertoire {
            "Repertoires"
        } else {
            "Sequences"
        }
    );
    if !sim.paired.is_empty() {
        let pairs: Vec<String> = sim.paired.iter().map(|(a, b)| format!("{a}+{b}")).collect();
        println!("  • Paired Chains: {}", pairs.join(", "));
    }
    println!("  • Batch Size: {}", params.sequence_batch_size);
    println!("  • Max Iterations: {}", params.max_iterations);
    if sim.keep_p_gen_dist && sim.p_gen_bin_count > 0 {
        println!("  • p_gen Bins: {}", sim.p_gen_bin_count);
    }
    println!("  • Export p_gen: {}", params.export_p_gens);
    if !sim.remove_seqs_with_signals {
        println!("  • Signal-carrying background kept: yes");
    }

    println!("\n🎯 Signals");
    if config.signals.is_empty() {
        println!("  • None");
    }
    for signal in &config.signals {
        println!(
            "  • {}: motifs [{}], {}",
            signal.id,
            signal.motifs.join(", "),
            signal.implanting
        );
        if let Some(v_call) = &signal.v_call {
            println!("    - V gene: {v_call}");
        }
        if let Some(j_call) = &signal.j_call {
            println!("    - J gene: {j_call}");
        }
    }

    println!("\n🧪 Simulation Items");
    for item in &sim.sim_items {
        let model = item
            .generative_model
            .params
            .get("default_model_name")
            .and_then(|v| v.as_str())
            .map(|name| format!("{} ({name})", item.generative_model.kind))
            .unwrap_or_else(|| item.generative_model.kind.clone());
        if sim.is_repertoire {
            println!(
                "  • {}: {} repertoires × {} sequences, model {model}",
                item.name, item.number_of_examples, item.receptors_in_repertoire_count
            );
        } else {
            println!(
                "  • {}: {} sequences, model {model}",
                item.name, item.number_of_examples
            );
        }
        for (key, target) in &item.signals {
            println!("    - {key}: {}", format_target(target));
        }
        if item.is_noise {
            println!("    - Noise: labels stay negative");
        }
    }
    println!();
}

pub fn print_report(report: &FeasibilityReport) {
    println!("\n📊 Model: {}", report.model_name);
    println!("  • Sequences drawn: {}", report.sequence_count);

    println!("  • Signal frequencies:");
    for row in &report.signal_frequencies {
        println!("    - {}: {:.5}", row.signal, row.frequency);
    }

    println!("  • Signals per sequence:");
    for row in &report.signal_cooccurrences {
        println!("    - {}: {} sequences", row.signal_count, row.sequences);
    }

    if let Some(histogram) = &report.p_gen_histogram {
        let filled = histogram.iter().filter(|bin| bin.count > 0).count();
        println!("  • p_gen histogram: {} bins ({filled} non-empty)", histogram.len());
    }

    for warning in &report.warnings {
        println!("⚠️  Warning: {warning}");
    }
}
