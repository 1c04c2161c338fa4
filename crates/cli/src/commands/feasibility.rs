use anyhow::{Context, Result};
use ligo_analysis::analysis::FeasibilitySummary;
use ligo_sim::simulation::LigoConfig;

use crate::args::FeasibilityArgs;
use crate::printing::{print_config, print_report};

pub fn run_feasibility(args: &FeasibilityArgs) -> Result<()> {
    println!("🧬 LIgO - Feasibility Summary");
    println!("============================================\n");

    let config = LigoConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    print_config(&config);

    println!("Drawing {} sequences per model...", args.sequence_count);
    let summary = FeasibilitySummary::new(config, args.sequence_count).context("Invalid configuration")?;
    let reports = summary.run().context("Feasibility analysis failed")?;

    for report in &reports {
        print_report(report);
    }

    let written = summary
        .write(&reports, &args.output)
        .with_context(|| format!("Failed to write reports to {}", args.output.display()))?;
    println!("\n✓ Reports written to {}", args.output.display());
    println!("✓ Summary: {}", written.display());

    Ok(())
}
