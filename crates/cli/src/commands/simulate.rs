use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ligo_sim::simulation::{LigoConfig, Simulation};
use ligo_sim::storage::{export_repertoires, RepertoireStore};
use std::path::{Path, PathBuf};

use crate::args::SimulateArgs;
use crate::defaults;
use crate::printing::print_config;

pub fn run_simulation(args: &SimulateArgs) -> Result<()> {
    println!("🧬 LIgO - Running Simulation");
    println!("============================================\n");

    let config = LigoConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    println!("Loaded configuration: {}", args.config.display());
    print_config(&config);

    let is_repertoire = config.simulation.is_repertoire;
    let item_count = config.simulation.sim_items.len();

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let mut simulation = Simulation::new(config).context("Invalid configuration")?;
    let store_path = if is_repertoire {
        let path = args
            .store
            .clone()
            .unwrap_or_else(|| args.output.join(defaults::STORE_FILE));
        prepare_store(&path, args.force)?;
        simulation = simulation.with_store(&path);
        Some(path)
    } else {
        None
    };

    println!("Simulating {item_count} items...");
    let pb = if args.quiet {
        None
    } else {
        let pb = ProgressBar::new(item_count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );
        Some(pb)
    };

    let output = simulation
        .run_with_progress(|item| {
            if let Some(pb) = &pb {
                pb.set_message(item.to_string());
                pb.inc(1);
            }
        })
        .context("Simulation failed")?;

    if let Some(pb) = pb {
        pb.finish_with_message("Done");
    }

    match store_path {
        Some(path) => {
            println!("✓ Stored {} repertoires in {}", output.repertoires.len(), path.display());
            let mut store = RepertoireStore::open(&path).context("Failed to reopen repertoire store")?;
            let metadata = export_repertoires(&mut store, &output.repertoires, &args.output, &output.signal_ids)
                .context("Failed to export repertoires")?;
            store.close().context("Failed to close repertoire store")?;
            println!("✓ Exported repertoires to {}", args.output.display());
            println!("✓ Metadata: {}", metadata.display());
        }
        None => {
            println!("✓ Simulated {} sequences", output.sequence_count());
            let written = output
                .write_tsv(&args.output)
                .context("Failed to write sequence files")?;
            for path in written {
                println!("✓ Wrote {}", path.display());
            }
        }
    }

    println!("\nSimulation complete!");
    Ok(())
}

/// Make sure a fresh store can be created at `path`.
fn prepare_store(path: &Path, force: bool) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if !force {
        bail!(
            "Repertoire store {} already exists; pass --force to replace it",
            path.display()
        );
    }
    println!("⚠️  Warning: replacing existing store {}", path.display());
    for suffix in ["", "-wal", "-shm"] {
        let file = PathBuf::from(format!("{}{suffix}", path.display()));
        if file.exists() {
            std::fs::remove_file(&file)
                .with_context(|| format!("Failed to remove {}", file.display()))?;
        }
    }
    Ok(())
}
