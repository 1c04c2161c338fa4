use anyhow::{bail, Context, Result};
use ligo_sim::simulation::{LigoConfig, CONFIG_METADATA_KEY};
use ligo_sim::storage::RepertoireStore;

use crate::args::InspectArgs;

pub fn show_store(args: &InspectArgs) -> Result<()> {
    if !args.store.exists() {
        bail!("Repertoire store {} does not exist", args.store.display());
    }
    let store = RepertoireStore::open(&args.store).context("Failed to open repertoire store")?;
    let stats = store.stats().context("Failed to read store statistics")?;

    println!("\n📊 Repertoire Store");
    println!("{}", "=".repeat(50));
    println!("Path: {}", args.store.display());
    println!("Repertoires: {}", stats.repertoires);
    println!("Sequences: {}", stats.sequences);

    let repertoires = store.repertoires().context("Failed to list repertoires")?;
    if repertoires.is_empty() {
        println!("No repertoires stored.");
    } else {
        println!("\n📁 Repertoires:");
        for repertoire in &repertoires {
            let labels: Vec<String> = repertoire
                .metadata
                .labels
                .iter()
                .map(|(label, value)| format!("{label}={value}"))
                .collect();
            println!(
                "  • {} [{}]: {} sequences, {}",
                repertoire.identifier,
                repertoire.metadata.item_name,
                repertoire.element_count,
                labels.join(", ")
            );
        }
    }

    if args.config {
        match store.metadata(CONFIG_METADATA_KEY).context("Failed to read store metadata")? {
            Some(json) => {
                let config = LigoConfig::from_json(&json).context("Stored configuration is invalid")?;
                println!("\nConfiguration:");
                println!("{}", config.to_json()?);
            }
            None => println!("\nNo configuration recorded in this store."),
        }
    }

    store.close().context("Failed to close repertoire store")?;
    Ok(())
}
