use anyhow::{bail, Context, Result};
use ligo_sim::simulation::{LigoConfig, CONFIG_METADATA_KEY};
use ligo_sim::storage::{export_repertoires, RepertoireStore};

use crate::args::ExportArgs;

pub fn export_store(args: &ExportArgs) -> Result<()> {
    if !args.store.exists() {
        bail!("Repertoire store {} does not exist", args.store.display());
    }
    let mut store = RepertoireStore::open(&args.store).context("Failed to open repertoire store")?;

    let Some(json) = store
        .metadata(CONFIG_METADATA_KEY)
        .context("Failed to read store metadata")?
    else {
        bail!("Store {} has no recorded configuration", args.store.display());
    };
    let config = LigoConfig::from_json(&json).context("Stored configuration is invalid")?;
    let signal_ids: Vec<String> = config.signals.iter().map(|s| s.id.clone()).collect();

    let repertoires = if args.repertoires.is_empty() {
        store.repertoires().context("Failed to list repertoires")?
    } else {
        args.repertoires
            .iter()
            .map(|id| {
                store
                    .repertoire(id)
                    .with_context(|| format!("Repertoire '{id}' not found"))
            })
            .collect::<Result<Vec<_>>>()?
    };

    println!("Exporting {} repertoires...", repertoires.len());
    let metadata = export_repertoires(&mut store, &repertoires, &args.output, &signal_ids)
        .context("Failed to export repertoires")?;
    store.close().context("Failed to close repertoire store")?;

    println!("✓ Exported to {}", args.output.display());
    println!("✓ Metadata: {}", metadata.display());
    Ok(())
}
