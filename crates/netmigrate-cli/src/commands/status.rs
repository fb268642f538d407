//! Show stored run checkpoints

use anyhow::{Context, Result};
use netmigrate_core::RunId;
use netmigrate_runtime::CheckpointStore;

use crate::runner;

/// Run the status command
pub async fn run(config_path: &str, run_id: Option<&str>) -> Result<()> {
    let config = runner::load_config(config_path)?;
    let store = runner::checkpoint_store(&config);

    match run_id {
        Some(run_id) => {
            let run_id = RunId::new(run_id)?;
            let checkpoint = store
                .load(&run_id)?
                .with_context(|| format!("No checkpoint stored for run '{run_id}'"))?;
            println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        }
        None => {
            let runs = store.list()?;
            if runs.is_empty() {
                println!("No stored runs in {}", store.dir().display());
                return Ok(());
            }
            for run_id in runs {
                let Some(checkpoint) = store.load(&run_id)? else {
                    continue;
                };
                let next = checkpoint.next_stage().map(|s| s.as_str()).unwrap_or("-");
                match checkpoint.failed_stage {
                    Some(failed) => println!(
                        "{run_id}  {}  failed at {}  next={next}",
                        checkpoint.status,
                        failed.as_str()
                    ),
                    None => println!("{run_id}  {}  next={next}", checkpoint.status),
                }
            }
        }
    }

    Ok(())
}
