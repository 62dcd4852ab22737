//! Building the initial backlog.

use std::collections::HashSet;
use std::time::Duration;

use ankadepth_proto::DepthConfig;
use tracing::instrument;

use crate::console::Console;
use crate::error::FatalError;
use crate::ledger::{Outcome, TaskLedger};
use crate::regions::RegionSource;
use crate::scheduler::GridScheduler;

/// Load the regions of the configured directories and, unless reprocessing
/// is enabled, drop the ones already recorded in the ledger.
#[instrument(skip_all)]
pub async fn load_backlog(
    depth: &DepthConfig,
    source: &dyn RegionSource,
    ledger: &TaskLedger,
    task_timeout: Duration,
    console: &Console,
) -> Result<GridScheduler, FatalError> {
    if depth.input_root_dirs.is_empty() {
        return Err(FatalError::InvalidConfig);
    }
    ledger.check_writable().await?;

    console.info("Retrieving regions from the database...").await;
    let tasks = source
        .load_regions(&depth.input_root_dirs, &depth.input_sub_dirs)
        .await?;
    let mut grid = GridScheduler::new(tasks, task_timeout);
    console
        .info(format!(
            "{} regions are retrieved from the database.",
            grid.status().total
        ))
        .await;

    if depth.manager_reprocess {
        return Ok(grid);
    }

    console
        .warning(
            "Dropping processed regions in the past runs due to 'ManagerReprocess' option is not specified...",
        )
        .await;

    let mut processed = HashSet::new();
    let mut counts = [0; 2];
    for (slot, outcome, label) in [
        (0, Outcome::Completed, "completed"),
        (1, Outcome::Failed, "failed"),
    ] {
        console
            .info(format!(
                "Parsing the file {} ...",
                ledger.path(outcome).display()
            ))
            .await;
        let restored = ledger.restore(outcome).await?;
        console
            .info(format!("{} regions marked as {label}.", restored.count))
            .await;
        counts[slot] = restored.count;
        processed.extend(restored.ids);
    }

    grid.restore_counters(counts[0], counts[1]);
    let dropped = grid.drop_processed(&processed);
    console
        .warning(format!("{dropped} regions are dropped."))
        .await;

    Ok(grid)
}
