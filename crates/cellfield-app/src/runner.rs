//! Step loop driving a compartment and collecting summaries.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use cellfield_core::{Compartment, SimulationContext, StepSummary};
use serde::Serialize;
use tracing::{info, warn};

/// Everything recorded over a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepSummary>,
}

impl RunReport {
    #[must_use]
    pub fn last(&self) -> Option<&StepSummary> {
        self.steps.last()
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// Advance `compartment` by `steps`, logging every `log_every`-th summary.
pub fn run_steps(
    compartment: &mut Compartment,
    ctx: &mut SimulationContext,
    steps: usize,
    log_every: usize,
) -> Result<RunReport> {
    let mut report = RunReport {
        steps: Vec::with_capacity(steps),
    };
    for _ in 0..steps {
        let summary = compartment
            .step(ctx)
            .with_context(|| format!("step {} failed", ctx.timer.iteration + 1))?;
        if !summary.coupling.unrouted.is_empty() {
            warn!(iteration = summary.iteration, unrouted = ?summary.coupling.unrouted, "products without destination");
        }
        if log_every > 0 && summary.iteration % log_every as u64 == 0 {
            let totals: Vec<String> = summary
                .solutes
                .iter()
                .map(|solute| format!("{}={:.4}", solute.name, solute.total_amount))
                .collect();
            info!(
                iteration = summary.iteration,
                time = summary.time,
                sub_steps = summary.sub_steps,
                agents = summary.agent_count,
                mean_force = summary.collisions.mean_force,
                totals = %totals.join(" "),
                "step complete"
            );
        }
        report.steps.push(summary);
    }
    Ok(report)
}
