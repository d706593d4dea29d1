//! Runs N independent replicas of one pipeline job at the same time and
//! sums their speed factors.

use tokio::sync::oneshot;

use crate::engine::Engine;
use crate::error::PipelineError;
use crate::job::PipelineJobSpec;
use crate::packet::CompressedUnit;
use crate::pipeline::{RunReport, Strategy};

#[derive(Debug)]
pub struct BenchSummary {
    pub task_id: String,
    pub concurrency: usize,
    /// Reports of the replicas that ran to completion.
    pub replicas: Vec<RunReport>,
    pub failed: usize,
    pub total_speed: f64,
}

impl BenchSummary {
    fn from_results(
        job: &PipelineJobSpec,
        concurrency: usize,
        results: Vec<Result<RunReport, PipelineError>>,
    ) -> Result<Self, PipelineError> {
        let mut replicas = Vec::with_capacity(results.len());
        let mut first_error = None;
        let mut failed = 0;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(report) => replicas.push(report),
                Err(e) => {
                    log::error!(
                        "[{}] replica {} failed: {} (status {})",
                        job.task_id,
                        i,
                        e,
                        e.status()
                    );
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }
        if let (true, Some(e)) = (replicas.is_empty(), first_error) {
            return Err(e);
        }
        let total_speed = replicas.iter().map(|r| r.speed).sum();
        Ok(Self {
            task_id: job.task_id.clone(),
            concurrency,
            replicas,
            failed,
            total_speed,
        })
    }
}

/// Runs `concurrency` replicas of `job` over the same pre-read units.
///
/// With a concurrency of 0 or 1 the single replica runs on the calling
/// thread and the total is exactly its speed factor. Otherwise each replica
/// gets its own named thread and reports back over a one-shot channel; the
/// call returns once every replica has finished.
pub fn run<E: Engine>(
    engine: &E,
    job: &PipelineJobSpec,
    units: &[CompressedUnit],
    concurrency: usize,
) -> Result<BenchSummary, PipelineError> {
    let strategy = Strategy::for_job(job)?;
    let concurrency = concurrency.max(1);
    log::info!(
        "========== {} begin, {} replica(s), {} unit(s) ==========",
        job.task_id,
        concurrency,
        units.len()
    );

    let results = if concurrency == 1 {
        vec![strategy.run(engine, job, units)]
    } else {
        run_replicas(engine, job, units, &strategy, concurrency)?
    };

    let summary = BenchSummary::from_results(job, concurrency, results);
    match &summary {
        Ok(summary) => log::info!(
            "========== {} end, total speed {:.2} ({} failed) ==========",
            job.task_id,
            summary.total_speed,
            summary.failed
        ),
        Err(e) => log::error!(
            "========== {} end, all replicas failed: {} ==========",
            job.task_id,
            e
        ),
    }
    summary
}

fn run_replicas<E: Engine>(
    engine: &E,
    job: &PipelineJobSpec,
    units: &[CompressedUnit],
    strategy: &Strategy,
    concurrency: usize,
) -> Result<Vec<Result<RunReport, PipelineError>>, PipelineError> {
    let mut receivers = Vec::with_capacity(concurrency);
    std::thread::scope(|scope| -> Result<(), PipelineError> {
        for replica in 0..concurrency {
            let (tx, rx) = oneshot::channel();
            receivers.push(rx);
            std::thread::Builder::new()
                .name(format!("{}-replica-{}", job.task_id, replica))
                .spawn_scoped(scope, move || {
                    log::debug!("[{}] replica {} started", job.task_id, replica);
                    let _ = tx.send(strategy.run(engine, job, units));
                })
                .map_err(|e| {
                    PipelineError::InvalidJob(format!("spawn replica {}: {}", replica, e))
                })?;
        }
        Ok(())
    })?;

    // Every replica has been joined; a sender dropped without a send never ran.
    Ok(receivers
        .into_iter()
        .enumerate()
        .map(|(replica, rx)| {
            rx.blocking_recv().unwrap_or_else(|_| {
                Err(PipelineError::InvalidJob(format!(
                    "replica {} exited without a report",
                    replica
                )))
            })
        })
        .collect())
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod runner_test;
