use clap::Parser;
use training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    training::init_tracing();
    let args = TrainArgs::parse();
    let report = run_train(args)?;
    match report.best_accuracy {
        Some(acc) => tracing::info!(
            "{}: best checkpoint {} (top-1 {acc:.2}%), statistics in {}",
            report.data_name,
            report.checkpoint.display(),
            report.results.display()
        ),
        None => tracing::warn!("{}: no epochs were run", report.data_name),
    }
    Ok(())
}
