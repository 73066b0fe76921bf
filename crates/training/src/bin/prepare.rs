use clap::Parser;
use training::util::{run_prepare, PrepareArgs};

fn main() -> anyhow::Result<()> {
    training::init_tracing();
    let args = PrepareArgs::parse();
    run_prepare(args)?;
    Ok(())
}
