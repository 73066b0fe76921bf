use clap::Parser;
use training::util::{run_eval, EvalArgs};

fn main() -> anyhow::Result<()> {
    training::init_tracing();
    let args = EvalArgs::parse();
    run_eval(args)?;
    Ok(())
}
