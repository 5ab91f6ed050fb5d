use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use renorm::nrg::run_calculation;

/// Numerical renormalization group solver for quantum impurity models.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Parameter file (YAML, a single `param:` mapping).
    #[arg(short, long, default_value = "param")]
    param: PathBuf,

    /// Input data file produced by the model preparation front-end.
    #[arg(short, long, default_value = "data")]
    data: PathBuf,

    /// Scratch directory root; overrides the NRG_WORKDIR environment
    /// variable.
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Increase logging verbosity.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Some(workdir) = &cli.workdir {
        std::env::set_var("NRG_WORKDIR", workdir);
    }
    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .expect("Unable to construct the logging configuration.");
    log4rs::init_config(config).expect("Unable to initialise logging.");

    match try_main(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn try_main(cli: &Cli) -> anyhow::Result<()> {
    run_calculation(&cli.param, &cli.data).with_context(|| {
        format!(
            "calculation with parameters `{}` and data `{}` failed",
            cli.param.display(),
            cli.data.display()
        )
    })?;
    Ok(())
}
