use clap::Parser;
use env_logger::Env;
use kcover::cli::Cli;
use kcover::engine::{self, Outcome};
use log::error;
use std::process;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match engine::run(&cli.into_options()) {
        Ok(Outcome::Configured { arch }) => {
            if let Some(tag) = arch {
                println!("{}", tag);
            }
        }
        Ok(Outcome::Feasible { archs }) => {
            for tag in archs {
                println!("{}", tag);
            }
        }
        Ok(Outcome::Viewed) => {}
        Err(err) => {
            error!("{}", err);
            process::exit(err.exit_code());
        }
    }
}
