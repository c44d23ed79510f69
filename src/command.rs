use clap::Parser;

use crate::config::Config;

mod run;

pub use run::run;


#[derive(Debug, Parser)]
#[command(name = "adb-proxy", version, about = "Runs adb commands on behalf of a control plane")]
pub struct Cli {
    #[arg(short, long, env = "ADB_PROXY_VERBOSE")]
    pub verbose: bool,
    #[command(flatten)]
    pub config: Config,
}
