mod check_config;
mod simulate;

use std::path::PathBuf;

use clap::Subcommand;

use crate::error::Result;

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the transactions of a playbook against scripted participants
    Simulate {
        /// Playbook file describing participants and transactions
        #[arg(long, short = 'p')]
        playbook: PathBuf,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a coordinator configuration file
    CheckConfig {
        /// Coordinator configuration file
        #[arg(long, short = 'c')]
        config: PathBuf,
    },
}

impl Commands {
    pub(crate) fn execute(self) -> Result<()> {
        match self {
            Self::Simulate { playbook, json } => simulate::run(&playbook, json),
            Self::CheckConfig { config } => check_config::run(&config),
        }
    }
}
