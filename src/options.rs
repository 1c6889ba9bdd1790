use clap::Parser;

/// Bridge between a CC2530 Zigbee coordinator and APsystems microinverters
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Pair an inverter by serial, or every unpaired one with "*"
    #[clap(long = "pair", value_name = "SERIAL")]
    pub pair: Option<String>,

    /// Poll an inverter by serial, or every paired one with "*"
    #[clap(long = "poll", value_name = "SERIAL")]
    pub poll: Option<String>,

    /// Reboot one inverter
    #[clap(long = "reboot", value_name = "SERIAL")]
    pub reboot: Option<String>,

    /// Start from a hard reset of the coordinator instead of a health check
    #[clap(long = "hard-reset")]
    pub hard_reset: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
