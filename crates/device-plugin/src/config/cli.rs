use clap::Parser;
use clap::ValueEnum;
use utils::logging::LogFormat;
use utils::version;

use crate::config::plugin::PluginArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub plugin: PluginArgs,

    #[arg(
        long,
        env = "LOG_FORMAT",
        value_enum,
        default_value_t = LogFormatArg::Text,
        help = "Log line encoding"
    )]
    pub log_format: LogFormatArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}
