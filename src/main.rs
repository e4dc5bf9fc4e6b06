use clap::Parser;
use imsim::Opts;
use imsim::cli::SubCommandExtend;
use imsim::config::SubCommand;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts),
        SubCommand::Search(config) => config.run(&opts),
        SubCommand::Clean(config) => config.run(&opts),
    }
}
