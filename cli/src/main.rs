use clap::Parser;

use cp_cli::args::{Args, Command};
use cp_cli::commands;
use cp_cli::namedbs::NameDbs;

fn main() {
    let args = Args::parse();

    cp_tracing::TracingBuilder::default()
        .level(args.log_level)
        .build()
        .expect("failed to initialize tracing");

    let names = NameDbs::load(args.db_root.as_deref());

    let result = match &args.command {
        Command::List(cmd) => commands::list::run(cmd, &names),
        Command::Extract(cmd) => commands::extract::run(cmd, &names),
        Command::Inspect(cmd) => commands::inspect::run(cmd),
        Command::Verify(cmd) => commands::verify::run(cmd),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
