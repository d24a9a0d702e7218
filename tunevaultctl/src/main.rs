use clap::Parser;

fn main() {
    let cli = tunevaultctl::Cli::parse();
    if let Err(err) = tunevaultctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
