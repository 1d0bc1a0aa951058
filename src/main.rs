fn main() {
    if let Err(err) = serverkeep::cli::run() {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}
