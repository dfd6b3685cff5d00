fn main() {
    if let Err(err) = ledger_merge::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
