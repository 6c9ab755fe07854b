fn main() {
    let args: Vec<String> = std::env::args().collect();
    std::process::exit(pgo_training::run_cli(args));
}
