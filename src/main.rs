fn main() {
    if let Err(err) = clustered_deferred::run() {
        log::error!("Startup failed:");
        err.log();
        eprintln!("Application error:\n{err}");
        std::process::exit(1);
    }
}
