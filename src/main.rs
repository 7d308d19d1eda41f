use env_logger::{Builder, Env};
use log::error;

fn init_logger(verbose: u8) {
    // Уровень берём из RUST_LOG, иначе дефолт зависит от -v: info / debug / trace.
    // Пример: RUST_LOG=debug snapsend send ...
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    Builder::from_env(Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

fn main() {
    let cli = snapsend::cli::parse();
    init_logger(cli.verbose);

    if let Err(e) = snapsend::cli::run(cli) {
        // Логируем ошибку и выходим с кодом 1.
        error!("{:?}", e);
        std::process::exit(1);
    }
}
