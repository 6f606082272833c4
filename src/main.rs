use kestrel_viz::cli::CliOverrides;
use kestrel_viz::run_with_overrides;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli_overrides = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed.into_config_overrides(),
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = run_with_overrides(cli_overrides) {
        eprintln!("Application error: {err:?}");
        std::process::exit(1);
    }
}
