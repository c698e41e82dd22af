use clap::Parser;
use registry_transfer::cli::{Cli, Runner};
use registry_transfer::config::AppConfig;
use registry_transfer::logging::init_tracing;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let runner = Runner::new(cli, AppConfig::from_env());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let logger = runner.logger().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            logger.warning("Interrupt received, finishing the current job");
            on_interrupt.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    let code = match runner.run(cancel).await {
        Ok(code) => code,
        Err(err) => {
            runner
                .logger()
                .error(&format!("{} ({})", err, err.hint()));
            1
        }
    };
    std::process::exit(code);
}
