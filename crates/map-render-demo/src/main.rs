// The binary uses the library, not duplicate modules
use map_render_demo::{Settings, logging, run};

fn main() -> std::process::ExitCode {
    let _guard = logging::setup_logging_and_profiling();
    let settings = Settings::from_cli();
    tracing::info!(?settings, "Starting map render demo");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(&settings)) {
        Ok(summary) => {
            println!("{summary:#?}");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Simulation failed: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
