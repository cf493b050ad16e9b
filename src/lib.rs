pub mod app;
pub mod asset;
pub mod error;
pub mod renderer;
pub mod scene;
pub mod settings;

use app::App;
use error::{GraphicsErrorCode, RenderError, RenderResult};
use settings::RenderSettings;
use winit::event_loop::EventLoop;

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

/// Loads settings, opens the window and runs until it closes. Startup errors
/// come back as the full stack.
pub fn run() -> RenderResult<()> {
    init_logging();

    let settings = RenderSettings::load()?;
    log::info!("Starting clustered deferred renderer");

    let event_loop = EventLoop::new().map_err(|err| {
        RenderError::graphics(GraphicsErrorCode::Internal, format!("event loop: {err}"))
    })?;
    let mut app = App::new(settings);

    event_loop.run_app(&mut app).map_err(|err| {
        RenderError::graphics(GraphicsErrorCode::Internal, format!("event loop: {err}"))
    })?;

    if let Some(error) = app.take_error() {
        return Err(error);
    }

    log::info!("Application shutdown complete");
    Ok(())
}
