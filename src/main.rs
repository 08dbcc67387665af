mod app;
mod state;
mod ui;

use app::EelsViewerApp;
use eframe::egui;
use eftem_tools::config::{config_path, EftemConfig};
use state::AppState;

fn main() -> eframe::Result {
    env_logger::init();

    let path = config_path(None);
    let config = EftemConfig::load_or_default(&path).unwrap_or_else(|e| {
        log::error!("{e}, using default settings");
        EftemConfig::default()
    });

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([600.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "EFTEMj – EELS Background Fit",
        options,
        Box::new(move |_cc| Ok(Box::new(EelsViewerApp::new(AppState::from_config(&config))))),
    )
}
