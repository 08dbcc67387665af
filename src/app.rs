use eframe::egui;

use crate::state::AppState;
use crate::ui::{panels, plot};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct EelsViewerApp {
    pub state: AppState,
}

impl EelsViewerApp {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl eframe::App for EelsViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ---- Top panel: menu bar ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &mut self.state);
        });

        // ---- Bottom panel: status line ----
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            panels::status_bar(ui, &self.state);
        });

        // ---- Left side panel: fit settings and parameters ----
        egui::SidePanel::left("fit_panel")
            .default_width(260.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state);
            });

        // ---- Central panel: plot ----
        egui::CentralPanel::default().show(ctx, |ui| {
            plot::spectrum_plot(ui, &self.state);
        });
    }
}
