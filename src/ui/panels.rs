use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::{Column, TableBuilder};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Left side panel – fit settings
// ---------------------------------------------------------------------------

/// Render the left fit panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Background fit");
    ui.separator();

    let Some((min, max)) = state.spectrum.as_ref().and_then(|s| s.range()) else {
        ui.label("No spectrum loaded.");
        return;
    };

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            // ---- Model selector ----
            ui.strong("Model");
            let names = state.session.registry().names();
            let mut selected = state.model.clone();
            egui::ComboBox::from_id_salt("background_model")
                .selected_text(&selected)
                .width(ui.available_width())
                .show_ui(ui, |ui: &mut Ui| {
                    for name in names {
                        ui.selectable_value(&mut selected, name.to_string(), name);
                    }
                });
            state.set_model(&selected);
            ui.separator();

            // ---- Fit window ----
            ui.strong("Fit window");
            let mut changed = false;
            changed |= ui
                .add(egui::Slider::new(&mut state.lower, min..=max).text("Start"))
                .changed();
            changed |= ui
                .add(egui::Slider::new(&mut state.upper, min..=max).text("Stop"))
                .changed();
            if changed {
                state.refit();
            }
            ui.checkbox(&mut state.show_negative, "Show negative signal");
            ui.separator();

            // ---- Parameters of the last fit ----
            ui.strong("Parameters");
            parameter_table(ui, state);
        });
}

fn parameter_table(ui: &mut Ui, state: &AppState) {
    let Some(fit) = state.session.last_fit() else {
        ui.label("No fit yet.");
        return;
    };
    if let Some(request) = state.session.last_request() {
        ui.label(format!("{} on {}", fit.result.model, request.interval));
    }

    TableBuilder::new(ui)
        .striped(true)
        .column(Column::auto())
        .column(Column::remainder())
        .header(20.0, |mut header| {
            header.col(|ui| {
                ui.strong("#");
            });
            header.col(|ui| {
                ui.strong("Value");
            });
        })
        .body(|mut body| {
            for (i, value) in fit.result.parameters.iter().enumerate() {
                body.row(18.0, |mut row| {
                    row.col(|ui| {
                        ui.label(format!("p{i}"));
                    });
                    row.col(|ui| {
                        ui.monospace(format!("{value:.6e}"));
                    });
                });
            }
            body.row(18.0, |mut row| {
                row.col(|ui| {
                    ui.label("RMS");
                });
                row.col(|ui| {
                    ui.monospace(format!("{:.6e}", fit.result.rms));
                });
            });
        });
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…").clicked() {
                open_file_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(spectrum) = &state.spectrum {
            ui.label(format!("{}: {} points", spectrum.name, spectrum.len()));
        }
    });
}

/// Status or error line at the bottom of the window.
pub fn status_bar(ui: &mut Ui, state: &AppState) {
    match &state.status_message {
        Some(msg) if state.status_is_error => {
            ui.label(RichText::new(msg).color(Color32::RED));
        }
        Some(msg) => {
            ui.label(msg);
        }
        None => {
            ui.label("Ready");
        }
    }
}

// ---------------------------------------------------------------------------
// File dialog
// ---------------------------------------------------------------------------

pub fn open_file_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open spectrum")
        .add_filter("Supported files", &["msa", "csv", "tif", "tiff", "png"])
        .add_filter("EMSA/MAS spectrum", &["msa"])
        .add_filter("CSV", &["csv"])
        .add_filter("Spectrum image", &["tif", "tiff", "png"])
        .pick_file();

    if let Some(path) = file {
        if let Err(e) = state.open(&path) {
            log::error!("Failed to load file: {e:#}");
            state.set_status(Some(format!("Error: {e:#}")), true);
        }
    }
}
