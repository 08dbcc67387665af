use eframe::egui::{Color32, Ui};
use egui_plot::{Legend, Line, Plot, Points, VLine};

use crate::state::AppState;

const WINDOW_COLOR: Color32 = Color32::from_rgb(40, 110, 255);
const BACKGROUND_COLOR: Color32 = Color32::from_rgb(220, 40, 40);
const SIGNAL_COLOR: Color32 = Color32::from_rgb(30, 170, 60);

fn plot_points(x: &[f64], y: &[f64]) -> Vec<[f64; 2]> {
    x.iter().zip(y.iter()).map(|(&xi, &yi)| [xi, yi]).collect()
}

// ---------------------------------------------------------------------------
// Spectrum plot (central panel)
// ---------------------------------------------------------------------------

/// Spectrum, fit window samples, fitted background and extracted signal.
pub fn spectrum_plot(ui: &mut Ui, state: &AppState) {
    let spectrum = match &state.spectrum {
        Some(s) => s,
        None => {
            ui.centered_and_justified(|ui: &mut Ui| {
                ui.heading("Open a spectrum to fit its background  (File → Open…)");
            });
            return;
        }
    };

    Plot::new("spectrum_plot")
        .legend(Legend::default())
        .x_axis_label(spectrum.x_label())
        .y_axis_label(spectrum.y_label())
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            plot_ui.line(
                Line::new(plot_points(&spectrum.points.x, &spectrum.points.y))
                    .name(&spectrum.name)
                    .color(Color32::GRAY)
                    .width(1.5),
            );

            let window = state.session.window();
            if !window.is_empty() {
                plot_ui.points(
                    Points::new(plot_points(&window.x, &window.y))
                        .name("Fit window")
                        .color(WINDOW_COLOR)
                        .radius(2.0),
                );
            }
            plot_ui.vline(VLine::new(state.lower).color(WINDOW_COLOR));
            plot_ui.vline(VLine::new(state.upper).color(WINDOW_COLOR));

            let Some(fit) = state.session.last_fit() else {
                return;
            };
            if !fit.result.outcome.is_success() {
                return;
            }
            plot_ui.line(
                Line::new(plot_points(&fit.x, &fit.fitted))
                    .name("Background")
                    .color(BACKGROUND_COLOR)
                    .width(1.5),
            );

            let signal: Vec<f64> = if state.show_negative {
                fit.signal.clone()
            } else {
                fit.signal.iter().map(|&s| s.max(0.0)).collect()
            };
            plot_ui.line(
                Line::new(plot_points(&fit.x, &signal))
                    .name("Signal")
                    .color(SIGNAL_COLOR)
                    .width(1.5),
            );
        });
}
