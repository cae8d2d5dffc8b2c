use eframe::egui;
use segpad::app::PlaygroundApp;
use segpad::logger;

fn main() -> Result<(), eframe::Error> {
    // Initialize session log (overwrites previous session log)
    logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_title("Segpad"),
        ..Default::default()
    };

    eframe::run_native(
        "Segpad",
        options,
        Box::new(|cc| Box::new(PlaygroundApp::new(cc))),
    )
}
