use cathode16::app;

fn main() -> anyhow::Result<()> {
    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1024.0, 760.0])
            .with_min_inner_size([640.0, 520.0])
            .with_title("Cathode-16"),
        vsync: true,
        ..Default::default()
    };

    eframe::run_native(
        "Cathode-16",
        options,
        Box::new(|cc| Ok(Box::new(app::SnesApp::new(cc)))),
    )
    .map_err(|err| anyhow::anyhow!("failed to run app: {err}"))
}
