use innerlight::camera::CameraReconnector;
use innerlight::chat::ChatClient;
use innerlight::config::AppConfig;
use innerlight::emotion::OnnxEmotionClassifier;
use innerlight::error::{PipelineError, Result};
use innerlight::face::OnnxFaceLocator;
use innerlight::pipeline::{self, PipelineComponents};
use innerlight::ui::InnerLightApp;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system (file only, no console output)
fn init_logging(path: &Path) -> Result<()> {
    let log_file = std::fs::File::create(path).map_err(PipelineError::Io)?;

    let file_layer = fmt::layer()
        .with_writer(Arc::new(log_file))
        .with_ansi(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    Ok(())
}

/// Loads both models, then opens the camera
async fn load_components(config: AppConfig) -> Result<PipelineComponents> {
    let classifier = OnnxEmotionClassifier::new(&config.emotion_model)?;
    let locator = OnnxFaceLocator::new(&config.landmark_model, config.face_threshold)?;
    let source = CameraReconnector::new(config).reconnect().await?;

    Ok(PipelineComponents {
        source: Box::new(source),
        locator: Box::new(locator),
        classifier: Box::new(classifier),
    })
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env();
    init_logging(&config.log_file)?;
    config.validate()?;
    info!("Starting InnerLight with {:?}", config);

    // Chat requests run here; the detection loop has its own thread
    let runtime = tokio::runtime::Runtime::new()?;
    let chat = Arc::new(ChatClient::new(&config)?);

    let launch_config = config.clone();
    let launcher = move || {
        let config = launch_config.clone();
        pipeline::spawn(config.frame_interval(), move || load_components(config))
    };
    let runtime_handle = runtime.handle().clone();

    let result = eframe::run_native(
        "InnerLight",
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([1280.0, 800.0])
                .with_title("InnerLight"),
            ..Default::default()
        },
        Box::new(move |_cc| {
            Ok(Box::new(InnerLightApp::new(Box::new(launcher), chat, runtime_handle)))
        }),
    );

    if let Err(e) = result {
        error!("Application error: {}", e);
    }

    Ok(())
}
