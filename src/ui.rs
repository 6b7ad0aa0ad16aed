// UI module for the InnerLight application

use crate::chat::{ChatClient, ChatResponse, ChatTranscript, Sender};
use crate::context::ContextBridge;
use crate::error::Result;
use crate::overlay::OverlayScene;
use crate::pipeline::{DetectionThread, PipelineStatus};
use egui::{Color32, FontId, Pos2, Rect, Stroke};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Starts a fresh detection loop; called at startup and from the retry button
pub type LoopLauncher = Box<dyn Fn() -> Result<DetectionThread>>;

const MESH_COLOR: Color32 = Color32::from_rgb(48, 255, 48);
const BOX_COLOR: Color32 = Color32::from_rgb(255, 200, 40);
const LABEL_COLOR: Color32 = Color32::WHITE;

/// Main application UI
pub struct InnerLightApp {
    launcher: LoopLauncher,
    detection: Option<DetectionThread>,
    launch_error: Option<String>,
    camera_texture: Option<egui::TextureHandle>,
    shown_timestamp: Option<u64>,
    scene: Option<Arc<OverlayScene>>,
    chat: Arc<ChatClient>,
    runtime: Handle,
    transcript: ChatTranscript,
    input: String,
    reply_sender: mpsc::UnboundedSender<Result<ChatResponse>>,
    reply_receiver: mpsc::UnboundedReceiver<Result<ChatResponse>>,
    awaiting_reply: bool,
    chat_notice: Option<String>,
}

impl InnerLightApp {
    /// Creates the app and starts the first detection loop
    pub fn new(launcher: LoopLauncher, chat: Arc<ChatClient>, runtime: Handle) -> Self {
        let (reply_sender, reply_receiver) = mpsc::unbounded_channel();
        let mut app = Self {
            launcher,
            detection: None,
            launch_error: None,
            camera_texture: None,
            shown_timestamp: None,
            scene: None,
            chat,
            runtime,
            transcript: ChatTranscript::new(),
            input: String::new(),
            reply_sender,
            reply_receiver,
            awaiting_reply: false,
            chat_notice: None,
        };
        app.launch_detection();
        app
    }

    fn launch_detection(&mut self) {
        // the old loop must release the camera before the new one opens it
        if let Some(mut previous) = self.detection.take() {
            previous.shutdown();
        }
        match (self.launcher)() {
            Ok(detection) => {
                self.detection = Some(detection);
                self.launch_error = None;
            }
            Err(e) => {
                error!("Could not start detection loop: {}", e);
                self.launch_error = Some(e.to_string());
            }
        }
    }

    fn status(&self) -> PipelineStatus {
        match (&self.detection, &self.launch_error) {
            (_, Some(e)) => PipelineStatus::Error(e.clone()),
            (Some(detection), None) => detection.handle().status(),
            (None, None) => PipelineStatus::Uninitialized,
        }
    }

    fn context_bridge(&self) -> ContextBridge {
        self.detection
            .as_ref()
            .map(|detection| detection.handle().context_bridge())
            .unwrap_or_else(ContextBridge::detached)
    }

    /// Updates camera texture from the latest published scene
    fn update_camera_texture(&mut self, ctx: &egui::Context) {
        let Some(scene) = self.detection.as_ref().and_then(|d| d.handle().overlay()) else {
            return;
        };
        if self.shown_timestamp == Some(scene.frame.timestamp) {
            return;
        }

        let frame = &scene.frame;
        let color_image =
            egui::ColorImage::from_rgb([frame.width as usize, frame.height as usize], &frame.data);
        match &mut self.camera_texture {
            Some(texture) => texture.set(color_image, egui::TextureOptions::LINEAR),
            None => {
                self.camera_texture =
                    Some(ctx.load_texture("camera", color_image, egui::TextureOptions::LINEAR));
            }
        }
        self.shown_timestamp = Some(frame.timestamp);
        self.scene = Some(scene);
    }

    /// Collects chat replies that arrived since the last frame
    fn poll_replies(&mut self) {
        while let Ok(result) = self.reply_receiver.try_recv() {
            self.awaiting_reply = false;
            match result {
                Ok(reply) => {
                    self.transcript.record_reply(&reply);
                    self.chat_notice = None;
                }
                Err(e) => {
                    warn!("Chat request failed: {}", e);
                    self.chat_notice =
                        Some("Sorry, I couldn't reach the assistant. Please try again.".into());
                }
            }
        }
    }

    fn submit_message(&mut self, ctx: &egui::Context) {
        if self.awaiting_reply {
            return;
        }
        let request = match self
            .context_bridge()
            .prepare_submission(&mut self.transcript, &self.input)
        {
            Ok(request) => request,
            Err(_) => return,
        };
        self.input.clear();
        self.awaiting_reply = true;

        let chat = self.chat.clone();
        let sender = self.reply_sender.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            let _ = sender.send(chat.send(&request).await);
            ctx.request_repaint();
        });
    }

    /// Renders the status bar with the retry affordance
    fn render_status_bar(&mut self, ctx: &egui::Context) {
        let status = self.status();
        let stable = self.context_bridge().current().emotion;
        let mut retry = false;

        egui::TopBottomPanel::top("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                match &status {
                    PipelineStatus::Uninitialized => ui.label("Starting…"),
                    PipelineStatus::Loading => ui.label("Loading camera and models…"),
                    PipelineStatus::Ready => ui.label(format!("Feeling: {stable}")),
                    PipelineStatus::Error(e) => {
                        ui.colored_label(Color32::LIGHT_RED, format!("Detection stopped: {e}"))
                    }
                };
                if matches!(status, PipelineStatus::Error(_)) && ui.button("Retry").clicked() {
                    retry = true;
                }
            });
        });

        if retry {
            self.camera_texture = None;
            self.shown_timestamp = None;
            self.scene = None;
            self.launch_detection();
        }
    }

    /// Renders the chat panel
    fn render_chat(&mut self, ctx: &egui::Context) {
        let mut submit = false;

        egui::SidePanel::right("chat")
            .default_width(360.0)
            .show(ctx, |ui| {
                ui.heading("Chat");
                ui.separator();

                egui::ScrollArea::vertical()
                    .stick_to_bottom(true)
                    .max_height((ui.available_height() - 60.0).max(0.0))
                    .show(ui, |ui| {
                        for message in self.transcript.messages() {
                            let who = match message.sender() {
                                Sender::User => "You",
                                Sender::Bot => "InnerLight",
                            };
                            let time = message.timestamp().format("%H:%M");
                            match message.emotion() {
                                Some(emotion) => ui.weak(format!("{who} · {time} · {emotion}")),
                                None => ui.weak(format!("{who} · {time}")),
                            };
                            ui.label(message.text());
                            ui.add_space(6.0);
                        }
                        if self.awaiting_reply {
                            ui.weak("…");
                        }
                    });

                if let Some(notice) = &self.chat_notice {
                    ui.colored_label(Color32::LIGHT_RED, notice);
                }

                ui.horizontal(|ui| {
                    let input = ui.text_edit_singleline(&mut self.input);
                    let enter = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.button("Send").clicked() || enter {
                        submit = true;
                    }
                });
            });

        if submit {
            self.submit_message(ctx);
        }
    }

    /// Renders the main camera view with the face overlay
    fn render_camera_view(&self, ctx: &egui::Context) {
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let available = ui.max_rect();

                let Some(texture) = &self.camera_texture else {
                    return;
                };
                let texture_size = texture.size_vec2();
                let aspect_ratio = texture_size.x / texture_size.y;

                // Calculate size to fit while maintaining aspect ratio
                let mut display_width = available.width();
                let mut display_height = display_width / aspect_ratio;
                if display_height > available.height() {
                    display_height = available.height();
                    display_width = display_height * aspect_ratio;
                }

                let display = Rect::from_center_size(
                    available.center(),
                    egui::vec2(display_width, display_height),
                );
                ui.put(
                    display,
                    egui::Image::new(texture)
                        .fit_to_exact_size(egui::vec2(display_width, display_height)),
                );

                if let Some(scene) = &self.scene {
                    paint_overlay(ui.painter(), display, scene);
                }
            });
    }
}

/// Draws mesh edges, the face box and the raw emotion label scaled into `display`
fn paint_overlay(painter: &egui::Painter, display: Rect, scene: &OverlayScene) {
    let scale_x = display.width() / scene.frame.width as f32;
    let scale_y = display.height() / scene.frame.height as f32;
    let to_screen =
        |(x, y): (f32, f32)| Pos2::new(display.min.x + x * scale_x, display.min.y + y * scale_y);

    let mesh = Stroke::new(1.0, MESH_COLOR);
    for [a, b] in scene.segments() {
        painter.line_segment([to_screen(a), to_screen(b)], mesh);
    }

    if let Some(bbox) = scene.bbox {
        let min = to_screen((bbox.x as f32, bbox.y as f32));
        let max = to_screen(((bbox.x + bbox.width) as f32, (bbox.y + bbox.height) as f32));
        painter.rect_stroke(Rect::from_min_max(min, max), 0.0, Stroke::new(2.0, BOX_COLOR));
    }

    if let Some(label) = &scene.label {
        painter.text(
            to_screen((label.x, label.y)),
            egui::Align2::LEFT_BOTTOM,
            &label.text,
            FontId::proportional(20.0),
            LABEL_COLOR,
        );
    }
}

impl eframe::App for InnerLightApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        // Update all components
        self.update_camera_texture(ctx);
        self.poll_replies();

        // Render UI
        self.render_status_bar(ctx);
        self.render_chat(ctx);
        self.render_camera_view(ctx);
    }
}

impl Drop for InnerLightApp {
    fn drop(&mut self) {
        if let Some(detection) = &mut self.detection {
            detection.shutdown();
        }
    }
}
