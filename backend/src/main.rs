use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use axum_extra::headers;
use axum_extra::TypedHeader;
use draft_core::drawing::{Document, Sheet, SheetId};
use draft_core::geometry::Point2;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Wall-clock budget for one RELAX command; the frontend sends one per
/// animation frame and resumes where the solver left off.
const RELAX_BUDGET: Duration = Duration::from_millis(20);

/// Format a core error as a JSON message for the frontend
fn format_error(code: &str, message: &str) -> String {
    format!(
        "ERROR_UPDATE:{}",
        json!({
            "code": code,
            "message": message,
            "severity": "error"
        })
    )
}

// Application State
struct AppState {
    doc: Arc<RwLock<Document>>,
}

/// What a structural edit command did to the active sheet.
enum Edit {
    Changed,
    NoOp,
    Unrecognized,
}

impl Edit {
    fn from_changed(changed: bool) -> Self {
        if changed {
            Edit::Changed
        } else {
            Edit::NoOp
        }
    }
}

#[derive(Deserialize)]
struct At {
    x: f64,
    y: f64,
}

impl At {
    fn point(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

#[derive(Deserialize)]
struct SegmentCmd {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

#[derive(Deserialize)]
struct ArcCmd {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    cx: f64,
    cy: f64,
}

#[derive(Deserialize)]
struct InstanceCmd {
    master: SheetId,
    x: f64,
    y: f64,
    size: f64,
    angle: f64,
}

#[derive(Deserialize)]
struct AdjustCmd {
    x: f64,
    y: f64,
    amount: f64,
}

#[derive(Deserialize)]
struct DragCmd {
    from: At,
    to: At,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let shared_state = Arc::new(AppState {
        doc: Arc::new(RwLock::new(Document::new())),
    });

    // build our application with a route
    let app = Router::new()
        .route("/", get(root))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn root() -> &'static str {
    "Hello from the drafting backend!"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if let Some(TypedHeader(agent)) = user_agent {
        info!("Client connecting: {}", agent.as_str());
    }
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Client connected");
    let (mut sender, mut receiver) = socket.split();

    // Each session draws on its own sheet; instances can still pull in
    // sheets created by other sessions through the shared document.
    let mut sheet = {
        let mut doc = state.doc.write().unwrap();
        doc.add_sheet()
    };
    if sender
        .send(Message::Text(format!("SHEET_UPDATE:{}", json!(sheet))))
        .await
        .is_err()
    {
        return;
    }
    if send_scene(&mut sender, &state, sheet).await.is_err() {
        return;
    }

    while let Some(msg) = receiver.next().await {
        let msg = if let Ok(msg) = msg {
            msg
        } else {
            return;
        };

        let Message::Text(text) = msg else { continue };
        info!("Received message: {}", text);

        if text == "RELAX" {
            let outcome = {
                let mut doc = state.doc.write().unwrap();
                doc.relax_budgeted(sheet, RELAX_BUDGET)
            };
            match outcome {
                Ok(outcome) => {
                    let update = format!(
                        "RELAX_UPDATE:{}",
                        serde_json::to_string(&outcome).unwrap_or("{}".into())
                    );
                    if sender.send(Message::Text(update)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Relaxation failed: {}", e);
                    let _ = sender
                        .send(Message::Text(format_error("RELAX_FAILED", &e.to_string())))
                        .await;
                    continue;
                }
            }
            if send_scene(&mut sender, &state, sheet).await.is_err() {
                return;
            }
        } else if text == "NEW_SHEET" {
            sheet = {
                let mut doc = state.doc.write().unwrap();
                doc.add_sheet()
            };
            info!("Switched to fresh sheet {}", sheet);
            if sender
                .send(Message::Text(format!("SHEET_UPDATE:{}", json!(sheet))))
                .await
                .is_err()
            {
                return;
            }
            if send_scene(&mut sender, &state, sheet).await.is_err() {
                return;
            }
        } else if let Some(json_str) = text.strip_prefix("USE_SHEET:") {
            match serde_json::from_str::<SheetId>(json_str) {
                Ok(id) if state.doc.read().unwrap().sheet(id).is_some() => {
                    sheet = id;
                    if send_scene(&mut sender, &state, sheet).await.is_err() {
                        return;
                    }
                }
                Ok(id) => {
                    warn!("Unknown sheet {}", id);
                    let _ = sender
                        .send(Message::Text(format_error(
                            "UNKNOWN_SHEET",
                            &format!("no sheet {}", id),
                        )))
                        .await;
                }
                Err(e) => warn!("Failed to parse USE_SHEET command: {}", e),
            }
        } else if let Some(json_str) = text.strip_prefix("SNAP:") {
            // Preview only: reply with the landing point, no scene change
            if let Ok(cmd) = serde_json::from_str::<At>(json_str) {
                let snapped = {
                    let mut doc = state.doc.write().unwrap();
                    doc.snap(sheet, cmd.point(), None)
                };
                match snapped {
                    Ok(p) => {
                        let reply = format!("SNAP_UPDATE:{}", json!({ "x": p.x, "y": p.y }));
                        if sender.send(Message::Text(reply)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Snap failed: {}", e),
                }
            } else {
                warn!("Failed to parse SNAP command: {}", json_str);
            }
        } else {
            match apply_edit(&state, sheet, &text) {
                Ok(Edit::Changed) => {
                    if send_scene(&mut sender, &state, sheet).await.is_err() {
                        return;
                    }
                }
                Ok(Edit::NoOp) => {
                    // Recognized command that found nothing to act on
                    if sender
                        .send(Message::Text(format!("NO_OP_UPDATE:{}", text)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(Edit::Unrecognized) => {
                    if sender
                        .send(Message::Text(format!("Echo: {}", text)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(message) => {
                    warn!("Edit failed: {}", message);
                    let _ = sender
                        .send(Message::Text(format_error("EDIT_FAILED", &message)))
                        .await;
                }
            }
        }
    }
}

/// Dispatch one structural edit against the active sheet. `Changed`
/// means the scene should be re-sent; `NoOp` that a recognized command
/// found nothing under its coordinates.
fn apply_edit(state: &Arc<AppState>, sheet: SheetId, text: &str) -> Result<Edit, String> {
    let mut doc = state.doc.write().unwrap();
    fn on_sheet(doc: &mut Document, sheet: SheetId) -> Result<&mut Sheet, String> {
        doc.sheet_mut(sheet)
            .ok_or_else(|| format!("no sheet {}", sheet))
    }

    if let Some(json_str) = text.strip_prefix("ADD_LINE:") {
        let cmd: SegmentCmd = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        on_sheet(&mut doc, sheet)?.add_line(Point2::new(cmd.x1, cmd.y1), Point2::new(cmd.x2, cmd.y2));
        Ok(Edit::Changed)
    } else if let Some(json_str) = text.strip_prefix("ADD_ARC:") {
        let cmd: ArcCmd = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        on_sheet(&mut doc, sheet)?.add_arc(
            Point2::new(cmd.x1, cmd.y1),
            Point2::new(cmd.x2, cmd.y2),
            Point2::new(cmd.cx, cmd.cy),
        );
        Ok(Edit::Changed)
    } else if let Some(json_str) = text.strip_prefix("ADD_ATTACHER:") {
        let cmd: At = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        on_sheet(&mut doc, sheet)?.add_attacher(cmd.point());
        Ok(Edit::Changed)
    } else if let Some(json_str) = text.strip_prefix("DRAG:") {
        let cmd: DragCmd = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        let from = cmd.from.point();
        let (grabbed, dragged) = {
            let sheet_ref = on_sheet(&mut doc, sheet)?;
            (sheet_ref.handle_at(from, &[]), sheet_ref.find_thing_at(from))
        };
        let Some(h) = grabbed else {
            return Err(format!("no handle at ({}, {})", from.x, from.y));
        };
        // Exclude the grabbed geometry so a short drag cannot snap
        // back onto the handle being moved.
        let target = doc
            .snap(sheet, cmd.to.point(), dragged)
            .map_err(|e| e.to_string())?;
        on_sheet(&mut doc, sheet)?.set_handle_pos(h, target);
        Ok(Edit::Changed)
    } else if let Some(json_str) = text.strip_prefix("PIN:") {
        let cmd: At = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        Ok(Edit::from_changed(on_sheet(&mut doc, sheet)?.pin(cmd.point())))
    } else if let Some(json_str) = text.strip_prefix("WEIGHT:") {
        let cmd: At = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        Ok(Edit::from_changed(on_sheet(&mut doc, sheet)?.add_weight(cmd.point())))
    } else if let Some(json_str) = text.strip_prefix("FIXED_DISTANCE:") {
        let cmd: At = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        Ok(Edit::from_changed(on_sheet(&mut doc, sheet)?.fixed_distance(cmd.point())))
    } else if let Some(json_str) = text.strip_prefix("HORIZONTAL_OR_VERTICAL:") {
        let cmd: At = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        Ok(Edit::from_changed(on_sheet(&mut doc, sheet)?.horizontal_or_vertical(cmd.point())))
    } else if text == "EQUAL_DISTANCE" {
        Ok(Edit::from_changed(on_sheet(&mut doc, sheet)?.equal_distance()))
    } else if let Some(json_str) = text.strip_prefix("FULL_SIZE:") {
        let cmd: At = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        Ok(Edit::from_changed(on_sheet(&mut doc, sheet)?.full_size(cmd.point())))
    } else if let Some(json_str) = text.strip_prefix("SELECT:") {
        let cmd: At = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        Ok(Edit::from_changed(
            on_sheet(&mut doc, sheet)?.toggle_select(cmd.point()),
        ))
    } else if text == "CLEAR_SELECTION" {
        on_sheet(&mut doc, sheet)?.clear_selection();
        Ok(Edit::Changed)
    } else if let Some(json_str) = text.strip_prefix("DELETE:") {
        let cmd: At = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        Ok(Edit::from_changed(on_sheet(&mut doc, sheet)?.delete(cmd.point())))
    } else if let Some(json_str) = text.strip_prefix("ADD_INSTANCE:") {
        let cmd: InstanceCmd = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        let placed = doc
            .add_instance(sheet, cmd.master, Point2::new(cmd.x, cmd.y), cmd.size, cmd.angle)
            .map_err(|e| e.to_string())?;
        if placed.is_none() {
            return Err(format!("cannot instance {} here", cmd.master));
        }
        Ok(Edit::Changed)
    } else if let Some(json_str) = text.strip_prefix("DISMEMBER:") {
        let cmd: At = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        doc.dismember(sheet, cmd.point())
            .map(Edit::from_changed)
            .map_err(|e| e.to_string())
    } else if let Some(json_str) = text.strip_prefix("RESIZE_INSTANCE:") {
        let cmd: AdjustCmd = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        doc.resize_instance_at(sheet, Point2::new(cmd.x, cmd.y), cmd.amount)
            .map(Edit::from_changed)
            .map_err(|e| e.to_string())
    } else if let Some(json_str) = text.strip_prefix("ROTATE_INSTANCE:") {
        let cmd: AdjustCmd = serde_json::from_str(json_str).map_err(|e| e.to_string())?;
        doc.rotate_instance_at(sheet, Point2::new(cmd.x, cmd.y), cmd.amount)
            .map(Edit::from_changed)
            .map_err(|e| e.to_string())
    } else {
        Ok(Edit::Unrecognized)
    }
}

async fn send_scene(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    state: &Arc<AppState>,
    sheet: SheetId,
) -> Result<(), axum::Error> {
    let json = {
        let doc = state.doc.read().unwrap();
        match doc.scene(sheet) {
            Ok(scene) => serde_json::to_string(&scene).unwrap_or("{}".to_string()),
            Err(e) => {
                warn!("Scene dump failed: {}", e);
                "{}".to_string()
            }
        }
    };
    sender
        .send(Message::Text(format!("SCENE_UPDATE:{}", json)))
        .await
}
