// Classroom Live CLI
// Drives the room server from a terminal: health and member checks, joining as
// a user, starting and ending classes, watching a dashboard, posting content events

use clap::{Parser, Subcommand};
use colored::*;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "classroom-cli")]
#[command(about = "Classroom Live CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:5001)
    #[arg(short, long, default_value = "127.0.0.1:5001")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Show the stage and attendee pages of a room
    Members {
        #[arg(short, long)]
        room_id: String,

        /// Attendees per page
        #[arg(short, long)]
        page_size: Option<usize>,
    },

    /// Join a room as a user and print incoming events
    Join {
        #[arg(short, long)]
        room_id: String,

        #[arg(short, long)]
        user_id: String,

        /// Display name (defaults to the user id)
        #[arg(short, long)]
        name: Option<String>,

        /// Keep the connection open (press Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Start a class as its owner
    Start {
        #[arg(short, long)]
        room_id: String,

        #[arg(short, long)]
        user_id: String,

        /// Minutes until the class ends automatically
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// End a class as its owner
    End {
        #[arg(short, long)]
        room_id: String,

        #[arg(short, long)]
        user_id: String,
    },

    /// Subscribe to a classroom dashboard and print its events
    Watch {
        #[arg(short, long)]
        classroom_id: String,
    },

    /// Post a content event to a classroom dashboard
    Notify {
        #[arg(short, long)]
        classroom_id: String,

        /// announcement-created, material-created, assignment-created or assignment-deleted
        #[arg(short, long)]
        kind: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        data: String,

        /// Bearer token, when the server sets CONTENT_EVENTS_TOKEN
        #[arg(short, long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Members { room_id, page_size } => {
            show_members(&cli.server, room_id, *page_size).await;
        }
        Commands::Join {
            room_id,
            user_id,
            name,
            keep_alive,
        } => {
            let data = json!({
                "roomId": room_id,
                "userId": user_id,
                "name": name.as_deref().unwrap_or(user_id),
            });
            run_session(&cli.server, "join-room", data, *keep_alive).await;
        }
        Commands::Start {
            room_id,
            user_id,
            duration,
        } => {
            let data = json!({ "roomId": room_id, "userId": user_id, "duration": duration });
            run_session(&cli.server, "start-class", data, false).await;
        }
        Commands::End { room_id, user_id } => {
            let data = json!({ "roomId": room_id, "userId": user_id });
            run_session(&cli.server, "end-class", data, false).await;
        }
        Commands::Watch { classroom_id } => {
            let data = json!({ "roomId": classroom_id });
            run_session(&cli.server, "join-classroom-dashboard", data, true).await;
        }
        Commands::Notify {
            classroom_id,
            kind,
            data,
            token,
        } => {
            notify(&cli.server, classroom_id, kind, data, token.as_deref()).await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Connections: {}", body["connections"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn show_members(server: &str, room_id: &str, page_size: Option<usize>) {
    let mut url = format!("http://{}/rooms/{}/members", server, urlencoding::encode(room_id));
    if let Some(size) = page_size {
        url.push_str(&format!("?page_size={}", size));
    }

    let body = match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
            Ok(body) => body,
            Err(e) => {
                println!("{} Invalid response: {}", "✗".red(), e);
                return;
            }
        },
        Ok(resp) => {
            println!("{} Request failed: {}", "✗".red(), resp.status());
            return;
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };

    let live = if body["isLive"].as_bool().unwrap_or(false) {
        "live".green().bold()
    } else {
        "offline".yellow()
    };
    println!("{} {} ({})", "Room".bold(), room_id.cyan(), live);
    println!("  Members: {}", body["memberCount"]);
    println!("  Dashboard watchers: {}", body["dashboardSubscribers"]);

    match body["stage"].as_object() {
        Some(stage) => println!(
            "  {} {} [{}]",
            "Stage:".bold(),
            stage.get("name").and_then(Value::as_str).unwrap_or("?"),
            stage.get("userId").and_then(Value::as_str).unwrap_or("?")
        ),
        None => println!("  {} {}", "Stage:".bold(), "empty".dimmed()),
    }

    for (index, page) in body["pages"].as_array().into_iter().flatten().enumerate() {
        println!("  {} {}", "Page".bold(), index + 1);
        for member in page.as_array().into_iter().flatten() {
            let hand = if member["handRaised"].as_bool().unwrap_or(false) {
                " ✋"
            } else {
                ""
            };
            println!(
                "    - {} [{}]{}",
                member["name"].as_str().unwrap_or("?"),
                member["userId"].as_str().unwrap_or("?"),
                hand
            );
        }
    }
}

/// Opens a socket, sends one event and prints what comes back
async fn run_session(server: &str, event: &str, data: Value, keep_alive: bool) {
    let url = format!("ws://{}/ws", server);

    let (ws_stream, _) = match connect_async(&url).await {
        Ok(connection) => connection,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    if !send_event(&mut write, event, data).await {
        println!("{} Failed to send {}", "✗".red(), event);
        return;
    }
    println!("{} {} sent", "✓".green(), event.bold());

    if keep_alive {
        println!("Press {} to disconnect.", "Ctrl+C".bold());
    }
    print_events(&mut read, keep_alive).await;
}

async fn send_event<S>(write: &mut S, event: &str, data: Value) -> bool
where
    S: Sink<Message> + Unpin,
{
    let envelope = json!({ "event": event, "data": data });
    write.send(Message::Text(envelope.to_string())).await.is_ok()
}

/// Prints incoming events until the connection closes, or until the server
/// goes quiet for a few seconds when not keeping the connection alive
async fn print_events<R>(read: &mut R, keep_alive: bool)
where
    R: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let idle = if keep_alive {
        Duration::from_secs(30)
    } else {
        Duration::from_secs(3)
    };

    loop {
        match timeout(idle, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => print_event(&text),
            Ok(Some(Ok(Message::Close(_)))) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
            Ok(None) => {
                println!("{} Connection closed", "✗".yellow());
                break;
            }
            Err(_) if keep_alive => continue,
            Err(_) => break,
        }
    }
}

fn print_event(text: &str) {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        println!("{} {}", "◀".green(), text.bright_white());
        return;
    };

    let event = message["event"].as_str().unwrap_or("?");
    let data = &message["data"];

    if event == "error" {
        println!(
            "{} {} {}",
            "◀".red(),
            data["code"].as_str().unwrap_or("error").red().bold(),
            data["message"].as_str().unwrap_or("")
        );
    } else if data.is_null() {
        println!("{} {}", "◀".green(), event.bold());
    } else {
        println!("{} {} {}", "◀".green(), event.bold(), data.to_string().bright_white());
    }
}

async fn notify(server: &str, classroom_id: &str, kind: &str, data: &str, token: Option<&str>) {
    let payload: Value = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(e) => {
            println!("{} --data is not valid JSON: {}", "✗".red(), e);
            return;
        }
    };

    let url = format!(
        "http://{}/classrooms/{}/events",
        server,
        urlencoding::encode(classroom_id)
    );
    let client = reqwest::Client::new();

    let mut request = client
        .post(&url)
        .json(&json!({ "event": kind, "data": payload }));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    match request.send().await {
        Ok(resp) if resp.status().is_success() => {
            let delivered = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body["delivered"].as_u64())
                .unwrap_or(0);
            println!(
                "{} {} delivered to {} dashboard connection(s)",
                "✓".green(),
                kind.bold(),
                delivered
            );
        }
        Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED => {
            println!("{} Server requires a valid --token", "✗".red());
        }
        Ok(resp) => {
            println!("{} Server rejected event: {}", "✗".red(), resp.status());
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}
