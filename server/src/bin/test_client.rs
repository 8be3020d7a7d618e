use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{AvatarId, ChatLine, ClientMessage, Movement, Position, Registration};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Connects to a relay, walks through the protocol and prints every frame
/// the server sends back.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Username to register
    #[arg(short = 'n', long, default_value = "probe")]
    name: String,

    /// Avatar identifier to register with
    #[arg(short = 'a', long, default_value = "0")]
    avatar: i64,

    /// Chat line to send after entering the world
    #[arg(short = 'c', long, default_value = "hello from the test client")]
    chat: String,

    /// Seconds to keep listening after the script finishes
    #[arg(short = 'w', long, default_value = "5")]
    wait: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let url = format!("ws://{}", args.server);
    println!("Connecting to {}", url);
    let (ws, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    let script = vec![
        ClientMessage::Ping,
        ClientMessage::Register(Registration {
            username: args.name.clone(),
            avatar_id: AvatarId::from(args.avatar),
        }),
        ClientMessage::EnterWorld,
        ClientMessage::Chat(ChatLine {
            message: args.chat.clone(),
        }),
        ClientMessage::MoveTo(Movement {
            position: Position::new(10.0, 20.0),
        }),
    ];

    for message in script {
        let text = serde_json::to_string(&message)?;
        println!("> {}", text);
        sink.send(Message::Text(text)).await?;
    }

    let deadline = Duration::from_secs(args.wait);
    loop {
        match timeout(deadline, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => println!("< {}", text),
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                println!("Server closed the connection");
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                println!("Read error: {}", e);
                break;
            }
            Err(_) => {
                println!("No traffic for {}s, disconnecting", args.wait);
                break;
            }
        }
    }

    sink.close().await?;
    Ok(())
}
