//! Two participants co-editing one document through an in-process relay.
//!
//! Usage: `peershare-demo [config.toml]`. Set `RUST_LOG=debug` to watch the
//! batches flow.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use peershare_bridge::{
    BridgeConfig, LocalRelay, MemoryBuffer, ResyncSource, SessionController, SessionEvent,
};

struct Participant {
    name: &'static str,
    buffer: MemoryBuffer,
    session: SessionController,
}

impl Participant {
    fn new(name: &'static str, text: &str, config: &BridgeConfig, relay: &LocalRelay) -> Self {
        let buffer = MemoryBuffer::new(format!("mem://{name}"), text);
        let session = SessionController::new(config.clone(), Arc::new(buffer.clone()), Arc::new(relay.clone()));
        Self { name, buffer, session }
    }

    fn report(&self) {
        let status = self.session.status();
        println!(
            "{:>6}: {:?}  (participants: {}, desynchronized: {})",
            self.name,
            self.buffer.text(),
            status.participant_count,
            status.desynchronized
        );
    }
}

fn log_events(name: &'static str, session: &mut SessionController) {
    let Some(mut events) = session.take_event_rx() else {
        return;
    };
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::DisplayUpdate { participant_count } => {
                    info!("{name}: {participant_count} participant(s) in session")
                }
                SessionEvent::Error(e) | SessionEvent::Desynchronized(e) => log::warn!("{name}: {e}"),
                other => info!("{name}: {other:?}"),
            }
        }
    });
}

/// Give the session drivers a moment to exchange updates.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => match BridgeConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        None => BridgeConfig::default(),
    };
    let room = config.default_room.clone();
    let relay = LocalRelay::new();

    let mut alice = Participant::new("alice", "helloworld", &config, &relay);
    let mut bob = Participant::new("bob", "", &config, &relay);
    log_events(alice.name, &mut alice.session);
    log_events(bob.name, &mut bob.session);

    if let Err(e) = alice.session.start(&room) {
        eprintln!("alice could not join `{room}`: {e}");
        return;
    }
    // Alice's buffer seeds the shared document.
    if let Err(e) = alice.session.resync(ResyncSource::Buffer).await {
        eprintln!("seeding failed: {e}");
        return;
    }
    if let Err(e) = bob.session.start(&room) {
        eprintln!("bob could not join `{room}`: {e}");
        return;
    }
    settle().await;
    println!("-- bob joined");
    alice.report();
    bob.report();

    alice.buffer.type_text(5, 0, " ");
    bob.buffer.type_text(0, 1, "H");
    settle().await;
    println!("-- both typed");
    alice.report();
    bob.report();

    let end = bob.buffer.text().encode_utf16().count() as u32;
    bob.buffer.type_text(end, 0, "!");
    settle().await;
    println!("-- bob appended");
    alice.report();
    bob.report();

    bob.session.stop().await;
    settle().await;
    println!("-- bob left");
    alice.report();

    alice.session.stop().await;
    println!(
        "shared text: {:?}",
        relay.room_text(&room, &config.text_name).unwrap_or_default()
    );
}
