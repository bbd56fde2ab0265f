//! Watch stock and reservations for a few SKUs.
//!
//! ```text
//! POS_REALTIME_LOG_MODE=development cargo run --example stock_monitor -- \
//!     ws://localhost:4000/realtime http://localhost:4000/api sku-1 sku-2
//! ```
//!
//! Pass `-` as the channel URL to run on polling alone.

use std::sync::Arc;
use std::time::Duration;

use realtime_client::logging;
use realtime_client::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging_from_env()?;

    let mut args = std::env::args().skip(1);
    let channel_url = args.next().filter(|url| url != "-");
    let api_base_url = args.next().unwrap_or_else(|| "http://localhost:4000/api".to_string());
    let mut entities: Vec<String> = args.collect();
    if entities.is_empty() {
        entities.push("sku-1".to_string());
    }

    let mut config = RealtimeConfig::polling_only(api_base_url)
        .with_poll_interval(Duration::from_secs(5))
        .with_fallback_after_failures(2);
    if let Some(url) = channel_url {
        config = config.with_channel_url(url);
    }
    config.validate()?;

    let client = Arc::new(RealtimeClient::new(config));

    let _subscriptions: Vec<Subscription> = entities
        .iter()
        .map(|entity| client.subscribe_entity(entity, print_message))
        .collect();
    let _unknown = client.subscribe_global(|message: &Message| {
        if let Message::Unknown { kind, .. } = message {
            println!("  (unhandled message type {})", kind);
        }
    });

    client.connect();
    if let Some(error) = client.last_error() {
        eprintln!("configuration problem: {}", error);
    }

    let mut state = client.watch_state();
    println!("connection: {}", *state.borrow());
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                println!(
                    "connection: {} (failed attempts: {})",
                    *state.borrow(),
                    client.backoff_attempt()
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect();
    Ok(())
}

fn print_message(message: &Message) {
    match message {
        Message::StockUpdate {
            entity_id,
            variant_id,
            available_qty,
        } => println!(
            "{}{}: {} available",
            entity_id,
            variant_id
                .as_deref()
                .map(|variant| format!("/{}", variant))
                .unwrap_or_default(),
            available_qty
        ),
        Message::ReservationCreated {
            entity_id,
            reservation_id,
            quantity,
            expires_at,
            ..
        } => println!(
            "{}: reservation {} holds {} until {}",
            entity_id,
            reservation_id,
            quantity,
            expires_at
                .as_ref()
                .and_then(ExpiresAt::as_datetime)
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "further notice".to_string())
        ),
        Message::ReservationUpdated {
            entity_id,
            reservation_id,
            quantity,
            ..
        } => println!("{}: reservation {} now holds {}", entity_id, reservation_id, quantity),
        Message::ReservationReleased {
            entity_id,
            reservation_id,
        } => println!("{}: reservation {} released", entity_id, reservation_id),
        Message::EntityExpired {
            entity_id,
            variant_id,
        } => println!("{}/{}: expired", entity_id, variant_id),
        other => println!("{}: {:?}", other.kind(), other),
    }
}
