//! Dumps every raw mouse event to stdout.
//!
//! Plug in a couple of mice, wiggle them, and watch the per-device streams
//! interleave. Exits once every mouse has disconnected (or on CTRL-C).

use std::thread;
use std::time::Duration;

use rawmice::{EventKind, Session};

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rawmice=warn".into()),
        )
        .try_init();

    let mut session = match Session::init() {
        Ok(session) => session,
        Err(err) => {
            eprintln!("failed to initialize: {err}");
            std::process::exit(2);
        }
    };

    let devices = session.devices();
    if devices.is_empty() {
        println!("No mice detected!");
        session.quit();
        std::process::exit(1);
    }
    for device in &devices {
        println!("{}: {}", device.index, device.name);
    }
    println!();
    println!("Use your mice, CTRL-C to exit.");

    loop {
        while let Some(event) = session.poll_event() {
            let device = event.device;
            match event.kind {
                EventKind::RelMotion { item, value } => {
                    let axis = if item == 0 { "X" } else { "Y" };
                    println!("Mouse {device} relative motion {axis} {value}");
                }
                EventKind::AbsMotion { item, value, .. } => {
                    let axis = if item == 0 { "X" } else { "Y" };
                    println!("Mouse {device} absolute motion {axis} {value}");
                }
                EventKind::Button { item, pressed } => {
                    let edge = if pressed { "down" } else { "up" };
                    println!("Mouse {device} button {item} {edge}");
                }
                EventKind::Scroll { item, value } => {
                    let (wheel, direction) = if item == 0 {
                        ("vertical", if value > 0 { "up" } else { "down" })
                    } else {
                        ("horizontal", if value > 0 { "right" } else { "left" })
                    };
                    println!("Mouse {device} wheel {wheel} {direction}");
                }
                EventKind::Disconnect => {
                    println!("Mouse {device} disconnect");
                    if session.device_count() == 0 {
                        println!("All mice disconnected.");
                        session.quit();
                        return;
                    }
                }
            }
        }
        thread::sleep(Duration::from_millis(2));
    }
}
