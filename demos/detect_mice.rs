//! Lists every mouse the platform backends can reach, then exits.
//!
//! `RUST_LOG=rawmice=debug` shows what each backend saw along the way;
//! `--json` prints the device table machine-readable instead.

use rawmice::Session;

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rawmice=warn".into()),
        )
        .try_init();

    let json = std::env::args().any(|arg| arg == "--json");

    let mut session = match Session::init() {
        Ok(session) => session,
        Err(err) => {
            eprintln!("failed to initialize: {err}");
            std::process::exit(2);
        }
    };

    let devices = session.devices();
    if json {
        match serde_json::to_string_pretty(&devices) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("could not serialize devices: {err}"),
        }
    } else if devices.is_empty() {
        println!("No mice detected!");
    } else {
        for device in &devices {
            let axes = if device
                .axes
                .iter()
                .any(|a| a.kind == rawmice::AxisKind::Absolute)
            {
                "absolute"
            } else {
                "relative"
            };
            println!(
                "{}: {} [{}] {} buttons, {axes} axes",
                device.index, device.name, device.backend, device.buttons
            );
        }
    }

    session.quit();
}
