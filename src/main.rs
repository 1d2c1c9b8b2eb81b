use clap::Parser;
use scale_link::app::Options;
use scale_link::{MacAddress, ScaleEvent, ScaleLink, Tunables};
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Drive the scale link from the command line: discover (or connect
/// directly), then print weight lines until interrupted.
async fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(not(feature = "bluer"))]
    {
        let _ = &options;
        return Err("built without a Bluetooth backend (enable the `bluer` feature)".into());
    }

    #[cfg(feature = "bluer")]
    {
        let mut tunables = Tunables::default();
        tunables.scan_window = Duration::from_secs(options.scan_window);

        let store = scale_link::persist::DeviceStore::new(&options.device_store);
        let store = if options.no_reconnect {
            store.clear()?;
            None
        } else {
            Some(store)
        };

        let link = ScaleLink::new(Arc::new(scale_link::app::BluerRadio), tunables, store);

        // Forward bus events into a channel this task can await on
        let (tx, mut events) = mpsc::unbounded_channel();
        link.events().register(Arc::new(move |event: &ScaleEvent| {
            let _ = tx.send(event.clone());
        }));

        let direct = options.connect;
        match direct {
            Some(address) => link.connect(address, None).await?,
            None => link.start_scan().await?,
        }

        let mut target: Option<MacAddress> = direct;
        while let Some(event) = events.recv().await {
            match event {
                ScaleEvent::ScanStarted => println!("scanning for scales..."),
                ScaleEvent::ScanStopped => {
                    if target.is_none() {
                        println!("no scales found");
                        return Ok(());
                    }
                }
                ScaleEvent::DeviceFound(device) => {
                    println!(
                        "found {} ({}) rssi {} dBm [{}]",
                        device.display_name(),
                        device.address,
                        device.rssi,
                        device.signal_quality()
                    );
                    // connect to the first scale that shows up
                    if target.is_none() {
                        target = Some(device.address);
                        link.connect(device.address, device.name.clone()).await?;
                    }
                }
                ScaleEvent::DeviceUpdated(_) => {}
                ScaleEvent::ConnectionStateChanged { state, device_name } => {
                    println!("{device_name}: {state}");
                }
                ScaleEvent::DeviceNameResolved(name) => println!("connected to {name}"),
                ScaleEvent::WeightReceived { weight_kg, stable } => {
                    let marker = if stable { " (stable)" } else { "" };
                    println!("{weight_kg:.2} kg{marker}");
                }
                ScaleEvent::Error(message) => eprintln!("error: {message}"),
            }
        }

        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // Set up panic hook to ensure clean exit codes for process managers
    // that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
