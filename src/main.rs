use clap::{Parser, Subcommand};
use log::{error, info};
use roomcast::audio::{CpalCapture, CpalPlayback};
use roomcast::client::{CastClient, ClientConfig};
use roomcast::config::{self, StreamParams};
use roomcast::server::{CastServer, ServerConfig};

#[derive(Parser)]
#[command(name = "roomcast")]
#[command(about = "Synchronized whole-house PCM audio over WebSocket")]
#[command(long_about = "
Distribute one machine's audio to every room on the network, in phase.

EXAMPLES:
  # Stream the default capture device
  roomcast server

  # Stream a specific loopback/monitor device on another port
  roomcast server --port 9000 --device \"Monitor of Built-in Audio\"

  # Play a source on this machine's default output
  roomcast client --server ws://192.168.1.10:8765

  # List audio devices
  roomcast devices
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the source node: capture audio and broadcast it to sinks
    Server {
        /// Port to listen on
        #[arg(long, default_value_t = config::DEFAULT_PORT)]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Capture device name (default: host default input)
        #[arg(long)]
        device: Option<String>,
    },

    /// Run a sink node: receive, synchronize and play
    Client {
        /// Source URL
        #[arg(long, default_value_t = format!("ws://127.0.0.1:{}", config::DEFAULT_PORT))]
        server: String,

        /// Playback device name (default: host default output)
        #[arg(long)]
        device: Option<String>,

        /// Name this sink reports to the source
        #[arg(long, default_value = "sink")]
        name: String,
    },

    /// List available audio devices
    Devices,

    /// Dump the compiled configuration
    Info,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Server { port, bind, device } => run_server(port, bind, device),
        Command::Client {
            server,
            device,
            name,
        } => run_client(server, device, name),
        Command::Devices => roomcast::audio::device::list_devices().map_err(Into::into),
        Command::Info => {
            config::print_info();
            Ok(())
        }
    };

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run_server(port: u16, bind: String, device: Option<String>) -> roomcast::Result<()> {
    let params = StreamParams::default();
    let capture = CpalCapture::open(device.as_deref(), params)?;

    let server = CastServer::bind(ServerConfig {
        bind_address: format!("{}:{}", bind, port),
        params,
    })?;

    let handle = server.handle();
    ctrlc::set_handler(move || {
        info!("🛑 shutdown requested");
        handle.stop();
    })
    .ok();

    server.run(Box::new(capture))
}

fn run_client(server: String, device: Option<String>, name: String) -> roomcast::Result<()> {
    let params = StreamParams::default();
    let playback = CpalPlayback::open(device.as_deref(), params)?;

    let client = CastClient::connect(
        ClientConfig {
            url: server,
            client_id: name,
            params,
            ..ClientConfig::default()
        },
        Box::new(playback),
    )?;

    let stop = {
        let client_stop = client.stop_flag();
        move || {
            info!("🛑 shutdown requested");
            client_stop.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    };
    ctrlc::set_handler(stop).ok();

    client.join()
}
